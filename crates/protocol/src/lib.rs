//! Wire codec for the OmniSharp stdio protocol.
//!
//! The analysis server reads one JSON request per line on stdin and writes one
//! JSON packet per line on stdout. This crate provides protocol-level primitives
//! only, with no knowledge of processes or sessions:
//! * [`RequestPacket`]: outbound request frame, serialised by [`encode_request`]
//! * [`Packet`]: inbound frame, either a [`ResponsePacket`] or an [`EventPacket`]
//! * [`PacketCodec`]: a [`tokio_util::codec::Decoder`] that reassembles lines across
//!   arbitrary chunk boundaries and reports undecodable lines as [`Frame::Malformed`]
//! * [`decode_stream`]: pull-based stream of [`Frame`]s over any [`tokio::io::AsyncRead`]

#![warn(missing_docs)]

pub mod codec;
pub mod packet;

pub use codec::{DEFAULT_MAX_LINE_LENGTH, PacketCodec, decode_line, decode_stream, encode_request};
pub use packet::{
	EventPacket, Frame, MalformedPacket, MalformedPacketError, Packet, RequestPacket, ResponsePacket,
};
pub use serde_json::Value as JsonValue;
