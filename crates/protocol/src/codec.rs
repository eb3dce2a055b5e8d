//! Newline-delimited JSON framing.

use std::io;

use bytes::{Buf, BytesMut};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};

use crate::packet::{
	EventPacket, Frame, MalformedPacket, MalformedPacketError, Packet, RequestPacket, ResponsePacket,
};

/// Default upper bound on a single inbound line.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024 * 1024;

/// Bytes of an over-long line kept in the malformed report.
const TRUNCATED_PREVIEW: usize = 256;

#[derive(Serialize)]
struct WireRequest<'a> {
	#[serde(rename = "Type")]
	kind: &'static str,
	#[serde(flatten)]
	packet: &'a RequestPacket,
}

/// Serialises a request as exactly one `\n`-terminated UTF-8 JSON line.
///
/// # Errors
///
/// Returns the serialiser error when the packet cannot be represented as JSON.
/// Nothing is written in that case.
pub fn encode_request(packet: &RequestPacket) -> serde_json::Result<Vec<u8>> {
	let mut line = serde_json::to_vec(&WireRequest {
		kind: "request",
		packet,
	})?;
	line.push(b'\n');
	Ok(line)
}

/// Decodes a single line (without its terminating `\n`).
///
/// Returns `None` for blank lines. A trailing `\r` is ignored.
pub fn decode_line(line: &[u8]) -> Option<Frame> {
	let line = line.strip_suffix(b"\r").unwrap_or(line);
	if line.iter().all(u8::is_ascii_whitespace) {
		return None;
	}

	let Ok(text) = std::str::from_utf8(line) else {
		return Some(Frame::Malformed(MalformedPacket {
			line: String::from_utf8_lossy(line).into_owned(),
			error: MalformedPacketError::InvalidUtf8,
		}));
	};

	Some(match parse_packet(text) {
		Ok(packet) => Frame::Packet(packet),
		Err(error) => Frame::Malformed(MalformedPacket {
			line: text.to_owned(),
			error,
		}),
	})
}

fn parse_packet(text: &str) -> Result<Packet, MalformedPacketError> {
	let value: JsonValue = serde_json::from_str(text)
		.map_err(|e| MalformedPacketError::InvalidJson(e.to_string()))?;

	let kind = match value.get("Type") {
		Some(JsonValue::String(kind)) => kind.clone(),
		_ => return Err(MalformedPacketError::MissingType),
	};

	let shape_err = |e: serde_json::Error| MalformedPacketError::InvalidShape {
		kind: kind.clone(),
		reason: e.to_string(),
	};

	match kind.as_str() {
		"response" => serde_json::from_value::<ResponsePacket>(value)
			.map(Packet::Response)
			.map_err(shape_err),
		"event" => serde_json::from_value::<EventPacket>(value)
			.map(Packet::Event)
			.map_err(shape_err),
		_ => Err(MalformedPacketError::UnknownType(kind.clone())),
	}
}

/// Line decoder for the server's stdout.
///
/// Partial lines are buffered across reads; the external process may flush in
/// chunks that do not align with newlines. Undecodable lines surface as
/// [`Frame::Malformed`] rather than errors so one bad line never ends the stream.
#[derive(Debug, Clone)]
pub struct PacketCodec {
	max_line_length: usize,
	/// Offset up to which the buffer is known to contain no `\n`.
	next_index: usize,
	/// Set while skipping the remainder of an over-long line.
	discarding: bool,
}

impl PacketCodec {
	/// Creates a codec with [`DEFAULT_MAX_LINE_LENGTH`].
	#[must_use]
	pub const fn new() -> Self {
		Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
	}

	/// Creates a codec that discards lines longer than `max_line_length` bytes.
	#[must_use]
	pub const fn with_max_line_length(max_line_length: usize) -> Self {
		Self {
			max_line_length,
			next_index: 0,
			discarding: false,
		}
	}

	fn too_long(&self, line: &[u8]) -> Frame {
		let preview = String::from_utf8_lossy(&line[..TRUNCATED_PREVIEW.min(line.len())]).into_owned();
		Frame::Malformed(MalformedPacket {
			line: preview,
			error: MalformedPacketError::LineTooLong {
				limit: self.max_line_length,
			},
		})
	}
}

impl Default for PacketCodec {
	fn default() -> Self {
		Self::new()
	}
}

impl Decoder for PacketCodec {
	type Item = Frame;
	type Error = io::Error;

	fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<Frame>> {
		loop {
			let newline = buf[self.next_index..]
				.iter()
				.position(|b| *b == b'\n')
				.map(|i| self.next_index + i);

			match newline {
				Some(end) if self.discarding => {
					buf.advance(end + 1);
					self.discarding = false;
					self.next_index = 0;
				}
				Some(end) if end > self.max_line_length => {
					let frame = self.too_long(&buf[..end]);
					buf.advance(end + 1);
					self.next_index = 0;
					return Ok(Some(frame));
				}
				Some(end) => {
					let line = buf.split_to(end + 1);
					self.next_index = 0;
					if let Some(frame) = decode_line(&line[..end]) {
						return Ok(Some(frame));
					}
				}
				None if self.discarding => {
					buf.clear();
					self.next_index = 0;
					return Ok(None);
				}
				None if buf.len() > self.max_line_length => {
					let frame = self.too_long(&buf[..]);
					buf.clear();
					self.next_index = 0;
					self.discarding = true;
					return Ok(Some(frame));
				}
				None => {
					self.next_index = buf.len();
					return Ok(None);
				}
			}
		}
	}

	fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<Frame>> {
		if let Some(frame) = self.decode(buf)? {
			return Ok(Some(frame));
		}
		if self.discarding {
			buf.clear();
			self.discarding = false;
			return Ok(None);
		}
		if buf.is_empty() {
			return Ok(None);
		}
		let rest = buf.split_to(buf.len());
		self.next_index = 0;
		Ok(decode_line(&rest))
	}
}

/// Wraps a reader into a lazy stream of decoded frames.
///
/// The stream ends when the reader reaches EOF; only genuine I/O failures are
/// yielded as `Err`.
pub fn decode_stream<R: AsyncRead>(reader: R) -> FramedRead<R, PacketCodec> {
	FramedRead::new(reader, PacketCodec::new())
}
