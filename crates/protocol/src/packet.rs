//! Packet types exchanged with the analysis server.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// An outbound request frame.
///
/// Serialised as `{"Type":"request","Seq":..,"Command":..,"Arguments":..}` by
/// [`crate::encode_request`]. Deserialisation ignores the `Type` key, which lets
/// test servers parse the lines a client writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestPacket {
	/// Sequence id, unique for the lifetime of a session.
	pub seq: u64,
	/// Endpoint name, e.g. `/findusages`.
	pub command: String,
	/// Opaque request arguments.
	#[serde(default)]
	pub arguments: JsonValue,
}

/// Reply to a [`RequestPacket`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePacket {
	/// Sequence id of the request this response answers.
	#[serde(rename = "Request_seq")]
	pub request_seq: u64,
	/// Echo of the request command.
	#[serde(rename = "Command", default)]
	pub command: String,
	/// Whether the server handled the request successfully.
	#[serde(rename = "Success")]
	pub success: bool,
	/// Response payload.
	#[serde(rename = "Body", default)]
	pub body: Option<JsonValue>,
	/// Server-provided failure message.
	#[serde(rename = "Message", default)]
	pub message: Option<String>,
}

/// Unsolicited notification pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPacket {
	/// Event name, e.g. `ProjectAdded` or `log`.
	#[serde(rename = "Event")]
	pub event: String,
	/// Event payload.
	#[serde(rename = "Body", default)]
	pub body: JsonValue,
}

/// Inbound packet, discriminated on the wire by its `Type` key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "Type", rename_all = "lowercase")]
pub enum Packet {
	/// A `"response"` packet.
	Response(ResponsePacket),
	/// An `"event"` packet.
	Event(EventPacket),
}

impl Packet {
	/// Serialises the packet as a newline-terminated line, as the server writes it.
	pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
		let mut line = serde_json::to_vec(self)?;
		line.push(b'\n');
		Ok(line)
	}
}

/// Why an inbound line could not be turned into a [`Packet`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedPacketError {
	/// The line is not valid UTF-8.
	#[error("line is not valid UTF-8")]
	InvalidUtf8,
	/// The line is not a JSON document.
	#[error("invalid JSON: {0}")]
	InvalidJson(String),
	/// The JSON document has no string `Type` key.
	#[error("packet has no `Type` field")]
	MissingType,
	/// The `Type` key names neither a response nor an event.
	#[error("unknown packet type `{0}`")]
	UnknownType(String),
	/// The packet type is known but its fields do not match.
	#[error("invalid {kind} packet: {reason}")]
	InvalidShape {
		/// The packet `Type`.
		kind: String,
		/// Deserialisation failure.
		reason: String,
	},
	/// The line exceeded the codec's length limit and was discarded.
	#[error("line exceeds {limit} bytes")]
	LineTooLong {
		/// Configured limit in bytes.
		limit: usize,
	},
}

/// A line that failed to decode, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedPacket {
	/// The offending line (lossily decoded, truncated when over-long).
	pub line: String,
	/// Decoding failure.
	pub error: MalformedPacketError,
}

/// One decoded line of server output.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
	/// A well-formed packet.
	Packet(Packet),
	/// Noise on the channel; decoding continues with the next line.
	Malformed(MalformedPacket),
}
