#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stagehub_domain::{EventKind, Platform};
use thiserror::Error;

/// Default maximum size of a single text message on the presentation channel.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024; // 1 MiB

#[derive(Debug, Error)]
pub enum WireError {
	#[error("message exceeds maximum size: len={len} max={max}")]
	MessageTooLarge {
		len: usize,
		max: usize,
	},

	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),
}

/// The unit broadcast to every attached consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
	#[serde(rename = "event")]
	pub kind: EventKind,
	pub platform: Platform,
	pub data: Map<String, Value>,
}

impl NormalizedEvent {
	pub fn new(kind: EventKind, platform: Platform, data: Map<String, Value>) -> Self {
		Self { kind, platform, data }
	}

	/// Build from any JSON value; non-object values land under `"value"`.
	pub fn from_value(kind: EventKind, platform: Platform, data: Value) -> Self {
		let data = match data {
			Value::Object(map) => map,
			Value::Null => Map::new(),
			other => {
				let mut map = Map::new();
				map.insert("value".to_string(), other);
				map
			}
		};
		Self { kind, platform, data }
	}

	pub fn is_chat(&self) -> bool {
		self.kind == EventKind::Chat
	}

	/// String field from `data`, if present.
	pub fn data_str(&self, key: &str) -> Option<&str> {
		self.data.get(key).and_then(Value::as_str)
	}

	pub fn to_message(&self) -> OutboundMessage {
		OutboundMessage {
			event: self.kind,
			platform: Some(self.platform),
			data: Value::Object(self.data.clone()),
		}
	}
}

/// Outbound wire shape: `{ event, platform?, data }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
	pub event: EventKind,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub platform: Option<Platform>,

	pub data: Value,
}

impl OutboundMessage {
	/// The bulk replay sent once to a newly attached consumer.
	pub fn chat_history(entries: &[ChatEntry]) -> Result<Self, WireError> {
		Ok(Self {
			event: EventKind::ChatHistory,
			platform: None,
			data: serde_json::to_value(entries)?,
		})
	}
}

/// One replayable chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
	pub platform: Platform,
	pub user_id: String,
	pub nickname: String,
	pub text: String,
	/// Unix milliseconds.
	pub timestamp: i64,
	/// Pre-formatted local clock time.
	pub time: String,
}

/// Inbound control messages understood by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
	/// The consumer finished playing the current track.
	TrackEnded,
}

/// Encode an outbound message, enforcing `max_size`.
pub fn encode_message(msg: &OutboundMessage, max_size: usize) -> Result<String, WireError> {
	let text = serde_json::to_string(msg)?;
	if text.len() > max_size {
		return Err(WireError::MessageTooLarge {
			len: text.len(),
			max: max_size,
		});
	}
	Ok(text)
}

/// Encode using `DEFAULT_MAX_MESSAGE_SIZE`.
pub fn encode_message_default(msg: &OutboundMessage) -> Result<String, WireError> {
	encode_message(msg, DEFAULT_MAX_MESSAGE_SIZE)
}

/// Decode an outbound message (consumer side).
pub fn decode_message(text: &str, max_size: usize) -> Result<OutboundMessage, WireError> {
	if text.len() > max_size {
		return Err(WireError::MessageTooLarge {
			len: text.len(),
			max: max_size,
		});
	}
	Ok(serde_json::from_str(text)?)
}

/// Decode an inbound control message.
///
/// Returns `Ok(None)` for well-formed JSON of any other shape and `Err` for
/// payloads that are not JSON at all or exceed `max_size`.
pub fn decode_control(text: &str, max_size: usize) -> Result<Option<ControlMessage>, WireError> {
	if text.len() > max_size {
		return Err(WireError::MessageTooLarge {
			len: text.len(),
			max: max_size,
		});
	}

	let value: Value = serde_json::from_str(text)?;
	let event = value.as_object().and_then(|o| o.get("event")).and_then(Value::as_str);

	Ok(match event {
		Some("trackEnded") => Some(ControlMessage::TrackEnded),
		_ => None,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn normalized_event_wraps_scalars() {
		let ev = NormalizedEvent::from_value(EventKind::Like, Platform::TikTok, json!(5));
		assert_eq!(ev.data.get("value"), Some(&json!(5)));

		let ev = NormalizedEvent::from_value(EventKind::MusicStop, Platform::System, Value::Null);
		assert!(ev.data.is_empty());
	}

	#[test]
	fn chat_history_has_no_platform() {
		let msg = OutboundMessage::chat_history(&[]).unwrap();
		let text = encode_message_default(&msg).unwrap();
		assert_eq!(text, r#"{"event":"chatHistory","data":[]}"#);
	}
}
