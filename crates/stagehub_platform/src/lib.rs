#![forbid(unsafe_code)]

pub mod capabilities;

use std::fmt;
use std::time::SystemTime;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use stagehub_domain::{EventKind, Platform};
use tokio::sync::mpsc;
use uuid::Uuid;

pub use capabilities::{Actor, RawCapabilitySignals, TelegramMemberStatus, can_skip_current_song, resolve_capabilities};

/// Adapter → hub message.
#[derive(Debug, Clone)]
pub enum SourceEvent {
	/// Normalized audience event.
	Ingest(Box<IngestEvent>),

	/// Connect/disconnect report.
	Status(SourceStatus),
}

/// Platform-agnostic ingest envelope.
#[derive(Debug, Clone)]
pub struct IngestEvent {
	pub platform: Platform,

	/// Hub receipt timestamp (not for ordering).
	pub ingest_time: SystemTime,

	/// Platform-native message id, used for dedupe when present.
	pub platform_message_id: Option<String>,

	pub author: UserRef,

	/// Raw role signals, mapped to capabilities by the hub.
	pub signals: RawCapabilitySignals,

	pub trace: IngestTrace,

	pub payload: IngestPayload,
}

impl IngestEvent {
	pub fn new(platform: Platform, author: UserRef, signals: RawCapabilitySignals, payload: IngestPayload) -> Self {
		Self {
			platform,
			ingest_time: SystemTime::now(),
			platform_message_id: None,
			author,
			signals,
			trace: IngestTrace::default(),
			payload,
		}
	}

	/// Convenience constructor for chat lines.
	pub fn chat(platform: Platform, author: UserRef, signals: RawCapabilitySignals, text: impl Into<String>) -> Self {
		Self::new(platform, author, signals, IngestPayload::ChatMessage { text: text.into() })
	}

	pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
		self.platform_message_id = Some(id.into());
		self
	}
}

/// Adapter-local trace metadata.
#[derive(Debug, Clone, Default)]
pub struct IngestTrace {
	/// Adapter session/connection identifier.
	pub session_id: Option<String>,

	pub local_seq: Option<u64>,
}

/// Normalized ingest payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestPayload {
	ChatMessage {
		text: String,
	},

	Join,

	Follow,

	Subscribe {
		#[serde(default)]
		tier: Option<String>,
		#[serde(default)]
		months: Option<u32>,
	},

	Gift {
		#[serde(default)]
		gift_name: Option<String>,
		amount: u32,
	},

	Like {
		#[serde(default = "one")]
		count: u32,
	},

	Share,
}

fn one() -> u32 {
	1
}

impl IngestPayload {
	/// Normalized event kind for this payload.
	pub fn kind(&self) -> EventKind {
		match self {
			Self::ChatMessage { .. } => EventKind::Chat,
			Self::Join => EventKind::Join,
			Self::Follow => EventKind::Follow,
			Self::Subscribe { .. } => EventKind::Subscribe,
			Self::Gift { .. } => EventKind::Gift,
			Self::Like { .. } => EventKind::Like,
			Self::Share => EventKind::Share,
		}
	}
}

/// Platform user reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
	pub id: String,
	pub login: String,
	#[serde(default)]
	pub display: Option<String>,
}

impl UserRef {
	pub fn new(id: impl Into<String>, login: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			login: login.into(),
			display: None,
		}
	}

	pub fn with_display(mut self, display: impl Into<String>) -> Self {
		self.display = Some(display.into());
		self
	}

	/// Display name, falling back to the login.
	pub fn display_name(&self) -> &str {
		self.display
			.as_deref()
			.filter(|d| !d.trim().is_empty())
			.unwrap_or(&self.login)
	}
}

/// Source status event.
#[derive(Debug, Clone)]
pub struct SourceStatus {
	pub platform: Platform,
	pub connected: bool,
	pub detail: String,
	pub last_error: Option<String>,
	pub time: SystemTime,
}

/// Wrapper that redacts in logs.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl serde::Serialize for SecretString {
	fn serialize<S>(&self, serializer: S) -> Result<<S as serde::Serializer>::Ok, <S as serde::Serializer>::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str("")
	}
}

impl<'de> serde::Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}

/// Helper types for wiring adapters.
pub type SourceEventTx = mpsc::Sender<SourceEvent>;
pub type SourceEventRx = mpsc::Receiver<SourceEvent>;

/// A connectable audience source.
///
/// `connect` establishes one session and returns once it is up; the adapter
/// reports the end of that session with a disconnected `SourceEvent::Status`.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync + 'static {
	/// Which platform this adapter implements.
	fn platform(&self) -> Platform;

	/// Establish a session and start pumping events into `events_tx`.
	async fn connect(&self, events_tx: SourceEventTx) -> anyhow::Result<()>;

	/// Tear the current session down (deliberate shutdown).
	async fn disconnect(&self) {}
}

/// Build the bounded adapter → hub channel.
pub fn source_channel(capacity: usize) -> (SourceEventTx, SourceEventRx) {
	mpsc::channel(capacity)
}

/// Build a status event.
pub fn status(platform: Platform, connected: bool, detail: impl Into<String>) -> SourceEvent {
	SourceEvent::Status(SourceStatus {
		platform,
		connected,
		detail: detail.into(),
		last_error: None,
		time: SystemTime::now(),
	})
}

/// Build a disconnected status carrying an error.
pub fn status_error(platform: Platform, detail: impl Into<String>, err: impl fmt::Display) -> SourceEvent {
	SourceEvent::Status(SourceStatus {
		platform,
		connected: false,
		detail: detail.into(),
		last_error: Some(err.to_string()),
		time: SystemTime::now(),
	})
}

/// Generate an opaque session id.
pub fn new_session_id() -> String {
	Uuid::new_v4().to_string()
}

/// Validate basic ingest invariants.
pub fn validate_ingest_event(ev: &IngestEvent) -> anyhow::Result<()> {
	if ev.platform == Platform::System {
		return Err(anyhow!("ingest events must come from an external platform"));
	}

	if ev.author.id.trim().is_empty() || ev.author.login.trim().is_empty() {
		return Err(anyhow!("author fields must be non-empty"));
	}

	if let IngestPayload::ChatMessage { text } = &ev.payload
		&& text.trim().is_empty()
	{
		return Err(anyhow!("chat message text must be non-empty"));
	}

	if let IngestPayload::Gift { amount, .. } = &ev.payload
		&& *amount == 0
	{
		return Err(anyhow!("gift amount must be positive"));
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn user() -> UserRef {
		UserRef::new("42", "viewer")
	}

	#[test]
	fn display_name_falls_back_to_login() {
		assert_eq!(user().display_name(), "viewer");
		assert_eq!(user().with_display("Viewer").display_name(), "Viewer");
		assert_eq!(user().with_display("  ").display_name(), "viewer");
	}

	#[test]
	fn payload_kinds_match_wire_names() {
		assert_eq!(IngestPayload::Follow.kind(), EventKind::Follow);
		assert_eq!(
			IngestPayload::Gift {
				gift_name: None,
				amount: 3
			}
			.kind(),
			EventKind::Gift
		);
		assert_eq!(IngestPayload::ChatMessage { text: "x".into() }.kind(), EventKind::Chat);
	}

	#[test]
	fn validation_rejects_empty_text_and_system_origin() {
		let ev = IngestEvent::chat(Platform::Twitch, user(), RawCapabilitySignals::None, "  ");
		assert!(validate_ingest_event(&ev).is_err());

		let ev = IngestEvent::chat(Platform::System, user(), RawCapabilitySignals::None, "hi");
		assert!(validate_ingest_event(&ev).is_err());

		let ev = IngestEvent::chat(Platform::Telegram, user(), RawCapabilitySignals::None, "hi");
		assert!(validate_ingest_event(&ev).is_ok());
	}

	#[test]
	fn zero_gifts_are_rejected() {
		let ev = IngestEvent::new(
			Platform::TikTok,
			user(),
			RawCapabilitySignals::None,
			IngestPayload::Gift {
				gift_name: Some("Rose".into()),
				amount: 0,
			},
		);
		assert!(validate_ingest_event(&ev).is_err());
	}

	#[test]
	fn secret_string_is_redacted() {
		let s = SecretString::new("hunter2");
		assert_eq!(format!("{s:?}"), "SecretString(<redacted>)");
		assert_eq!(s.to_string(), "<redacted>");
		assert_eq!(s.expose(), "hunter2");
	}
}
