#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Audience event sources plus the hub itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
	Twitch,
	#[serde(rename = "youtube")]
	YouTube,
	#[serde(rename = "tiktok")]
	TikTok,
	Telegram,
	/// Messages generated by the hub (notices, status).
	System,
}

impl Platform {
	/// Every external source, in display order.
	pub const SOURCES: [Platform; 4] = [Platform::Twitch, Platform::YouTube, Platform::TikTok, Platform::Telegram];

	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			Platform::Twitch => "twitch",
			Platform::YouTube => "youtube",
			Platform::TikTok => "tiktok",
			Platform::Telegram => "telegram",
			Platform::System => "system",
		}
	}

	/// Human-readable name used in rendered status text.
	pub const fn display_name(self) -> &'static str {
		match self {
			Platform::Twitch => "Twitch",
			Platform::YouTube => "YouTube",
			Platform::TikTok => "TikTok",
			Platform::Telegram => "Telegram",
			Platform::System => "System",
		}
	}
}

impl fmt::Display for Platform {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("unknown platform: {0}")]
	UnknownPlatform(String),
	#[error("unknown event kind: {0}")]
	UnknownEventKind(String),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

impl FromStr for Platform {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"twitch" => Ok(Platform::Twitch),
			"youtube" | "you_tube" | "yt" => Ok(Platform::YouTube),
			"tiktok" | "tik_tok" | "tt" => Ok(Platform::TikTok),
			"telegram" | "tg" => Ok(Platform::Telegram),
			"system" => Ok(Platform::System),
			other => Err(ParseIdError::UnknownPlatform(other.to_string())),
		}
	}
}

/// Per-platform user identity, rendered as `platform:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserKey {
	pub platform: Platform,
	pub id: String,
}

impl UserKey {
	/// Construct a key; the id must be non-empty.
	pub fn new(platform: Platform, id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self { platform, id })
	}

	/// Parse a `platform:id` string.
	pub fn parse(s: &str) -> Result<Self, ParseIdError> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		let (platform_s, id) = s
			.split_once(':')
			.ok_or_else(|| ParseIdError::InvalidFormat("expected platform:id".into()))?;

		let platform = Platform::from_str(platform_s)?;
		Self::new(platform, id.trim().to_string())
	}
}

impl fmt::Display for UserKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.platform, self.id)
	}
}

impl FromStr for UserKey {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		UserKey::parse(s)
	}
}

/// Kind of a normalized event on the presentation channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
	#[serde(rename = "chat")]
	Chat,
	#[serde(rename = "join")]
	Join,
	#[serde(rename = "follow")]
	Follow,
	#[serde(rename = "subscribe")]
	Subscribe,
	#[serde(rename = "gift")]
	Gift,
	#[serde(rename = "like")]
	Like,
	#[serde(rename = "share")]
	Share,
	#[serde(rename = "music")]
	Music,
	#[serde(rename = "music_stop")]
	MusicStop,
	#[serde(rename = "music_pause")]
	MusicPause,
	#[serde(rename = "music_play")]
	MusicPlay,
	#[serde(rename = "queue")]
	Queue,
	#[serde(rename = "chatHistory")]
	ChatHistory,
	#[serde(rename = "liveStatus")]
	LiveStatus,
}

impl EventKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			EventKind::Chat => "chat",
			EventKind::Join => "join",
			EventKind::Follow => "follow",
			EventKind::Subscribe => "subscribe",
			EventKind::Gift => "gift",
			EventKind::Like => "like",
			EventKind::Share => "share",
			EventKind::Music => "music",
			EventKind::MusicStop => "music_stop",
			EventKind::MusicPause => "music_pause",
			EventKind::MusicPlay => "music_play",
			EventKind::Queue => "queue",
			EventKind::ChatHistory => "chatHistory",
			EventKind::LiveStatus => "liveStatus",
		}
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for EventKind {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let kind = match s.trim() {
			"" => return Err(ParseIdError::Empty),
			"chat" => EventKind::Chat,
			"join" => EventKind::Join,
			"follow" => EventKind::Follow,
			"subscribe" => EventKind::Subscribe,
			"gift" => EventKind::Gift,
			"like" => EventKind::Like,
			"share" => EventKind::Share,
			"music" => EventKind::Music,
			"music_stop" => EventKind::MusicStop,
			"music_pause" => EventKind::MusicPause,
			"music_play" => EventKind::MusicPlay,
			"queue" => EventKind::Queue,
			"chatHistory" => EventKind::ChatHistory,
			"liveStatus" => EventKind::LiveStatus,
			other => return Err(ParseIdError::UnknownEventKind(other.to_string())),
		};
		Ok(kind)
	}
}

/// Normalized permission tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
	Broadcaster,
	Moderator,
	Subscriber,
	Vip,
	Follower,
}

impl Capability {
	pub const ALL: [Capability; 5] = [
		Capability::Broadcaster,
		Capability::Moderator,
		Capability::Subscriber,
		Capability::Vip,
		Capability::Follower,
	];

	const fn bit(self) -> u8 {
		match self {
			Capability::Broadcaster => 1 << 0,
			Capability::Moderator => 1 << 1,
			Capability::Subscriber => 1 << 2,
			Capability::Vip => 1 << 3,
			Capability::Follower => 1 << 4,
		}
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Capability::Broadcaster => "broadcaster",
			Capability::Moderator => "moderator",
			Capability::Subscriber => "subscriber",
			Capability::Vip => "vip",
			Capability::Follower => "follower",
		}
	}
}

/// Set of capabilities held by an actor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u8);

impl Capabilities {
	pub const fn empty() -> Self {
		Self(0)
	}

	pub const fn with(self, cap: Capability) -> Self {
		Self(self.0 | cap.bit())
	}

	pub fn insert(&mut self, cap: Capability) {
		self.0 |= cap.bit();
	}

	/// Insert `cap` when `cond` holds.
	pub fn set_if(&mut self, cap: Capability, cond: bool) {
		if cond {
			self.insert(cap);
		}
	}

	pub const fn contains(self, cap: Capability) -> bool {
		self.0 & cap.bit() != 0
	}

	pub const fn is_empty(self) -> bool {
		self.0 == 0
	}

	/// Moderators and the broadcaster may control playback.
	pub const fn can_manage_playback(self) -> bool {
		self.contains(Capability::Moderator) || self.contains(Capability::Broadcaster)
	}

	pub fn iter(self) -> impl Iterator<Item = Capability> {
		Capability::ALL.into_iter().filter(move |c| self.contains(*c))
	}
}

impl FromIterator<Capability> for Capabilities {
	fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
		let mut caps = Capabilities::empty();
		for cap in iter {
			caps.insert(cap);
		}
		caps
	}
}

impl fmt::Debug for Capabilities {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(self.iter().map(Capability::as_str)).finish()
	}
}

impl Serialize for Capabilities {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.collect_seq(self.iter())
	}
}

impl<'de> Deserialize<'de> for Capabilities {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let caps = Vec::<Capability>::deserialize(deserializer)?;
		Ok(caps.into_iter().collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn platform_parse_and_display() {
		assert_eq!("twitch".parse::<Platform>().unwrap(), Platform::Twitch);
		assert_eq!("YT".parse::<Platform>().unwrap(), Platform::YouTube);
		assert_eq!("tg".parse::<Platform>().unwrap(), Platform::Telegram);
		assert_eq!(Platform::TikTok.to_string(), "tiktok");
		assert!("kick".parse::<Platform>().is_err());
	}

	#[test]
	fn user_key_parse_roundtrip() {
		let key = UserKey::parse("twitch:12345").unwrap();
		assert_eq!(key.platform, Platform::Twitch);
		assert_eq!(key.id, "12345");
		assert_eq!(key.to_string(), "twitch:12345");
	}

	#[test]
	fn user_key_rejects_empty_ids() {
		assert!(UserKey::new(Platform::YouTube, "  ").is_err());
		assert!(UserKey::parse("youtube").is_err());
		assert!("".parse::<UserKey>().is_err());
	}

	#[test]
	fn event_kind_wire_names() {
		assert_eq!(EventKind::ChatHistory.as_str(), "chatHistory");
		assert_eq!(EventKind::MusicStop.as_str(), "music_stop");
		assert_eq!(serde_json::to_string(&EventKind::MusicPause).unwrap(), "\"music_pause\"");
		assert_eq!("queue".parse::<EventKind>().unwrap(), EventKind::Queue);
		assert!("Chat".parse::<EventKind>().is_err());
	}

	#[test]
	fn playback_management_requires_privilege() {
		assert!(Capabilities::empty().with(Capability::Moderator).can_manage_playback());
		assert!(Capabilities::empty().with(Capability::Broadcaster).can_manage_playback());
		assert!(!Capabilities::empty().with(Capability::Vip).can_manage_playback());
		assert!(!Capabilities::empty().can_manage_playback());
	}

	proptest! {
		#[test]
		fn capability_set_contains_exactly_inserted(mask in proptest::collection::vec(any::<bool>(), 5)) {
			let chosen: Vec<Capability> = Capability::ALL
				.into_iter()
				.zip(mask.iter())
				.filter_map(|(c, on)| on.then_some(c))
				.collect();
			let caps: Capabilities = chosen.iter().copied().collect();
			for cap in Capability::ALL {
				prop_assert_eq!(caps.contains(cap), chosen.contains(&cap));
			}
			prop_assert_eq!(caps.iter().count(), chosen.len());
		}
	}
}
