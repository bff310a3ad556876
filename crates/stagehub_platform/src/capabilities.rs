#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use stagehub_domain::{Capabilities, Capability, Platform};

use crate::IngestEvent;

/// Telegram chat member status as reported by the Bot API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelegramMemberStatus {
	Creator,
	Administrator,
	#[default]
	Member,
	Restricted,
	Left,
	Kicked,
}

/// Role signals in each source's native vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RawCapabilitySignals {
	/// IRC tags. Follower status is not available through chat.
	Twitch {
		#[serde(default)]
		badges: Vec<String>,
		#[serde(default)]
		is_mod: bool,
		#[serde(default)]
		is_subscriber: bool,
		#[serde(default)]
		broadcaster_id: Option<String>,
	},

	/// Live chat `authorDetails`.
	#[serde(rename = "youtube")]
	YouTube {
		#[serde(default)]
		is_owner: bool,
		#[serde(default)]
		is_moderator: bool,
		#[serde(default)]
		is_sponsor: bool,
	},

	/// Event-socket user attributes.
	#[serde(rename = "tiktok")]
	TikTok {
		#[serde(default)]
		is_host: bool,
		#[serde(default)]
		is_moderator: bool,
		#[serde(default)]
		is_subscriber: bool,
		/// 0 = none, 1 = follower, 2 = friend.
		#[serde(default)]
		follow_role: u8,
	},

	Telegram {
		#[serde(default)]
		member_status: TelegramMemberStatus,
	},

	#[default]
	None,
}

/// Map raw signals to the common capability set.
///
/// `user_id` is the author's platform id, needed for broadcaster identity
/// matching on sources that only expose the channel owner's id.
pub fn resolve_capabilities(signals: &RawCapabilitySignals, user_id: &str) -> Capabilities {
	let mut caps = Capabilities::empty();

	match signals {
		RawCapabilitySignals::Twitch {
			badges,
			is_mod,
			is_subscriber,
			broadcaster_id,
		} => {
			let has = |name: &str| badges.iter().any(|b| b.split('/').next() == Some(name));
			let is_owner = has("broadcaster") || broadcaster_id.as_deref().is_some_and(|id| !id.is_empty() && id == user_id);
			caps.set_if(Capability::Broadcaster, is_owner);
			caps.set_if(Capability::Moderator, *is_mod || has("moderator"));
			caps.set_if(Capability::Subscriber, *is_subscriber || has("subscriber") || has("founder"));
			caps.set_if(Capability::Vip, has("vip"));
		}
		RawCapabilitySignals::YouTube {
			is_owner,
			is_moderator,
			is_sponsor,
		} => {
			caps.set_if(Capability::Broadcaster, *is_owner);
			caps.set_if(Capability::Moderator, *is_moderator);
			caps.set_if(Capability::Subscriber, *is_sponsor);
		}
		RawCapabilitySignals::TikTok {
			is_host,
			is_moderator,
			is_subscriber,
			follow_role,
		} => {
			caps.set_if(Capability::Broadcaster, *is_host);
			caps.set_if(Capability::Moderator, *is_moderator);
			caps.set_if(Capability::Subscriber, *is_subscriber);
			caps.set_if(Capability::Follower, *follow_role >= 1);
		}
		RawCapabilitySignals::Telegram { member_status } => match member_status {
			TelegramMemberStatus::Creator => caps.insert(Capability::Broadcaster),
			TelegramMemberStatus::Administrator => caps.insert(Capability::Moderator),
			_ => {}
		},
		RawCapabilitySignals::None => {}
	}

	caps
}

/// Ephemeral, per-event view of who did something.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
	pub platform: Platform,
	pub user_id: String,
	pub login: String,
	pub display_name: String,
	pub capabilities: Capabilities,
}

impl Actor {
	pub fn from_ingest(ev: &IngestEvent) -> Self {
		Self {
			platform: ev.platform,
			user_id: ev.author.id.clone(),
			login: ev.author.login.clone(),
			display_name: ev.author.display_name().to_string(),
			capabilities: resolve_capabilities(&ev.signals, &ev.author.id),
		}
	}

	/// `platform:userId`, the identity stored on requested songs.
	pub fn requester_id(&self) -> String {
		format!("{}:{}", self.platform, self.user_id)
	}

	/// `platform:login`, the identity used by the cooldown ledger and VIP list.
	pub fn login_key(&self) -> String {
		format!("{}:{}", self.platform, self.login.to_lowercase())
	}

	pub fn can_manage_playback(&self) -> bool {
		self.capabilities.can_manage_playback()
	}
}

/// Whether `actor` may skip the track requested by `current_requester_id`.
///
/// Nothing playing means nothing to skip, for everyone.
pub fn can_skip_current_song(actor: &Actor, current_requester_id: Option<&str>) -> bool {
	match current_requester_id {
		None => false,
		Some(requester) => actor.can_manage_playback() || requester == actor.requester_id(),
	}
}
