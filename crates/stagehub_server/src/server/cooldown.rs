#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use stagehub_domain::{Capabilities, Capability, UserKey};
use stagehub_platform::Actor;
use tracing::warn;

/// Rate-limit class derived from capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownTier {
	Privileged,
	Subscriber,
	Follower,
	Viewer,
}

impl CooldownTier {
	pub fn of(caps: Capabilities) -> Self {
		if caps.can_manage_playback() {
			Self::Privileged
		} else if caps.contains(Capability::Subscriber) {
			Self::Subscriber
		} else if caps.contains(Capability::Follower) {
			Self::Follower
		} else {
			Self::Viewer
		}
	}
}

/// Song-request cooldown per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
	pub interval: Duration,
}

impl Default for CooldownPolicy {
	fn default() -> Self {
		Self {
			interval: Duration::from_secs(60),
		}
	}
}

impl CooldownPolicy {
	pub fn cooldown_for(&self, caps: Capabilities) -> Duration {
		match CooldownTier::of(caps) {
			CooldownTier::Privileged => Duration::ZERO,
			// Non-privileged tiers share one interval.
			CooldownTier::Subscriber | CooldownTier::Follower | CooldownTier::Viewer => self.interval,
		}
	}
}

/// Last accepted song request per `platform:login`.
#[derive(Debug, Default)]
pub struct CooldownLedger {
	last_request_ms: HashMap<String, i64>,
}

impl CooldownLedger {
	/// Time left before `key` may request again, if any.
	pub fn remaining(&self, key: &str, cooldown: Duration, now_ms: i64) -> Option<Duration> {
		let last = *self.last_request_ms.get(key)?;
		let cooldown_ms = i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX);
		let elapsed = now_ms.saturating_sub(last).max(0);
		(elapsed < cooldown_ms).then(|| Duration::from_millis((cooldown_ms - elapsed) as u64))
	}

	pub fn record(&mut self, key: impl Into<String>, now_ms: i64) {
		self.last_request_ms.insert(key.into(), now_ms);
	}

	pub fn clear(&mut self) {
		self.last_request_ms.clear();
	}

	pub fn len(&self) -> usize {
		self.last_request_ms.len()
	}

	pub fn is_empty(&self) -> bool {
		self.last_request_ms.is_empty()
	}
}

/// Render a wait as `N сек`, or `N мин` from one minute up. Rounds up.
pub fn format_wait(remaining: Duration) -> String {
	let secs = remaining.as_millis().div_ceil(1000).max(1);
	if secs >= 60 {
		format!("{} мин", secs.div_ceil(60))
	} else {
		format!("{secs} сек")
	}
}

/// Curated cooldown bypass list, independent of platform VIP badges.
#[derive(Debug, Clone, Default)]
pub struct VipList {
	users: HashSet<String>,
}

impl VipList {
	/// Build from `platform:login` entries; malformed entries are skipped.
	pub fn from_entries<I, S>(entries: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let mut users = HashSet::new();
		for raw in entries {
			let raw = raw.as_ref().trim();
			if raw.is_empty() {
				continue;
			}
			match UserKey::parse(raw) {
				Ok(key) => {
					users.insert(format!("{}:{}", key.platform, key.id.to_lowercase()));
				}
				Err(e) => warn!(entry = %raw, error = %e, "ignoring malformed vip entry"),
			}
		}
		Self { users }
	}

	pub fn contains(&self, actor: &Actor) -> bool {
		self.users.contains(&actor.login_key())
	}

	pub fn len(&self) -> usize {
		self.users.len()
	}

	pub fn is_empty(&self) -> bool {
		self.users.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use stagehub_domain::Platform;

	use super::*;

	fn actor(platform: Platform, login: &str) -> Actor {
		Actor {
			platform,
			user_id: format!("id-{login}"),
			login: login.to_string(),
			display_name: login.to_string(),
			capabilities: Capabilities::empty(),
		}
	}

	#[test]
	fn privileged_tiers_have_no_cooldown() {
		let policy = CooldownPolicy::default();
		let moderator = Capabilities::empty().with(Capability::Moderator);
		let owner = Capabilities::empty().with(Capability::Broadcaster);
		assert_eq!(policy.cooldown_for(moderator), Duration::ZERO);
		assert_eq!(policy.cooldown_for(owner), Duration::ZERO);
	}

	#[test]
	fn non_privileged_tiers_share_the_interval() {
		let policy = CooldownPolicy::default();
		let sub = Capabilities::empty().with(Capability::Subscriber);
		let follower = Capabilities::empty().with(Capability::Follower);
		let vip_badge = Capabilities::empty().with(Capability::Vip);
		for caps in [sub, follower, vip_badge, Capabilities::empty()] {
			assert_eq!(policy.cooldown_for(caps), Duration::from_secs(60));
		}
		assert_eq!(CooldownTier::of(sub), CooldownTier::Subscriber);
		assert_eq!(CooldownTier::of(follower), CooldownTier::Follower);
	}

	#[test]
	fn ledger_reports_remaining_time() {
		let mut ledger = CooldownLedger::default();
		let cd = Duration::from_secs(60);
		assert_eq!(ledger.remaining("twitch:bob", cd, 0), None);

		ledger.record("twitch:bob", 0);
		assert_eq!(ledger.remaining("twitch:bob", cd, 1_000), Some(Duration::from_secs(59)));
		assert_eq!(ledger.remaining("twitch:bob", cd, 60_000), None);
		assert_eq!(ledger.remaining("twitch:bob", Duration::ZERO, 1), None);
		assert_eq!(ledger.remaining("youtube:bob", cd, 1_000), None);

		ledger.clear();
		assert!(ledger.is_empty());
	}

	#[test]
	fn wait_text_rounds_up() {
		assert_eq!(format_wait(Duration::from_secs(59)), "59 сек");
		assert_eq!(format_wait(Duration::from_millis(58_001)), "59 сек");
		assert_eq!(format_wait(Duration::from_millis(1)), "1 сек");
		assert_eq!(format_wait(Duration::from_secs(60)), "1 мин");
		assert_eq!(format_wait(Duration::from_secs(61)), "2 мин");
		assert_eq!(format_wait(Duration::from_secs(300)), "5 мин");
	}

	#[test]
	fn vip_list_matches_platform_and_login_case_insensitively() {
		let vips = VipList::from_entries(["twitch:DJ_Friend", "bogus", "", "youtube:Someone"]);
		assert_eq!(vips.len(), 2);
		assert!(vips.contains(&actor(Platform::Twitch, "dj_friend")));
		assert!(vips.contains(&actor(Platform::Twitch, "DJ_FRIEND")));
		assert!(!vips.contains(&actor(Platform::TikTok, "dj_friend")));
		assert!(vips.contains(&actor(Platform::YouTube, "someone")));
	}
}
