#![forbid(unsafe_code)]

use std::collections::{HashSet, VecDeque};

use stagehub_domain::Platform;

pub const DEFAULT_DEDUPE_WINDOW: usize = 1024;

/// Sliding window of recently seen `(platform, message id)` pairs.
#[derive(Debug)]
pub struct RecentIds {
	order: VecDeque<(Platform, String)>,
	seen: HashSet<(Platform, String)>,
	capacity: usize,
}

impl Default for RecentIds {
	fn default() -> Self {
		Self::new(DEFAULT_DEDUPE_WINDOW)
	}
}

impl RecentIds {
	pub fn new(capacity: usize) -> Self {
		Self {
			order: VecDeque::with_capacity(capacity),
			seen: HashSet::with_capacity(capacity),
			capacity: capacity.max(1),
		}
	}

	/// Record the id; `false` if it is already inside the window.
	pub fn first_seen(&mut self, platform: Platform, id: &str) -> bool {
		let key = (platform, id.to_string());
		if self.seen.contains(&key) {
			return false;
		}
		if self.order.len() == self.capacity
			&& let Some(old) = self.order.pop_front()
		{
			self.seen.remove(&old);
		}
		self.seen.insert(key.clone());
		self.order.push_back(key);
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn duplicates_inside_window_are_rejected() {
		let mut ids = RecentIds::new(2);
		assert!(ids.first_seen(Platform::Twitch, "a"));
		assert!(!ids.first_seen(Platform::Twitch, "a"));
		assert!(ids.first_seen(Platform::YouTube, "a"));

		// "twitch:a" falls out of the window.
		assert!(ids.first_seen(Platform::Twitch, "b"));
		assert!(ids.first_seen(Platform::Twitch, "a"));
	}
}
