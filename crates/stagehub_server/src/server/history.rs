#![forbid(unsafe_code)]

use std::collections::VecDeque;

use chrono::{Local, TimeZone};
use stagehub_protocol::{ChatEntry, NormalizedEvent};

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Bounded FIFO of recent chat lines, replayed to new consumers.
#[derive(Debug)]
pub struct ChatHistoryBuffer {
	entries: VecDeque<ChatEntry>,
	capacity: usize,
}

impl Default for ChatHistoryBuffer {
	fn default() -> Self {
		Self::new(DEFAULT_HISTORY_CAPACITY)
	}
}

impl ChatHistoryBuffer {
	pub fn new(capacity: usize) -> Self {
		Self {
			entries: VecDeque::with_capacity(capacity),
			capacity,
		}
	}

	pub fn append(&mut self, entry: ChatEntry) {
		self.entries.push_back(entry);
		while self.entries.len() > self.capacity {
			self.entries.pop_front();
		}
	}

	/// Entries in insertion order.
	pub fn snapshot(&self) -> Vec<ChatEntry> {
		self.entries.iter().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}
}

/// `HH:MM` in local time for a unix-ms timestamp.
pub fn clock_label(unix_ms: i64) -> String {
	Local
		.timestamp_millis_opt(unix_ms)
		.single()
		.map(|t| t.format("%H:%M").to_string())
		.unwrap_or_default()
}

/// The history row for a `chat` event; `None` for other kinds.
pub fn chat_entry_from_event(ev: &NormalizedEvent) -> Option<ChatEntry> {
	if !ev.is_chat() {
		return None;
	}
	let timestamp = ev.data.get("timestamp").and_then(|v| v.as_i64()).unwrap_or_default();
	Some(ChatEntry {
		platform: ev.platform,
		user_id: ev.data_str("userId").unwrap_or_default().to_string(),
		nickname: ev.data_str("nickname").unwrap_or_default().to_string(),
		text: ev.data_str("text").unwrap_or_default().to_string(),
		timestamp,
		time: ev
			.data_str("time")
			.map(str::to_string)
			.unwrap_or_else(|| clock_label(timestamp)),
	})
}
