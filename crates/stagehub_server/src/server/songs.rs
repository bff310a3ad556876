#![forbid(unsafe_code)]

use std::collections::VecDeque;

use serde::Serialize;

/// A resolved, accepted song request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
	/// `platform:userId` of whoever asked for it.
	pub requester_id: String,
	pub requester: String,
	pub title: String,
	pub video_id: String,
	pub author: String,
	#[serde(rename = "duration")]
	pub duration_secs: u32,
}

#[derive(Debug, Clone)]
struct QueuedSong {
	song: Song,
	vip: bool,
}

/// Playback queue: one `current` slot plus a waiting list where VIP
/// requests form a FIFO class ahead of everyone else.
#[derive(Debug, Default)]
pub struct SongQueue {
	current: Option<Song>,
	waiting: VecDeque<QueuedSong>,
}

/// Serialisable view used by `queue` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
	pub current: Option<Song>,
	pub queue: Vec<Song>,
}

impl SongQueue {
	/// Insert into the waiting list and return the 1-based position.
	pub fn enqueue(&mut self, song: Song, vip: bool) -> usize {
		let idx = if vip {
			self.waiting.iter().take_while(|q| q.vip).count()
		} else {
			self.waiting.len()
		};
		self.waiting.insert(idx, QueuedSong { song, vip });
		idx + 1
	}

	/// Promote the head of the waiting list to `current`.
	///
	/// An empty waiting list leaves nothing playing.
	pub fn next(&mut self) -> Option<&Song> {
		self.current = self.waiting.pop_front().map(|q| q.song);
		self.current.as_ref()
	}

	/// Drop the current song, returning it.
	pub fn skip(&mut self) -> Option<Song> {
		self.current.take()
	}

	/// Full reset of the current slot and the waiting list.
	pub fn stop(&mut self) {
		self.current = None;
		self.waiting.clear();
	}

	pub fn current(&self) -> Option<&Song> {
		self.current.as_ref()
	}

	pub fn waiting(&self) -> impl Iterator<Item = &Song> {
		self.waiting.iter().map(|q| &q.song)
	}

	pub fn waiting_len(&self) -> usize {
		self.waiting.len()
	}

	pub fn is_playing(&self) -> bool {
		self.current.is_some()
	}

	pub fn is_idle(&self) -> bool {
		self.current.is_none() && self.waiting.is_empty()
	}

	pub fn snapshot(&self) -> QueueSnapshot {
		QueueSnapshot {
			current: self.current.clone(),
			queue: self.waiting().cloned().collect(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn song(title: &str) -> Song {
		Song {
			requester_id: format!("twitch:{title}"),
			requester: title.to_string(),
			title: title.to_string(),
			video_id: "dQw4w9WgXcQ".to_string(),
			author: "artist".to_string(),
			duration_secs: 200,
		}
	}

	fn titles(q: &SongQueue) -> Vec<&str> {
		q.waiting().map(|s| s.title.as_str()).collect()
	}

	#[test]
	fn idle_queue_starts_first_song() {
		let mut q = SongQueue::default();
		assert!(q.is_idle());
		assert_eq!(q.enqueue(song("a"), false), 1);
		assert_eq!(q.next().map(|s| s.title.as_str()), Some("a"));
		assert!(titles(&q).is_empty());
		assert!(q.is_playing());
	}

	#[test]
	fn vip_songs_form_a_fifo_class_ahead_of_others() {
		let mut q = SongQueue::default();
		q.enqueue(song("n1"), false);
		q.enqueue(song("n2"), false);
		assert_eq!(q.enqueue(song("v1"), true), 1);
		assert_eq!(q.enqueue(song("v2"), true), 2);
		assert_eq!(q.enqueue(song("n3"), false), 5);
		assert_eq!(titles(&q), vec!["v1", "v2", "n1", "n2", "n3"]);
	}

	#[test]
	fn next_on_empty_clears_current() {
		let mut q = SongQueue::default();
		q.enqueue(song("a"), false);
		q.next();
		assert!(q.next().is_none());
		assert!(q.current().is_none());
		assert!(q.is_idle());
	}

	#[test]
	fn skip_keeps_waiting_list() {
		let mut q = SongQueue::default();
		q.enqueue(song("a"), false);
		q.enqueue(song("b"), false);
		q.next();
		assert_eq!(q.skip().map(|s| s.title), Some("a".to_string()));
		assert_eq!(titles(&q), vec!["b"]);
	}

	#[test]
	fn stop_resets_everything() {
		let mut q = SongQueue::default();
		q.enqueue(song("a"), false);
		q.enqueue(song("b"), true);
		q.next();
		q.stop();
		assert!(q.is_idle());
		assert_eq!(q.snapshot(), QueueSnapshot { current: None, queue: vec![] });
	}

	#[test]
	fn snapshot_serialises_for_consumers() {
		let mut q = SongQueue::default();
		q.enqueue(song("a"), false);
		q.enqueue(song("b"), false);
		q.next();
		let v = serde_json::to_value(q.snapshot()).unwrap();
		assert_eq!(v["current"]["title"], "a");
		assert_eq!(v["current"]["requesterId"], "twitch:a");
		assert_eq!(v["current"]["videoId"], "dQw4w9WgXcQ");
		assert_eq!(v["current"]["duration"], 200);
		assert_eq!(v["queue"][0]["title"], "b");
	}
}
