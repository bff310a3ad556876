#![forbid(unsafe_code)]

use std::time::Duration;

use async_trait::async_trait;
use stagehub_domain::Platform;
use stagehub_platform::{
	IngestEvent, IngestPayload, IngestTrace, RawCapabilitySignals, SourceAdapter, SourceEvent, SourceEventTx, UserRef,
	new_session_id, status, validate_ingest_event,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const DEMO_USERS: [(&str, &str); 4] = [("demo-1", "Alice"), ("demo-2", "Bob"), ("demo-3", "Carol"), ("demo-4", "Dave")];

/// Synthetic source for local development.
pub struct DemoAdapter {
	platform: Platform,
	emit_interval: Duration,
	task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl DemoAdapter {
	pub fn new(platform: Platform) -> Self {
		Self {
			platform,
			emit_interval: Duration::from_secs(3),
			task: parking_lot::Mutex::new(None),
		}
	}

	#[allow(dead_code)]
	pub fn with_emit_interval(mut self, interval: Duration) -> Self {
		self.emit_interval = interval;
		self
	}

	fn make_event(platform: Platform, n: u64, session_id: &str) -> IngestEvent {
		let (id, name) = DEMO_USERS[(n as usize) % DEMO_USERS.len()];
		let author = UserRef::new(id, name.to_ascii_lowercase()).with_display(name);

		let payload = match n % 10 {
			7 => IngestPayload::Follow,
			8 => IngestPayload::Like { count: (n % 5 + 1) as u32 },
			9 if n % 20 == 19 => IngestPayload::ChatMessage {
				text: "!song lofi hip hop radio".to_string(),
			},
			_ => IngestPayload::ChatMessage {
				text: format!("demo message #{n}"),
			},
		};

		let mut ev = IngestEvent::new(platform, author, RawCapabilitySignals::None, payload);
		ev.trace = IngestTrace {
			session_id: Some(session_id.to_string()),
			local_seq: Some(n),
		};
		ev
	}
}

async fn emit_loop(platform: Platform, every: Duration, events_tx: SourceEventTx, session_id: String) {
	let mut interval = tokio::time::interval(every);
	interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
	let mut tick: u64 = 0;

	loop {
		interval.tick().await;
		tick += 1;

		let ev = DemoAdapter::make_event(platform, tick, &session_id);
		if let Err(e) = validate_ingest_event(&ev) {
			warn!(%platform, error = %e, "dropping invalid demo ingest event");
			continue;
		}
		if events_tx.try_send(SourceEvent::Ingest(Box::new(ev))).is_err() {
			if events_tx.is_closed() {
				debug!(%platform, "hub channel closed; demo source exiting");
				return;
			}
			warn!(%platform, "demo source channel full; dropping ingest event");
		}
	}
}

#[async_trait]
impl SourceAdapter for DemoAdapter {
	fn platform(&self) -> Platform {
		self.platform
	}

	async fn connect(&self, events_tx: SourceEventTx) -> anyhow::Result<()> {
		let platform = self.platform;
		let session_id = new_session_id();
		let _ = events_tx.try_send(status(
			platform,
			true,
			format!("demo source online (session_id={session_id})"),
		));

		info!(%platform, %session_id, interval_ms = self.emit_interval.as_millis() as u64, "demo source started");
		let task = tokio::spawn(emit_loop(platform, self.emit_interval, events_tx, session_id));
		if let Some(previous) = self.task.lock().replace(task) {
			previous.abort();
		}
		Ok(())
	}

	async fn disconnect(&self) {
		if let Some(task) = self.task.lock().take() {
			task.abort();
			info!(platform = %self.platform, "demo source stopped");
		}
	}
}

#[cfg(test)]
mod tests {
	use stagehub_platform::source_channel;

	use super::*;

	#[test]
	fn event_mix_includes_song_requests() {
		let kinds: Vec<IngestPayload> = (1..=20)
			.map(|n| DemoAdapter::make_event(Platform::Twitch, n, "s").payload)
			.collect();
		assert!(kinds.contains(&IngestPayload::Follow));
		assert!(kinds.iter().any(|p| matches!(p, IngestPayload::Like { .. })));
		assert!(kinds.iter().any(
			|p| matches!(p, IngestPayload::ChatMessage { text } if text.starts_with("!song "))
		));
		for n in 1..=40 {
			assert!(validate_ingest_event(&DemoAdapter::make_event(Platform::YouTube, n, "s")).is_ok());
		}
	}

	#[tokio::test(start_paused = true)]
	async fn emits_until_disconnected() {
		let adapter = DemoAdapter::new(Platform::TikTok).with_emit_interval(Duration::from_millis(10));
		let (tx, mut rx) = source_channel(64);
		adapter.connect(tx).await.unwrap();

		assert!(matches!(rx.recv().await, Some(SourceEvent::Status(s)) if s.connected));
		for _ in 0..3 {
			let Some(SourceEvent::Ingest(ev)) = rx.recv().await else {
				panic!("expected ingest");
			};
			assert_eq!(ev.platform, Platform::TikTok);
		}

		adapter.disconnect().await;
		while rx.recv().await.is_some() {}
	}
}
