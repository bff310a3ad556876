#![forbid(unsafe_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use stagehub_protocol::{ChatEntry, NormalizedEvent};
use tokio::sync::mpsc;
use tracing::debug;

use crate::server::history::{ChatHistoryBuffer, DEFAULT_HISTORY_CAPACITY, chat_entry_from_event};

/// Fan-out of normalized events to every attached consumer.
///
/// Chat history lives under the same lock as the subscriber list, so a new
/// consumer always sees its history snapshot before any later event.
#[derive(Debug, Clone)]
pub struct Broadcaster {
	inner: Arc<Mutex<Inner>>,
	cfg: BroadcasterConfig,
}

/// Configuration for `Broadcaster`.
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
	/// Maximum number of queued items per consumer.
	pub consumer_queue_capacity: usize,

	pub history_capacity: usize,

	pub debug_logs: bool,
}

impl Default for BroadcasterConfig {
	fn default() -> Self {
		Self {
			consumer_queue_capacity: 1024,
			history_capacity: DEFAULT_HISTORY_CAPACITY,
			debug_logs: false,
		}
	}
}

/// Items emitted on a consumer stream.
#[derive(Debug, Clone)]
pub enum BroadcastItem {
	/// Sent exactly once, first.
	History(Arc<Vec<ChatEntry>>),

	Event(Arc<NormalizedEvent>),

	/// The consumer fell behind and items were dropped.
	Lagged { dropped: u64 },
}

#[derive(Debug)]
struct Inner {
	history: ChatHistoryBuffer,
	consumers: Vec<mpsc::Sender<BroadcastItem>>,

	/// Pending lag markers per consumer.
	pending_lag: Vec<u64>,
}

impl Broadcaster {
	pub fn new(cfg: BroadcasterConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner {
				history: ChatHistoryBuffer::new(cfg.history_capacity),
				consumers: Vec::new(),
				pending_lag: Vec::new(),
			})),
			cfg,
		}
	}

	/// Attach a consumer. The first item on the returned stream is the history snapshot.
	pub fn attach(&self) -> mpsc::Receiver<BroadcastItem> {
		let (tx, rx) = mpsc::channel(self.cfg.consumer_queue_capacity.max(1) + 1);

		let mut inner = self.inner.lock();
		let snapshot = Arc::new(inner.history.snapshot());
		let _ = tx.try_send(BroadcastItem::History(snapshot));

		prune_closed_consumers(&mut inner);
		inner.consumers.push(tx);
		inner.pending_lag.push(0);
		let count = inner.consumers.len();
		metrics::gauge!("stagehub_consumers").set(count as f64);

		if self.cfg.debug_logs {
			debug!(consumers = count, "broadcaster: consumer attached");
		}

		rx
	}

	/// Emit an event to every consumer; chat events are also recorded in history.
	pub fn publish(&self, event: NormalizedEvent) {
		let mut inner = self.inner.lock();

		if let Some(entry) = chat_entry_from_event(&event) {
			inner.history.append(entry);
		}

		prune_closed_consumers(&mut inner);
		if inner.consumers.is_empty() {
			return;
		}

		let item = BroadcastItem::Event(Arc::new(event));
		let mut dropped_total: u64 = 0;

		let Inner {
			consumers, pending_lag, ..
		} = &mut *inner;

		for (idx, consumer) in consumers.iter().enumerate() {
			match consumer.try_send(item.clone()) {
				Ok(()) => {
					if let Some(pending) = pending_lag.get_mut(idx)
						&& *pending > 0 && consumer.try_send(BroadcastItem::Lagged { dropped: *pending }).is_ok()
					{
						*pending = 0;
					}
				}
				Err(mpsc::error::TrySendError::Full(_)) => {
					dropped_total += 1;

					if let Some(pending) = pending_lag.get_mut(idx) {
						*pending = pending.saturating_add(1);
					}
				}
				Err(mpsc::error::TrySendError::Closed(_)) => {}
			}
		}

		if dropped_total > 0 {
			metrics::counter!("stagehub_broadcast_dropped_total").increment(dropped_total);
			if self.cfg.debug_logs {
				debug!(dropped = dropped_total, "broadcaster: dropped due to full consumer queues");
			}
		}
	}

	#[allow(dead_code)]
	pub fn history_snapshot(&self) -> Vec<ChatEntry> {
		self.inner.lock().history.snapshot()
	}

	/// Number of live consumers.
	pub fn consumer_count(&self) -> usize {
		self.inner.lock().consumers.iter().filter(|c| !c.is_closed()).count()
	}

	/// Drop bookkeeping for consumers that went away.
	pub fn prune(&self) {
		let mut inner = self.inner.lock();
		prune_closed_consumers(&mut inner);
		metrics::gauge!("stagehub_consumers").set(inner.consumers.len() as f64);
	}
}

fn prune_closed_consumers(inner: &mut Inner) {
	if inner.consumers.len() != inner.pending_lag.len() {
		inner.pending_lag.resize(inner.consumers.len(), 0);
	}

	let mut kept = Vec::with_capacity(inner.consumers.len());
	let mut kept_lag = Vec::with_capacity(inner.consumers.len());

	for (idx, c) in inner.consumers.drain(..).enumerate() {
		if !c.is_closed() {
			kept.push(c);
			kept_lag.push(*inner.pending_lag.get(idx).unwrap_or(&0));
		}
	}

	inner.consumers = kept;
	inner.pending_lag = kept_lag;
}
