#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Exponential backoff: `min(base * factor^(attempt-1), max)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub factor: f64,
}

impl Default for BackoffPolicy {
	fn default() -> Self {
		Self {
			base_delay: Duration::from_millis(30_000),
			max_delay: Duration::from_millis(300_000),
			factor: 1.5,
		}
	}
}

impl BackoffPolicy {
	/// Delay before retry number `attempt` (1-based; 0 is treated as 1).
	pub fn delay_for(&self, attempt: u32) -> Duration {
		let exp = attempt.max(1).saturating_sub(1).min(1024) as i32;
		let factor = if self.factor.is_finite() { self.factor.max(1.0) } else { 1.0 };
		let max_ms = self.max_delay.as_millis() as f64;
		let ms = (self.base_delay.as_millis() as f64 * factor.powi(exp)).min(max_ms);
		Duration::from_millis(ms.round() as u64)
	}
}

/// Where a key sits in the retry cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPhase {
	#[default]
	Idle,
	/// A timer is outstanding.
	Scheduled,
	/// The reconnect future is running.
	Attempting,
}

#[derive(Debug, Default)]
struct RetryState {
	phase: RetryPhase,
	attempt_count: u32,
	generation: u64,
	/// A schedule request arrived while attempting; honoured if the attempt succeeds.
	rerun_requested: bool,
	task: Option<JoinHandle<()>>,
}

type Slots = Arc<Mutex<HashMap<String, RetryState>>>;

/// Per-key reconnect scheduler. At most one retry task exists per key.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSupervisor {
	slots: Slots,
}

impl ConnectionSupervisor {
	pub fn new() -> Self {
		Self::default()
	}

	/// Schedule `reconnect` for `key` after the next backoff delay.
	///
	/// Returns `false` (and does nothing) when a retry for `key` is already
	/// scheduled or running.
	pub fn schedule<F, Fut>(&self, key: impl Into<String>, reconnect: F, policy: BackoffPolicy) -> bool
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
	{
		let key = key.into();
		let mut slots = self.slots.lock();
		let state = slots.entry(key.clone()).or_default();

		match state.phase {
			RetryPhase::Scheduled => {
				debug!(%key, "reconnect already scheduled; ignoring");
				return false;
			}
			RetryPhase::Attempting => {
				state.rerun_requested = true;
				debug!(%key, "reconnect attempt in flight; ignoring");
				return false;
			}
			RetryPhase::Idle => {}
		}

		state.attempt_count = state.attempt_count.saturating_add(1);
		state.phase = RetryPhase::Scheduled;
		state.rerun_requested = false;
		let delay = policy.delay_for(state.attempt_count);
		info!(
			%key,
			attempt = state.attempt_count,
			delay_ms = delay.as_millis() as u64,
			"scheduling reconnect"
		);

		let task = tokio::spawn(drive(
			self.slots.clone(),
			key,
			state.generation,
			delay,
			reconnect,
			policy,
		));
		state.task = Some(task);
		true
	}

	/// Cancel any outstanding retry for `key` and reset its attempt count.
	pub fn clear(&self, key: &str) {
		let mut slots = self.slots.lock();
		if let Some(state) = slots.get_mut(key) {
			if let Some(task) = state.task.take() {
				task.abort();
			}
			state.generation = state.generation.wrapping_add(1);
			state.phase = RetryPhase::Idle;
			state.attempt_count = 0;
			state.rerun_requested = false;
			debug!(%key, "reconnect state cleared");
		}
	}

	/// `clear` for every known key.
	pub fn clear_all(&self) {
		let keys: Vec<String> = self.slots.lock().keys().cloned().collect();
		for key in keys {
			self.clear(&key);
		}
	}

	pub fn attempt_count(&self, key: &str) -> u32 {
		self.slots.lock().get(key).map(|s| s.attempt_count).unwrap_or(0)
	}

	pub fn phase(&self, key: &str) -> RetryPhase {
		self.slots.lock().get(key).map(|s| s.phase).unwrap_or_default()
	}

	/// Whether a retry for `key` is scheduled or running.
	#[allow(dead_code)]
	pub fn is_pending(&self, key: &str) -> bool {
		self.phase(key) != RetryPhase::Idle
	}
}

async fn drive<F, Fut>(slots: Slots, key: String, generation: u64, mut delay: Duration, reconnect: F, policy: BackoffPolicy)
where
	F: Fn() -> Fut + Send + Sync + 'static,
	Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
	loop {
		tokio::time::sleep(delay).await;

		let attempt = {
			let mut slots = slots.lock();
			let Some(state) = slots.get_mut(&key) else {
				return;
			};
			if state.generation != generation {
				return;
			}
			state.phase = RetryPhase::Attempting;
			state.attempt_count
		};

		metrics::counter!("stagehub_reconnect_attempts_total").increment(1);
		let result = reconnect().await;

		let mut guard = slots.lock();
		let Some(state) = guard.get_mut(&key) else {
			return;
		};
		if state.generation != generation {
			return;
		}

		match result {
			Ok(()) => {
				info!(%key, attempt, "reconnected");
				state.attempt_count = 0;
				if state.rerun_requested {
					// The fresh session already dropped; start a new cycle.
					state.rerun_requested = false;
					state.attempt_count = 1;
					state.phase = RetryPhase::Scheduled;
					delay = policy.delay_for(1);
					info!(%key, delay_ms = delay.as_millis() as u64, "session lost during reconnect; rescheduling");
					continue;
				}
				state.phase = RetryPhase::Idle;
				state.task = None;
				return;
			}
			Err(e) => {
				state.attempt_count = state.attempt_count.saturating_add(1);
				state.phase = RetryPhase::Scheduled;
				state.rerun_requested = false;
				delay = policy.delay_for(state.attempt_count);
				warn!(
					%key,
					attempt,
					next_attempt = state.attempt_count,
					delay_ms = delay.as_millis() as u64,
					error = %e,
					"reconnect failed; retrying"
				);
			}
		}
	}
}
