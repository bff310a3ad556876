#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use stagehub_domain::{EventKind, Platform};
use stagehub_protocol::NormalizedEvent;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tracing::{debug, info, warn};

use crate::server::broadcaster::Broadcaster;

#[derive(Debug, Error)]
pub enum AnnounceError {
	/// The remembered message was deleted on the surface.
	#[error("announcement message no longer exists")]
	MessageGone,

	#[error(transparent)]
	Other(#[from] anyhow::Error),
}

/// Externally rendered status message that can be created once and edited in place.
#[async_trait]
pub trait AnnouncementSurface: Send + Sync {
	/// Post a new message and return its identifier.
	async fn create(&self, text: &str) -> Result<String, AnnounceError>;

	async fn edit(&self, message_id: &str, text: &str) -> Result<(), AnnounceError>;
}

/// Liveness check for a source without an adapter-reported flag.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
	async fn is_live(&self) -> anyhow::Result<bool>;
}

/// Upload throughput sample in Mbit/s.
#[async_trait]
pub trait ThroughputProbe: Send + Sync {
	async fn sample_mbps(&self) -> anyhow::Result<f64>;
}

/// A value refreshed at most once per `ttl`.
#[derive(Debug)]
pub struct SampleCache<T> {
	slot: Mutex<Option<(T, Instant)>>,
	ttl: Duration,
}

impl<T: Clone> SampleCache<T> {
	pub fn new(ttl: Duration) -> Self {
		Self {
			slot: Mutex::new(None),
			ttl,
		}
	}

	pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> T
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = T>,
	{
		let mut slot = self.slot.lock().await;
		if let Some((value, taken_at)) = slot.as_ref()
			&& taken_at.elapsed() < self.ttl
		{
			return value.clone();
		}
		let value = refresh().await;
		*slot = Some((value.clone(), Instant::now()));
		value
	}
}

#[derive(Debug, Clone)]
pub struct LiveStatusConfig {
	pub twitch_cache_ttl: Duration,
	pub throughput_cache_ttl: Duration,
	pub probe_timeout: Duration,
}

impl Default for LiveStatusConfig {
	fn default() -> Self {
		Self {
			twitch_cache_ttl: Duration::from_secs(60),
			throughput_cache_ttl: Duration::from_secs(300),
			probe_timeout: Duration::from_secs(15),
		}
	}
}

/// What the status block shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveStatusSnapshot {
	pub twitch: bool,
	pub youtube: bool,
	pub tiktok: bool,
	#[serde(rename = "throughputMbps")]
	pub throughput_mbps: Option<f64>,
}

/// Combines per-source liveness and a throughput sample into one announcement
/// that is created once and then edited in place.
pub struct LiveStatusAggregator {
	cfg: LiveStatusConfig,
	surface: Arc<dyn AnnouncementSurface>,
	twitch_probe: Option<Arc<dyn LivenessProbe>>,
	throughput_probe: Option<Arc<dyn ThroughputProbe>>,
	flags: parking_lot::Mutex<BTreeMap<Platform, bool>>,
	twitch_cache: SampleCache<Option<bool>>,
	throughput_cache: SampleCache<Option<f64>>,
	/// Held for the whole refresh, which serialises updates.
	announcement_id: Mutex<Option<String>>,
	broadcaster: Option<Broadcaster>,
}

impl LiveStatusAggregator {
	pub fn new(cfg: LiveStatusConfig, surface: Arc<dyn AnnouncementSurface>) -> Self {
		Self {
			twitch_cache: SampleCache::new(cfg.twitch_cache_ttl),
			throughput_cache: SampleCache::new(cfg.throughput_cache_ttl),
			cfg,
			surface,
			twitch_probe: None,
			throughput_probe: None,
			flags: parking_lot::Mutex::new(BTreeMap::new()),
			announcement_id: Mutex::new(None),
			broadcaster: None,
		}
	}

	pub fn with_twitch_probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
		self.twitch_probe = Some(probe);
		self
	}

	pub fn with_throughput_probe(mut self, probe: Arc<dyn ThroughputProbe>) -> Self {
		self.throughput_probe = Some(probe);
		self
	}

	/// Also push each refresh to presentation consumers.
	pub fn with_broadcaster(mut self, broadcaster: Broadcaster) -> Self {
		self.broadcaster = Some(broadcaster);
		self
	}

	/// Record an adapter-reported liveness flag without refreshing.
	pub fn record_platform_status(&self, platform: Platform, live: bool) -> bool {
		let changed = self.flags.lock().insert(platform, live) != Some(live);
		debug!(%platform, live, changed, "live status: platform flag updated");
		changed
	}

	pub async fn snapshot(&self) -> LiveStatusSnapshot {
		let (youtube, tiktok) = {
			let flags = self.flags.lock();
			(
				flags.get(&Platform::YouTube).copied().unwrap_or(false),
				flags.get(&Platform::TikTok).copied().unwrap_or(false),
			)
		};

		let twitch = match &self.twitch_probe {
			Some(probe) => self
				.twitch_cache
				.get_or_refresh(|| async {
					match timeout(self.cfg.probe_timeout, probe.is_live()).await {
						Ok(Ok(live)) => Some(live),
						Ok(Err(e)) => {
							warn!(error = %e, "twitch liveness probe failed");
							None
						}
						Err(_) => {
							warn!("twitch liveness probe timed out");
							None
						}
					}
				})
				.await
				.unwrap_or(false),
			None => false,
		};

		let throughput_mbps = match &self.throughput_probe {
			Some(probe) => {
				self.throughput_cache
					.get_or_refresh(|| async {
						match timeout(self.cfg.probe_timeout, probe.sample_mbps()).await {
							Ok(Ok(mbps)) => Some(mbps),
							Ok(Err(e)) => {
								warn!(error = %e, "throughput probe failed");
								None
							}
							Err(_) => {
								warn!("throughput probe timed out");
								None
							}
						}
					})
					.await
			}
			None => None,
		};

		LiveStatusSnapshot {
			twitch,
			youtube,
			tiktok,
			throughput_mbps,
		}
	}

	/// Recompute and write the announcement. Errors are logged and returned.
	pub async fn refresh(&self) -> Result<(), AnnounceError> {
		let mut announcement_id = self.announcement_id.lock().await;
		let snap = self.snapshot().await;

		if let Some(broadcaster) = &self.broadcaster {
			match serde_json::to_value(&snap) {
				Ok(data) => broadcaster.publish(NormalizedEvent::from_value(EventKind::LiveStatus, Platform::System, data)),
				Err(e) => warn!(error = %e, "failed to encode live status event"),
			}
		}

		let text = render_status(&snap);
		let result = match announcement_id.clone() {
			Some(id) => match self.surface.edit(&id, &text).await {
				Err(AnnounceError::MessageGone) => {
					warn!(message_id = %id, "announcement message gone; will re-create next cycle");
					*announcement_id = None;
					Err(AnnounceError::MessageGone)
				}
				other => other,
			},
			None => match self.surface.create(&text).await {
				Ok(id) => {
					info!(message_id = %id, "announcement message created");
					*announcement_id = Some(id);
					Ok(())
				}
				Err(e) => Err(e),
			},
		};

		match &result {
			Ok(()) => metrics::counter!("stagehub_live_status_updates_total").increment(1),
			Err(e) => {
				metrics::counter!("stagehub_live_status_failures_total").increment(1);
				warn!(error = %e, "live status update failed");
			}
		}
		result
	}

	pub async fn announcement_id(&self) -> Option<String> {
		self.announcement_id.lock().await.clone()
	}

	/// Refresh on a fixed interval until the task is aborted.
	pub fn spawn_timer(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(every);
			interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
			loop {
				interval.tick().await;
				let _ = self.refresh().await;
			}
		})
	}
}

fn glyph(live: bool) -> &'static str {
	if live { "🟢" } else { "🔴" }
}

/// Text of the status block.
pub fn render_status(snap: &LiveStatusSnapshot) -> String {
	let throughput = snap
		.throughput_mbps
		.map(|mbps| format!("{mbps:.1} Мбит/с"))
		.unwrap_or_else(|| "—".to_string());

	format!(
		"📡 Статус трансляции\n\
		 {} Twitch\n\
		 {} YouTube\n\
		 {} TikTok\n\
		 📶 Канал: {throughput}",
		glyph(snap.twitch),
		glyph(snap.youtube),
		glyph(snap.tiktok),
	)
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicU32, Ordering};

	use anyhow::anyhow;

	use super::*;

	#[derive(Default)]
	struct RecordingSurface {
		creates: AtomicU32,
		edits: parking_lot::Mutex<Vec<(String, String)>>,
		gone_once: parking_lot::Mutex<bool>,
		fail_creates: bool,
	}

	#[async_trait]
	impl AnnouncementSurface for RecordingSurface {
		async fn create(&self, _text: &str) -> Result<String, AnnounceError> {
			if self.fail_creates {
				return Err(AnnounceError::Other(anyhow!("surface unavailable")));
			}
			// Yield so concurrent refreshes would interleave if unserialised.
			tokio::task::yield_now().await;
			let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
			Ok(format!("msg-{n}"))
		}

		async fn edit(&self, message_id: &str, text: &str) -> Result<(), AnnounceError> {
			let mut gone = self.gone_once.lock();
			if *gone {
				*gone = false;
				return Err(AnnounceError::MessageGone);
			}
			self.edits.lock().push((message_id.to_string(), text.to_string()));
			Ok(())
		}
	}

	struct CountingProbe {
		calls: AtomicU32,
		live: bool,
	}

	#[async_trait]
	impl LivenessProbe for CountingProbe {
		async fn is_live(&self) -> anyhow::Result<bool> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			Ok(self.live)
		}
	}

	struct FailingThroughput;

	#[async_trait]
	impl ThroughputProbe for FailingThroughput {
		async fn sample_mbps(&self) -> anyhow::Result<f64> {
			Err(anyhow!("upload refused"))
		}
	}

	struct SlowThroughput;

	#[async_trait]
	impl ThroughputProbe for SlowThroughput {
		async fn sample_mbps(&self) -> anyhow::Result<f64> {
			tokio::time::sleep(Duration::from_secs(3600)).await;
			Ok(100.0)
		}
	}

	#[tokio::test]
	async fn creates_once_then_edits_in_place() {
		let surface = Arc::new(RecordingSurface::default());
		let agg = LiveStatusAggregator::new(LiveStatusConfig::default(), surface.clone());

		agg.refresh().await.unwrap();
		agg.record_platform_status(Platform::YouTube, true);
		let _ = agg.refresh().await;
		agg.record_platform_status(Platform::TikTok, true);
		let _ = agg.refresh().await;

		assert_eq!(surface.creates.load(Ordering::SeqCst), 1);
		let edits = surface.edits.lock().clone();
		assert_eq!(edits.len(), 2);
		assert!(edits.iter().all(|(id, _)| id == "msg-1"));
		assert!(edits[1].1.contains("🟢 TikTok"));
		assert_eq!(agg.announcement_id().await.as_deref(), Some("msg-1"));
	}

	#[tokio::test]
	async fn concurrent_refreshes_create_a_single_message() {
		let surface = Arc::new(RecordingSurface::default());
		let agg = Arc::new(LiveStatusAggregator::new(LiveStatusConfig::default(), surface.clone()));

		let tasks: Vec<_> = (0..8)
			.map(|_| {
				let agg = agg.clone();
				tokio::spawn(async move { agg.refresh().await })
			})
			.collect();
		for t in tasks {
			t.await.unwrap().unwrap();
		}

		assert_eq!(surface.creates.load(Ordering::SeqCst), 1);
		assert_eq!(surface.edits.lock().len(), 7);
	}

	#[tokio::test]
	async fn vanished_message_is_recreated_next_cycle() {
		let surface = Arc::new(RecordingSurface::default());
		let agg = LiveStatusAggregator::new(LiveStatusConfig::default(), surface.clone());

		agg.refresh().await.unwrap();
		*surface.gone_once.lock() = true;
		assert!(matches!(agg.refresh().await, Err(AnnounceError::MessageGone)));
		assert_eq!(agg.announcement_id().await, None);

		agg.refresh().await.unwrap();
		assert_eq!(surface.creates.load(Ordering::SeqCst), 2);
		assert_eq!(agg.announcement_id().await.as_deref(), Some("msg-2"));
	}

	#[tokio::test]
	async fn surface_failure_is_not_fatal() {
		let surface = Arc::new(RecordingSurface {
			fail_creates: true,
			..Default::default()
		});
		let agg = LiveStatusAggregator::new(LiveStatusConfig::default(), surface);
		assert!(agg.refresh().await.is_err());
		agg.record_platform_status(Platform::YouTube, true);
		let _ = agg.refresh().await;
		assert!(agg.snapshot().await.youtube);
	}

	#[tokio::test(start_paused = true)]
	async fn twitch_probe_is_cached() {
		let probe = Arc::new(CountingProbe {
			calls: AtomicU32::new(0),
			live: true,
		});
		let agg = LiveStatusAggregator::new(LiveStatusConfig::default(), Arc::new(RecordingSurface::default()))
			.with_twitch_probe(probe.clone());

		assert!(agg.snapshot().await.twitch);
		assert!(agg.snapshot().await.twitch);
		assert_eq!(probe.calls.load(Ordering::SeqCst), 1);

		tokio::time::advance(Duration::from_secs(61)).await;
		assert!(agg.snapshot().await.twitch);
		assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn throughput_failure_or_timeout_reads_as_null() {
		let agg = LiveStatusAggregator::new(LiveStatusConfig::default(), Arc::new(RecordingSurface::default()))
			.with_throughput_probe(Arc::new(FailingThroughput));
		assert_eq!(agg.snapshot().await.throughput_mbps, None);

		let agg = LiveStatusAggregator::new(LiveStatusConfig::default(), Arc::new(RecordingSurface::default()))
			.with_throughput_probe(Arc::new(SlowThroughput));
		assert_eq!(agg.snapshot().await.throughput_mbps, None);
	}

	#[tokio::test]
	async fn refresh_broadcasts_live_status_event() {
		let broadcaster = Broadcaster::new(Default::default());
		let mut rx = broadcaster.attach();
		let agg = LiveStatusAggregator::new(LiveStatusConfig::default(), Arc::new(RecordingSurface::default()))
			.with_broadcaster(broadcaster);
		agg.record_platform_status(Platform::YouTube, true);
		let _ = agg.refresh().await;

		let _history = rx.recv().await.expect("history");
		match rx.recv().await.expect("event") {
			crate::server::broadcaster::BroadcastItem::Event(ev) => {
				assert_eq!(ev.kind, EventKind::LiveStatus);
				assert_eq!(ev.data.get("youtube"), Some(&serde_json::json!(true)));
				assert_eq!(ev.data.get("throughputMbps"), Some(&serde_json::Value::Null));
			}
			other => panic!("expected live status event, got: {other:?}"),
		}
	}

	#[test]
	fn render_uses_glyphs_and_dash_for_missing_throughput() {
		let text = render_status(&LiveStatusSnapshot {
			twitch: true,
			youtube: false,
			tiktok: true,
			throughput_mbps: None,
		});
		assert!(text.contains("🟢 Twitch"));
		assert!(text.contains("🔴 YouTube"));
		assert!(text.contains("🟢 TikTok"));
		assert!(text.ends_with("📶 Канал: —"));

		let text = render_status(&LiveStatusSnapshot {
			twitch: false,
			youtube: false,
			tiktok: false,
			throughput_mbps: Some(12.345),
		});
		assert!(text.ends_with("12.3 Мбит/с"));
	}
}
