#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{Map, Value, json};
use stagehub_domain::{EventKind, Platform};
use stagehub_platform::{
	Actor, IngestEvent, IngestPayload, SourceAdapter, SourceEvent, SourceEventRx, SourceEventTx, SourceStatus,
	can_skip_current_song, source_channel, validate_ingest_event,
};
use stagehub_protocol::{ControlMessage, NormalizedEvent};
use stagehub_util::time::{unix_ms, unix_ms_now};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::server::broadcaster::Broadcaster;
use crate::server::commands::{Command, parse_command, song_query};
use crate::server::cooldown::{CooldownLedger, CooldownPolicy, VipList, format_wait};
use crate::server::dedupe::{DEFAULT_DEDUPE_WINDOW, RecentIds};
use crate::server::health::HealthState;
use crate::server::history::clock_label;
use crate::server::live_status::LiveStatusAggregator;
use crate::server::resolver::{SongResolver, resolve_query};
use crate::server::songs::{QueueSnapshot, Song, SongQueue};
use crate::server::supervisor::{BackoffPolicy, ConnectionSupervisor};

const SOURCE_CHANNEL_CAPACITY: usize = 1024;
const NOTICE_NICKNAME: &str = "StageHub";

#[derive(Debug, Clone)]
pub struct HubConfig {
	pub songs_enabled: bool,
	pub song_disabled_platforms: HashSet<Platform>,
	pub cooldown: CooldownPolicy,
	pub max_song_duration: Duration,
	pub resolve_timeout: Duration,
	pub reconnect: BackoffPolicy,
	pub dedupe_window: usize,
}

impl Default for HubConfig {
	fn default() -> Self {
		Self {
			songs_enabled: true,
			song_disabled_platforms: HashSet::new(),
			cooldown: CooldownPolicy::default(),
			max_song_duration: Duration::from_secs(600),
			resolve_timeout: Duration::from_secs(8),
			reconnect: BackoffPolicy::default(),
			dedupe_window: DEFAULT_DEDUPE_WINDOW,
		}
	}
}

/// Collaborators wired in at startup.
pub struct HubDeps {
	pub resolver: Arc<dyn SongResolver>,
	pub broadcaster: Broadcaster,
	pub supervisor: ConnectionSupervisor,
	pub vip: VipList,
	pub live: Option<Arc<LiveStatusAggregator>>,
	pub health: Option<HealthState>,
}

/// Result of one `!song` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SongRequestOutcome {
	NotAllowed,
	EmptyQuery,
	CoolingDown { remaining: Duration },
	Unresolved,
	TooLong { duration_secs: u32 },
	Accepted { song: Song, position: usize, started: bool },
}

/// Result of a gated playback command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
	Applied,
	Denied,
	NothingPlaying,
}

/// Queue and ledger, mutated together under one lock.
#[derive(Debug, Default)]
struct Playback {
	queue: SongQueue,
	ledger: CooldownLedger,
}

/// The orchestrator: routes source events, owns playback state, and
/// supervises source connections.
pub struct Hub {
	cfg: HubConfig,
	playback: Mutex<Playback>,
	vip: VipList,
	resolver: Arc<dyn SongResolver>,
	broadcaster: Broadcaster,
	live: Option<Arc<LiveStatusAggregator>>,
	health: Option<HealthState>,
	supervisor: ConnectionSupervisor,
	sources: parking_lot::RwLock<HashMap<Platform, Arc<dyn SourceAdapter>>>,
	events_tx: SourceEventTx,
	dedupe: parking_lot::Mutex<RecentIds>,
	shutting_down: AtomicBool,
}

/// Supervisor key for a source.
pub fn reconnect_key(platform: Platform) -> String {
	format!("source:{platform}")
}

/// Fields shared by every user-attributed event.
fn user_data(user_id: &str, nickname: &str, timestamp: i64) -> Map<String, Value> {
	let mut data = Map::new();
	data.insert("userId".into(), json!(user_id));
	data.insert("nickname".into(), json!(nickname));
	data.insert("timestamp".into(), json!(timestamp));
	data.insert("time".into(), json!(clock_label(timestamp)));
	data
}

fn song_event(kind: EventKind, song: &Song) -> NormalizedEvent {
	NormalizedEvent::from_value(kind, Platform::System, serde_json::to_value(song).unwrap_or(Value::Null))
}

fn queue_event(snapshot: &QueueSnapshot) -> NormalizedEvent {
	NormalizedEvent::from_value(
		EventKind::Queue,
		Platform::System,
		serde_json::to_value(snapshot).unwrap_or(Value::Null),
	)
}

impl Hub {
	pub fn new(cfg: HubConfig, deps: HubDeps) -> (Arc<Self>, SourceEventRx) {
		let (events_tx, events_rx) = source_channel(SOURCE_CHANNEL_CAPACITY);
		let hub = Arc::new(Self {
			dedupe: parking_lot::Mutex::new(RecentIds::new(cfg.dedupe_window)),
			cfg,
			playback: Mutex::new(Playback::default()),
			vip: deps.vip,
			resolver: deps.resolver,
			broadcaster: deps.broadcaster,
			live: deps.live,
			health: deps.health,
			supervisor: deps.supervisor,
			sources: parking_lot::RwLock::new(HashMap::new()),
			events_tx,
			shutting_down: AtomicBool::new(false),
		});
		(hub, events_rx)
	}

	pub fn register_source(&self, source: Arc<dyn SourceAdapter>) {
		let platform = source.platform();
		if self.sources.write().insert(platform, source).is_some() {
			warn!(%platform, "replacing previously registered source");
		}
	}

	pub fn events_tx(&self) -> SourceEventTx {
		self.events_tx.clone()
	}

	pub fn broadcaster(&self) -> &Broadcaster {
		&self.broadcaster
	}

	pub fn supervisor(&self) -> &ConnectionSupervisor {
		&self.supervisor
	}

	pub fn is_shutting_down(&self) -> bool {
		self.shutting_down.load(Ordering::Relaxed)
	}

	/// Connect every registered source once; failures go to the supervisor.
	pub async fn start_sources(self: &Arc<Self>) {
		let sources: Vec<Arc<dyn SourceAdapter>> = self.sources.read().values().cloned().collect();
		let attempts = sources.into_iter().map(|source| {
			let tx = self.events_tx.clone();
			async move {
				let platform = source.platform();
				(platform, source.connect(tx).await)
			}
		});

		for (platform, result) in futures::future::join_all(attempts).await {
			match result {
				Ok(()) => info!(%platform, "source connected"),
				Err(e) => {
					warn!(%platform, error = %e, "initial source connect failed");
					self.schedule_reconnect(platform);
				}
			}
		}
	}

	fn schedule_reconnect(&self, platform: Platform) -> bool {
		let Some(source) = self.sources.read().get(&platform).cloned() else {
			debug!(%platform, "no registered source to reconnect");
			return false;
		};
		let tx = self.events_tx.clone();
		self.supervisor.schedule(
			reconnect_key(platform),
			move || {
				let source = source.clone();
				let tx = tx.clone();
				async move { source.connect(tx).await }
			},
			self.cfg.reconnect,
		)
	}

	/// Drain source events until shutdown.
	pub async fn run(self: Arc<Self>, mut events_rx: SourceEventRx) {
		while let Some(ev) = events_rx.recv().await {
			if self.is_shutting_down() {
				break;
			}
			self.handle_event(ev).await;
		}
		debug!("hub event loop stopped");
	}

	/// Stop reconnecting and tear every source down.
	pub async fn shutdown(&self) {
		self.shutting_down.store(true, Ordering::Relaxed);
		self.supervisor.clear_all();
		let sources: Vec<Arc<dyn SourceAdapter>> = self.sources.read().values().cloned().collect();
		for source in sources {
			source.disconnect().await;
		}
		let pb = self.playback.lock().await;
		info!(
			playing = pb.queue.is_playing(),
			waiting = pb.queue.waiting_len(),
			"hub shut down"
		);
	}

	pub async fn handle_event(self: &Arc<Self>, ev: SourceEvent) {
		match ev {
			SourceEvent::Ingest(ev) => self.handle_ingest(*ev).await,
			SourceEvent::Status(st) => self.handle_status(st),
		}
	}

	fn handle_status(&self, st: SourceStatus) {
		let platform = st.platform;
		metrics::counter!(
			"stagehub_source_status_total",
			"platform" => platform.as_str(),
			"connected" => if st.connected { "true" } else { "false" }
		)
		.increment(1);

		if st.connected {
			info!(%platform, detail = %st.detail, "source up");
		} else {
			warn!(
				%platform,
				detail = %st.detail,
				error = st.last_error.as_deref().unwrap_or(""),
				"source down"
			);
		}

		if let Some(health) = &self.health {
			health.set_source(platform, st.connected);
		}

		if let Some(live) = &self.live
			&& matches!(platform, Platform::YouTube | Platform::TikTok)
		{
			// Record in arrival order; only the refresh runs in the background.
			live.record_platform_status(platform, st.connected);
			let live = live.clone();
			tokio::spawn(async move {
				let _ = live.refresh().await;
			});
		}

		if !st.connected && !self.is_shutting_down() {
			self.schedule_reconnect(platform);
		}
	}

	async fn handle_ingest(self: &Arc<Self>, ev: IngestEvent) {
		if let Err(e) = validate_ingest_event(&ev) {
			debug!(platform = %ev.platform, error = %e, "dropping invalid ingest event");
			return;
		}

		if let Some(id) = ev.platform_message_id.as_deref()
			&& !self.dedupe.lock().first_seen(ev.platform, id)
		{
			debug!(platform = %ev.platform, message_id = %id, "dropping duplicate ingest event");
			return;
		}

		metrics::counter!(
			"stagehub_source_events_total",
			"platform" => ev.platform.as_str(),
			"kind" => ev.payload.kind().as_str()
		)
		.increment(1);

		let actor = Actor::from_ingest(&ev);
		let timestamp = unix_ms(ev.ingest_time);

		let text = match &ev.payload {
			IngestPayload::ChatMessage { text } => text,
			_ => {
				self.broadcaster.publish(audience_event(&ev, &actor, timestamp));
				return;
			}
		};

		match parse_command(ev.platform, text) {
			Some(Command::Song { .. }) => {
				let hub = Arc::clone(self);
				let text = text.clone();
				let cooldown = self.cfg.cooldown.cooldown_for(actor.capabilities);
				let allowed = self.song_requests_allowed(actor.platform);
				// Resolution awaits the provider; keep the event loop moving.
				tokio::spawn(async move {
					hub.handle_song_request(&actor, &text, cooldown, allowed).await;
				});
			}
			Some(Command::Skip) => {
				self.skip(&actor).await;
			}
			Some(Command::Stop) => {
				self.stop(&actor).await;
			}
			Some(Command::Pause) => {
				self.pause(&actor).await;
			}
			Some(Command::Play) => {
				self.resume(&actor).await;
			}
			None => self.broadcaster.publish(chat_event(&actor, text, timestamp)),
		}
	}

	pub fn song_requests_allowed(&self, platform: Platform) -> bool {
		self.cfg.songs_enabled && !self.cfg.song_disabled_platforms.contains(&platform)
	}

	pub fn is_vip(&self, actor: &Actor) -> bool {
		self.vip.contains(actor)
	}

	pub async fn handle_song_request(
		&self,
		actor: &Actor,
		command_text: &str,
		cooldown: Duration,
		allowed: bool,
	) -> SongRequestOutcome {
		self.handle_song_request_at(actor, command_text, cooldown, allowed, unix_ms_now())
			.await
	}

	/// `handle_song_request` with an explicit clock.
	pub async fn handle_song_request_at(
		&self,
		actor: &Actor,
		command_text: &str,
		cooldown: Duration,
		allowed: bool,
		now_ms: i64,
	) -> SongRequestOutcome {
		if !allowed {
			debug!(platform = %actor.platform, user = %actor.login, "song requests not allowed here");
			return self.rejected(SongRequestOutcome::NotAllowed, "not_allowed");
		}

		let query = song_query(command_text);
		if query.is_empty() {
			return self.rejected(SongRequestOutcome::EmptyQuery, "empty_query");
		}

		metrics::counter!("stagehub_song_requests_total", "platform" => actor.platform.as_str()).increment(1);

		let ledger_key = actor.login_key();
		let vip = self.is_vip(actor);

		if !vip {
			let remaining = self.playback.lock().await.ledger.remaining(&ledger_key, cooldown, now_ms);
			if let Some(remaining) = remaining {
				return self.cooling_down(actor, remaining);
			}
		}

		let resolved = match tokio::time::timeout(self.cfg.resolve_timeout, resolve_query(&*self.resolver, query)).await {
			Ok(Ok(Some(video))) => video,
			Ok(Ok(None)) => {
				debug!(%query, "song request matched nothing");
				return self.rejected(SongRequestOutcome::Unresolved, "unresolved");
			}
			Ok(Err(e)) => {
				warn!(%query, error = %e, "song resolution failed");
				return self.rejected(SongRequestOutcome::Unresolved, "unresolved");
			}
			Err(_) => {
				warn!(%query, timeout_ms = self.cfg.resolve_timeout.as_millis() as u64, "song resolution timed out");
				return self.rejected(SongRequestOutcome::Unresolved, "unresolved");
			}
		};

		if u64::from(resolved.duration_secs) > self.cfg.max_song_duration.as_secs() {
			self.notice(format!(
				"@{}, видео слишком длинное (максимум {} мин)",
				actor.display_name,
				self.cfg.max_song_duration.as_secs().div_ceil(60)
			));
			return self.rejected(
				SongRequestOutcome::TooLong {
					duration_secs: resolved.duration_secs,
				},
				"too_long",
			);
		}

		let song = Song {
			requester_id: actor.requester_id(),
			requester: actor.display_name.clone(),
			title: resolved.title,
			video_id: resolved.video_id,
			author: resolved.author,
			duration_secs: resolved.duration_secs,
		};

		let mut pb = self.playback.lock().await;
		// Another request from this user may have landed while we were resolving.
		if !vip && let Some(remaining) = pb.ledger.remaining(&ledger_key, cooldown, now_ms) {
			drop(pb);
			return self.cooling_down(actor, remaining);
		}
		pb.ledger.record(ledger_key, now_ms);
		let position = pb.queue.enqueue(song.clone(), vip);
		info!(
			platform = %actor.platform,
			user = %actor.login,
			video_id = %song.video_id,
			position,
			vip,
			"song request accepted"
		);
		self.notice(format!(
			"🎵 {} добавил(а) в очередь: {} (#{position})",
			actor.display_name, song.title
		));

		let started = !pb.queue.is_playing();
		if started && let Some(current) = pb.queue.next() {
			self.broadcaster.publish(song_event(EventKind::Music, current));
		}
		self.broadcaster.publish(queue_event(&pb.queue.snapshot()));

		SongRequestOutcome::Accepted { song, position, started }
	}

	fn cooling_down(&self, actor: &Actor, remaining: Duration) -> SongRequestOutcome {
		self.notice(format!(
			"@{}, следующий заказ можно сделать через {}",
			actor.display_name,
			format_wait(remaining)
		));
		self.rejected(SongRequestOutcome::CoolingDown { remaining }, "cooldown")
	}

	fn rejected(&self, outcome: SongRequestOutcome, reason: &'static str) -> SongRequestOutcome {
		metrics::counter!("stagehub_song_requests_rejected_total", "reason" => reason).increment(1);
		outcome
	}

	/// Forced skip of the current song.
	pub async fn skip(&self, actor: &Actor) -> PlaybackOutcome {
		let mut pb = self.playback.lock().await;

		let Some(current) = pb.queue.current() else {
			self.notice(format!("@{}, сейчас ничего не играет", actor.display_name));
			return PlaybackOutcome::NothingPlaying;
		};

		if !can_skip_current_song(actor, Some(current.requester_id.as_str())) {
			self.notice(format!(
				"@{}, пропустить можно только свой заказ",
				actor.display_name
			));
			return PlaybackOutcome::Denied;
		}

		let skipped = pb.queue.skip();
		self.broadcaster.publish(NormalizedEvent::from_value(
			EventKind::MusicStop,
			Platform::System,
			json!({ "reason": "skip", "by": actor.display_name }),
		));
		if let Some(next) = pb.queue.next() {
			self.broadcaster.publish(song_event(EventKind::Music, next));
		}
		self.broadcaster.publish(queue_event(&pb.queue.snapshot()));

		if let Some(skipped) = skipped {
			info!(user = %actor.login, video_id = %skipped.video_id, "song skipped");
			self.notice(format!("⏭ {} пропустил(а): {}", actor.display_name, skipped.title));
		}
		PlaybackOutcome::Applied
	}

	/// Full reset: current, queue and the cooldown ledger.
	pub async fn stop(&self, actor: &Actor) -> PlaybackOutcome {
		if !self.require_manager(actor) {
			return PlaybackOutcome::Denied;
		}

		let mut pb = self.playback.lock().await;
		pb.queue.stop();
		pb.ledger.clear();
		self.broadcaster.publish(NormalizedEvent::from_value(
			EventKind::MusicStop,
			Platform::System,
			json!({ "reason": "stop", "by": actor.display_name }),
		));
		self.broadcaster.publish(queue_event(&pb.queue.snapshot()));
		info!(user = %actor.login, "playback stopped and queue cleared");
		self.notice(format!("⏹ {} остановил(а) музыку и очистил(а) очередь", actor.display_name));
		PlaybackOutcome::Applied
	}

	pub async fn pause(&self, actor: &Actor) -> PlaybackOutcome {
		self.playback_signal(actor, EventKind::MusicPause)
	}

	pub async fn resume(&self, actor: &Actor) -> PlaybackOutcome {
		self.playback_signal(actor, EventKind::MusicPlay)
	}

	fn playback_signal(&self, actor: &Actor, kind: EventKind) -> PlaybackOutcome {
		if !self.require_manager(actor) {
			return PlaybackOutcome::Denied;
		}
		self.broadcaster.publish(NormalizedEvent::from_value(
			kind,
			Platform::System,
			json!({ "by": actor.display_name }),
		));
		PlaybackOutcome::Applied
	}

	fn require_manager(&self, actor: &Actor) -> bool {
		if actor.can_manage_playback() {
			return true;
		}
		self.notice(format!(
			"@{}, управлять музыкой могут только модераторы",
			actor.display_name
		));
		false
	}

	pub async fn handle_control(&self, msg: ControlMessage) {
		match msg {
			ControlMessage::TrackEnded => self.on_track_ended().await,
		}
	}

	/// Advance to the next song, or announce a stop when nothing is left.
	pub async fn on_track_ended(&self) {
		let mut pb = self.playback.lock().await;
		match pb.queue.next() {
			Some(next) => self.broadcaster.publish(song_event(EventKind::Music, next)),
			None => self.broadcaster.publish(NormalizedEvent::from_value(
				EventKind::MusicStop,
				Platform::System,
				json!({ "reason": "queue_empty" }),
			)),
		}
		self.broadcaster.publish(queue_event(&pb.queue.snapshot()));
		if pb.queue.is_idle() {
			debug!("song queue drained");
		}
	}

	#[allow(dead_code)]
	pub async fn playback_snapshot(&self) -> QueueSnapshot {
		self.playback.lock().await.queue.snapshot()
	}

	#[allow(dead_code)]
	pub async fn cooldown_entries(&self) -> usize {
		self.playback.lock().await.ledger.len()
	}

	/// Chat-visible message from the hub itself.
	fn notice(&self, text: String) {
		let now = unix_ms_now();
		let mut data = user_data("system", NOTICE_NICKNAME, now);
		data.insert("text".into(), json!(text));
		self.broadcaster
			.publish(NormalizedEvent::new(EventKind::Chat, Platform::System, data));
	}
}

fn chat_event(actor: &Actor, text: &str, timestamp: i64) -> NormalizedEvent {
	let mut data = user_data(&actor.user_id, &actor.display_name, timestamp);
	data.insert("text".into(), json!(text));
	data.insert("capabilities".into(), serde_json::to_value(actor.capabilities).unwrap_or(Value::Null));
	NormalizedEvent::new(EventKind::Chat, actor.platform, data)
}

fn audience_event(ev: &IngestEvent, actor: &Actor, timestamp: i64) -> NormalizedEvent {
	let kind = ev.payload.kind();
	let mut data = user_data(&actor.user_id, &actor.display_name, timestamp);
	match &ev.payload {
		IngestPayload::Subscribe { tier, months } => {
			if let Some(tier) = tier {
				data.insert("tier".into(), json!(tier));
			}
			if let Some(months) = months {
				data.insert("months".into(), json!(months));
			}
		}
		IngestPayload::Gift { gift_name, amount } => {
			if let Some(name) = gift_name {
				data.insert("giftName".into(), json!(name));
			}
			data.insert("amount".into(), json!(amount));
		}
		IngestPayload::Like { count } => {
			data.insert("count".into(), json!(count));
		}
		IngestPayload::ChatMessage { .. } | IngestPayload::Join | IngestPayload::Follow | IngestPayload::Share => {}
	}
	NormalizedEvent::new(kind, actor.platform, data)
}
