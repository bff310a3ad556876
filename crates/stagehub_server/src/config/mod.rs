#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use stagehub_domain::Platform;
use stagehub_platform::SecretString;
use tracing::{debug, info, warn};

/// Default config path: `~/.stagehub/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".stagehub").join("config.toml"))
}

/// Load the server config from TOML at `path`, then apply `STAGEHUB_*` env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);
	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
	cfg.normalize();

	Ok(cfg)
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub songs: SongSettings,
	pub reconnect: ReconnectSettings,
	pub sources: BTreeMap<Platform, SourceSettings>,
	pub live_status: LiveStatusSettings,
	/// Debug builds only: run the synthetic demo source.
	pub enable_demo_source: bool,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self::from_file(FileConfig::default())
	}
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Presentation channel bind (`ws://host:port`); the CLI flag wins over this.
	pub ws_bind: Option<String>,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	pub history_capacity: usize,
	pub consumer_queue_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct SongSettings {
	pub enabled: bool,
	pub cooldown: Duration,
	pub max_duration: Duration,
	pub resolve_timeout: Duration,
	/// `platform:login` entries that bypass the cooldown and jump the queue.
	pub vip_users: Vec<String>,
	pub youtube_api_key: Option<SecretString>,
	pub disabled_platforms: BTreeSet<Platform>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectSettings {
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub factor: f64,
}

/// One external source client reached over the bridge protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
	/// `host:port` of the source client.
	pub bridge_addr: String,
	pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LiveStatusSettings {
	pub interval: Duration,
	pub telegram_bot_token: Option<SecretString>,
	pub telegram_chat_id: Option<String>,
	pub twitch_client_id: Option<String>,
	pub twitch_access_token: Option<SecretString>,
	pub twitch_login: Option<String>,
	pub twitch_cache: Duration,
	pub probe_url: Option<String>,
	pub probe_bytes: usize,
	pub probe_timeout: Duration,
	pub probe_cache: Duration,
}

impl LiveStatusSettings {
	/// The announcement needs both a bot token and a target chat.
	pub fn announcement_enabled(&self) -> bool {
		self.telegram_bot_token.is_some() && self.telegram_chat_id.is_some()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	songs: FileSongSettings,

	#[serde(default)]
	reconnect: FileReconnectSettings,

	#[serde(default)]
	sources: BTreeMap<String, FileSourceSettings>,

	#[serde(default)]
	live_status: FileLiveStatusSettings,

	enable_demo_source: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	ws_bind: Option<String>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	history_capacity: Option<usize>,
	consumer_queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileSongSettings {
	enabled: Option<bool>,
	cooldown_secs: Option<u64>,
	max_duration_secs: Option<u64>,
	resolve_timeout_ms: Option<u64>,
	#[serde(default)]
	vip_users: Vec<String>,
	youtube_api_key: Option<String>,
	#[serde(default)]
	disabled_platforms: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileReconnectSettings {
	base_delay_ms: Option<u64>,
	max_delay_ms: Option<u64>,
	factor: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileSourceSettings {
	bridge_addr: Option<String>,
	connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileLiveStatusSettings {
	interval_secs: Option<u64>,
	telegram_bot_token: Option<String>,
	telegram_chat_id: Option<String>,
	twitch_client_id: Option<String>,
	twitch_access_token: Option<String>,
	twitch_login: Option<String>,
	twitch_cache_secs: Option<u64>,
	probe_url: Option<String>,
	probe_bytes: Option<usize>,
	probe_timeout_ms: Option<u64>,
	probe_cache_secs: Option<u64>,
}

fn non_empty(s: Option<String>) -> Option<String> {
	s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_platforms(raw: &[String], what: &str) -> BTreeSet<Platform> {
	raw.iter()
		.filter_map(|p| match p.parse::<Platform>() {
			Ok(Platform::System) | Err(_) => {
				warn!(value = %p, what, "ignoring unknown platform");
				None
			}
			Ok(platform) => Some(platform),
		})
		.collect()
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let mut sources = BTreeMap::new();
		for (name, src) in file.sources {
			let platform = match name.parse::<Platform>() {
				Ok(Platform::System) | Err(_) => {
					warn!(source = %name, "ignoring [sources] entry for unknown platform");
					continue;
				}
				Ok(platform) => platform,
			};
			let Some(bridge_addr) = non_empty(src.bridge_addr) else {
				warn!(%platform, "source has no bridge_addr; skipping");
				continue;
			};
			sources.insert(
				platform,
				SourceSettings {
					bridge_addr,
					connect_timeout: Duration::from_millis(src.connect_timeout_ms.unwrap_or(10_000)),
				},
			);
		}

		Self {
			server: ServerSettings {
				ws_bind: non_empty(file.server.ws_bind),
				metrics_bind: non_empty(file.server.metrics_bind),
				health_bind: non_empty(file.server.health_bind),
				history_capacity: file.server.history_capacity.unwrap_or(50),
				consumer_queue_capacity: file.server.consumer_queue_capacity.unwrap_or(1024),
			},
			songs: SongSettings {
				enabled: file.songs.enabled.unwrap_or(true),
				cooldown: Duration::from_secs(file.songs.cooldown_secs.unwrap_or(60)),
				max_duration: Duration::from_secs(file.songs.max_duration_secs.unwrap_or(600)),
				resolve_timeout: Duration::from_millis(file.songs.resolve_timeout_ms.unwrap_or(8_000)),
				vip_users: file
					.songs
					.vip_users
					.into_iter()
					.map(|s| s.trim().to_string())
					.filter(|s| !s.is_empty())
					.collect(),
				youtube_api_key: non_empty(file.songs.youtube_api_key).map(SecretString::new),
				disabled_platforms: parse_platforms(&file.songs.disabled_platforms, "songs.disabled_platforms"),
			},
			reconnect: ReconnectSettings {
				base_delay: Duration::from_millis(file.reconnect.base_delay_ms.unwrap_or(30_000)),
				max_delay: Duration::from_millis(file.reconnect.max_delay_ms.unwrap_or(300_000)),
				factor: file.reconnect.factor.unwrap_or(1.5),
			},
			sources,
			live_status: LiveStatusSettings {
				interval: Duration::from_secs(file.live_status.interval_secs.unwrap_or(30).max(1)),
				telegram_bot_token: non_empty(file.live_status.telegram_bot_token).map(SecretString::new),
				telegram_chat_id: non_empty(file.live_status.telegram_chat_id),
				twitch_client_id: non_empty(file.live_status.twitch_client_id),
				twitch_access_token: non_empty(file.live_status.twitch_access_token).map(SecretString::new),
				twitch_login: non_empty(file.live_status.twitch_login),
				twitch_cache: Duration::from_secs(file.live_status.twitch_cache_secs.unwrap_or(60)),
				probe_url: non_empty(file.live_status.probe_url),
				probe_bytes: file.live_status.probe_bytes.unwrap_or(2_000_000),
				probe_timeout: Duration::from_millis(file.live_status.probe_timeout_ms.unwrap_or(15_000)),
				probe_cache: Duration::from_secs(file.live_status.probe_cache_secs.unwrap_or(300)),
			},
			enable_demo_source: file.enable_demo_source.unwrap_or(false),
		}
	}

	/// Repair values that would break invariants downstream.
	fn normalize(&mut self) {
		let r = &mut self.reconnect;
		if !r.factor.is_finite() || r.factor < 1.0 {
			warn!(factor = r.factor, "reconnect factor below 1.0; using 1.0");
			r.factor = 1.0;
		}
		if r.base_delay > r.max_delay {
			warn!(
				base_ms = r.base_delay.as_millis() as u64,
				max_ms = r.max_delay.as_millis() as u64,
				"reconnect base_delay > max_delay; swapping"
			);
			std::mem::swap(&mut r.base_delay, &mut r.max_delay);
		}

		if self.server.consumer_queue_capacity == 0 {
			warn!("consumer_queue_capacity must be positive; using 1");
			self.server.consumer_queue_capacity = 1;
		}

		if self.songs.enabled && self.songs.youtube_api_key.is_none() {
			warn!("song requests enabled but no youtube_api_key; requests will not resolve");
		}
		if self.live_status.announcement_enabled() {
			info!("live status announcement enabled");
		} else {
			debug!("live status announcement disabled (no telegram bot token/chat id)");
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig, env: impl Fn(&str) -> Option<String>) {
	let text = |key: &str| non_empty(env(key));

	if let Some(v) = text("STAGEHUB_WS_BIND") {
		cfg.server.ws_bind = Some(v);
		info!("server config: ws_bind overridden by env");
	}

	if let Some(v) = text("STAGEHUB_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = text("STAGEHUB_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(v) = text("STAGEHUB_SONGS_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.songs.enabled = enabled;
		info!(enabled, "songs config: enabled overridden by env");
	}

	if let Some(v) = text("STAGEHUB_SONG_COOLDOWN_SECS")
		&& let Ok(secs) = v.parse::<u64>()
	{
		cfg.songs.cooldown = Duration::from_secs(secs);
		info!(secs, "songs config: cooldown overridden by env");
	}

	if let Some(v) = text("STAGEHUB_SONG_MAX_DURATION_SECS")
		&& let Ok(secs) = v.parse::<u64>()
	{
		cfg.songs.max_duration = Duration::from_secs(secs);
		info!(secs, "songs config: max_duration overridden by env");
	}

	if let Some(v) = text("STAGEHUB_YOUTUBE_API_KEY") {
		cfg.songs.youtube_api_key = Some(SecretString::new(v));
		info!("songs config: youtube_api_key overridden by env");
	}

	if let Some(v) = text("STAGEHUB_RECONNECT_BASE_DELAY_MS")
		&& let Ok(ms) = v.parse::<u64>()
	{
		cfg.reconnect.base_delay = Duration::from_millis(ms);
		info!(ms, "reconnect config: base_delay overridden by env");
	}

	if let Some(v) = text("STAGEHUB_RECONNECT_MAX_DELAY_MS")
		&& let Ok(ms) = v.parse::<u64>()
	{
		cfg.reconnect.max_delay = Duration::from_millis(ms);
		info!(ms, "reconnect config: max_delay overridden by env");
	}

	if let Some(v) = text("STAGEHUB_RECONNECT_FACTOR")
		&& let Ok(factor) = v.parse::<f64>()
	{
		cfg.reconnect.factor = factor;
		info!(factor, "reconnect config: factor overridden by env");
	}

	if let Some(v) = text("STAGEHUB_TELEGRAM_BOT_TOKEN") {
		cfg.live_status.telegram_bot_token = Some(SecretString::new(v));
		info!("live status config: telegram_bot_token overridden by env");
	}

	if let Some(v) = text("STAGEHUB_TELEGRAM_CHAT_ID") {
		cfg.live_status.telegram_chat_id = Some(v);
		info!("live status config: telegram_chat_id overridden by env");
	}

	if let Some(v) = text("STAGEHUB_TWITCH_CLIENT_ID") {
		cfg.live_status.twitch_client_id = Some(v);
		info!("live status config: twitch_client_id overridden by env");
	}

	if let Some(v) = text("STAGEHUB_TWITCH_ACCESS_TOKEN") {
		cfg.live_status.twitch_access_token = Some(SecretString::new(v));
		info!("live status config: twitch_access_token overridden by env");
	}

	if let Some(v) = text("STAGEHUB_TWITCH_LOGIN") {
		cfg.live_status.twitch_login = Some(v);
		info!("live status config: twitch_login overridden by env");
	}

	if let Some(v) = text("STAGEHUB_ENABLE_DEMO_SOURCE")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.enable_demo_source = enabled;
		info!(enabled, "server config: enable_demo_source overridden by env");
	}
}
