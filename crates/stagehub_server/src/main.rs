#![forbid(unsafe_code)]

mod adapters;
mod config;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use stagehub_domain::Platform;
use stagehub_util::bind::parse_ws_bind;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::adapters::{BridgeAdapter, DemoAdapter};
use crate::config::ServerConfig;
use crate::server::announce::TelegramAnnouncer;
use crate::server::broadcaster::{Broadcaster, BroadcasterConfig};
use crate::server::cooldown::{CooldownPolicy, VipList};
use crate::server::dedupe::DEFAULT_DEDUPE_WINDOW;
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::hub::{Hub, HubConfig, HubDeps};
use crate::server::live_status::{LiveStatusAggregator, LiveStatusConfig};
use crate::server::probes::{HelixLiveProbe, HttpUploadProbe};
use crate::server::resolver::{SongResolver, UnconfiguredResolver, YouTubeDataResolver};
use crate::server::supervisor::{BackoffPolicy, ConnectionSupervisor};
use crate::server::transport::{TransportConfig, serve};

const DEFAULT_WS_BIND: &str = "ws://127.0.0.1:8765";

struct Args {
	bind: Option<String>,
	config: Option<PathBuf>,
}

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: stagehub_server [--bind ws://host:port] [--config path]\n\
\n\
Options:\n\
\t--bind     Presentation channel bind (default: ws://127.0.0.1:8765)\n\
\t          Format: ws://host:port\n\
\t--config   Config file (default: ~/.stagehub/config.toml)\n\
\t--help     Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> Args {
	let mut args = Args { bind: None, config: None };

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected ws://host:port)");
					usage_and_exit();
				}
				args.bind = Some(v);
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				args.config = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	args
}

fn resolve_bind(endpoint: &str) -> SocketAddr {
	parse_ws_bind(endpoint).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	})
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,stagehub_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("stagehub_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

fn build_resolver(cfg: &ServerConfig) -> anyhow::Result<Arc<dyn SongResolver>> {
	Ok(match &cfg.songs.youtube_api_key {
		Some(key) => Arc::new(YouTubeDataResolver::new(key.clone(), cfg.songs.resolve_timeout)?),
		None => Arc::new(UnconfiguredResolver),
	})
}

fn build_live_status(cfg: &ServerConfig, broadcaster: &Broadcaster) -> anyhow::Result<Option<Arc<LiveStatusAggregator>>> {
	let ls = &cfg.live_status;
	let (Some(token), Some(chat_id)) = (ls.telegram_bot_token.clone(), ls.telegram_chat_id.clone()) else {
		return Ok(None);
	};

	let announcer = TelegramAnnouncer::new(token, chat_id, ls.probe_timeout).context("build telegram announcer")?;
	let live_cfg = LiveStatusConfig {
		twitch_cache_ttl: ls.twitch_cache,
		throughput_cache_ttl: ls.probe_cache,
		probe_timeout: ls.probe_timeout,
	};
	let mut aggregator = LiveStatusAggregator::new(live_cfg, Arc::new(announcer)).with_broadcaster(broadcaster.clone());

	match (&ls.twitch_client_id, &ls.twitch_access_token, &ls.twitch_login) {
		(Some(client_id), Some(token), Some(login)) => {
			let probe = HelixLiveProbe::new(client_id.clone(), token.clone(), login.clone(), ls.probe_timeout)?;
			aggregator = aggregator.with_twitch_probe(Arc::new(probe));
		}
		_ => info!("twitch liveness probe not configured; twitch shows offline"),
	}

	if let Some(url) = ls.probe_url.as_deref() {
		match HttpUploadProbe::new(url, ls.probe_bytes, ls.probe_timeout) {
			Ok(probe) => aggregator = aggregator.with_throughput_probe(Arc::new(probe)),
			Err(e) => warn!(error = %e, "throughput probe disabled"),
		}
	}

	Ok(Some(Arc::new(aggregator)))
}

fn hub_config(cfg: &ServerConfig) -> HubConfig {
	HubConfig {
		songs_enabled: cfg.songs.enabled,
		song_disabled_platforms: cfg.songs.disabled_platforms.iter().copied().collect(),
		cooldown: CooldownPolicy {
			interval: cfg.songs.cooldown,
		},
		max_song_duration: cfg.songs.max_duration,
		resolve_timeout: cfg.songs.resolve_timeout,
		reconnect: BackoffPolicy {
			base_delay: cfg.reconnect.base_delay,
			max_delay: cfg.reconnect.max_delay,
			factor: cfg.reconnect.factor,
		},
		dedupe_window: DEFAULT_DEDUPE_WINDOW,
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = match args.config {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	let bind_endpoint = args
		.bind
		.or_else(|| server_cfg.server.ws_bind.clone())
		.unwrap_or_else(|| DEFAULT_WS_BIND.to_string());
	let bind_addr = resolve_bind(&bind_endpoint);

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let health_state = HealthState::new();
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let broadcaster = Broadcaster::new(BroadcasterConfig {
		consumer_queue_capacity: server_cfg.server.consumer_queue_capacity,
		history_capacity: server_cfg.server.history_capacity,
		debug_logs: false,
	});

	let live = build_live_status(&server_cfg, &broadcaster)?;
	let (hub, events_rx) = Hub::new(
		hub_config(&server_cfg),
		HubDeps {
			resolver: build_resolver(&server_cfg)?,
			broadcaster,
			supervisor: ConnectionSupervisor::new(),
			vip: VipList::from_entries(&server_cfg.songs.vip_users),
			live: live.clone(),
			health: Some(health_state.clone()),
		},
	);

	for (platform, source) in &server_cfg.sources {
		info!(%platform, addr = %source.bridge_addr, "registering bridge source");
		hub.register_source(Arc::new(BridgeAdapter::new(
			*platform,
			source.bridge_addr.clone(),
			source.connect_timeout,
		)));
	}

	if cfg!(debug_assertions) && server_cfg.enable_demo_source {
		let platform = Platform::SOURCES
			.into_iter()
			.find(|p| !server_cfg.sources.contains_key(p))
			.unwrap_or(Platform::Twitch);
		info!(%platform, "starting dev-only demo source (enabled by config/env)");
		hub.register_source(Arc::new(DemoAdapter::new(platform)));
	}

	let listener = TcpListener::bind(bind_addr)
		.await
		.with_context(|| format!("bind presentation channel on {bind_addr}"))?;
	info!(bind = %bind_addr, "stagehub_server: presentation websocket ready");

	tokio::spawn(Arc::clone(&hub).run(events_rx));
	hub.start_sources().await;

	let live_timer = live.map(|l| l.spawn_timer(server_cfg.live_status.interval));
	let server = tokio::spawn(serve(listener, Arc::clone(&hub), TransportConfig::default()));

	health_state.mark_ready();

	tokio::select! {
		res = tokio::signal::ctrl_c() => {
			if let Err(e) = res {
				warn!(error = %e, "failed to listen for shutdown signal");
			}
			info!("shutdown requested");
		}
		res = server => match res {
			Ok(Ok(())) => {}
			Ok(Err(e)) => warn!(error = %e, "presentation server stopped"),
			Err(e) => warn!(error = %e, "presentation server task failed"),
		},
	}

	if let Some(timer) = live_timer {
		timer.abort();
	}
	hub.shutdown().await;

	Ok(())
}
