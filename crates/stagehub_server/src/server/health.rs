#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::RwLock;
use stagehub_domain::Platform;
use tokio::net::TcpListener;
use tracing::warn;

#[derive(Clone, Default)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
	sources: Arc<RwLock<BTreeMap<Platform, bool>>>,
}

impl HealthState {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}

	/// Record the latest connect/disconnect report for a source.
	pub fn set_source(&self, platform: Platform, connected: bool) {
		self.sources.write().insert(platform, connected);
	}

	/// `{"twitch":true,...}` for every source that has reported.
	pub fn sources_json(&self) -> String {
		let sources = self.sources.read();
		let map: serde_json::Map<String, serde_json::Value> = sources
			.iter()
			.map(|(p, connected)| (p.as_str().to_string(), serde_json::Value::Bool(*connected)))
			.collect();
		serde_json::Value::Object(map).to_string()
	}
}

pub fn spawn_health_server(bind: SocketAddr, state: HealthState) {
	tokio::spawn(async move {
		if let Err(err) = run_health_server(bind, state).await {
			warn!(error = %err, "health server stopped");
		}
	});
}

async fn run_health_server(bind: SocketAddr, state: HealthState) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind).await?;
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_health(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "health connection error");
			}
		});
	}
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
	let mut resp = Response::new(Full::new(body.into()));
	*resp.status_mut() = status;
	resp
}

async fn handle_health(req: Request<Incoming>, state: HealthState) -> Result<Response<Full<Bytes>>, hyper::Error> {
	Ok(route(req.method(), req.uri().path(), &state))
}

fn route(method: &Method, path: &str, state: &HealthState) -> Response<Full<Bytes>> {
	if method != Method::GET {
		return respond(StatusCode::METHOD_NOT_ALLOWED, Bytes::new());
	}

	match path {
		"/healthz" => respond(StatusCode::OK, Bytes::from_static(b"ok")),
		"/readyz" => {
			if state.is_ready() {
				respond(StatusCode::OK, Bytes::from_static(b"ready"))
			} else {
				respond(StatusCode::SERVICE_UNAVAILABLE, Bytes::from_static(b"not-ready"))
			}
		}
		"/sources" => {
			let mut resp = respond(StatusCode::OK, state.sources_json());
			resp.headers_mut().insert(
				hyper::header::CONTENT_TYPE,
				hyper::header::HeaderValue::from_static("application/json"),
			);
			resp
		}
		_ => respond(StatusCode::NOT_FOUND, Bytes::new()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn readiness_flips_once_marked() {
		let state = HealthState::new();
		assert_eq!(route(&Method::GET, "/readyz", &state).status(), StatusCode::SERVICE_UNAVAILABLE);
		state.mark_ready();
		assert_eq!(route(&Method::GET, "/readyz", &state).status(), StatusCode::OK);
		assert_eq!(route(&Method::GET, "/healthz", &state).status(), StatusCode::OK);
		assert_eq!(route(&Method::POST, "/healthz", &state).status(), StatusCode::METHOD_NOT_ALLOWED);
		assert_eq!(route(&Method::GET, "/nope", &state).status(), StatusCode::NOT_FOUND);
	}

	#[test]
	fn source_report_is_json() {
		let state = HealthState::new();
		state.set_source(Platform::Twitch, true);
		state.set_source(Platform::TikTok, false);
		let v: serde_json::Value = serde_json::from_str(&state.sources_json()).unwrap();
		assert_eq!(v["twitch"], true);
		assert_eq!(v["tiktok"], false);
		assert_eq!(route(&Method::GET, "/sources", &state).status(), StatusCode::OK);
	}
}
