#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use stagehub_platform::SecretString;
use tokio::time::Instant;
use url::Url;

use crate::server::live_status::{LivenessProbe, ThroughputProbe};

const HELIX_BASE: &str = "https://api.twitch.tv/helix";

/// Twitch liveness via Helix `GET /streams?user_login=`.
pub struct HelixLiveProbe {
	http: reqwest::Client,
	base_url: String,
	client_id: String,
	access_token: SecretString,
	login: String,
}

#[derive(Debug, Deserialize)]
struct StreamsResponse {
	#[serde(default)]
	data: Vec<serde_json::Value>,
}

impl HelixLiveProbe {
	pub fn new(
		client_id: impl Into<String>,
		access_token: SecretString,
		login: impl Into<String>,
		timeout: Duration,
	) -> anyhow::Result<Self> {
		let http = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.context("build helix http client")?;
		Ok(Self {
			http,
			base_url: HELIX_BASE.to_string(),
			client_id: client_id.into(),
			access_token,
			login: login.into(),
		})
	}
}

#[async_trait]
impl LivenessProbe for HelixLiveProbe {
	async fn is_live(&self) -> anyhow::Result<bool> {
		let mut url = Url::parse(&format!("{}/streams", self.base_url.trim_end_matches('/'))).context("helix url")?;
		url.query_pairs_mut().append_pair("user_login", &self.login);

		let resp: StreamsResponse = self
			.http
			.get(url)
			.header("Client-Id", self.client_id.as_str())
			.bearer_auth(self.access_token.expose())
			.send()
			.await
			.context("helix streams request")?
			.error_for_status()
			.context("helix streams status")?
			.json()
			.await
			.context("decode helix streams response")?;

		Ok(!resp.data.is_empty())
	}
}

/// Upload throughput: time a POST of `payload_bytes` zero bytes.
pub struct HttpUploadProbe {
	http: reqwest::Client,
	url: Url,
	payload_bytes: usize,
}

impl HttpUploadProbe {
	pub fn new(url: &str, payload_bytes: usize, timeout: Duration) -> anyhow::Result<Self> {
		let url = Url::parse(url).with_context(|| format!("invalid probe url {url:?}"))?;
		let http = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.context("build probe http client")?;
		Ok(Self {
			http,
			url,
			payload_bytes: payload_bytes.max(1),
		})
	}
}

/// Megabits per second for `bytes` moved in `elapsed`.
pub fn mbps(bytes: usize, elapsed: Duration) -> Option<f64> {
	let secs = elapsed.as_secs_f64();
	(secs > 0.0).then(|| (bytes as f64 * 8.0) / secs / 1_000_000.0)
}

#[async_trait]
impl ThroughputProbe for HttpUploadProbe {
	async fn sample_mbps(&self) -> anyhow::Result<f64> {
		let body = vec![0u8; self.payload_bytes];
		let started = Instant::now();
		self.http
			.post(self.url.clone())
			.header("Content-Type", "application/octet-stream")
			.body(body)
			.send()
			.await
			.context("upload probe request")?
			.error_for_status()
			.context("upload probe status")?
			.bytes()
			.await
			.context("upload probe response body")?;

		mbps(self.payload_bytes, started.elapsed()).ok_or_else(|| anyhow!("upload finished in zero time"))
	}
}
