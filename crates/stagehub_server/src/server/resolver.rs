#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use stagehub_platform::SecretString;
use tracing::debug;
use url::Url;

const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// Video metadata returned by a resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVideo {
	pub video_id: String,
	pub title: String,
	pub author: String,
	pub duration_secs: u32,
}

/// Video-search provider.
#[async_trait]
pub trait SongResolver: Send + Sync {
	async fn by_id(&self, video_id: &str) -> anyhow::Result<Option<ResolvedVideo>>;

	/// Top result for a free-text query.
	async fn search(&self, query: &str) -> anyhow::Result<Option<ResolvedVideo>>;
}

/// Resolve a request query: direct identifiers are fetched, anything else is searched.
///
/// A bare 11-character word that matches no video is searched as text.
pub async fn resolve_query(resolver: &dyn SongResolver, query: &str) -> anyhow::Result<Option<ResolvedVideo>> {
	let Some(id) = parse_video_id(query) else {
		return resolver.search(query).await;
	};

	let found = resolver.by_id(&id).await?;
	if found.is_none() && is_video_id(query.trim()) {
		debug!(%query, "bare token is not a video id; searching instead");
		return resolver.search(query).await;
	}
	Ok(found)
}

fn is_video_id(s: &str) -> bool {
	s.len() == 11 && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Extract a video id from a link or a bare 11-character token.
pub fn parse_video_id(query: &str) -> Option<String> {
	let q = query.trim();
	if is_video_id(q) {
		return Some(q.to_string());
	}

	let url = Url::parse(q)
		.or_else(|_| Url::parse(&format!("https://{q}")))
		.ok()?;
	let host = url.host_str()?;
	let host = host
		.strip_prefix("www.")
		.or_else(|| host.strip_prefix("m."))
		.or_else(|| host.strip_prefix("music."))
		.unwrap_or(host);

	let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
	let candidate = match host {
		"youtu.be" => segments.next().map(str::to_string),
		"youtube.com" => match segments.next() {
			Some("watch") => url.query_pairs().find(|(k, _)| k == "v").map(|(_, v)| v.into_owned()),
			Some("shorts" | "live" | "embed") => segments.next().map(str::to_string),
			_ => None,
		},
		_ => None,
	}?;

	is_video_id(&candidate).then_some(candidate)
}

/// Parse an ISO-8601 duration (`PT1H2M3S`, `P1DT5M`) into seconds.
pub fn parse_iso8601_duration(s: &str) -> Option<u32> {
	let rest = s.trim().strip_prefix('P')?;
	let mut total: u64 = 0;
	let mut num: Option<u64> = None;
	let mut in_time = false;

	for c in rest.chars() {
		if let Some(d) = c.to_digit(10) {
			num = Some(num.unwrap_or(0).checked_mul(10)?.checked_add(u64::from(d))?);
			continue;
		}
		if c == 'T' {
			if num.is_some() || in_time {
				return None;
			}
			in_time = true;
			continue;
		}
		let n = num.take()?;
		let unit = match (in_time, c) {
			(false, 'W') => 7 * 86_400,
			(false, 'D') => 86_400,
			(true, 'H') => 3_600,
			(true, 'M') => 60,
			(true, 'S') => 1,
			_ => return None,
		};
		total = total.checked_add(n.checked_mul(unit)?)?;
	}

	if num.is_some() {
		return None;
	}
	u32::try_from(total).ok()
}

/// Stand-in when no provider is configured: every lookup comes back empty.
pub struct UnconfiguredResolver;

#[async_trait]
impl SongResolver for UnconfiguredResolver {
	async fn by_id(&self, video_id: &str) -> anyhow::Result<Option<ResolvedVideo>> {
		debug!(%video_id, "no song provider configured");
		Ok(None)
	}

	async fn search(&self, query: &str) -> anyhow::Result<Option<ResolvedVideo>> {
		debug!(%query, "no song provider configured");
		Ok(None)
	}
}

/// Resolver backed by the YouTube Data API v3.
pub struct YouTubeDataResolver {
	http: reqwest::Client,
	api_key: SecretString,
	base_url: String,
}

impl YouTubeDataResolver {
	pub fn new(api_key: SecretString, timeout: Duration) -> anyhow::Result<Self> {
		let http = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.context("build youtube http client")?;
		Ok(Self {
			http,
			api_key,
			base_url: YOUTUBE_API_BASE.to_string(),
		})
	}

	fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> anyhow::Result<Url> {
		let mut url = Url::parse(&format!("{}/{path}", self.base_url.trim_end_matches('/')))
			.with_context(|| format!("invalid youtube api url for {path}"))?;
		url.query_pairs_mut()
			.extend_pairs(params.iter().copied())
			.append_pair("key", self.api_key.expose());
		Ok(url)
	}
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
	#[serde(default = "Vec::new")]
	items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
	id: SearchId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchId {
	video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
	id: String,
	snippet: VideoSnippet,
	content_details: VideoContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
	title: String,
	#[serde(default)]
	channel_title: String,
}

#[derive(Debug, Deserialize)]
struct VideoContentDetails {
	duration: String,
}

#[async_trait]
impl SongResolver for YouTubeDataResolver {
	async fn by_id(&self, video_id: &str) -> anyhow::Result<Option<ResolvedVideo>> {
		let url = self.endpoint("videos", &[("part", "snippet,contentDetails"), ("id", video_id)])?;
		let resp: ListResponse<VideoItem> = self
			.http
			.get(url)
			.send()
			.await
			.context("youtube videos request")?
			.error_for_status()
			.context("youtube videos status")?
			.json()
			.await
			.context("decode youtube videos response")?;

		let Some(item) = resp.items.into_iter().next() else {
			debug!(%video_id, "youtube: no such video");
			return Ok(None);
		};

		let duration_secs = parse_iso8601_duration(&item.content_details.duration)
			.ok_or_else(|| anyhow!("unparseable duration {:?}", item.content_details.duration))?;

		Ok(Some(ResolvedVideo {
			video_id: item.id,
			title: item.snippet.title,
			author: item.snippet.channel_title,
			duration_secs,
		}))
	}

	async fn search(&self, query: &str) -> anyhow::Result<Option<ResolvedVideo>> {
		let url = self.endpoint(
			"search",
			&[("part", "id"), ("type", "video"), ("maxResults", "1"), ("q", query)],
		)?;
		let resp: ListResponse<SearchItem> = self
			.http
			.get(url)
			.send()
			.await
			.context("youtube search request")?
			.error_for_status()
			.context("youtube search status")?
			.json()
			.await
			.context("decode youtube search response")?;

		let Some(video_id) = resp.items.into_iter().find_map(|i| i.id.video_id) else {
			debug!(%query, "youtube: search returned nothing");
			return Ok(None);
		};

		self.by_id(&video_id).await
	}
}
