#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use stagehub_platform::SecretString;
use tracing::debug;

use crate::server::live_status::{AnnounceError, AnnouncementSurface};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Status announcement posted as a Telegram bot message.
pub struct TelegramAnnouncer {
	http: reqwest::Client,
	base_url: String,
	bot_token: SecretString,
	chat_id: String,
}

#[derive(Debug, Deserialize)]
struct BotResponse<T> {
	ok: bool,
	result: Option<T>,
	#[serde(default)]
	description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
	message_id: i64,
}

/// How a failed `editMessageText` should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditFailure {
	Unchanged,
	Gone,
	Other,
}

fn classify_edit_failure(description: &str) -> EditFailure {
	let d = description.to_ascii_lowercase();
	if d.contains("message is not modified") {
		EditFailure::Unchanged
	} else if d.contains("message to edit not found") {
		EditFailure::Gone
	} else {
		EditFailure::Other
	}
}

impl TelegramAnnouncer {
	pub fn new(bot_token: SecretString, chat_id: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
		let http = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.context("build telegram http client")?;
		Ok(Self {
			http,
			base_url: TELEGRAM_API_BASE.to_string(),
			bot_token,
			chat_id: chat_id.into(),
		})
	}

	fn method_url(&self, method: &str) -> String {
		format!(
			"{}/bot{}/{method}",
			self.base_url.trim_end_matches('/'),
			self.bot_token.expose()
		)
	}

	async fn call<T: for<'de> Deserialize<'de>>(
		&self,
		method: &str,
		body: serde_json::Value,
	) -> anyhow::Result<BotResponse<T>> {
		// Errors come back as JSON with `ok: false`, so the status code is not checked.
		self.http
			.post(self.method_url(method))
			.json(&body)
			.send()
			.await
			.map_err(|e| anyhow!("telegram {method} request failed: {}", e.without_url()))?
			.json::<BotResponse<T>>()
			.await
			.map_err(|e| anyhow!("decode telegram {method} response: {}", e.without_url()))
	}
}

#[async_trait]
impl AnnouncementSurface for TelegramAnnouncer {
	async fn create(&self, text: &str) -> Result<String, AnnounceError> {
		let resp: BotResponse<SentMessage> = self
			.call(
				"sendMessage",
				json!({ "chat_id": self.chat_id, "text": text, "disable_notification": true }),
			)
			.await?;

		match (resp.ok, resp.result) {
			(true, Some(msg)) => Ok(msg.message_id.to_string()),
			_ => Err(AnnounceError::Other(anyhow!(
				"telegram sendMessage rejected: {}",
				resp.description.unwrap_or_default()
			))),
		}
	}

	async fn edit(&self, message_id: &str, text: &str) -> Result<(), AnnounceError> {
		let message_id: i64 = message_id
			.parse()
			.map_err(|_| AnnounceError::Other(anyhow!("non-numeric telegram message id {message_id:?}")))?;

		let resp: BotResponse<serde_json::Value> = self
			.call(
				"editMessageText",
				json!({ "chat_id": self.chat_id, "message_id": message_id, "text": text }),
			)
			.await?;

		if resp.ok {
			return Ok(());
		}

		let description = resp.description.unwrap_or_default();
		match classify_edit_failure(&description) {
			EditFailure::Unchanged => {
				debug!(message_id, "telegram: status unchanged");
				Ok(())
			}
			EditFailure::Gone => Err(AnnounceError::MessageGone),
			EditFailure::Other => Err(AnnounceError::Other(anyhow!(
				"telegram editMessageText rejected: {description}"
			))),
		}
	}
}
