#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use stagehub_domain::Platform;
use stagehub_platform::{
	IngestEvent, IngestPayload, IngestTrace, RawCapabilitySignals, SourceAdapter, SourceEvent, SourceEventTx, UserRef,
	new_session_id, status, status_error,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, AsyncReadExt as _, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Longest accepted frame; longer lines are dropped.
const MAX_FRAME_LEN: usize = 64 * 1024;

enum Frame {
	Line(String),
	/// Bytes skipped for a line over `MAX_FRAME_LEN`.
	Oversized(usize),
	Eof,
}

/// Source reached over TCP: the external client streams one JSON ingest
/// frame per line.
pub struct BridgeAdapter {
	platform: Platform,
	addr: String,
	connect_timeout: Duration,
	reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

/// One line on the bridge socket.
#[derive(Debug, Deserialize)]
struct BridgeFrame {
	/// Must match the adapter's platform when present.
	#[serde(default)]
	platform: Option<Platform>,
	author: UserRef,
	#[serde(default)]
	signals: RawCapabilitySignals,
	payload: IngestPayload,
	#[serde(default)]
	message_id: Option<String>,
}

impl BridgeAdapter {
	pub fn new(platform: Platform, addr: impl Into<String>, connect_timeout: Duration) -> Self {
		Self {
			platform,
			addr: addr.into(),
			connect_timeout,
			reader: parking_lot::Mutex::new(None),
		}
	}
}

fn decode_frame(platform: Platform, line: &str) -> anyhow::Result<IngestEvent> {
	let frame: BridgeFrame = serde_json::from_str(line).context("decode bridge frame")?;
	if let Some(p) = frame.platform
		&& p != platform
	{
		return Err(anyhow!("frame for {p} on the {platform} bridge"));
	}

	let mut ev = IngestEvent::new(platform, frame.author, frame.signals, frame.payload);
	if let Some(id) = frame.message_id.filter(|s| !s.trim().is_empty()) {
		ev = ev.with_message_id(id);
	}
	Ok(ev)
}

/// Read one newline-terminated frame, buffering at most `MAX_FRAME_LEN + 1` bytes.
async fn next_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Frame>
where
	R: AsyncBufRead + Unpin,
{
	let limit = MAX_FRAME_LEN as u64 + 1;
	buf.clear();
	let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
	if n == 0 {
		return Ok(Frame::Eof);
	}

	let terminated = buf.last() == Some(&b'\n');
	if terminated || buf.len() <= MAX_FRAME_LEN {
		if terminated {
			buf.pop();
			if buf.last() == Some(&b'\r') {
				buf.pop();
			}
		}
		return Ok(Frame::Line(String::from_utf8_lossy(buf).into_owned()));
	}

	// Discard the rest of the line in bounded chunks.
	let mut skipped = buf.len();
	loop {
		buf.clear();
		let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
		skipped += n;
		if n == 0 || buf.last() == Some(&b'\n') {
			break;
		}
	}
	buf.clear();
	Ok(Frame::Oversized(skipped))
}

async fn read_frames<R>(platform: Platform, mut reader: R, events_tx: SourceEventTx, session_id: String)
where
	R: AsyncBufRead + Unpin,
{
	let mut buf = Vec::with_capacity(4096);
	let mut seq: u64 = 0;

	let end = loop {
		match next_frame(&mut reader, &mut buf).await {
			Ok(Frame::Line(line)) => {
				if line.trim().is_empty() {
					continue;
				}
				seq += 1;
				match decode_frame(platform, &line) {
					Ok(mut ev) => {
						ev.trace = IngestTrace {
							session_id: Some(session_id.clone()),
							local_seq: Some(seq),
						};
						if events_tx.send(SourceEvent::Ingest(Box::new(ev))).await.is_err() {
							debug!(%platform, "hub channel closed; bridge reader exiting");
							return;
						}
					}
					Err(e) => warn!(%platform, seq, error = %e, "dropping malformed bridge frame"),
				}
			}
			Ok(Frame::Oversized(len)) => warn!(%platform, len, "dropping oversized bridge frame"),
			Ok(Frame::Eof) => break status_error(platform, "bridge closed the connection", "eof"),
			Err(e) => break status_error(platform, "bridge read failed", e),
		}
	};

	info!(%platform, %session_id, frames = seq, "bridge session ended");
	let _ = events_tx.send(end).await;
}

#[async_trait]
impl SourceAdapter for BridgeAdapter {
	fn platform(&self) -> Platform {
		self.platform
	}

	async fn connect(&self, events_tx: SourceEventTx) -> anyhow::Result<()> {
		let platform = self.platform;
		let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
			.await
			.map_err(|_| anyhow!("connect to {} timed out", self.addr))?
			.with_context(|| format!("connect to {}", self.addr))?;

		let session_id = new_session_id();
		info!(%platform, addr = %self.addr, %session_id, "bridge connected");
		let _ = events_tx.try_send(status(
			platform,
			true,
			format!("bridge {} connected (session_id={session_id})", self.addr),
		));

		let task = tokio::spawn(read_frames(platform, BufReader::new(stream), events_tx, session_id));
		if let Some(previous) = self.reader.lock().replace(task) {
			previous.abort();
		}
		Ok(())
	}

	async fn disconnect(&self) {
		if let Some(task) = self.reader.lock().take() {
			task.abort();
			info!(platform = %self.platform, "bridge disconnected");
		}
	}
}
