#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use futures::{SinkExt as _, StreamExt as _};
use stagehub_protocol::{DEFAULT_MAX_MESSAGE_SIZE, OutboundMessage, decode_control, encode_message};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::server::broadcaster::BroadcastItem;
use crate::server::hub::Hub;

#[derive(Debug, Clone)]
pub struct TransportConfig {
	/// Largest text message sent to or accepted from a consumer.
	pub max_message_size: usize,
}

impl Default for TransportConfig {
	fn default() -> Self {
		Self {
			max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
		}
	}
}

/// Accept presentation consumers until the listener fails.
pub async fn serve(listener: TcpListener, hub: Arc<Hub>, cfg: TransportConfig) -> anyhow::Result<()> {
	let mut next_conn_id: u64 = 1;

	loop {
		let (stream, remote) = listener.accept().await.context("accept consumer connection")?;

		let conn_id = next_conn_id;
		next_conn_id += 1;
		metrics::counter!("stagehub_connections_total").increment(1);

		let hub = Arc::clone(&hub);
		let cfg = cfg.clone();
		tokio::spawn(async move {
			if let Err(e) = handle_connection(conn_id, remote, stream, hub, cfg).await {
				warn!(conn_id, %remote, error = %e, "consumer connection ended with error");
			}
		});
	}
}

async fn handle_connection(
	conn_id: u64,
	remote: SocketAddr,
	stream: TcpStream,
	hub: Arc<Hub>,
	cfg: TransportConfig,
) -> anyhow::Result<()> {
	let ws = tokio_tungstenite::accept_async(stream)
		.await
		.context("websocket handshake")?;
	let (mut sink, mut source) = ws.split();

	let mut items = hub.broadcaster().attach();
	info!(conn_id, %remote, "consumer attached");

	loop {
		tokio::select! {
			item = items.recv() => {
				let Some(item) = item else {
					debug!(conn_id, "broadcaster dropped consumer stream");
					break;
				};
				let Some(text) = render_item(conn_id, &item, cfg.max_message_size) else {
					continue;
				};
				sink.send(Message::Text(text.into()))
					.await
					.context("send to consumer")?;
			}

			msg = source.next() => {
				let Some(msg) = msg else {
					break;
				};
				match msg.context("read from consumer")? {
					Message::Text(text) => handle_inbound(conn_id, &hub, text.as_str(), cfg.max_message_size).await,
					Message::Close(frame) => {
						debug!(conn_id, ?frame, "consumer sent close");
						break;
					}
					_ => {}
				}
			}
		}
	}

	drop(items);
	let broadcaster = hub.broadcaster();
	broadcaster.prune();
	info!(conn_id, %remote, consumers = broadcaster.consumer_count(), "consumer detached");
	Ok(())
}

/// Wire text for one stream item; `None` when nothing should be sent.
pub(crate) fn render_item(conn_id: u64, item: &BroadcastItem, max_size: usize) -> Option<String> {
	let msg = match item {
		BroadcastItem::History(entries) => match OutboundMessage::chat_history(entries) {
			Ok(msg) => msg,
			Err(e) => {
				warn!(conn_id, error = %e, "failed to build chat history message");
				return None;
			}
		},
		BroadcastItem::Event(ev) => ev.to_message(),
		BroadcastItem::Lagged { dropped } => {
			debug!(conn_id, dropped, "consumer lagged; events were dropped");
			return None;
		}
	};

	match encode_message(&msg, max_size) {
		Ok(text) => Some(text),
		Err(e) => {
			metrics::counter!("stagehub_outbound_encode_failures_total").increment(1);
			warn!(conn_id, event = %msg.event, error = %e, "dropping outbound message");
			None
		}
	}
}

async fn handle_inbound(conn_id: u64, hub: &Hub, text: &str, max_size: usize) {
	match decode_control(text, max_size) {
		Ok(Some(control)) => {
			debug!(conn_id, ?control, "control message");
			hub.handle_control(control).await;
		}
		Ok(None) => debug!(conn_id, "ignoring unrecognised consumer message"),
		Err(e) => debug!(conn_id, error = %e, "ignoring malformed consumer message"),
	}
}
