#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use serde_json::{Value, json};
use stagehub_domain::{EventKind, Platform};
use stagehub_protocol::{ChatEntry, NormalizedEvent};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use crate::server::broadcaster::{BroadcastItem, Broadcaster, BroadcasterConfig};
use crate::server::cooldown::VipList;
use crate::server::hub::{Hub, HubConfig, HubDeps};
use crate::server::resolver::UnconfiguredResolver;
use crate::server::supervisor::ConnectionSupervisor;
use crate::server::transport::{TransportConfig, render_item, serve};

type Client = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn test_hub() -> Arc<Hub> {
	let (hub, _rx) = Hub::new(
		HubConfig::default(),
		HubDeps {
			resolver: Arc::new(UnconfiguredResolver),
			broadcaster: Broadcaster::new(BroadcasterConfig::default()),
			supervisor: ConnectionSupervisor::new(),
			vip: VipList::default(),
			live: None,
			health: None,
		},
	);
	hub
}

async fn start(hub: Arc<Hub>) -> Client {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(serve(listener, hub, TransportConfig::default()));

	let (client, _resp) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
	client
}

async fn next_json(client: &mut Client) -> Value {
	loop {
		let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
			.await
			.expect("timed out waiting for a message")
			.expect("stream ended")
			.expect("websocket error");
		if let Message::Text(text) = msg {
			return serde_json::from_str(text.as_str()).unwrap();
		}
	}
}

fn chat(text: &str) -> NormalizedEvent {
	NormalizedEvent::from_value(
		EventKind::Chat,
		Platform::Twitch,
		json!({ "userId": "1", "nickname": "alice", "text": text, "timestamp": 0, "time": "00:00" }),
	)
}

#[tokio::test]
async fn new_consumer_gets_history_then_live_events() {
	let hub = test_hub();
	hub.broadcaster().publish(chat("before"));
	let mut client = start(Arc::clone(&hub)).await;

	let history = next_json(&mut client).await;
	assert_eq!(history["event"], "chatHistory");
	assert!(history.get("platform").is_none());
	assert_eq!(history["data"][0]["text"], "before");
	assert_eq!(history["data"][0]["nickname"], "alice");

	hub.broadcaster().publish(chat("after"));
	let live = next_json(&mut client).await;
	assert_eq!(live["event"], "chat");
	assert_eq!(live["platform"], "twitch");
	assert_eq!(live["data"]["text"], "after");
}

#[tokio::test]
async fn track_ended_control_advances_playback() {
	let hub = test_hub();
	let mut client = start(hub).await;
	assert_eq!(next_json(&mut client).await["event"], "chatHistory");

	client
		.send(Message::Text(r#"{"event":"trackEnded"}"#.into()))
		.await
		.unwrap();

	let stop = next_json(&mut client).await;
	assert_eq!(stop["event"], "music_stop");
	assert_eq!(stop["data"]["reason"], "queue_empty");
	assert_eq!(next_json(&mut client).await["event"], "queue");
}

#[tokio::test]
async fn malformed_input_keeps_the_connection() {
	let hub = test_hub();
	let mut client = start(Arc::clone(&hub)).await;
	assert_eq!(next_json(&mut client).await["event"], "chatHistory");

	client.send(Message::Text("not json".into())).await.unwrap();
	client.send(Message::Text(r#"{"event":"hello"}"#.into())).await.unwrap();

	hub.broadcaster().publish(chat("still here"));
	assert_eq!(next_json(&mut client).await["data"]["text"], "still here");
}

#[test]
fn oversized_and_lag_items_are_not_sent() {
	let big = BroadcastItem::Event(Arc::new(chat(&"x".repeat(256))));
	assert!(render_item(1, &big, 64).is_none());
	assert!(render_item(1, &big, 4096).is_some());
	assert!(render_item(1, &BroadcastItem::Lagged { dropped: 3 }, 4096).is_none());

	let empty = BroadcastItem::History(Arc::new(Vec::<ChatEntry>::new()));
	let text = render_item(1, &empty, 4096).unwrap();
	assert_eq!(text, r#"{"event":"chatHistory","data":[]}"#);
}
