#![forbid(unsafe_code)]

use std::time::Duration;

use serde_json::json;
use stagehub_domain::{EventKind, Platform};
use stagehub_protocol::NormalizedEvent;
use tokio::time::timeout;

use crate::server::broadcaster::{BroadcastItem, Broadcaster, BroadcasterConfig};

fn chat(text: &str) -> NormalizedEvent {
	NormalizedEvent::from_value(
		EventKind::Chat,
		Platform::Twitch,
		json!({ "userId": "u1", "nickname": "User", "text": text, "timestamp": 1, "time": "12:00" }),
	)
}

fn follow() -> NormalizedEvent {
	NormalizedEvent::from_value(EventKind::Follow, Platform::TikTok, json!({ "userId": "t1" }))
}

async fn recv(rx: &mut tokio::sync::mpsc::Receiver<BroadcastItem>) -> BroadcastItem {
	timeout(Duration::from_millis(250), rx.recv())
		.await
		.expect("expected to receive within timeout")
		.expect("channel open")
}

#[tokio::test]
async fn history_is_delivered_before_live_events() {
	let hub = Broadcaster::new(BroadcasterConfig::default());
	hub.publish(chat("before-1"));
	hub.publish(follow());
	hub.publish(chat("before-2"));

	let mut rx = hub.attach();
	hub.publish(chat("after"));

	match recv(&mut rx).await {
		BroadcastItem::History(entries) => {
			let texts: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();
			assert_eq!(texts, vec!["before-1", "before-2"]);
		}
		other => panic!("expected History first, got: {other:?}"),
	}

	match recv(&mut rx).await {
		BroadcastItem::Event(ev) => assert_eq!(ev.data_str("text"), Some("after")),
		other => panic!("expected Event, got: {other:?}"),
	}
}

#[tokio::test]
async fn every_consumer_sees_events_in_emission_order() {
	let hub = Broadcaster::new(BroadcasterConfig::default());
	let mut a = hub.attach();
	let mut b = hub.attach();

	for n in 0..5 {
		hub.publish(chat(&format!("m{n}")));
	}

	for rx in [&mut a, &mut b] {
		assert!(matches!(recv(rx).await, BroadcastItem::History(_)));
		for n in 0..5 {
			match recv(rx).await {
				BroadcastItem::Event(ev) => assert_eq!(ev.data_str("text"), Some(format!("m{n}").as_str())),
				other => panic!("expected Event, got: {other:?}"),
			}
		}
	}
}

#[tokio::test]
async fn full_consumer_drops_and_reports_lag() {
	let hub = Broadcaster::new(BroadcasterConfig {
		consumer_queue_capacity: 2,
		history_capacity: 50,
		debug_logs: true,
	});
	let mut rx = hub.attach();

	// History + 2 events fill the queue; the next two are dropped.
	for n in 0..4 {
		hub.publish(chat(&format!("m{n}")));
	}

	assert!(matches!(recv(&mut rx).await, BroadcastItem::History(_)));
	assert!(matches!(recv(&mut rx).await, BroadcastItem::Event(_)));
	assert!(matches!(recv(&mut rx).await, BroadcastItem::Event(_)));

	hub.publish(chat("m4"));
	match recv(&mut rx).await {
		BroadcastItem::Event(ev) => assert_eq!(ev.data_str("text"), Some("m4")),
		other => panic!("expected Event, got: {other:?}"),
	}
	match recv(&mut rx).await {
		BroadcastItem::Lagged { dropped } => assert_eq!(dropped, 2),
		other => panic!("expected Lagged, got: {other:?}"),
	}

	// History still recorded every line.
	assert_eq!(hub.history_snapshot().len(), 5);
}

#[tokio::test]
async fn detached_consumers_are_pruned() {
	let hub = Broadcaster::new(BroadcasterConfig::default());
	{
		let _rx = hub.attach();
		assert_eq!(hub.consumer_count(), 1);
	}
	hub.publish(follow());
	assert_eq!(hub.consumer_count(), 0);
}

#[tokio::test]
async fn publishing_without_consumers_still_records_history() {
	let hub = Broadcaster::new(BroadcasterConfig::default());
	hub.publish(chat("nobody listening"));
	assert_eq!(hub.history_snapshot().len(), 1);
}
