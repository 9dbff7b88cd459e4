use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use hyper_tungstenite::tungstenite::Message;
use tokio::sync::mpsc;

use presence_server::auth::{resolve_viewer, StaticTokenAuthenticator};
use presence_server::broadcaster::Broadcaster;
use presence_server::config::Config;
use presence_server::messages::ChangeEvent;
use presence_server::reaper::Reaper;
use presence_server::state::{AppState, PresenceReport};

fn frames(rx: &mut mpsc::Receiver<Message>) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let Message::Text(text) = message {
            out.push(serde_json::from_str(&text).unwrap());
        }
    }
    out
}

fn types(frames: &[serde_json::Value]) -> Vec<&str> {
    frames.iter().map(|f| f["type"].as_str().unwrap()).collect()
}

#[tokio::test]
async fn driver_lifecycle_reaches_every_viewer_exactly_once() {
    let config = Config::default();
    let inactivity = config.inactivity_threshold_chrono();
    let mut auth = StaticTokenAuthenticator::default();
    auth.insert("early-token", "dispatch-1");
    auth.insert("late-token", "dispatch-2");
    let state = AppState::with_authenticator(config, Arc::new(auth));

    let mut broadcaster = Broadcaster::new(state.subscribers.clone());
    let reaper = Reaper::new(state.presence.clone(), inactivity);
    let t0 = Utc::now();
    let at = |secs: i64| t0 + ChronoDuration::seconds(secs);

    // A viewer already connected before anything happens.
    let early_viewer = resolve_viewer(state.auth.as_ref(), "early-token", None).unwrap();
    let (early_tx, mut early_rx) = mpsc::channel(16);
    state
        .subscribers
        .register(early_viewer, "conn-early".into(), early_tx)
        .await
        .unwrap();
    broadcaster.tick_at(at(-2)).await;

    // t=0: D1 comes online.
    state
        .presence
        .report_at("D1", PresenceReport::online_at(5.36, -4.0083), at(0))
        .await
        .unwrap();

    // t=1: a second viewer connects before the next tick.
    let late_viewer = resolve_viewer(state.auth.as_ref(), "late-token", Some("dispatch-2")).unwrap();
    let (late_tx, mut late_rx) = mpsc::channel(16);
    state
        .subscribers
        .register(late_viewer, "conn-late".into(), late_tx)
        .await
        .unwrap();

    // t=2: exactly one DriverOnline. The t=1 viewer already has D1 from its
    // bootstrap and is not told again.
    let events = broadcaster.tick_at(at(2)).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], ChangeEvent::DriverOnline { driver_id, .. } if driver_id == "D1"));

    let early = frames(&mut early_rx);
    assert_eq!(types(&early), vec!["snapshot", "driver:online"]);
    assert_eq!(early[1]["lat"], 5.36);
    let late = frames(&mut late_rx);
    assert_eq!(types(&late), vec!["snapshot"]);
    let bootstrapped = late[0]["drivers"].as_array().unwrap();
    assert_eq!(bootstrapped.len(), 1);
    assert_eq!(bootstrapped[0]["driver_id"], "D1");
    assert_eq!(bootstrapped[0]["lat"], 5.36);

    // A viewer joining after the tick learns about D1 from its bootstrap only.
    let (third_tx, mut third_rx) = mpsc::channel(16);
    state
        .subscribers
        .register("dispatch-1".into(), "conn-third".into(), third_tx)
        .await
        .unwrap();
    let third = frames(&mut third_rx);
    assert_eq!(types(&third), vec!["snapshot"]);
    assert_eq!(third[0]["drivers"][0]["driver_id"], "D1");

    // Unchanged coordinates resent: nothing on the wire.
    state
        .presence
        .report_at("D1", PresenceReport::online_at(5.36, -4.0083), at(5))
        .await
        .unwrap();
    assert!(broadcaster.tick_at(at(6)).await.is_empty());

    // t=10: new coordinate, t=12: one position update.
    state
        .presence
        .report_at("D1", PresenceReport::online_at(5.361, -4.0090), at(10))
        .await
        .unwrap();
    let events = broadcaster.tick_at(at(12)).await;
    assert!(matches!(
        &events[..],
        [ChangeEvent::DriverPositionUpdate { lat, lng, .. }] if *lat == 5.361 && *lng == -4.0090
    ));
    for rx in [&mut early_rx, &mut late_rx, &mut third_rx] {
        assert_eq!(types(&frames(rx)), vec!["driver:position:update"]);
    }

    // D1 goes silent. Nothing happens before the threshold.
    let before_threshold = at(10) + inactivity - ChronoDuration::seconds(1);
    assert!(reaper.reap_once(before_threshold).await.evicted.is_empty());
    assert!(broadcaster.tick_at(before_threshold).await.is_empty());

    let eviction = at(10) + inactivity + ChronoDuration::seconds(2);
    assert_eq!(reaper.reap_once(eviction).await.evicted, vec!["D1".to_string()]);
    let events = broadcaster.tick_at(eviction + ChronoDuration::seconds(2)).await;
    assert_eq!(
        events,
        vec![ChangeEvent::DriverOffline {
            driver_id: "D1".into()
        }]
    );
    for rx in [&mut early_rx, &mut late_rx, &mut third_rx] {
        assert_eq!(types(&frames(rx)), vec!["driver:offline"]);
    }
    assert!(broadcaster
        .tick_at(eviction + ChronoDuration::seconds(4))
        .await
        .is_empty());
}

#[tokio::test]
async fn closing_one_tab_keeps_the_other_session_live() {
    let state = AppState::new(Config {
        send_timeout: Duration::from_millis(20),
        ..Config::default()
    });
    let mut broadcaster = Broadcaster::new(state.subscribers.clone());

    let (tab_a, rx_a) = mpsc::channel(16);
    let (tab_b, mut rx_b) = mpsc::channel(16);
    state.subscribers.register("v1".into(), "a".into(), tab_a).await.unwrap();
    state.subscribers.register("v1".into(), "b".into(), tab_b).await.unwrap();
    drop(rx_a);

    state
        .presence
        .report("D7", PresenceReport::online_at(1.0, 1.0))
        .await
        .unwrap();
    broadcaster.tick_once().await;

    assert_eq!(state.subscribers.sessions_for("v1").await, 1);
    assert_eq!(types(&frames(&mut rx_b)), vec!["snapshot", "driver:online"]);
}
