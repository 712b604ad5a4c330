mod common;

use common::TestFleet;
use futures::StreamExt;
use rollout::services::{BroadcastHub, Notification, NotificationPublisher, DEPLOY_CHANNEL};
use serde_json::Value;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestApp {
    pub ws_address: String,
    pub hub: Arc<BroadcastHub>,
}

async fn spawn_app(hub: BroadcastHub) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let hub = Arc::new(hub);
    let fleet = TestFleet::new();
    let server = rollout::startup::run(listener, fleet.orchestrator.clone(), hub.clone())
        .await
        .expect("Failed to bind address.");
    let _ = tokio::spawn(server);

    TestApp {
        ws_address: format!("ws://127.0.0.1:{}/ws", port),
        hub,
    }
}

async fn subscribe(app: &TestApp, channel: &str) -> Socket {
    let (socket, _) = connect_async(format!("{}/{}", app.ws_address, channel))
        .await
        .expect("Failed to open websocket");
    socket
}

/// Next text frame as JSON, skipping heartbeat frames.
async fn next_notification(socket: &mut Socket) -> Value {
    let read = async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str::<Value>(&text).expect("Frame is not JSON")
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                other => panic!("Unexpected websocket frame: {:?}", other),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("No notification received")
}

#[tokio::test]
async fn subscriber_receives_published_notifications_as_json() {
    let app = spawn_app(BroadcastHub::default()).await;
    let mut socket = subscribe(&app, DEPLOY_CHANNEL).await;
    assert_eq!(app.hub.subscriber_count(DEPLOY_CHANNEL), 1);

    app.hub
        .publish(DEPLOY_CHANNEL, Notification::info("Deploying application"));
    app.hub
        .publish(DEPLOY_CHANNEL, Notification::error("Failed to start!"));

    let first = next_notification(&mut socket).await;
    assert_eq!(first["text"], "Deploying application");
    assert_eq!(first["severity"], "INFO");
    let second = next_notification(&mut socket).await;
    assert_eq!(second["text"], "Failed to start!");
    assert_eq!(second["severity"], "ERROR");
}

#[tokio::test]
async fn subscriber_only_sees_its_channel() {
    let app = spawn_app(BroadcastHub::default()).await;
    let mut socket = subscribe(&app, DEPLOY_CHANNEL).await;

    app.hub.publish("audit", Notification::info("elsewhere"));
    app.hub.publish(DEPLOY_CHANNEL, Notification::info("here"));

    assert_eq!(next_notification(&mut socket).await["text"], "here");
}

#[tokio::test]
async fn lagging_subscriber_stays_connected() {
    let app = spawn_app(BroadcastHub::new(1)).await;
    let mut socket = subscribe(&app, DEPLOY_CHANNEL).await;

    for n in 0..50 {
        app.hub
            .publish(DEPLOY_CHANNEL, Notification::info(format!("line {}", n)));
    }
    app.hub.publish(DEPLOY_CHANNEL, Notification::info("last"));

    // Older lines may be dropped, the newest one always arrives.
    loop {
        if next_notification(&mut socket).await["text"] == "last" {
            break;
        }
    }

    app.hub.publish(DEPLOY_CHANNEL, Notification::error("after the gap"));
    let after = next_notification(&mut socket).await;
    assert_eq!(after["text"], "after the gap");
    assert_eq!(after["severity"], "ERROR");
    assert_eq!(app.hub.subscriber_count(DEPLOY_CHANNEL), 1);
}

#[tokio::test]
async fn closed_socket_releases_its_subscription() {
    let app = spawn_app(BroadcastHub::default()).await;
    let mut socket = subscribe(&app, DEPLOY_CHANNEL).await;
    socket.close(None).await.expect("Failed to close websocket");

    let released = async {
        while app.hub.subscriber_count(DEPLOY_CHANNEL) > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), released)
        .await
        .expect("Subscription was not released");
}
