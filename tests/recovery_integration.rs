//! Connection state recovery: a client that lost its transport comes back
//! with the same socket id, rooms and data, and receives what it missed.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use common::{event_data, PollingClient};
use relayio::application::{MiddlewareError, Server, ServerOptions, Socket};
use relayio::domain::session::RecoveryOptions;

async fn server(recovery: RecoveryOptions) -> Arc<Server> {
    Server::new(ServerOptions {
        connection_state_recovery: Some(recovery),
        ..ServerOptions::default()
    })
    .await
    .unwrap()
}

fn last_offset(packet: &str) -> String {
    event_data(packet)
        .and_then(|args| args.last().cloned())
        .and_then(|v| v.as_str().map(str::to_string))
        .expect("offset as last argument")
}

#[tokio::test]
async fn connect_reply_carries_a_private_id() {
    let server = server(RecoveryOptions::default()).await;
    let client = PollingClient::connect(server.engine()).await;
    let body = client.join_namespace("/", None).await;

    assert!(body["sid"].is_string());
    assert!(body["pid"].is_string());
    assert_ne!(body["sid"], body["pid"]);
}

#[tokio::test]
async fn emitted_events_carry_an_offset() {
    let server = server(RecoveryOptions::default()).await;
    let client = PollingClient::connect(server.engine()).await;
    client.join_namespace("/", None).await;
    let socket = server.main().sockets().pop().unwrap();

    socket.emit("direct", vec![json!(1)]).unwrap();
    server.emit("broadcast", vec![]).unwrap();

    let packets = client.poll_until(|p| p.contains("broadcast")).await;
    let direct = packets.iter().find(|p| p.contains("direct")).unwrap();
    let args = event_data(direct).unwrap();
    assert_eq!(args.len(), 3);
    assert_eq!(args[..2], [json!("direct"), json!(1)]);
    assert!(!last_offset(direct).is_empty());
}

#[tokio::test]
async fn reconnecting_client_recovers_its_session() {
    let server = server(RecoveryOptions::default()).await;
    let middleware_runs = Arc::new(AtomicUsize::new(0));
    let runs = Arc::clone(&middleware_runs);
    server.use_middleware(move |_socket: Arc<Socket>| {
        let runs = Arc::clone(&runs);
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok::<(), MiddlewareError>(())
        }
    });

    let first = PollingClient::connect(server.engine()).await;
    let body = first.join_namespace("/", None).await;
    let sid = body["sid"].as_str().unwrap().to_string();
    let pid = body["pid"].as_str().unwrap().to_string();

    let socket = server.main().sockets().pop().unwrap();
    socket.join(["room"]);
    socket.set_data(json!({"user": "alice"}));

    server.emit("seen", vec![]).unwrap();
    let packets = first.poll_until(|p| p.contains("seen")).await;
    let offset = last_offset(packets.iter().find(|p| p.contains("seen")).unwrap());

    first.post(&["1"]).await;
    assert!(server.main().sockets().is_empty());

    server.to("room").emit("missed", vec![json!("a")]).unwrap();
    server.to("elsewhere").emit("not for you", vec![]).unwrap();

    let second = PollingClient::connect(server.engine()).await;
    let body = second
        .join_namespace("/", Some(json!({"pid": pid, "offset": offset})))
        .await;
    assert_eq!(body["sid"].as_str().unwrap(), sid);
    assert_eq!(body["pid"].as_str().unwrap(), pid);

    let socket = server.main().sockets().pop().unwrap();
    assert!(socket.recovered());
    assert_eq!(socket.data(), json!({"user": "alice"}));
    assert!(socket.rooms().contains(&"room".into()));
    assert_eq!(middleware_runs.load(Ordering::SeqCst), 1);

    let replayed = second.poll_until(|p| p.contains("missed")).await;
    assert!(!replayed.iter().any(|p| p.contains("not for you")));
    let missed = replayed.iter().find(|p| p.contains("missed")).unwrap();
    let args: Vec<Value> = event_data(missed).unwrap();
    assert_eq!(args[..2], [json!("missed"), json!("a")]);
}

#[tokio::test]
async fn unknown_private_id_gets_a_fresh_session() {
    let server = server(RecoveryOptions::default()).await;
    let client = PollingClient::connect(server.engine()).await;
    let body = client
        .join_namespace("/", Some(json!({"pid": "nope", "offset": "nope"})))
        .await;

    assert_ne!(body["pid"], json!("nope"));
    let socket = server.main().sockets().pop().unwrap();
    assert!(!socket.recovered());
}

#[tokio::test]
async fn expired_session_is_not_recovered() {
    let server = server(RecoveryOptions {
        max_disconnection_duration: Duration::from_millis(20),
        ..RecoveryOptions::default()
    })
    .await;

    let first = PollingClient::connect(server.engine()).await;
    let body = first.join_namespace("/", None).await;
    let sid = body["sid"].as_str().unwrap().to_string();
    let pid = body["pid"].as_str().unwrap().to_string();

    server.emit("seen", vec![]).unwrap();
    let packets = first.poll_until(|p| p.contains("seen")).await;
    let offset = last_offset(packets.iter().find(|p| p.contains("seen")).unwrap());
    first.post(&["1"]).await;

    tokio::time::sleep(Duration::from_millis(60)).await;

    let second = PollingClient::connect(server.engine()).await;
    let body = second
        .join_namespace("/", Some(json!({"pid": pid, "offset": offset})))
        .await;
    assert_ne!(body["sid"].as_str().unwrap(), sid);
    assert!(!server.main().sockets().pop().unwrap().recovered());
}

#[tokio::test]
async fn server_initiated_disconnect_is_not_recoverable() {
    let server = server(RecoveryOptions::default()).await;
    let first = PollingClient::connect(server.engine()).await;
    let body = first.join_namespace("/", None).await;
    let pid = body["pid"].as_str().unwrap().to_string();

    server.emit("seen", vec![]).unwrap();
    let packets = first.poll_until(|p| p.contains("seen")).await;
    let offset = last_offset(packets.iter().find(|p| p.contains("seen")).unwrap());

    server.main().sockets().pop().unwrap().disconnect(false);

    let second = PollingClient::connect(server.engine()).await;
    second
        .join_namespace("/", Some(json!({"pid": pid, "offset": offset})))
        .await;
    assert!(!server.main().sockets().pop().unwrap().recovered());
}
