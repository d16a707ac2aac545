//! Engine connections driven in-process: polling exchange, upgrade probe
//! and message ordering across the transport switch.

mod common;

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use http::Method;
use tokio::sync::mpsc::UnboundedReceiver;

use common::PollingClient;
use relayio::adapters::engine::{EngineOptions, EngineServer, WebSocketLink, WsCommand};
use relayio::domain::engine::{CloseReason, EngineRequest, Frame, TransportKind};
use relayio::domain::foundation::Sid;
use relayio::ports::{EngineHandler, EngineSession};

#[derive(Default)]
struct Recorder {
    sessions: Mutex<Vec<Arc<dyn EngineSession>>>,
    messages: Mutex<Vec<String>>,
    closed: Mutex<Vec<CloseReason>>,
}

impl EngineHandler for Recorder {
    fn on_connection(&self, session: Arc<dyn EngineSession>, _request: &EngineRequest) {
        self.sessions.lock().unwrap().push(session);
    }

    fn on_message(&self, _sid: &Sid, frame: Frame) {
        if let Frame::Text(text) = frame {
            self.messages.lock().unwrap().push(text);
        }
    }

    fn on_close(&self, _sid: &Sid, reason: CloseReason) {
        self.closed.lock().unwrap().push(reason);
    }
}

impl Recorder {
    fn session(&self) -> Arc<dyn EngineSession> {
        Arc::clone(&self.sessions.lock().unwrap()[0])
    }
}

fn engine(options: EngineOptions) -> (Arc<Recorder>, Arc<EngineServer>) {
    let recorder = Arc::new(Recorder::default());
    let handler: Weak<dyn EngineHandler> = Arc::downgrade(&recorder) as Weak<dyn EngineHandler>;
    let engine = EngineServer::new(options, handler, None);
    (recorder, engine)
}

fn upgrade_request(sid: &str) -> EngineRequest {
    EngineRequest::new(Method::GET)
        .with_query("EIO", "4")
        .with_query("transport", "websocket")
        .with_query("sid", sid)
        .with_upgrade()
}

async fn next_text(rx: &mut UnboundedReceiver<WsCommand>) -> String {
    match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
        Ok(Some(WsCommand::Send(Frame::Text(text)))) => text,
        other => panic!("expected a text frame, got {:?}", other.map(|c| c.is_some())),
    }
}

async fn start_upgrade(
    engine: &Arc<EngineServer>,
    client: &PollingClient,
) -> (WebSocketLink, UnboundedReceiver<WsCommand>) {
    let mut link = engine
        .handle_upgrade(&upgrade_request(&client.sid))
        .await
        .unwrap_or_else(|r| panic!("upgrade refused: {}", r.body));
    let outbound = link.take_outbound().unwrap();
    (link, outbound)
}

#[tokio::test]
async fn polling_exchange_delivers_messages_both_ways() {
    let (recorder, engine) = engine(EngineOptions::default());
    let client = PollingClient::connect(&engine).await;

    client.post(&["4hello", "4world"]).await;
    assert_eq!(
        recorder.messages.lock().unwrap().as_slice(),
        ["hello".to_string(), "world".to_string()]
    );

    let session = recorder.session();
    session.send(Frame::Text("a".into()), false);
    session.send(Frame::Text("b".into()), false);
    assert_eq!(client.poll().await, vec!["4a".to_string(), "4b".to_string()]);
}

#[tokio::test]
async fn overlapping_polls_close_the_session() {
    let (recorder, engine) = engine(EngineOptions::default());
    let client = Arc::new(PollingClient::connect(&engine).await);

    let first = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.poll().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = engine
        .handle_request(
            EngineRequest::new(Method::GET)
                .with_query("EIO", "4")
                .with_query("transport", "polling")
                .with_query("sid", client.sid.clone()),
        )
        .await;

    assert_eq!(second.status, 400);
    assert_eq!(first.await.unwrap(), vec!["1".to_string()]);
    assert_eq!(
        recorder.closed.lock().unwrap().as_slice(),
        [CloseReason::TransportError]
    );
}

#[tokio::test]
async fn oversized_post_is_refused() {
    let (recorder, engine) = engine(EngineOptions {
        max_http_buffer_size: 8,
        ..EngineOptions::default()
    });
    let client = PollingClient::connect(&engine).await;

    let response = client.post(&["4this is far too long"]).await;

    assert_eq!(response.status, 413);
    assert_eq!(
        recorder.closed.lock().unwrap().as_slice(),
        [CloseReason::TransportError]
    );
}

#[tokio::test]
async fn upgrade_probe_switches_transport_without_losing_frames() {
    let (recorder, engine) = engine(EngineOptions::default());
    let client = Arc::new(PollingClient::connect(&engine).await);
    let session = recorder.session();

    let (link, mut ws) = start_upgrade(&engine, &client).await;

    // A pending GET is released with a noop once the probe arrives.
    let pending = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.poll().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    link.on_frame(Frame::Text("2probe".into()));
    assert_eq!(next_text(&mut ws).await, "3probe");
    assert_eq!(pending.await.unwrap(), vec!["6".to_string()]);

    // Frames sent mid-upgrade are held for the new transport.
    for i in 0..5 {
        session.send(Frame::Text(format!("m{}", i)), false);
    }
    assert!(ws.try_recv().is_err());

    link.on_frame(Frame::Text("5".into()));
    assert_eq!(session.transport(), TransportKind::Websocket);

    let mut received = Vec::new();
    for _ in 0..5 {
        received.push(next_text(&mut ws).await);
    }
    assert_eq!(received, vec!["4m0", "4m1", "4m2", "4m3", "4m4"]);
    assert!(ws.try_recv().is_err());

    session.send(Frame::Text("after".into()), false);
    assert_eq!(next_text(&mut ws).await, "4after");

    link.on_frame(Frame::Text("4from ws".into()));
    assert_eq!(
        recorder.messages.lock().unwrap().as_slice(),
        ["from ws".to_string()]
    );
}

#[tokio::test]
async fn polling_requests_after_upgrade_are_bad_requests() {
    let (_recorder, engine) = engine(EngineOptions::default());
    let client = PollingClient::connect(&engine).await;
    let (link, mut ws) = start_upgrade(&engine, &client).await;

    link.on_frame(Frame::Text("2probe".into()));
    next_text(&mut ws).await;
    // The noop owed to the polling side is served to the next GET.
    assert_eq!(client.poll().await, vec!["6".to_string()]);
    link.on_frame(Frame::Text("5".into()));

    let response = client.post(&["4late"]).await;
    assert_eq!(response.status, 400);
    assert!(response.body.contains("\"code\":3"));
}

#[tokio::test]
async fn unfinished_upgrade_times_out_and_polling_resumes() {
    let (recorder, engine) = engine(EngineOptions {
        upgrade_timeout: Duration::from_millis(50),
        ..EngineOptions::default()
    });
    let client = PollingClient::connect(&engine).await;
    let session = recorder.session();
    let (link, mut ws) = start_upgrade(&engine, &client).await;

    link.on_frame(Frame::Text("2probe".into()));
    next_text(&mut ws).await;
    assert_eq!(client.poll().await, vec!["6".to_string()]);
    session.send(Frame::Text("held".into()), false);

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(matches!(ws.recv().await, Some(WsCommand::Close) | None));
    assert_eq!(session.transport(), TransportKind::Polling);
    assert_eq!(client.poll().await, vec!["4held".to_string()]);
    assert!(recorder.closed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn second_upgrade_attempt_is_refused() {
    let (_recorder, engine) = engine(EngineOptions::default());
    let client = PollingClient::connect(&engine).await;
    let _first = start_upgrade(&engine, &client).await;

    let second = engine.handle_upgrade(&upgrade_request(&client.sid)).await;
    match second {
        Err(response) => assert_eq!(response.status, 400),
        Ok(_) => panic!("second upgrade accepted"),
    }
}

#[tokio::test]
async fn missed_heartbeat_closes_with_ping_timeout() {
    let (recorder, engine) = engine(EngineOptions {
        ping_interval: Duration::from_millis(30),
        ping_timeout: Duration::from_millis(30),
        ..EngineOptions::default()
    });
    let client = PollingClient::connect(&engine).await;

    assert_eq!(client.poll().await, vec!["2".to_string()]);
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(
        recorder.closed.lock().unwrap().as_slice(),
        [CloseReason::PingTimeout]
    );
    assert_eq!(engine.clients_count(), 0);
}

#[tokio::test]
async fn answered_heartbeat_keeps_the_session_open() {
    let (recorder, engine) = engine(EngineOptions {
        ping_interval: Duration::from_millis(30),
        ping_timeout: Duration::from_millis(100),
        ..EngineOptions::default()
    });
    let client = PollingClient::connect(&engine).await;

    for _ in 0..3 {
        assert_eq!(client.poll().await, vec!["2".to_string()]);
        client.post(&["3"]).await;
    }

    assert!(recorder.closed.lock().unwrap().is_empty());
    assert_eq!(engine.clients_count(), 1);
}
