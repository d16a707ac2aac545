//! Shared test infrastructure: a long-polling client driving the engine
//! in-process, the way a browser drives it over HTTP.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use http::Method;
use serde_json::Value;

use relayio::adapters::engine::{EngineResponse, EngineServer};
use relayio::domain::engine::EngineRequest;

const POLL_TIMEOUT: Duration = Duration::from_secs(3);

pub struct PollingClient {
    engine: Arc<EngineServer>,
    pub sid: String,
}

impl PollingClient {
    /// Performs the handshake and consumes the open packet.
    pub async fn connect(engine: &Arc<EngineServer>) -> Self {
        let response = engine
            .handle_request(
                EngineRequest::new(Method::GET)
                    .with_query("EIO", "4")
                    .with_query("transport", "polling"),
            )
            .await;
        assert_eq!(response.status, 200, "handshake failed: {}", response.body);
        let open = response
            .body
            .strip_prefix('0')
            .expect("open packet first");
        let open: Value = serde_json::from_str(open).expect("open packet is JSON");
        Self {
            engine: Arc::clone(engine),
            sid: open["sid"].as_str().expect("sid in open packet").to_string(),
        }
    }

    fn request(&self, method: Method) -> EngineRequest {
        EngineRequest::new(method)
            .with_query("EIO", "4")
            .with_query("transport", "polling")
            .with_query("sid", self.sid.clone())
    }

    /// Posts engine packets, joined into one payload.
    pub async fn post(&self, packets: &[&str]) -> EngineResponse {
        let body = packets.join("\u{1e}");
        self.engine
            .handle_request(self.request(Method::POST).with_body(body))
            .await
    }

    /// Sends one socket-layer packet as an engine message.
    pub async fn send(&self, packet: &str) {
        let response = self.post(&[&format!("4{}", packet)]).await;
        assert_eq!(response.body, "ok");
    }

    /// One long-polling GET; returns the engine packets of the payload.
    pub async fn poll(&self) -> Vec<String> {
        let response = tokio::time::timeout(
            POLL_TIMEOUT,
            self.engine.handle_request(self.request(Method::GET)),
        )
        .await
        .expect("poll timed out");
        response
            .body
            .split('\u{1e}')
            .map(str::to_string)
            .collect()
    }

    /// Polls until a packet satisfies `predicate`; returns every packet seen.
    pub async fn poll_until<F>(&self, predicate: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let mut seen = Vec::new();
        for _ in 0..10 {
            let batch = self.poll().await;
            let found = batch.iter().any(|p| predicate(p));
            seen.extend(batch);
            if found {
                return seen;
            }
        }
        panic!("expected packet never arrived, saw {:?}", seen);
    }

    /// Joins `nsp` and returns the socket id from the CONNECT reply.
    pub async fn join_namespace(&self, nsp: &str, auth: Option<Value>) -> Value {
        let prefix = if nsp == "/" {
            String::new()
        } else {
            format!("{},", nsp)
        };
        let auth = auth.map(|a| a.to_string()).unwrap_or_default();
        self.send(&format!("0{}{}", prefix, auth)).await;

        let expected = format!("40{}{{", prefix);
        let packets = self.poll_until(|p| p.starts_with(&expected)).await;
        let connect = packets
            .iter()
            .find(|p| p.starts_with(&expected))
            .expect("connect reply");
        serde_json::from_str(&connect[expected.len() - 1..]).expect("connect body is JSON")
    }
}

/// Extracts the ack id of an engine-wrapped event packet (`42<id>[...]`).
pub fn ack_id(packet: &str) -> Option<u64> {
    let rest = packet.strip_prefix("42")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Extracts the JSON array of an engine-wrapped event packet.
pub fn event_data(packet: &str) -> Option<Vec<Value>> {
    let start = packet.find('[')?;
    serde_json::from_str(&packet[start..]).ok()
}
