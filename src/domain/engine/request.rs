//! Transport-neutral view of an inbound engine request.

use std::collections::HashMap;

use http::Method;

/// An HTTP request addressed to the engine endpoint.
///
/// Built by the HTTP layer; the engine only looks at the method, the query
/// string and the body.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub method: Method,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Whether the request asks for a protocol upgrade.
    pub upgrade: bool,
    pub remote_addr: Option<String>,
    pub url: String,
}

impl EngineRequest {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            query: HashMap::new(),
            headers: HashMap::new(),
            body: Vec::new(),
            upgrade: false,
            remote_addr: None,
            url: String::new(),
        }
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.insert(key.to_string(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_upgrade(mut self) -> Self {
        self.upgrade = true;
        self
    }

    pub fn transport(&self) -> &str {
        self.query.get("transport").map(String::as_str).unwrap_or("")
    }

    /// Session id, ignoring an empty `sid=` parameter.
    pub fn sid(&self) -> Option<&str> {
        self.query
            .get("sid")
            .map(String::as_str)
            .filter(|sid| !sid.is_empty())
    }

    pub fn protocol(&self) -> Option<&str> {
        self.query.get("EIO").map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}
