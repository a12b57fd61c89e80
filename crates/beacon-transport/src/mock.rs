//! Scripted in-memory transport for deterministic tests.
//!
//! Replies are registered per `(method, path)` and consumed in order; the
//! last reply for a route repeats forever. Every request is recorded with
//! the tokio instant it arrived at, so tests running on a paused clock can
//! assert exact spacing between attempts.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::errors::TransportError;
use crate::http::{HeaderList, HttpResponse, Method, Transport};

/// Pre-programmed outcome for one request.
#[derive(Clone, Debug)]
pub enum MockReply {
    /// A response arrives.
    Respond(HttpResponse),
    /// No usable response.
    Fail(TransportError),
    /// Wait a duration, then produce the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    /// Response with a status and body.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Respond(HttpResponse::new(status, body))
    }

    /// `200 {"status":"ok"}`.
    pub fn ok() -> Self {
        Self::status(200, r#"{"status":"ok"}"#)
    }

    /// 200 with a JSON body.
    pub fn json(body: &serde_json::Value) -> Self {
        Self::status(200, body.to_string())
    }

    /// A rejection carrying `message`.
    pub fn rejected(status: u16, message: &str) -> Self {
        Self::status(status, serde_json::json!({ "message": message }).to_string())
    }

    /// Connection-level failure.
    pub fn network_error() -> Self {
        Self::Fail(TransportError::Network("connection refused".to_string()))
    }

    /// Wrap a reply with a delay.
    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// A request the mock received.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    /// Method.
    pub method: Method,
    /// Full URL including query.
    pub url: String,
    /// Headers as sent.
    pub headers: HeaderList,
    /// Body; empty for GET and DELETE.
    pub body: String,
    /// When the request arrived.
    pub at: Instant,
}

impl RecordedRequest {
    /// First header with this name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body parsed as JSON, `Null` when it is not JSON.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
    }

    /// Number of entries in a `{"data": [...]}` body.
    pub fn batch_len(&self) -> usize {
        self.json()["data"].as_array().map_or(0, Vec::len)
    }
}

/// Transport that answers from a script.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<MockReply>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    /// Empty script; every request fails until a route is registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `method` requests whose path ends with `path`.
    pub fn on(&self, method: Method, path: &str, reply: MockReply) -> &Self {
        self.routes
            .lock()
            .entry((method, normalize(path)))
            .or_default()
            .push_back(reply);
        self
    }

    /// Every request so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Requests that hit one route.
    pub fn requests_to(&self, method: Method, path: &str) -> Vec<RecordedRequest> {
        let route = normalize(path);
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && path_matches(&r.url, &route))
            .cloned()
            .collect()
    }

    /// How many requests hit one route.
    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests_to(method, path).len()
    }

    fn next_reply(&self, method: Method, url: &str) -> Option<MockReply> {
        let mut routes = self.routes.lock();
        let (_, queue) = routes
            .iter_mut()
            .filter(|((m, route), _)| *m == method && path_matches(url, route))
            // longest route wins so "storage/config" beats "storage"
            .max_by_key(|((_, route), _)| route.len())?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    async fn handle(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderList,
        body: String,
    ) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(RecordedRequest {
            method,
            url: url.to_string(),
            headers: headers.clone(),
            body,
            at: Instant::now(),
        });

        let mut reply = self.next_reply(method, url).ok_or_else(|| {
            TransportError::Network(format!("no mock route for {method} {url}"))
        })?;
        loop {
            match reply {
                MockReply::Respond(response) => return Ok(response),
                MockReply::Fail(err) => return Err(err),
                MockReply::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn path_matches(url: &str, route: &str) -> bool {
    let path = url.split('?').next().unwrap_or(url).trim_end_matches('/');
    path == route || path.ends_with(&format!("/{route}"))
}

#[async_trait]
impl Transport for MockTransport {
    async fn post(
        &self,
        url: &str,
        headers: &HeaderList,
        body: String,
    ) -> Result<HttpResponse, TransportError> {
        self.handle(Method::Post, url, headers, body).await
    }

    async fn get(&self, url: &str, headers: &HeaderList) -> Result<HttpResponse, TransportError> {
        self.handle(Method::Get, url, headers, String::new()).await
    }

    async fn delete(
        &self,
        url: &str,
        headers: &HeaderList,
    ) -> Result<HttpResponse, TransportError> {
        self.handle(Method::Delete, url, headers, String::new()).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
