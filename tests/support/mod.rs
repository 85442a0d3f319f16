#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use bytes::Bytes;
use claude_wire::error::{ApiError, WireError};
use claude_wire::transport::{ByteStream, Transport};
use serde_json::Value;

/// Scripted reply for one route.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Status { status: u16, error_type: String },
    TransportFailure(String),
    Body(Vec<Bytes>),
}

/// In-memory transport: replies are queued per `"METHOD path"` route and the
/// last reply of a route repeats once the queue is down to one.
#[derive(Debug, Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<(String, Option<Value>)>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, method: &str, path: &str, reply: Reply) -> &Self {
        self.routes
            .lock()
            .expect("routes lock")
            .entry(format!("{method} {path}"))
            .or_default()
            .push_back(reply);
        self
    }

    pub fn on_json(&self, method: &str, path: &str, value: Value) -> &Self {
        self.on(method, path, Reply::Json(value))
    }

    /// Routes called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .map(|(route, _)| route.clone())
            .collect()
    }

    /// Body of the most recent call to `route`.
    pub fn last_body(&self, route: &str) -> Option<Value> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .rev()
            .find(|(called, _)| called == route)
            .and_then(|(_, body)| body.clone())
    }

    fn reply(&self, method: &str, path: &str, body: Option<&Value>) -> Result<Reply, WireError> {
        let route = format!("{method} {path}");
        self.calls
            .lock()
            .expect("calls lock")
            .push((route.clone(), body.cloned()));
        let mut routes = self.routes.lock().expect("routes lock");
        let queue = routes
            .get_mut(&route)
            .ok_or_else(|| WireError::Transport(format!("no route for {route}")))?;
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match reply {
            Some(Reply::Status { status, error_type }) => Err(ApiError::from_status(
                status,
                error_type,
                "scripted failure",
                Some("req_fake".to_string()),
            )
            .into()),
            Some(Reply::TransportFailure(reason)) => Err(WireError::Transport(reason)),
            Some(reply) => Ok(reply),
            None => Err(WireError::Transport(format!("no reply left for {route}"))),
        }
    }

    fn json(&self, method: &str, path: &str, body: Option<&Value>) -> Result<Value, WireError> {
        match self.reply(method, path, body)? {
            Reply::Json(value) => Ok(value),
            other => Err(WireError::Transport(format!("expected JSON reply, got {other:?}"))),
        }
    }

    fn stream(&self, method: &str, path: &str, body: Option<&Value>) -> Result<ByteStream, WireError> {
        match self.reply(method, path, body)? {
            Reply::Body(chunks) => Ok(Box::pin(futures_util::stream::iter(
                chunks.into_iter().map(Ok::<Bytes, WireError>),
            ))),
            other => Err(WireError::Transport(format!("expected body reply, got {other:?}"))),
        }
    }
}

impl Transport for FakeTransport {
    async fn get_json(&self, path: &str) -> Result<Value, WireError> {
        self.json("GET", path, None)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, WireError> {
        self.json("POST", path, Some(body))
    }

    async fn delete_json(&self, path: &str) -> Result<Value, WireError> {
        self.json("DELETE", path, None)
    }

    async fn post_stream(&self, path: &str, body: &Value) -> Result<ByteStream, WireError> {
        self.stream("POST", path, Some(body))
    }

    async fn get_stream(&self, path: &str) -> Result<ByteStream, WireError> {
        self.stream("GET", path, None)
    }
}

/// Split `body` into chunks of `size` bytes.
pub fn chunked(body: &str, size: usize) -> Vec<Bytes> {
    body.as_bytes()
        .chunks(size)
        .map(Bytes::copy_from_slice)
        .collect()
}

/// One SSE frame for `event` with a JSON `data` payload.
pub fn sse(event: &str, data: &Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}
