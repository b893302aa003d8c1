//! Scripted in-memory transport for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::transport::{ApiRequest, Method, RawResponse, Transport};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Json(Value),
    Body(&'static str, Vec<u8>),
    Status(u16),
    Refused,
}

/// Replies are consumed front to back; the last one for a route repeats.
/// Unscripted routes and every request while offline are refused.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    offline: AtomicBool,
    routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    calls: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, method: Method, url: &str, reply: Reply) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry((method, url.to_string()))
            .or_default()
            .push_back(reply);
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next_reply(&self, request: &ApiRequest) -> Reply {
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(&(request.method, request.url.clone())) {
            Some(replies) if replies.len() > 1 => replies.pop_front().unwrap_or(Reply::Refused),
            Some(replies) => replies.front().cloned().unwrap_or(Reply::Refused),
            None => Reply::Refused,
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<RawResponse> {
        self.calls.lock().unwrap().push(request.clone());
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network(format!("offline: {}", request.url)));
        }

        match self.next_reply(request) {
            Reply::Json(value) => Ok(RawResponse {
                status: 200,
                content_type: Some("application/json".to_string()),
                body: serde_json::to_vec(&value).unwrap(),
            }),
            Reply::Body(content_type, body) => Ok(RawResponse {
                status: 200,
                content_type: Some(content_type.to_string()),
                body,
            }),
            Reply::Status(status) => Err(Error::from_status(status, "scripted failure")),
            Reply::Refused => Err(Error::Network(format!("connection refused: {}", request.url))),
        }
    }
}
