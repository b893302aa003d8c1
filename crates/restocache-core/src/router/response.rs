use std::fmt;

use serde_json::Value;

use crate::api::Method;
use crate::error::{Error, Result};

/// An intercepted request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
        }
    }

    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
        }
    }
}

/// Where a response body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    LocalStore,
    Network,
    AssetCache,
    OfflinePlaceholder,
    Synthetic,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Source::LocalStore => "local store",
            Source::Network => "network",
            Source::AssetCache => "asset cache",
            Source::OfflinePlaceholder => "offline placeholder",
            Source::Synthetic => "synthetic",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub source: Source,
}

impl Response {
    pub fn json(value: &Value, source: Source) -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            content_type: Some("application/json".to_string()),
            // Serializing a Value cannot fail
            body: serde_json::to_vec(value).unwrap_or_default(),
            source,
        }
    }

    pub fn bytes(content_type: Option<String>, body: Vec<u8>, source: Source) -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            content_type,
            body,
            source,
        }
    }

    /// Failure response carrying the error text as its body.
    pub fn failure(status: u16, status_text: &str, error: &Error) -> Self {
        Self {
            status,
            status_text: status_text.to_string(),
            content_type: Some("text/plain".to_string()),
            body: error.to_string().into_bytes(),
            source: Source::Synthetic,
        }
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn body_json(&self) -> Result<Value> {
        serde_json::from_slice(&self.body).map_err(|e| Error::parse("Response body is not JSON", e))
    }
}
