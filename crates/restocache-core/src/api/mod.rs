//! REST API client module for the restaurant review backend.
//!
//! This module provides the `RemoteClient` for the backend's JSON API and
//! the `Transport` seam underneath it. `HttpTransport` is the production
//! transport; nothing here retries, that is the write queue's job.

pub mod client;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::RemoteClient;
pub use transport::{ApiRequest, HttpTransport, Method, RawResponse, Transport};
