//! Offline-first data layer for the restaurant review app.
//!
//! - `store`: versioned local database of restaurants, reviews and queued writes
//! - `api`: client for the backend's REST API
//! - `router`: decides how each outgoing request is answered
//! - `queue`: durable replay of mutations made while offline
//! - `assets`: versioned cache of the page shell
//! - `service`: `SyncService`, the facade tying these together

pub mod api;
pub mod assets;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod queue;
pub mod router;
pub mod service;
pub mod store;

pub use config::Config;
pub use error::{Error, QueuedWrite, Result};
pub use events::SyncEvent;
pub use models::{NewReview, Restaurant, Review};
pub use queue::{DrainOutcome, DrainReport, QueueEntry};
pub use router::{Request, Response, Source};
pub use service::SyncService;
