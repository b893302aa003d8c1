//! Local persistence for offline access.
//!
//! This module provides the `LocalStore`, a versioned key-value database made
//! of named collections:
//! - `restaurants`: keyed by the record's own `id`
//! - `reviews`: auto-increment keys, indexed by `restaurant_id`
//! - `offline-queue`: auto-increment keys, the write queue's durable log
//!
//! The whole database is guarded by one lock, so every write transaction
//! is applied in full or not at all, and a read issued after a write always
//! observes it.

pub mod cursor;
pub mod database;
pub mod schema;

pub use cursor::Cursor;
pub use database::{LocalStore, WriteTx};
pub use schema::{KeyPolicy, Migration, CURRENT_VERSION, MIGRATIONS};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

pub const RESTAURANTS: &str = "restaurants";
pub const REVIEWS: &str = "reviews";
pub const OFFLINE_QUEUE: &str = "offline-queue";

/// Secondary index on `reviews`.
pub const BY_RESTAURANT: &str = "restaurant_id";

/// Default database name; the image lives at `<dir>/<name>.json`.
pub const DATABASE_NAME: &str = "restaurant-db";

/// Decode a stored record into a typed model.
pub fn decode<T: DeserializeOwned>(collection: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::parse(&format!("Failed to decode {} record", collection), e))
}

/// Decode every record, failing on the first malformed one.
pub fn decode_all<T: DeserializeOwned>(collection: &str, values: Vec<Value>) -> Result<Vec<T>> {
    values.into_iter().map(|v| decode(collection, v)).collect()
}
