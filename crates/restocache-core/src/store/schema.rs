//! Schema versions and the ordered migration list.
//!
//! Each migration only adds a collection or an index and checks for it
//! first, so reapplying any step to a database that already has it is a
//! no-op.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{BY_RESTAURANT, OFFLINE_QUEUE, RESTAURANTS, REVIEWS};
use crate::error::{Error, Result};

/// How a collection assigns primary keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    /// Key read from this field of the record.
    KeyPath(String),
    /// Key generated from a monotonic counter unless supplied.
    AutoIncrement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CollectionData {
    pub key: KeyPolicy,
    /// Index name -> indexed field.
    #[serde(default)]
    pub indexes: BTreeMap<String, String>,
    #[serde(default = "first_key")]
    pub next_key: i64,
    #[serde(default)]
    pub records: BTreeMap<i64, Value>,
}

fn first_key() -> i64 {
    1
}

impl CollectionData {
    fn new(key: KeyPolicy) -> Self {
        Self {
            key,
            indexes: BTreeMap::new(),
            next_key: first_key(),
            records: BTreeMap::new(),
        }
    }
}

/// Serialized form of a whole database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct DbImage {
    pub version: u32,
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionData>,
}

impl DbImage {
    fn ensure_collection(&mut self, name: &str, key: KeyPolicy) {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| CollectionData::new(key));
    }

    fn ensure_index(&mut self, collection: &str, index: &str, field: &str) {
        if let Some(data) = self.collections.get_mut(collection) {
            data.indexes
                .entry(index.to_string())
                .or_insert_with(|| field.to_string());
        }
    }
}

/// One step of the upgrade path, applied when the stored version is below
/// `version`.
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub(crate) apply: fn(&mut DbImage),
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create restaurants keyed by id",
        apply: create_restaurants,
    },
    Migration {
        version: 2,
        description: "create reviews with restaurant_id index",
        apply: create_reviews,
    },
    Migration {
        version: 3,
        description: "create offline queue",
        apply: create_offline_queue,
    },
];

fn create_restaurants(db: &mut DbImage) {
    db.ensure_collection(RESTAURANTS, KeyPolicy::KeyPath("id".to_string()));
}

fn create_reviews(db: &mut DbImage) {
    db.ensure_collection(REVIEWS, KeyPolicy::AutoIncrement);
    db.ensure_index(REVIEWS, BY_RESTAURANT, "restaurant_id");
}

fn create_offline_queue(db: &mut DbImage) {
    db.ensure_collection(OFFLINE_QUEUE, KeyPolicy::AutoIncrement);
}

pub const CURRENT_VERSION: u32 = 3;

/// Bring `image` up to the last version in `migrations`.
///
/// Returns true when any step ran. A stored version newer than the code
/// knows about blocks the upgrade.
pub(crate) fn upgrade(image: &mut DbImage, migrations: &[Migration]) -> Result<bool> {
    let target = migrations.last().map(|m| m.version).unwrap_or(0);
    if image.version > target {
        return Err(Error::Storage(format!(
            "database version {} is newer than supported version {}",
            image.version, target
        )));
    }

    let from = image.version;
    let mut upgraded = false;
    for migration in migrations.iter().filter(|m| m.version > from) {
        (migration.apply)(image);
        image.version = migration.version;
        upgraded = true;
        info!(version = migration.version, step = migration.description, "Migrated local database");
    }
    Ok(upgraded)
}
