use std::ops::Bound::{Excluded, Unbounded};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::cursor::Cursor;
use super::schema::{self, CollectionData, DbImage, KeyPolicy, Migration, MIGRATIONS};
use crate::error::{Error, Result};

/// Handle to an open local database.
/// Clone is cheap - every clone shares the same lock and image.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    path: Option<PathBuf>,
    image: Mutex<DbImage>,
}

impl LocalStore {
    /// Open (creating or upgrading as needed) the database `name` in `dir`.
    pub async fn open(dir: &Path, name: &str) -> Result<Self> {
        Self::open_with(dir, name, MIGRATIONS).await
    }

    pub(crate) async fn open_with(dir: &Path, name: &str, migrations: &[Migration]) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::storage("Failed to create data directory", e))?;

        let path = dir.join(format!("{}.json", name));
        let mut image = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str::<DbImage>(&contents)
                .map_err(|e| Error::storage(&format!("Failed to parse database {}", name), e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DbImage::default(),
            Err(e) => return Err(Error::storage(&format!("Failed to read database {}", name), e)),
        };

        let from = image.version;
        if schema::upgrade(&mut image, migrations)? {
            persist(&path, &image).await?;
            info!(database = name, from, to = image.version, "Upgraded local database");
        }

        Ok(Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                path: Some(path),
                image: Mutex::new(image),
            }),
        })
    }

    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        let mut image = DbImage::default();
        // Upgrading an empty image cannot hit the newer-version check
        let _ = schema::upgrade(&mut image, MIGRATIONS);
        Self {
            inner: Arc::new(Inner {
                name: "memory".to_string(),
                path: None,
                image: Mutex::new(image),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub async fn version(&self) -> u32 {
        self.inner.image.lock().await.version
    }

    pub async fn get(&self, collection: &str, key: i64) -> Result<Option<Value>> {
        let image = self.inner.image.lock().await;
        Ok(collection_ref(&image, collection)?.records.get(&key).cloned())
    }

    /// All records ordered by key.
    pub async fn get_all(&self, collection: &str) -> Result<Vec<Value>> {
        let image = self.inner.image.lock().await;
        Ok(collection_ref(&image, collection)?.records.values().cloned().collect())
    }

    /// Records whose indexed field equals `value`, ordered by key.
    pub async fn get_all_by_index(&self, collection: &str, index: &str, value: &Value) -> Result<Vec<Value>> {
        let image = self.inner.image.lock().await;
        let data = collection_ref(&image, collection)?;
        let field = data.indexes.get(index).ok_or_else(|| {
            Error::Storage(format!("No index {} on collection {}", index, collection))
        })?;

        let Some(wanted) = index_key(value) else {
            return Ok(Vec::new());
        };
        Ok(data
            .records
            .values()
            .filter(|record| record.get(field).and_then(index_key).as_deref() == Some(wanted.as_str()))
            .cloned()
            .collect())
    }

    pub async fn count(&self, collection: &str) -> Result<usize> {
        let image = self.inner.image.lock().await;
        Ok(collection_ref(&image, collection)?.records.len())
    }

    /// Insert or replace a record, returning its key.
    pub async fn put(&self, collection: &str, record: Value) -> Result<i64> {
        self.write(|tx| tx.put(collection, record)).await
    }

    pub async fn delete(&self, collection: &str, key: i64) -> Result<()> {
        self.write(|tx| tx.delete(collection, key)).await
    }

    pub async fn clear(&self, collection: &str) -> Result<()> {
        self.write(|tx| tx.clear(collection)).await
    }

    /// Forward-only cursor over `collection`, ascending by key.
    pub async fn open_cursor(&self, collection: &str) -> Result<Cursor> {
        // Fail now on an unknown collection rather than at the first step
        self.count(collection).await?;
        Ok(Cursor::new(self.clone(), collection))
    }

    /// Run a write transaction.
    ///
    /// `f` works on a copy of the database. The copy replaces the live
    /// image only after `f` succeeds and the image is on disk, so a failed
    /// transaction leaves no trace.
    pub async fn write<T>(&self, f: impl FnOnce(&mut WriteTx<'_>) -> Result<T>) -> Result<T> {
        let mut image = self.inner.image.lock().await;
        let mut draft = image.clone();
        let out = f(&mut WriteTx { image: &mut draft })?;

        if let Some(ref path) = self.inner.path {
            persist(path, &draft).await?;
        }
        *image = draft;
        Ok(out)
    }

    /// First entry with a key greater than `after`.
    pub(crate) async fn next_entry(&self, collection: &str, after: Option<i64>) -> Result<Option<(i64, Value)>> {
        let image = self.inner.image.lock().await;
        let data = collection_ref(&image, collection)?;
        let entry = match after {
            Some(key) => data.records.range((Excluded(key), Unbounded)).next(),
            None => data.records.iter().next(),
        };
        Ok(entry.map(|(k, v)| (*k, v.clone())))
    }

    /// Write the current image to disk.
    pub async fn flush(&self) -> Result<()> {
        let image = self.inner.image.lock().await;
        if let Some(ref path) = self.inner.path {
            persist(path, &image).await?;
        }
        Ok(())
    }
}

/// Mutable view of the database inside [`LocalStore::write`].
pub struct WriteTx<'a> {
    image: &'a mut DbImage,
}

impl WriteTx<'_> {
    pub fn get(&self, collection: &str, key: i64) -> Result<Option<Value>> {
        Ok(collection_ref(&*self.image, collection)?.records.get(&key).cloned())
    }

    pub fn get_all(&self, collection: &str) -> Result<Vec<(i64, Value)>> {
        Ok(collection_ref(&*self.image, collection)?
            .records
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect())
    }

    /// Smallest key in `collection`.
    pub fn first_key(&self, collection: &str) -> Result<Option<i64>> {
        Ok(collection_ref(&*self.image, collection)?.records.keys().next().copied())
    }

    /// Insert or replace a record. Key-path collections read the key from
    /// the record; auto-increment collections generate one.
    pub fn put(&mut self, collection: &str, record: Value) -> Result<i64> {
        let data = collection_mut(self.image, collection)?;
        let key = match data.key {
            KeyPolicy::KeyPath(ref field) => record
                .get(field)
                .and_then(key_from_value)
                .ok_or_else(|| {
                    Error::Storage(format!("Record for {} has no usable {} key", collection, field))
                })?,
            KeyPolicy::AutoIncrement => data.next_key,
        };
        store_record(data, collection, key, record)?;
        debug!(collection, key, "Stored record");
        Ok(key)
    }

    /// Insert or replace a record under an explicit key.
    pub fn put_with_key(&mut self, collection: &str, key: i64, record: Value) -> Result<i64> {
        let data = collection_mut(self.image, collection)?;
        if let KeyPolicy::KeyPath(ref field) = data.key {
            if record.get(field).and_then(key_from_value) != Some(key) {
                return Err(Error::Storage(format!(
                    "Key {} does not match the {} field of the record",
                    key, field
                )));
            }
        }
        store_record(data, collection, key, record)?;
        debug!(collection, key, "Stored record");
        Ok(key)
    }

    pub fn delete(&mut self, collection: &str, key: i64) -> Result<()> {
        let data = collection_mut(self.image, collection)?;
        data.records
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("{} key {}", collection, key)))
    }

    pub fn clear(&mut self, collection: &str) -> Result<()> {
        collection_mut(self.image, collection)?.records.clear();
        Ok(())
    }
}

fn store_record(data: &mut CollectionData, collection: &str, key: i64, record: Value) -> Result<()> {
    // Explicit keys push the generator past them so generated keys never collide
    if data.key == KeyPolicy::AutoIncrement && key >= data.next_key {
        data.next_key = key
            .checked_add(1)
            .ok_or_else(|| Error::Storage(format!("Key space of {} is exhausted at {}", collection, key)))?;
    }
    data.records.insert(key, record);
    Ok(())
}

fn collection_ref<'a>(image: &'a DbImage, collection: &str) -> Result<&'a CollectionData> {
    image
        .collections
        .get(collection)
        .ok_or_else(|| Error::Storage(format!("Unknown collection: {}", collection)))
}

fn collection_mut<'a>(image: &'a mut DbImage, collection: &str) -> Result<&'a mut CollectionData> {
    image
        .collections
        .get_mut(collection)
        .ok_or_else(|| Error::Storage(format!("Unknown collection: {}", collection)))
}

fn key_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Canonical form used for index comparisons, so `5` and `"5"` match.
fn index_key(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.trim().to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

async fn persist(path: &Path, image: &DbImage) -> Result<()> {
    let contents = serde_json::to_vec(image).map_err(|e| Error::storage("Failed to encode database", e))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| Error::storage("Failed to write database", e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::storage("Failed to replace database", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BY_RESTAURANT, OFFLINE_QUEUE, RESTAURANTS, REVIEWS};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_key_path_put_and_get() {
        let store = LocalStore::in_memory();
        let key = store.put(RESTAURANTS, json!({"id": 4, "name": "Katz's"})).await.unwrap();
        assert_eq!(key, 4);

        // Replacing under the same id keeps one record
        store.put(RESTAURANTS, json!({"id": 4, "name": "Katz's Delicatessen"})).await.unwrap();
        assert_eq!(store.count(RESTAURANTS).await.unwrap(), 1);
        assert_eq!(
            store.get(RESTAURANTS, 4).await.unwrap(),
            Some(json!({"id": 4, "name": "Katz's Delicatessen"}))
        );
        assert_eq!(store.get(RESTAURANTS, 5).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_key_path_requires_key() {
        let store = LocalStore::in_memory();
        let err = store.put(RESTAURANTS, json!({"name": "nameless"})).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[tokio::test]
    async fn test_auto_increment_keys() {
        let store = LocalStore::in_memory();
        let a = store.put(OFFLINE_QUEUE, json!({"n": 1})).await.unwrap();
        let b = store.put(OFFLINE_QUEUE, json!({"n": 2})).await.unwrap();
        assert_eq!((a, b), (1, 2));

        // Keys are never reused after a delete
        store.delete(OFFLINE_QUEUE, b).await.unwrap();
        let c = store.put(OFFLINE_QUEUE, json!({"n": 3})).await.unwrap();
        assert_eq!(c, 3);
    }

    #[tokio::test]
    async fn test_explicit_key_advances_generator() {
        let store = LocalStore::in_memory();
        store.write(|tx| tx.put_with_key(REVIEWS, 40, json!({"restaurant_id": 1}))).await.unwrap();
        let next = store.put(REVIEWS, json!({"restaurant_id": 1})).await.unwrap();
        assert_eq!(next, 41);
    }

    #[tokio::test]
    async fn test_largest_keys_do_not_overflow() {
        let store = LocalStore::in_memory();
        // Key-path collections have no generator to advance
        store.put(RESTAURANTS, json!({"id": i64::MAX, "name": "Edge"})).await.unwrap();
        let mut cursor = store.open_cursor(RESTAURANTS).await.unwrap();
        assert_eq!(cursor.next().await.unwrap().map(|(k, _)| k), Some(i64::MAX));
        assert_eq!(cursor.next().await.unwrap(), None);

        let err = store
            .write(|tx| tx.put_with_key(REVIEWS, i64::MAX, json!({"id": i64::MAX, "restaurant_id": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(store.count(REVIEWS).await.unwrap(), 0);
        assert_eq!(store.put(REVIEWS, json!({"restaurant_id": 1})).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_keeps_key_generator() {
        let store = LocalStore::in_memory();
        store.put(OFFLINE_QUEUE, json!({"n": 1})).await.unwrap();
        store.put(OFFLINE_QUEUE, json!({"n": 2})).await.unwrap();

        store.clear(OFFLINE_QUEUE).await.unwrap();
        assert_eq!(store.count(OFFLINE_QUEUE).await.unwrap(), 0);
        assert_eq!(store.put(OFFLINE_QUEUE, json!({"n": 3})).await.unwrap(), 3);
        assert!(store.clear("menus").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = LocalStore::in_memory();
        let err = store.delete(REVIEWS, 99).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_index_lookup_matches_numbers_and_strings() {
        let store = LocalStore::in_memory();
        store.put(REVIEWS, json!({"restaurant_id": 5, "name": "a"})).await.unwrap();
        store.put(REVIEWS, json!({"restaurant_id": "5", "name": "b"})).await.unwrap();
        store.put(REVIEWS, json!({"restaurant_id": 6, "name": "c"})).await.unwrap();

        let found = store.get_all_by_index(REVIEWS, BY_RESTAURANT, &json!(5)).await.unwrap();
        let names: Vec<_> = found.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let err = store.get_all_by_index(REVIEWS, "rating", &json!(5)).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let store = LocalStore::in_memory();
        assert!(matches!(store.get_all("menus").await, Err(Error::Storage(_))));
        assert!(store.open_cursor("menus").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_transaction_applies_nothing() {
        let store = LocalStore::in_memory();
        store.put(REVIEWS, json!({"restaurant_id": 1})).await.unwrap();

        let result = store
            .write(|tx| {
                tx.put(REVIEWS, json!({"restaurant_id": 2}))?;
                tx.delete(REVIEWS, 77)
            })
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(store.count(REVIEWS).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalStore::open(dir.path(), "test-db").await.unwrap();
            assert_eq!(store.version().await, schema::CURRENT_VERSION);
            store.put(RESTAURANTS, json!({"id": 1, "name": "Mission Chinese Food"})).await.unwrap();
            store.put(OFFLINE_QUEUE, json!({"url": "/reviews/"})).await.unwrap();
        }

        let store = LocalStore::open(dir.path(), "test-db").await.unwrap();
        assert_eq!(store.get_all(RESTAURANTS).await.unwrap().len(), 1);
        // Key generator state survives too
        assert_eq!(store.put(OFFLINE_QUEUE, json!({})).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_open_upgrades_older_database() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalStore::open_with(dir.path(), "old", &MIGRATIONS[..1]).await.unwrap();
            assert_eq!(store.version().await, 1);
            store.put(RESTAURANTS, json!({"id": 2})).await.unwrap();
        }

        let store = LocalStore::open(dir.path(), "old").await.unwrap();
        assert_eq!(store.version().await, 3);
        assert_eq!(store.count(RESTAURANTS).await.unwrap(), 1);
        assert_eq!(store.count(REVIEWS).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_image_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        let err = LocalStore::open(dir.path(), "broken").await.err().unwrap();
        assert!(matches!(err, Error::Storage(_)));
    }
}
