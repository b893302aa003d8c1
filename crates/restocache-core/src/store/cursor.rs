use serde_json::Value;

use super::LocalStore;
use crate::error::Result;

/// Single-pass cursor over one collection, ascending by key.
///
/// Each step re-reads the live collection, so entries deleted ahead of the
/// cursor are skipped and entries added behind it are not revisited. Once
/// exhausted it stays exhausted.
pub struct Cursor {
    store: LocalStore,
    collection: String,
    position: Option<i64>,
    done: bool,
}

impl Cursor {
    pub(crate) fn new(store: LocalStore, collection: &str) -> Self {
        Self {
            store,
            collection: collection.to_string(),
            position: None,
            done: false,
        }
    }

    /// Advance to the next entry, returning its key and record.
    pub async fn next(&mut self) -> Result<Option<(i64, Value)>> {
        if self.done {
            return Ok(None);
        }
        match self.store.next_entry(&self.collection, self.position).await? {
            Some((key, value)) => {
                self.position = Some(key);
                Ok(Some((key, value)))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    /// Key of the entry last returned.
    pub fn key(&self) -> Option<i64> {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use crate::store::{LocalStore, OFFLINE_QUEUE};
    use serde_json::json;

    #[tokio::test]
    async fn test_cursor_walks_in_key_order() {
        let store = LocalStore::in_memory();
        for n in 1..=3 {
            store.put(OFFLINE_QUEUE, json!({ "n": n })).await.unwrap();
        }

        let mut cursor = store.open_cursor(OFFLINE_QUEUE).await.unwrap();
        let mut seen = Vec::new();
        while let Some((key, value)) = cursor.next().await.unwrap() {
            seen.push((key, value["n"].as_i64().unwrap()));
        }
        assert_eq!(seen, vec![(1, 1), (2, 2), (3, 3)]);
        assert!(cursor.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cursor_tolerates_deletes_during_iteration() {
        let store = LocalStore::in_memory();
        for n in 1..=4 {
            store.put(OFFLINE_QUEUE, json!({ "n": n })).await.unwrap();
        }

        let mut cursor = store.open_cursor(OFFLINE_QUEUE).await.unwrap();
        let (first, _) = cursor.next().await.unwrap().unwrap();
        store.delete(OFFLINE_QUEUE, first).await.unwrap();
        store.delete(OFFLINE_QUEUE, 3).await.unwrap();

        let (second, _) = cursor.next().await.unwrap().unwrap();
        let (third, _) = cursor.next().await.unwrap().unwrap();
        assert_eq!((second, third), (2, 4));
        assert_eq!(cursor.key(), Some(4));
        assert!(cursor.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cursor_on_empty_collection() {
        let store = LocalStore::in_memory();
        let mut cursor = store.open_cursor(OFFLINE_QUEUE).await.unwrap();
        assert!(cursor.next().await.unwrap().is_none());
        assert_eq!(cursor.key(), None);
    }
}
