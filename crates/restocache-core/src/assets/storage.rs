//! On-disk named caches for page assets.
//!
//! Layout: `<root>/<cache-name>/index.json` maps request keys to body files
//! in the same directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, PartialEq)]
pub struct CachedAsset {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheIndex {
    #[serde(default)]
    entries: BTreeMap<String, IndexEntry>,
    #[serde(default)]
    next_file: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    file: String,
    content_type: Option<String>,
}

/// The set of named caches under one root directory.
/// Clone is cheap - clones share the write lock.
#[derive(Clone)]
pub struct CacheStorage {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl CacheStorage {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open a cache, creating it if needed.
    pub async fn open(&self, name: &str) -> Result<Cache> {
        validate_name(name)?;
        let dir = self.root.join(name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::storage(&format!("Failed to create cache {}", name), e))?;
        Ok(Cache {
            name: name.to_string(),
            dir,
            write_lock: Arc::clone(&self.write_lock),
        })
    }

    /// Names of all caches, sorted.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(Error::storage("Failed to list caches", e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete a cache; false if it did not exist.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_dir_all(self.root.join(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::storage(&format!("Failed to delete cache {}", name), e)),
        }
    }

    /// Look `key` up in every cache, in name order.
    pub async fn match_any(&self, key: &str) -> Result<Option<CachedAsset>> {
        for name in self.keys().await? {
            let cache = Cache {
                dir: self.root.join(&name),
                name,
                write_lock: Arc::clone(&self.write_lock),
            };
            if let Some(asset) = cache.get(key).await? {
                return Ok(Some(asset));
            }
        }
        Ok(None)
    }
}

/// One named cache.
pub struct Cache {
    name: String,
    dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl Cache {
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn load_index(&self) -> Result<CacheIndex> {
        match tokio::fs::read_to_string(self.dir.join(INDEX_FILE)).await {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| Error::storage(&format!("Failed to parse index of cache {}", self.name), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CacheIndex::default()),
            Err(e) => Err(Error::storage(&format!("Failed to read index of cache {}", self.name), e)),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<CachedAsset>> {
        let index = self.load_index().await?;
        let Some(entry) = index.entries.get(key) else {
            return Ok(None);
        };
        match tokio::fs::read(self.dir.join(&entry.file)).await {
            Ok(body) => Ok(Some(CachedAsset {
                content_type: entry.content_type.clone(),
                body,
            })),
            // Index points at a body that is gone: treat as a miss
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage(&format!("Failed to read cached {}", key), e)),
        }
    }

    pub async fn put(&self, key: &str, asset: &CachedAsset) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut index = self.load_index().await?;

        let file = match index.entries.get(key) {
            Some(existing) => existing.file.clone(),
            None => {
                index.next_file += 1;
                format!("entry-{}.bin", index.next_file)
            }
        };
        tokio::fs::write(self.dir.join(&file), &asset.body)
            .await
            .map_err(|e| Error::storage(&format!("Failed to write cached {}", key), e))?;

        index.entries.insert(
            key.to_string(),
            IndexEntry {
                file,
                content_type: asset.content_type.clone(),
            },
        );
        let contents = serde_json::to_vec_pretty(&index).map_err(|e| Error::storage("Failed to encode cache index", e))?;
        let tmp = self.dir.join(format!("{}.tmp", INDEX_FILE));
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, self.dir.join(INDEX_FILE)).await?;

        debug!(cache = %self.name, key, "Cached asset");
        Ok(())
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.load_index().await?.entries.into_keys().collect())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(Error::Storage(format!("Invalid cache name: {:?}", name)));
    }
    Ok(())
}
