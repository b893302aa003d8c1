//! Versioned cache of the page shell.
//!
//! The cache name is `<prefix><version>`. Installing fills the current
//! generation from a fixed manifest; activating deletes every older
//! generation sharing the prefix. Requests are served cache-first.

pub mod storage;

pub use storage::{Cache, CacheStorage, CachedAsset};

use futures::stream::{self, StreamExt};
use reqwest::Url;
use tracing::{debug, info, warn};

use crate::api::RemoteClient;
use crate::config::Config;
use crate::error::Result;
use crate::router::{Response, Source};

/// Maximum concurrent fetches while pre-populating the cache.
const MAX_CONCURRENT_FETCHES: usize = 4;

/// Shell assets cached on install, before the detail pages.
const SHELL_ASSETS: &[&str] = &[
    "/index.html",
    "/css/styles.css",
    "/js/dbhelper.js",
    "/js/register_sw.js",
    "/js/main.js",
    "/js/restaurant_info.js",
];

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".gif"];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub cached: usize,
    pub failed: Vec<String>,
}

pub struct AssetCache {
    storage: CacheStorage,
    remote: RemoteClient,
    app_url: String,
    prefix: String,
    version: u32,
    detail_pages: u32,
    offline_image: String,
}

impl AssetCache {
    pub fn new(storage: CacheStorage, remote: RemoteClient, config: &Config) -> Self {
        Self {
            storage,
            remote,
            app_url: config.app_url.trim_end_matches('/').to_string(),
            prefix: config.static_cache_prefix.clone(),
            version: config.static_cache_version,
            detail_pages: config.detail_pages,
            offline_image: config.offline_image.clone(),
        }
    }

    pub fn cache_name(&self) -> String {
        format!("{}{}", self.prefix, self.version)
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    /// Paths pre-populated on install, relative to the app root.
    pub fn manifest(&self) -> Vec<String> {
        let mut paths: Vec<String> = SHELL_ASSETS.iter().map(|p| p.to_string()).collect();
        paths.extend((1..=self.detail_pages).map(|id| format!("/restaurant.html?id={}", id)));
        paths.push(self.offline_image.clone());
        paths
    }

    /// Fill the current generation from the manifest.
    ///
    /// Individual fetch or write failures are logged and reported, never
    /// fatal; only failing to open the cache itself is an error.
    pub async fn install(&self) -> Result<InstallReport> {
        let cache = self.storage.open(&self.cache_name()).await?;
        let cache = &cache;

        let results: Vec<(String, Result<()>)> = stream::iter(self.manifest())
            .map(|path| async move {
                let url = format!("{}{}", self.app_url, path);
                let outcome = match self.remote.fetch_raw(&url).await {
                    Ok(raw) => {
                        let asset = CachedAsset {
                            content_type: raw.content_type,
                            body: raw.body,
                        };
                        cache.put(&path, &asset).await
                    }
                    Err(e) => Err(e),
                };
                (path, outcome)
            })
            .buffer_unordered(MAX_CONCURRENT_FETCHES)
            .collect()
            .await;

        let mut report = InstallReport::default();
        for (path, outcome) in results {
            match outcome {
                Ok(()) => report.cached += 1,
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to pre-cache asset");
                    report.failed.push(path);
                }
            }
        }
        report.failed.sort();
        info!(cache = %cache.name(), cached = report.cached, failed = report.failed.len(), "Installed asset cache");
        Ok(report)
    }

    /// Delete every cache with our prefix except the current generation.
    /// Caches with unrelated names are left alone.
    pub async fn activate(&self) -> Result<Vec<String>> {
        let current = self.cache_name();
        let mut deleted = Vec::new();
        for name in self.storage.keys().await? {
            if name.starts_with(&self.prefix) && name != current {
                self.storage.delete(&name).await?;
                info!(cache = %name, "Deleted old asset cache");
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    /// Serve a page asset: cache first, then network, then the offline
    /// placeholder for images, then a synthetic 404.
    pub async fn respond(&self, url: &str) -> Response {
        let key = cache_key(url);

        match self.storage.match_any(&key).await {
            Ok(Some(asset)) => {
                debug!(key = %key, "Asset cache hit");
                return Response::bytes(asset.content_type, asset.body, Source::AssetCache);
            }
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Asset cache lookup failed"),
        }

        let error = match self.remote.fetch_raw(url).await {
            Ok(raw) => {
                self.warm(&key, &raw.content_type, &raw.body).await;
                return Response::bytes(raw.content_type, raw.body, Source::Network);
            }
            Err(e) => e,
        };

        if is_image(&key) {
            if let Ok(Some(placeholder)) = self.storage.match_any(&self.offline_image).await {
                debug!(key = %key, "Serving offline placeholder image");
                return Response::bytes(placeholder.content_type, placeholder.body, Source::OfflinePlaceholder);
            }
        }

        warn!(url = %url, error = %error, "Asset unavailable offline");
        Response::failure(404, "You are not connected to the internet", &error)
    }

    /// Best-effort write of a fetched asset into the current generation.
    async fn warm(&self, key: &str, content_type: &Option<String>, body: &[u8]) {
        let asset = CachedAsset {
            content_type: content_type.clone(),
            body: body.to_vec(),
        };
        let result: Result<()> = async {
            let cache = self.storage.open(&self.cache_name()).await?;
            cache.put(key, &asset).await
        }
        .await;
        if let Err(e) = result {
            warn!(key = %key, error = %e, "Failed to warm asset cache");
        }
    }
}

/// Path plus query of `url`, the key assets are cached under.
pub fn cache_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        },
        // Already relative
        Err(_) => url.to_string(),
    }
}

/// True when the path (ignoring any query) names an image file.
pub fn is_image(key: &str) -> bool {
    let path = key.split(['?', '#']).next().unwrap_or(key).to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}
