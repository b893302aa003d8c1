//! Facade owning the store, router, write queue and asset cache.
//!
//! Collaborators (the CLI, page scripts) get a `&SyncService` and never touch
//! the components directly. Reads go through the router so they see exactly
//! what an intercepted page request would.

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::api::RemoteClient;
use crate::assets::{AssetCache, CacheStorage, InstallReport};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::SyncEvent;
use crate::models::{catalog, NewReview, Restaurant, Review};
use crate::queue::{DrainOutcome, QueueEntry, WriteQueue};
use crate::router::{mirror_record, Request, Response, Router};
use crate::store::{decode, decode_all, LocalStore, DATABASE_NAME, RESTAURANTS, REVIEWS};

/// Sub-directory of the cache dir holding the named asset caches.
const ASSET_CACHE_DIR: &str = "assets";

pub struct SyncService {
    store: LocalStore,
    remote: RemoteClient,
    router: Router,
    queue: WriteQueue,
    assets: Arc<AssetCache>,
}

impl SyncService {
    /// Open the database and caches under the configured cache directory.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let dir = config.cache_dir()?;
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;

        let store = LocalStore::open(&dir, DATABASE_NAME)
            .await
            .context("Failed to open local database")?;
        let remote = RemoteClient::http(&config.api_url).context("Failed to create HTTP client")?;
        let storage = CacheStorage::new(dir.join(ASSET_CACHE_DIR));

        info!(dir = %dir.display(), api = %config.api_url, "Opened sync service");
        Ok(Self::with_parts(store, remote, storage, config))
    }

    /// Assemble a service from already-open parts.
    pub fn with_parts(store: LocalStore, remote: RemoteClient, storage: CacheStorage, config: &Config) -> Self {
        let assets = Arc::new(AssetCache::new(storage, remote.clone(), config));
        Self {
            router: Router::new(store.clone(), remote.clone(), Arc::clone(&assets)),
            queue: WriteQueue::new(store.clone(), remote.clone()),
            store,
            remote,
            assets,
        }
    }

    /// Page-load work: drop stale asset generations and replay queued writes.
    /// Neither step failing prevents the service from being used.
    pub async fn start(&self) -> Option<DrainOutcome> {
        if let Err(e) = self.assets.activate().await {
            warn!(error = %e, "Asset cache activation failed");
        }
        match self.queue.drain().await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(error = %e, "Startup queue drain failed");
                None
            }
        }
    }

    pub async fn close(&self) -> Result<()> {
        self.store.flush().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.queue.subscribe()
    }

    // ===== Reads =====

    /// Route a raw request the way an intercepted page request would be.
    /// `None` means the request is a mutation and goes to the network as is.
    pub async fn fetch(&self, request: &Request) -> Option<Response> {
        self.router.handle(request).await
    }

    pub async fn restaurants(&self) -> Result<Vec<Restaurant>> {
        let body = self.read_json(&self.remote.restaurants_url()).await?;
        decode_all(RESTAURANTS, as_list(body))
    }

    pub async fn restaurant(&self, id: i64) -> Result<Restaurant> {
        let body = match self.read_json(&self.remote.restaurant_url(id)).await {
            Ok(body) => body,
            Err(Error::Status { status: 404, .. }) => {
                return Err(Error::NotFound(format!("Restaurant {} does not exist", id)))
            }
            Err(e) => return Err(e),
        };
        // Some backends answer a single lookup with a one-element list
        as_list(body)
            .into_iter()
            .map(|value| decode::<Restaurant>(RESTAURANTS, value))
            .find(|r| r.as_ref().map_or(true, |r| r.id == id))
            .unwrap_or_else(|| Err(Error::NotFound(format!("Restaurant {} does not exist", id))))
    }

    /// Restaurants matching both filters; `"all"` disables a filter.
    pub async fn restaurants_by(&self, cuisine: &str, neighborhood: &str) -> Result<Vec<Restaurant>> {
        let all = self.restaurants().await?;
        Ok(catalog::by_cuisine_and_neighborhood(&all, cuisine, neighborhood)
            .into_iter()
            .cloned()
            .collect())
    }

    pub async fn neighborhoods(&self) -> Result<Vec<String>> {
        Ok(catalog::neighborhoods(&self.restaurants().await?))
    }

    pub async fn cuisines(&self) -> Result<Vec<String>> {
        Ok(catalog::cuisines(&self.restaurants().await?))
    }

    pub async fn reviews(&self, restaurant_id: i64) -> Result<Vec<Review>> {
        let body = self.read_json(&self.remote.reviews_for_url(restaurant_id)).await?;
        decode_all(REVIEWS, as_list(body))
    }

    // ===== Refresh =====

    /// Overwrite local restaurants with the server's current list.
    ///
    /// Once the store holds restaurants every read is answered from it, so
    /// this is how server-side changes reach the app.
    pub async fn refresh_restaurants(&self) -> Result<usize> {
        let records = to_records(&self.remote.fetch_restaurants().await?)?;
        let count = records.len();
        self.store
            .write(|tx| {
                for record in records {
                    tx.put(RESTAURANTS, record)?;
                }
                Ok(())
            })
            .await?;
        info!(count, "Refreshed restaurants");
        Ok(count)
    }

    /// Merge the server's reviews for one restaurant into the store.
    /// Unsynced local reviews are kept.
    pub async fn refresh_reviews(&self, restaurant_id: i64) -> Result<usize> {
        let records = to_records(&self.remote.fetch_reviews(restaurant_id).await?)?;
        let count = records.len();
        self.store
            .write(|tx| {
                for record in records {
                    mirror_record(tx, REVIEWS, record)?;
                }
                Ok(())
            })
            .await?;
        info!(restaurant_id, count, "Refreshed reviews");
        Ok(count)
    }

    async fn read_json(&self, url: &str) -> Result<Value> {
        let Some(response) = self.router.handle(&Request::get(url)).await else {
            return Err(Error::Network(format!("Request was not routed: {}", url)));
        };
        if !response.is_ok() {
            return Err(Error::from_status(response.status, &response.text()));
        }
        response.body_json()
    }

    // ===== Mutations =====

    pub async fn create_review(&self, review: &NewReview) -> Result<Review> {
        self.queue.create_review(review).await
    }

    pub async fn toggle_favorite(&self, restaurant: &Restaurant) -> Result<Restaurant> {
        self.queue.toggle_favorite(restaurant).await
    }

    // ===== Queue =====

    pub async fn drain_queue(&self) -> Result<DrainOutcome> {
        self.queue.drain().await
    }

    pub async fn pending_writes(&self) -> Result<Vec<(i64, QueueEntry)>> {
        self.queue.pending().await
    }

    // ===== Assets =====

    pub async fn install_assets(&self) -> Result<InstallReport> {
        self.assets.install().await
    }

    pub async fn activate_assets(&self) -> Result<Vec<String>> {
        self.assets.activate().await
    }
}

fn to_records<T: serde::Serialize>(items: &[T]) -> Result<Vec<Value>> {
    items
        .iter()
        .map(|item| serde_json::to_value(item).map_err(|e| Error::storage("Failed to encode record", e)))
        .collect()
}

fn as_list(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{Reply, ScriptedTransport};
    use crate::api::Method;
    use crate::queue::DrainReport;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const API: &str = "http://localhost:1337";

    fn service(dir: &std::path::Path) -> (SyncService, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new());
        let remote = RemoteClient::new(transport.clone(), API);
        let service = SyncService::with_parts(
            LocalStore::in_memory(),
            remote,
            CacheStorage::new(dir.to_path_buf()),
            &Config::default(),
        );
        (service, transport)
    }

    fn catalog_json() -> Value {
        json!([
            {"id": 1, "name": "Mission Chinese Food", "neighborhood": "Manhattan", "cuisine_type": "Asian"},
            {"id": 2, "name": "Emily", "neighborhood": "Brooklyn", "cuisine_type": "Pizza"},
            {"id": 3, "name": "Kang Ho Dong Baekjeong", "neighborhood": "Manhattan", "cuisine_type": "Asian"}
        ])
    }

    #[tokio::test]
    async fn test_catalog_queries_work_offline_after_first_load() {
        let dir = tempfile::tempdir().unwrap();
        let (service, transport) = service(dir.path());
        transport.on(Method::Get, "http://localhost:1337/restaurants", Reply::Json(catalog_json()));

        assert_eq!(service.restaurants().await.unwrap().len(), 3);
        transport.set_offline(true);

        assert_eq!(service.neighborhoods().await.unwrap(), vec!["Manhattan", "Brooklyn"]);
        assert_eq!(service.cuisines().await.unwrap(), vec!["Asian", "Pizza"]);
        let names: Vec<String> = service
            .restaurants_by("Asian", "all")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["Mission Chinese Food", "Kang Ho Dong Baekjeong"]);
        assert_eq!(service.restaurant(2).await.unwrap().name, "Emily");
    }

    #[tokio::test]
    async fn test_unknown_restaurant_offline_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (service, transport) = service(dir.path());
        transport.set_offline(true);
        assert!(matches!(service.restaurant(42).await, Err(Error::NotFound(_))));
        assert!(service.restaurants().await.is_err());
    }

    #[tokio::test]
    async fn test_offline_review_is_visible_and_replayed_on_start() {
        let dir = tempfile::tempdir().unwrap();
        let (service, transport) = service(dir.path());
        transport.set_offline(true);

        let err = service.create_review(&NewReview::new(5, "Ann", 4, "Good")).await.unwrap_err();
        assert!(err.queued().is_some());
        let shown = service.reviews(5).await.unwrap();
        assert_eq!(shown.len(), 1);
        assert!(shown[0].unsynced);
        assert_eq!(service.pending_writes().await.unwrap().len(), 1);

        transport.set_offline(false);
        transport.on(
            Method::Post,
            "http://localhost:1337/reviews",
            Reply::Json(json!({"id": 31, "restaurant_id": 5, "name": "Ann", "rating": 4, "comments": "Good"})),
        );
        let outcome = service.start().await;
        assert_eq!(
            outcome,
            Some(DrainOutcome::Completed(DrainReport { replayed: 1, remaining: 0, halted_at: None, error: None }))
        );

        let shown = service.reviews(5).await.unwrap();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].id, Some(31));
        assert!(!shown[0].unsynced);
    }

    #[tokio::test]
    async fn test_refresh_replaces_cached_records() {
        let dir = tempfile::tempdir().unwrap();
        let (service, transport) = service(dir.path());
        transport.on(Method::Get, "http://localhost:1337/restaurants", Reply::Json(catalog_json()));
        service.restaurants().await.unwrap();

        transport.on(
            Method::Get,
            "http://localhost:1337/restaurants",
            Reply::Json(json!([{"id": 2, "name": "Emily Pizza", "neighborhood": "Brooklyn", "cuisine_type": "Pizza"}])),
        );
        // Cache-first: the stale copy is still served
        assert_eq!(service.restaurant(2).await.unwrap().name, "Emily");

        assert_eq!(service.refresh_restaurants().await.unwrap(), 1);
        assert_eq!(service.restaurant(2).await.unwrap().name, "Emily Pizza");
        assert_eq!(service.restaurants().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_refresh_reviews_keeps_unsynced_ones() {
        let dir = tempfile::tempdir().unwrap();
        let (service, transport) = service(dir.path());
        transport.set_offline(true);
        let _ = service.create_review(&NewReview::new(5, "Ann", 4, "Good")).await;
        assert!(service.refresh_reviews(5).await.unwrap_err().is_network());

        transport.set_offline(false);
        transport.on(
            Method::Get,
            "http://localhost:1337/reviews?restaurant_id=5",
            Reply::Json(json!([{"id": 1, "restaurant_id": 5, "name": "Raj", "rating": 3, "comments": "Fine"}])),
        );
        assert_eq!(service.refresh_reviews(5).await.unwrap(), 1);

        let shown = service.reviews(5).await.unwrap();
        assert_eq!(shown.len(), 2);
        assert_eq!(shown.iter().filter(|r| r.unsynced).count(), 1);
    }

    #[tokio::test]
    async fn test_mutation_requests_are_not_routed() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = service(dir.path());
        let request = Request::new(Method::Put, "http://localhost:1337/restaurants/1?is_favorite=true");
        assert!(service.fetch(&request).await.is_none());
    }
}
