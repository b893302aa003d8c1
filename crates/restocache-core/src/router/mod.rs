//! Request interception policy.
//!
//! Every outgoing request is classified once:
//! - API `GET`: answered from the local store when it holds matching
//!   records, otherwise fetched and mirrored into the store
//! - API mutations: not intercepted; the write queue owns those
//! - anything else: a page asset, served by the [`AssetCache`]

pub mod response;

pub use response::{Request, Response, Source};

use std::sync::Arc;

use reqwest::Url;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::api::{ApiRequest, Method, RemoteClient};
use crate::assets::AssetCache;
use crate::error::{Error, Result};
use crate::store::{LocalStore, WriteTx, BY_RESTAURANT, RESTAURANTS, REVIEWS};

/// What an API read asks the local store for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRead {
    pub collection: &'static str,
    /// `/restaurants/<id>` style lookups.
    pub key: Option<i64>,
    /// `?restaurant_id=<id>` filter on reviews, as sent. A value that is not
    /// an id matches nothing locally.
    pub restaurant_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    ApiRead(ApiRead),
    PassThrough,
    Asset,
}

pub struct Router {
    store: LocalStore,
    remote: RemoteClient,
    assets: Arc<AssetCache>,
    api_base: Option<Url>,
}

impl Router {
    pub fn new(store: LocalStore, remote: RemoteClient, assets: Arc<AssetCache>) -> Self {
        let api_base = Url::parse(remote.base_url()).ok();
        if api_base.is_none() {
            warn!(base = remote.base_url(), "API base URL does not parse, no request will be treated as an API call");
        }
        Self {
            store,
            remote,
            assets,
            api_base,
        }
    }

    pub fn classify(&self, request: &Request) -> Route {
        let Some(url) = self.api_url(&request.url) else {
            return Route::Asset;
        };
        if request.method != Method::Get {
            return Route::PassThrough;
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        if segments.contains(&"reviews") {
            let restaurant_id = url
                .query_pairs()
                .find(|(name, _)| name == "restaurant_id")
                .map(|(_, value)| value.trim().to_string());
            return Route::ApiRead(ApiRead {
                collection: REVIEWS,
                key: None,
                restaurant_id,
            });
        }

        let key = segments
            .iter()
            .position(|seg| *seg == "restaurants")
            .and_then(|i| segments.get(i + 1))
            .and_then(|id| id.parse().ok());
        Route::ApiRead(ApiRead {
            collection: RESTAURANTS,
            key,
            restaurant_id: None,
        })
    }

    /// Answer an intercepted request, or `None` when it should go to the
    /// network untouched.
    pub async fn handle(&self, request: &Request) -> Option<Response> {
        match self.classify(request) {
            Route::PassThrough => {
                debug!(method = %request.method, url = %request.url, "Passing API mutation through");
                None
            }
            Route::ApiRead(read) => Some(self.api_response(request, &read).await),
            Route::Asset => Some(self.assets.respond(&request.url).await),
        }
    }

    async fn api_response(&self, request: &Request, read: &ApiRead) -> Response {
        match self.read_local(read).await {
            Ok(Some(local)) => {
                debug!(url = %request.url, collection = read.collection, "Serving from local store");
                return Response::json(&local, Source::LocalStore);
            }
            Ok(None) => {}
            Err(e) => warn!(url = %request.url, error = %e, "Local store read failed, trying network"),
        }

        match self.remote.send(&ApiRequest::get(request.url.as_str())).await {
            Ok(body) => {
                if let Err(e) = self.mirror(read.collection, &body).await {
                    error!(url = %request.url, error = %e, "Failed to mirror response into local store");
                }
                Response::json(&body, Source::Network)
            }
            Err(e @ Error::Parse(_)) => {
                warn!(url = %request.url, error = %e, "Unparseable API response");
                Response::failure(502, "Malformed response from API", &e)
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "API read failed with nothing cached");
                Response::failure(404, "A bad request has been made and nothing is cached", &e)
            }
        }
    }

    /// Matching local records, or `None` when the store has none.
    async fn read_local(&self, read: &ApiRead) -> Result<Option<Value>> {
        if let Some(key) = read.key {
            return self.store.get(read.collection, key).await;
        }

        let records = match read.restaurant_id {
            Some(ref id) => {
                self.store
                    .get_all_by_index(read.collection, BY_RESTAURANT, &Value::from(id.as_str()))
                    .await?
            }
            None => self.store.get_all(read.collection).await?,
        };
        Ok((!records.is_empty()).then(|| Value::Array(records)))
    }

    /// Write every record in `body` into `collection` in one transaction.
    async fn mirror(&self, collection: &'static str, body: &Value) -> Result<()> {
        let records: Vec<Value> = match body {
            Value::Array(items) => items.clone(),
            Value::Object(_) => vec![body.clone()],
            _ => return Ok(()),
        };
        let count = records.len();

        self.store
            .write(|tx| {
                for record in records {
                    if let Err(e) = mirror_record(tx, collection, record) {
                        warn!(collection, error = %e, "Skipping record without a usable key");
                    }
                }
                Ok(())
            })
            .await?;
        debug!(collection, count, "Mirrored network records");
        Ok(())
    }

    fn api_url(&self, raw: &str) -> Option<Url> {
        let base = self.api_base.as_ref()?;
        let url = Url::parse(raw).ok()?;
        (url.origin() == base.origin()).then_some(url)
    }
}

/// Reviews from the server go under their server id so repeated reads
/// replace rather than duplicate them.
pub(crate) fn mirror_record(tx: &mut WriteTx<'_>, collection: &str, record: Value) -> Result<i64> {
    if collection == REVIEWS {
        let server_id = record.get("id").and_then(|id| match id {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });
        if let Some(id) = server_id {
            if tx.get(collection, id)?.as_ref().is_some_and(is_provisional) {
                return Err(Error::Storage(format!("Review key {} holds an unsynced review", id)));
            }
            return tx.put_with_key(collection, id, record);
        }
    }
    tx.put(collection, record)
}

/// True for a locally created review the server has not confirmed.
pub(crate) fn is_provisional(record: &Value) -> bool {
    record.get("unsynced").and_then(Value::as_bool).unwrap_or(false)
}
