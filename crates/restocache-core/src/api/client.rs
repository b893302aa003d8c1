//! API client for the restaurant review backend.
//!
//! Thin wrapper that builds endpoint URLs and parses JSON bodies. Every call
//! either returns a parsed body or fails with a network-class or parse error.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::transport::{ApiRequest, HttpTransport, Method, RawResponse, Transport};
use crate::error::{Error, Result};
use crate::models::{NewReview, Restaurant, Review};

/// Client for the backend API.
/// Clone is cheap - the transport is shared.
#[derive(Clone)]
pub struct RemoteClient {
    transport: Arc<dyn Transport>,
    base_url: String,
}

impl RemoteClient {
    pub fn new(transport: Arc<dyn Transport>, base_url: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Client over a reqwest transport.
    pub fn http(base_url: &str) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new()?), base_url))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ===== URLs =====

    pub fn restaurants_url(&self) -> String {
        format!("{}/restaurants", self.base_url)
    }

    pub fn restaurant_url(&self, id: i64) -> String {
        format!("{}/restaurants/{}", self.base_url, id)
    }

    pub fn reviews_url(&self) -> String {
        format!("{}/reviews", self.base_url)
    }

    pub fn reviews_for_url(&self, restaurant_id: i64) -> String {
        format!("{}/reviews?restaurant_id={}", self.base_url, restaurant_id)
    }

    pub fn favorite_url(&self, id: i64, is_favorite: bool) -> String {
        format!("{}/restaurants/{}?is_favorite={}", self.base_url, id, is_favorite)
    }

    // ===== Requests =====

    pub fn create_review_request(&self, review: &NewReview) -> ApiRequest {
        let body = serde_json::json!({
            "restaurant_id": review.restaurant_id,
            "name": review.name,
            "rating": review.rating,
            "comments": review.comments,
        });
        ApiRequest::get(self.reviews_url())
            .with_method(Method::Post)
            .with_json(body)
    }

    pub fn favorite_request(&self, id: i64, is_favorite: bool) -> ApiRequest {
        ApiRequest::get(self.favorite_url(id, is_favorite)).with_method(Method::Put)
    }

    // ===== Calls =====

    /// Send any request and parse the body as JSON.
    pub async fn send(&self, request: &ApiRequest) -> Result<Value> {
        let raw = self.transport.execute(request).await?;
        debug!(method = %request.method, url = %request.url, "API call succeeded");
        raw.json()
    }

    /// Fetch without interpreting the body (used for page assets).
    pub async fn fetch_raw(&self, url: &str) -> Result<RawResponse> {
        self.transport.execute(&ApiRequest::get(url)).await
    }

    async fn send_as<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T> {
        let value = self.send(request).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::parse(&format!("Unexpected response from {}", request.url), e))
    }

    pub async fn fetch_restaurants(&self) -> Result<Vec<Restaurant>> {
        self.send_as(&ApiRequest::get(self.restaurants_url())).await
    }

    pub async fn fetch_reviews(&self, restaurant_id: i64) -> Result<Vec<Review>> {
        self.send_as(&ApiRequest::get(self.reviews_for_url(restaurant_id))).await
    }

    pub async fn create_review(&self, review: &NewReview) -> Result<Review> {
        self.send_as(&self.create_review_request(review)).await
    }

    pub async fn set_favorite(&self, id: i64, is_favorite: bool) -> Result<Restaurant> {
        self.send_as(&self.favorite_request(id, is_favorite)).await
    }
}
