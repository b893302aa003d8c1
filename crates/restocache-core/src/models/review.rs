use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{lenient_i64, lenient_opt_i64};

/// A review as stored locally or returned by the server.
///
/// Reviews written while offline have no server `id` and carry
/// `unsynced: true` until replay swaps them for the server's copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    #[serde(default, deserialize_with = "lenient_opt_i64", skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub restaurant_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_opt_i64")]
    pub rating: Option<i64>,
    #[serde(default)]
    pub comments: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unsynced: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parameters of a review the user is submitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReview {
    pub restaurant_id: i64,
    pub name: String,
    pub rating: i64,
    pub comments: String,
}

impl NewReview {
    pub fn new(restaurant_id: i64, name: impl Into<String>, rating: i64, comments: impl Into<String>) -> Self {
        Self {
            restaurant_id,
            name: name.into(),
            rating,
            comments: comments.into(),
        }
    }

    /// Local stand-in for the review until the server acknowledges it.
    pub fn provisional(&self) -> Review {
        let mut extra = Map::new();
        extra.insert("createdAt".to_string(), Value::from(Utc::now().timestamp_millis()));
        Review {
            id: None,
            restaurant_id: self.restaurant_id,
            name: self.name.clone(),
            rating: Some(self.rating),
            comments: self.comments.clone(),
            unsynced: true,
            extra,
        }
    }
}
