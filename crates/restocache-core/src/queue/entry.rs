use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::ApiRequest;

/// What a queued write does, used for reconciliation after replay and for
/// coalescing favorite changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WriteKind {
    Review,
    Favorite { restaurant_id: i64, is_favorite: bool },
}

/// One mutation that has not been acknowledged by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    #[serde(flatten)]
    pub request: ApiRequest,
    pub kind: WriteKind,
    /// Local key of the provisional review this write will replace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_key: Option<i64>,
    pub queued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn review(request: ApiRequest, review_key: i64) -> Self {
        Self {
            request,
            kind: WriteKind::Review,
            review_key: Some(review_key),
            queued_at: Utc::now(),
        }
    }

    pub fn favorite(request: ApiRequest, restaurant_id: i64, is_favorite: bool) -> Self {
        Self {
            request,
            kind: WriteKind::Favorite { restaurant_id, is_favorite },
            review_key: None,
            queued_at: Utc::now(),
        }
    }

    /// Short human description for logs and listings.
    pub fn describe(&self) -> String {
        match self.kind {
            WriteKind::Review => format!("review (local #{})", self.review_key.unwrap_or_default()),
            WriteKind::Favorite { restaurant_id, is_favorite } => {
                let verb = if is_favorite { "favorite" } else { "unfavorite" };
                format!("{} restaurant {}", verb, restaurant_id)
            }
        }
    }

    pub fn favorite_of(&self) -> Option<i64> {
        match self.kind {
            WriteKind::Favorite { restaurant_id, .. } => Some(restaurant_id),
            WriteKind::Review => None,
        }
    }
}
