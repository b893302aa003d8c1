//! Data models for restaurant browsing.
//!
//! - `Restaurant`: a restaurant record keyed by its numeric id
//! - `Review`, `NewReview`: reviews, including provisional local ones
//! - `catalog`: filtering and facet helpers over a restaurant list
//!
//! Records keep every field the backend sends, known or not, so a record
//! read from the local store serializes back to what the server returned.

pub mod catalog;
pub mod restaurant;
pub mod review;

pub use restaurant::Restaurant;
pub use review::{NewReview, Review};

use serde::{de, Deserialize, Deserializer};
use serde_json::Value;

/// Accept `true`, `"true"`, `false`, `"false"` or null.
pub(crate) fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        Value::String(s) => match s.trim() {
            "true" => Ok(true),
            "false" | "" => Ok(false),
            other => Err(de::Error::custom(format!("invalid boolean flag: {}", other))),
        },
        other => Err(de::Error::custom(format!("invalid boolean flag: {}", other))),
    }
}

/// Accept a JSON number or a numeric string.
pub(crate) fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| de::Error::custom(format!("not an integer: {}", n))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("not an integer: {}", s))),
        other => Err(de::Error::custom(format!("not an integer: {}", other))),
    }
}

pub(crate) fn lenient_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => lenient_i64(value).map(Some).map_err(de::Error::custom),
    }
}
