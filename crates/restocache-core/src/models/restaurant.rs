use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::lenient_bool;
use super::lenient_i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
    #[serde(deserialize_with = "lenient_i64")]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighborhood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuisine_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_favorite: bool,
    /// Address, opening hours, lat/lng and anything else the backend sends.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Restaurant {
    /// Detail page path, relative to the app root.
    pub fn page_path(&self) -> String {
        format!("/restaurant.html?id={}", self.id)
    }

    pub fn image_path(&self) -> String {
        format!("/img/{}.jpg", self.id)
    }

    pub fn display_neighborhood(&self) -> &str {
        self.neighborhood.as_deref().unwrap_or("Unknown")
    }

    pub fn display_cuisine(&self) -> &str {
        self.cuisine_type.as_deref().unwrap_or("Unknown")
    }
}
