use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SourceType;

/// A configured content source (feed url, page to scrape, channel, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub source_type: SourceType,
    pub category: Option<String>,
    pub active: bool,
    pub config: serde_json::Value,
}

/// A keyword query consumed by search-backed adapters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub id: Uuid,
    pub query: String,
    pub category: Option<String>,
    pub active: bool,
    pub added_by: Option<String>,
}
