use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    Feed,
    WebSearch,
    Transcript,
    Scrape,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Feed => "feed",
            SourceType::WebSearch => "web-search",
            SourceType::Transcript => "transcript",
            SourceType::Scrape => "scrape",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feed" => Ok(SourceType::Feed),
            "web-search" => Ok(SourceType::WebSearch),
            "transcript" => Ok(SourceType::Transcript),
            "scrape" => Ok(SourceType::Scrape),
            other => Err(DomainError::UnknownSourceType(other.to_string())),
        }
    }
}

impl TryFrom<String> for SourceType {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Lowercased, trimmed title used for exact-match recency dedup
pub fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Content fetched by a source adapter, before it has been persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub source_id: Option<Uuid>,
    pub source_type: SourceType,
    pub title: String,
    pub url: Option<String>,
    pub content: String,
    pub content_snippet: String,
    pub published_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

impl CandidateItem {
    pub const SNIPPET_MAX_CHARS: usize = 500;

    pub fn new(
        source_type: SourceType,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let content_snippet = Self::snippet_of(&content);

        CandidateItem {
            source_id: None,
            source_type,
            title: title.into(),
            url: None,
            content,
            content_snippet,
            published_at: None,
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_source_id(mut self, source_id: Uuid) -> Self {
        self.source_id = Some(source_id);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn normalized_title(&self) -> String {
        normalize_title(&self.title)
    }

    fn snippet_of(content: &str) -> String {
        let trimmed = content.trim();
        match trimmed.char_indices().nth(Self::SNIPPET_MAX_CHARS) {
            Some((idx, _)) => trimmed[..idx].to_string(),
            None => trimmed.to_string(),
        }
    }
}

/// A persisted [`CandidateItem`] with a durable identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub id: Uuid,
    pub source_id: Option<Uuid>,
    pub source_type: SourceType,
    pub title: String,
    pub url: Option<String>,
    pub content: String,
    pub content_snippet: String,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub relevance_score: Option<f64>,
    pub episode_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub embedded: bool,
}

impl RawItem {
    /// Builds the in-memory representation of a freshly inserted candidate
    pub fn from_candidate(id: Uuid, fetched_at: DateTime<Utc>, candidate: CandidateItem) -> Self {
        RawItem {
            id,
            source_id: candidate.source_id,
            source_type: candidate.source_type,
            title: candidate.title,
            url: candidate.url,
            content: candidate.content,
            content_snippet: candidate.content_snippet,
            published_at: candidate.published_at,
            fetched_at,
            relevance_score: None,
            episode_id: None,
            metadata: candidate.metadata,
            embedded: false,
        }
    }
}

/// Identifying fields of a recently ingested item
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecentItemKey {
    pub url: Option<String>,
    pub normalized_title: String,
}

impl RecentItemKey {
    pub fn new(url: Option<String>, title: &str) -> Self {
        RecentItemKey {
            url,
            normalized_title: normalize_title(title),
        }
    }
}
