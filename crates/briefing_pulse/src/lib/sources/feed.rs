use std::{sync::LazyLock, time::Duration as StdDuration};

use anyhow::Context;
use async_trait::async_trait;
use briefing_datastore::{CandidateItem, SearchQuery, Source, SourceType};
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use regex::Regex;

use crate::sources::SourceAdapter;

static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

fn strip_html(text: &str) -> String {
    HTML_TAG_RE
        .replace_all(text, " ")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// RSS / Atom adapter for every active `feed` source
pub struct FeedAdapter {
    http: reqwest::Client,
    timeout: StdDuration,
    max_items_per_feed: usize,
    max_age: Duration,
}

impl Default for FeedAdapter {
    fn default() -> Self {
        FeedAdapter {
            http: reqwest::Client::new(),
            timeout: StdDuration::from_secs(15),
            max_items_per_feed: 25,
            max_age: Duration::hours(48),
        }
    }
}

impl FeedAdapter {
    /// Per-feed request timeout; a feed that does not answer in time is skipped
    pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_items_per_feed(mut self, max_items_per_feed: usize) -> Self {
        self.max_items_per_feed = max_items_per_feed;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    #[tracing::instrument(skip(self, source), fields(source = %source.name))]
    async fn fetch_feed(&self, source: &Source) -> anyhow::Result<Vec<CandidateItem>> {
        let body = self
            .http
            .get(&source.url)
            .header("Accept", "application/rss+xml, application/atom+xml, application/xml")
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        parse_feed(source, &body, Utc::now() - self.max_age, self.max_items_per_feed)
    }
}

/// Normalizes feed entries published after `not_before` (entries without a
/// date are kept)
fn parse_feed(
    source: &Source,
    body: &[u8],
    not_before: DateTime<Utc>,
    limit: usize,
) -> anyhow::Result<Vec<CandidateItem>> {
    let feed = feed_rs::parser::parse(body)
        .with_context(|| format!("Failed to parse feed {}", source.url))?;

    let items = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let title = strip_html(&entry.title?.content);
            if title.is_empty() {
                return None;
            }

            let published_at = entry.published.or(entry.updated);
            if published_at.is_some_and(|published| published < not_before) {
                return None;
            }

            let body = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content))
                .unwrap_or_default();

            let mut item = CandidateItem::new(SourceType::Feed, title, strip_html(&body))
                .with_source_id(source.id)
                .with_metadata(serde_json::json!({
                    "source_name": source.name,
                    "category": source.category,
                    "authors": entry.authors.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
                }));
            if let Some(link) = entry.links.first() {
                item = item.with_url(link.href.clone());
            }
            if let Some(published_at) = published_at {
                item = item.with_published_at(published_at);
            }

            Some(item)
        })
        .take(limit)
        .collect();

    Ok(items)
}

#[async_trait]
impl SourceAdapter for FeedAdapter {
    fn name(&self) -> &str {
        "feed"
    }

    async fn fetch(
        &self,
        sources: &[Source],
        _queries: &[SearchQuery],
    ) -> anyhow::Result<Vec<CandidateItem>> {
        let feeds = sources
            .iter()
            .filter(|s| s.source_type == SourceType::Feed)
            .collect::<Vec<_>>();

        let results = join_all(feeds.iter().map(|source| self.fetch_feed(source))).await;

        let items = feeds
            .iter()
            .zip(results)
            .flat_map(|(source, result)| match result {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(error = ?e, source = %source.name, url = %source.url, "Skipping feed");
                    Vec::new()
                }
            })
            .collect();

        Ok(items)
    }
}
