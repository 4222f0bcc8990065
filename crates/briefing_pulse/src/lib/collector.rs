//! # Collector
//!
//! Runs every source adapter, merges what they return and drops candidates
//! that were already ingested within the recency window.

use std::collections::HashSet;

use anyhow::Context;
use briefing_datastore::{CandidateItem, DataStore, RecentItemKey, SearchQuery, Source};
use chrono::{Duration, Utc};
use futures::future::join_all;
use itertools::Itertools;

use crate::sources::SourceAdapter;

/// Exact-match recency dedup.
///
/// A candidate is dropped when its url equals a recent item's url, or its
/// normalized title equals a recent item's normalized title. Duplicates within
/// `candidates` themselves are collapsed as well (first occurrence wins).
pub fn dedup_candidates(
    candidates: Vec<CandidateItem>,
    recent: &[RecentItemKey],
) -> Vec<CandidateItem> {
    let mut seen_urls = recent
        .iter()
        .filter_map(|key| key.url.clone())
        .collect::<HashSet<_>>();
    let mut seen_titles = recent
        .iter()
        .map(|key| key.normalized_title.clone())
        .filter(|title| !title.is_empty())
        .collect::<HashSet<_>>();

    candidates
        .into_iter()
        .filter(|candidate| {
            let title = candidate.normalized_title();
            let url_seen = candidate
                .url
                .as_ref()
                .is_some_and(|url| seen_urls.contains(url));
            let title_seen = !title.is_empty() && seen_titles.contains(&title);

            if url_seen || title_seen {
                tracing::debug!(title = %candidate.title, "Dropping recently ingested item");
                return false;
            }

            if let Some(url) = &candidate.url {
                seen_urls.insert(url.clone());
            }
            if !title.is_empty() {
                seen_titles.insert(title);
            }
            true
        })
        .collect()
}

pub struct Collector {
    adapters: Vec<Box<dyn SourceAdapter>>,
    recency_window: Duration,
}

impl Default for Collector {
    fn default() -> Self {
        Collector::new(Vec::new())
    }
}

impl Collector {
    pub const DEFAULT_RECENCY_DAYS: i64 = 7;

    pub fn new(adapters: Vec<Box<dyn SourceAdapter>>) -> Self {
        Collector {
            adapters,
            recency_window: Duration::days(Self::DEFAULT_RECENCY_DAYS),
        }
    }

    pub fn with_adapter(mut self, adapter: impl SourceAdapter + 'static) -> Self {
        self.adapters.push(Box::new(adapter));
        self
    }

    pub fn with_recency_window(mut self, recency_window: Duration) -> Self {
        self.recency_window = recency_window;
        self
    }

    /// Runs one adapter, turning its failure into an empty contribution
    async fn run_adapter(
        adapter: &dyn SourceAdapter,
        sources: &[Source],
        queries: &[SearchQuery],
    ) -> Vec<CandidateItem> {
        match adapter.fetch(sources, queries).await {
            Ok(items) => {
                tracing::info!(adapter = adapter.name(), count = items.len(), "Adapter finished");
                items
            }
            Err(e) => {
                tracing::warn!(error = ?e, adapter = adapter.name(), "Adapter failed, skipping");
                Vec::new()
            }
        }
    }

    /// Rate-limited adapters run one at a time while the rest run
    /// concurrently; results are merged in registration order.
    async fn fetch_all(&self, sources: &[Source], queries: &[SearchQuery]) -> Vec<CandidateItem> {
        let (sequential, parallel): (Vec<_>, Vec<_>) = self
            .adapters
            .iter()
            .enumerate()
            .partition(|(_, adapter)| adapter.rate_limited());

        let parallel = join_all(parallel.into_iter().map(|(idx, adapter)| async move {
            (idx, Self::run_adapter(&**adapter, sources, queries).await)
        }));
        let sequential = async {
            let mut results = Vec::with_capacity(sequential.len());
            for (idx, adapter) in sequential {
                results.push((idx, Self::run_adapter(&**adapter, sources, queries).await));
            }
            results
        };

        let (parallel, sequential) = futures::join!(parallel, sequential);

        parallel
            .into_iter()
            .chain(sequential)
            .sorted_by_key(|(idx, _)| *idx)
            .flat_map(|(_, items)| items)
            .collect()
    }

    #[tracing::instrument(skip_all, fields(adapters = self.adapters.len()))]
    pub async fn collect<D: DataStore>(&self, store: &D) -> anyhow::Result<Vec<CandidateItem>> {
        let sources = store
            .active_sources()
            .await
            .context("Failed to load active sources")?;
        let queries = store
            .active_search_queries()
            .await
            .context("Failed to load search queries")?;

        let fetched = self.fetch_all(&sources, &queries).await;
        tracing::info!(count = fetched.len(), "Fetched candidates");
        if fetched.is_empty() {
            return Ok(fetched);
        }

        let since = Utc::now() - self.recency_window;
        let recent = store
            .recent_item_keys(since)
            .await
            .context("Failed to load recently ingested items")?;

        let deduped = dedup_candidates(fetched, &recent);
        tracing::info!(count = deduped.len(), recent = recent.len(), "Deduplicated candidates");

        Ok(deduped)
    }
}

#[cfg(test)]
mod tests {
    use briefing_datastore::SourceType;

    use super::*;

    fn candidate(title: &str, url: Option<&str>) -> CandidateItem {
        let item = CandidateItem::new(SourceType::Feed, title, "body");
        match url {
            Some(url) => item.with_url(url),
            None => item,
        }
    }

    fn titles(items: &[CandidateItem]) -> Vec<&str> {
        items.iter().map(|i| i.title.as_str()).collect()
    }

    #[test]
    fn test_drops_recent_url_match() {
        let recent = vec![RecentItemKey::new(Some("https://a.example/1".into()), "Other title")];
        let out = dedup_candidates(
            vec![
                candidate("Story", Some("https://a.example/1")),
                candidate("Story two", Some("https://a.example/2")),
            ],
            &recent,
        );
        assert_eq!(titles(&out), ["Story two"]);
    }

    #[test]
    fn test_drops_recent_normalized_title_match() {
        let recent = vec![RecentItemKey::new(None, "  Markets Rally ")];
        let out = dedup_candidates(
            vec![
                candidate("markets rally", Some("https://b.example/x")),
                candidate("MARKETS RALLY\t", None),
                candidate("Markets rally again", None),
            ],
            &recent,
        );
        assert_eq!(titles(&out), ["Markets rally again"]);
    }

    #[test]
    fn test_near_duplicates_are_kept() {
        let recent = vec![RecentItemKey::new(None, "Central bank raises rates")];
        let out = dedup_candidates(
            vec![candidate("Central bank raises interest rates", None)],
            &recent,
        );
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_collapses_duplicates_within_batch() {
        let out = dedup_candidates(
            vec![
                candidate("First", Some("https://c.example/1")),
                candidate("Second", Some("https://c.example/1")),
                candidate("first", Some("https://c.example/3")),
                candidate("Third", None),
            ],
            &[],
        );
        assert_eq!(titles(&out), ["First", "Third"]);
    }

    #[test]
    fn test_empty_titles_never_match() {
        let recent = vec![RecentItemKey::new(None, "")];
        let out = dedup_candidates(vec![candidate(" ", None), candidate("", None)], &recent);
        assert_eq!(out.len(), 2);
    }
}
