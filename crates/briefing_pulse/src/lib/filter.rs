//! # Relevance Filter
//!
//! Scores the collected items with one batched generation request and keeps a
//! bounded, high-quality subset for the day's script.

use std::collections::{HashMap, HashSet};

use briefing_datastore::{RawItem, SourceType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, GenerationRequest, TextGenerator, TokenUsage};

/// A raw item with the relevance score it was given
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredItem {
    pub item: RawItem,
    pub relevance_score: f64,
    pub score_reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionPolicy {
    pub min_score: f64,
    pub min_items: usize,
    pub max_items: usize,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        SelectionPolicy {
            min_score: 6.0,
            min_items: 8,
            max_items: 12,
        }
    }
}

/// Sorts by descending score (stable) and applies the selection bounds.
///
/// Everything at or above `min_score` is kept; when that is fewer than
/// `min_items` the top `min_items` are taken regardless of score. The result
/// never exceeds `max_items`.
pub fn select_items(mut scored: Vec<ScoredItem>, policy: &SelectionPolicy) -> Vec<ScoredItem> {
    scored.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));

    let passing = scored
        .iter()
        .take_while(|s| s.relevance_score >= policy.min_score)
        .count();
    let keep = if passing >= policy.min_items {
        passing
    } else {
        policy.min_items.min(scored.len())
    };

    scored.truncate(keep.min(policy.max_items));
    scored
}

/// Bounds on the single batched scoring request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringSettings {
    /// Most items sent in one request; the newest are kept
    pub max_candidates: usize,
    /// Ceiling on the completion tokens requested
    pub max_output_tokens: u32,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        ScoringSettings {
            max_candidates: 120,
            max_output_tokens: 8_000,
        }
    }
}

/// Indices of the `limit` most recent items (by publish time, then fetch
/// time), in input order
fn newest_indices(items: &[RawItem], limit: usize) -> Vec<usize> {
    let mut by_recency = (0..items.len()).collect::<Vec<_>>();
    by_recency.sort_by_key(|&i| {
        let item = &items[i];
        std::cmp::Reverse(item.published_at.unwrap_or(item.fetched_at))
    });
    by_recency.truncate(limit);
    by_recency.sort_unstable();
    by_recency
}

#[derive(Debug, Deserialize)]
struct ScoreEntry {
    id: String,
    score: f64,
    #[serde(default)]
    reason: String,
}

/// Extracts the `[{"id", "score", "reason"}]` array from a model response,
/// tolerating code fences and surrounding prose
fn parse_scores(text: &str) -> Option<Vec<ScoreEntry>> {
    let trimmed = text.trim();
    if let Ok(entries) = serde_json::from_str::<Vec<ScoreEntry>>(trimmed) {
        return Some(entries);
    }

    let start = trimmed.find('[')?;
    let end = trimmed.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Vec<ScoreEntry>>(&trimmed[start..=end]).ok()
}

#[derive(Serialize)]
struct ScoringContextItem<'a> {
    id: String,
    title: &'a str,
    source_type: SourceType,
    published_at: Option<DateTime<Utc>>,
    excerpt: &'a str,
}

#[derive(Debug, Clone)]
pub struct Scoring {
    pub items: Vec<ScoredItem>,
    pub usage: TokenUsage,
    /// Set when the response could not be parsed and input order was kept
    pub fallback: bool,
}

#[derive(Debug, Default)]
pub struct RelevanceFilter {
    policy: SelectionPolicy,
    settings: ScoringSettings,
}

impl RelevanceFilter {
    const SYSTEM_PROMPT: &str = include_str!("./prompts/score_system.txt");

    /// Neutral score given to every item when scoring output is unusable
    pub const PLACEHOLDER_SCORE: f64 = 5.0;
    const SCORE_RANGE: (f64, f64) = (0.0, 10.0);
    const TOKENS_PER_ITEM: u32 = 60;

    pub fn new(policy: SelectionPolicy) -> Self {
        RelevanceFilter {
            policy,
            settings: ScoringSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ScoringSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    fn max_output_tokens(&self, candidates: usize) -> u32 {
        let wanted = 200u32.saturating_add(Self::TOKENS_PER_ITEM.saturating_mul(candidates as u32));
        wanted.min(self.settings.max_output_tokens)
    }

    fn build_prompt(
        &self,
        items: &[&RawItem],
        recent_topics: Option<&str>,
    ) -> Result<String, Error> {
        let context = items
            .iter()
            .map(|item| ScoringContextItem {
                id: item.id.to_string(),
                title: &item.title,
                source_type: item.source_type,
                published_at: item.published_at,
                excerpt: &item.content_snippet,
            })
            .collect::<Vec<_>>();

        let mut prompt = String::new();
        if let Some(topics) = recent_topics {
            prompt.push_str("Topics covered in recent episodes:\n");
            prompt.push_str(topics);
            prompt.push_str(
                "\n\nAn item covering the same story as a recent episode must score at or near 0 \
                 unless it reports a materially new development. Minor follow-ups to a recent \
                 story should score low but above 0.\n\n",
            );
        }
        prompt.push_str(&format!(
            "Score these {} items:\n{}",
            items.len(),
            serde_json::to_string_pretty(&context)?
        ));

        Ok(prompt)
    }

    fn fallback(&self, items: Vec<RawItem>) -> Vec<ScoredItem> {
        items
            .into_iter()
            .take(self.policy.max_items)
            .map(|item| ScoredItem {
                item,
                relevance_score: Self::PLACEHOLDER_SCORE,
                score_reason: "Scoring unavailable; kept in collection order".into(),
            })
            .collect()
    }

    fn apply_scores(items: Vec<RawItem>, entries: Vec<ScoreEntry>) -> Vec<ScoredItem> {
        let (min, max) = Self::SCORE_RANGE;
        let mut by_id = entries
            .into_iter()
            .map(|entry| (entry.id.trim().to_string(), entry))
            .collect::<HashMap<_, _>>();

        items
            .into_iter()
            .map(|item| match by_id.remove(&item.id.to_string()) {
                Some(entry) => ScoredItem {
                    item,
                    relevance_score: if entry.score.is_nan() {
                        min
                    } else {
                        entry.score.clamp(min, max)
                    },
                    score_reason: entry.reason,
                },
                None => ScoredItem {
                    item,
                    relevance_score: min,
                    score_reason: "Not scored".into(),
                },
            })
            .collect()
    }

    /// Scores `items` in one request and returns the selected subset, best first.
    ///
    /// Only the newest `max_candidates` items are sent. Generation errors are
    /// returned; an unparseable response falls back to the first `max_items`
    /// items in input order.
    #[tracing::instrument(
        skip_all,
        fields(items = items.len(), with_topics = recent_topics.is_some())
    )]
    pub async fn filter<G: TextGenerator>(
        &self,
        generator: &G,
        items: Vec<RawItem>,
        recent_topics: Option<&str>,
    ) -> Result<Scoring, Error> {
        if items.is_empty() {
            return Ok(Scoring {
                items: Vec::new(),
                usage: TokenUsage::default(),
                fallback: false,
            });
        }

        let kept = newest_indices(&items, self.settings.max_candidates);
        if kept.len() < items.len() {
            tracing::info!(
                dropped = items.len() - kept.len(),
                "Too many items to score, keeping the newest"
            );
        }

        let candidates = kept.iter().map(|&i| &items[i]).collect::<Vec<_>>();
        let request = GenerationRequest::new(
            self.build_prompt(&candidates, recent_topics)?,
            self.max_output_tokens(candidates.len()),
        )
        .with_system_prompt(Self::SYSTEM_PROMPT);

        let generation = generator
            .generate(request)
            .await
            .inspect_err(|e| tracing::error!(error = ?e, "Failed to score items"))
            .map_err(|e| Error::Generation(format!("{e:?}")))?;

        let Some(entries) = parse_scores(&generation.text) else {
            tracing::warn!(
                response_len = generation.text.len(),
                "Unparseable scoring response, keeping collection order"
            );
            return Ok(Scoring {
                items: self.fallback(items),
                usage: generation.usage,
                fallback: true,
            });
        };

        let kept = kept.into_iter().collect::<HashSet<_>>();
        let candidates = items
            .into_iter()
            .enumerate()
            .filter(|(i, _)| kept.contains(i))
            .map(|(_, item)| item)
            .collect();

        let selected = select_items(Self::apply_scores(candidates, entries), &self.policy);
        tracing::info!(selected = selected.len(), "Items selected");

        Ok(Scoring {
            items: selected,
            usage: generation.usage,
            fallback: false,
        })
    }
}
