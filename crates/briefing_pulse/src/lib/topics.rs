//! Digest of recently published episodes, used to down-rank repeat stories
//! during scoring.

use briefing_datastore::{DataStore, Episode};

pub const DEFAULT_RECENT_EPISODES: usize = 5;

/// Renders episodes as a bulleted digest, newest first. `None` when there is
/// nothing to report.
pub fn render_topic_digest(episodes: &[Episode]) -> Option<String> {
    if episodes.is_empty() {
        return None;
    }

    let mut digest = String::new();
    for episode in episodes {
        digest.push_str(&format!("- {}: {}\n", episode.date, episode.summary.trim()));
        for title in episode.section_titles() {
            digest.push_str(&format!("  - {title}\n"));
        }
    }

    Some(digest.trim_end().to_string())
}

/// Loads the last `limit` generated episodes and renders their digest.
///
/// Advisory only: a store failure is logged and yields `None`.
#[tracing::instrument(skip(store))]
pub async fn build_topic_digest<D: DataStore>(store: &D, limit: usize) -> Option<String> {
    match store.recent_generated_episodes(limit).await {
        Ok(episodes) => render_topic_digest(&episodes),
        Err(e) => {
            tracing::warn!(error = ?e, "Failed to load recent episodes, scoring without topic digest");
            None
        }
    }
}
