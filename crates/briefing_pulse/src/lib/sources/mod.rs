pub mod feed;

use async_trait::async_trait;
use briefing_datastore::{CandidateItem, SearchQuery, Source};

/// A pluggable fetcher that normalizes one kind of source into candidates.
///
/// Implementations should absorb per-source failures (one broken feed) and
/// only return an error when the adapter as a whole cannot run.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Rate-limit sensitive adapters are run one after another
    fn rate_limited(&self) -> bool {
        false
    }

    async fn fetch(
        &self,
        sources: &[Source],
        queries: &[SearchQuery],
    ) -> anyhow::Result<Vec<CandidateItem>>;
}
