mod episode;
mod item;
mod source;

pub use episode::{Episode, EpisodeStatus, NewEpisode, Section, SectionLabel};
pub use item::{normalize_title, CandidateItem, RawItem, RecentItemKey, SourceType};
pub use source::{SearchQuery, Source};

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Unknown source type: {0}")]
    UnknownSourceType(String),
    #[error("Unknown episode status: {0}")]
    UnknownEpisodeStatus(String),
    #[error("Unknown section label: {0}")]
    UnknownSectionLabel(String),
}
