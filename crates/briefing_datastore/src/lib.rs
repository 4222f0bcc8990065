//! # DataStore Module
//!
//! This module provides the domain model of the briefing pipeline (collected
//! items, episodes and their script sections, configured sources) and the
//! persistence layer backing it.
//!
//! The module uses sqlx for database operations and provides an abstraction layer
//! over the raw item and episode tables so the pipeline can be exercised against
//! in-memory stores.

mod datastore;
mod domain;

pub use datastore::postgres::PgDataStore;
pub use datastore::DataStore;
pub use domain::{
    normalize_title, CandidateItem, DomainError, Episode, EpisodeStatus, NewEpisode, RawItem,
    RecentItemKey, SearchQuery, Section, SectionLabel, Source, SourceType,
};
