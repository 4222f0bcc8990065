use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    CandidateItem, Episode, EpisodeStatus, NewEpisode, RawItem, RecentItemKey, SearchQuery, Source,
};

pub mod postgres;

pub trait DataStore {
    fn active_sources(&self) -> impl Future<Output = anyhow::Result<Vec<Source>>> + Send;

    fn active_search_queries(
        &self,
    ) -> impl Future<Output = anyhow::Result<Vec<SearchQuery>>> + Send;

    /// Identifying fields of raw items fetched at or after `since`
    fn recent_item_keys(
        &self,
        since: DateTime<Utc>,
    ) -> impl Future<Output = anyhow::Result<Vec<RecentItemKey>>> + Send;

    /// Persists candidates, returning them with durable ids in input order
    fn bulk_insert_raw_items(
        &self,
        items: &[CandidateItem],
    ) -> impl Future<Output = anyhow::Result<Vec<RawItem>>> + Send;

    fn create_episode(
        &self,
        episode: &NewEpisode,
    ) -> impl Future<Output = anyhow::Result<Episode>> + Send;

    /// Moves a non-terminal episode forward; never touches a terminal row
    fn advance_episode_status(
        &self,
        episode_id: Uuid,
        status: EpisodeStatus,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn mark_episode_generated(
        &self,
        episode_id: Uuid,
        audio_url: &str,
        audio_duration_seconds: i32,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn mark_episode_failed(
        &self,
        episode_id: Uuid,
        reason: &str,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn attach_item_to_episode(
        &self,
        item_id: Uuid,
        episode_id: Uuid,
        relevance_score: f64,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Most recently created `generated` episodes, newest first
    fn recent_generated_episodes(
        &self,
        limit: usize,
    ) -> impl Future<Output = anyhow::Result<Vec<Episode>>> + Send;
}

impl<T: DataStore + Send + Sync> DataStore for &T {
    async fn active_sources(&self) -> anyhow::Result<Vec<Source>> {
        (**self).active_sources().await
    }

    async fn active_search_queries(&self) -> anyhow::Result<Vec<SearchQuery>> {
        (**self).active_search_queries().await
    }

    async fn recent_item_keys(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<RecentItemKey>> {
        (**self).recent_item_keys(since).await
    }

    async fn bulk_insert_raw_items(&self, items: &[CandidateItem]) -> anyhow::Result<Vec<RawItem>> {
        (**self).bulk_insert_raw_items(items).await
    }

    async fn create_episode(&self, episode: &NewEpisode) -> anyhow::Result<Episode> {
        (**self).create_episode(episode).await
    }

    async fn advance_episode_status(
        &self,
        episode_id: Uuid,
        status: EpisodeStatus,
    ) -> anyhow::Result<()> {
        (**self).advance_episode_status(episode_id, status).await
    }

    async fn mark_episode_generated(
        &self,
        episode_id: Uuid,
        audio_url: &str,
        audio_duration_seconds: i32,
    ) -> anyhow::Result<()> {
        (**self)
            .mark_episode_generated(episode_id, audio_url, audio_duration_seconds)
            .await
    }

    async fn mark_episode_failed(&self, episode_id: Uuid, reason: &str) -> anyhow::Result<()> {
        (**self).mark_episode_failed(episode_id, reason).await
    }

    async fn attach_item_to_episode(
        &self,
        item_id: Uuid,
        episode_id: Uuid,
        relevance_score: f64,
    ) -> anyhow::Result<()> {
        (**self)
            .attach_item_to_episode(item_id, episode_id, relevance_score)
            .await
    }

    async fn recent_generated_episodes(&self, limit: usize) -> anyhow::Result<Vec<Episode>> {
        (**self).recent_generated_episodes(limit).await
    }
}
