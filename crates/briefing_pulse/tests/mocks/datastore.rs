use std::sync::{Arc, Mutex};

use briefing_datastore::{
    CandidateItem, DataStore, Episode, EpisodeStatus, NewEpisode, RawItem, RecentItemKey,
    SearchQuery, Source,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Clone)]
pub struct MockDataStore {
    pub recent_keys: Vec<RecentItemKey>,
    pub recent_episodes: Vec<Episode>,
    /// Every call in order, by method name
    pub log: Arc<Mutex<Vec<&'static str>>>,
    pub raw_items: Arc<Mutex<Vec<RawItem>>>,
    pub episodes: Arc<Mutex<Vec<Episode>>>,
    pub attached: Arc<Mutex<Vec<(Uuid, Uuid, f64)>>>,
    pub fail_on: Option<(&'static str, String)>,
}

impl Default for MockDataStore {
    fn default() -> Self {
        Self {
            recent_keys: Vec::new(),
            recent_episodes: Vec::new(),
            log: Arc::new(Mutex::new(Vec::new())),
            raw_items: Arc::new(Mutex::new(Vec::new())),
            episodes: Arc::new(Mutex::new(Vec::new())),
            attached: Arc::new(Mutex::new(Vec::new())),
            fail_on: None,
        }
    }
}

impl MockDataStore {
    /// Fails every call to `method`
    pub fn failing_on(method: &'static str, msg: &str) -> Self {
        Self {
            fail_on: Some((method, msg.to_string())),
            ..Default::default()
        }
    }

    pub fn calls(&self, method: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|m| **m == method).count()
    }

    pub fn episode(&self) -> Option<Episode> {
        self.episodes.lock().unwrap().last().cloned()
    }

    fn enter(&self, method: &'static str) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(method);
        match &self.fail_on {
            Some((failing, msg)) if *failing == method => Err(anyhow::anyhow!("{}", msg)),
            _ => Ok(()),
        }
    }

    /// Applies a status change the way the database guard does
    fn transition(&self, episode_id: Uuid, status: EpisodeStatus) -> anyhow::Result<()> {
        let mut episodes = self.episodes.lock().unwrap();
        let episode = episodes
            .iter_mut()
            .find(|e| e.id == episode_id)
            .ok_or_else(|| anyhow::anyhow!("episode {episode_id} not found"))?;

        if !episode.status.can_advance_to(status) {
            anyhow::bail!("illegal transition {} -> {}", episode.status, status);
        }
        episode.status = status;
        Ok(())
    }
}

impl DataStore for MockDataStore {
    async fn active_sources(&self) -> anyhow::Result<Vec<Source>> {
        self.enter("active_sources")?;
        Ok(Vec::new())
    }

    async fn active_search_queries(&self) -> anyhow::Result<Vec<SearchQuery>> {
        self.enter("active_search_queries")?;
        Ok(Vec::new())
    }

    async fn recent_item_keys(&self, _since: DateTime<Utc>) -> anyhow::Result<Vec<RecentItemKey>> {
        self.enter("recent_item_keys")?;
        Ok(self.recent_keys.clone())
    }

    async fn bulk_insert_raw_items(&self, items: &[CandidateItem]) -> anyhow::Result<Vec<RawItem>> {
        self.enter("bulk_insert_raw_items")?;
        let now = Utc::now();
        let inserted = items
            .iter()
            .cloned()
            .map(|item| RawItem::from_candidate(Uuid::new_v4(), now, item))
            .collect::<Vec<_>>();
        self.raw_items.lock().unwrap().extend(inserted.clone());
        Ok(inserted)
    }

    async fn create_episode(&self, episode: &NewEpisode) -> anyhow::Result<Episode> {
        self.enter("create_episode")?;
        let episode = Episode::from_new(Uuid::new_v4(), Utc::now(), episode.clone());
        self.episodes.lock().unwrap().push(episode.clone());
        Ok(episode)
    }

    async fn advance_episode_status(
        &self,
        episode_id: Uuid,
        status: EpisodeStatus,
    ) -> anyhow::Result<()> {
        self.enter("advance_episode_status")?;
        self.transition(episode_id, status)
    }

    async fn mark_episode_generated(
        &self,
        episode_id: Uuid,
        audio_url: &str,
        audio_duration_seconds: i32,
    ) -> anyhow::Result<()> {
        self.enter("mark_episode_generated")?;
        self.transition(episode_id, EpisodeStatus::Generated)?;

        let mut episodes = self.episodes.lock().unwrap();
        if let Some(episode) = episodes.iter_mut().find(|e| e.id == episode_id) {
            episode.audio_url = Some(audio_url.to_string());
            episode.audio_duration_seconds = Some(audio_duration_seconds);
        }
        Ok(())
    }

    async fn mark_episode_failed(&self, episode_id: Uuid, reason: &str) -> anyhow::Result<()> {
        self.enter("mark_episode_failed")?;
        self.transition(episode_id, EpisodeStatus::Failed)?;

        let mut episodes = self.episodes.lock().unwrap();
        if let Some(episode) = episodes.iter_mut().find(|e| e.id == episode_id) {
            episode.metadata["failure_reason"] = reason.into();
        }
        Ok(())
    }

    async fn attach_item_to_episode(
        &self,
        item_id: Uuid,
        episode_id: Uuid,
        relevance_score: f64,
    ) -> anyhow::Result<()> {
        self.enter("attach_item_to_episode")?;
        self.attached
            .lock()
            .unwrap()
            .push((item_id, episode_id, relevance_score));
        Ok(())
    }

    async fn recent_generated_episodes(&self, limit: usize) -> anyhow::Result<Vec<Episode>> {
        self.enter("recent_generated_episodes")?;
        Ok(self.recent_episodes.iter().take(limit).cloned().collect())
    }
}
