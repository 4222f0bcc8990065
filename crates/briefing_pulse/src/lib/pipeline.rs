pub mod builder;

use std::sync::Arc;

use anyhow::Context;
use briefing_datastore::{DataStore, Episode, EpisodeStatus, NewEpisode};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use crate::{
    collector::Collector,
    filter::{RelevanceFilter, ScoredItem},
    llm::{generator::LlmProvider, usage::UsageTracker},
    notify::{Notification, Notifier},
    progress::{NoopProgress, PipelineStep, ProgressEvent, ProgressSink, StepStatus},
    render::{AudioSynthesizer, BlobStore, Renderer},
    script::NarrativeSynthesizer,
    topics::{build_topic_digest, DEFAULT_RECENT_EPISODES},
    TextGenerator,
};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Zone the episode date is taken in
    pub timezone: Tz,
    /// Recent episodes fed to the filter as already-covered topics
    pub topic_episodes: usize,
    /// Recorded in episode metadata
    pub provider: LlmProvider,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            timezone: Tz::UTC,
            topic_episodes: DEFAULT_RECENT_EPISODES,
            provider: LlmProvider::default(),
        }
    }
}

/// How a run that did not error ended
#[derive(Debug)]
enum Outcome {
    Skipped(String),
    Generated(Episode),
}

/// Bookkeeping the top-level error handler needs
#[derive(Debug)]
struct RunState {
    step: PipelineStep,
    episode_id: Option<Uuid>,
    usage: UsageTracker,
}

impl RunState {
    fn new() -> Self {
        RunState {
            step: PipelineStep::Collect,
            episode_id: None,
            usage: UsageTracker::default(),
        }
    }

    fn enter(&mut self, progress: &dyn ProgressSink, step: PipelineStep, message: &str) {
        self.step = step;
        progress.report(ProgressEvent::new(step, StepStatus::Running, message));
    }
}

/// The daily briefing pipeline: collect, persist, score, write, render,
/// publish, attach, notify
pub struct BriefingPipeline<D, G, A, B>
where
    D: DataStore + Send + Sync + 'static,
    G: TextGenerator + Send + Sync + 'static,
    A: AudioSynthesizer + Send + Sync + 'static,
    B: BlobStore + Send + Sync + 'static,
{
    store: D,
    generator: G,
    audio: A,
    blobs: B,
    collector: Collector,
    notifier: Arc<dyn Notifier>,
    filter: RelevanceFilter,
    synthesizer: NarrativeSynthesizer,
    renderer: Renderer,
    settings: PipelineSettings,
}

async fn notify_with_progress(
    notifier: &dyn Notifier,
    progress: &dyn ProgressSink,
    notification: &Notification,
) {
    progress.report(ProgressEvent::new(
        PipelineStep::Notify,
        StepStatus::Running,
        "Sending notification",
    ));
    notifier.notify(notification).await;
    progress.report(
        ProgressEvent::new(PipelineStep::Notify, StepStatus::Completed, "Notification sent")
            .with_detail(serde_json::json!({ "kind": notification.kind })),
    );
}

/// Reports a run that failed before the pipeline could be built (store
/// unreachable, missing credentials) the same way a failed run is reported:
/// a failed event at the first step and one failure notification.
pub async fn report_setup_failure(
    notifier: &dyn Notifier,
    progress: Option<&dyn ProgressSink>,
    error: &anyhow::Error,
) {
    tracing::error!(error = ?error, "Pipeline setup failed");
    let progress = progress.unwrap_or(&NoopProgress);
    progress.report(ProgressEvent::new(
        PipelineStep::Collect,
        StepStatus::Failed,
        format!("{error:#}"),
    ));
    notify_with_progress(notifier, progress, &Notification::pipeline_failed(error)).await;
}

impl<D, G, A, B> BriefingPipeline<D, G, A, B>
where
    D: DataStore + Send + Sync + 'static,
    G: TextGenerator + Send + Sync + 'static,
    A: AudioSynthesizer + Send + Sync + 'static,
    B: BlobStore + Send + Sync + 'static,
{
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.settings.timezone).date_naive()
    }

    /// Runs the pipeline once.
    ///
    /// Returns `Ok(None)` on a quiet day (nothing new or nothing selected),
    /// in which case no episode is created. Every definitive outcome sends
    /// exactly one notification. On error the episode, if one was created,
    /// is marked failed before the error is returned.
    #[tracing::instrument(skip_all, fields(provider = %self.settings.provider))]
    pub async fn run(
        &self,
        progress: Option<&dyn ProgressSink>,
    ) -> anyhow::Result<Option<Episode>> {
        let progress = progress.unwrap_or(&NoopProgress);
        let mut state = RunState::new();

        match self.execute(progress, &mut state).await {
            Ok(Outcome::Skipped(reason)) => {
                tracing::info!(%reason, "Run skipped");
                self.send_notification(progress, &Notification::skipped(&reason))
                    .await;
                Ok(None)
            }
            Ok(Outcome::Generated(episode)) => {
                tracing::info!(episode_id = %episode.id, "Episode generated");
                self.send_notification(progress, &Notification::episode_ready(&episode))
                    .await;
                Ok(Some(episode))
            }
            Err(e) => {
                tracing::error!(error = ?e, step = ?state.step, "Pipeline run failed");

                if let Some(episode_id) = state.episode_id {
                    if let Err(mark_err) = self
                        .store
                        .mark_episode_failed(episode_id, &format!("{e:#}"))
                        .await
                    {
                        tracing::error!(error = ?mark_err, %episode_id, "Failed to mark episode as failed");
                    }
                }

                progress.report(
                    ProgressEvent::new(state.step, StepStatus::Failed, format!("{e:#}"))
                        .with_detail(serde_json::json!({ "episode_id": state.episode_id })),
                );
                self.send_notification(progress, &Notification::pipeline_failed(&e))
                    .await;

                Err(e)
            }
        }
    }

    async fn send_notification(&self, progress: &dyn ProgressSink, notification: &Notification) {
        notify_with_progress(&*self.notifier, progress, notification).await;
    }

    async fn execute(
        &self,
        progress: &dyn ProgressSink,
        state: &mut RunState,
    ) -> anyhow::Result<Outcome> {
        // 1. collect
        state.enter(progress, PipelineStep::Collect, "Collecting items from sources");
        let candidates = self
            .collector
            .collect(&self.store)
            .await
            .context("Failed to collect items")?;
        if candidates.is_empty() {
            progress.report(ProgressEvent::new(
                PipelineStep::Collect,
                StepStatus::Skipped,
                "No new items found",
            ));
            return Ok(Outcome::Skipped("No new items were found in any source.".into()));
        }
        progress.report(
            ProgressEvent::new(PipelineStep::Collect, StepStatus::Completed, "Items collected")
                .with_detail(serde_json::json!({ "count": candidates.len() })),
        );

        // 2. persist, so every later stage works with durable ids
        state.enter(progress, PipelineStep::PersistItems, "Saving collected items");
        let raw_items = self
            .store
            .bulk_insert_raw_items(&candidates)
            .await
            .inspect_err(|e| tracing::error!(error = ?e, "Failed to insert raw items"))
            .context("Failed to persist raw items")?;
        let collected = raw_items.len();
        progress.report(
            ProgressEvent::new(PipelineStep::PersistItems, StepStatus::Completed, "Items saved")
                .with_detail(serde_json::json!({ "count": collected })),
        );

        // 3. score and select
        state.enter(progress, PipelineStep::Score, "Scoring items for relevance");
        let topics = build_topic_digest(&self.store, self.settings.topic_episodes).await;
        let scoring = self
            .filter
            .filter(&self.generator, raw_items, topics.as_deref())
            .await
            .context("Failed to score items")?;
        state.usage.record("scoring", scoring.usage, 1);
        if scoring.items.is_empty() {
            progress.report(ProgressEvent::new(
                PipelineStep::Score,
                StepStatus::Skipped,
                "No items selected",
            ));
            return Ok(Outcome::Skipped("No items were relevant enough for a briefing.".into()));
        }
        progress.report(
            ProgressEvent::new(PipelineStep::Score, StepStatus::Completed, "Items selected")
                .with_detail(serde_json::json!({
                    "selected": scoring.items.len(),
                    "fallback": scoring.fallback,
                })),
        );

        // 4. write
        state.enter(progress, PipelineStep::Write, "Writing the script");
        let date = self.today();
        let synthesis = self
            .synthesizer
            .synthesize(
                &self.generator,
                &scoring.items,
                &date.format("%A, %B %-d, %Y").to_string(),
            )
            .await
            .context("Failed to write script")?;
        state.usage.record("writing", synthesis.usage, synthesis.calls);
        let script = synthesis.script;
        progress.report(
            ProgressEvent::new(PipelineStep::Write, StepStatus::Completed, "Script written")
                .with_detail(serde_json::json!({
                    "sections": script.sections.len(),
                    "citations": script.source_item_ids.len(),
                })),
        );

        // 5. create episode
        state.enter(progress, PipelineStep::CreateEpisode, "Creating episode");
        let new_episode = NewEpisode {
            date,
            script: script.script,
            clean_script: script.clean_script,
            summary: script.summary,
            sections: script.sections,
            source_item_ids: script.source_item_ids,
            metadata: serde_json::json!({
                "provider": self.settings.provider,
                "model": self.generator.model_name(),
                "voice": self.renderer.voice().voice,
                "usage": state.usage.to_json(),
                "items_collected": collected,
                "items_selected": scoring.items.len(),
                "scoring_fallback": scoring.fallback,
            }),
        };
        let mut episode = self
            .store
            .create_episode(&new_episode)
            .await
            .inspect_err(|e| tracing::error!(error = ?e, "Failed to create episode"))
            .context("Failed to create episode")?;
        state.episode_id = Some(episode.id);
        progress.report(
            ProgressEvent::new(
                PipelineStep::CreateEpisode,
                StepStatus::Completed,
                "Episode created",
            )
            .with_detail(serde_json::json!({ "episode_id": episode.id })),
        );

        // 6. render and publish
        state.enter(progress, PipelineStep::RenderPublish, "Rendering audio");
        self.advance(&mut episode, EpisodeStatus::Rendering).await?;
        let audio = self
            .renderer
            .synthesize(&self.audio, &episode.clean_script)
            .await
            .context("Failed to render audio")?;

        self.advance(&mut episode, EpisodeStatus::Publishing).await?;
        let rendered = self
            .renderer
            .publish(&self.blobs, audio, &episode.clean_script, episode.id, Some(episode.date))
            .await
            .context("Failed to publish audio")?;

        let duration = i32::try_from(rendered.audio_duration_seconds).unwrap_or(i32::MAX);
        self.store
            .mark_episode_generated(episode.id, &rendered.audio_url, duration)
            .await
            .context("Failed to finalize episode")?;
        episode.status = EpisodeStatus::Generated;
        episode.audio_url = Some(rendered.audio_url.clone());
        episode.audio_duration_seconds = Some(duration);
        progress.report(
            ProgressEvent::new(
                PipelineStep::RenderPublish,
                StepStatus::Completed,
                "Audio published",
            )
            .with_detail(serde_json::json!(rendered)),
        );

        // 7. attach
        state.enter(progress, PipelineStep::AttachItems, "Linking items to episode");
        let attached = self.attach_items(episode.id, &scoring.items).await;
        progress.report(
            ProgressEvent::new(PipelineStep::AttachItems, StepStatus::Completed, "Items linked")
                .with_detail(serde_json::json!({
                    "attached": attached,
                    "selected": scoring.items.len(),
                })),
        );

        Ok(Outcome::Generated(episode))
    }

    async fn advance(&self, episode: &mut Episode, status: EpisodeStatus) -> anyhow::Result<()> {
        self.store
            .advance_episode_status(episode.id, status)
            .await
            .with_context(|| format!("Failed to move episode to {status}"))?;
        episode.status = status;
        Ok(())
    }

    /// Best-effort: a failed update is logged and the rest still run
    async fn attach_items(&self, episode_id: Uuid, items: &[ScoredItem]) -> usize {
        let mut attached = 0;
        for scored in items {
            match self
                .store
                .attach_item_to_episode(scored.item.id, episode_id, scored.relevance_score)
                .await
            {
                Ok(()) => attached += 1,
                Err(e) => {
                    tracing::warn!(error = ?e, item_id = %scored.item.id, "Failed to attach item to episode")
                }
            }
        }
        attached
    }
}
