//! HTTP trigger surface: start runs in the background and stream their
//! progress over server-sent events.

use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use briefing_datastore::Episode;
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::{
    llm::generator::LlmProvider,
    progress::{ProgressEvent, ProgressSink},
};

/// Builds and runs one pipeline instance per trigger
#[async_trait]
pub trait PipelineLauncher: Send + Sync + 'static {
    /// Rejects a trigger that could never start, before it is acknowledged
    fn validate(&self, _provider: Option<LlmProvider>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn launch(
        &self,
        provider: Option<LlmProvider>,
        progress: &dyn ProgressSink,
    ) -> anyhow::Result<Option<Episode>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Generated,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub provider: Option<LlmProvider>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub episode_id: Option<Uuid>,
    pub error: Option<String>,
    pub events: Vec<ProgressEvent>,
}

struct RunEntry {
    record: RunRecord,
    /// Dropped when the run finishes, which ends every live subscription
    sender: Option<broadcast::Sender<ProgressEvent>>,
}

/// In-memory history of runs started by this process
#[derive(Clone, Default)]
pub struct RunRegistry {
    runs: Arc<Mutex<HashMap<Uuid, RunEntry>>>,
}

impl RunRegistry {
    const CHANNEL_CAPACITY: usize = 64;

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, RunEntry>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start(&self, provider: Option<LlmProvider>) -> Uuid {
        let id = Uuid::new_v4();
        let (sender, _) = broadcast::channel(Self::CHANNEL_CAPACITY);
        let record = RunRecord {
            id,
            provider,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            episode_id: None,
            error: None,
            events: Vec::new(),
        };

        self.lock().insert(
            id,
            RunEntry {
                record,
                sender: Some(sender),
            },
        );
        id
    }

    pub fn record_event(&self, id: Uuid, event: ProgressEvent) {
        let mut runs = self.lock();
        let Some(entry) = runs.get_mut(&id) else {
            return;
        };
        if let Some(sender) = &entry.sender {
            // no live subscribers
            let _ = sender.send(event.clone());
        }
        entry.record.events.push(event);
    }

    pub fn finish(&self, id: Uuid, result: &anyhow::Result<Option<Episode>>) {
        let mut runs = self.lock();
        let Some(entry) = runs.get_mut(&id) else {
            return;
        };

        let record = &mut entry.record;
        record.finished_at = Some(Utc::now());
        match result {
            Ok(Some(episode)) => {
                record.status = RunStatus::Generated;
                record.episode_id = Some(episode.id);
            }
            Ok(None) => record.status = RunStatus::Skipped,
            Err(e) => {
                record.status = RunStatus::Failed;
                record.error = Some(format!("{e:#}"));
            }
        }
        entry.sender = None;
    }

    pub fn get(&self, id: Uuid) -> Option<RunRecord> {
        self.lock().get(&id).map(|entry| entry.record.clone())
    }

    /// Newest first
    pub fn list(&self) -> Vec<RunRecord> {
        let mut records = self
            .lock()
            .values()
            .map(|entry| entry.record.clone())
            .collect::<Vec<_>>();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records
    }

    /// Events so far plus a receiver for the rest (none once finished).
    /// Taken under one lock so nothing is missed or repeated.
    fn subscribe(
        &self,
        id: Uuid,
    ) -> Option<(Vec<ProgressEvent>, Option<broadcast::Receiver<ProgressEvent>>)> {
        let runs = self.lock();
        let entry = runs.get(&id)?;
        Some((
            entry.record.events.clone(),
            entry.sender.as_ref().map(broadcast::Sender::subscribe),
        ))
    }
}

/// Progress sink that records into the registry under one run id
pub struct RunProgress {
    id: Uuid,
    registry: RunRegistry,
}

impl RunProgress {
    pub fn new(id: Uuid, registry: RunRegistry) -> Self {
        RunProgress { id, registry }
    }
}

impl ProgressSink for RunProgress {
    fn report(&self, event: ProgressEvent) {
        self.registry.record_event(self.id, event);
    }
}

#[derive(Clone)]
pub struct AppState {
    registry: RunRegistry,
    launcher: Arc<dyn PipelineLauncher>,
}

impl AppState {
    pub fn new(launcher: impl PipelineLauncher) -> Self {
        AppState {
            registry: RunRegistry::default(),
            launcher: Arc::new(launcher),
        }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/pipeline/runs", post(trigger_run).get(list_runs))
        .route("/api/pipeline/runs/{id}", get(get_run))
        .route("/api/pipeline/runs/{id}/events", get(run_events))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Default, Deserialize)]
struct TriggerRequest {
    provider: Option<LlmProvider>,
}

/// Starts a run in the background and acknowledges immediately
async fn trigger_run(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        TriggerRequest::default()
    } else {
        match serde_json::from_slice::<TriggerRequest>(&body) {
            Ok(request) => request,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": e.to_string() })),
                )
            }
        }
    };

    if let Err(e) = state.launcher.validate(request.provider) {
        tracing::warn!(error = ?e, provider = ?request.provider, "Rejected pipeline trigger");
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": format!("{e:#}") })),
        );
    }

    let id = state.registry.start(request.provider);
    tracing::info!(run_id = %id, provider = ?request.provider, "Pipeline run triggered");

    let registry = state.registry.clone();
    let launcher = state.launcher.clone();
    let progress = RunProgress::new(id, registry.clone());
    tokio::spawn(async move {
        let run = tokio::spawn(async move { launcher.launch(request.provider, &progress).await });
        // a panicking run still has to leave the registry
        let result = match run.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("Pipeline run aborted: {e}")),
        };
        if let Err(e) = &result {
            tracing::error!(error = ?e, run_id = %id, "Triggered run failed");
        }
        registry.finish(id, &result);
    });

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "run_id": id, "status": RunStatus::Running })),
    )
}

async fn list_runs(State(state): State<AppState>) -> Json<Vec<RunRecord>> {
    Json(state.registry.list())
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunRecord>, StatusCode> {
    state.registry.get(id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

fn progress_event(event: &ProgressEvent) -> Event {
    Event::default()
        .event("progress")
        .data(serde_json::to_string(event).unwrap_or_default())
}

/// Replays the run's events, follows it live until it finishes, then sends
/// a final `done` event with the run record. Disconnecting does not affect
/// the run.
async fn run_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let (history, receiver) = state.registry.subscribe(id).ok_or(StatusCode::NOT_FOUND)?;
    let registry = state.registry.clone();

    let stream = async_stream::stream! {
        for event in &history {
            yield Ok(progress_event(event));
        }

        if let Some(mut receiver) = receiver {
            loop {
                match receiver.recv().await {
                    Ok(event) => yield Ok(progress_event(&event)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(run_id = %id, skipped, "Progress subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }

        if let Some(record) = registry.get(id) {
            yield Ok(Event::default()
                .event("done")
                .data(serde_json::to_string(&record).unwrap_or_default()));
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use super::*;
    use crate::progress::{PipelineStep, StepStatus};

    struct ScriptedLauncher;

    #[async_trait]
    impl PipelineLauncher for ScriptedLauncher {
        async fn launch(
            &self,
            _provider: Option<LlmProvider>,
            progress: &dyn ProgressSink,
        ) -> anyhow::Result<Option<Episode>> {
            progress.report(ProgressEvent::new(
                PipelineStep::Collect,
                StepStatus::Running,
                "Collecting",
            ));
            progress.report(ProgressEvent::new(
                PipelineStep::Collect,
                StepStatus::Skipped,
                "Nothing new",
            ));
            Ok(None)
        }
    }

    struct PanickingLauncher;

    #[async_trait]
    impl PipelineLauncher for PanickingLauncher {
        async fn launch(
            &self,
            _provider: Option<LlmProvider>,
            _progress: &dyn ProgressSink,
        ) -> anyhow::Result<Option<Episode>> {
            panic!("launcher blew up")
        }
    }

    struct OpenAiOnlyLauncher;

    #[async_trait]
    impl PipelineLauncher for OpenAiOnlyLauncher {
        fn validate(&self, provider: Option<LlmProvider>) -> anyhow::Result<()> {
            match provider {
                Some(LlmProvider::OpenRouter) => anyhow::bail!("OPENROUTER_API_KEY is not set"),
                _ => Ok(()),
            }
        }

        async fn launch(
            &self,
            _provider: Option<LlmProvider>,
            _progress: &dyn ProgressSink,
        ) -> anyhow::Result<Option<Episode>> {
            Ok(None)
        }
    }

    fn trigger(body: &'static str) -> Request<Body> {
        Request::post("/api/pipeline/runs")
            .header("Content-Type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn wait_until_finished(registry: &RunRegistry, id: Uuid) -> RunRecord {
        for _ in 0..100 {
            if let Some(record) = registry.get(id).filter(|r| r.status != RunStatus::Running) {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {id} did not finish");
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(AppState::new(ScriptedLauncher));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_trigger_acknowledges_and_streams_history() {
        let state = AppState::new(ScriptedLauncher);
        let registry = state.registry().clone();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/pipeline/runs")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"provider": "openrouter"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let ack: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        let id = Uuid::parse_str(ack["run_id"].as_str().unwrap()).unwrap();

        let record = wait_until_finished(&registry, id).await;
        assert_eq!(record.status, RunStatus::Skipped);
        assert_eq!(record.provider, Some(LlmProvider::OpenRouter));
        assert_eq!(record.events.len(), 2);

        let response = app
            .oneshot(
                Request::get(format!("/api/pipeline/runs/{id}/events"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_string(response).await;
        assert_eq!(body.matches("event: progress").count(), 2);
        assert!(body.find("Collecting").unwrap() < body.find("Nothing new").unwrap());
        assert!(body.contains("event: done"));
    }

    #[tokio::test]
    async fn test_bad_trigger_body_is_rejected() {
        let app = router(AppState::new(ScriptedLauncher));
        let response = app
            .oneshot(
                Request::post("/api/pipeline/runs")
                    .body(Body::from(r#"{"provider": "carrier-pigeon"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_panicking_run_is_recorded_as_failed() {
        let state = AppState::new(PanickingLauncher);
        let registry = state.registry().clone();

        let response = router(state).oneshot(trigger("")).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let ack: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        let id = Uuid::parse_str(ack["run_id"].as_str().unwrap()).unwrap();

        let record = wait_until_finished(&registry, id).await;
        assert_eq!(record.status, RunStatus::Failed);
        assert!(record.finished_at.is_some());
        assert!(record.error.unwrap().contains("Pipeline run aborted"));
        assert!(registry.subscribe(id).unwrap().1.is_none());
    }

    #[tokio::test]
    async fn test_unlaunchable_trigger_is_rejected_before_acknowledging() {
        let state = AppState::new(OpenAiOnlyLauncher);
        let registry = state.registry().clone();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(trigger(r#"{"provider": "openrouter"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("OPENROUTER_API_KEY"));
        assert!(registry.list().is_empty());

        let response = app.oneshot(trigger(r#"{"provider": "openai"}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let app = router(AppState::new(ScriptedLauncher));
        let response = app
            .oneshot(
                Request::get(format!("/api/pipeline/runs/{}/events", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_live_subscriber_sees_events_until_finish() {
        let registry = RunRegistry::default();
        let id = registry.start(None);
        registry.record_event(
            id,
            ProgressEvent::new(PipelineStep::Collect, StepStatus::Running, "a"),
        );

        let (history, receiver) = registry.subscribe(id).unwrap();
        let mut receiver = receiver.unwrap();
        assert_eq!(history.len(), 1);

        registry.record_event(
            id,
            ProgressEvent::new(PipelineStep::Collect, StepStatus::Completed, "b"),
        );
        registry.finish(id, &Ok(None));

        assert_eq!(receiver.try_recv().unwrap().message, "b");
        assert!(matches!(
            receiver.try_recv(),
            Err(broadcast::error::TryRecvError::Closed)
        ));
        assert!(registry.subscribe(id).unwrap().1.is_none());
    }
}
