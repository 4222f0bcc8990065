use std::time::Duration;

use async_trait::async_trait;
use briefing_datastore::Episode;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Skipped,
    EpisodeReady,
    PipelineFailed,
}

/// One message about the outcome of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub text: String,
    /// Optional rich layout (Slack block kit)
    pub blocks: Option<serde_json::Value>,
}

impl Notification {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Notification {
            kind: NotificationKind::Skipped,
            text: format!(":zzz: *Daily briefing skipped*\n{}", reason.into()),
            blocks: None,
        }
    }

    pub fn episode_ready(episode: &Episode) -> Self {
        let duration = episode
            .audio_duration_seconds
            .map(|s| format!("{}:{:02}", s / 60, s % 60))
            .unwrap_or_else(|| "unknown".into());
        let audio = episode.audio_url.as_deref().unwrap_or("(no audio)");

        let text = format!(
            ":studio_microphone: *Briefing for {} is ready*\n{}\n*Length:* {duration}\n{audio}",
            episode.date, episode.summary,
        );

        let stories = episode
            .section_titles()
            .map(|title| format!("• {title}"))
            .collect::<Vec<_>>()
            .join("\n");

        let mut blocks = vec![json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": text },
        })];
        if !stories.is_empty() {
            blocks.push(json!({
                "type": "section",
                "text": { "type": "mrkdwn", "text": stories },
            }));
        }

        Notification {
            kind: NotificationKind::EpisodeReady,
            text,
            blocks: Some(serde_json::Value::Array(blocks)),
        }
    }

    pub fn pipeline_failed(error: &anyhow::Error) -> Self {
        Notification {
            kind: NotificationKind::PipelineFailed,
            text: format!(":rotating_light: *Daily briefing failed*\n```{error:#}```"),
            blocks: None,
        }
    }
}

/// Best-effort delivery channel for run outcomes.
///
/// Implementations swallow and log their own failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification);
}

/// Slack incoming webhook
pub struct SlackWebhook {
    webhook_url: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl SlackWebhook {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        SlackWebhook {
            webhook_url: webhook_url.into(),
            http: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn payload(notification: &Notification) -> serde_json::Value {
        let mut payload = json!({
            "text": notification.text,
            "unfurl_links": false,
        });
        if let Some(blocks) = &notification.blocks {
            payload["blocks"] = blocks.clone();
        }
        payload
    }

    async fn post(&self, payload: serde_json::Value) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Slack webhook returned {status}: {body}");
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for SlackWebhook {
    async fn notify(&self, notification: &Notification) {
        if let Err(e) = self.post(Self::payload(notification)).await {
            tracing::warn!(error = ?e, kind = ?notification.kind, "Failed to send Slack notification");
        }
    }
}

/// Logs notifications instead of sending them
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, notification: &Notification) {
        tracing::info!(kind = ?notification.kind, text = %notification.text, "Notification (not sent)");
    }
}
