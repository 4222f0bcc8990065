use std::sync::{Arc, Mutex};

use briefing_pulse::{Generation, GenerationRequest, TextGenerator, TokenUsage};
use serde_json::json;

/// What the mock answers to the scoring request
#[derive(Clone)]
pub enum ScoreResponse {
    /// Every item gets the same score
    Uniform(f64),
    /// Scores by item position; missing positions are left unscored
    PerItem(Vec<f64>),
    /// Returned verbatim
    Raw(String),
}

#[derive(Clone)]
pub struct MockGenerator {
    pub requests: Arc<Mutex<Vec<GenerationRequest>>>,
    pub scores: ScoreResponse,
    /// Fixed script text; by default a script citing the first items is written
    pub script: Option<String>,
    /// `None` makes the summary call fail
    pub summary: Option<String>,
    pub fail_with: Option<String>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            scores: ScoreResponse::Uniform(8.0),
            script: None,
            summary: Some("Three stories that matter today.".into()),
            fail_with: None,
        }
    }
}

impl MockGenerator {
    pub fn with_scores(scores: ScoreResponse) -> Self {
        Self {
            scores,
            ..Default::default()
        }
    }

    pub fn with_script(script: &str) -> Self {
        Self {
            script: Some(script.to_string()),
            ..Default::default()
        }
    }

    pub fn failing(msg: &str) -> Self {
        Self {
            fail_with: Some(msg.to_string()),
            ..Default::default()
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.user_prompt.clone())
            .collect()
    }

    fn score_text(&self, ids: &[String]) -> String {
        let entries = match &self.scores {
            ScoreResponse::Raw(text) => return text.clone(),
            ScoreResponse::Uniform(score) => ids
                .iter()
                .map(|id| json!({ "id": id, "score": score, "reason": "uniform" }))
                .collect::<Vec<_>>(),
            ScoreResponse::PerItem(scores) => ids
                .iter()
                .zip(scores)
                .map(|(id, score)| json!({ "id": id, "score": score, "reason": "scripted" }))
                .collect(),
        };
        serde_json::to_string(&entries).unwrap()
    }

    fn script_text(ids: &[String]) -> String {
        let mut paragraphs = vec![
            "Good morning, here is what matters today across the stories we follow.".to_string(),
        ];
        paragraphs.extend(ids.iter().take(3).enumerate().map(|(i, id)| {
            format!(
                "Story {} is developing quickly and deserves your attention this morning [source: {id}].",
                i + 1
            )
        }));
        paragraphs.push("That is all for today, thanks for listening and see you tomorrow.".into());
        paragraphs.join("\n\n")
    }
}

/// Ids of the JSON item array that closes every item-carrying prompt
pub fn context_ids(prompt: &str) -> Vec<String> {
    let Some(start) = prompt.rfind("\n[") else {
        return Vec::new();
    };
    serde_json::from_str::<Vec<serde_json::Value>>(&prompt[start + 1..])
        .unwrap_or_default()
        .iter()
        .filter_map(|item| item["id"].as_str().map(str::to_string))
        .collect()
}

impl TextGenerator for MockGenerator {
    type Error = anyhow::Error;

    fn model_name(&self) -> &str {
        "mock-gpt"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<Generation, Self::Error> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(ref msg) = self.fail_with {
            return Err(anyhow::anyhow!("{}", msg));
        }

        let prompt = &request.user_prompt;
        let text = if prompt.contains("Score these") {
            self.score_text(&context_ids(prompt))
        } else if prompt.contains("Write today's briefing") {
            self.script
                .clone()
                .unwrap_or_else(|| Self::script_text(&context_ids(prompt)))
        } else {
            self.summary
                .clone()
                .ok_or_else(|| anyhow::anyhow!("summary unavailable"))?
        };

        Ok(Generation {
            text,
            usage: TokenUsage::new(100, 50),
        })
    }
}
