use std::time::Duration;

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};

use crate::{
    llm::generator::{Generation, GenerationRequest, LlmProvider, TextGenerator},
    render::{split_for_speech, AudioSynthesizer, VoiceConfig},
    TokenUsage,
};

/// Client for OpenAI-compatible APIs (OpenAI itself, OpenRouter)
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: ClientWithMiddleware,
    api_key: String,
    base_url: String,
    model: String,
    tts_model: String,
    timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum OpenAIError {
    #[error("HTTP error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Empty completion")]
    EmptyCompletion,
}

impl OpenAIClient {
    const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
    const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
    const MAX_RETRIES: u32 = 3;
    /// Request size limit of the speech endpoint
    const MAX_SPEECH_CHARS: usize = 4_000;

    pub fn new(api_key: impl Into<String>) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(Self::MAX_RETRIES);
        let client = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self {
            client,
            api_key: api_key.into(),
            base_url: Self::OPENAI_BASE_URL.into(),
            model: "gpt-4o".into(),
            tts_model: "tts-1".into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Client preconfigured with the provider's endpoint and default model
    pub fn for_provider(provider: LlmProvider, api_key: impl Into<String>) -> Self {
        let client = Self::new(api_key);
        match provider {
            LlmProvider::OpenAi => client,
            LlmProvider::OpenRouter => client
                .with_base_url(Self::OPENROUTER_BASE_URL)
                .with_model("openai/gpt-4o-mini"),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Timeout of a single attempt; retries get their own
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tts_model(mut self, model: impl Into<String>) -> Self {
        self.tts_model = model.into();
        self
    }

    async fn post_json<T: Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, OpenAIError> {
        let resp = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .body(serde_json::to_vec(body)?)
            .timeout(self.timeout)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to make http request"))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(OpenAIError::Api { status, message });
        }

        Ok(resp)
    }

    pub async fn send_completion_request(
        &self,
        request: &GenerationRequest,
    ) -> Result<CompletionResponse, OpenAIError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system_prompt) = &request.system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system_prompt }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": request.user_prompt }));

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_output_tokens,
            "messages": messages,
        });

        Ok(self
            .post_json("chat/completions", &body)
            .await?
            .json::<CompletionResponse>()
            .await?)
    }

    pub async fn send_speech_request(
        &self,
        input: &str,
        voice: &VoiceConfig,
    ) -> Result<Vec<u8>, OpenAIError> {
        let body = SpeechRequest {
            model: voice.model.as_deref().unwrap_or(&self.tts_model),
            input,
            voice: &voice.voice,
            response_format: &voice.format,
        };

        let bytes = self.post_json("audio/speech", &body).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: CompletionMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionMessage {
    pub role: String,
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl From<CompletionUsage> for TokenUsage {
    fn from(usage: CompletionUsage) -> Self {
        TokenUsage::new(usage.prompt_tokens, usage.completion_tokens)
    }
}

impl TextGenerator for OpenAIClient {
    type Error = OpenAIError;

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerationRequest) -> Result<Generation, Self::Error> {
        let response = self
            .send_completion_request(&request)
            .await
            .inspect_err(|e| {
                tracing::error!(error = %e, model = %self.model, "Failed to generate text")
            })?;

        let usage = response.usage.map(TokenUsage::from).unwrap_or_default();
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(OpenAIError::EmptyCompletion)?;

        Ok(Generation { text, usage })
    }
}

impl AudioSynthesizer for OpenAIClient {
    type Error = OpenAIError;

    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> Result<Vec<u8>, Self::Error> {
        let chunks = split_for_speech(text, Self::MAX_SPEECH_CHARS);
        tracing::info!(chunks = chunks.len(), "Synthesizing speech");

        // mp3 frames concatenate cleanly
        let mut audio = Vec::new();
        for chunk in &chunks {
            let bytes = self
                .send_speech_request(chunk, voice)
                .await
                .inspect_err(|e| tracing::error!(error = %e, "Failed to synthesize speech chunk"))?;
            audio.extend_from_slice(&bytes);
        }

        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_endpoints() {
        let openai = OpenAIClient::for_provider(LlmProvider::OpenAi, "k");
        assert_eq!(openai.base_url, "https://api.openai.com/v1");
        assert_eq!(openai.model_name(), "gpt-4o");

        let openrouter = OpenAIClient::for_provider(LlmProvider::OpenRouter, "k").with_model("x/y");
        assert_eq!(openrouter.base_url, "https://openrouter.ai/api/v1");
        assert_eq!(openrouter.model_name(), "x/y");
    }

    #[test]
    fn test_completion_usage_parses() {
        let body = r#"{
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let response = serde_json::from_str::<CompletionResponse>(body).unwrap();
        let usage = response.usage.map(TokenUsage::from).unwrap();
        assert_eq!(usage.total(), 15);
    }
}
