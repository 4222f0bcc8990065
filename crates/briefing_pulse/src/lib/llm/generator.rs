use std::{fmt::Debug, future::Future};

use serde::{Deserialize, Serialize};

use super::usage::TokenUsage;

/// A text-generation capability (chat completion style)
pub trait TextGenerator {
    type Error: Debug + Send;

    fn model_name(&self) -> &str;

    fn generate(
        &self,
        request: GenerationRequest,
    ) -> impl Future<Output = Result<Generation, Self::Error>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub max_output_tokens: u32,
}

impl GenerationRequest {
    pub fn new(user_prompt: impl Into<String>, max_output_tokens: u32) -> Self {
        GenerationRequest {
            system_prompt: None,
            user_prompt: user_prompt.into(),
            max_output_tokens,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

/// Interchangeable generation backends speaking the OpenAI chat completions API
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    #[value(name = "openai")]
    OpenAi,
    #[value(name = "openrouter")]
    OpenRouter,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::OpenRouter => "openrouter",
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
