pub mod collector;
mod error;
pub mod filter;
mod llm;
pub mod notify;
mod pipeline;
pub mod progress;
pub mod render;
pub mod script;
pub mod server;
pub mod sources;
pub mod storage;
pub mod topics;
pub mod tracing;

pub use error::Error;
pub use llm::openai;
pub use llm::{
    generator::{Generation, GenerationRequest, LlmProvider, TextGenerator},
    usage::{TokenUsage, UsageTracker},
};
pub use pipeline::{
    builder::BriefingPipelineBuilder, report_setup_failure, BriefingPipeline, PipelineSettings,
};
