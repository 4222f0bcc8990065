#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Generated script is too short: {length} characters (minimum {minimum})")]
    ScriptTooShort { length: usize, minimum: usize },
    #[error("Clean script is too short to render: {length} characters (minimum {minimum})")]
    ScriptTooShortForAudio { length: usize, minimum: usize },
    #[error("No items to write a script from")]
    NoItems,
    #[error("Text generation failed: {0}")]
    Generation(String),
    #[error("Audio synthesis failed: {0}")]
    Synthesis(String),
    #[error("Audio upload failed: {0}")]
    Upload(String),
    #[error("Failed to serialize model context: {0}")]
    Json(#[from] serde_json::Error),
}
