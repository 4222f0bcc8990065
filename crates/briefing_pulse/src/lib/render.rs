//! # Render & Publish
//!
//! Turns a clean script into audio and stores it where listeners can reach it.

use std::{fmt::Debug, future::Future};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    script::{estimate_seconds, word_count},
    Error,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub voice: String,
    /// Overrides the synthesizer's default model
    pub model: Option<String>,
    pub format: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        VoiceConfig {
            voice: "alloy".into(),
            model: None,
            format: "mp3".into(),
        }
    }
}

impl VoiceConfig {
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn content_type(&self) -> &'static str {
        match self.format.as_str() {
            "wav" => "audio/wav",
            "opus" => "audio/ogg",
            "aac" => "audio/aac",
            "flac" => "audio/flac",
            _ => "audio/mpeg",
        }
    }
}

/// Text-to-speech capability returning encoded audio bytes
pub trait AudioSynthesizer {
    type Error: Debug + Send;

    fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
    ) -> impl Future<Output = Result<Vec<u8>, Self::Error>> + Send;
}

/// Durable object storage. `put` overwrites whatever is stored at `path` and
/// returns the public url of the object.
pub trait BlobStore {
    type Error: Debug + Send;

    fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> impl Future<Output = Result<String, Self::Error>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedAudio {
    pub audio_url: String,
    pub audio_duration_seconds: u64,
    pub audio_size_bytes: usize,
}

/// Storage path of an episode's audio, stable across re-runs
pub fn audio_path(episode_id: Uuid, date: Option<NaiveDate>, extension: &str) -> String {
    match date {
        Some(date) => format!("episodes/{date}/{episode_id}.{extension}"),
        None => format!("episodes/{episode_id}.{extension}"),
    }
}

/// Estimated spoken length of `text`, on the same clock as section timestamps
pub fn estimate_duration_seconds(text: &str) -> u64 {
    estimate_seconds(word_count(text))
}

/// Splits `text` into chunks of at most `max_chars` characters, preferring
/// sentence boundaries, then word boundaries.
pub fn split_for_speech(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for sentence in sentences(text) {
        let sentence_chars = sentence.chars().count();
        if current_chars > 0 && current_chars + 1 + sentence_chars > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }

        if sentence_chars > max_chars {
            for word in sentence.split_whitespace() {
                let word_chars = word.chars().count();
                if current_chars > 0 && current_chars + 1 + word_chars > max_chars {
                    chunks.push(std::mem::take(&mut current));
                    current_chars = 0;
                }
                if current_chars > 0 {
                    current.push(' ');
                    current_chars += 1;
                }
                current.push_str(word);
                current_chars += word_chars;
            }
            continue;
        }

        if current_chars > 0 {
            current.push(' ');
            current_chars += 1;
        }
        current.push_str(sentence);
        current_chars += sentence_chars;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text.trim();
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let end = rest
            .char_indices()
            .zip(rest.chars().skip(1).map(Some).chain(std::iter::once(None)))
            .find(|((_, c), next)| {
                matches!(c, '.' | '!' | '?') && next.map_or(true, char::is_whitespace)
            })
            .map(|((idx, c), _)| idx + c.len_utf8())
            .unwrap_or(rest.len());
        let (sentence, tail) = rest.split_at(end);
        rest = tail.trim_start();
        Some(sentence.trim())
    })
}

#[derive(Debug, Clone)]
pub struct Renderer {
    voice: VoiceConfig,
}

impl Default for Renderer {
    fn default() -> Self {
        Renderer::new(VoiceConfig::default())
    }
}

impl Renderer {
    pub const MIN_SCRIPT_CHARS: usize = 100;

    pub fn new(voice: VoiceConfig) -> Self {
        Renderer { voice }
    }

    pub fn voice(&self) -> &VoiceConfig {
        &self.voice
    }

    /// Synthesizes audio for `clean_script`
    #[tracing::instrument(skip_all, fields(chars = clean_script.len(), voice = %self.voice.voice))]
    pub async fn synthesize<A: AudioSynthesizer>(
        &self,
        synthesizer: &A,
        clean_script: &str,
    ) -> Result<Vec<u8>, Error> {
        let length = clean_script.trim().chars().count();
        if length < Self::MIN_SCRIPT_CHARS {
            return Err(Error::ScriptTooShortForAudio {
                length,
                minimum: Self::MIN_SCRIPT_CHARS,
            });
        }

        let audio = synthesizer
            .synthesize(clean_script, &self.voice)
            .await
            .inspect_err(|e| tracing::error!(error = ?e, "Failed to synthesize audio"))
            .map_err(|e| Error::Synthesis(format!("{e:?}")))?;

        if audio.is_empty() {
            return Err(Error::Synthesis("synthesizer returned no audio".into()));
        }

        Ok(audio)
    }

    /// Uploads rendered audio under the episode's deterministic path
    #[tracing::instrument(skip(self, blobs, audio, clean_script), fields(bytes = audio.len()))]
    pub async fn publish<B: BlobStore>(
        &self,
        blobs: &B,
        audio: Vec<u8>,
        clean_script: &str,
        episode_id: Uuid,
        date: Option<NaiveDate>,
    ) -> Result<RenderedAudio, Error> {
        let path = audio_path(episode_id, date, &self.voice.format);
        let audio_size_bytes = audio.len();

        let audio_url = blobs
            .put(&path, audio, self.voice.content_type())
            .await
            .inspect_err(|e| tracing::error!(error = ?e, %path, "Failed to upload audio"))
            .map_err(|e| Error::Upload(format!("{e:?}")))?;

        let rendered = RenderedAudio {
            audio_url,
            audio_duration_seconds: estimate_duration_seconds(clean_script),
            audio_size_bytes,
        };
        tracing::info!(
            url = %rendered.audio_url,
            duration = rendered.audio_duration_seconds,
            "Audio published"
        );

        Ok(rendered)
    }
}
