use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DomainError;

/// Persisted lifecycle of an [`Episode`].
///
/// `pending -> rendering -> publishing -> generated`, with `failed` reachable
/// from any non-terminal state. `generated` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Pending,
    Rendering,
    Publishing,
    Generated,
    Failed,
}

impl EpisodeStatus {
    pub const ALL: [EpisodeStatus; 5] = [
        EpisodeStatus::Pending,
        EpisodeStatus::Rendering,
        EpisodeStatus::Publishing,
        EpisodeStatus::Generated,
        EpisodeStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeStatus::Pending => "pending",
            EpisodeStatus::Rendering => "rendering",
            EpisodeStatus::Publishing => "publishing",
            EpisodeStatus::Generated => "generated",
            EpisodeStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EpisodeStatus::Generated | EpisodeStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            EpisodeStatus::Pending => 0,
            EpisodeStatus::Rendering => 1,
            EpisodeStatus::Publishing => 2,
            EpisodeStatus::Generated => 3,
            EpisodeStatus::Failed => u8::MAX,
        }
    }

    /// Forward-only progression; `failed` is reachable from every non-terminal state
    pub fn can_advance_to(&self, next: EpisodeStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == EpisodeStatus::Failed || next.rank() > self.rank()
    }
}

impl fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EpisodeStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EpisodeStatus::Pending),
            "rendering" => Ok(EpisodeStatus::Rendering),
            "publishing" => Ok(EpisodeStatus::Publishing),
            "generated" => Ok(EpisodeStatus::Generated),
            "failed" => Ok(EpisodeStatus::Failed),
            other => Err(DomainError::UnknownEpisodeStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for EpisodeStatus {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Positional label of a script [`Section`], serialized as `opener`,
/// `story_1`, `story_2`, ..., `deeper_thread` or `closer`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum SectionLabel {
    Opener,
    Story(u8),
    DeeperThread,
    Closer,
}

impl fmt::Display for SectionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SectionLabel::Opener => f.write_str("opener"),
            SectionLabel::Story(n) => write!(f, "story_{n}"),
            SectionLabel::DeeperThread => f.write_str("deeper_thread"),
            SectionLabel::Closer => f.write_str("closer"),
        }
    }
}

impl FromStr for SectionLabel {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opener" => Ok(SectionLabel::Opener),
            "deeper_thread" => Ok(SectionLabel::DeeperThread),
            "closer" => Ok(SectionLabel::Closer),
            other => other
                .strip_prefix("story_")
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|n| *n > 0)
                .map(SectionLabel::Story)
                .ok_or_else(|| DomainError::UnknownSectionLabel(other.to_string())),
        }
    }
}

impl From<SectionLabel> for String {
    fn from(value: SectionLabel) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for SectionLabel {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A labeled segment of an episode script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub label: SectionLabel,
    pub title: Option<String>,
    /// Offset into the clean script, in words
    pub word_index: usize,
    pub estimated_timestamp_seconds: u64,
    pub source_ids: Vec<String>,
}

/// Script artifacts of an episode about to be created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEpisode {
    pub date: NaiveDate,
    pub script: String,
    pub clean_script: String,
    pub summary: String,
    pub sections: Vec<Section>,
    pub source_item_ids: Vec<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: Uuid,
    pub date: NaiveDate,
    pub script: String,
    pub clean_script: String,
    pub summary: String,
    pub sections: Vec<Section>,
    pub source_item_ids: Vec<String>,
    pub audio_url: Option<String>,
    pub audio_duration_seconds: Option<i32>,
    pub status: EpisodeStatus,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Episode {
    pub fn from_new(id: Uuid, created_at: DateTime<Utc>, new: NewEpisode) -> Self {
        Episode {
            id,
            date: new.date,
            script: new.script,
            clean_script: new.clean_script,
            summary: new.summary,
            sections: new.sections,
            source_item_ids: new.source_item_ids,
            audio_url: None,
            audio_duration_seconds: None,
            status: EpisodeStatus::Pending,
            metadata: new.metadata,
            created_at,
        }
    }

    /// Titles of story-like sections, in script order
    pub fn section_titles(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().filter_map(|s| s.title.as_deref())
    }
}
