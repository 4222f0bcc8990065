//! # Narrative Synthesizer
//!
//! Turns the selected items into a spoken-word script with inline
//! `[source: <id>]` citation markers, and derives the artifacts the rest of
//! the pipeline needs from that one generated text: the TTS-ready clean
//! script, the cited item ids, the positional section breakdown and a short
//! summary.

use std::sync::LazyLock;

use briefing_datastore::{Section, SectionLabel, SourceType};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use regex::Regex;
use serde::Serialize;

use crate::{filter::ScoredItem, Error, GenerationRequest, TextGenerator, TokenUsage};

/// Speaking rate shared by section timestamps and audio duration estimates
pub const WORDS_PER_MINUTE: f64 = 150.0;

static CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*\[source:\s*([^\]]*)\]").unwrap());

static PARAGRAPH_BREAK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());

/// Identifiers cited in `text`, deduplicated in order of first appearance.
///
/// A marker may carry several comma-separated ids.
pub fn extract_citations(text: &str) -> Vec<String> {
    CITATION_RE
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .flat_map(|m| m.as_str().split(','))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unique()
        .collect()
}

/// Removes citation markers and collapses whitespace to single spaces
pub fn strip_citations(text: &str) -> String {
    CITATION_RE.replace_all(text, "").split_whitespace().join(" ")
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Seconds needed to speak `words` words at [`WORDS_PER_MINUTE`]
pub fn estimate_seconds(words: usize) -> u64 {
    (words as f64 / (WORDS_PER_MINUTE / 60.0)).round() as u64
}

/// First sentence of `text`, ending at the first `.`, `!` or `?` followed by
/// whitespace or the end of the text
fn first_sentence(text: &str) -> &str {
    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
            if at_boundary {
                return &text[..idx + c.len_utf8()];
            }
        }
    }
    text
}

fn section_title(clean_paragraph: &str) -> Option<String> {
    const MAX_TITLE_CHARS: usize = 60;
    const TRUNCATED_CHARS: usize = 57;

    let sentence = first_sentence(clean_paragraph).trim();
    if sentence.is_empty() {
        return None;
    }

    if sentence.chars().count() > MAX_TITLE_CHARS {
        let truncated = sentence.chars().take(TRUNCATED_CHARS).collect::<String>();
        Some(format!("{truncated}..."))
    } else {
        Some(sentence.to_string())
    }
}

/// Splits a raw script on blank lines and labels paragraphs by position.
///
/// Paragraph 0 is the opener, the next three are stories, the first paragraph
/// after those is the deeper thread (later ones are folded into it) and the
/// last paragraph is the closer when there is more than one paragraph.
pub fn parse_sections(script: &str) -> Vec<Section> {
    const MAX_STORIES: u8 = 3;

    let paragraphs = PARAGRAPH_BREAK_RE
        .split(script.trim())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>();
    let last = paragraphs.len().saturating_sub(1);

    let mut sections: Vec<Section> = Vec::with_capacity(paragraphs.len().min(6));
    let mut word_index = 0;
    let mut stories = 0u8;
    let mut deeper_thread = None;

    for (idx, paragraph) in paragraphs.iter().enumerate() {
        let clean = strip_citations(paragraph);
        let citations = extract_citations(paragraph);

        let label = if idx == 0 {
            Some(SectionLabel::Opener)
        } else if idx == last {
            Some(SectionLabel::Closer)
        } else if stories < MAX_STORIES {
            stories += 1;
            Some(SectionLabel::Story(stories))
        } else if deeper_thread.is_none() {
            deeper_thread = Some(sections.len());
            Some(SectionLabel::DeeperThread)
        } else {
            None
        };

        match label {
            Some(label) => {
                let title = match label {
                    SectionLabel::Opener | SectionLabel::Closer => None,
                    _ => section_title(&clean),
                };
                sections.push(Section {
                    label,
                    title,
                    word_index,
                    estimated_timestamp_seconds: estimate_seconds(word_index),
                    source_ids: citations,
                });
            }
            None => {
                if let Some(section) = deeper_thread.and_then(|i| sections.get_mut(i)) {
                    for id in citations {
                        if !section.source_ids.contains(&id) {
                            section.source_ids.push(id);
                        }
                    }
                }
            }
        }

        word_index += word_count(&clean);
    }

    sections
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeScript {
    pub script: String,
    pub clean_script: String,
    pub sections: Vec<briefing_datastore::Section>,
    pub source_item_ids: Vec<String>,
    pub summary: String,
}

impl EpisodeScript {
    /// Derives every artifact from the generated text
    pub fn from_generated(script: impl Into<String>, summary: impl Into<String>) -> Self {
        let script = script.into();
        EpisodeScript {
            clean_script: strip_citations(&script),
            sections: parse_sections(&script),
            source_item_ids: extract_citations(&script),
            summary: summary.into(),
            script,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Synthesis {
    pub script: EpisodeScript,
    pub usage: TokenUsage,
    pub calls: u32,
}

#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    pub min_script_chars: usize,
    pub script_max_tokens: u32,
    pub summary_max_tokens: u32,
    pub content_chars_per_item: usize,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        SynthesisSettings {
            min_script_chars: 200,
            script_max_tokens: 4_000,
            summary_max_tokens: 200,
            content_chars_per_item: 3_000,
        }
    }
}

#[derive(Serialize)]
struct ScriptContextItem<'a> {
    id: String,
    title: &'a str,
    source_type: SourceType,
    url: Option<&'a str>,
    published_at: Option<DateTime<Utc>>,
    relevance_score: f64,
    why_it_matters: &'a str,
    content: &'a str,
}

#[derive(Debug, Default)]
pub struct NarrativeSynthesizer {
    settings: SynthesisSettings,
}

impl NarrativeSynthesizer {
    const SCRIPT_PROMPT: &str = include_str!("./prompts/script_system.txt");
    const SUMMARY_PROMPT: &str = include_str!("./prompts/summary_system.txt");

    pub const FALLBACK_SUMMARY: &str =
        "A roundup of the most relevant stories from the past day.";

    pub fn new(settings: SynthesisSettings) -> Self {
        NarrativeSynthesizer { settings }
    }

    fn build_prompt(&self, items: &[ScoredItem], date: &str) -> Result<String, Error> {
        let context = items
            .iter()
            .map(|scored| ScriptContextItem {
                id: scored.item.id.to_string(),
                title: &scored.item.title,
                source_type: scored.item.source_type,
                url: scored.item.url.as_deref(),
                published_at: scored.item.published_at,
                relevance_score: scored.relevance_score,
                why_it_matters: &scored.score_reason,
                content: truncate_chars(&scored.item.content, self.settings.content_chars_per_item),
            })
            .collect::<Vec<_>>();

        Ok(format!(
            "Today's date: {date}\n\nWrite today's briefing from the {count} items below, \
             most relevant first. Cite with [source: <id>] using these ids.\n\n{items}",
            count = items.len(),
            items = serde_json::to_string_pretty(&context)?,
        ))
    }

    #[tracing::instrument(skip_all, fields(items = items.len(), %date))]
    pub async fn synthesize<G: TextGenerator>(
        &self,
        generator: &G,
        items: &[ScoredItem],
        date: &str,
    ) -> Result<Synthesis, Error> {
        if items.is_empty() {
            return Err(Error::NoItems);
        }

        let request = GenerationRequest::new(
            self.build_prompt(items, date)?,
            self.settings.script_max_tokens,
        )
        .with_system_prompt(Self::SCRIPT_PROMPT);

        let generation = generator
            .generate(request)
            .await
            .inspect_err(|e| tracing::error!(error = ?e, "Failed to generate script"))
            .map_err(|e| Error::Generation(format!("{e:?}")))?;

        let script = generation.text.trim().to_string();
        let length = script.chars().count();
        if length < self.settings.min_script_chars {
            tracing::error!(length, "Generated script is too short");
            return Err(Error::ScriptTooShort {
                length,
                minimum: self.settings.min_script_chars,
            });
        }

        let mut usage = generation.usage;
        let mut calls = 1;

        let clean_script = strip_citations(&script);
        let summary_request =
            GenerationRequest::new(clean_script.as_str(), self.settings.summary_max_tokens)
                .with_system_prompt(Self::SUMMARY_PROMPT);

        calls += 1;
        let summary = match generator.generate(summary_request).await {
            Ok(generation) if !generation.text.trim().is_empty() => {
                usage += generation.usage;
                generation.text.trim().to_string()
            }
            Ok(generation) => {
                usage += generation.usage;
                tracing::warn!("Summary generation returned empty text, using fallback");
                Self::FALLBACK_SUMMARY.to_string()
            }
            Err(e) => {
                tracing::warn!(error = ?e, "Summary generation failed, using fallback");
                Self::FALLBACK_SUMMARY.to_string()
            }
        };

        let script = EpisodeScript::from_generated(script, summary);
        tracing::info!(
            sections = script.sections.len(),
            citations = script.source_item_ids.len(),
            words = word_count(&script.clean_script),
            "Script synthesized"
        );

        Ok(Synthesis {
            script,
            usage,
            calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO_SCRIPT: &str =
        "Opener text.\n\nStory one text [source: abc].\n\nStory two text.\n\nClosing text.";

    fn labels(sections: &[Section]) -> Vec<String> {
        sections.iter().map(|s| s.label.to_string()).collect()
    }

    #[test]
    fn test_four_paragraph_script_sections() {
        let sections = parse_sections(SCENARIO_SCRIPT);

        assert_eq!(labels(&sections), ["opener", "story_1", "story_2", "closer"]);
        assert_eq!(sections[0].word_index, 0);
        assert_eq!(sections[0].title, None);
        assert_eq!(sections[1].source_ids, vec!["abc".to_string()]);
        assert_eq!(sections[1].title.as_deref(), Some("Story one text."));
        assert!(sections[2].source_ids.is_empty());
        assert_eq!(sections[3].title, None);
    }

    #[test]
    fn test_word_index_accumulates_clean_words() {
        let sections = parse_sections(SCENARIO_SCRIPT);
        let indexes = sections.iter().map(|s| s.word_index).collect::<Vec<_>>();
        // "Opener text." = 2, "Story one text." = 3, "Story two text." = 3
        assert_eq!(indexes, [0, 2, 5, 8]);
    }

    #[test]
    fn test_clean_script_has_no_markers() {
        let clean = strip_citations(SCENARIO_SCRIPT);
        assert!(!clean.contains("[source:"));
        assert_eq!(
            clean,
            "Opener text. Story one text. Story two text. Closing text."
        );
    }

    #[test]
    fn test_citations_deduplicated_in_first_appearance_order() {
        let script = "A [source: b2]. B [source: a1, b2]. C [Source: c3][source: a1].";
        assert_eq!(extract_citations(script), ["b2", "a1", "c3"]);
    }

    #[test]
    fn test_every_extracted_id_appears_in_a_marker() {
        let script = "x [source: one]\n\ny [source: two, three]";
        for id in extract_citations(script) {
            let marker = CITATION_RE
                .captures_iter(script)
                .any(|cap| cap[1].split(',').any(|part| part.trim() == id));
            assert!(marker, "{id} should appear inside a marker");
        }
    }

    #[test]
    fn test_single_paragraph_is_only_an_opener() {
        let sections = parse_sections("Just one paragraph of text here.");
        assert_eq!(labels(&sections), ["opener"]);
    }

    #[test]
    fn test_extra_paragraphs_fold_into_deeper_thread() {
        let script = [
            "Hello.",
            "First story. More.",
            "Second story.",
            "Third story.",
            "The thread that connects them [source: t1].",
            "A further thought [source: t2] [source: t1].",
            "Goodbye.",
        ]
        .join("\n\n");

        let sections = parse_sections(&script);
        assert_eq!(
            labels(&sections),
            ["opener", "story_1", "story_2", "story_3", "deeper_thread", "closer"]
        );

        let deeper = &sections[4];
        assert_eq!(deeper.source_ids, ["t1", "t2"]);
        assert_eq!(deeper.title.as_deref(), Some("The thread that connects them."));

        // absorbed paragraph still counts toward the closer's offset
        let closer = sections.last().unwrap();
        assert_eq!(closer.word_index, word_count(&strip_citations(&script)) - 1);
    }

    #[test]
    fn test_sections_are_ordered_by_word_index() {
        let script = (0..9)
            .map(|i| format!("Paragraph {i} has a handful of words in it."))
            .join("\n\n");
        let sections = parse_sections(&script);
        assert!(sections.windows(2).all(|w| w[0].word_index < w[1].word_index));
    }

    #[test]
    fn test_parsing_is_deterministic() {
        let first = serde_json::to_vec(&parse_sections(SCENARIO_SCRIPT)).unwrap();
        let second = serde_json::to_vec(&parse_sections(SCENARIO_SCRIPT)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_long_titles_are_truncated() {
        let long = "This is a remarkably long opening sentence for a story paragraph that keeps going. Then more.";
        let title = section_title(long).unwrap();
        assert_eq!(title.chars().count(), 60);
        assert!(title.ends_with("..."));
        assert!(long.starts_with(title.trim_end_matches("...")));
    }

    #[test]
    fn test_first_sentence_ignores_decimal_points() {
        assert_eq!(
            first_sentence("Rates rose 0.5 points today. Markets fell."),
            "Rates rose 0.5 points today."
        );
        assert_eq!(first_sentence("No terminator here"), "No terminator here");
    }

    #[test]
    fn test_timestamp_uses_150_words_per_minute() {
        assert_eq!(estimate_seconds(0), 0);
        assert_eq!(estimate_seconds(150), 60);
        assert_eq!(estimate_seconds(5), 2);
        assert_eq!(estimate_seconds(4), 2);
    }

    #[test]
    fn test_windows_line_endings_split_paragraphs() {
        let sections = parse_sections("Hi there.\r\n\r\nStory.\r\n\r\nBye.");
        assert_eq!(labels(&sections), ["opener", "story_1", "closer"]);
    }
}
