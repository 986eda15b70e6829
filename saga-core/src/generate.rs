//! The generation collaborator and the prompts sent to it.
//!
//! The engine never talks to a model directly. It hands a prompt and a
//! [`Task`] to a [`Generator`] and gets text back; transport, retries and
//! model choice live behind the trait.

use crate::context::ContextPackage;
use crate::memory::Conflict;
use crate::outline::ChapterOutline;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::Write as _;
use thiserror::Error;

/// Kinds of generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    EntityExtraction,
    EventExtraction,
    ConflictExtraction,
    ChapterWriting,
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::EntityExtraction => "entity_extraction",
            Task::EventExtraction => "event_extraction",
            Task::ConflictExtraction => "conflict_extraction",
            Task::ChapterWriting => "chapter_writing",
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors reported by a generator.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation failed for {task}: {message}")]
    Failed { task: Task, message: String },

    #[error("Empty response for {0}")]
    EmptyResponse(Task),

    #[error("Generator unavailable: {0}")]
    Unavailable(String),
}

/// Produces text for a prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a response for `prompt`. `task` identifies what the prompt
    /// asks for so implementations can route or configure per task.
    async fn generate(&self, prompt: &str, task: Task) -> Result<String, GenerationError>;
}

#[async_trait]
impl<G: Generator + ?Sized> Generator for std::sync::Arc<G> {
    async fn generate(&self, prompt: &str, task: Task) -> Result<String, GenerationError> {
        (**self).generate(prompt, task).await
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut with "...".
pub fn truncate_for_prompt(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => Cow::Owned(format!("{}...", &text[..byte_index])),
        None => Cow::Borrowed(text),
    }
}

// ============================================================================
// Prompts
// ============================================================================

const ENTITY_SHAPE: &str = r#"Return a JSON array only:
[
  {"name": "...", "type": "character|location|artifact|technique|elixir|beast|faction|other",
   "description": "...", "appear_in_chapters": [1, 2]}
]"#;

fn push_known_names(out: &mut String, known: &[String]) {
    if known.is_empty() {
        return;
    }
    out.push_str("Already known (reuse these exact names when they appear):\n");
    let _ = writeln!(out, "{}\n", known.join(", "));
}

/// Entity extraction over a batch of outlines.
pub fn outline_entities_prompt(outlines: &[ChapterOutline], known: &[String]) -> String {
    let mut out = String::from("Extract every named entity from these chapter outlines.\n\n");
    for outline in outlines {
        out.push_str(&outline.to_prompt_string());
        out.push('\n');
    }
    push_known_names(&mut out, known);
    out.push_str("List the chapters each entity appears in.\n");
    out.push_str(ENTITY_SHAPE);
    out
}

/// Entity extraction over written chapter text.
pub fn chapter_entities_prompt(chapter: u32, content: &str, known: &[String]) -> String {
    let mut out = format!("Extract every named entity from chapter {chapter}.\n\n");
    let _ = writeln!(out, "{content}\n");
    push_known_names(&mut out, known);
    out.push_str(ENTITY_SHAPE);
    out
}

/// Event extraction over written chapter text.
pub fn events_prompt(chapter: u32, content: &str) -> String {
    format!(
        r#"Extract the significant events of chapter {chapter}.

{content}

Return JSON only:
{{"events": [{{"description": "...", "importance": 0.0-1.0,
  "characters_involved": ["..."], "entities_involved": ["..."],
  "location": "...", "consequences": "..."}}]}}"#
    )
}

/// Conflict extraction over written chapter text.
pub fn conflicts_prompt(chapter: u32, content: &str, unresolved: &[&Conflict]) -> String {
    let mut out = format!("Identify plot conflicts in chapter {chapter}.\n\n{content}\n\n");
    if unresolved.is_empty() {
        out.push_str("Open conflicts: none\n\n");
    } else {
        out.push_str("Open conflicts:\n");
        for c in unresolved {
            let _ = writeln!(out, "- [{}] {} (id: {})", c.timeline, c.description, c.id);
        }
        out.push('\n');
    }
    let _ = write!(
        out,
        r#"Timelines: immediate (1 chapter), batch (5), short_term (10), medium_term (30),
long_term (100), epic (300).
Return JSON only:
{{"new_conflicts": [{{"id": "...", "description": "...",
  "type": "internal|external|philosophical", "timeline": "batch",
  "characters_involved": ["..."], "entities_involved": ["..."],
  "introduced_chapter": {chapter}}}],
 "updated_conflicts": [{{"id": "...", "status": "resolved|developing",
  "resolution_chapter": {chapter}}}]}}"#
    );
    out
}

/// Chapter writing request: outline plus the selected memory.
pub fn chapter_prompt(outline: &ChapterOutline, package: &ContextPackage) -> String {
    let mut out = format!("Write chapter {}.\n\n", outline.chapter_number);
    out.push_str("# Outline\n");
    out.push_str(&outline.to_prompt_string());
    out.push_str("\n# Story memory\n");
    out.push_str(&package.to_prompt_string());
    out.push_str("\nStay consistent with the story memory. Return only the chapter text.\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Timeline;

    #[test]
    fn test_task_names() {
        assert_eq!(Task::EntityExtraction.to_string(), "entity_extraction");
        assert_eq!(Task::ChapterWriting.name(), "chapter_writing");
    }

    #[test]
    fn test_truncate_for_prompt() {
        assert_eq!(truncate_for_prompt("short", 10), "short");
        assert_eq!(truncate_for_prompt("abcdef", 3), "abc...");
        // Multi-byte characters are counted as characters.
        let expected = "ĐạoTâm".chars().take(3).collect::<String>() + "...";
        assert_eq!(truncate_for_prompt("ĐạoTâm", 3), expected);
        assert_eq!(truncate_for_prompt("abc", 3), "abc");
    }

    #[test]
    fn test_conflict_prompt_lists_open_conflicts() {
        let conflict = Conflict::new("rivalry", "Rivalry with Mạc Vân", Timeline::Batch, 2);
        let prompt = conflicts_prompt(5, "text", &[&conflict]);
        assert!(prompt.contains("(id: rivalry)"));
        assert!(prompt.contains("\"introduced_chapter\": 5"));
    }

    #[test]
    fn test_outline_prompt_mentions_known_names() {
        let outlines = vec![ChapterOutline::new(1).with_character("Lâm Phong")];
        let prompt = outline_entities_prompt(&outlines, &["Tô Nguyệt".to_string()]);
        assert!(prompt.contains("Lâm Phong"));
        assert!(prompt.contains("Already known"));
        assert!(prompt.contains("Tô Nguyệt"));
    }
}
