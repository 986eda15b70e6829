//! Parsing structured data out of generation output.
//!
//! Model output is untrusted text that usually, but not always, contains
//! JSON. Parsers here accept the common variations (markdown fences, prose
//! around the payload, a bare list instead of an object, a single string
//! where a list was asked for) and reject the rest with an
//! [`ExtractError`]. Callers decide whether a failure is fatal; the engine
//! treats it as an empty extraction.

use crate::memory::{
    Conflict, ConflictPatch, ConflictStatus, EntitiesByCategory, Entity, EntityCategory, Event,
    Timeline,
};
use crate::outline::ChapterOutline;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Characters of a bad response kept in log messages.
const PREVIEW_CHARS: usize = 500;

/// Errors from parsing generation output.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Empty response")]
    Empty,

    #[error("No JSON found in response")]
    NoJson,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected response shape: {0}")]
    Shape(String),
}

/// Extract JSON from a response that might have markdown code blocks.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    // Handle ```json ... ``` blocks
    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    // Handle ``` ... ``` blocks (without json specifier)
    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    text
}

/// Parse the JSON payload of a response.
///
/// Tries the fenced or whole text first, then the outermost `{...}` and
/// `[...]` spans.
pub fn parse_json_value(text: &str) -> Result<Value, ExtractError> {
    if text.trim().is_empty() {
        return Err(ExtractError::Empty);
    }

    let candidate = extract_json(text);
    let first_error = match serde_json::from_str(candidate) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (candidate.find(open), candidate.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&candidate[start..=end]) {
                    return Ok(value);
                }
            }
        }
    }

    if candidate.contains('{') || candidate.contains('[') {
        Err(first_error.into())
    } else {
        Err(ExtractError::NoJson)
    }
}

/// First characters of a response, for log messages.
pub fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Unwrap a parse result, logging and substituting an empty value on failure.
pub fn or_empty<T: Default>(result: Result<T, ExtractError>, task: &str, response: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(
                task,
                error = %e,
                preview = %preview(response),
                "Failed to parse generation output, treating as empty"
            );
            T::default()
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Description given either as one string or as a list of fragments.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TextOrList {
    One(String),
    Many(Vec<String>),
}

impl TextOrList {
    fn into_fragments(self) -> Vec<String> {
        let fragments = match self {
            TextOrList::One(text) => vec![text],
            TextOrList::Many(list) => list,
        };
        fragments
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    description: Option<TextOrList>,
    #[serde(default, alias = "chapters")]
    appear_in_chapters: Vec<u32>,
    #[serde(default)]
    importance: Option<f32>,
}

impl RawEntity {
    fn into_entity(self) -> Entity {
        let mut entity = Entity::new(self.name.trim()).with_chapters(self.appear_in_chapters);
        if let Some(importance) = self.importance {
            entity = entity.with_importance(importance);
        }
        if let Some(description) = self.description {
            entity.description = description.into_fragments();
        }
        entity
    }
}

/// Parse an entity extraction response.
///
/// Accepts a flat list of records carrying a `type` label, or an object
/// keyed by category (singular or plural), or `{"entities": [...]}`.
pub fn parse_entities(text: &str) -> Result<EntitiesByCategory, ExtractError> {
    let value = parse_json_value(text)?;
    let mut out = EntitiesByCategory::new();

    match value {
        Value::Array(items) => collect_typed_entities(items, &mut out),
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("entities") {
                collect_typed_entities(items.clone(), &mut out);
            } else {
                for (key, items) in map {
                    let Value::Array(items) = items else {
                        continue;
                    };
                    let category = EntityCategory::from_label(&key);
                    for item in items {
                        if let Some(raw) = decode_record::<RawEntity>(item) {
                            out.entry(category).or_default().push(raw.into_entity());
                        }
                    }
                }
            }
        }
        other => {
            return Err(ExtractError::Shape(format!(
                "expected entity list or object, found {}",
                json_kind(&other)
            )))
        }
    }

    Ok(out)
}

fn collect_typed_entities(items: Vec<Value>, out: &mut EntitiesByCategory) {
    for item in items {
        if let Some(raw) = decode_record::<RawEntity>(item) {
            let category = raw
                .kind
                .as_deref()
                .map(EntityCategory::from_label)
                .unwrap_or(EntityCategory::Other);
            out.entry(category).or_default().push(raw.into_entity());
        }
    }
}

/// Record that every extracted entity appears in `chapter`.
pub fn stamp_chapter(entities: &mut EntitiesByCategory, chapter: u32) {
    for entity in entities.values_mut().flatten() {
        entity.appear_in_chapters.insert(chapter);
    }
}

/// Give entities without chapters the chapters whose outline names them.
pub fn stamp_from_outlines(entities: &mut EntitiesByCategory, outlines: &[ChapterOutline]) {
    for entity in entities.values_mut().flatten() {
        if entity.appear_in_chapters.is_empty() {
            entity.appear_in_chapters.extend(
                outlines
                    .iter()
                    .filter(|o| o.mentions(&entity.name))
                    .map(|o| o.chapter_number),
            );
        }
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    description: String,
    #[serde(default)]
    importance: Option<f32>,
    #[serde(default)]
    characters_involved: Vec<String>,
    #[serde(default)]
    entities_involved: Vec<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    consequences: Option<TextOrList>,
}

/// Parse an event extraction response. Every event is stamped with `chapter`.
pub fn parse_events(text: &str, chapter: u32) -> Result<Vec<Event>, ExtractError> {
    let items = match parse_json_value(text)? {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("events") {
            Some(Value::Array(items)) => items,
            _ => return Err(ExtractError::Shape("missing \"events\" list".into())),
        },
        other => {
            return Err(ExtractError::Shape(format!(
                "expected event list, found {}",
                json_kind(&other)
            )))
        }
    };

    Ok(items
        .into_iter()
        .filter_map(decode_record::<RawEvent>)
        .filter(|raw| !raw.description.trim().is_empty())
        .map(|raw| {
            let mut event = Event::new(raw.description.trim(), chapter)
                .with_characters(raw.characters_involved)
                .with_entities(raw.entities_involved);
            if let Some(importance) = raw.importance {
                event = event.with_importance(importance);
            }
            event.location = raw.location.filter(|l| !l.trim().is_empty());
            event.consequences = raw
                .consequences
                .map(|c| c.into_fragments().join("; "))
                .filter(|c| !c.is_empty());
            event
        })
        .collect())
}

// ============================================================================
// Conflicts
// ============================================================================

/// A newly detected conflict before it has a guaranteed id.
#[derive(Debug, Clone, Deserialize)]
pub struct ConflictDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub timeline: String,
    #[serde(default)]
    pub characters_involved: Vec<String>,
    #[serde(default)]
    pub entities_involved: Vec<String>,
    #[serde(default)]
    pub introduced_chapter: Option<u32>,
}

impl ConflictDraft {
    /// Turn the draft into an active conflict detected in `chapter`.
    pub fn into_conflict(self, id: String, chapter: u32) -> Conflict {
        let introduced = self.introduced_chapter.map_or(chapter, |c| c.min(chapter));
        Conflict::new(
            id,
            self.description.trim(),
            Timeline::from_label(&self.timeline),
            introduced,
        )
        .with_kind(self.kind)
        .with_characters(self.characters_involved)
        .with_entities(self.entities_involved)
        .with_last_mentioned(chapter)
    }
}

#[derive(Debug, Deserialize)]
struct RawConflictUpdate {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    resolution_chapter: Option<u32>,
}

/// A status change for an existing conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictUpdate {
    pub id: String,
    pub patch: ConflictPatch,
}

/// Everything a conflict extraction response carries.
#[derive(Debug, Clone, Default)]
pub struct ConflictExtraction {
    pub new_conflicts: Vec<ConflictDraft>,
    pub updates: Vec<ConflictUpdate>,
}

/// Parse a conflict extraction response.
///
/// Expects `{"new_conflicts": [...], "updated_conflicts": [...]}`; a bare
/// list is read as new conflicts only. Only "resolved" becomes a status
/// patch; progress labels such as "developing" and "abandoned" carry none,
/// since abandonment is left to staleness pruning.
pub fn parse_conflicts(text: &str, chapter: u32) -> Result<ConflictExtraction, ExtractError> {
    let (new_items, update_items) = match parse_json_value(text)? {
        Value::Array(items) => (items, Vec::new()),
        Value::Object(mut map) => {
            let take = |value: Option<Value>| match value {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            (
                take(map.remove("new_conflicts")),
                take(map.remove("updated_conflicts")),
            )
        }
        other => {
            return Err(ExtractError::Shape(format!(
                "expected conflict object, found {}",
                json_kind(&other)
            )))
        }
    };

    let new_conflicts = new_items
        .into_iter()
        .filter_map(decode_record::<ConflictDraft>)
        .filter(|draft| !draft.description.trim().is_empty())
        .map(|mut draft| {
            draft.id = draft.id.filter(|id| !id.trim().is_empty());
            draft
        })
        .collect();

    let updates = update_items
        .into_iter()
        .filter_map(decode_record::<RawConflictUpdate>)
        .filter(|raw| !raw.id.trim().is_empty())
        .map(|raw| {
            let status = raw
                .status
                .as_deref()
                .and_then(ConflictStatus::from_label)
                .filter(|status| *status == ConflictStatus::Resolved);
            let resolution_chapter = status.map(|_| raw.resolution_chapter.unwrap_or(chapter));
            ConflictUpdate {
                id: raw.id.trim().to_string(),
                patch: ConflictPatch {
                    status,
                    resolution_chapter,
                },
            }
        })
        .collect();

    Ok(ConflictExtraction {
        new_conflicts,
        updates,
    })
}

fn decode_record<T: for<'de> Deserialize<'de>>(value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::debug!(error = %e, "Skipping malformed record");
            None
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
