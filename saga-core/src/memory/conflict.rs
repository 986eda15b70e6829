//! Plot conflicts and their lifecycle.
//!
//! A conflict starts `Active` and ends either `Resolved` (the story says so)
//! or `Abandoned` (nobody mentioned it for too long). Terminal states are
//! final.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Expected resolution horizon of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeline {
    Immediate,
    Batch,
    ShortTerm,
    MediumTerm,
    LongTerm,
    Epic,
}

impl Timeline {
    /// Parse an extraction label. Unknown labels become `MediumTerm`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "immediate" => Timeline::Immediate,
            "batch" => Timeline::Batch,
            "short_term" => Timeline::ShortTerm,
            "long_term" => Timeline::LongTerm,
            "epic" => Timeline::Epic,
            _ => Timeline::MediumTerm,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Timeline::Immediate => "immediate",
            Timeline::Batch => "batch",
            Timeline::ShortTerm => "short_term",
            Timeline::MediumTerm => "medium_term",
            Timeline::LongTerm => "long_term",
            Timeline::Epic => "epic",
        }
    }

    /// Base urgency used by conflict priority.
    pub fn base_urgency(&self) -> f32 {
        match self {
            Timeline::Immediate => 1.0,
            Timeline::Batch => 0.9,
            Timeline::ShortTerm => 0.7,
            Timeline::MediumTerm => 0.5,
            Timeline::LongTerm => 0.3,
            Timeline::Epic => 0.2,
        }
    }

    /// Chapters the conflict is expected to run for.
    pub fn expected_duration(&self) -> u32 {
        match self {
            Timeline::Immediate => 1,
            Timeline::Batch => 5,
            Timeline::ShortTerm => 10,
            Timeline::MediumTerm => 30,
            Timeline::LongTerm => 100,
            Timeline::Epic => 300,
        }
    }

    /// Chapters without a mention before the conflict counts as stale.
    ///
    /// `None` means it never goes stale.
    pub fn staleness_threshold(&self) -> Option<u32> {
        match self {
            Timeline::Immediate | Timeline::Batch => Some(10),
            Timeline::ShortTerm => Some(30),
            Timeline::MediumTerm => Some(100),
            Timeline::LongTerm | Timeline::Epic => None,
        }
    }
}

impl std::fmt::Display for Timeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle state of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    #[default]
    Active,
    Resolved,
    Abandoned,
}

impl ConflictStatus {
    /// Parse an extraction label. Progress labels such as "developing"
    /// carry no state change and yield `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "active" => Some(ConflictStatus::Active),
            "resolved" => Some(ConflictStatus::Resolved),
            "abandoned" => Some(ConflictStatus::Abandoned),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ConflictStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

/// An unresolved tension in the plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub description: String,
    /// Free-form kind (internal, external, philosophical, ...).
    #[serde(rename = "type", default)]
    pub kind: String,
    pub timeline: Timeline,
    #[serde(default)]
    pub status: ConflictStatus,
    #[serde(default)]
    pub characters_involved: BTreeSet<String>,
    #[serde(default)]
    pub entities_involved: BTreeSet<String>,
    pub introduced_chapter: u32,
    pub last_mentioned_chapter: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_chapter: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_note: Option<String>,
}

impl Conflict {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        timeline: Timeline,
        introduced_chapter: u32,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            kind: String::new(),
            timeline,
            status: ConflictStatus::Active,
            characters_involved: BTreeSet::new(),
            entities_involved: BTreeSet::new(),
            introduced_chapter,
            last_mentioned_chapter: introduced_chapter,
            resolution_chapter: None,
            resolution_note: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_characters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.characters_involved
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_entities<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities_involved.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_last_mentioned(mut self, chapter: u32) -> Self {
        self.last_mentioned_chapter = chapter.max(self.introduced_chapter);
        self
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Chapters since the conflict was introduced.
    pub fn elapsed(&self, current_chapter: u32) -> u32 {
        current_chapter.saturating_sub(self.introduced_chapter)
    }

    /// Chapters since the conflict was last referenced.
    pub fn chapters_since_mention(&self, current_chapter: u32) -> u32 {
        current_chapter.saturating_sub(self.last_mentioned_chapter)
    }

    /// Record a reference in `chapter`. Never moves the mention backwards.
    pub fn mention(&mut self, chapter: u32) -> bool {
        if chapter > self.last_mentioned_chapter {
            self.last_mentioned_chapter = chapter;
            true
        } else {
            false
        }
    }

    /// Move to a terminal status. No-op unless currently active.
    pub fn close(&mut self, status: ConflictStatus, chapter: u32, note: Option<String>) -> bool {
        if !self.is_active() || status.is_active() {
            return false;
        }
        self.status = status;
        self.resolution_chapter = Some(chapter);
        if note.is_some() {
            self.resolution_note = note;
        }
        true
    }

    pub fn resolve(&mut self, chapter: u32, note: Option<String>) -> bool {
        self.close(ConflictStatus::Resolved, chapter, note)
    }

    pub fn abandon(&mut self, chapter: u32, note: impl Into<String>) -> bool {
        self.close(ConflictStatus::Abandoned, chapter, Some(note.into()))
    }
}

/// A partial update to one conflict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictPatch {
    pub status: Option<ConflictStatus>,
    pub resolution_chapter: Option<u32>,
}

/// All known conflicts in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictStore {
    conflicts: Vec<Conflict>,
}

impl ConflictStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id given to the `index`-th conflict detected in `chapter` when the
    /// extraction supplied none.
    pub fn generated_id(chapter: u32, index: usize) -> String {
        format!("conflict_ch{chapter}_{index}")
    }

    /// Add conflicts, ignoring any whose id is already known.
    ///
    /// Returns how many were inserted.
    pub fn insert(&mut self, conflicts: impl IntoIterator<Item = Conflict>) -> usize {
        let mut inserted = 0;
        for conflict in conflicts {
            if self.get(&conflict.id).is_some() {
                tracing::debug!(id = %conflict.id, "Ignoring duplicate conflict id");
                continue;
            }
            self.conflicts.push(conflict);
            inserted += 1;
        }
        inserted
    }

    pub fn get(&self, id: &str) -> Option<&Conflict> {
        self.conflicts.iter().find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Conflict> {
        self.conflicts.iter_mut().find(|c| c.id == id)
    }

    /// Apply a patch. Returns false if the id is unknown.
    ///
    /// Only `Resolved` can be set this way; abandonment belongs to staleness
    /// pruning. A status patch on a conflict that is already closed is
    /// ignored, and a bare `resolution_chapter` only touches closed conflicts.
    pub fn update(&mut self, id: &str, patch: ConflictPatch) -> bool {
        let Some(conflict) = self.get_mut(id) else {
            tracing::debug!(id, "Update for unknown conflict id ignored");
            return false;
        };

        match patch.status {
            Some(ConflictStatus::Resolved) if conflict.is_active() => {
                let chapter = patch
                    .resolution_chapter
                    .unwrap_or(conflict.last_mentioned_chapter);
                conflict.resolve(chapter, None);
            }
            Some(ConflictStatus::Abandoned) => {
                tracing::debug!(id, "Ignoring abandon request from an update");
            }
            Some(_) => {}
            None => {
                if let Some(chapter) = patch.resolution_chapter {
                    if !conflict.is_active() {
                        conflict.resolution_chapter = Some(chapter);
                    }
                }
            }
        }
        true
    }

    /// Conflicts still active.
    pub fn unresolved(&self) -> Vec<&Conflict> {
        self.conflicts.iter().filter(|c| c.is_active()).collect()
    }

    /// Active conflicts on one timeline.
    pub fn by_timeline(&self, timeline: Timeline) -> Vec<&Conflict> {
        self.conflicts
            .iter()
            .filter(|c| c.is_active() && c.timeline == timeline)
            .collect()
    }

    pub fn introduced_in(&self, chapter: u32) -> Vec<&Conflict> {
        self.conflicts
            .iter()
            .filter(|c| c.introduced_chapter == chapter)
            .collect()
    }

    pub fn all(&self) -> &[Conflict] {
        &self.conflicts
    }

    /// Mutable view for in-place lifecycle passes (pruning, mentions).
    pub fn as_mut_slice(&mut self) -> &mut [Conflict] {
        &mut self.conflicts
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }
}
