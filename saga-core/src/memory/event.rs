//! Append-only log of significant story events.

use super::entity::default_importance;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Something that happened in a chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub description: String,
    pub chapter: u32,
    #[serde(default = "default_importance")]
    pub importance: f32,
    #[serde(default)]
    pub characters_involved: BTreeSet<String>,
    #[serde(default)]
    pub entities_involved: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consequences: Option<String>,
}

impl Event {
    pub fn new(description: impl Into<String>, chapter: u32) -> Self {
        Self {
            description: description.into(),
            chapter,
            importance: default_importance(),
            characters_involved: BTreeSet::new(),
            entities_involved: BTreeSet::new(),
            location: None,
            consequences: None,
        }
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
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

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Every character and entity name attached to the event.
    pub fn involved_names(&self) -> impl Iterator<Item = &String> {
        self.characters_involved
            .iter()
            .chain(self.entities_involved.iter())
    }

    /// Check whether any of `names` is involved (case-insensitive).
    pub fn involves_any(&self, names: &[String]) -> bool {
        self.involved_names().any(|involved| {
            let involved = involved.to_lowercase();
            names.iter().any(|n| n.to_lowercase() == involved)
        })
    }
}

/// All recorded events in chapter order of ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record new events. Existing entries are never touched.
    ///
    /// An event identical in chapter and description to one already stored
    /// is dropped, so re-running an interrupted extraction does not double it.
    /// Returns how many were added.
    pub fn append(&mut self, events: impl IntoIterator<Item = Event>) -> usize {
        let before = self.events.len();
        for event in events {
            let duplicate = self
                .events
                .iter()
                .any(|e| e.chapter == event.chapter && e.description == event.description);
            if !duplicate {
                self.events.push(event);
            }
        }
        self.events.len() - before
    }

    /// Events involving any of `names`, most important first.
    pub fn by_entities(&self, names: &[String], limit: usize) -> Vec<&Event> {
        let mut matching: Vec<&Event> = self
            .events
            .iter()
            .filter(|e| e.involves_any(names))
            .collect();
        matching.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(Ordering::Equal)
        });
        matching.truncate(limit);
        matching
    }

    pub fn in_chapter(&self, chapter: u32) -> Vec<&Event> {
        self.events.iter().filter(|e| e.chapter == chapter).collect()
    }

    /// Events whose chapter lies in `start..=end`.
    pub fn in_range(&self, start: u32, end: u32) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| (start..=end).contains(&e.chapter))
            .collect()
    }

    pub fn all(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
