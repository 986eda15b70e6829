//! Step-completion ledger.
//!
//! Every expensive or side-effecting step is recorded here once it has
//! finished. Before running a step the engine checks the ledger and skips
//! anything already done, which makes a whole run safe to restart. The
//! ledger also hosts a small key-value metadata store (the rolling
//! super-summary lives there) and the current progress position.

use crate::persist::{load_versioned, save_versioned, BlobStore, PersistError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Blob name the ledger is saved under.
pub const LEDGER_BLOB: &str = "step_ledger";

/// Identifies one step execution: a step name optionally scoped to a batch
/// and/or chapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepKey {
    pub step: String,
    pub batch: Option<u32>,
    pub chapter: Option<u32>,
}

impl StepKey {
    pub fn new(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            batch: None,
            chapter: None,
        }
    }

    /// Key scoped to a batch.
    pub fn batch(step: impl Into<String>, batch: u32) -> Self {
        Self::new(step).with_batch(batch)
    }

    /// Key scoped to a chapter.
    pub fn chapter(step: impl Into<String>, chapter: u32) -> Self {
        Self::new(step).with_chapter(chapter)
    }

    pub fn with_batch(mut self, batch: u32) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn with_chapter(mut self, chapter: u32) -> Self {
        self.chapter = Some(chapter);
        self
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.step)?;
        if let Some(batch) = self.batch {
            write!(f, "_batch{batch}")?;
        }
        if let Some(chapter) = self.chapter {
            write!(f, "_ch{chapter}")?;
        }
        Ok(())
    }
}

/// A completed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<u32>,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

/// The ledger for one story project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepLedger {
    pub story_id: String,
    #[serde(default)]
    completed_steps: BTreeMap<String, StepRecord>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
    #[serde(default)]
    current_batch: u32,
    #[serde(default)]
    current_chapter: u32,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl StepLedger {
    pub fn new(story_id: impl Into<String>) -> Self {
        Self {
            story_id: story_id.into(),
            ..Self::default()
        }
    }

    /// Load the ledger from `store`, or start a fresh one if none is saved.
    pub async fn load<S>(store: &S, story_id: &str) -> Result<Self, PersistError>
    where
        S: BlobStore + ?Sized,
    {
        match load_versioned::<_, StepLedger>(store, LEDGER_BLOB).await? {
            Some(ledger) => {
                if ledger.story_id != story_id {
                    tracing::warn!(
                        saved = %ledger.story_id,
                        requested = %story_id,
                        "Ledger belongs to a different story id"
                    );
                }
                tracing::info!(
                    completed = ledger.completed_steps.len(),
                    chapter = ledger.current_chapter,
                    "Loaded step ledger"
                );
                Ok(ledger)
            }
            None => Ok(Self::new(story_id)),
        }
    }

    pub async fn save<S>(&self, store: &S) -> Result<(), PersistError>
    where
        S: BlobStore + ?Sized,
    {
        save_versioned(store, LEDGER_BLOB, self).await
    }

    pub fn is_completed(&self, key: &StepKey) -> bool {
        self.completed_steps.contains_key(&key.to_string())
    }

    /// Record a step as done. Repeating a key overwrites its metadata.
    pub fn mark_completed(&mut self, key: &StepKey, metadata: Value) {
        let now = Utc::now();
        self.completed_steps.insert(
            key.to_string(),
            StepRecord {
                step: key.step.clone(),
                batch: key.batch,
                chapter: key.chapter,
                completed_at: now,
                metadata,
            },
        );
        self.updated_at = Some(now);
    }

    pub fn record(&self, key: &StepKey) -> Option<&StepRecord> {
        self.completed_steps.get(&key.to_string())
    }

    /// Metadata recorded with a completed step.
    pub fn step_metadata(&self, key: &StepKey) -> Option<&Value> {
        self.record(key).map(|r| &r.metadata)
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Metadata value or `default` when unset.
    pub fn metadata_or(&self, key: &str, default: Value) -> Value {
        self.metadata.get(key).cloned().unwrap_or(default)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
        self.updated_at = Some(Utc::now());
    }

    pub fn update_progress(&mut self, batch: u32, chapter: u32) {
        self.current_batch = batch;
        self.current_chapter = chapter;
        self.updated_at = Some(Utc::now());
    }

    pub fn current_batch(&self) -> u32 {
        self.current_batch
    }

    pub fn current_chapter(&self) -> u32 {
        self.current_chapter
    }

    pub fn completed_count(&self) -> usize {
        self.completed_steps.len()
    }

    /// Forget every completed step. Metadata and progress are kept.
    pub fn reset(&mut self) {
        self.completed_steps.clear();
        self.updated_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_key_format() {
        assert_eq!(StepKey::new("setup").to_string(), "setup");
        assert_eq!(
            StepKey::batch("entity_extraction_outline", 3).to_string(),
            "entity_extraction_outline_batch3"
        );
        assert_eq!(
            StepKey::chapter("chapter_writing", 12).to_string(),
            "chapter_writing_ch12"
        );
        assert_eq!(
            StepKey::batch("x", 2).with_chapter(7).to_string(),
            "x_batch2_ch7"
        );
    }

    #[test]
    fn test_mark_and_check() {
        let mut ledger = StepLedger::new("story");
        let key = StepKey::chapter("event_extraction", 4);

        assert!(!ledger.is_completed(&key));
        ledger.mark_completed(&key, json!({"events": 3}));
        assert!(ledger.is_completed(&key));
        assert!(!ledger.is_completed(&StepKey::chapter("event_extraction", 5)));
        assert_eq!(ledger.step_metadata(&key), Some(&json!({"events": 3})));
    }

    #[test]
    fn test_mark_twice_overwrites_metadata() {
        let mut ledger = StepLedger::new("story");
        let key = StepKey::new("setup");
        ledger.mark_completed(&key, json!(1));
        ledger.mark_completed(&key, json!(2));

        assert_eq!(ledger.completed_count(), 1);
        assert_eq!(ledger.step_metadata(&key), Some(&json!(2)));
    }

    #[test]
    fn test_metadata_store() {
        let mut ledger = StepLedger::new("story");
        assert_eq!(ledger.metadata_or("super_summary", json!("")), json!(""));

        ledger.set_metadata("super_summary", "So far...");
        assert_eq!(ledger.metadata("super_summary"), Some(&json!("So far...")));
    }

    #[test]
    fn test_reset_keeps_metadata() {
        let mut ledger = StepLedger::new("story");
        ledger.mark_completed(&StepKey::new("a"), Value::Null);
        ledger.set_metadata("k", 1);
        ledger.update_progress(2, 8);

        ledger.reset();
        assert_eq!(ledger.completed_count(), 0);
        assert!(ledger.metadata("k").is_some());
        assert_eq!(ledger.current_chapter(), 8);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = MemoryStore::new();
        let mut ledger = StepLedger::new("story");
        ledger.mark_completed(&StepKey::chapter("chapter_writing", 1), Value::Null);
        ledger.update_progress(1, 1);
        ledger.save(&store).await.unwrap();

        let loaded = StepLedger::load(&store, "story").await.unwrap();
        assert!(loaded.is_completed(&StepKey::chapter("chapter_writing", 1)));
        assert_eq!(loaded.current_batch(), 1);

        let fresh = StepLedger::load(&MemoryStore::new(), "story").await.unwrap();
        assert_eq!(fresh.completed_count(), 0);
        assert_eq!(fresh.story_id, "story");
    }
}
