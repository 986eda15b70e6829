//! Testing utilities for the story engine.
//!
//! This module provides tools for integration testing:
//! - `MockGenerator` for deterministic runs without a model behind them
//! - `FlakyStore` for injecting persistence failures
//! - Fixture builders for outlines and extraction responses

use crate::generate::{GenerationError, Generator, Task};
use crate::outline::ChapterOutline;
use crate::persist::{BlobStore, MemoryStore, PersistError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Mock generator
// ============================================================================

/// A scripted reply.
#[derive(Debug, Clone)]
enum MockReply {
    Text(String),
    Fail(String),
}

/// One request the mock received.
#[derive(Debug, Clone)]
pub struct GenerationCall {
    pub task: Task,
    pub prompt: String,
}

/// A generator that returns scripted responses per task.
///
/// Scripted replies are consumed in order. Once a task's queue is empty the
/// mock falls back to an empty-but-valid response for that task, so tests
/// only script what they care about.
#[derive(Debug, Default)]
pub struct MockGenerator {
    scripted: Mutex<HashMap<Task, VecDeque<MockReply>>>,
    calls: Mutex<Vec<GenerationCall>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `task`.
    pub fn with_response(self, task: Task, text: impl Into<String>) -> Self {
        self.push_response(task, text);
        self
    }

    pub fn push_response(&self, task: Task, text: impl Into<String>) {
        lock(&self.scripted)
            .entry(task)
            .or_default()
            .push_back(MockReply::Text(text.into()));
    }

    /// Make the next request for `task` fail.
    pub fn fail_next(&self, task: Task, message: impl Into<String>) {
        lock(&self.scripted)
            .entry(task)
            .or_default()
            .push_front(MockReply::Fail(message.into()));
    }

    /// Every request received so far.
    pub fn calls(&self) -> Vec<GenerationCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn calls_for(&self, task: Task) -> usize {
        lock(&self.calls).iter().filter(|c| c.task == task).count()
    }

    /// Fallback response when nothing is scripted.
    fn default_response(task: Task) -> String {
        match task {
            Task::EntityExtraction => "[]".to_string(),
            Task::EventExtraction => r#"{"events": []}"#.to_string(),
            Task::ConflictExtraction => {
                r#"{"new_conflicts": [], "updated_conflicts": []}"#.to_string()
            }
            Task::ChapterWriting => "The night passed without incident.".to_string(),
        }
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, prompt: &str, task: Task) -> Result<String, GenerationError> {
        lock(&self.calls).push(GenerationCall {
            task,
            prompt: prompt.to_string(),
        });

        let reply = lock(&self.scripted)
            .get_mut(&task)
            .and_then(VecDeque::pop_front);

        match reply {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Fail(message)) => Err(GenerationError::Failed { task, message }),
            None => Ok(Self::default_response(task)),
        }
    }
}

// ============================================================================
// Failing store
// ============================================================================

#[derive(Debug, Clone, Default)]
enum WriteFault {
    #[default]
    None,
    All,
    Named(String),
}

/// An in-memory store whose writes can be made to fail.
///
/// Clones share both the data and the fault switch.
#[derive(Debug, Clone, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fault: Arc<Mutex<WriteFault>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing store, sharing its contents.
    pub fn wrap(inner: MemoryStore) -> Self {
        Self {
            inner,
            fault: Arc::default(),
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Fail every write.
    pub fn fail_all_writes(&self) {
        *lock(&self.fault) = WriteFault::All;
    }

    /// Fail writes to one blob only.
    pub fn fail_writes_to(&self, name: impl Into<String>) {
        *lock(&self.fault) = WriteFault::Named(name.into());
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        *lock(&self.fault) = WriteFault::None;
    }

    fn should_fail(&self, name: &str) -> bool {
        match &*lock(&self.fault) {
            WriteFault::None => false,
            WriteFault::All => true,
            WriteFault::Named(target) => target == name,
        }
    }
}

#[async_trait]
impl BlobStore for FlakyStore {
    async fn persist(&self, name: &str, value: &Value) -> Result<(), PersistError> {
        if self.should_fail(name) {
            return Err(PersistError::Io(std::io::Error::other(format!(
                "injected write failure for {name}"
            ))));
        }
        self.inner.persist(name, value).await
    }

    async fn load(&self, name: &str) -> Result<Option<Value>, PersistError> {
        self.inner.load(name).await
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Outline for `chapter` featuring the recurring cast.
pub fn sample_outline(chapter: u32) -> ChapterOutline {
    ChapterOutline::new(chapter)
        .with_title(format!("Trial {chapter}"))
        .with_summary("Lâm Phong trains with the Huyết Kiếm under Elder Mạc's eye.")
        .with_character("Lâm Phong")
        .with_character("Elder Mạc")
        .with_entity("Huyết Kiếm", "item")
        .with_setting("Thanh Vân Sect")
}

/// Outlines for every chapter in `start..=end`.
pub fn sample_outlines(start: u32, end: u32) -> Vec<ChapterOutline> {
    (start..=end).map(sample_outline).collect()
}

/// Entity extraction response naming the recurring cast.
pub fn sample_entity_response() -> String {
    r#"```json
[
  {"name": "Lâm Phong", "type": "character", "description": "A stubborn outer disciple"},
  {"name": "Elder Mạc", "type": "character", "description": "Strict sword elder"},
  {"name": "Huyết Kiếm", "type": "artifact", "description": "A blade that drinks blood"},
  {"name": "Thanh Vân Sect", "type": "location", "description": "Mountain sect"}
]
```"#
        .to_string()
}

/// Event extraction response with one event for the recurring cast.
pub fn sample_event_response(description: &str) -> String {
    serde_json::json!({
        "events": [{
            "description": description,
            "importance": 0.8,
            "characters_involved": ["Lâm Phong"],
            "entities_involved": ["Huyết Kiếm"],
        }]
    })
    .to_string()
}
