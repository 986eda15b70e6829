//! Story configuration.
//!
//! Every field has a default, so a config file only needs to name what it
//! changes. Files are plain JSON.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::fs;

/// Errors from loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Chapter-distance thresholds used by recency scoring and window sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextWindows {
    pub immediate: u32,
    pub recent: u32,
    pub medium: u32,
    pub historical: u32,
}

impl Default for ContextWindows {
    fn default() -> Self {
        Self {
            immediate: 5,
            recent: 20,
            medium: 50,
            historical: 100,
        }
    }
}

impl ContextWindows {
    /// Windows must be strictly increasing and start above zero.
    pub fn is_ordered(&self) -> bool {
        self.immediate > 0
            && self.immediate < self.recent
            && self.recent < self.medium
            && self.medium < self.historical
    }
}

/// Upper bounds on how much memory goes into one context package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextLimits {
    pub entities: usize,
    pub events: usize,
    pub conflicts: usize,
}

impl ContextLimits {
    pub const fn new(entities: usize, events: usize, conflicts: usize) -> Self {
        Self {
            entities,
            events,
            conflicts,
        }
    }
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self::new(30, 20, 10)
    }
}

/// Configuration for one story project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoryConfig {
    /// Project identifier, used in the step ledger.
    pub story_id: String,

    /// Planned story length, drives the adaptive limits.
    pub total_planned_chapters: u32,

    /// Chapters planned together by one outline call.
    pub chapters_per_batch: u32,

    /// Chapter text longer than this is truncated before extraction prompts.
    pub max_chars_for_llm: usize,

    /// Recency windows.
    pub context_windows: ContextWindows,

    /// Bucket entities by recency before ranking.
    pub use_sliding_window: bool,

    /// Abandon stale conflicts before ranking them.
    pub use_conflict_pruning: bool,

    /// Scale limits with story progress instead of using `fixed_limits`.
    pub use_adaptive_limits: bool,

    /// Limits used when adaptive limits are off.
    pub fixed_limits: ContextLimits,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            story_id: "story_001".to_string(),
            total_planned_chapters: 300,
            chapters_per_batch: 5,
            max_chars_for_llm: 30_000,
            context_windows: ContextWindows::default(),
            use_sliding_window: true,
            use_conflict_pruning: true,
            use_adaptive_limits: true,
            fixed_limits: ContextLimits::default(),
        }
    }
}

impl StoryConfig {
    /// Create a config for the given story with defaults everywhere else.
    pub fn new(story_id: impl Into<String>) -> Self {
        Self {
            story_id: story_id.into(),
            ..Self::default()
        }
    }

    /// Load a config from a JSON file and validate it.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values that would make scoring or batching meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.story_id.trim().is_empty() {
            return Err(ConfigError::Invalid("story_id must not be empty".into()));
        }
        if self.total_planned_chapters == 0 {
            return Err(ConfigError::Invalid(
                "total_planned_chapters must be positive".into(),
            ));
        }
        if self.chapters_per_batch == 0 {
            return Err(ConfigError::Invalid(
                "chapters_per_batch must be positive".into(),
            ));
        }
        if !self.context_windows.is_ordered() {
            return Err(ConfigError::Invalid(format!(
                "context windows must be strictly increasing, got {:?}",
                self.context_windows
            )));
        }
        Ok(())
    }

    /// Batch number (1-based) that a chapter belongs to.
    pub fn batch_of(&self, chapter: u32) -> u32 {
        chapter.saturating_sub(1) / self.chapters_per_batch.max(1) + 1
    }

    pub fn with_total_chapters(mut self, total: u32) -> Self {
        self.total_planned_chapters = total;
        self
    }

    pub fn with_chapters_per_batch(mut self, chapters: u32) -> Self {
        self.chapters_per_batch = chapters;
        self
    }

    pub fn with_windows(mut self, windows: ContextWindows) -> Self {
        self.context_windows = windows;
        self
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars_for_llm = max_chars;
        self
    }

    pub fn with_sliding_window(mut self, enabled: bool) -> Self {
        self.use_sliding_window = enabled;
        self
    }

    pub fn with_conflict_pruning(mut self, enabled: bool) -> Self {
        self.use_conflict_pruning = enabled;
        self
    }

    /// Disable adaptive limits and use the given fixed ones.
    pub fn with_fixed_limits(mut self, limits: ContextLimits) -> Self {
        self.use_adaptive_limits = false;
        self.fixed_limits = limits;
        self
    }
}
