//! Narrative memory and relevance engine for long serialized stories.
//!
//! This crate provides:
//! - Entity, event and conflict memory extracted from outlines and chapters
//! - Recency- and overlap-based relevance scoring with phase-adaptive limits
//! - Conflict lifecycle management with staleness pruning
//! - A step ledger that makes every run resumable
//!
//! # Quick Start
//!
//! ```ignore
//! use saga_core::{ChapterOutline, JsonDirStore, StoryConfig, StoryEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StoryConfig::load("story.json").await?;
//!     let store = JsonDirStore::new("data/story_001");
//!     let mut engine = StoryEngine::open(config, MyGenerator::new(), store).await?;
//!
//!     let outlines = vec![ChapterOutline::new(1).with_title("The Outer Gate")];
//!     let chapters = engine.run_batch(1, &outlines).await?;
//!     println!("{}", chapters[0]);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod extract;
pub mod generate;
pub mod ledger;
pub mod memory;
pub mod outline;
pub mod persist;
pub mod relevance;
pub mod testing;

// Primary public API
pub use config::{ConfigError, ContextLimits, ContextWindows, StoryConfig};
pub use context::{ContextPackage, ContextSelector, ConflictManager};
pub use engine::{ChapterIngest, EngineError, StoryEngine};
pub use generate::{GenerationError, Generator, Task};
pub use ledger::{StepKey, StepLedger};
pub use memory::{
    Conflict, ConflictStatus, ConflictStore, Entity, EntityCategory, EntityStore, Event,
    EventStore, Timeline,
};
pub use outline::ChapterOutline;
pub use persist::{BlobStore, JsonDirStore, MemoryStore, PersistError};
pub use relevance::{RecencyWindow, RelevanceScorer, StoryPhase};
pub use testing::{FlakyStore, MockGenerator};
