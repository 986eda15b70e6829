//! Narrative memory: entities, events and conflicts.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     narrative memory                     │
//! │                                                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────┐  │
//! │  │ EntityStore  │  │ EventStore   │  │ ConflictStore │  │
//! │  │ (category →  │  │ (append-only │  │ (lifecycle:   │  │
//! │  │  entities)   │  │  event log)  │  │  active → end)│  │
//! │  └──────────────┘  └──────────────┘  └───────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The stores are plain owned values. Whoever owns them (normally the
//! `StoryEngine`) persists them after each mutation.

mod conflict;
mod entity;
mod event;

pub use conflict::{Conflict, ConflictPatch, ConflictStatus, ConflictStore, Timeline};
pub use entity::{
    CategorizedEntity, EntitiesByCategory, Entity, EntityCategory, EntityStore, MergeReport,
    DEFAULT_IMPORTANCE,
};
pub use event::{Event, EventStore};
