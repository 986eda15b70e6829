//! Context selection: turning the whole story memory into a bounded package
//! for one chapter.

mod conflicts;
mod selector;

pub use conflicts::{
    batch_conflict_quota, optimal_conflicts, ConflictManager, ConflictSuggestion, PruneOutcome,
    ScoredConflict,
};
pub use selector::{
    BatchContext, ContextPackage, ContextSelector, MemoryRefs, ScoredEntity, ScoredEvent,
};
