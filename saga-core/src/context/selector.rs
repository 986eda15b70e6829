//! Chooses which memory goes into the next generation request.

use super::conflicts::{ConflictManager, ConflictSuggestion, ScoredConflict};
use crate::config::{ContextLimits, StoryConfig};
use crate::memory::{
    Conflict, ConflictStore, Entity, EntityCategory, EntityStore, Event, EventStore,
};
use crate::outline::ChapterOutline;
use crate::relevance::{RecencyWindow, RelevanceScorer, StoryPhase};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// Anything scoring below this is never surfaced.
const MIN_RELEVANCE: f32 = 0.05;

/// Items older than the historical window need at least this relevance.
const OLD_RELEVANCE_GATE: f32 = 0.8;

/// At most this many old items are admitted.
const OLD_ITEM_CAP: usize = 5;

/// Event limit for batch-level context.
const BATCH_EVENT_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredEntity {
    pub category: EntityCategory,
    pub entity: Entity,
    pub relevance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredEvent {
    pub event: Event,
    pub relevance: f32,
}

/// Borrowed view of the three stores for one selection pass.
///
/// Conflicts are mutable because selection may abandon stale ones.
pub struct MemoryRefs<'a> {
    pub entities: &'a EntityStore,
    pub events: &'a EventStore,
    pub conflicts: &'a mut ConflictStore,
}

/// Everything the writer gets to know about the story for one chapter.
#[derive(Debug, Clone, Serialize)]
pub struct ContextPackage {
    pub chapter: u32,
    pub batch: u32,
    pub phase: StoryPhase,
    pub limits: ContextLimits,
    pub entities: Vec<ScoredEntity>,
    pub events: Vec<ScoredEvent>,
    pub conflicts: Vec<ScoredConflict>,
    pub conflicts_needing_resolution: Vec<Conflict>,
    pub conflict_guidance: ConflictSuggestion,
    pub super_summary: Option<String>,
}

impl ContextPackage {
    /// Render the package as prompt text.
    pub fn to_prompt_string(&self) -> String {
        let mut out = String::new();

        if let Some(summary) = self.super_summary.as_deref().filter(|s| !s.is_empty()) {
            out.push_str("## Story so far\n");
            let _ = writeln!(out, "{summary}\n");
        }

        if !self.entities.is_empty() {
            out.push_str("## Relevant entities\n");
            let mut by_category: BTreeMap<EntityCategory, Vec<&ScoredEntity>> = BTreeMap::new();
            for scored in &self.entities {
                by_category.entry(scored.category).or_default().push(scored);
            }
            for (category, entities) in by_category {
                let _ = writeln!(out, "### {category}");
                for scored in entities {
                    let entity = &scored.entity;
                    let _ = write!(out, "- {}", entity.name);
                    if !entity.description.is_empty() {
                        let _ = write!(out, ": {}", entity.summary());
                    }
                    if let Some(last) = entity.last_appearance() {
                        let _ = write!(out, " (last seen ch {last})");
                    }
                    out.push('\n');
                }
            }
            out.push('\n');
        }

        if !self.events.is_empty() {
            out.push_str("## Relevant events\n");
            for scored in &self.events {
                let event = &scored.event;
                let _ = writeln!(out, "- (ch {}) {}", event.chapter, event.description);
            }
            out.push('\n');
        }

        if !self.conflicts.is_empty() {
            out.push_str("## Active conflicts\n");
            for scored in &self.conflicts {
                let c = &scored.conflict;
                let _ = writeln!(out, "- [{}] {} (id: {})", c.timeline, c.description, c.id);
            }
            out.push('\n');
        }

        if !self.conflicts_needing_resolution.is_empty() {
            out.push_str("## Conflicts due for resolution\n");
            for c in &self.conflicts_needing_resolution {
                let _ = writeln!(
                    out,
                    "- {} (id: {}, open since ch {})",
                    c.description, c.id, c.introduced_chapter
                );
            }
            out.push('\n');
        }

        let _ = writeln!(out, "{}", self.conflict_guidance.describe(self.phase));
        out
    }
}

/// Memory tied to the conflicts a batch is about.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchContext {
    pub conflicts: Vec<Conflict>,
    pub entities: Vec<(EntityCategory, Entity)>,
    pub events: Vec<Event>,
}

/// Selects bounded, relevant subsets of story memory.
#[derive(Debug, Clone)]
pub struct ContextSelector {
    scorer: RelevanceScorer,
    conflicts: ConflictManager,
    use_sliding_window: bool,
    use_conflict_pruning: bool,
    use_adaptive_limits: bool,
    fixed_limits: ContextLimits,
    total_planned_chapters: u32,
}

impl ContextSelector {
    pub fn from_config(config: &StoryConfig) -> Self {
        let scorer = RelevanceScorer::new(config.context_windows);
        Self {
            scorer,
            conflicts: ConflictManager::new(scorer),
            use_sliding_window: config.use_sliding_window,
            use_conflict_pruning: config.use_conflict_pruning,
            use_adaptive_limits: config.use_adaptive_limits,
            fixed_limits: config.fixed_limits,
            total_planned_chapters: config.total_planned_chapters,
        }
    }

    pub fn scorer(&self) -> &RelevanceScorer {
        &self.scorer
    }

    pub fn conflict_manager(&self) -> &ConflictManager {
        &self.conflicts
    }

    pub fn phase(&self, chapter: u32) -> StoryPhase {
        StoryPhase::from_progress(chapter, self.total_planned_chapters)
    }

    /// Capacity for `chapter`.
    pub fn limits(&self, chapter: u32) -> ContextLimits {
        if self.use_adaptive_limits {
            self.phase(chapter).limits()
        } else {
            self.fixed_limits
        }
    }

    /// Pick at most `cap` entities for `current`.
    pub fn select_entities(
        &self,
        store: &EntityStore,
        current: u32,
        outline: Option<&ChapterOutline>,
        cap: usize,
    ) -> Vec<ScoredEntity> {
        if self.use_sliding_window {
            self.sliding_window_entities(store, current, outline, cap)
        } else {
            let mut scored: Vec<ScoredEntity> = store
                .iter()
                .map(|(category, entity)| self.score_entity(category, entity, current, outline))
                .filter(|s| s.relevance >= MIN_RELEVANCE)
                .collect();
            sort_by_relevance(&mut scored, |s| s.relevance);
            scored.truncate(cap);
            scored
        }
    }

    /// Recency-bucketed sampling, then a hard cap by relevance.
    fn sliding_window_entities(
        &self,
        store: &EntityStore,
        current: u32,
        outline: Option<&ChapterOutline>,
        cap: usize,
    ) -> Vec<ScoredEntity> {
        let mut buckets: BTreeMap<RecencyWindow, Vec<ScoredEntity>> = BTreeMap::new();

        for (category, entity) in store.iter() {
            let Some(last) = entity.last_appearance() else {
                continue;
            };
            let scored = self.score_entity(category, entity, current, outline);
            if scored.relevance < MIN_RELEVANCE {
                continue;
            }
            buckets
                .entry(self.scorer.window_of(current, last))
                .or_default()
                .push(scored);
        }

        let mut selected = Vec::new();
        for (window, mut bucket) in buckets {
            sort_by_relevance(&mut bucket, |s| s.relevance);
            match window {
                RecencyWindow::Old => selected.extend(
                    bucket
                        .into_iter()
                        .filter(|s| s.relevance > OLD_RELEVANCE_GATE)
                        .take(OLD_ITEM_CAP),
                ),
                _ => {
                    let keep = window.sample_size(bucket.len());
                    selected.extend(bucket.into_iter().take(keep));
                }
            }
        }

        if selected.len() > cap {
            sort_by_relevance(&mut selected, |s| s.relevance);
            selected.truncate(cap);
        }

        tracing::debug!(chapter = current, selected = selected.len(), cap, "Selected entities");
        selected
    }

    /// Pick at most `cap` events for `current`, most relevant first.
    pub fn select_events(
        &self,
        store: &EventStore,
        current: u32,
        outline: Option<&ChapterOutline>,
        cap: usize,
    ) -> Vec<ScoredEvent> {
        let mut scored: Vec<ScoredEvent> = store
            .iter()
            .map(|event| ScoredEvent {
                relevance: self.scorer.event_relevance(event, current, outline),
                event: event.clone(),
            })
            .filter(|s| s.relevance >= MIN_RELEVANCE)
            .collect();
        sort_by_relevance(&mut scored, |s| s.relevance);
        scored.truncate(cap);
        scored
    }

    /// Assemble the context package for the chapter `outline` describes.
    pub fn build_package(
        &self,
        batch: u32,
        outline: &ChapterOutline,
        memory: MemoryRefs<'_>,
        super_summary: Option<String>,
    ) -> ContextPackage {
        let chapter = outline.chapter_number;
        let phase = self.phase(chapter);
        let limits = self.limits(chapter);

        let entities =
            self.select_entities(memory.entities, chapter, Some(outline), limits.entities);
        let events = self.select_events(memory.events, chapter, Some(outline), limits.events);

        let mut conflicts = self.conflicts.select_for_batch(
            memory.conflicts.as_mut_slice(),
            batch,
            chapter,
            self.use_conflict_pruning,
        );
        conflicts.truncate(limits.conflicts);

        let needing_resolution: Vec<Conflict> = self
            .conflicts
            .needing_resolution(memory.conflicts.all(), chapter)
            .into_iter()
            .cloned()
            .collect();

        let active_count = memory.conflicts.unresolved().len();
        let conflict_guidance = self.conflicts.suggest_new_conflicts(active_count, phase);

        tracing::info!(
            chapter,
            batch,
            phase = %phase,
            entities = entities.len(),
            events = events.len(),
            conflicts = conflicts.len(),
            "Built context package"
        );

        ContextPackage {
            chapter,
            batch,
            phase,
            limits,
            entities,
            events,
            conflicts,
            conflicts_needing_resolution: needing_resolution,
            conflict_guidance,
            super_summary,
        }
    }

    /// Characters, entities and events tied to the currently active conflicts.
    pub fn batch_context(
        &self,
        entities: &EntityStore,
        events: &EventStore,
        conflicts: &ConflictStore,
    ) -> BatchContext {
        let active: Vec<Conflict> = conflicts.unresolved().into_iter().cloned().collect();

        let mut names = BTreeSet::new();
        for conflict in &active {
            names.extend(conflict.characters_involved.iter().cloned());
            names.extend(conflict.entities_involved.iter().cloned());
        }
        let names: Vec<String> = names.into_iter().collect();

        let mut seen = BTreeSet::new();
        let mut resolved = Vec::new();
        for name in &names {
            if let Some(found) = entities.get_by_name(name) {
                if seen.insert((found.category, found.entity.name.clone())) {
                    resolved.push((found.category, found.entity.clone()));
                }
            }
        }

        let related = events
            .by_entities(&names, BATCH_EVENT_LIMIT)
            .into_iter()
            .cloned()
            .collect();

        BatchContext {
            conflicts: active,
            entities: resolved,
            events: related,
        }
    }

    fn score_entity(
        &self,
        category: EntityCategory,
        entity: &Entity,
        current: u32,
        outline: Option<&ChapterOutline>,
    ) -> ScoredEntity {
        ScoredEntity {
            category,
            relevance: self.scorer.entity_relevance(entity, current, outline),
            entity: entity.clone(),
        }
    }
}

/// Stable sort, highest relevance first.
fn sort_by_relevance<T>(items: &mut [T], relevance: impl Fn(&T) -> f32) {
    items.sort_by(|a, b| {
        relevance(b)
            .partial_cmp(&relevance(a))
            .unwrap_or(Ordering::Equal)
    });
}
