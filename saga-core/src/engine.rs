//! StoryEngine - the per-project orchestrator.
//!
//! One engine owns the memory stores and the step ledger of one story. It
//! drives the cycle ingest outlines → select context → write chapter →
//! ingest chapter, persisting every store after it changes and recording
//! each finished step so a restart picks up where the last run stopped.
//!
//! Steps are awaited strictly in order. A step is marked complete only after
//! its artifacts are persisted, and the ledger write itself must succeed for
//! the step to count as done.

use crate::config::{ConfigError, StoryConfig};
use crate::context::{ContextPackage, ContextSelector, MemoryRefs};
use crate::extract::{
    or_empty, parse_conflicts, parse_entities, parse_events, stamp_chapter, stamp_from_outlines,
};
use crate::generate::{
    chapter_entities_prompt, chapter_prompt, conflicts_prompt, events_prompt,
    outline_entities_prompt, truncate_for_prompt, GenerationError, Generator, Task,
};
use crate::ledger::{StepKey, StepLedger};
use crate::memory::{ConflictStore, EntityStore, EventStore, MergeReport};
use crate::outline::ChapterOutline;
use crate::persist::{
    batch_entities_blob, chapter_blob, chapter_entities_blob, load_versioned, save_versioned,
    BlobStore, PersistError,
};
use serde_json::{json, Value};
use thiserror::Error;

/// Blob holding the entity store.
pub const ENTITIES_BLOB: &str = "entities";
/// Blob holding the event store.
pub const EVENTS_BLOB: &str = "events";
/// Blob holding the conflict store.
pub const CONFLICTS_BLOB: &str = "conflicts";

/// Ledger metadata key of the rolling story summary.
pub const SUPER_SUMMARY_KEY: &str = "super_summary";

pub const OUTLINE_ENTITY_STEP: &str = "entity_extraction_outline";
pub const CHAPTER_ENTITY_STEP: &str = "entity_extraction_chapter";
pub const EVENT_STEP: &str = "event_extraction";
pub const CONFLICT_STEP: &str = "conflict_extraction";
pub const WRITING_STEP: &str = "chapter_writing";

/// Errors from StoryEngine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Step {0} is recorded as complete but its artifact is missing")]
    MissingArtifact(String),
}

/// What one chapter ingestion changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChapterIngest {
    pub entities: MergeReport,
    pub events_added: usize,
    pub conflicts_added: usize,
    pub conflicts_updated: usize,
    /// Steps skipped because the ledger already had them.
    pub steps_skipped: usize,
}

/// The orchestrator for one story project.
pub struct StoryEngine<G, S> {
    config: StoryConfig,
    generator: G,
    store: S,
    selector: ContextSelector,
    ledger: StepLedger,
    entities: EntityStore,
    events: EventStore,
    conflicts: ConflictStore,
}

impl<G: Generator, S: BlobStore> StoryEngine<G, S> {
    /// Open a project: validate the config, then load the ledger and the
    /// stores. Missing blobs start empty.
    pub async fn open(config: StoryConfig, generator: G, store: S) -> Result<Self, EngineError> {
        config.validate()?;

        let ledger = StepLedger::load(&store, &config.story_id).await?;
        let entities: EntityStore = load_versioned(&store, ENTITIES_BLOB)
            .await?
            .unwrap_or_default();
        let events: EventStore = load_versioned(&store, EVENTS_BLOB)
            .await?
            .unwrap_or_default();
        let conflicts: ConflictStore = load_versioned(&store, CONFLICTS_BLOB)
            .await?
            .unwrap_or_default();

        tracing::info!(
            story_id = %config.story_id,
            entities = entities.len(),
            events = events.len(),
            conflicts = conflicts.len(),
            completed_steps = ledger.completed_count(),
            "Opened story project"
        );

        Ok(Self {
            selector: ContextSelector::from_config(&config),
            config,
            generator,
            store,
            ledger,
            entities,
            events,
            conflicts,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &StoryConfig {
        &self.config
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ledger(&self) -> &StepLedger {
        &self.ledger
    }

    pub fn selector(&self) -> &ContextSelector {
        &self.selector
    }

    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    pub fn events(&self) -> &EventStore {
        &self.events
    }

    pub fn conflicts(&self) -> &ConflictStore {
        &self.conflicts
    }

    /// The rolling summary, if one has been set.
    pub fn super_summary(&self) -> Option<&str> {
        self.ledger
            .metadata(SUPER_SUMMARY_KEY)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    // ========================================================================
    // Steps
    // ========================================================================

    /// Extract entities from a batch of outlines and merge them.
    ///
    /// Conflict mentions listed by the outlines are applied every time; they
    /// only ever move forward, so repeating them is harmless.
    pub async fn ingest_outlines(
        &mut self,
        batch: u32,
        outlines: &[ChapterOutline],
    ) -> Result<MergeReport, EngineError> {
        let key = StepKey::batch(OUTLINE_ENTITY_STEP, batch);
        let mut report = MergeReport::default();

        if !self.skip(&key) {
            if outlines.is_empty() {
                self.complete_step(&key, json!({ "outlines": 0 })).await?;
            } else {
                report = self.extract_outline_entities(&key, batch, outlines).await?;
            }
        }

        let manager = self.selector.conflict_manager();
        let mut mentioned = 0;
        for outline in outlines {
            mentioned += manager
                .update_mentions(self.conflicts.as_mut_slice(), outline.chapter_number, outline)
                .len();
        }
        if mentioned > 0 {
            self.persist_conflicts().await?;
        }

        Ok(report)
    }

    /// Select the memory the writer sees for `outline`'s chapter.
    ///
    /// Stale conflicts abandoned during selection are persisted before the
    /// package is returned.
    pub async fn prepare_chapter_context(
        &mut self,
        batch: u32,
        outline: &ChapterOutline,
    ) -> Result<ContextPackage, EngineError> {
        let super_summary = self.super_summary().map(str::to_string);
        let active_before = self.conflicts.unresolved().len();

        let package = self.selector.build_package(
            batch,
            outline,
            MemoryRefs {
                entities: &self.entities,
                events: &self.events,
                conflicts: &mut self.conflicts,
            },
            super_summary,
        );

        if self.conflicts.unresolved().len() != active_before {
            self.persist_conflicts().await?;
        }
        Ok(package)
    }

    /// Generate the chapter text, or return the persisted text on replay.
    pub async fn write_chapter(
        &mut self,
        batch: u32,
        outline: &ChapterOutline,
        package: &ContextPackage,
    ) -> Result<String, EngineError> {
        let chapter = outline.chapter_number;
        let key = StepKey::chapter(WRITING_STEP, chapter);
        let blob = chapter_blob(chapter);

        if self.skip(&key) {
            return load_versioned::<_, String>(&self.store, &blob)
                .await?
                .ok_or_else(|| EngineError::MissingArtifact(key.to_string()));
        }

        let prompt = chapter_prompt(outline, package);
        let text = self.generate(&key, &prompt, Task::ChapterWriting).await?;
        let text = text.trim().to_string();
        if text.is_empty() {
            tracing::error!(step = %key, "Chapter writing returned no text");
            return Err(GenerationError::EmptyResponse(Task::ChapterWriting).into());
        }

        save_versioned(&self.store, &blob, &text).await?;
        self.complete_step(&key, json!({ "batch": batch, "chars": text.chars().count() }))
            .await?;
        tracing::info!(chapter, batch, chars = text.chars().count(), "Chapter written");
        Ok(text)
    }

    /// Fold a written chapter back into memory: entities, then events, then
    /// conflicts. Each is its own ledger step.
    pub async fn ingest_chapter(
        &mut self,
        chapter: u32,
        content: &str,
    ) -> Result<ChapterIngest, EngineError> {
        let content = truncate_for_prompt(content, self.config.max_chars_for_llm);
        let mut ingest = ChapterIngest::default();

        // Entities
        let key = StepKey::chapter(CHAPTER_ENTITY_STEP, chapter);
        if self.skip(&key) {
            ingest.steps_skipped += 1;
        } else {
            let prompt = chapter_entities_prompt(chapter, &content, &self.entities.all_names());
            let response = self.generate(&key, &prompt, Task::EntityExtraction).await?;
            let mut extracted = or_empty(parse_entities(&response), CHAPTER_ENTITY_STEP, &response);
            stamp_chapter(&mut extracted, chapter);

            save_versioned(&self.store, &chapter_entities_blob(chapter), &extracted).await?;
            ingest.entities = self.entities.merge(extracted);
            self.persist_entities().await?;
            self.complete_step(
                &key,
                json!({ "added": ingest.entities.added, "updated": ingest.entities.updated }),
            )
            .await?;
        }

        // Events
        let key = StepKey::chapter(EVENT_STEP, chapter);
        if self.skip(&key) {
            ingest.steps_skipped += 1;
        } else {
            let prompt = events_prompt(chapter, &content);
            let response = self.generate(&key, &prompt, Task::EventExtraction).await?;
            let events = or_empty(parse_events(&response, chapter), EVENT_STEP, &response);

            ingest.events_added = self.events.append(events);
            self.persist_events().await?;
            self.complete_step(&key, json!({ "events": ingest.events_added }))
                .await?;
        }

        // Conflicts
        let key = StepKey::chapter(CONFLICT_STEP, chapter);
        if self.skip(&key) {
            ingest.steps_skipped += 1;
        } else {
            let prompt = conflicts_prompt(chapter, &content, &self.conflicts.unresolved());
            let response = self.generate(&key, &prompt, Task::ConflictExtraction).await?;
            let extraction =
                or_empty(parse_conflicts(&response, chapter), CONFLICT_STEP, &response);

            let drafts = extraction
                .new_conflicts
                .into_iter()
                .enumerate()
                .map(|(index, draft)| {
                    let id = draft
                        .id
                        .clone()
                        .unwrap_or_else(|| ConflictStore::generated_id(chapter, index));
                    draft.into_conflict(id, chapter)
                });
            ingest.conflicts_added = self.conflicts.insert(drafts);

            for update in extraction.updates {
                if self.conflicts.update(&update.id, update.patch) {
                    if let Some(conflict) = self.conflicts.get_mut(&update.id) {
                        conflict.mention(chapter);
                    }
                    ingest.conflicts_updated += 1;
                }
            }

            self.persist_conflicts().await?;
            self.complete_step(
                &key,
                json!({ "new": ingest.conflicts_added, "updated": ingest.conflicts_updated }),
            )
            .await?;
        }

        tracing::info!(
            chapter,
            entities_added = ingest.entities.added,
            events_added = ingest.events_added,
            conflicts_added = ingest.conflicts_added,
            conflicts_updated = ingest.conflicts_updated,
            skipped = ingest.steps_skipped,
            "Ingested chapter"
        );
        Ok(ingest)
    }

    /// Select context, write, and ingest one chapter.
    pub async fn run_chapter(
        &mut self,
        batch: u32,
        outline: &ChapterOutline,
    ) -> Result<String, EngineError> {
        let chapter = outline.chapter_number;
        let package = self.prepare_chapter_context(batch, outline).await?;
        let text = self.write_chapter(batch, outline, &package).await?;
        self.ingest_chapter(chapter, &text).await?;

        if self.ledger.current_chapter() < chapter {
            self.commit(|ledger| ledger.update_progress(batch, chapter))
                .await?;
        }
        Ok(text)
    }

    /// Run a whole batch: outline ingestion, then every chapter in order.
    pub async fn run_batch(
        &mut self,
        batch: u32,
        outlines: &[ChapterOutline],
    ) -> Result<Vec<String>, EngineError> {
        tracing::info!(batch, chapters = outlines.len(), "Starting batch");
        self.ingest_outlines(batch, outlines).await?;

        let mut chapters = Vec::with_capacity(outlines.len());
        for outline in outlines {
            chapters.push(self.run_chapter(batch, outline).await?);
        }
        Ok(chapters)
    }

    /// Replace the rolling story summary.
    pub async fn set_super_summary(&mut self, text: impl Into<String>) -> Result<(), EngineError> {
        let text = text.into();
        self.commit(|ledger| ledger.set_metadata(SUPER_SUMMARY_KEY, text))
            .await
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn extract_outline_entities(
        &mut self,
        key: &StepKey,
        batch: u32,
        outlines: &[ChapterOutline],
    ) -> Result<MergeReport, EngineError> {
        let prompt = outline_entities_prompt(outlines, &self.entities.all_names());
        let response = self.generate(key, &prompt, Task::EntityExtraction).await?;
        let mut extracted = or_empty(parse_entities(&response), OUTLINE_ENTITY_STEP, &response);
        stamp_from_outlines(&mut extracted, outlines);

        save_versioned(&self.store, &batch_entities_blob(batch), &extracted).await?;
        let report = self.entities.merge(extracted);
        self.persist_entities().await?;

        tracing::info!(
            batch,
            outlines = outlines.len(),
            added = report.added,
            updated = report.updated,
            "Merged outline entities"
        );
        self.complete_step(
            key,
            json!({ "added": report.added, "updated": report.updated, "skipped": report.skipped }),
        )
        .await?;
        Ok(report)
    }

    fn skip(&self, key: &StepKey) -> bool {
        let done = self.ledger.is_completed(key);
        if done {
            tracing::info!(step = %key, "Step already completed, skipping");
        }
        done
    }

    async fn generate(
        &self,
        key: &StepKey,
        prompt: &str,
        task: Task,
    ) -> Result<String, EngineError> {
        tracing::debug!(
            step = %key,
            task = %task,
            prompt_chars = prompt.len(),
            "Requesting generation"
        );
        match self.generator.generate(prompt, task).await {
            Ok(text) => Ok(text),
            Err(e) => {
                tracing::error!(step = %key, error = %e, "Generation failed");
                Err(e.into())
            }
        }
    }

    /// Apply `change` to a copy of the ledger and adopt it only once saved.
    async fn commit(&mut self, change: impl FnOnce(&mut StepLedger)) -> Result<(), EngineError> {
        let mut next = self.ledger.clone();
        change(&mut next);
        if let Err(e) = next.save(&self.store).await {
            tracing::error!(error = %e, "Failed to save step ledger");
            return Err(e.into());
        }
        self.ledger = next;
        Ok(())
    }

    async fn complete_step(&mut self, key: &StepKey, metadata: Value) -> Result<(), EngineError> {
        self.commit(|ledger| ledger.mark_completed(key, metadata))
            .await
    }

    async fn persist_entities(&self) -> Result<(), EngineError> {
        save_versioned(&self.store, ENTITIES_BLOB, &self.entities).await?;
        Ok(())
    }

    async fn persist_events(&self) -> Result<(), EngineError> {
        save_versioned(&self.store, EVENTS_BLOB, &self.events).await?;
        Ok(())
    }

    async fn persist_conflicts(&self) -> Result<(), EngineError> {
        save_versioned(&self.store, CONFLICTS_BLOB, &self.conflicts).await?;
        Ok(())
    }
}
