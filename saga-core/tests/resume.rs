//! Resumability: completed steps are never redone, failed steps are.

use saga_core::engine::{CHAPTER_ENTITY_STEP, EVENT_STEP, WRITING_STEP};
use saga_core::ledger::LEDGER_BLOB;
use saga_core::testing::{sample_event_response, sample_outline, FlakyStore, MockGenerator};
use saga_core::{EngineError, MemoryStore, StepKey, StoryConfig, StoryEngine, Task};
use std::sync::Arc;

fn config() -> StoryConfig {
    StoryConfig::new("resume_story").with_total_chapters(30)
}

fn scripted_chapter(text: &str) -> Arc<MockGenerator> {
    Arc::new(
        MockGenerator::new()
            .with_response(Task::ChapterWriting, text)
            .with_response(
                Task::EntityExtraction,
                r#"[{"name": "Lâm Phong", "type": "character", "description": "Outer disciple"}]"#,
            )
            .with_response(
                Task::EventExtraction,
                sample_event_response("Phong passes the gate trial"),
            ),
    )
}

// =============================================================================
// TEST 1: Replaying a finished chapter costs nothing
// =============================================================================

#[tokio::test]
async fn test_replay_of_completed_chapter_makes_no_calls() {
    let store = MemoryStore::new();
    let outline = sample_outline(1);

    let first = scripted_chapter("Phong climbed the nine hundred steps.");
    let mut engine = StoryEngine::open(config(), first.clone(), store.clone())
        .await
        .expect("Failed to open engine");
    let text = engine.run_chapter(1, &outline).await.expect("First run failed");
    assert_eq!(first.call_count(), 4);
    drop(engine);

    let replay = Arc::new(MockGenerator::new());
    let mut engine = StoryEngine::open(config(), replay.clone(), store)
        .await
        .expect("Failed to reopen engine");
    let again = engine.run_chapter(1, &outline).await.expect("Replay failed");

    assert_eq!(again, text);
    assert_eq!(replay.call_count(), 0);
    assert_eq!(engine.events().len(), 1);
    assert_eq!(engine.entities().len(), 1);
}

// =============================================================================
// TEST 2: A failed ledger write leaves the step open
// =============================================================================

#[tokio::test]
async fn test_ledger_failure_aborts_step() {
    let store = FlakyStore::new();
    let mock = scripted_chapter("unused");
    let mut engine = StoryEngine::open(config(), mock.clone(), store.clone())
        .await
        .expect("Failed to open engine");

    store.fail_writes_to(LEDGER_BLOB);
    let result = engine.ingest_chapter(2, "Phong meets Tô Nguyệt.").await;

    assert!(matches!(result, Err(EngineError::Persist(_))));
    let entity_step = StepKey::chapter(CHAPTER_ENTITY_STEP, 2);
    assert!(!engine.ledger().is_completed(&entity_step));
    assert_eq!(mock.calls_for(Task::EventExtraction), 0);

    // Once storage recovers the step runs again and merging stays idempotent.
    store.heal();
    mock.push_response(
        Task::EntityExtraction,
        r#"[{"name": "Lâm Phong", "type": "character", "description": "Outer disciple"}]"#,
    );
    engine
        .ingest_chapter(2, "Phong meets Tô Nguyệt.")
        .await
        .expect("Retry failed");

    assert!(engine.ledger().is_completed(&entity_step));
    assert_eq!(mock.calls_for(Task::EntityExtraction), 2);
    assert_eq!(engine.entities().len(), 1);
    let phong = engine.entities().get_by_name("Lâm Phong").expect("merged");
    assert_eq!(phong.entity.description, vec!["Outer disciple".to_string()]);
}

// =============================================================================
// TEST 3: A crash mid-chapter redoes only the unfinished steps
// =============================================================================

#[tokio::test]
async fn test_restart_after_failed_extraction() {
    let store = MemoryStore::new();
    let outline = sample_outline(3);

    let first = scripted_chapter("The valley mist parted.");
    first.fail_next(Task::EventExtraction, "connection reset");
    let mut engine = StoryEngine::open(config(), first.clone(), store.clone())
        .await
        .expect("Failed to open engine");
    let result = engine.run_chapter(1, &outline).await;
    assert!(matches!(result, Err(EngineError::Generation(_))));
    drop(engine);

    let second = Arc::new(
        MockGenerator::new()
            .with_response(Task::EventExtraction, sample_event_response("The mist parts")),
    );
    let mut engine = StoryEngine::open(config(), second.clone(), store)
        .await
        .expect("Failed to reopen engine");

    assert!(engine.ledger().is_completed(&StepKey::chapter(WRITING_STEP, 3)));
    assert!(!engine.ledger().is_completed(&StepKey::chapter(EVENT_STEP, 3)));

    let text = engine.run_chapter(1, &outline).await.expect("Resume failed");
    assert_eq!(text, "The valley mist parted.");
    assert_eq!(second.calls_for(Task::ChapterWriting), 0);
    assert_eq!(second.calls_for(Task::EntityExtraction), 0);
    assert_eq!(second.calls_for(Task::EventExtraction), 1);
    assert_eq!(second.calls_for(Task::ConflictExtraction), 1);
    assert_eq!(engine.ledger().current_chapter(), 3);
}
