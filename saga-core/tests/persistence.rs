//! On-disk persistence of story memory.
//!
//! These tests write through `JsonDirStore` into a temporary directory and
//! read everything back, either directly or by reopening an engine.

use saga_core::engine::{CONFLICTS_BLOB, ENTITIES_BLOB};
use saga_core::memory::{
    ConflictStore, EntitiesByCategory, Entity, EntityCategory, EntityStore, Timeline,
};
use saga_core::persist::{load_versioned, save_versioned, JsonDirStore};
use saga_core::testing::{sample_entity_response, sample_outlines, MockGenerator};
use saga_core::{BlobStore, Conflict, PersistError, StoryConfig, StoryEngine, Task};
use std::collections::BTreeSet;
use tempfile::TempDir;

fn ten_entities() -> EntitiesByCategory {
    let records = [
        (EntityCategory::Character, "Lâm Phong", "Outer disciple", vec![1, 2, 5]),
        (EntityCategory::Character, "Tô Nguyệt", "Alchemist's daughter", vec![3]),
        (EntityCategory::Location, "Thanh Vân Sect", "Mountain sect", vec![1]),
        (EntityCategory::Location, "Hắc Phong Valley", "Misty valley", vec![4, 5]),
        (EntityCategory::Item, "Huyết Kiếm", "Blood sword", vec![2]),
        (EntityCategory::Item, "Jade Token", "Sect token", vec![1, 6]),
        (EntityCategory::Technique, "Cloud Step", "Movement art", vec![6]),
        (EntityCategory::Technique, "Iron Body", "Defensive art", vec![7]),
        (EntityCategory::SpiritualHerb, "Frost Lotus", "Cold herb", vec![8]),
        (EntityCategory::SpiritualHerb, "Ember Root", "Warm herb", vec![8, 9]),
    ];

    let mut incoming = EntitiesByCategory::new();
    for (category, name, description, chapters) in records {
        incoming.entry(category).or_default().push(
            Entity::new(name)
                .with_description(description)
                .with_chapters(chapters),
        );
    }
    incoming
}

fn tuples(store: &EntityStore) -> BTreeSet<(String, EntityCategory, Vec<u32>, Vec<String>)> {
    store
        .iter()
        .map(|(category, entity)| {
            (
                entity.name.clone(),
                category,
                entity.appear_in_chapters.iter().copied().collect(),
                entity.description.clone(),
            )
        })
        .collect()
}

// =============================================================================
// TEST 1: Entity store round trip
// =============================================================================

#[tokio::test]
async fn test_entity_store_round_trip_on_disk() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let store = JsonDirStore::new(temp_dir.path());

    let mut entities = EntityStore::new();
    let report = entities.merge(ten_entities());
    assert_eq!(report.added, 10);

    save_versioned(&store, ENTITIES_BLOB, &entities)
        .await
        .expect("Failed to save entities");
    assert!(store.path_for(ENTITIES_BLOB).exists());

    let loaded: EntityStore = load_versioned(&store, ENTITIES_BLOB)
        .await
        .expect("Failed to load entities")
        .expect("Entities blob missing");

    assert_eq!(loaded.len(), 10);
    assert_eq!(tuples(&loaded), tuples(&entities));
    let categories: BTreeSet<EntityCategory> = loaded.iter().map(|(c, _)| c).collect();
    assert_eq!(categories.len(), 5);
}

#[tokio::test]
async fn test_conflict_store_round_trip_on_disk() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let store = JsonDirStore::new(temp_dir.path());

    let mut conflicts = ConflictStore::new();
    conflicts.insert([
        Conflict::new("feud", "Feud with the Mạc clan", Timeline::LongTerm, 2)
            .with_kind("external")
            .with_characters(["Lâm Phong"]),
        Conflict::new("doubt", "Phong doubts the path", Timeline::ShortTerm, 3),
    ]);
    conflicts
        .get_mut("doubt")
        .expect("doubt exists")
        .resolve(7, Some("Phong chooses the sword".to_string()));

    save_versioned(&store, CONFLICTS_BLOB, &conflicts)
        .await
        .expect("Failed to save conflicts");
    let loaded: ConflictStore = load_versioned(&store, CONFLICTS_BLOB)
        .await
        .expect("Failed to load conflicts")
        .expect("Conflicts blob missing");

    assert_eq!(loaded, conflicts);
    assert_eq!(loaded.unresolved().len(), 1);
}

// =============================================================================
// TEST 2: Corrupt and foreign files
// =============================================================================

#[tokio::test]
async fn test_unversioned_file_is_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let store = JsonDirStore::new(temp_dir.path());

    store
        .persist(ENTITIES_BLOB, &serde_json::json!({"character": []}))
        .await
        .expect("Failed to write raw blob");

    let result: Result<Option<EntityStore>, _> = load_versioned(&store, ENTITIES_BLOB).await;
    assert!(matches!(result, Err(PersistError::InvalidFormat(_))));
}

// =============================================================================
// TEST 3: Engine state survives a restart
// =============================================================================

#[tokio::test]
async fn test_engine_reopens_from_disk() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config = StoryConfig::new("disk_story").with_total_chapters(20);

    {
        let mock =
            MockGenerator::new().with_response(Task::EntityExtraction, sample_entity_response());
        let mut engine = StoryEngine::open(config.clone(), mock, JsonDirStore::new(temp_dir.path()))
            .await
            .expect("Failed to open engine");
        engine
            .ingest_outlines(1, &sample_outlines(1, 5))
            .await
            .expect("Failed to ingest outlines");
        engine
            .set_super_summary("Phong arrives at the sect.")
            .await
            .expect("Failed to set summary");
    }

    let engine = StoryEngine::open(config, MockGenerator::new(), JsonDirStore::new(temp_dir.path()))
        .await
        .expect("Failed to reopen engine");

    assert_eq!(engine.entities().len(), 4);
    assert_eq!(engine.super_summary(), Some("Phong arrives at the sect."));
    let phong = engine
        .entities()
        .get_by_name("Lâm Phong")
        .expect("Lâm Phong persisted");
    assert_eq!(phong.entity.appear_in_chapters.len(), 5);
}
