//! Named story entities, partitioned by category.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Importance assigned when extraction gives none.
pub const DEFAULT_IMPORTANCE: f32 = 0.5;

pub(crate) fn default_importance() -> f32 {
    DEFAULT_IMPORTANCE
}

/// Kinds of entities tracked across the story.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Character,
    Location,
    Item,
    Technique,
    SpiritualHerb,
    Beast,
    Faction,
    Other,
}

impl EntityCategory {
    pub const ALL: [EntityCategory; 8] = [
        EntityCategory::Character,
        EntityCategory::Location,
        EntityCategory::Item,
        EntityCategory::Technique,
        EntityCategory::SpiritualHerb,
        EntityCategory::Beast,
        EntityCategory::Faction,
        EntityCategory::Other,
    ];

    /// Map an extraction label (singular or plural storage key) to a category.
    ///
    /// Unknown labels become `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "character" | "characters" => EntityCategory::Character,
            "location" | "locations" => EntityCategory::Location,
            "item" | "items" | "artifact" | "artifacts" => EntityCategory::Item,
            "technique" | "techniques" => EntityCategory::Technique,
            "spiritual_herb" | "spiritual_herbs" | "elixir" | "elixirs" => {
                EntityCategory::SpiritualHerb
            }
            "beast" | "beasts" => EntityCategory::Beast,
            "faction" | "factions" => EntityCategory::Faction,
            _ => EntityCategory::Other,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EntityCategory::Character => "character",
            EntityCategory::Location => "location",
            EntityCategory::Item => "item",
            EntityCategory::Technique => "technique",
            EntityCategory::SpiritualHerb => "spiritual_herb",
            EntityCategory::Beast => "beast",
            EntityCategory::Faction => "faction",
            EntityCategory::Other => "other",
        }
    }
}

impl std::fmt::Display for EntityCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An entity observed in the story (character, place, item, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Name, unique within its category ignoring case.
    pub name: String,
    /// Description fragments in the order they were first seen.
    #[serde(default)]
    pub description: Vec<String>,
    /// Chapters the entity appears in.
    #[serde(default)]
    pub appear_in_chapters: BTreeSet<u32>,
    /// Importance score (0.0 to 1.0).
    #[serde(default = "default_importance")]
    pub importance: f32,
}

impl Entity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Vec::new(),
            appear_in_chapters: BTreeSet::new(),
            importance: DEFAULT_IMPORTANCE,
        }
    }

    pub fn with_description(mut self, fragment: impl Into<String>) -> Self {
        self.description.push(fragment.into());
        self
    }

    pub fn with_chapter(mut self, chapter: u32) -> Self {
        self.appear_in_chapters.insert(chapter);
        self
    }

    pub fn with_chapters(mut self, chapters: impl IntoIterator<Item = u32>) -> Self {
        self.appear_in_chapters.extend(chapters);
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    /// Check if a name matches this entity (case-insensitive).
    pub fn matches_name(&self, query: &str) -> bool {
        self.name.to_lowercase() == query.trim().to_lowercase()
    }

    /// Most recent chapter the entity appeared in.
    pub fn last_appearance(&self) -> Option<u32> {
        self.appear_in_chapters.last().copied()
    }

    pub fn appearance_count(&self) -> usize {
        self.appear_in_chapters.len()
    }

    /// Description fragments joined into one line.
    pub fn summary(&self) -> String {
        self.description.join(" ")
    }

    /// Fold another observation of the same entity into this one.
    ///
    /// Returns true if anything changed.
    pub fn absorb(&mut self, other: Entity) -> bool {
        let mut changed = false;

        for chapter in other.appear_in_chapters {
            changed |= self.appear_in_chapters.insert(chapter);
        }

        for fragment in other.description {
            let fragment = fragment.trim();
            if fragment.is_empty() || self.description.iter().any(|d| d == fragment) {
                continue;
            }
            self.description.push(fragment.to_string());
            changed = true;
        }

        changed
    }
}

/// Entities grouped by category, the shape extraction produces.
pub type EntitiesByCategory = BTreeMap<EntityCategory, Vec<Entity>>;

/// An entity together with the category it is stored under.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategorizedEntity<'a> {
    pub category: EntityCategory,
    pub entity: &'a Entity,
}

/// Counts from one merge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// All known entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityStore {
    categories: BTreeMap<EntityCategory, Vec<Entity>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge newly extracted entities into the store.
    ///
    /// A record whose name matches an existing entity in the same category
    /// (ignoring case) has its chapters unioned and unseen description
    /// fragments appended. Anything else is inserted. Records without a
    /// name are skipped.
    pub fn merge(&mut self, incoming: EntitiesByCategory) -> MergeReport {
        let mut report = MergeReport::default();

        for (category, entities) in incoming {
            let existing = self.categories.entry(category).or_default();

            for mut entity in entities {
                entity.name = entity.name.trim().to_string();
                if entity.name.is_empty() {
                    tracing::warn!(category = %category, "Skipping entity without a name");
                    report.skipped += 1;
                    continue;
                }

                match existing.iter_mut().find(|e| e.matches_name(&entity.name)) {
                    Some(current) => {
                        current.absorb(entity);
                        report.updated += 1;
                    }
                    None => {
                        let mut fresh = Entity::new(entity.name.clone())
                            .with_importance(entity.importance);
                        fresh.absorb(entity);
                        existing.push(fresh);
                        report.added += 1;
                    }
                }
            }
        }

        self.categories.retain(|_, entities| !entities.is_empty());

        tracing::debug!(
            added = report.added,
            updated = report.updated,
            skipped = report.skipped,
            "Merged entities"
        );
        report
    }

    /// Find an entity by name in any category (case-insensitive).
    pub fn get_by_name(&self, name: &str) -> Option<CategorizedEntity<'_>> {
        self.iter()
            .find(|(_, entity)| entity.matches_name(name))
            .map(|(category, entity)| CategorizedEntity { category, entity })
    }

    /// Entities that appear in `chapter`, optionally restricted to some categories.
    ///
    /// Categories with no match are omitted.
    pub fn entities_in_chapter(
        &self,
        chapter: u32,
        categories: Option<&[EntityCategory]>,
    ) -> EntitiesByCategory {
        self.categories
            .iter()
            .filter(|(category, _)| categories.map_or(true, |only| only.contains(category)))
            .filter_map(|(category, entities)| {
                let matching: Vec<Entity> = entities
                    .iter()
                    .filter(|e| e.appear_in_chapters.contains(&chapter))
                    .cloned()
                    .collect();
                (!matching.is_empty()).then_some((*category, matching))
            })
            .collect()
    }

    /// Entities stored under one category.
    pub fn category(&self, category: EntityCategory) -> &[Entity] {
        self.categories
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Names of every stored entity.
    pub fn all_names(&self) -> Vec<String> {
        self.iter().map(|(_, e)| e.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityCategory, &Entity)> + '_ {
        self.categories
            .iter()
            .flat_map(|(category, entities)| entities.iter().map(move |e| (*category, e)))
    }

    pub fn len(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
