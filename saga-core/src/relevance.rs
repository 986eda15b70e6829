//! Relevance scoring for story memory.
//!
//! All scores are pure functions of the stored record, the chapter being
//! prepared and (where it matters) that chapter's outline. Nothing is
//! cached between chapters.
//!
//! | Score              | Recency | Frequency | Outline | Importance | Other             |
//! |--------------------|---------|-----------|---------|------------|-------------------|
//! | entity relevance   | 0.4     | 0.2       | 0.3     | 0.1        |                   |
//! | event relevance    | 0.4     |           |         | 0.3        | overlap 0.2 + 0.1 |
//! | conflict priority  | 0.3     |           |         |            | urgency 0.4, cast 0.3 |

use crate::config::{ContextLimits, ContextWindows};
use crate::memory::{Conflict, Entity, Event};
use crate::outline::ChapterOutline;
use serde::{Deserialize, Serialize};

/// Appearance counts are normalized against at most this many chapters.
const FREQUENCY_CAP: u32 = 50;

/// Recency bucket an item falls into, by chapter distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecencyWindow {
    Immediate,
    Recent,
    Medium,
    Historical,
    Old,
}

impl RecencyWindow {
    /// Classify a chapter distance. Negative distances count as immediate.
    pub fn classify(distance: i64, windows: &ContextWindows) -> Self {
        if distance <= i64::from(windows.immediate) {
            RecencyWindow::Immediate
        } else if distance <= i64::from(windows.recent) {
            RecencyWindow::Recent
        } else if distance <= i64::from(windows.medium) {
            RecencyWindow::Medium
        } else if distance <= i64::from(windows.historical) {
            RecencyWindow::Historical
        } else {
            RecencyWindow::Old
        }
    }

    /// Share of a bucket that sliding-window selection keeps.
    ///
    /// `Old` items are admitted by a separate relevance gate instead.
    pub fn sample_fraction(&self) -> f32 {
        match self {
            RecencyWindow::Immediate => 1.0,
            RecencyWindow::Recent => 0.8,
            RecencyWindow::Medium => 0.5,
            RecencyWindow::Historical => 0.2,
            RecencyWindow::Old => 0.0,
        }
    }

    /// Number of items kept out of `count`, rounding down.
    pub fn sample_size(&self, count: usize) -> usize {
        match self {
            RecencyWindow::Immediate => count,
            RecencyWindow::Recent => count * 4 / 5,
            RecencyWindow::Medium => count / 2,
            RecencyWindow::Historical => count / 5,
            RecencyWindow::Old => 0,
        }
    }
}

/// Where the story is, by fraction of planned chapters written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryPhase {
    Introduction,
    Rising,
    Development,
    Climax,
    Resolution,
}

impl StoryPhase {
    /// Phase for `current` out of `total` planned chapters.
    ///
    /// Boundaries are inclusive: 10%, 30%, 70% and 90%.
    pub fn from_progress(current: u32, total: u32) -> Self {
        let current = u64::from(current) * 10;
        let total = u64::from(total.max(1));
        if current <= total {
            StoryPhase::Introduction
        } else if current <= total * 3 {
            StoryPhase::Rising
        } else if current <= total * 7 {
            StoryPhase::Development
        } else if current <= total * 9 {
            StoryPhase::Climax
        } else {
            StoryPhase::Resolution
        }
    }

    /// Context capacity for this phase.
    pub fn limits(&self) -> ContextLimits {
        match self {
            StoryPhase::Introduction => ContextLimits::new(15, 8, 5),
            StoryPhase::Rising => ContextLimits::new(25, 15, 8),
            StoryPhase::Development => ContextLimits::new(35, 20, 12),
            StoryPhase::Climax => ContextLimits::new(30, 25, 15),
            StoryPhase::Resolution => ContextLimits::new(20, 15, 8),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StoryPhase::Introduction => "introduction",
            StoryPhase::Rising => "rising",
            StoryPhase::Development => "development",
            StoryPhase::Climax => "climax",
            StoryPhase::Resolution => "resolution",
        }
    }
}

impl std::fmt::Display for StoryPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Context capacity scaled with story progress.
pub fn adaptive_limits(current: u32, total: u32) -> ContextLimits {
    StoryPhase::from_progress(current, total).limits()
}

/// Scores entities, events and conflicts against the chapter being prepared.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelevanceScorer {
    windows: ContextWindows,
}

impl RelevanceScorer {
    pub fn new(windows: ContextWindows) -> Self {
        Self { windows }
    }

    pub fn windows(&self) -> &ContextWindows {
        &self.windows
    }

    /// Step-decay recency for a chapter distance.
    pub fn recency_score(&self, distance: i64) -> f32 {
        if distance <= 0 {
            return 1.0;
        }
        match RecencyWindow::classify(distance, &self.windows) {
            RecencyWindow::Immediate => 0.9,
            RecencyWindow::Recent => 0.7,
            RecencyWindow::Medium => 0.4,
            RecencyWindow::Historical => 0.2,
            RecencyWindow::Old => 0.05,
        }
    }

    /// Recency of something last seen in `past` when preparing `current`.
    pub fn recency_between(&self, current: u32, past: u32) -> f32 {
        self.recency_score(distance(current, past))
    }

    /// Recency bucket of something last seen in `past`.
    pub fn window_of(&self, current: u32, past: u32) -> RecencyWindow {
        RecencyWindow::classify(distance(current, past), &self.windows)
    }

    /// How useful an entity is for writing `current`, in [0, 1].
    pub fn entity_relevance(
        &self,
        entity: &Entity,
        current: u32,
        outline: Option<&ChapterOutline>,
    ) -> f32 {
        let mut score = 0.0;

        if let Some(last) = entity.last_appearance() {
            score += 0.4 * self.recency_between(current, last);
        }

        let max_frequency = current.min(FREQUENCY_CAP);
        if max_frequency > 0 {
            let frequency = entity.appearance_count() as f32 / max_frequency as f32;
            score += 0.2 * frequency.min(1.0);
        }

        if outline.is_some_and(|o| o.mentions(&entity.name)) {
            score += 0.3;
        }

        score += 0.1 * entity.importance;

        score.clamp(0.0, 1.0)
    }

    /// How useful a past event is for writing `current`, in [0, 1].
    pub fn event_relevance(
        &self,
        event: &Event,
        current: u32,
        outline: Option<&ChapterOutline>,
    ) -> f32 {
        let mut score = 0.4 * self.recency_between(current, event.chapter);
        score += 0.3 * event.importance;

        if let Some(outline) = outline {
            let characters = outline.character_names();
            let entities = outline.entity_names();
            score += 0.2 * overlap_ratio(event.characters_involved.iter(), &characters);
            score += 0.1 * overlap_ratio(event.entities_involved.iter(), &entities);
        }

        score.clamp(0.0, 1.0)
    }

    /// How pressing an active conflict is at `current`, in [0, 1].
    pub fn conflict_priority(&self, conflict: &Conflict, current: u32) -> f32 {
        let timeline = conflict.timeline;
        let elapsed = u64::from(conflict.elapsed(current));
        let expected = u64::from(timeline.expected_duration());

        let escalator = if elapsed * 5 >= expected * 4 {
            1.5
        } else if elapsed * 2 >= expected {
            1.2
        } else {
            1.0
        };
        let urgency = (timeline.base_urgency() * escalator).min(1.0);

        let freshness = self.recency_between(current, conflict.last_mentioned_chapter);

        let cast = if conflict.characters_involved.is_empty() {
            0.3
        } else {
            0.6
        };

        (0.4 * urgency + 0.3 * freshness + 0.3 * cast).clamp(0.0, 1.0)
    }
}

fn distance(current: u32, past: u32) -> i64 {
    i64::from(current) - i64::from(past)
}

/// Share of `names` found in `reference` (already lowercased).
fn overlap_ratio<'a>(
    names: impl Iterator<Item = &'a String>,
    reference: &std::collections::BTreeSet<String>,
) -> f32 {
    let mut total = 0usize;
    let mut shared = 0usize;
    for name in names {
        total += 1;
        if reference.contains(&name.trim().to_lowercase()) {
            shared += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        shared as f32 / total as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Timeline;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    // ========================================================================
    // Recency
    // ========================================================================

    #[test]
    fn test_recency_steps() {
        let scorer = RelevanceScorer::default();
        assert_eq!(scorer.recency_score(0), 1.0);
        assert_eq!(scorer.recency_score(-3), 1.0);
        assert_eq!(scorer.recency_score(5), 0.9);
        assert_eq!(scorer.recency_score(6), 0.7);
        assert_eq!(scorer.recency_score(20), 0.7);
        assert_eq!(scorer.recency_score(50), 0.4);
        assert_eq!(scorer.recency_score(100), 0.2);
        assert_eq!(scorer.recency_score(101), 0.05);
    }

    #[test]
    fn test_recency_is_monotonic() {
        let scorer = RelevanceScorer::default();
        let mut previous = scorer.recency_score(0);
        for d in 1..300 {
            let score = scorer.recency_score(d);
            assert!(score <= previous, "recency rose at distance {d}");
            previous = score;
        }
    }

    #[test]
    fn test_window_sample_sizes() {
        assert_eq!(RecencyWindow::Immediate.sample_size(7), 7);
        assert_eq!(RecencyWindow::Recent.sample_size(15), 12);
        assert_eq!(RecencyWindow::Medium.sample_size(7), 3);
        assert_eq!(RecencyWindow::Historical.sample_size(4), 0);
        assert_eq!(RecencyWindow::Old.sample_size(10), 0);
    }

    // ========================================================================
    // Entities and events
    // ========================================================================

    #[test]
    fn test_entity_relevance_components() {
        let scorer = RelevanceScorer::default();
        let outline = ChapterOutline::new(100).with_character("Lâm Phong");

        let hero = Entity::new("Lâm Phong").with_chapter(100);
        // 0.4 * 1.0 + 0.2 * (1 / 50) + 0.3 + 0.1 * 0.5
        assert!(approx(
            scorer.entity_relevance(&hero, 100, Some(&outline)),
            0.754
        ));

        let stranger = Entity::new("Nobody").with_chapter(10);
        // 0.4 * 0.05 + 0.2 * (1 / 50) + 0.1 * 0.5
        assert!(approx(scorer.entity_relevance(&stranger, 200, None), 0.074));
    }

    #[test]
    fn test_entity_without_appearances_has_no_recency() {
        let scorer = RelevanceScorer::default();
        let entity = Entity::new("Ghost").with_importance(1.0);
        assert!(approx(scorer.entity_relevance(&entity, 10, None), 0.1));
        assert!(approx(scorer.entity_relevance(&entity, 0, None), 0.1));
    }

    #[test]
    fn test_entity_relevance_is_clamped() {
        let scorer = RelevanceScorer::default();
        let outline = ChapterOutline::new(3).with_setting("Peak");
        let entity = Entity::new("Peak")
            .with_chapters([1, 2, 3])
            .with_importance(1.0);
        let score = scorer.entity_relevance(&entity, 3, Some(&outline));
        assert!(score <= 1.0);
        assert!(approx(score, 1.0));
    }

    #[test]
    fn test_event_relevance_overlap() {
        let scorer = RelevanceScorer::default();
        let outline = ChapterOutline::new(10)
            .with_character("Lâm Phong")
            .with_entity("Huyết Kiếm", "item");

        let event = Event::new("Duel", 8)
            .with_importance(0.8)
            .with_characters(["Lâm Phong", "Elder Mạc"])
            .with_entities(["Huyết Kiếm"]);

        // 0.4 * 0.9 + 0.3 * 0.8 + 0.2 * 0.5 + 0.1 * 1.0
        assert!(approx(
            scorer.event_relevance(&event, 10, Some(&outline)),
            0.8
        ));
        // 0.4 * 0.9 + 0.3 * 0.8
        assert!(approx(scorer.event_relevance(&event, 10, None), 0.6));
    }

    // ========================================================================
    // Conflicts
    // ========================================================================

    #[test]
    fn test_conflict_priority_escalates() {
        let scorer = RelevanceScorer::default();
        let conflict = Conflict::new("c", "Rivalry", Timeline::Batch, 1);

        // elapsed 1 of 5: no escalation. 0.4 * 0.9 + 0.3 * 0.9 + 0.3 * 0.3
        assert!(approx(scorer.conflict_priority(&conflict, 2), 0.72));
        // elapsed 4 of 5: capped at 1.0. 0.4 + 0.3 * 0.9 + 0.09
        assert!(approx(scorer.conflict_priority(&conflict, 5), 0.76));
    }

    #[test]
    fn test_conflict_priority_rewards_cast() {
        let scorer = RelevanceScorer::default();
        let lonely = Conflict::new("a", "a", Timeline::Epic, 1);
        let cast = lonely.clone().with_characters(["Lâm Phong"]);
        assert!(scorer.conflict_priority(&cast, 2) > scorer.conflict_priority(&lonely, 2));
    }

    // ========================================================================
    // Phases
    // ========================================================================

    #[test]
    fn test_phase_boundaries() {
        assert_eq!(StoryPhase::from_progress(30, 300), StoryPhase::Introduction);
        assert_eq!(StoryPhase::from_progress(31, 300), StoryPhase::Rising);
        assert_eq!(StoryPhase::from_progress(90, 300), StoryPhase::Rising);
        assert_eq!(StoryPhase::from_progress(210, 300), StoryPhase::Development);
        assert_eq!(StoryPhase::from_progress(270, 300), StoryPhase::Climax);
        assert_eq!(StoryPhase::from_progress(271, 300), StoryPhase::Resolution);
    }

    #[test]
    fn test_adaptive_limits() {
        assert_eq!(adaptive_limits(10, 300), ContextLimits::new(15, 8, 5));
        assert_eq!(adaptive_limits(150, 300), ContextLimits::new(35, 20, 12));
        assert_eq!(adaptive_limits(300, 300), ContextLimits::new(20, 15, 8));
    }
}
