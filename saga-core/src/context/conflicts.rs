//! Conflict lifecycle passes and per-batch conflict selection.

use crate::memory::{Conflict, Timeline};
use crate::outline::ChapterOutline;
use crate::relevance::{RelevanceScorer, StoryPhase};
use serde::Serialize;
use std::cmp::Ordering;

/// Result of a staleness pass.
#[derive(Debug, Default)]
pub struct PruneOutcome<'a> {
    /// Conflicts still active after the pass.
    pub active: Vec<&'a Conflict>,
    /// Conflicts this pass abandoned.
    pub pruned: Vec<&'a Conflict>,
}

/// An active conflict with its priority for the chapter being prepared.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredConflict {
    pub conflict: Conflict,
    pub priority: f32,
}

/// What to do about the number of open conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ConflictSuggestion {
    /// Too few open threads for the phase.
    Introduce {
        count: usize,
        timelines: Vec<Timeline>,
    },
    /// Too many open threads; close some.
    Reduce { count: usize },
    Maintain,
}

impl ConflictSuggestion {
    /// One-line instruction for a prompt.
    pub fn describe(&self, phase: StoryPhase) -> String {
        match self {
            ConflictSuggestion::Introduce { count, timelines } => {
                let names: Vec<&str> = timelines.iter().map(Timeline::name).collect();
                format!(
                    "Too few open conflicts for the {phase} phase: introduce about {count} ({})",
                    names.join(", ")
                )
            }
            ConflictSuggestion::Reduce { count } => format!(
                "Too many open conflicts for the {phase} phase: resolve about {count}"
            ),
            ConflictSuggestion::Maintain => {
                format!("Open conflict count suits the {phase} phase")
            }
        }
    }
}

/// Number of conflicts surfaced for a batch.
pub fn batch_conflict_quota(batch: u32) -> usize {
    match batch {
        0..=5 => 5,
        6..=20 => 8,
        21..=40 => 12,
        _ => 15,
    }
}

/// Ideal number of open conflicts in a phase.
pub fn optimal_conflicts(phase: StoryPhase) -> usize {
    match phase {
        StoryPhase::Introduction => 3,
        StoryPhase::Rising => 6,
        StoryPhase::Development => 10,
        StoryPhase::Climax => 8,
        StoryPhase::Resolution => 4,
    }
}

fn timelines_for(phase: StoryPhase) -> Vec<Timeline> {
    match phase {
        StoryPhase::Introduction => vec![Timeline::Immediate, Timeline::Batch, Timeline::ShortTerm],
        StoryPhase::Rising => vec![Timeline::Batch, Timeline::ShortTerm, Timeline::MediumTerm],
        StoryPhase::Development => {
            vec![Timeline::ShortTerm, Timeline::MediumTerm, Timeline::LongTerm]
        }
        StoryPhase::Climax => vec![Timeline::Immediate, Timeline::Batch],
        StoryPhase::Resolution => vec![Timeline::Immediate],
    }
}

/// Prunes, ranks and tracks conflicts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictManager {
    scorer: RelevanceScorer,
}

impl ConflictManager {
    pub fn new(scorer: RelevanceScorer) -> Self {
        Self { scorer }
    }

    /// Abandon active conflicts nobody has mentioned for longer than their
    /// timeline allows. Long-term and epic conflicts never go stale.
    pub fn prune_stale<'a>(
        &self,
        conflicts: &'a mut [Conflict],
        current_chapter: u32,
    ) -> PruneOutcome<'a> {
        let mut pruned_at = Vec::new();

        for (index, conflict) in conflicts.iter_mut().enumerate() {
            if !conflict.is_active() {
                continue;
            }
            let Some(threshold) = conflict.timeline.staleness_threshold() else {
                continue;
            };
            let idle = conflict.chapters_since_mention(current_chapter);
            if idle > threshold {
                conflict.abandon(
                    current_chapter,
                    format!("Auto-pruned: {idle} chapters of inactivity (threshold: {threshold})"),
                );
                tracing::debug!(
                    id = %conflict.id,
                    timeline = %conflict.timeline,
                    idle,
                    "Abandoned stale conflict"
                );
                pruned_at.push(index);
            }
        }

        let conflicts: &'a [Conflict] = conflicts;
        let outcome = PruneOutcome {
            active: conflicts.iter().filter(|c| c.is_active()).collect(),
            pruned: pruned_at.into_iter().map(|i| &conflicts[i]).collect(),
        };

        if !outcome.pruned.is_empty() {
            tracing::info!(
                chapter = current_chapter,
                pruned = outcome.pruned.len(),
                active = outcome.active.len(),
                "Pruned stale conflicts"
            );
        }
        outcome
    }

    /// Highest-priority active conflicts for a batch.
    ///
    /// With `prune` set, stale conflicts are abandoned first.
    pub fn select_for_batch(
        &self,
        conflicts: &mut [Conflict],
        batch: u32,
        current_chapter: u32,
        prune: bool,
    ) -> Vec<ScoredConflict> {
        let active: Vec<&Conflict> = if prune {
            self.prune_stale(conflicts, current_chapter).active
        } else {
            conflicts.iter().filter(|c| c.is_active()).collect()
        };

        let mut scored: Vec<ScoredConflict> = active
            .into_iter()
            .map(|conflict| ScoredConflict {
                priority: self.scorer.conflict_priority(conflict, current_chapter),
                conflict: conflict.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(Ordering::Equal)
        });
        scored.truncate(batch_conflict_quota(batch));
        scored
    }

    /// Active conflicts at or past 80% of their expected duration.
    pub fn needing_resolution<'a>(
        &self,
        conflicts: &'a [Conflict],
        current_chapter: u32,
    ) -> Vec<&'a Conflict> {
        conflicts
            .iter()
            .filter(|c| {
                let elapsed = u64::from(c.elapsed(current_chapter));
                let expected = u64::from(c.timeline.expected_duration());
                c.is_active() && elapsed * 5 >= expected * 4
            })
            .collect()
    }

    /// Record that `chapter` references the conflicts its outline lists.
    ///
    /// Returns the ids that matched a known conflict.
    pub fn update_mentions(
        &self,
        conflicts: &mut [Conflict],
        chapter: u32,
        outline: &ChapterOutline,
    ) -> Vec<String> {
        let mut mentioned = Vec::new();
        for conflict in conflicts.iter_mut() {
            if outline.conflict_ids.iter().any(|id| *id == conflict.id) {
                conflict.mention(chapter);
                mentioned.push(conflict.id.clone());
            }
        }
        if !mentioned.is_empty() {
            tracing::info!(chapter, count = mentioned.len(), "Updated conflict mentions");
        }
        mentioned
    }

    /// Advice on opening or closing conflicts for the current phase.
    pub fn suggest_new_conflicts(
        &self,
        active_count: usize,
        phase: StoryPhase,
    ) -> ConflictSuggestion {
        let optimal = optimal_conflicts(phase);
        // 70% and 150% of optimal, in tenths
        if active_count * 10 < optimal * 7 {
            ConflictSuggestion::Introduce {
                count: optimal - active_count,
                timelines: timelines_for(phase),
            }
        } else if active_count * 10 > optimal * 15 {
            ConflictSuggestion::Reduce {
                count: active_count - optimal,
            }
        } else {
            ConflictSuggestion::Maintain
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ConflictStatus;

    fn one_of_each(introduced: u32) -> Vec<Conflict> {
        [
            Timeline::Immediate,
            Timeline::Batch,
            Timeline::ShortTerm,
            Timeline::MediumTerm,
            Timeline::LongTerm,
            Timeline::Epic,
        ]
        .into_iter()
        .map(|t| Conflict::new(t.name(), t.name(), t, introduced))
        .collect()
    }

    // ========================================================================
    // Pruning
    // ========================================================================

    #[test]
    fn test_prune_at_chapter_twenty() {
        let manager = ConflictManager::default();
        let mut conflicts = one_of_each(1);

        let outcome = manager.prune_stale(&mut conflicts, 20);
        let pruned: Vec<&str> = outcome.pruned.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(pruned, vec!["immediate", "batch"]);
        assert_eq!(outcome.active.len(), 4);

        let immediate = &conflicts[0];
        assert_eq!(immediate.status, ConflictStatus::Abandoned);
        assert_eq!(immediate.resolution_chapter, Some(20));
        assert_eq!(
            immediate.resolution_note.as_deref(),
            Some("Auto-pruned: 19 chapters of inactivity (threshold: 10)")
        );
        assert!(conflicts[4].is_active());
        assert!(conflicts[5].is_active());
    }

    #[test]
    fn test_prune_never_touches_long_horizons() {
        let manager = ConflictManager::default();
        let mut conflicts = one_of_each(1);

        manager.prune_stale(&mut conflicts, 10_000);
        assert!(conflicts[4].is_active());
        assert!(conflicts[5].is_active());
        assert_eq!(
            conflicts.iter().filter(|c| c.is_active()).count(),
            2
        );
    }

    #[test]
    fn test_prune_threshold_is_strict() {
        let manager = ConflictManager::default();
        let mut conflicts = vec![Conflict::new("b", "b", Timeline::Batch, 5)];

        assert!(manager.prune_stale(&mut conflicts, 15).pruned.is_empty());
        assert_eq!(manager.prune_stale(&mut conflicts, 16).pruned.len(), 1);
    }

    #[test]
    fn test_prune_skips_closed_conflicts() {
        let manager = ConflictManager::default();
        let mut conflicts = vec![Conflict::new("r", "r", Timeline::Immediate, 1)];
        conflicts[0].resolve(2, None);

        let outcome = manager.prune_stale(&mut conflicts, 50);
        assert!(outcome.active.is_empty());
        assert!(outcome.pruned.is_empty());
        assert_eq!(conflicts[0].status, ConflictStatus::Resolved);
    }

    // ========================================================================
    // Selection
    // ========================================================================

    #[test]
    fn test_batch_quota_tiers() {
        let tiers: Vec<usize> = [1, 5, 6, 20, 21, 40, 41, 100]
            .into_iter()
            .map(batch_conflict_quota)
            .collect();
        assert_eq!(tiers, vec![5, 5, 8, 8, 12, 12, 15, 15]);
        assert!(tiers.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_select_for_batch_orders_by_priority() {
        let manager = ConflictManager::default();
        let mut conflicts: Vec<Conflict> = (0..20)
            .map(|i| {
                let timeline = if i % 2 == 0 { Timeline::Epic } else { Timeline::LongTerm };
                Conflict::new(format!("c{i}"), "x", timeline, 1)
            })
            .collect();
        conflicts.push(
            Conflict::new("urgent", "x", Timeline::ShortTerm, 8).with_characters(["Phong"]),
        );

        let selected = manager.select_for_batch(&mut conflicts, 2, 10, true);
        assert_eq!(selected.len(), 5);
        assert_eq!(selected[0].conflict.id, "urgent");
        assert!(selected.windows(2).all(|w| w[0].priority >= w[1].priority));
    }

    #[test]
    fn test_select_without_pruning_keeps_stale() {
        let manager = ConflictManager::default();
        let mut conflicts = vec![Conflict::new("old", "x", Timeline::Immediate, 1)];

        let selected = manager.select_for_batch(&mut conflicts, 10, 50, false);
        assert_eq!(selected.len(), 1);
        assert!(conflicts[0].is_active());

        let selected = manager.select_for_batch(&mut conflicts, 10, 50, true);
        assert!(selected.is_empty());
    }

    #[test]
    fn test_needing_resolution() {
        let manager = ConflictManager::default();
        let conflicts = one_of_each(1);

        // Elapsed 9: immediate (1), batch (5) and short_term (10 * 0.8 = 8)
        let due: Vec<&str> = manager
            .needing_resolution(&conflicts, 10)
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(due, vec!["immediate", "batch", "short_term"]);
        assert!(conflicts.iter().all(|c| c.is_active()));
    }

    // ========================================================================
    // Mentions and suggestions
    // ========================================================================

    #[test]
    fn test_update_mentions() {
        let manager = ConflictManager::default();
        let mut conflicts = one_of_each(1);
        let outline = ChapterOutline::new(7)
            .with_conflict_id("batch")
            .with_conflict_id("hallucinated");

        let mentioned = manager.update_mentions(&mut conflicts, 7, &outline);
        assert_eq!(mentioned, vec!["batch".to_string()]);
        assert_eq!(conflicts[1].last_mentioned_chapter, 7);
        assert_eq!(conflicts[0].last_mentioned_chapter, 1);
    }

    #[test]
    fn test_suggestions() {
        let manager = ConflictManager::default();

        assert_eq!(
            manager.suggest_new_conflicts(1, StoryPhase::Introduction),
            ConflictSuggestion::Introduce {
                count: 2,
                timelines: vec![Timeline::Immediate, Timeline::Batch, Timeline::ShortTerm],
            }
        );
        assert_eq!(
            manager.suggest_new_conflicts(16, StoryPhase::Development),
            ConflictSuggestion::Reduce { count: 6 }
        );
        assert_eq!(
            manager.suggest_new_conflicts(15, StoryPhase::Development),
            ConflictSuggestion::Maintain
        );
        assert_eq!(
            manager.suggest_new_conflicts(7, StoryPhase::Development),
            ConflictSuggestion::Maintain
        );
    }
}
