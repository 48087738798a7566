//! Deterministic conflict severity
//!
//! - HIGH: same day, windows overlap or are at most one hour apart
//! - MEDIUM: same day, further apart
//! - LOW: different days, start hours within one hour
//! - otherwise no conflict

use crate::model::{ConflictingSubject, ProposedSchedule, RoutinePattern, SeverityTier, TimeBlock};

/// Severity between one proposed block and one existing block
pub fn classify(proposed: &TimeBlock, existing: &TimeBlock) -> Option<SeverityTier> {
    if proposed.day() == existing.day() {
        if proposed.gap_hours(existing) <= 1 {
            Some(SeverityTier::High)
        } else {
            Some(SeverityTier::Medium)
        }
    } else if proposed.start_hour().abs_diff(existing.start_hour()) <= 1 {
        Some(SeverityTier::Low)
    } else {
        None
    }
}

/// Worst severity over every pair of blocks
pub fn classify_blocks(proposed: &[TimeBlock], existing: &[TimeBlock]) -> Option<SeverityTier> {
    proposed
        .iter()
        .flat_map(|p| existing.iter().filter_map(move |e| classify(p, e)))
        .max()
}

/// Subjects whose routine collides with `proposed`, worst first.
///
/// The proposed subject's own routine is never a conflict.
pub fn conflicting_subjects(
    proposed: &ProposedSchedule,
    patterns: &[RoutinePattern],
) -> Vec<ConflictingSubject> {
    let mut conflicts: Vec<ConflictingSubject> = patterns
        .iter()
        .filter(|pattern| Some(pattern.subject_id) != proposed.subject_id)
        .filter_map(|pattern| {
            classify_blocks(&proposed.time_blocks, &pattern.time_blocks).map(|severity| {
                ConflictingSubject {
                    subject_id: pattern.subject_id,
                    title: pattern.subject_title.clone(),
                    severity,
                }
            })
        })
        .collect();
    conflicts.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.title.cmp(&b.title))
            .then(a.subject_id.cmp(&b.subject_id))
    });
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConfidenceTier;
    use chrono::Weekday;
    use uuid::Uuid;

    fn block(day: Weekday, start: i64, end: i64) -> TimeBlock {
        TimeBlock::new(day, start, end).unwrap()
    }

    #[test]
    fn test_same_day_overlap_is_high() {
        assert_eq!(
            classify(&block(Weekday::Mon, 7, 8), &block(Weekday::Mon, 7, 9)),
            Some(SeverityTier::High)
        );
    }

    #[test]
    fn test_same_day_within_an_hour_is_high() {
        assert_eq!(
            classify(&block(Weekday::Mon, 9, 10), &block(Weekday::Mon, 7, 8)),
            Some(SeverityTier::High)
        );
    }

    #[test]
    fn test_same_day_far_apart_is_medium() {
        assert_eq!(
            classify(&block(Weekday::Mon, 18, 19), &block(Weekday::Mon, 7, 8)),
            Some(SeverityTier::Medium)
        );
    }

    #[test]
    fn test_other_day_similar_start_is_low() {
        assert_eq!(
            classify(&block(Weekday::Tue, 8, 9), &block(Weekday::Mon, 7, 8)),
            Some(SeverityTier::Low)
        );
        assert_eq!(
            classify(&block(Weekday::Tue, 10, 11), &block(Weekday::Mon, 7, 8)),
            None
        );
    }

    #[test]
    fn test_own_pattern_excluded_and_worst_first() {
        let own = Uuid::new_v4();
        let pattern = |id: Uuid, title: &str, blocks: Vec<TimeBlock>| RoutinePattern {
            subject_id: id,
            subject_title: title.to_string(),
            description: String::new(),
            consistency_score: 0.9,
            confidence: ConfidenceTier::High,
            time_blocks: blocks,
        };
        let patterns = vec![
            pattern(Uuid::new_v4(), "Read", vec![block(Weekday::Tue, 7, 8)]),
            pattern(own, "Run", vec![block(Weekday::Mon, 7, 8)]),
            pattern(Uuid::new_v4(), "Yoga", vec![block(Weekday::Mon, 8, 9)]),
        ];
        let proposed = ProposedSchedule {
            subject_id: Some(own),
            title: "Run".to_string(),
            time_blocks: vec![block(Weekday::Mon, 7, 8)],
        };

        let conflicts = conflicting_subjects(&proposed, &patterns);
        let summary: Vec<(&str, SeverityTier)> = conflicts
            .iter()
            .map(|c| (c.title.as_str(), c.severity))
            .collect();
        assert_eq!(
            summary,
            vec![("Yoga", SeverityTier::High), ("Read", SeverityTier::Low)]
        );
    }
}
