//! Minimum-data gating for routine analysis
//!
//! Pure decision over already-localized occurrence times. Analysis only
//! makes sense when the owner's history covers enough calendar days and at
//! least one subject was logged often enough recently.

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, TimeDelta};
use thiserror::Error;
use uuid::Uuid;

use crate::config::RoutinePolicy;

/// Why analysis was skipped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    #[error("no occurrences recorded")]
    NoHistory,

    #[error("history spans {span_days} day(s), {required} required")]
    ShortHistory { span_days: i64, required: i64 },

    #[error("no subject has {required} occurrences in the last {window_days} days")]
    SparseSubjects { required: usize, window_days: i64 },

    /// The trailing window reaches outside the representable calendar
    #[error("trailing window of {window_days} days is out of range")]
    WindowOutOfRange { window_days: i64 },
}

/// Subjects eligible for analysis and their in-window local times
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibleHistory {
    pub span_days: i64,
    /// Keyed by subject, times sorted ascending
    pub subjects: BTreeMap<Uuid, Vec<NaiveDateTime>>,
}

/// Apply `policy` to `(subject, local time)` pairs as of `now_local`.
///
/// The span counts calendar days inclusively, so occurrences on Monday and
/// the following Sunday span 7 days.
pub fn gate(
    policy: &RoutinePolicy,
    occurrences: &[(Uuid, NaiveDateTime)],
    now_local: NaiveDateTime,
) -> Result<EligibleHistory, GateRejection> {
    let first = occurrences.iter().map(|(_, t)| t.date()).min();
    let last = occurrences.iter().map(|(_, t)| t.date()).max();
    let (Some(first), Some(last)) = (first, last) else {
        return Err(GateRejection::NoHistory);
    };

    let span_days = (last - first).num_days() + 1;
    if span_days < policy.min_history_days {
        return Err(GateRejection::ShortHistory {
            span_days,
            required: policy.min_history_days,
        });
    }

    let cutoff = TimeDelta::try_days(policy.trailing_window_days)
        .and_then(|window| now_local.checked_sub_signed(window))
        .ok_or(GateRejection::WindowOutOfRange {
            window_days: policy.trailing_window_days,
        })?;
    let mut in_window: BTreeMap<Uuid, Vec<NaiveDateTime>> = BTreeMap::new();
    for (subject_id, time) in occurrences {
        if *time >= cutoff {
            in_window.entry(*subject_id).or_default().push(*time);
        }
    }
    in_window.retain(|_, times| times.len() >= policy.min_occurrences_per_subject);
    if in_window.is_empty() {
        return Err(GateRejection::SparseSubjects {
            required: policy.min_occurrences_per_subject,
            window_days: policy.trailing_window_days,
        });
    }

    for times in in_window.values_mut() {
        times.sort();
    }
    Ok(EligibleHistory {
        span_days,
        subjects: in_window,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 9, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_empty_history() {
        assert_eq!(
            gate(&RoutinePolicy::default(), &[], at(30, 12)),
            Err(GateRejection::NoHistory)
        );
    }

    #[test]
    fn test_three_days_is_too_short() {
        let run = Uuid::new_v4();
        let history = [(run, at(1, 7)), (run, at(2, 7)), (run, at(3, 7))];
        assert_eq!(
            gate(&RoutinePolicy::default(), &history, at(3, 12)),
            Err(GateRejection::ShortHistory {
                span_days: 3,
                required: 7
            })
        );
    }

    #[test]
    fn test_span_is_inclusive_of_both_ends() {
        let run = Uuid::new_v4();
        // Monday through Sunday
        let history: Vec<_> = (7..=13).map(|d| (run, at(d, 7))).collect();
        let eligible = gate(&RoutinePolicy::default(), &history, at(13, 12)).unwrap();
        assert_eq!(eligible.span_days, 7);
    }

    #[test]
    fn test_sparse_subjects_are_excluded() {
        let run = Uuid::new_v4();
        let read = Uuid::new_v4();
        let mut history: Vec<_> = [1, 3, 5, 8, 10, 12].iter().map(|d| (run, at(*d, 7))).collect();
        history.push((read, at(2, 21)));
        history.push((read, at(9, 21)));

        let eligible = gate(&RoutinePolicy::default(), &history, at(20, 12)).unwrap();
        assert_eq!(eligible.subjects.len(), 1);
        assert_eq!(eligible.subjects[&run].len(), 6);
    }

    #[test]
    fn test_old_occurrences_fall_outside_window() {
        let run = Uuid::new_v4();
        let history: Vec<_> = (1..=10).map(|d| (run, at(d, 7))).collect();
        let policy = RoutinePolicy {
            trailing_window_days: 3,
            ..RoutinePolicy::default()
        };

        assert!(matches!(
            gate(&policy, &history, at(10, 12)),
            Err(GateRejection::SparseSubjects { .. })
        ));
    }

    #[test]
    fn test_oversized_window_is_rejected() {
        let run = Uuid::new_v4();
        let history: Vec<_> = (1..=10).map(|d| (run, at(d, 7))).collect();
        let policy = RoutinePolicy {
            trailing_window_days: 100_000_000,
            ..RoutinePolicy::default()
        };

        assert_eq!(
            gate(&policy, &history, at(10, 12)),
            Err(GateRejection::WindowOutOfRange {
                window_days: 100_000_000
            })
        );
    }
}
