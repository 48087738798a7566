//! Time slot fallbacks and result normalization
//!
//! A suggestion set always holds exactly three entries sorted by descending
//! score. Provider results are deduplicated, then truncated or padded from
//! the fixed fallback set.

use std::cmp::Ordering;

use chrono::Weekday;
use tracing::warn;

use crate::model::{TimeBlock, TimeSlotSuggestion};

/// Number of suggestions in every result set
pub const SUGGESTION_COUNT: usize = 3;

const NO_DATA_RATIONALE: &str =
    "There is not enough history yet to personalize this, so this is a common choice.";

/// Rationale for a common slot added to fill out a short provider answer
const PADDING_RATIONALE: &str =
    "A common time of day that does not overlap the other suggestions.";

/// (description, start hour, end hour, score)
const FALLBACK_SLOTS: [(&str, i64, i64, f64); SUGGESTION_COUNT] = [
    ("Morning", 7, 8, 0.50),
    ("Afternoon", 12, 13, 0.40),
    ("Evening", 18, 19, 0.35),
];

/// Weekdays spread across the week for a sessions-per-week count
pub fn spread_days(frequency_per_week: u32) -> Vec<Weekday> {
    use Weekday::*;
    match frequency_per_week.clamp(1, 7) {
        1 => vec![Mon],
        2 => vec![Tue, Thu],
        3 => vec![Mon, Wed, Fri],
        4 => vec![Mon, Tue, Thu, Fri],
        5 => vec![Mon, Tue, Wed, Thu, Fri],
        6 => vec![Mon, Tue, Wed, Thu, Fri, Sat],
        _ => vec![Mon, Tue, Wed, Thu, Fri, Sat, Sun],
    }
}

/// The fixed morning/afternoon/evening suggestions
pub fn fallback_suggestions(frequency_per_week: u32) -> Vec<TimeSlotSuggestion> {
    let days = spread_days(frequency_per_week);
    FALLBACK_SLOTS
        .iter()
        .map(|(label, start, end, score)| TimeSlotSuggestion {
            description: format!("{} {:02}:00-{:02}:00", label, start, end),
            time_blocks: days
                .iter()
                .filter_map(|day| TimeBlock::new(*day, *start, *end).ok())
                .collect(),
            rationale: NO_DATA_RATIONALE.to_string(),
            score: *score,
        })
        .collect()
}

/// Normalize provider suggestions to exactly three, best first
pub fn normalize(
    suggestions: Vec<TimeSlotSuggestion>,
    frequency_per_week: u32,
) -> Vec<TimeSlotSuggestion> {
    let mut unique: Vec<TimeSlotSuggestion> = Vec::with_capacity(SUGGESTION_COUNT);
    for mut suggestion in suggestions {
        if suggestion.time_blocks.is_empty() {
            continue;
        }
        suggestion.score = clamp_score(suggestion.score);
        if !unique.iter().any(|kept| same_blocks(kept, &suggestion)) {
            unique.push(suggestion);
        }
    }
    sort_by_score(&mut unique);

    if unique.len() != SUGGESTION_COUNT {
        warn!(
            received = unique.len(),
            expected = SUGGESTION_COUNT,
            "Suggestion count mismatch, normalizing"
        );
    }

    unique.truncate(SUGGESTION_COUNT);
    for fallback in fallback_suggestions(frequency_per_week) {
        if unique.len() >= SUGGESTION_COUNT {
            break;
        }
        if !unique.iter().any(|kept| same_blocks(kept, &fallback)) {
            unique.push(TimeSlotSuggestion {
                rationale: PADDING_RATIONALE.to_string(),
                ..fallback
            });
        }
    }
    sort_by_score(&mut unique);
    unique
}

/// Clamp into `[0, 1]`; NaN becomes 0
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

fn sort_by_score(suggestions: &mut [TimeSlotSuggestion]) {
    suggestions.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
}

fn same_blocks(a: &TimeSlotSuggestion, b: &TimeSlotSuggestion) -> bool {
    let key = |s: &TimeSlotSuggestion| {
        let mut blocks: Vec<(u32, u8, u8)> = s
            .time_blocks
            .iter()
            .map(|t| (t.day().num_days_from_monday(), t.start_hour(), t.end_hour()))
            .collect();
        blocks.sort_unstable();
        blocks.dedup();
        blocks
    };
    key(a) == key(b)
}
