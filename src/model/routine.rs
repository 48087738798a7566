//! Routine analysis types
//!
//! All hours are in the subject owner's local civil time.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Half-open hour interval `[start_hour, end_hour)` on one weekday
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "TimeBlockRepr")]
pub struct TimeBlock {
    day: Weekday,
    start_hour: u8,
    end_hour: u8,
}

/// Rejected time block bounds
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeBlockError {
    #[error("hours must satisfy 0 <= start < end <= 24, got {start}..{end}")]
    OutOfRange { start: i64, end: i64 },

    #[error("unknown day of week '{0}'")]
    UnknownDay(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeBlockRepr {
    day: Weekday,
    start_hour: i64,
    end_hour: i64,
}

impl TryFrom<TimeBlockRepr> for TimeBlock {
    type Error = TimeBlockError;

    fn try_from(repr: TimeBlockRepr) -> Result<Self, Self::Error> {
        TimeBlock::new(repr.day, repr.start_hour, repr.end_hour)
    }
}

impl TimeBlock {
    /// Create a block, enforcing `0 <= start < end <= 24`
    pub fn new(day: Weekday, start_hour: i64, end_hour: i64) -> Result<Self, TimeBlockError> {
        if !(0..24).contains(&start_hour) || end_hour <= start_hour || end_hour > 24 {
            return Err(TimeBlockError::OutOfRange {
                start: start_hour,
                end: end_hour,
            });
        }
        Ok(Self {
            day,
            start_hour: start_hour as u8,
            end_hour: end_hour as u8,
        })
    }

    /// Parse the day from provider text ("mon", "Monday", "MONDAY")
    pub fn parse(day: &str, start_hour: i64, end_hour: i64) -> Result<Self, TimeBlockError> {
        let day = parse_weekday(day)?;
        Self::new(day, start_hour, end_hour)
    }

    pub fn day(&self) -> Weekday {
        self.day
    }

    pub fn start_hour(&self) -> u8 {
        self.start_hour
    }

    pub fn end_hour(&self) -> u8 {
        self.end_hour
    }

    /// True when the two half-open windows share at least one hour
    pub fn overlaps_hours(&self, other: &TimeBlock) -> bool {
        self.start_hour < other.end_hour && other.start_hour < self.end_hour
    }

    /// Hours between the two windows; zero when they overlap or touch
    pub fn gap_hours(&self, other: &TimeBlock) -> u8 {
        if self.overlaps_hours(other) {
            0
        } else if self.end_hour <= other.start_hour {
            other.start_hour - self.end_hour
        } else {
            self.start_hour - other.end_hour
        }
    }
}

impl fmt::Display for TimeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02}:00-{:02}:00",
            self.day, self.start_hour, self.end_hour
        )
    }
}

/// Case-insensitive weekday parsing, accepting full names and abbreviations
pub fn parse_weekday(value: &str) -> Result<Weekday, TimeBlockError> {
    Weekday::from_str(value.trim()).map_err(|_| TimeBlockError::UnknownDay(value.to_string()))
}

/// How reliably a routine repeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

/// How badly a proposed schedule collides with an existing routine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SeverityTier {
    Low,
    Medium,
    High,
}

/// Error type for parsing tiers from provider text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown tier '{0}', expected high, medium or low")]
pub struct ParseTierError(String);

fn parse_tier(value: &str) -> Result<u8, ParseTierError> {
    match value.trim().to_lowercase().as_str() {
        "high" => Ok(2),
        "medium" | "med" => Ok(1),
        "low" => Ok(0),
        other => Err(ParseTierError(other.to_string())),
    }
}

impl FromStr for ConfidenceTier {
    type Err = ParseTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match parse_tier(s)? {
            2 => ConfidenceTier::High,
            1 => ConfidenceTier::Medium,
            _ => ConfidenceTier::Low,
        })
    }
}

impl FromStr for SeverityTier {
    type Err = ParseTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match parse_tier(s)? {
            2 => SeverityTier::High,
            1 => SeverityTier::Medium,
            _ => SeverityTier::Low,
        })
    }
}

/// A recurring time-of-day habit detected in a subject's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutinePattern {
    pub subject_id: Uuid,
    pub subject_title: String,
    pub description: String,
    /// Within `[0, 1]`
    pub consistency_score: f64,
    pub confidence: ConfidenceTier,
    pub time_blocks: Vec<TimeBlock>,
}

/// A schedule being proposed for a (possibly new) subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedSchedule {
    /// Existing subject being rescheduled; its own pattern is not a conflict
    pub subject_id: Option<Uuid>,
    pub title: String,
    pub time_blocks: Vec<TimeBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictingSubject {
    pub subject_id: Uuid,
    pub title: String,
    pub severity: SeverityTier,
}

/// Outcome of checking a proposed schedule against current routines.
///
/// `severity` is `None` exactly when `has_conflict` is false, and then
/// `conflicting_subjects` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictAssessment {
    pub has_conflict: bool,
    pub conflicting_subjects: Vec<ConflictingSubject>,
    pub severity: Option<SeverityTier>,
    pub recommendation: String,
}

impl ConflictAssessment {
    pub fn no_conflict(recommendation: impl Into<String>) -> Self {
        Self {
            has_conflict: false,
            conflicting_subjects: Vec::new(),
            severity: None,
            recommendation: recommendation.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlotSuggestion {
    pub description: String,
    pub time_blocks: Vec<TimeBlock>,
    pub rationale: String,
    /// Within `[0, 1]`
    pub score: f64,
}

/// One subject's occurrences converted to local civil time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectHistory {
    pub subject_id: Uuid,
    pub title: String,
    pub local_times: Vec<NaiveDateTime>,
}
