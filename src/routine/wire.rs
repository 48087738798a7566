//! Provider payloads for routine analysis
//!
//! Field names are key-folded (see [`crate::ai::utils::fold_keys`]). Every
//! nested field is optional so one bad entry is dropped instead of failing
//! the whole payload.

use serde::Deserialize;
use tracing::debug;

use crate::model::TimeBlock;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatternsPayload {
    #[serde(alias = "routines", default)]
    pub patterns: Vec<RawPattern>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPattern {
    #[serde(rename = "subjectid", alias = "id", default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "consistencyscore", alias = "score", alias = "consistency", default)]
    pub consistency_score: Option<f64>,
    #[serde(default)]
    pub confidence: Option<String>,
    #[serde(rename = "timeblocks", alias = "blocks", default)]
    pub time_blocks: Vec<RawTimeBlock>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTimeBlock {
    #[serde(default)]
    pub day: Option<String>,
    #[serde(rename = "starthour", alias = "start", default)]
    pub start_hour: Option<i64>,
    #[serde(rename = "endhour", alias = "end", default)]
    pub end_hour: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConflictPayload {
    #[serde(rename = "hasconflict", alias = "conflict", default)]
    pub has_conflict: bool,
    #[serde(rename = "conflictingsubjects", alias = "conflicts", default)]
    pub conflicting_subjects: Vec<RawConflictingSubject>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConflictingSubject {
    #[serde(rename = "subjectid", alias = "id", default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlotsPayload {
    #[serde(alias = "slots", alias = "timeslots", default)]
    pub suggestions: Vec<RawSuggestion>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSuggestion {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "timeblocks", alias = "blocks", default)]
    pub time_blocks: Vec<RawTimeBlock>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

/// Keep the valid blocks, logging the rest
pub fn valid_blocks(raw: &[RawTimeBlock]) -> Vec<TimeBlock> {
    let mut blocks = Vec::with_capacity(raw.len());
    for block in raw {
        let (Some(day), Some(start), Some(end)) = (&block.day, block.start_hour, block.end_hour)
        else {
            debug!(?block, "Dropping incomplete time block");
            continue;
        };
        match TimeBlock::parse(day, start, end) {
            Ok(block) if !blocks.contains(&block) => blocks.push(block),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Dropping invalid time block"),
        }
    }
    blocks
}
