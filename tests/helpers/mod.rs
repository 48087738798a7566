//! Shared harness for the integration tests
//!
//! Builds a [`RoutineAgent`] over an in-memory store, a clock pinned to
//! Saturday 2024-06-22 12:00 UTC for an owner two hours east of UTC, and a
//! scripted provider.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use routine_agent::memory::{InMemoryStore, OffsetClock};
use routine_agent::{AgentConfig, RoutineAgent, ScriptedTransport};
use uuid::Uuid;

pub const OWNER_OFFSET_SECS: i32 = 2 * 3600;

pub struct Harness {
    pub owner: Uuid,
    pub store: Arc<InMemoryStore>,
    pub transport: Arc<ScriptedTransport>,
    pub agent: RoutineAgent,
}

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 22, 12, 0, 0).unwrap()
}

/// Owner-local wall time as a UTC instant
pub fn local(month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    FixedOffset::east_opt(OWNER_OFFSET_SECS)
        .unwrap()
        .with_ymd_and_hms(2024, month, day, hour, minute, 0)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn harness() -> Harness {
    harness_with(AgentConfig::default())
}

pub fn harness_with(config: AgentConfig) -> Harness {
    let owner = Uuid::new_v4();
    let store = Arc::new(InMemoryStore::new());
    let transport = Arc::new(ScriptedTransport::new());
    let clock = OffsetClock::new(FixedOffset::east_opt(OWNER_OFFSET_SECS).unwrap()).pinned_at(now());

    let agent = RoutineAgent::builder(config)
        .transport(transport.clone())
        .store(store.clone())
        .clock(Arc::new(clock))
        .build()
        .unwrap();

    Harness {
        owner,
        store,
        transport,
        agent,
    }
}

impl Harness {
    /// "Run" logged six times at 07:00 local on Mon/Wed/Fri over three weeks
    pub fn seed_morning_runs(&self) -> Uuid {
        let run = self.store.add_subject(self.owner, "Run");
        for (month, day) in [(6, 3), (6, 7), (6, 12), (6, 17), (6, 19), (6, 21)] {
            self.store.add_occurrence(self.owner, run, local(month, day, 7, 0));
        }
        run
    }

    /// Provider reply describing the morning run routine
    pub fn push_run_pattern(&self, run: Uuid) {
        self.transport.push_text(&format!(
            r#"{{"patterns": [{{
                "subjectId": "{run}",
                "description": "Runs on Monday, Wednesday and Friday mornings",
                "consistencyScore": 0.92,
                "confidence": "high",
                "timeBlocks": [
                    {{"day": "Monday", "startHour": 7, "endHour": 8}},
                    {{"day": "Wednesday", "startHour": 7, "endHour": 8}},
                    {{"day": "Friday", "startHour": 7, "endHour": 8}}
                ]
            }}]}}"#
        ));
    }
}
