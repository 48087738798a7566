//! Prompt assembly
//!
//! Pure rendering of fixed instructions plus a bounded view of the caller's
//! data. Every function here is deterministic: no clock reads, no
//! randomness, stable ordering (title, then id). User-authored text is
//! fenced in `<<<UNTRUSTED ...>>>` blocks, and marker-like runs inside that
//! text are neutralized so it cannot close its own block.

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use regex::Regex;

use super::utils::truncate_chars;
use crate::config::{PlanLimits, PromptLimits};
use crate::model::{
    DomainSnapshot, ProposedSchedule, RoutinePattern, Schedule, SubjectHistory, TimeBlock,
};

const ACTION_PLAN_INSTRUCTIONS: &str = include_str!("prompts/action_plan.md");
const PATTERN_INSTRUCTIONS: &str = include_str!("prompts/pattern_extraction.md");
const CONFLICT_INSTRUCTIONS: &str = include_str!("prompts/conflict_assessment.md");
const SLOT_INSTRUCTIONS: &str = include_str!("prompts/slot_suggestion.md");
const FACT_INSTRUCTIONS: &str = include_str!("prompts/fact_extraction.md");

const END_UNTRUSTED: &str = "<<<END UNTRUSTED>>>";

static MARKER_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<{2,}|>{2,}").unwrap());

/// Builds provider prompts within configured size bounds
#[derive(Debug, Clone, Default)]
pub struct PromptAssembler {
    limits: PromptLimits,
    plan: PlanLimits,
}

impl PromptAssembler {
    pub fn new(limits: PromptLimits) -> Self {
        Self {
            limits,
            plan: PlanLimits::default(),
        }
    }

    /// Plan limits announced in the action plan prompt
    pub fn with_plan_limits(mut self, plan: PlanLimits) -> Self {
        self.plan = plan;
        self
    }

    /// Prompt turning one utterance into an action plan
    pub fn action_plan(
        &self,
        snapshot: &DomainSnapshot,
        utterance: &str,
        now: DateTime<Utc>,
        now_local: NaiveDateTime,
        has_image: bool,
    ) -> String {
        let mut prompt = String::from(ACTION_PLAN_INSTRUCTIONS);
        prompt.push_str("\n## Current time\n");
        prompt.push_str(&format!(
            "{} ({}), UTC offset {}\n\n",
            now_local.format("%Y-%m-%d %H:%M"),
            now_local.format("%A"),
            utc_offset(now, now_local)
        ));

        prompt.push_str("## Plan limits\n");
        prompt.push_str(&format!(
            "At most {} actions in total, of which at most {} may be `deleteSubject` or `removeLabel`.\n\n",
            self.plan.max_actions, self.plan.max_destructive_actions
        ));

        self.push_snapshot(&mut prompt, snapshot);

        prompt.push_str("## Message\n");
        prompt.push_str(&untrusted("message", &neutralize(utterance)));
        if has_image {
            prompt.push_str("The user attached an image; use it as additional context.\n");
        }
        prompt.push_str("\nReturn the JSON action plan now.\n");
        prompt
    }

    /// Prompt asking for recurring time-of-day patterns per subject
    pub fn pattern_extraction(&self, histories: &[SubjectHistory]) -> String {
        let mut prompt = String::from(PATTERN_INSTRUCTIONS);
        prompt.push_str("\n## Occurrence history\n");

        let mut ordered: Vec<&SubjectHistory> = histories.iter().collect();
        ordered.sort_by(|a, b| a.title.cmp(&b.title).then(a.subject_id.cmp(&b.subject_id)));

        for history in ordered {
            prompt.push_str(&format!("\n### Subject {}\n", history.subject_id));
            prompt.push_str(&untrusted("title", &self.one_line(&history.title)));

            let mut times = history.local_times.clone();
            times.sort();
            let omitted = times
                .len()
                .saturating_sub(self.limits.max_occurrences_per_subject);
            if omitted > 0 {
                prompt.push_str(&format!("({} older occurrences omitted)\n", omitted));
            }
            for time in &times[omitted..] {
                prompt.push_str(&format!("- {}\n", time.format("%a %Y-%m-%d %H:%M")));
            }
        }

        prompt.push_str("\nReturn the JSON patterns now.\n");
        prompt
    }

    /// Prompt comparing a proposed schedule with existing routines
    pub fn conflict_assessment(
        &self,
        proposed: &ProposedSchedule,
        patterns: &[RoutinePattern],
    ) -> String {
        let mut prompt = String::from(CONFLICT_INSTRUCTIONS);

        prompt.push_str("\n## Proposed schedule\n");
        prompt.push_str(&untrusted("title", &self.one_line(&proposed.title)));
        push_blocks(&mut prompt, &proposed.time_blocks);

        prompt.push_str("\n## Existing routines\n");
        self.push_patterns(&mut prompt, patterns);

        prompt.push_str("\nReturn the JSON assessment now.\n");
        prompt
    }

    /// Prompt asking for three diverse slots for a new habit
    pub fn slot_suggestion(
        &self,
        title: &str,
        frequency_per_week: u32,
        patterns: &[RoutinePattern],
    ) -> String {
        let mut prompt = String::from(SLOT_INSTRUCTIONS);

        prompt.push_str("\n## New habit\n");
        prompt.push_str(&untrusted("title", &self.one_line(title)));
        prompt.push_str(&format!("Desired frequency: {} per week\n", frequency_per_week));

        prompt.push_str("\n## Existing routines\n");
        self.push_patterns(&mut prompt, patterns);

        prompt.push_str("\nReturn the JSON suggestions now.\n");
        prompt
    }

    /// Prompt pulling durable personal facts out of free text
    pub fn fact_extraction(&self, snapshot: &DomainSnapshot, text: &str) -> String {
        let mut prompt = String::from(FACT_INSTRUCTIONS);

        prompt.push_str("\n## Already known\n");
        let mut body = String::new();
        self.push_facts(&mut body, snapshot);
        prompt.push_str(&untrusted("known facts", &body));

        prompt.push_str("\n## Message\n");
        prompt.push_str(&untrusted("message", &neutralize(text)));
        prompt.push_str("\nReturn the JSON facts now.\n");
        prompt
    }

    fn push_snapshot(&self, prompt: &mut String, snapshot: &DomainSnapshot) {
        prompt.push_str("## Subjects\n");
        let mut subjects: Vec<_> = snapshot.subjects.iter().collect();
        subjects.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));

        let mut body = String::new();
        if subjects.is_empty() {
            body.push_str("(none yet)\n");
        }
        for subject in subjects.iter().take(self.limits.max_subjects) {
            body.push_str(&format!(
                "- id: {} | title: {}",
                subject.id,
                self.one_line(&subject.title)
            ));
            if !subject.labels.is_empty() {
                let mut labels: Vec<String> =
                    subject.labels.iter().map(|l| self.one_line(l)).collect();
                labels.sort();
                body.push_str(&format!(" | labels: {}", labels.join(", ")));
            }
            if let Some(schedule) = &subject.schedule {
                body.push_str(&format!(" | schedule: {}", describe_schedule(schedule)));
            }
            if let Some(notes) = subject.notes.as_deref().filter(|n| !n.trim().is_empty()) {
                body.push_str(&format!(" | notes: {}", self.one_line(notes)));
            }
            body.push('\n');
        }
        push_omitted(&mut body, subjects.len(), self.limits.max_subjects);
        prompt.push_str(&untrusted("subjects", &body));

        prompt.push_str("\n## Labels\n");
        let mut labels: Vec<_> = snapshot.labels.iter().collect();
        labels.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        let mut body = String::new();
        if labels.is_empty() {
            body.push_str("(none yet)\n");
        }
        for label in labels.iter().take(self.limits.max_labels) {
            body.push_str(&format!("- {}\n", self.one_line(&label.name)));
        }
        push_omitted(&mut body, labels.len(), self.limits.max_labels);
        prompt.push_str(&untrusted("labels", &body));

        prompt.push_str("\n## Known facts about the user\n");
        let mut body = String::new();
        self.push_facts(&mut body, snapshot);
        prompt.push_str(&untrusted("facts", &body));
        prompt.push('\n');
    }

    fn push_facts(&self, body: &mut String, snapshot: &DomainSnapshot) {
        let mut facts: Vec<_> = snapshot.prior_facts.iter().collect();
        facts.sort_by(|a, b| a.text.cmp(&b.text).then(a.id.cmp(&b.id)));
        if facts.is_empty() {
            body.push_str("(none)\n");
        }
        for fact in facts.iter().take(self.limits.max_facts) {
            body.push_str(&format!("- {}\n", self.one_line(&fact.text)));
        }
        push_omitted(body, facts.len(), self.limits.max_facts);
    }

    fn push_patterns(&self, prompt: &mut String, patterns: &[RoutinePattern]) {
        let mut ordered: Vec<&RoutinePattern> = patterns.iter().collect();
        ordered.sort_by(|a, b| {
            a.subject_title
                .cmp(&b.subject_title)
                .then(a.subject_id.cmp(&b.subject_id))
        });

        let mut body = String::new();
        if ordered.is_empty() {
            body.push_str("(none)\n");
        }
        for pattern in ordered.iter().take(self.limits.max_subjects) {
            body.push_str(&format!(
                "- subjectId: {} | title: {} | confidence: {:?} | consistency: {:.2}\n",
                pattern.subject_id,
                self.one_line(&pattern.subject_title),
                pattern.confidence,
                pattern.consistency_score
            ));
            for block in &pattern.time_blocks {
                body.push_str(&format!("  - {}\n", block));
            }
        }
        push_omitted(&mut body, ordered.len(), self.limits.max_subjects);
        prompt.push_str(&untrusted("routines", &body));
    }

    /// Single-line, bounded, neutralized rendering of a user-authored field
    fn one_line(&self, text: &str) -> String {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        neutralize(&truncate_chars(&collapsed, self.limits.max_text_chars))
    }
}

/// Replace runs of `<` or `>` so user text cannot forge a block marker
pub fn neutralize(text: &str) -> String {
    MARKER_RUN
        .replace_all(text, |caps: &regex::Captures| {
            caps[0]
                .chars()
                .map(|c| if c == '<' { '‹' } else { '›' })
                .collect::<String>()
        })
        .into_owned()
}

fn untrusted(label: &str, content: &str) -> String {
    let mut block = format!("<<<UNTRUSTED {}>>>\n{}", label, content);
    if !content.ends_with('\n') {
        block.push('\n');
    }
    block.push_str(END_UNTRUSTED);
    block.push('\n');
    block
}

fn push_omitted(body: &mut String, total: usize, shown: usize) {
    if total > shown {
        body.push_str(&format!("({} more omitted)\n", total - shown));
    }
}

fn push_blocks(prompt: &mut String, blocks: &[TimeBlock]) {
    for block in blocks {
        prompt.push_str(&format!("- {}\n", block));
    }
}

fn describe_schedule(schedule: &Schedule) -> String {
    let days: Vec<String> = schedule.days.iter().map(|d| d.to_string()).collect();
    format!(
        "{} {:02}:00-{:02}:00",
        days.join(", "),
        schedule.start_hour,
        schedule.end_hour
    )
}

fn utc_offset(now: DateTime<Utc>, now_local: NaiveDateTime) -> String {
    let seconds = (now_local - now.naive_utc()).num_minutes() * 60;
    i32::try_from(seconds)
        .ok()
        .and_then(FixedOffset::east_opt)
        .map(|offset| offset.to_string())
        .unwrap_or_else(|| "+00:00".to_string())
}
