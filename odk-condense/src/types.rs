//! Core types for the condensation engine
//!
//! This module defines the events the log parser emits, the per-prompt and
//! per-instance metrics the timeline engine produces, and the error type shared
//! by every stage of the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Milliseconds since the Unix epoch, as written in the instance log
pub type Millis = u64;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, CondenseError>;

/// Errors that can occur while condensing an instance
///
/// Apart from `LookupError`, every variant is scoped to a single instance: the
/// batch skips the instance and moves on.
#[derive(Debug, thiserror::Error)]
pub enum CondenseError {
    #[error("Failed to read log file: {0}")]
    LogReadError(String),

    #[error("Failed to parse submission XML: {0}")]
    XmlParseError(String),

    #[error("Invalid lookup table: {0}")]
    LookupError(String),

    #[error("No form id in submission and no fallback form id configured")]
    MissingFormId,

    #[error("Missing instance artifact: {0}")]
    MissingArtifact(String),

    #[error("{0}")]
    HeaderMismatch(HeaderMismatch),

    #[error("Failed to write output table: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Difference between an established output header and a candidate row's columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMismatch {
    /// Columns in the established header that the candidate lacks
    pub missing: Vec<String>,
    /// Columns in the candidate that the established header lacks
    pub extra: Vec<String>,
}

impl HeaderMismatch {
    /// Compare two headers; `None` when they are identical, in order
    pub fn between(established: &[String], candidate: &[String]) -> Option<Self> {
        if established == candidate {
            return None;
        }
        let missing = established
            .iter()
            .filter(|c| !candidate.contains(c))
            .cloned()
            .collect();
        let extra = candidate
            .iter()
            .filter(|c| !established.contains(c))
            .cloned()
            .collect();
        Some(Self { missing, extra })
    }

    /// True when both headers hold the same columns in a different order
    pub fn is_reordering(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

impl fmt::Display for HeaderMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_reordering() {
            return write!(f, "Header mismatch: same columns in a different order");
        }
        write!(
            f,
            "Header mismatch: missing [{}], extra [{}]",
            self.missing.join(", "),
            self.extra.join(", ")
        )
    }
}

/// One interaction occurrence from the instance log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Timestamp in milliseconds since epoch
    pub timestamp: Millis,
    /// 1-based line number in the log this event comes from
    pub line: usize,
    /// What happened
    pub kind: EventKind,
}

/// Event kinds, each carrying only the fields meaningful for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A question prompt came to the foreground (`EP`)
    EnterPrompt { prompt: String },
    /// A question prompt left the foreground (`LP`)
    ExitPrompt { prompt: String },
    /// A constraint or required check failed on a prompt (`CC`)
    ConstraintViolation { prompt: String },
    /// The saved answer for a prompt changed (derived from the value column)
    AnswerChange { prompt: String, value: String },
    /// A navigation swipe (`SW`)
    Swipe { prompt: Option<String> },
    /// The app came back to the foreground (`oR`)
    Resume,
    /// The app went to the background (`oP`)
    Pause,
    /// The form was saved (`SF`)
    SaveForm,
    /// A related sub-form deleted itself (`rS`)
    RelationSelfDestruct,
    /// Any other well-formed event token
    Other { code: String, prompt: Option<String> },
}

impl EventKind {
    /// The prompt this event refers to, if any
    pub fn prompt(&self) -> Option<&str> {
        match self {
            EventKind::EnterPrompt { prompt }
            | EventKind::ExitPrompt { prompt }
            | EventKind::ConstraintViolation { prompt }
            | EventKind::AnswerChange { prompt, .. } => Some(prompt),
            EventKind::Swipe { prompt } | EventKind::Other { prompt, .. } => prompt.as_deref(),
            EventKind::Resume
            | EventKind::Pause
            | EventKind::SaveForm
            | EventKind::RelationSelfDestruct => None,
        }
    }

    /// Short name used in diagnostics
    pub fn name(&self) -> &str {
        match self {
            EventKind::EnterPrompt { .. } => "enter_prompt",
            EventKind::ExitPrompt { .. } => "exit_prompt",
            EventKind::ConstraintViolation { .. } => "constraint_violation",
            EventKind::AnswerChange { .. } => "answer_change",
            EventKind::Swipe { .. } => "swipe",
            EventKind::Resume => "resume",
            EventKind::Pause => "pause",
            EventKind::SaveForm => "save_form",
            EventKind::RelationSelfDestruct => "relation_self_destruct",
            EventKind::Other { code, .. } => code,
        }
    }
}

impl Event {
    /// Convert the millisecond timestamp to a wall-clock time
    pub fn wall_clock(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(i64::try_from(self.timestamp).ok()?)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.prompt() {
            Some(prompt) => write!(f, "{}({})@line {}", self.kind.name(), prompt, self.line),
            None => write!(f, "{}@line {}", self.kind.name(), self.line),
        }
    }
}

/// Timing and behavior metrics for one prompt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMetrics {
    /// Count of enter_prompt events (`_v`)
    pub visits: u64,
    /// Foreground time excluding breaks (`_t`)
    pub active_time_ms: Millis,
    /// Gaps at or above the break threshold while this prompt was current (`_b`)
    pub break_time_ms: Millis,
    /// Constraint violations (`_c`)
    pub constraint_count: u64,
    /// Answer changes (`_d`)
    pub change_count: u64,
}

/// Whole-instance totals from replaying the event log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineSummary {
    /// Sum of every prompt's active time
    pub total_active_time_ms: Millis,
    /// Sum of every prompt's break time
    pub total_break_time_ms: Millis,
    /// Time between events while no prompt was current
    pub navigation_time_ms: Millis,
    /// Last event timestamp minus first event timestamp
    pub elapsed_ms: Millis,
    /// Time spent between a pause and the following resume
    pub total_paused_time_ms: Millis,
    pub total_swipe_events: u64,
    /// Total enter_prompt events across all prompts
    pub screen_count: u64,
    pub save_count: u64,
    pub relation_self_destruct: u64,
    /// Metrics for every prompt seen, keyed by prompt id
    pub prompts: BTreeMap<String, PromptMetrics>,
}

/// Byte sizes of the artifacts stored alongside an instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSizes {
    pub submission: u64,
    pub log: u64,
    /// All photos together
    pub photo: u64,
}

/// The condensed result for one form submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub form_id: String,
    pub form_title: String,
    /// Version stamp from the first log line (e.g. `v1.0`)
    pub log_version: Option<String>,
    pub file_sizes: FileSizes,
    pub total_active_time_ms: Millis,
    pub total_break_time_ms: Millis,
    pub total_paused_time_ms: Millis,
    pub total_swipe_events: u64,
    pub screen_count: u64,
    pub save_count: u64,
    pub relation_self_destruct: u64,
    /// Only prompts relevant to the form's schema (all visited prompts without a schema entry)
    pub prompt_metrics: BTreeMap<String, PromptMetrics>,
    /// Requested tag name to extracted value
    pub tag_values: BTreeMap<String, String>,
    /// Prompts visited but not declared by the form's schema
    pub uncaptured_prompts: Vec<String>,
}
