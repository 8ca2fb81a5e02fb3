//! Engine configuration types
//!
//! Thresholds and artifact names used while condensing an instance. The run-wide
//! lookup table is configuration too, but lives in [`crate::lookup`].

use serde::{Deserialize, Serialize};

use crate::types::Millis;

/// Gaps between consecutive events at or above this length count as breaks
pub const DEFAULT_BREAK_THRESHOLD_MS: Millis = 10_000;

/// Enter events this close to the first enter of a screen belong to that screen
pub const DEFAULT_SCREEN_GROUP_MS: Millis = 400;

/// Intervals longer than this are reported as suspicious
pub const DEFAULT_LONG_INTERVAL_WARNING_MS: Millis = 7_200_000;

/// Configuration for condensing instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Break threshold in milliseconds (per-form lookup entries may override it)
    pub break_threshold_ms: Millis,

    /// Warn about any single gap longer than this (milliseconds)
    pub long_interval_warning_ms: Millis,

    /// Consecutive prompt entries within this window form one screen (field lists)
    pub screen_group_ms: Millis,

    /// Name of the interaction log inside an instance directory
    pub log_file_name: String,

    /// Name of the submission document inside an instance directory
    pub submission_file_name: String,

    /// File extensions counted as photos (matched case-insensitively)
    pub photo_extensions: Vec<String>,

    /// Cell value written for absent tags and unvisited prompts
    pub missing_marker: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            break_threshold_ms: DEFAULT_BREAK_THRESHOLD_MS,
            long_interval_warning_ms: DEFAULT_LONG_INTERVAL_WARNING_MS,
            screen_group_ms: DEFAULT_SCREEN_GROUP_MS,
            log_file_name: "log.txt".to_string(),
            submission_file_name: "submission.xml".to_string(),
            photo_extensions: vec!["jpg".to_string(), "jpeg".to_string()],
            missing_marker: String::new(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the break threshold
    pub fn with_break_threshold_ms(mut self, threshold: Millis) -> Self {
        self.break_threshold_ms = threshold;
        self
    }

    /// Builder method: set the long interval warning
    pub fn with_long_interval_warning_ms(mut self, threshold: Millis) -> Self {
        self.long_interval_warning_ms = threshold;
        self
    }

    /// Builder method: set the screen grouping window
    pub fn with_screen_group_ms(mut self, window: Millis) -> Self {
        self.screen_group_ms = window;
        self
    }

    /// Builder method: set the missing-value marker
    pub fn with_missing_marker(mut self, marker: impl Into<String>) -> Self {
        self.missing_marker = marker.into();
        self
    }

    /// Builder method: set the artifact file names
    pub fn with_artifact_names(
        mut self,
        log_file_name: impl Into<String>,
        submission_file_name: impl Into<String>,
    ) -> Self {
        self.log_file_name = log_file_name.into();
        self.submission_file_name = submission_file_name.into();
        self
    }

    /// Check whether a file name has one of the photo extensions
    pub fn is_photo(&self, file_name: &str) -> bool {
        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => self
                .photo_extensions
                .iter()
                .any(|p| p.eq_ignore_ascii_case(ext)),
            _ => false,
        }
    }
}
