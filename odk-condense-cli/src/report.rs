//! Run summary

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Elapsed times above this are reported in minutes
const MINUTES_AFTER: Duration = Duration::from_secs(300);

/// What happened to every instance in a batch
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub output: PathBuf,
    pub form_id: Option<String>,
    /// Rows appended
    pub succeeded: usize,
    /// Instances already in the output table
    pub skipped: usize,
    /// Instance id and reason, in discovery order
    pub failed: Vec<(String, String)>,
    /// Prompts visited by some instance but not declared for its form
    pub uncaptured_prompts: BTreeSet<String>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn new(output: PathBuf, form_id: Option<String>) -> Self {
        Self {
            output,
            form_id,
            ..Default::default()
        }
    }

    pub fn record_failure(&mut self, instance_id: impl Into<String>, reason: impl fmt::Display) {
        self.failed.push((instance_id.into(), reason.to_string()));
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Log the end-of-run messages
    pub fn log(&self, instances_dir: &std::path::Path) {
        if !self.uncaptured_prompts.is_empty() {
            log::info!(
                "From instances in {:?}, discovered {} uncaptured prompts: {}",
                instances_dir,
                self.uncaptured_prompts.len(),
                self.uncaptured_prompts
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        for (instance_id, reason) in &self.failed {
            log::debug!("[{}] Failed: {}", instance_id, reason);
        }
        log::info!("{}", self);
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Finished condensing data to {:?}", self.output)?;
        if let Some(form_id) = &self.form_id {
            write!(f, " for form_id \"{}\"", form_id)?;
        }
        write!(
            f,
            " after {}: {} succeeded, {} skipped, {} failed",
            format_elapsed(self.elapsed),
            self.succeeded,
            self.skipped,
            self.failed.len()
        )
    }
}

/// Seconds, or minutes with two decimals past five minutes
pub fn format_elapsed(elapsed: Duration) -> String {
    if elapsed > MINUTES_AFTER {
        format!("{:.2} minutes", elapsed.as_secs_f64() / 60.0)
    } else {
        format!("{} seconds", elapsed.as_secs())
    }
}
