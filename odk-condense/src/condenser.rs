//! Main condensation API
//!
//! The [`Condenser`] is the entry point of the library. It holds the run-wide
//! configuration and lookup table and turns one instance at a time into an
//! [`InstanceRecord`] plus the [`ResolvedSchema`] describing its columns.
//!
//! A `Condenser` is only read while condensing, so one value can be shared by
//! reference across worker threads.

use crate::config::EngineConfig;
use crate::instance::{InstanceArtifacts, InstanceDir};
use crate::logparse::LogParser;
use crate::lookup::{LookupStats, LookupTable};
use crate::resolver::{ResolvedSchema, SchemaResolver};
use crate::timeline::TimelineEngine;
use crate::types::{CondenseError, InstanceRecord, Result};
use crate::xml::SubmissionDocument;
use std::collections::BTreeMap;
use std::path::Path;

/// One condensed instance, ready to be written
#[derive(Debug, Clone)]
pub struct Condensed {
    pub record: InstanceRecord,
    pub schema: ResolvedSchema,
}

impl Condensed {
    /// Ordered column names for this instance's row
    pub fn columns(&self) -> Vec<String> {
        self.schema.columns()
    }

    /// Cell values, aligned with [`Condensed::columns`]
    pub fn row(&self) -> Vec<String> {
        self.schema.row(&self.record)
    }
}

/// Condenses instances against a lookup table
#[derive(Debug, Clone, Default)]
pub struct Condenser {
    config: EngineConfig,
    lookup: LookupTable,
    /// Used when a submission's root element has no `id`
    fallback_form_id: Option<String>,
}

impl Condenser {
    /// Create a condenser with an empty lookup table
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            lookup: LookupTable::new(),
            fallback_form_id: None,
        }
    }

    /// Builder method: use a lookup table
    pub fn with_lookup(mut self, lookup: LookupTable) -> Self {
        self.lookup = lookup;
        self
    }

    /// Builder method: form id for submissions that do not declare one
    pub fn with_fallback_form_id(mut self, form_id: impl Into<String>) -> Self {
        self.fallback_form_id = Some(form_id.into());
        self
    }

    /// Load the lookup table from a JSON file, replacing the current one
    pub fn load_lookup(&mut self, path: &Path) -> Result<()> {
        self.lookup = LookupTable::from_file(path)?;
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn lookup(&self) -> &LookupTable {
        &self.lookup
    }

    /// Get statistics about the loaded lookup table
    pub fn lookup_stats(&self) -> LookupStats {
        self.lookup.stats()
    }

    /// Condense an instance stored as a directory
    pub fn condense_dir(&self, path: &Path) -> Result<Condensed> {
        self.condense(&InstanceDir::new(path, &self.config))
    }

    /// Condense one instance
    ///
    /// Any error here is scoped to this instance. The log is replayed with the
    /// form's own break threshold when its lookup entry sets one.
    pub fn condense(&self, instance: &dyn InstanceArtifacts) -> Result<Condensed> {
        let instance_id = instance.instance_id();
        log::debug!("[{}] Beginning work", instance_id);

        let file_sizes = instance.file_sizes()?;
        let document = SubmissionDocument::parse(instance.read_submission()?)?;

        let form_id = match document.form_id() {
            Some(form_id) => form_id.to_string(),
            None => {
                let fallback = self
                    .fallback_form_id
                    .clone()
                    .ok_or(CondenseError::MissingFormId)?;
                log::debug!(
                    "[{}] Submission declares no form id; using {}",
                    instance_id,
                    fallback
                );
                fallback
            }
        };

        let schema = SchemaResolver::new(&self.lookup, &self.config.missing_marker).resolve(&form_id);
        if !schema.declared {
            log::warn!(
                "[{}] No lookup entry for form_id \"{}\"; writing aggregate columns only",
                instance_id,
                form_id
            );
        }

        let tag_values = document.extract(&schema.tags, &self.config.missing_marker)?;

        let engine = TimelineEngine::new(&self.config)
            .with_break_threshold_ms(schema.break_threshold_ms.unwrap_or(self.config.break_threshold_ms))
            .for_instance(instance_id);
        let mut events = LogParser::from_reader(instance.open_log()?, instance_id)?;
        let summary = engine.replay(&mut events)?;
        let log_version = events.version().map(str::to_string);
        if events.skipped_lines() > 0 {
            log::debug!(
                "[{}] {} malformed log line(s) skipped",
                instance_id,
                events.skipped_lines()
            );
        }

        let mut prompt_metrics = summary.prompts;
        let mut uncaptured_prompts = Vec::new();
        if schema.declared {
            let (kept, dropped): (BTreeMap<_, _>, BTreeMap<_, _>) = prompt_metrics
                .into_iter()
                .partition(|(prompt, _)| schema.prompts.contains(prompt));
            prompt_metrics = kept;
            uncaptured_prompts = dropped
                .into_iter()
                .filter(|(_, metrics)| metrics.visits > 0)
                .map(|(prompt, _)| prompt)
                .collect();
        }
        if !uncaptured_prompts.is_empty() {
            log::debug!(
                "[{}] Prompts not captured by the lookup: {}",
                instance_id,
                uncaptured_prompts.join(", ")
            );
        }

        let record = InstanceRecord {
            instance_id: instance_id.to_string(),
            form_id,
            form_title: schema.form_title.clone(),
            log_version,
            file_sizes,
            total_active_time_ms: summary.total_active_time_ms,
            total_break_time_ms: summary.total_break_time_ms,
            total_paused_time_ms: summary.total_paused_time_ms,
            total_swipe_events: summary.total_swipe_events,
            screen_count: summary.screen_count,
            save_count: summary.save_count,
            relation_self_destruct: summary.relation_self_destruct,
            prompt_metrics,
            tag_values,
            uncaptured_prompts,
        };

        log::debug!("[{}] Completed work", instance_id);
        Ok(Condensed { record, schema })
    }
}
