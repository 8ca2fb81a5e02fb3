//! Schema resolver
//!
//! Decides which prompt and tag columns an instance contributes, based on its
//! form id and the lookup table, and lays its record out as a row.
//!
//! Column order is fixed per schema: the base columns, then declared tags in
//! declaration order, then five metric columns per declared prompt in the
//! suffix order `_c, _t, _v, _d, _b`.

use crate::lookup::LookupTable;
use crate::types::{InstanceRecord, Millis, PromptMetrics};

/// Columns every row carries, in order
pub const BASE_COLUMNS: [&str; 14] = [
    "instance_id",
    "form_id",
    "form_title",
    "log_version",
    "submission_bytes",
    "log_bytes",
    "photo_bytes",
    "total_active_time_ms",
    "total_break_time_ms",
    "total_paused_time_ms",
    "total_swipe_events",
    "screen_count",
    "save_count",
    "relation_self_destruct",
];

/// Per-prompt column suffixes: constraints, active time, visits, changes, breaks
pub const PROMPT_SUFFIXES: [&str; 5] = ["_c", "_t", "_v", "_d", "_b"];

/// The columns one instance contributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSchema {
    pub form_id: String,
    pub form_title: String,
    pub prompts: Vec<String>,
    pub tags: Vec<String>,
    /// Per-form break threshold, when the lookup entry sets one
    pub break_threshold_ms: Option<Millis>,
    /// False when the lookup table had no entry and only base columns apply
    pub declared: bool,
    missing_marker: String,
}

impl ResolvedSchema {
    /// The aggregate-only schema used for forms without a lookup entry
    pub fn fallback(form_id: impl Into<String>, missing_marker: impl Into<String>) -> Self {
        Self {
            form_id: form_id.into(),
            form_title: String::new(),
            prompts: Vec::new(),
            tags: Vec::new(),
            break_threshold_ms: None,
            declared: false,
            missing_marker: missing_marker.into(),
        }
    }

    /// Ordered column names
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
        columns.extend(self.tags.iter().cloned());
        for prompt in &self.prompts {
            columns.extend(PROMPT_SUFFIXES.iter().map(|suffix| format!("{}{}", prompt, suffix)));
        }
        columns
    }

    /// Lay a record out in column order
    pub fn row(&self, record: &InstanceRecord) -> Vec<String> {
        let mut row = vec![
            record.instance_id.clone(),
            record.form_id.clone(),
            record.form_title.clone(),
            record
                .log_version
                .clone()
                .unwrap_or_else(|| self.missing_marker.clone()),
            record.file_sizes.submission.to_string(),
            record.file_sizes.log.to_string(),
            record.file_sizes.photo.to_string(),
            record.total_active_time_ms.to_string(),
            record.total_break_time_ms.to_string(),
            record.total_paused_time_ms.to_string(),
            record.total_swipe_events.to_string(),
            record.screen_count.to_string(),
            record.save_count.to_string(),
            record.relation_self_destruct.to_string(),
        ];

        for tag in &self.tags {
            row.push(
                record
                    .tag_values
                    .get(tag)
                    .cloned()
                    .unwrap_or_else(|| self.missing_marker.clone()),
            );
        }

        for prompt in &self.prompts {
            match record.prompt_metrics.get(prompt) {
                Some(metrics) => row.extend(metric_cells(metrics)),
                None => row.extend(PROMPT_SUFFIXES.iter().map(|_| self.missing_marker.clone())),
            }
        }

        row
    }
}

fn metric_cells(metrics: &PromptMetrics) -> [String; 5] {
    [
        metrics.constraint_count.to_string(),
        metrics.active_time_ms.to_string(),
        metrics.visits.to_string(),
        metrics.change_count.to_string(),
        metrics.break_time_ms.to_string(),
    ]
}

/// Resolves form ids to schemas against a lookup table
#[derive(Debug, Clone, Copy)]
pub struct SchemaResolver<'a> {
    lookup: &'a LookupTable,
    missing_marker: &'a str,
}

impl<'a> SchemaResolver<'a> {
    pub fn new(lookup: &'a LookupTable, missing_marker: &'a str) -> Self {
        Self {
            lookup,
            missing_marker,
        }
    }

    /// Resolve the schema for a form id
    ///
    /// Forms without a lookup entry get the aggregate-only fallback; the caller
    /// reports that (it knows which instance is affected).
    pub fn resolve(&self, form_id: &str) -> ResolvedSchema {
        match self.lookup.get(form_id) {
            Some(form) => ResolvedSchema {
                form_id: form.form_id.clone(),
                form_title: form.form_title.clone(),
                prompts: form.prompts.clone(),
                tags: form.tags.clone(),
                break_threshold_ms: form.break_threshold_ms,
                declared: true,
                missing_marker: self.missing_marker.to_string(),
            },
            None => ResolvedSchema::fallback(form_id, self.missing_marker),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::FormSchema;
    use crate::types::FileSizes;
    use std::collections::BTreeMap;

    fn lookup() -> LookupTable {
        let mut table = LookupTable::new();
        table.add_form(
            FormSchema::new("HQ-v12", "Household")
                .with_prompts(["age", "sex"])
                .with_tags(["province"])
                .with_break_threshold_ms(20_000),
        );
        table
    }

    fn record() -> InstanceRecord {
        let mut prompt_metrics = BTreeMap::new();
        prompt_metrics.insert(
            "age".to_string(),
            PromptMetrics {
                visits: 2,
                active_time_ms: 4_500,
                break_time_ms: 12_000,
                constraint_count: 1,
                change_count: 3,
            },
        );
        let mut tag_values = BTreeMap::new();
        tag_values.insert("province".to_string(), "Kinshasa".to_string());

        InstanceRecord {
            instance_id: "uuid:1234".to_string(),
            form_id: "HQ-v12".to_string(),
            form_title: "Household".to_string(),
            log_version: Some("v1.0".to_string()),
            file_sizes: FileSizes { submission: 2048, log: 512, photo: 0 },
            total_active_time_ms: 4_500,
            total_break_time_ms: 12_000,
            total_paused_time_ms: 0,
            total_swipe_events: 7,
            screen_count: 2,
            save_count: 1,
            relation_self_destruct: 0,
            prompt_metrics,
            tag_values,
            uncaptured_prompts: Vec::new(),
        }
    }

    #[test]
    fn test_declared_schema_columns() {
        let table = lookup();
        let schema = SchemaResolver::new(&table, "").resolve("HQ-v12");
        assert!(schema.declared);
        assert_eq!(schema.break_threshold_ms, Some(20_000));

        let columns = schema.columns();
        assert_eq!(columns.len(), BASE_COLUMNS.len() + 1 + 2 * 5);
        assert_eq!(columns[0], "instance_id");
        assert_eq!(columns[BASE_COLUMNS.len()], "province");
        assert_eq!(
            &columns[BASE_COLUMNS.len() + 1..],
            &["age_c", "age_t", "age_v", "age_d", "age_b", "sex_c", "sex_t", "sex_v", "sex_d", "sex_b"]
        );
    }

    #[test]
    fn test_columns_are_unique_for_repeated_declarations() {
        let mut table = LookupTable::new();
        table.add_form(
            FormSchema::new("HQ-v12", "Household")
                .with_prompts(["age", "age"])
                .with_tags(["province", "province", "form_id"]),
        );
        let columns = SchemaResolver::new(&table, "").resolve("HQ-v12").columns();

        let unique: std::collections::HashSet<&String> = columns.iter().collect();
        assert_eq!(unique.len(), columns.len());
        assert_eq!(columns.len(), BASE_COLUMNS.len() + 1 + 5);
    }

    #[test]
    fn test_fallback_schema_has_only_base_columns() {
        let table = lookup();
        let schema = SchemaResolver::new(&table, "").resolve("UNKNOWN");
        assert!(!schema.declared);
        assert_eq!(schema.form_id, "UNKNOWN");
        assert_eq!(schema.columns(), BASE_COLUMNS.to_vec());
    }

    #[test]
    fn test_row_layout() {
        let table = lookup();
        let schema = SchemaResolver::new(&table, "NA").resolve("HQ-v12");
        let row = schema.row(&record());
        assert_eq!(row.len(), schema.columns().len());
        assert_eq!(
            row,
            vec![
                "uuid:1234", "HQ-v12", "Household", "v1.0", "2048", "512", "0", "4500", "12000",
                "0", "7", "2", "1", "0", "Kinshasa", "1", "4500", "2", "3", "12000", "NA", "NA",
                "NA", "NA", "NA",
            ]
        );
    }

    #[test]
    fn test_row_with_missing_values() {
        let table = lookup();
        let schema = SchemaResolver::new(&table, "").resolve("HQ-v12");
        let mut record = record();
        record.log_version = None;
        record.tag_values.clear();
        let row = schema.row(&record);
        assert_eq!(row[3], "");
        assert_eq!(row[BASE_COLUMNS.len()], "");
    }
}
