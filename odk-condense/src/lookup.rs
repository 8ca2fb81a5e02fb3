//! Form lookup table
//!
//! The lookup table declares, per form id, which prompts and XML tags are worth
//! a column in the output. It is a JSON array:
//!
//! ```json
//! [{"form_id": "HQ-v12", "form_title": "Household Questionnaire",
//!   "prompts": ["age", "sex"], "tags": ["province", "start"]}]
//! ```
//!
//! Loaded once per run, then only read.

use crate::resolver::{BASE_COLUMNS, PROMPT_SUFFIXES};
use crate::types::{CondenseError, Millis, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Columns declared for one form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormSchema {
    pub form_id: String,
    #[serde(default)]
    pub form_title: String,
    /// Prompts to emit metric columns for, in column order
    #[serde(default)]
    pub prompts: Vec<String>,
    /// XML tags to emit value columns for, in column order
    #[serde(default)]
    pub tags: Vec<String>,
    /// Overrides the global break threshold for this form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break_threshold_ms: Option<Millis>,
}

impl FormSchema {
    /// Create a schema with no prompts or tags
    pub fn new(form_id: impl Into<String>, form_title: impl Into<String>) -> Self {
        Self {
            form_id: form_id.into(),
            form_title: form_title.into(),
            prompts: Vec::new(),
            tags: Vec::new(),
            break_threshold_ms: None,
        }
    }

    /// Builder method: declare prompts
    pub fn with_prompts<S: Into<String>>(mut self, prompts: impl IntoIterator<Item = S>) -> Self {
        self.prompts.extend(prompts.into_iter().map(Into::into));
        self
    }

    /// Builder method: declare tags
    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Builder method: per-form break threshold
    pub fn with_break_threshold_ms(mut self, threshold: Millis) -> Self {
        self.break_threshold_ms = Some(threshold);
        self
    }

    /// Drop declarations that would repeat an output column
    ///
    /// Keeps the first of repeated prompts and tags, and drops tags named like
    /// a base column or a generated prompt column. Returns the dropped names.
    fn dedupe_columns(&mut self) -> Vec<String> {
        let mut dropped = Vec::new();

        let mut seen = HashSet::new();
        self.prompts.retain(|prompt| {
            let keep = seen.insert(prompt.clone());
            if !keep {
                dropped.push(prompt.clone());
            }
            keep
        });

        let mut taken: HashSet<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
        for prompt in &self.prompts {
            taken.extend(PROMPT_SUFFIXES.iter().map(|suffix| format!("{}{}", prompt, suffix)));
        }
        self.tags.retain(|tag| {
            let keep = taken.insert(tag.clone());
            if !keep {
                dropped.push(tag.clone());
            }
            keep
        });

        dropped
    }
}

/// All known form schemas, indexed by form id
#[derive(Debug, Clone, Default)]
pub struct LookupTable {
    forms: Vec<FormSchema>,
    /// Key: form id, Value: index into `forms`
    by_id: HashMap<String, usize>,
    /// Form ids declared more than once (the first declaration wins)
    duplicates: Vec<String>,
    /// Form id and name of every prompt or tag dropped as a repeated column
    dropped_columns: Vec<(String, String)>,
}

impl LookupTable {
    /// Create an empty lookup table
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a lookup table from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        log::info!("Loading lookup table: {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| {
            CondenseError::LookupError(format!("Failed to read file {:?}: {}", path, e))
        })?;

        let table = Self::from_json(&content)?;

        log::info!("Loaded {} form(s) from {:?}", table.len(), path);
        Ok(table)
    }

    /// Parse a lookup table from JSON text
    pub fn from_json(content: &str) -> Result<Self> {
        let forms: Vec<FormSchema> = serde_json::from_str(content)
            .map_err(|e| CondenseError::LookupError(format!("Invalid JSON: {}", e)))?;

        let mut table = Self::new();
        for form in forms {
            table.add_form(form);
        }
        Ok(table)
    }

    /// Add a form schema; a repeated form id is recorded and ignored
    ///
    /// Prompts and tags that would repeat an output column are dropped with a
    /// warning.
    pub fn add_form(&mut self, mut form: FormSchema) {
        if self.by_id.contains_key(&form.form_id) {
            log::warn!("Duplicate lookup entry for form_id \"{}\" ignored", form.form_id);
            self.duplicates.push(form.form_id);
            return;
        }
        for name in form.dedupe_columns() {
            log::warn!(
                "Lookup entry for form_id \"{}\": \"{}\" repeats an output column; ignored",
                form.form_id,
                name
            );
            self.dropped_columns.push((form.form_id.clone(), name));
        }
        self.by_id.insert(form.form_id.clone(), self.forms.len());
        self.forms.push(form);
    }

    /// Get the schema for a form id
    pub fn get(&self, form_id: &str) -> Option<&FormSchema> {
        self.by_id.get(form_id).map(|&idx| &self.forms[idx])
    }

    /// Get the first schema with the given title
    pub fn get_by_title(&self, form_title: &str) -> Option<&FormSchema> {
        self.forms.iter().find(|f| f.form_title == form_title)
    }

    /// All schemas in declaration order
    pub fn forms(&self) -> &[FormSchema] {
        &self.forms
    }

    pub fn len(&self) -> usize {
        self.forms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }

    /// Check this table against a catalog of supported forms
    ///
    /// Every issue is also logged as a warning.
    pub fn validate(&self, catalog: &FormCatalog) -> Vec<LookupIssue> {
        let mut issues: Vec<LookupIssue> = self
            .duplicates
            .iter()
            .map(|form_id| LookupIssue::DuplicateFormId {
                form_id: form_id.clone(),
            })
            .collect();
        issues.extend(
            self.dropped_columns
                .iter()
                .map(|(form_id, name)| LookupIssue::DuplicateColumn {
                    form_id: form_id.clone(),
                    name: name.clone(),
                }),
        );

        for form in &self.forms {
            match catalog.title_of(&form.form_id) {
                None => issues.push(LookupIssue::UnknownForm {
                    form_id: form.form_id.clone(),
                }),
                Some(title) if title != form.form_title => issues.push(LookupIssue::TitleMismatch {
                    form_id: form.form_id.clone(),
                    lookup_title: form.form_title.clone(),
                    catalog_title: title.to_string(),
                }),
                Some(_) => {}
            }
        }

        for issue in &issues {
            log::warn!("Lookup validation: {}", issue);
        }
        issues
    }

    /// Get lookup statistics
    pub fn stats(&self) -> LookupStats {
        LookupStats {
            num_forms: self.forms.len(),
            num_prompts: self.forms.iter().map(|f| f.prompts.len()).sum(),
            num_tags: self.forms.iter().map(|f| f.tags.len()).sum(),
        }
    }
}

/// Lookup statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupStats {
    pub num_forms: usize,
    /// Declared prompts across all forms
    pub num_prompts: usize,
    /// Declared tags across all forms
    pub num_tags: usize,
}

/// A supported form, as listed by the form catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormIdentity {
    pub form_id: String,
    #[serde(default)]
    pub form_title: String,
}

/// The catalog of supported form ids and titles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormCatalog {
    entries: Vec<FormIdentity>,
}

impl FormCatalog {
    pub fn new(entries: Vec<FormIdentity>) -> Self {
        Self { entries }
    }

    /// Load a catalog from a JSON array of `{form_id, form_title}` objects
    ///
    /// Extra fields are ignored, so a lookup file doubles as a catalog.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<FormIdentity> = serde_json::from_str(&content).map_err(|e| {
            CondenseError::LookupError(format!("Invalid catalog {:?}: {}", path, e))
        })?;
        Ok(Self::new(entries))
    }

    pub fn entries(&self) -> &[FormIdentity] {
        &self.entries
    }

    fn title_of(&self, form_id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.form_id == form_id)
            .map(|e| e.form_title.as_str())
    }
}

impl From<&LookupTable> for FormCatalog {
    fn from(table: &LookupTable) -> Self {
        Self::new(
            table
                .forms()
                .iter()
                .map(|f| FormIdentity {
                    form_id: f.form_id.clone(),
                    form_title: f.form_title.clone(),
                })
                .collect(),
        )
    }
}

/// A problem found while validating the lookup table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupIssue {
    DuplicateFormId {
        form_id: String,
    },
    /// A prompt or tag whose column another declaration already produces
    DuplicateColumn {
        form_id: String,
        name: String,
    },
    UnknownForm {
        form_id: String,
    },
    TitleMismatch {
        form_id: String,
        lookup_title: String,
        catalog_title: String,
    },
}

impl std::fmt::Display for LookupIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupIssue::DuplicateFormId { form_id } => {
                write!(f, "form_id \"{}\" declared more than once", form_id)
            }
            LookupIssue::DuplicateColumn { form_id, name } => {
                write!(f, "form_id \"{}\" declares column \"{}\" more than once", form_id, name)
            }
            LookupIssue::UnknownForm { form_id } => {
                write!(f, "form_id \"{}\" is not in the form catalog", form_id)
            }
            LookupIssue::TitleMismatch {
                form_id,
                lookup_title,
                catalog_title,
            } => write!(
                f,
                "form_id \"{}\" titled \"{}\" in lookup but \"{}\" in catalog",
                form_id, lookup_title, catalog_title
            ),
        }
    }
}
