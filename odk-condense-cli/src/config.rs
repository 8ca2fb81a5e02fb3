//! Configuration loading and merging
//!
//! Settings come from an optional TOML file; command-line flags override it.

use anyhow::{bail, Context, Result};
use odk_condense::{EngineConfig, WriteMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::CondenseArgs;

/// Application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub input: InputConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct InputConfig {
    pub storage_directory: Option<PathBuf>,
    pub form_id: Option<String>,
    pub lookup: Option<PathBuf>,
    /// Treat `storage_directory` as the instances directory itself
    pub storage_literal: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub export_directory: Option<PathBuf>,
    pub export_filename: Option<String>,
    pub overwrite: bool,
    pub log_level: Option<String>,
    /// Log file name, created in the export directory
    pub log_file: Option<String>,
    /// Worker threads for condensing (default: one per core)
    pub jobs: Option<usize>,
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}

/// Everything a condense run needs, after merging file and flags
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub engine: EngineConfig,
    pub storage_directory: PathBuf,
    pub storage_literal: bool,
    pub form_id: Option<String>,
    pub lookup: Option<PathBuf>,
    pub export_directory: PathBuf,
    pub export_filename: String,
    pub write_mode: WriteMode,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub jobs: Option<usize>,
}

impl RunSettings {
    /// Merge command-line flags over the configuration file
    pub fn resolve(args: &CondenseArgs, config: AppConfig) -> Result<Self> {
        let AppConfig {
            mut engine,
            input,
            output,
        } = config;

        if let Some(threshold) = args.break_threshold_ms {
            engine.break_threshold_ms = threshold;
        }

        let storage_directory = match args.storage_directory.clone().or(input.storage_directory) {
            Some(dir) => dir,
            None => bail!("No storage directory given (--storage-directory or [input] storage_directory)"),
        };
        let export_directory = match args.export_directory.clone().or(output.export_directory) {
            Some(dir) => dir,
            None => bail!("No export directory given (--export-directory or [output] export_directory)"),
        };
        let export_filename = match args.export_filename.clone().or(output.export_filename) {
            Some(name) => name,
            None => bail!("No export filename given (--export-filename or [output] export_filename)"),
        };

        let overwrite = args.overwrite || output.overwrite;

        Ok(Self {
            engine,
            storage_directory,
            storage_literal: args.storage_literal || input.storage_literal,
            form_id: args.form_id.clone().or(input.form_id),
            lookup: args.lookup.clone().or(input.lookup),
            export_directory,
            export_filename,
            write_mode: if overwrite {
                WriteMode::Overwrite
            } else {
                WriteMode::Append
            },
            log_level: args.log_level.clone().or(output.log_level),
            log_file: args.log_file.clone().or(output.log_file),
            jobs: args.jobs.or(output.jobs),
        })
    }

    pub fn output_path(&self) -> PathBuf {
        self.export_directory.join(&self.export_filename)
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.log_file
            .as_ref()
            .map(|name| self.export_directory.join(name))
    }
}
