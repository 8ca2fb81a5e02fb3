//! Instance artifacts
//!
//! An instance is one completed form submission: an interaction log, a
//! submission document and any photos taken while filling it in. The engine
//! reads instances through [`InstanceArtifacts`] so it does not care where they
//! are stored; [`InstanceDir`] is the on-disk layout, one directory per instance.

use crate::config::EngineConfig;
use crate::types::{CondenseError, FileSizes, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Access to the files making up one instance
pub trait InstanceArtifacts {
    /// Unique instance id
    fn instance_id(&self) -> &str;

    /// Open the interaction log for reading
    fn open_log(&self) -> Result<Box<dyn BufRead + '_>>;

    /// Read the whole submission document
    fn read_submission(&self) -> Result<String>;

    /// Byte sizes of the submission, the log and all photos
    fn file_sizes(&self) -> Result<FileSizes>;
}

/// An instance stored as a directory named after its id
///
/// ```text
/// uuid1234/
///   log.txt
///   submission.xml
///   1500000000000.jpg
/// ```
#[derive(Debug, Clone)]
pub struct InstanceDir {
    path: PathBuf,
    instance_id: String,
    config: EngineConfig,
}

impl InstanceDir {
    /// Wrap an instance directory, using artifact names from `config`
    pub fn new(path: impl Into<PathBuf>, config: &EngineConfig) -> Self {
        let path = path.into();
        let instance_id = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        Self {
            path,
            instance_id,
            config: config.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_path(&self) -> PathBuf {
        self.path.join(&self.config.log_file_name)
    }

    pub fn submission_path(&self) -> PathBuf {
        self.path.join(&self.config.submission_file_name)
    }

    fn required(&self, path: PathBuf) -> Result<PathBuf> {
        if path.is_file() {
            Ok(path)
        } else {
            Err(CondenseError::MissingArtifact(format!(
                "{} has no {:?}",
                self.instance_id,
                path.file_name().unwrap_or_default()
            )))
        }
    }
}

impl InstanceArtifacts for InstanceDir {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn open_log(&self) -> Result<Box<dyn BufRead + '_>> {
        let path = self.required(self.log_path())?;
        let file = File::open(&path).map_err(|e| {
            CondenseError::LogReadError(format!("Failed to open {:?}: {}", path, e))
        })?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn read_submission(&self) -> Result<String> {
        let path = self.required(self.submission_path())?;
        std::fs::read_to_string(&path).map_err(|e| {
            CondenseError::XmlParseError(format!("Failed to read {:?}: {}", path, e))
        })
    }

    fn file_sizes(&self) -> Result<FileSizes> {
        let mut sizes = FileSizes::default();

        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if name == self.config.submission_file_name.as_str() {
                sizes.submission = metadata.len();
            } else if name == self.config.log_file_name.as_str() {
                sizes.log = metadata.len();
            } else if self.config.is_photo(&name) {
                sizes.photo += metadata.len();
            }
        }

        Ok(sizes)
    }
}
