//! Output table writer
//!
//! Appends condensed instance rows to a CSV file. The first row ever written
//! fixes the header; every later row must carry exactly the same columns in
//! the same order, otherwise it is rejected and the file is left untouched.
//!
//! When appending to an existing table, the ids in its first column are read
//! back so already-analyzed instances can be skipped.

use crate::types::{CondenseError, HeaderMismatch, Result};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// How to treat an existing output file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Keep existing rows and add new ones after them
    #[default]
    Append,
    /// Start from an empty file
    Overwrite,
}

/// An open output table
#[derive(Debug)]
pub struct OutputTable {
    path: PathBuf,
    file: File,
    header: Option<Vec<String>>,
    /// Values of the first column of every row in the table
    instance_ids: HashSet<String>,
    rows_written: usize,
    /// The existing file does not end with a line break
    needs_terminator: bool,
}

impl OutputTable {
    /// Open (or create) an output table
    pub fn open(path: &Path, mode: WriteMode) -> Result<Self> {
        let (header, instance_ids, needs_terminator) = match mode {
            WriteMode::Append if path.exists() => {
                let (header, ids) = read_existing(path)?;
                (header, ids, lacks_terminator(path)?)
            }
            _ => (None, HashSet::new(), false),
        };

        let file = match mode {
            WriteMode::Append => OpenOptions::new().create(true).append(true).open(path)?,
            WriteMode::Overwrite => File::create(path)?,
        };

        match &header {
            Some(columns) => log::info!(
                "Appending to {:?} ({} columns, {} existing rows)",
                path,
                columns.len(),
                instance_ids.len()
            ),
            None => log::info!("Writing new output table {:?}", path),
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
            instance_ids,
            rows_written: 0,
            needs_terminator,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The established header, once one exists
    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    /// Check whether an instance already has a row
    pub fn contains(&self, instance_id: &str) -> bool {
        self.instance_ids.contains(instance_id)
    }

    /// Rows appended through this handle
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Check candidate columns against the established header
    pub fn check_columns(&self, columns: &[String]) -> Result<()> {
        match &self.header {
            Some(established) => match HeaderMismatch::between(established, columns) {
                Some(mismatch) => Err(CondenseError::HeaderMismatch(mismatch)),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    /// Append one row
    ///
    /// The header is written along with the first row of an empty table. The
    /// row is encoded in full before anything touches the file.
    pub fn append(&mut self, columns: &[String], row: &[String]) -> Result<()> {
        if columns.len() != row.len() {
            return Err(CondenseError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} values for {} columns", row.len(), columns.len()),
            )));
        }

        if let Err(e) = self.check_columns(columns) {
            log::error!(
                "Rejected row for {} in {:?}: {}",
                row.first().map(String::as_str).unwrap_or("?"),
                self.path,
                e
            );
            return Err(e);
        }

        let prefix = if self.needs_terminator { vec![b'\n'] } else { Vec::new() };
        let mut encoder = csv::Writer::from_writer(prefix);
        if self.header.is_none() {
            encoder.write_record(columns)?;
        }
        encoder.write_record(row)?;
        let bytes = encoder.into_inner().map_err(|e| e.into_error())?;

        self.file.write_all(&bytes)?;
        self.file.flush()?;
        self.needs_terminator = false;

        if self.header.is_none() {
            self.header = Some(columns.to_vec());
        }
        if let Some(id) = row.first() {
            self.instance_ids.insert(id.clone());
        }
        self.rows_written += 1;
        Ok(())
    }
}

/// Header and first-column ids of an existing table
fn read_existing(path: &Path) -> Result<(Option<Vec<String>>, HashSet<String>)> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Ok((None, HashSet::new()));
    }
    let header: Vec<String> = headers.iter().map(str::to_string).collect();

    let mut ids = HashSet::new();
    for record in reader.records() {
        let record = record?;
        if let Some(id) = record.get(0) {
            ids.insert(id.to_string());
        }
    }

    log::debug!("Found {} previously analyzed instance(s) in {:?}", ids.len(), path);
    Ok((Some(header), ids))
}

/// True when a non-empty file's last byte is not `\n`
fn lacks_terminator(path: &Path) -> Result<bool> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
