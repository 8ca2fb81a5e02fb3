//! Batch runner
//!
//! Instances are condensed in parallel and written one at a time, in discovery
//! order, so the first row still fixes the output header. A failing instance is
//! logged and counted; the rest of the batch carries on.

use anyhow::{Context, Result};
use odk_condense::{CondenseError, Condensed, Condenser, OutputTable};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::report::BatchReport;

/// Condense every instance directory into `table`
pub fn run_batch(
    condenser: &Condenser,
    instances: &[PathBuf],
    table: &mut OutputTable,
    form_id: Option<String>,
    jobs: Option<usize>,
) -> Result<BatchReport> {
    let start = Instant::now();
    let mut report = BatchReport::new(table.path().to_path_buf(), form_id);

    let pending: Vec<&PathBuf> = instances
        .iter()
        .filter(|path| {
            let id = instance_id(path);
            if table.contains(&id) {
                log::debug!("[{}] Previously analyzed; skipping", id);
                report.skipped += 1;
                false
            } else {
                true
            }
        })
        .collect();

    if pending.is_empty() {
        log::info!("All up to date. No new instances to analyze.");
    } else if table.header().is_none() {
        log::info!("Analyzing all {} instances", pending.len());
    } else {
        log::info!("Analyzing new {} instances", pending.len());
    }

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(jobs) = jobs {
        builder = builder.num_threads(jobs);
    }
    let pool = builder.build().context("Failed to start worker threads")?;

    let results: Vec<(String, odk_condense::Result<Condensed>)> = pool.install(|| {
        pending
            .par_iter()
            .map(|path| (instance_id(path), condenser.condense_dir(path)))
            .collect()
    });

    for (id, result) in results {
        let condensed = match result {
            Ok(condensed) => condensed,
            Err(e) => {
                log::error!("[{}] Skipping instance: {}", id, e);
                report.record_failure(id, e);
                continue;
            }
        };

        match table.append(&condensed.columns(), &condensed.row()) {
            Ok(()) => {
                log::info!("[{}] Condensed", id);
                report.succeeded += 1;
                report
                    .uncaptured_prompts
                    .extend(condensed.record.uncaptured_prompts);
            }
            Err(e @ CondenseError::HeaderMismatch(_)) => {
                report.record_failure(id, e);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to write {:?}", table.path()));
            }
        }
    }

    report.elapsed = start.elapsed();
    Ok(report)
}

fn instance_id(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
