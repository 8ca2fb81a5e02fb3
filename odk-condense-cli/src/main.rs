//! ODK Condense CLI Application
//!
//! This is the command-line interface for the condensation engine.
//! It uses the odk-condense library and adds:
//! - Configuration file and flag handling
//! - Instance discovery in ODK Briefcase storage
//! - Parallel batch processing with per-instance failure isolation
//! - Run summary and lookup table listing

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use odk_condense::{Condenser, FormCatalog, LookupTable, OutputTable};
use std::path::{Path, PathBuf};

mod config;
mod discovery;
mod report;
mod runner;

use config::{AppConfig, RunSettings};

/// ODK Condense - Condense ODK Collect submissions into one row each
#[derive(Parser, Debug)]
#[command(name = "odk-condense")]
#[command(about = "Condense ODK Collect form logs and submissions into a CSV table", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Condense all instances of one form into the export file
    Condense(CondenseArgs),

    /// List the forms known to the lookup table
    Forms(FormsArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct CondenseArgs {
    /// Directory containing "ODK Briefcase Storage" (or the instances, with -s)
    #[arg(long, value_name = "DIR")]
    pub storage_directory: Option<PathBuf>,

    /// Form id to condense; also used for submissions that declare none
    #[arg(long, value_name = "ID")]
    pub form_id: Option<String>,

    /// Directory for the output table and log file
    #[arg(long, value_name = "DIR")]
    pub export_directory: Option<PathBuf>,

    /// Output table file name
    #[arg(long, value_name = "FILE")]
    pub export_filename: Option<String>,

    /// Replace the output table instead of appending to it
    #[arg(long)]
    pub overwrite: bool,

    /// Lookup table (JSON) declaring prompts and tags per form
    #[arg(long, value_name = "FILE")]
    pub lookup: Option<PathBuf>,

    /// Treat the storage directory as the folder containing all instances
    #[arg(short, long)]
    pub storage_literal: bool,

    /// Gaps at or above this many milliseconds count as breaks
    #[arg(long, value_name = "MS")]
    pub break_threshold_ms: Option<u64>,

    /// Worker threads (default: one per core)
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// DEBUG, INFO, WARNING or ERROR (default: DEBUG)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Log file name, created in the export directory (default: stderr)
    #[arg(long, value_name = "NAME")]
    pub log_file: Option<String>,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Args, Debug)]
struct FormsArgs {
    /// Lookup table (JSON)
    #[arg(long, value_name = "FILE")]
    lookup: PathBuf,

    /// Show the form titles
    #[arg(short = 'f', long)]
    title: bool,

    /// Show the form ids
    #[arg(short = 'i', long)]
    id: bool,

    /// Also validate the lookup against this catalog (JSON list of form_id/form_title)
    #[arg(long, value_name = "FILE")]
    catalog: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Condense(args) => condense(&args),
        Command::Forms(args) => {
            init_logging(Some("WARNING"), false, None)?;
            forms(&args)
        }
    }
}

/// Condense mode - discover instances, condense them, append rows
fn condense(args: &CondenseArgs) -> Result<()> {
    let file_config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => AppConfig::default(),
    };
    let settings = RunSettings::resolve(args, file_config)?;

    std::fs::create_dir_all(&settings.export_directory).with_context(|| {
        format!("Failed to create export directory {:?}", settings.export_directory)
    })?;
    init_logging(
        settings.log_level.as_deref(),
        args.quiet,
        settings.log_path().as_deref(),
    )?;

    log::info!("ODK Condense CLI v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using condense library v{}", odk_condense::VERSION);

    let lookup = match &settings.lookup {
        Some(path) => LookupTable::from_file(path)
            .with_context(|| format!("Failed to load lookup table {:?}", path))?,
        None => {
            log::warn!("No lookup table given; writing aggregate columns only");
            LookupTable::new()
        }
    };

    let form_title = match &settings.form_id {
        Some(form_id) => {
            log::info!("Create logging record for form_id \"{}\"", form_id);
            lookup.get(form_id).map(|form| form.form_title.clone())
        }
        None => None,
    };
    let instances_dir = discovery::instances_dir(
        &settings.storage_directory,
        form_title.as_deref(),
        settings.storage_literal,
    )
    .with_context(|| format!("form_id {:?} has no lookup entry", settings.form_id))?;

    let mut condenser = Condenser::new(settings.engine.clone()).with_lookup(lookup);
    if let Some(form_id) = &settings.form_id {
        condenser = condenser.with_fallback_form_id(form_id.clone());
    }

    let instances = discovery::discover_instances(&instances_dir)?;
    let output = settings.output_path();
    let mut table = OutputTable::open(&output, settings.write_mode)
        .with_context(|| format!("Failed to open output table {:?}", output))?;

    let report = runner::run_batch(
        &condenser,
        &instances,
        &mut table,
        settings.form_id.clone(),
        settings.jobs,
    )?;

    report.log(&instances_dir);
    if !report.is_clean() {
        log::warn!(
            "{} instance(s) could not be condensed; see the errors above",
            report.failed.len()
        );
    }
    if !args.quiet {
        println!("{}", report);
    }

    Ok(())
}

/// Forms mode - list lookup entries, tab-separated
fn forms(args: &FormsArgs) -> Result<()> {
    let lookup = LookupTable::from_file(&args.lookup)
        .with_context(|| format!("Failed to load lookup table {:?}", args.lookup))?;

    let (show_title, show_id) = match (args.title, args.id) {
        (false, false) => (true, true),
        flags => flags,
    };

    for form in lookup.forms() {
        let mut show = Vec::new();
        if show_title {
            show.push(form.form_title.as_str());
        }
        if show_id {
            show.push(form.form_id.as_str());
        }
        println!("{}", show.join("\t"));
    }

    if let Some(path) = &args.catalog {
        let catalog = FormCatalog::from_file(path)
            .with_context(|| format!("Failed to load form catalog {:?}", path))?;
        let issues = lookup.validate(&catalog);
        if issues.is_empty() {
            println!("Lookup table matches catalog ({} forms)", catalog.entries().len());
        } else {
            for issue in issues {
                println!("{}", issue);
            }
        }
    }

    Ok(())
}

/// Map a level name to a filter; unknown or absent names mean DEBUG
fn level_filter(level: Option<&str>) -> log::LevelFilter {
    use log::LevelFilter;

    match level.map(|l| l.to_ascii_uppercase()).as_deref() {
        Some("ERROR") | Some("CRITICAL") => LevelFilter::Error,
        Some("WARNING") | Some("WARN") => LevelFilter::Warn,
        Some("INFO") => LevelFilter::Info,
        Some("TRACE") => LevelFilter::Trace,
        _ => LevelFilter::Debug,
    }
}

/// Initialize logging based on the requested level and destination
fn init_logging(level: Option<&str>, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    use env_logger::{Builder, Target};
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        level_filter(level)
    };

    let mut builder = Builder::new();
    builder.filter_level(level).format(|buf, record| {
        writeln!(
            buf,
            "{} - {} - {}",
            chrono::Local::now().format("%m/%d/%Y %I:%M:%S %p"),
            record.level(),
            record.args()
        )
    });

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {:?}", path))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::LevelFilter;

    #[test]
    fn test_level_filter() {
        assert_eq!(level_filter(Some("info")), LevelFilter::Info);
        assert_eq!(level_filter(Some("WARNING")), LevelFilter::Warn);
        assert_eq!(level_filter(Some("ERROR")), LevelFilter::Error);
        assert_eq!(level_filter(Some("loud")), LevelFilter::Debug);
        assert_eq!(level_filter(None), LevelFilter::Debug);
    }

    #[test]
    fn test_condense_args_parse() {
        let cli = Cli::parse_from([
            "odk-condense",
            "condense",
            "--storage-directory",
            "/data",
            "--form-id",
            "HQ-v12",
            "--export-directory",
            "/out",
            "--export-filename",
            "hq.csv",
            "-s",
            "--jobs",
            "4",
        ]);
        match cli.command {
            Command::Condense(args) => {
                assert_eq!(args.form_id.as_deref(), Some("HQ-v12"));
                assert!(args.storage_literal);
                assert_eq!(args.jobs, Some(4));
                assert!(!args.overwrite);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
