//! ODK Condensation Library
//!
//! A reusable library for condensing ODK Collect form submissions into one
//! analysis row each, from the interaction log recorded while the form was
//! filled in and the submitted XML document.
//!
//! # Architecture
//!
//! Each instance goes through the same pipeline:
//! - The log parser turns `log.txt` into a lazy stream of typed events
//! - The timeline engine replays the events into per-prompt metrics
//! - The XML reader extracts the form id and requested tag values
//! - The schema resolver decides which columns the instance contributes
//! - The output table appends the row to a CSV file, rejecting header mismatches
//!
//! Finding instances on disk, running them in parallel and reporting are in
//! the application layer (odk-condense-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use odk_condense::{Condenser, EngineConfig, LookupTable, OutputTable, WriteMode};
//! use std::path::Path;
//!
//! let lookup = LookupTable::from_file(Path::new("lookup.json")).unwrap();
//! let condenser = Condenser::new(EngineConfig::new().with_break_threshold_ms(15_000))
//!     .with_lookup(lookup);
//!
//! let mut table = OutputTable::open(Path::new("condensed.csv"), WriteMode::Append).unwrap();
//!
//! let condensed = condenser.condense_dir(Path::new("instances/uuid1234")).unwrap();
//! if !table.contains(&condensed.record.instance_id) {
//!     table.append(&condensed.columns(), &condensed.row()).unwrap();
//! }
//! ```

// Public modules
pub mod condenser;
pub mod config;
pub mod instance;
pub mod logparse;
pub mod lookup;
pub mod resolver;
pub mod timeline;
pub mod types;
pub mod writer;
pub mod xml;

// Re-export main types for convenience
pub use condenser::{Condensed, Condenser};
pub use config::{EngineConfig, DEFAULT_BREAK_THRESHOLD_MS, DEFAULT_SCREEN_GROUP_MS};
pub use instance::{InstanceArtifacts, InstanceDir};
pub use logparse::{EventStream, LogParser};
pub use lookup::{FormCatalog, FormIdentity, FormSchema, LookupIssue, LookupStats, LookupTable};
pub use resolver::{ResolvedSchema, SchemaResolver};
pub use timeline::TimelineEngine;
pub use types::{
    CondenseError, Event, EventKind, FileSizes, HeaderMismatch, InstanceRecord, Millis,
    PromptMetrics, Result, TimelineSummary,
};
pub use writer::{OutputTable, WriteMode};
pub use xml::{SubmissionDocument, SubmissionHeader};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
