//! Extract, validate, export, notify
//!
//! One run walks `Idle -> Acquiring -> Extracting -> Validating ->
//! Serializing -> Notifying -> Done`. Every stage before the CSV write is
//! fatal on failure and leaves no file behind; notification happens after the
//! write and its failure is only reported.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::document::{AcquireError, Document, DocumentSource};
use crate::export::{timestamped_filename, write_csv_file, ExportError};
use crate::extractors::{extract, RawRecord, RecordSelectors};
use crate::notify::{ConfigError, DeliveryError, Notifier};
use crate::schema::{Schema, SchemaViolation, ValidatedRecord};
use crate::site::SiteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Acquiring,
    Extracting,
    Validating,
    Serializing,
    Notifying,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Acquiring => "acquiring",
            Stage::Extracting => "extracting",
            Stage::Validating => "validating",
            Stage::Serializing => "serializing",
            Stage::Notifying => "notifying",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// What to do with a record that fails validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidRecordPolicy {
    /// Fail the whole run on the first invalid record
    #[default]
    Abort,
    /// Leave it out of the export and list it on the report
    Skip,
}

/// Everything site-specific the pipeline needs
#[derive(Debug, Clone)]
pub struct ExportPlan {
    /// CSV file stem
    pub dataset: String,
    pub schema: Schema,
    pub selectors: RecordSelectors,
    /// Keep at most this many records (top-N)
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub out_dir: PathBuf,
    pub policy: InvalidRecordPolicy,
    /// Fixed capture time; the clock is read at start when unset
    pub captured_at: Option<DateTime<Local>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("."),
            policy: InvalidRecordPolicy::default(),
            captured_at: None,
        }
    }
}

/// Outcome of handing the records to the notifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    NotConfigured,
    Delivered,
    Failed(DeliveryError),
}

/// A record left out under [`InvalidRecordPolicy::Skip`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    /// Position among the extracted records, from 0
    pub index: usize,
    pub record: RawRecord,
    pub violation: SchemaViolation,
}

#[derive(Debug)]
pub struct ExportReport {
    pub path: PathBuf,
    pub count: usize,
    pub records: Vec<ValidatedRecord>,
    pub skipped: Vec<SkippedRecord>,
    pub delivery: Delivery,
    pub captured_at: DateTime<Local>,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error(transparent)]
    Site(#[from] SiteError),
    #[error("could not load the page: {source}")]
    Acquisition {
        #[source]
        source: AcquireError,
        screenshot: Option<PathBuf>,
    },
    #[error("timed out after {ms} ms waiting for `{selector}`")]
    Timeout {
        selector: String,
        ms: u64,
        screenshot: Option<PathBuf>,
    },
    #[error("no elements matched `{container}`, the page structure might have changed")]
    EmptyResult { container: String },
    #[error("record {index} is invalid: {violation}")]
    Validation {
        index: usize,
        record: RawRecord,
        #[source]
        violation: SchemaViolation,
    },
    #[error("export failed: {0}")]
    Export(#[from] ExportError),
}

impl RunError {
    fn acquisition(error: AcquireError, screenshot: Option<&Path>) -> Self {
        let screenshot = screenshot.map(Path::to_path_buf);
        match error {
            AcquireError::Timeout { selector, ms } => RunError::Timeout { selector, ms, screenshot },
            source => RunError::Acquisition { source, screenshot },
        }
    }

    /// Stage the run was in when it failed
    pub fn stage(&self) -> Stage {
        match self {
            RunError::Configuration(_) | RunError::Site(_) => Stage::Idle,
            RunError::Acquisition { .. } | RunError::Timeout { .. } => Stage::Acquiring,
            RunError::EmptyResult { .. } => Stage::Extracting,
            RunError::Validation { .. } => Stage::Validating,
            RunError::Export(_) => Stage::Serializing,
        }
    }

    /// Field that failed validation
    pub fn field(&self) -> Option<&str> {
        match self {
            RunError::Validation { violation, .. } => Some(violation.field.as_str()),
            _ => None,
        }
    }

    /// Screenshot captured when acquisition failed
    pub fn screenshot(&self) -> Option<&Path> {
        match self {
            RunError::Acquisition { screenshot, .. } | RunError::Timeout { screenshot, .. } => {
                screenshot.as_deref()
            }
            _ => None,
        }
    }
}

/// Run one export from `source` according to `plan`
pub async fn run(
    source: &mut dyn DocumentSource,
    plan: &ExportPlan,
    notifier: Option<&dyn Notifier>,
    options: &RunOptions,
) -> Result<ExportReport, RunError> {
    let captured_at = options.captured_at.unwrap_or_else(Local::now);

    info!(stage = %Stage::Acquiring, dataset = %plan.dataset, "starting export");
    let document = match source.acquire().await {
        Ok(document) => document,
        Err(e) => return Err(RunError::acquisition(e, source.diagnostic())),
    };

    let (records, skipped) = collect_records(document, plan, options.policy)?;

    info!(stage = %Stage::Serializing, records = records.len(), "writing CSV");
    let filename = timestamped_filename(&plan.dataset, &captured_at);
    let path = write_csv_file(&options.out_dir, &filename, &plan.schema, &records)?;
    info!("Data saved to {}", path.display());

    let delivery = match notifier {
        None => Delivery::NotConfigured,
        Some(notifier) => {
            info!(stage = %Stage::Notifying, "sending notification");
            match notifier.notify(&records).await {
                Ok(()) => Delivery::Delivered,
                Err(e) => {
                    warn!("notification failed, export kept at {}: {}", path.display(), e);
                    Delivery::Failed(e)
                }
            }
        }
    };

    info!(stage = %Stage::Done, path = %path.display(), count = records.len(), "export finished");
    Ok(ExportReport {
        path,
        count: records.len(),
        records,
        skipped,
        delivery,
        captured_at,
    })
}

/// Extract and validate; consumes the document so it is gone before the
/// next suspension point
fn collect_records(
    document: Document,
    plan: &ExportPlan,
    policy: InvalidRecordPolicy,
) -> Result<(Vec<ValidatedRecord>, Vec<SkippedRecord>), RunError> {
    let containers = document.count(plan.selectors.container());
    debug!(stage = %Stage::Extracting, containers, "matched containers");
    if containers == 0 {
        return Err(RunError::EmptyResult {
            container: plan.selectors.container_str().to_string(),
        });
    }

    let mut records = Vec::new();
    let mut skipped = Vec::new();
    for (index, raw) in extract(&document, &plan.selectors, plan.limit).enumerate() {
        match plan.schema.validate(&raw) {
            Ok(record) => records.push(record),
            Err(violation) => match policy {
                InvalidRecordPolicy::Abort => {
                    return Err(RunError::Validation {
                        index,
                        record: raw,
                        violation,
                    })
                }
                InvalidRecordPolicy::Skip => {
                    warn!("skipping record {}: {}", index, violation);
                    skipped.push(SkippedRecord {
                        index,
                        record: raw,
                        violation,
                    });
                }
            },
        }
    }
    debug!(stage = %Stage::Validating, valid = records.len(), skipped = skipped.len(), "validated");

    if records.is_empty() {
        return Err(RunError::EmptyResult {
            container: plan.selectors.container_str().to_string(),
        });
    }

    Ok((records, skipped))
}
