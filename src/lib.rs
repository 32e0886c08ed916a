//! Single-shot web scrape jobs exported to CSV
//!
//! Loads a page and pulls records out of it with CSS selectors:
//! - Static pages (HTTP GET + parse)
//! - Rendered pages (headless browser, wait for a selector, feature `browser`)
//! - Schema validation with per-field fallbacks
//! - Quoted CSV under a timestamped filename
//! - Slack webhook summary of the exported records

pub mod document;
pub mod export;
pub mod extractors;
pub mod job;
pub mod notify;
pub mod pipeline;
pub mod schema;
pub mod site;
pub mod sources;

pub use document::{AcquireError, Document, DocumentSource};
pub use export::{read_records, timestamped_filename, write_records, ExportError};
pub use extractors::*;
pub use job::{preflight, run_site, run_with_source, JobSettings};
pub use notify::{ConfigError, DeliveryError, MessageLayout, Notifier, SlackNotifier, WebhookUrl};
pub use pipeline::{run, Delivery, ExportPlan, ExportReport, InvalidRecordPolicy, RunError, RunOptions, Stage};
pub use schema::{FieldDef, FieldKind, Schema, SchemaError, SchemaViolation, ValidatedRecord};
pub use site::{SiteConfig, SiteError, SourceKind};
