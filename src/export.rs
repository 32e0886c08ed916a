//! CSV export of validated records
//!
//! Header row is the schema's field names, every value is double-quoted, and
//! files are named `<dataset>.<YYYYMMDD_HHmmss>.csv` from the capture time.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};
use thiserror::Error;

use crate::extractors::RawRecord;
use crate::schema::{Schema, SchemaViolation, ValidatedRecord};

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("could not write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV header {found:?} does not match schema {expected:?}")]
    HeaderMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("CSV row {row}: {source}")]
    InvalidRow {
        row: usize,
        #[source]
        source: SchemaViolation,
    },
}

/// `<dataset>.<YYYYMMDD_HHmmss>.csv`
pub fn timestamped_filename<Tz: TimeZone>(dataset: &str, captured_at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}.{}.csv", dataset, captured_at.format(TIMESTAMP_FORMAT))
}

/// Serialize records under the schema's header, quoting every field
pub fn write_records<W: Write>(writer: W, schema: &Schema, records: &[ValidatedRecord]) -> Result<W, ExportError> {
    let mut wtr = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(writer);

    wtr.write_record(schema.names())?;
    for record in records {
        wtr.write_record(schema.names().map(|name| record.get(name).unwrap_or_default()))?;
    }
    wtr.flush().map_err(csv::Error::from)?;

    wtr.into_inner().map_err(|e| ExportError::Csv(e.into_error().into()))
}

pub fn to_csv_string(schema: &Schema, records: &[ValidatedRecord]) -> Result<String, ExportError> {
    let bytes = write_records(Vec::new(), schema, records)?;
    // csv only emits the UTF-8 it was given
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Parse an exported CSV back into records, re-validating every row
pub fn read_records<R: Read>(reader: R, schema: &Schema) -> Result<Vec<ValidatedRecord>, ExportError> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);

    let found: Vec<String> = rdr.headers()?.iter().map(String::from).collect();
    let expected: Vec<String> = schema.names().map(String::from).collect();
    if found != expected {
        return Err(ExportError::HeaderMismatch { expected, found });
    }

    let mut records = Vec::new();
    for (i, row) in rdr.records().enumerate() {
        let row = row?;
        let raw: RawRecord = expected.iter().map(String::as_str).zip(row.iter()).collect();
        let record = schema
            .validate(&raw)
            .map_err(|source| ExportError::InvalidRow { row: i + 1, source })?;
        records.push(record);
    }
    Ok(records)
}

/// Write `records` to `dir/filename`, flushed and synced before returning.
///
/// Rows go to a hidden sibling file that is renamed into place once complete,
/// so a failed write never leaves a truncated CSV under the final name.
pub fn write_csv_file(
    dir: &Path,
    filename: &str,
    schema: &Schema,
    records: &[ValidatedRecord],
) -> Result<PathBuf, ExportError> {
    let path = dir.join(filename);
    let partial = dir.join(format!(".{filename}.partial"));

    if !dir.as_os_str().is_empty() {
        std::fs::create_dir_all(dir).map_err(|source| ExportError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let written = write_synced(&partial, schema, records).and_then(|()| {
        std::fs::rename(&partial, &path).map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })
    });
    if let Err(e) = written {
        let _ = std::fs::remove_file(&partial);
        return Err(e);
    }

    Ok(path)
}

fn write_synced(path: &Path, schema: &Schema, records: &[ValidatedRecord]) -> Result<(), ExportError> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_err)?;
    let file = write_records(file, schema, records)?;
    file.sync_all().map_err(io_err)
}
