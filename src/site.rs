//! Declarative site definitions
//!
//! A [`SiteConfig`] carries everything that differs between scrape jobs:
//! where the page lives, how it is loaded, which containers and fields to
//! read, how many records to keep and how to lay out the chat message.
//! Built-in presets live in `sites/*.json`; any other definition can be
//! loaded from a JSON file of the same shape.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::extractors::{Accessor, ExtractError, FieldSelector, RecordSelectors};
use crate::notify::MessageLayout;
use crate::pipeline::ExportPlan;
use crate::schema::{FieldDef, FieldKind, Schema, SchemaError};

const PRESETS: &[(&str, &str)] = &[
    ("steam-top10", include_str!("../sites/steam-top10.json")),
    ("lego-star-wars", include_str!("../sites/lego-star-wars.json")),
    ("liberty-harbor", include_str!("../sites/liberty-harbor.json")),
];

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("unknown site `{0}`: not a built-in preset or a readable file")]
    Unknown(String),
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid site definition: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid schema: {0}")]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("site `{0}` declares no fields")]
    NoFields(String),
    #[error("site `{0}` has a limit of 0, it would never export anything")]
    ZeroLimit(String),
}

/// How the page is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Plain HTTP GET, no script execution
    #[default]
    Static,
    /// Headless browser render
    Render,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Static => "static",
            SourceKind::Render => "render",
        }
    }
}

/// One output column: where to read it and what it must look like
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Scoped to the container; absent reads the container itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default)]
    pub accessor: Accessor,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    /// CSV file stem; defaults to `name` with dashes turned into underscores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    pub url: Url,
    #[serde(default)]
    pub source: SourceKind,
    pub container: String,
    pub fields: Vec<FieldSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Selector a rendered page must show before it is read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<MessageLayout>,
}

impl SiteConfig {
    /// Parse and check a JSON definition
    pub fn from_json(json: &str) -> Result<Self, SiteError> {
        let config: SiteConfig = serde_json::from_str(json)?;
        config.plan(None)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, SiteError> {
        let json = std::fs::read_to_string(path).map_err(|source| SiteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn dataset(&self) -> String {
        match &self.dataset {
            Some(dataset) => dataset.clone(),
            None => self.name.replace('-', "_"),
        }
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn schema(&self) -> Result<Schema, SiteError> {
        let defs = self
            .fields
            .iter()
            .map(|f| FieldDef {
                name: f.name.clone(),
                kind: f.kind,
                fallback: f.fallback.clone(),
            })
            .collect();
        Ok(Schema::new(defs)?)
    }

    pub fn selectors(&self) -> Result<RecordSelectors, SiteError> {
        if self.fields.is_empty() {
            return Err(SiteError::NoFields(self.name.clone()));
        }
        let fields = self
            .fields
            .iter()
            .map(|f| FieldSelector::new(&f.name, f.selector.as_deref(), f.accessor.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RecordSelectors::new(&self.container, fields)?)
    }

    /// Compile into what the pipeline runs; `limit` overrides the site's own
    pub fn plan(&self, limit: Option<usize>) -> Result<ExportPlan, SiteError> {
        let limit = limit.or(self.limit);
        if limit == Some(0) {
            return Err(SiteError::ZeroLimit(self.name.clone()));
        }
        Ok(ExportPlan {
            dataset: self.dataset(),
            selectors: self.selectors()?,
            schema: self.schema()?,
            limit,
        })
    }
}

/// Names of the built-in sites
pub fn preset_names() -> impl Iterator<Item = &'static str> {
    PRESETS.iter().map(|(name, _)| *name)
}

pub fn preset(name: &str) -> Result<SiteConfig, SiteError> {
    let (_, json) = PRESETS
        .iter()
        .find(|(preset, _)| *preset == name)
        .ok_or_else(|| SiteError::Unknown(name.to_string()))?;
    SiteConfig::from_json(json)
}

/// A preset name, or else a path to a JSON definition
pub fn resolve(site: &str) -> Result<SiteConfig, SiteError> {
    if preset_names().any(|name| name == site) {
        return preset(site);
    }
    let path = Path::new(site);
    if path.is_file() {
        return SiteConfig::load(path);
    }
    Err(SiteError::Unknown(site.to_string()))
}
