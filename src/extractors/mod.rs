//! Record extraction
//!
//! Turns a loaded [`Document`] into raw records: one per element matched by a
//! container selector, each field read by a selector scoped to that container.

mod css_extractor;

pub use css_extractor::*;

use indexmap::IndexMap;
use scraper::Selector;
use serde::Serialize;
use thiserror::Error;

use crate::document::Document;

/// Errors raised while compiling selectors or accessors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("invalid CSS selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },
    #[error("invalid accessor `{0}` (expected text, html, attr:NAME, url:NAME, parent.X or children.N.X)")]
    Accessor(String),
}

/// Field name -> raw extracted text, in extraction order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RawRecord(IndexMap<String, String>);

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// One field to read from each container
#[derive(Debug, Clone)]
pub struct FieldSelector {
    pub name: String,
    /// Scoped to the container; `None` reads the container itself
    pub selector: Option<Selector>,
    pub accessor: Accessor,
}

impl FieldSelector {
    pub fn new(name: &str, selector: Option<&str>, accessor: Accessor) -> Result<Self, ExtractError> {
        let selector = match selector.map(str::trim) {
            Some(s) if !s.is_empty() => Some(parse_selector(s)?),
            _ => None,
        };
        Ok(Self {
            name: name.to_string(),
            selector,
            accessor,
        })
    }
}

/// Compiled container selector plus its field selectors
#[derive(Debug, Clone)]
pub struct RecordSelectors {
    container_src: String,
    container: Selector,
    fields: Vec<FieldSelector>,
}

impl RecordSelectors {
    pub fn new(container: &str, fields: Vec<FieldSelector>) -> Result<Self, ExtractError> {
        Ok(Self {
            container_src: container.to_string(),
            container: parse_selector(container)?,
            fields,
        })
    }

    /// The container selector as written
    pub fn container_str(&self) -> &str {
        &self.container_src
    }

    pub fn container(&self) -> &Selector {
        &self.container
    }

    pub fn fields(&self) -> &[FieldSelector] {
        &self.fields
    }
}

/// Lazily extract one [`RawRecord`] per matched container, in document order.
///
/// Fields whose selector matches nothing come back as empty strings; deciding
/// whether that is acceptable is left to schema validation. `limit` caps the
/// number of records (top-N).
pub fn extract<'a>(
    document: &'a Document,
    selectors: &'a RecordSelectors,
    limit: Option<usize>,
) -> impl Iterator<Item = RawRecord> + 'a {
    let base = document.url();

    document
        .html()
        .select(&selectors.container)
        .take(limit.unwrap_or(usize::MAX))
        .map(move |container| {
            selectors
                .fields
                .iter()
                .map(|field| {
                    let value = select_first_value(
                        container,
                        field.selector.as_ref(),
                        &field.accessor,
                        base,
                    )
                    .unwrap_or_default();
                    (field.name.clone(), value)
                })
                .collect::<RawRecord>()
        })
}
