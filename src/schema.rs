//! Record schemas and validation
//!
//! A [`Schema`] lists the fields an extracted record must carry, in output
//! order. [`Schema::validate`] turns a [`RawRecord`] into a
//! [`ValidatedRecord`] or reports the first field that does not fit.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::extractors::RawRecord;

/// Primitive kind a field's text must satisfy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Any string, including the empty string
    #[default]
    Text,
    /// Must contain something other than whitespace
    NonEmptyText,
    /// Must parse as an absolute URL
    Url,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(default)]
    pub kind: FieldKind,
    /// Used when the field is absent or empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            fallback: None,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn non_empty(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::NonEmptyText)
    }

    pub fn url(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Url)
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    fn check(&self, value: &str) -> Result<(), ViolationReason> {
        match self.kind {
            FieldKind::Text => Ok(()),
            FieldKind::NonEmptyText if value.trim().is_empty() => Err(ViolationReason::Empty),
            FieldKind::NonEmptyText => Ok(()),
            FieldKind::Url => match Url::parse(value) {
                Ok(_) => Ok(()),
                Err(_) => Err(ViolationReason::NotAUrl {
                    value: value.to_string(),
                }),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("schema has no fields")]
    Empty,
    #[error("field name must not be blank")]
    BlankName,
    #[error("field `{0}` is declared more than once")]
    DuplicateField(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViolationReason {
    #[error("is missing")]
    Missing,
    #[error("is empty")]
    Empty,
    #[error("is not an absolute URL: {value:?}")]
    NotAUrl { value: String },
}

/// A record did not match its schema
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field `{field}` {reason}")]
pub struct SchemaViolation {
    pub field: String,
    pub reason: ViolationReason,
}

/// Ordered field definitions with unique names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FieldDef>", into = "Vec<FieldDef>")]
pub struct Schema {
    fields: Vec<FieldDef>,
}

impl Schema {
    pub fn new(fields: Vec<FieldDef>) -> Result<Self, SchemaError> {
        if fields.is_empty() {
            return Err(SchemaError::Empty);
        }
        for (i, field) in fields.iter().enumerate() {
            if field.name.trim().is_empty() {
                return Err(SchemaError::BlankName);
            }
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validate and coerce one record.
    ///
    /// Absent or empty fields take their fallback when one is declared. Keys
    /// the schema does not name are dropped.
    pub fn validate(&self, raw: &RawRecord) -> Result<ValidatedRecord, SchemaViolation> {
        let mut values = IndexMap::with_capacity(self.fields.len());

        for field in &self.fields {
            let value = match (raw.get(&field.name), &field.fallback) {
                (Some(v), Some(fallback)) if v.trim().is_empty() => fallback.clone(),
                (None, Some(fallback)) => fallback.clone(),
                (Some(v), _) => v.to_string(),
                (None, None) => {
                    return Err(SchemaViolation {
                        field: field.name.clone(),
                        reason: ViolationReason::Missing,
                    })
                }
            };

            field.check(&value).map_err(|reason| SchemaViolation {
                field: field.name.clone(),
                reason,
            })?;

            values.insert(field.name.clone(), value);
        }

        Ok(ValidatedRecord { values })
    }
}

impl TryFrom<Vec<FieldDef>> for Schema {
    type Error = SchemaError;

    fn try_from(fields: Vec<FieldDef>) -> Result<Self, Self::Error> {
        Schema::new(fields)
    }
}

impl From<Schema> for Vec<FieldDef> {
    fn from(schema: Schema) -> Self {
        schema.fields
    }
}

/// A record that passed validation. Values are held in schema order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidatedRecord {
    values: IndexMap<String, String>,
}

impl ValidatedRecord {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.values.values().map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
