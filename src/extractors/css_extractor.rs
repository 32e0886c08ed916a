//! CSS selector-based extraction
//!
//! Uses the scraper crate to select elements by CSS selectors, scoped to a
//! single container element, and read one value out of the first match.

use std::fmt;
use std::str::FromStr;

use scraper::{ElementRef, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use super::ExtractError;

/// How a value is read from a matched element.
///
/// Written as a string in site definitions:
/// `text`, `html`, `attr:NAME`, `url:NAME`, `parent.<accessor>`,
/// `children.N.<accessor>`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Accessor {
    /// Text content with whitespace collapsed
    #[default]
    Text,
    /// Outer HTML
    Html,
    /// Raw attribute value
    Attr(String),
    /// Attribute value resolved against the document URL
    Url(String),
    /// Apply the inner accessor to the parent element
    Parent(Box<Accessor>),
    /// Apply the inner accessor to the Nth child element
    Child(usize, Box<Accessor>),
}

impl FromStr for Accessor {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ExtractError::Accessor(s.to_string());

        if let Some(rest) = s.strip_prefix("parent.") {
            return Ok(Accessor::Parent(Box::new(rest.parse()?)));
        }

        if let Some(rest) = s.strip_prefix("children.") {
            let dot_pos = rest.find('.').ok_or_else(invalid)?;
            let index: usize = rest[..dot_pos].parse().map_err(|_| invalid())?;
            let inner = rest[dot_pos + 1..].parse()?;
            return Ok(Accessor::Child(index, Box::new(inner)));
        }

        match s {
            "" | "text" => Ok(Accessor::Text),
            "html" => Ok(Accessor::Html),
            attr if attr.starts_with("attr:") => {
                let name = attr.strip_prefix("attr:").unwrap_or_default().trim();
                if name.is_empty() {
                    return Err(invalid());
                }
                Ok(Accessor::Attr(name.to_string()))
            }
            attr if attr.starts_with("url:") => {
                let name = attr.strip_prefix("url:").unwrap_or_default().trim();
                if name.is_empty() {
                    return Err(invalid());
                }
                Ok(Accessor::Url(name.to_string()))
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accessor::Text => f.write_str("text"),
            Accessor::Html => f.write_str("html"),
            Accessor::Attr(name) => write!(f, "attr:{name}"),
            Accessor::Url(name) => write!(f, "url:{name}"),
            Accessor::Parent(inner) => write!(f, "parent.{inner}"),
            Accessor::Child(index, inner) => write!(f, "children.{index}.{inner}"),
        }
    }
}

impl TryFrom<String> for Accessor {
    type Error = ExtractError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Accessor> for String {
    fn from(accessor: Accessor) -> Self {
        accessor.to_string()
    }
}

/// Parse a CSS selector, keeping the offending text in the error
pub fn parse_selector(selector_str: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector_str).map_err(|e| ExtractError::Selector {
        selector: selector_str.to_string(),
        reason: e.to_string(),
    })
}

/// Text content of an element, trimmed, with inner whitespace runs collapsed
pub fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Read a value from an element
///
/// Returns `None` when the accessor points at something that is not there
/// (missing attribute, missing parent or child).
pub fn read_value(element: ElementRef<'_>, accessor: &Accessor, base: Option<&Url>) -> Option<String> {
    match accessor {
        Accessor::Text => Some(element_text(element)),
        Accessor::Html => Some(element.html()),
        Accessor::Attr(name) => element.value().attr(name).map(|v| v.trim().to_string()),
        Accessor::Url(name) => {
            let raw = element.value().attr(name)?.trim();
            if raw.is_empty() {
                return None;
            }
            match base {
                Some(base) => base.join(raw).ok().map(String::from),
                None => Some(raw.to_string()),
            }
        }
        Accessor::Parent(inner) => {
            let parent = ElementRef::wrap(element.parent()?)?;
            read_value(parent, inner, base)
        }
        Accessor::Child(index, inner) => {
            // Only element nodes count, text nodes are skipped
            let child = element
                .children()
                .filter_map(ElementRef::wrap)
                .nth(*index)?;
            read_value(child, inner, base)
        }
    }
}

/// Select the first element under `scope` and read a value from it.
/// Without a selector the scope element itself is read.
pub fn select_first_value(
    scope: ElementRef<'_>,
    selector: Option<&Selector>,
    accessor: &Accessor,
    base: Option<&Url>,
) -> Option<String> {
    match selector {
        Some(selector) => {
            let element = scope.select(selector).next()?;
            read_value(element, accessor, base)
        }
        None => read_value(scope, accessor, base),
    }
}
