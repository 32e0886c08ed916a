//! Loaded documents and the sources that produce them

use std::path::Path;

use async_trait::async_trait;
use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

/// A parsed page, static or rendered, plus the URL it came from
#[derive(Debug)]
pub struct Document {
    html: Html,
    url: Option<Url>,
}

impl Document {
    /// Parse HTML; `url` is used to resolve relative links
    pub fn parse(html: &str, url: Option<Url>) -> Self {
        Self {
            html: Html::parse_document(html),
            url,
        }
    }

    pub fn html(&self) -> &Html {
        &self.html
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Number of elements matching `selector`
    pub fn count(&self, selector: &Selector) -> usize {
        self.html.select(selector).count()
    }
}

/// Why a document could not be obtained
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquireError {
    #[error("request to {url} failed: {cause}")]
    Network { url: String, cause: String },
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("timed out after {ms} ms waiting for `{selector}`")]
    Timeout { selector: String, ms: u64 },
    #[error("renderer failed: {0}")]
    Render(String),
}

/// Anything that can hand the pipeline a queryable document
#[async_trait]
pub trait DocumentSource: Send {
    async fn acquire(&mut self) -> Result<Document, AcquireError>;

    /// Diagnostic artifact captured by the last failed `acquire`, if any
    fn diagnostic(&self) -> Option<&Path> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_and_url() {
        let url = Url::parse("https://example.com/list").unwrap();
        let document = Document::parse("<ul><li>a</li><li>b</li></ul>", Some(url.clone()));

        let li = Selector::parse("li").unwrap();
        assert_eq!(document.count(&li), 2);
        assert_eq!(document.url(), Some(&url));
    }

    #[test]
    fn test_timeout_message() {
        let err = AcquireError::Timeout {
            selector: "table tbody tr".to_string(),
            ms: 10_000,
        };
        assert_eq!(
            err.to_string(),
            "timed out after 10000 ms waiting for `table tbody tr`"
        );
    }
}
