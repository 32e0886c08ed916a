//! Static fetch-and-parse document source (HTTP GET, no JavaScript)

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use crate::document::{AcquireError, Document, DocumentSource};

pub const DEFAULT_USER_AGENT: &str = concat!("scrape_export/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches a page once with `reqwest` and parses the body
pub struct StaticSource {
    client: reqwest::Client,
    url: Url,
}

impl StaticSource {
    pub fn new(url: Url) -> Result<Self, AcquireError> {
        Self::with_timeout(url, DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_timeout(url: Url, timeout: Duration) -> Result<Self, AcquireError> {
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| AcquireError::Network {
                url: url.to_string(),
                cause: e.to_string(),
            })?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl DocumentSource for StaticSource {
    async fn acquire(&mut self) -> Result<Document, AcquireError> {
        info!("Fetching data from: {}", self.url);

        let network = |e: reqwest::Error| AcquireError::Network {
            url: self.url.to_string(),
            cause: e.to_string(),
        };

        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AcquireError::Status {
                url: self.url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(network)?;
        debug!(bytes = body.len(), "fetched page body");

        Ok(Document::parse(&body, Some(self.url.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Selector;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one HTTP response on a random local port
    async fn serve_once(status_line: &'static str, body: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        Url::parse(&format!("http://{addr}/availability/")).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_and_parse() {
        let url = serve_once(
            "200 OK",
            "<table><tbody><tr><td>A</td></tr><tr><td>B</td></tr></tbody></table>",
        )
        .await;

        let mut source = StaticSource::new(url.clone()).unwrap();
        let document = source.acquire().await.unwrap();

        let rows = Selector::parse("table tbody tr").unwrap();
        assert_eq!(document.count(&rows), 2);
        assert_eq!(document.url(), Some(&url));
    }

    #[tokio::test]
    async fn test_error_status() {
        let url = serve_once("503 Service Unavailable", "down").await;

        let mut source = StaticSource::new(url).unwrap();
        let err = source.acquire().await.unwrap_err();
        assert!(matches!(err, AcquireError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("http://{addr}/")).unwrap();
        let mut source = StaticSource::new(url).unwrap();
        let err = source.acquire().await.unwrap_err();
        assert!(matches!(err, AcquireError::Network { .. }));
    }
}
