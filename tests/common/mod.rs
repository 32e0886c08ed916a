#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use scrape_export::{AcquireError, DeliveryError, Document, DocumentSource, Notifier, ValidatedRecord};
use url::Url;

pub const STEAM_CHART: &str = r#"
<html>
<body>
  <table>
    <thead>
      <tr><th></th><th>Rank</th><th>Game</th><th>Price</th><th>Change</th><th>Weeks</th></tr>
    </thead>
    <tbody>
      <tr>
        <td></td>
        <td>1</td>
        <td><img src="https://cdn.example.com/apps/1/capsule.jpg"> Game A</td>
        <td>$9.99</td>
        <td></td>
        <td>3</td>
      </tr>
    </tbody>
  </table>
</body>
</html>
"#;

/// Hands out the same HTML on every acquisition and counts them
pub struct FixedSource {
    html: String,
    url: Option<Url>,
    pub acquisitions: Arc<AtomicUsize>,
}

impl FixedSource {
    pub fn new(html: &str, url: Option<Url>) -> Self {
        Self {
            html: html.to_string(),
            url,
            acquisitions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentSource for FixedSource {
    async fn acquire(&mut self) -> Result<Document, AcquireError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(Document::parse(&self.html, self.url.clone()))
    }
}

/// Keeps every batch it is handed; fails delivery when `fail_with` is set
#[derive(Default)]
pub struct RecordingNotifier {
    pub batches: Mutex<Vec<Vec<ValidatedRecord>>>,
    pub fail_with: Option<DeliveryError>,
}

impl RecordingNotifier {
    pub fn failing(status: u16, message: &str) -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            fail_with: Some(DeliveryError {
                status: Some(status),
                message: message.to_string(),
            }),
        }
    }

    pub fn batches(&self) -> Vec<Vec<ValidatedRecord>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, records: &[ValidatedRecord]) -> Result<(), DeliveryError> {
        self.batches.lock().unwrap().push(records.to_vec());
        match &self.fail_with {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Fresh, not-yet-created output directory unique to this test
pub fn out_dir(test: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("scrape-export-it-{}-{}", test, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

pub fn csv_files(dir: &std::path::Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
            .collect(),
        Err(_) => Vec::new(),
    }
}
