//! Dynamic document source backed by a headless renderer
//!
//! The renderer is a scoped resource: [`RenderGuard`] owns it for the length
//! of one acquisition and releases it on every exit path. The normal paths
//! call [`RenderGuard::release`]; if the guard is dropped without that (panic,
//! cancelled future) `Drop` falls back to [`Renderer::abandon`].

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;

use crate::document::{AcquireError, Document, DocumentSource};

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SCREENSHOT_PATH: &str = "error_screenshot.png";

/// Where to go and what to wait for
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub url: Url,
    /// Selector that must be visible before the DOM is read
    pub wait_for: Option<String>,
    pub wait_timeout: Duration,
    pub navigation_timeout: Duration,
    /// Capture a screenshot here when acquisition fails after launch
    pub screenshot_on_error: Option<PathBuf>,
}

impl RenderOptions {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            wait_for: None,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
            screenshot_on_error: None,
        }
    }
}

/// A browser-like engine that can load a page and hand back its DOM
#[async_trait]
pub trait Renderer: Send + Sized {
    /// Engine-specific launch settings
    type Config: Send + Sync;

    async fn launch(config: &Self::Config) -> Result<Self, AcquireError>;

    async fn navigate(&mut self, url: &Url) -> Result<(), AcquireError>;

    /// Resolve once `selector` matches a visible element. Polls until it
    /// does; the caller bounds the wait.
    async fn wait_for_visible(&mut self, selector: &str) -> Result<(), AcquireError>;

    /// Serialized DOM of the current page
    async fn content(&mut self) -> Result<String, AcquireError>;

    async fn screenshot(&mut self, path: &Path) -> Result<(), AcquireError>;

    /// Graceful shutdown
    async fn close(&mut self) -> Result<(), AcquireError>;

    /// Best-effort shutdown when `close` can no longer be awaited
    fn abandon(&mut self);
}

/// Owns a launched renderer until it is released
pub struct RenderGuard<R: Renderer> {
    renderer: R,
    released: bool,
}

impl<R: Renderer> RenderGuard<R> {
    pub fn new(renderer: R) -> Self {
        Self {
            renderer,
            released: false,
        }
    }

    pub async fn release(mut self) -> Result<(), AcquireError> {
        self.released = true;
        self.renderer.close().await
    }
}

impl<R: Renderer> Deref for RenderGuard<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.renderer
    }
}

impl<R: Renderer> DerefMut for RenderGuard<R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.renderer
    }
}

impl<R: Renderer> Drop for RenderGuard<R> {
    fn drop(&mut self) {
        if !self.released {
            warn!("renderer dropped without release, abandoning it");
            self.renderer.abandon();
        }
    }
}

/// Launches a renderer per acquisition and reads the rendered DOM
pub struct RenderSource<R: Renderer> {
    config: R::Config,
    options: RenderOptions,
    last_screenshot: Option<PathBuf>,
}

impl<R: Renderer> RenderSource<R> {
    pub fn new(config: R::Config, options: RenderOptions) -> Self {
        Self {
            config,
            options,
            last_screenshot: None,
        }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }
}

#[async_trait]
impl<R: Renderer> DocumentSource for RenderSource<R> {
    async fn acquire(&mut self) -> Result<Document, AcquireError> {
        self.last_screenshot = None;

        info!("Fetching data from: {}", self.options.url);
        let mut guard = RenderGuard::new(R::launch(&self.config).await?);

        let rendered = render_page(&mut *guard, &self.options).await;

        if let Err(e) = &rendered {
            if let Some(path) = &self.options.screenshot_on_error {
                match guard.screenshot(path).await {
                    Ok(()) => {
                        warn!(path = %path.display(), "render failed ({e}), screenshot captured");
                        self.last_screenshot = Some(path.clone());
                    }
                    Err(shot_err) => warn!("could not capture error screenshot: {shot_err}"),
                }
            }
        }

        if let Err(e) = guard.release().await {
            warn!("renderer did not close cleanly: {e}");
        }

        let html = rendered?;
        debug!(bytes = html.len(), "rendered page");
        Ok(Document::parse(&html, Some(self.options.url.clone())))
    }

    fn diagnostic(&self) -> Option<&Path> {
        self.last_screenshot.as_deref()
    }
}

async fn render_page<R: Renderer>(renderer: &mut R, options: &RenderOptions) -> Result<String, AcquireError> {
    let nav_ms = options.navigation_timeout.as_millis() as u64;
    tokio::time::timeout(options.navigation_timeout, renderer.navigate(&options.url))
        .await
        .map_err(|_| AcquireError::Network {
            url: options.url.to_string(),
            cause: format!("navigation did not finish within {nav_ms} ms"),
        })??;

    if let Some(selector) = &options.wait_for {
        let ms = options.wait_timeout.as_millis() as u64;
        debug!(selector = %selector, ms, "waiting for selector");
        tokio::time::timeout(options.wait_timeout, renderer.wait_for_visible(selector))
            .await
            .map_err(|_| AcquireError::Timeout {
                selector: selector.clone(),
                ms,
            })??;
    }

    renderer.content().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Shared view into what a [`FakeRenderer`] was asked to do
    #[derive(Default)]
    pub struct Probe {
        pub launched: AtomicUsize,
        pub closed: AtomicUsize,
        pub abandoned: AtomicUsize,
        pub screenshots: AtomicUsize,
        pub never_visible: AtomicBool,
    }

    pub struct FakeConfig {
        pub probe: Arc<Probe>,
        pub html: String,
    }

    pub struct FakeRenderer {
        probe: Arc<Probe>,
        html: String,
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        type Config = FakeConfig;

        async fn launch(config: &FakeConfig) -> Result<Self, AcquireError> {
            config.probe.launched.fetch_add(1, Ordering::SeqCst);
            Ok(Self {
                probe: Arc::clone(&config.probe),
                html: config.html.clone(),
            })
        }

        async fn navigate(&mut self, _url: &Url) -> Result<(), AcquireError> {
            Ok(())
        }

        async fn wait_for_visible(&mut self, _selector: &str) -> Result<(), AcquireError> {
            if self.probe.never_visible.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn content(&mut self) -> Result<String, AcquireError> {
            Ok(self.html.clone())
        }

        async fn screenshot(&mut self, _path: &Path) -> Result<(), AcquireError> {
            self.probe.screenshots.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), AcquireError> {
            self.probe.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn abandon(&mut self) {
            self.probe.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn source(probe: &Arc<Probe>, wait_ms: u64, screenshot: Option<&str>) -> RenderSource<FakeRenderer> {
        let mut options = RenderOptions::new(Url::parse("https://store.example.com/charts").unwrap());
        options.wait_for = Some("table tbody tr".to_string());
        options.wait_timeout = Duration::from_millis(wait_ms);
        options.screenshot_on_error = screenshot.map(PathBuf::from);

        RenderSource::new(
            FakeConfig {
                probe: Arc::clone(probe),
                html: "<table><tbody><tr><td>1</td></tr></tbody></table>".to_string(),
            },
            options,
        )
    }

    #[tokio::test]
    async fn test_success_releases_renderer() {
        let probe = Arc::new(Probe::default());
        let mut source = source(&probe, 1_000, None);

        let document = source.acquire().await.unwrap();
        let rows = scraper::Selector::parse("tr").unwrap();
        assert_eq!(document.count(&rows), 1);

        assert_eq!(probe.launched.load(Ordering::SeqCst), 1);
        assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
        assert_eq!(probe.abandoned.load(Ordering::SeqCst), 0);
        assert!(source.diagnostic().is_none());
    }

    #[tokio::test]
    async fn test_timeout_releases_renderer_and_captures_screenshot() {
        let probe = Arc::new(Probe::default());
        probe.never_visible.store(true, Ordering::SeqCst);
        let mut source = source(&probe, 50, Some("error_screenshot.png"));

        let err = source.acquire().await.unwrap_err();
        assert_eq!(
            err,
            AcquireError::Timeout {
                selector: "table tbody tr".to_string(),
                ms: 50
            }
        );

        assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
        assert_eq!(probe.screenshots.load(Ordering::SeqCst), 1);
        assert_eq!(source.diagnostic(), Some(Path::new("error_screenshot.png")));
    }

    #[tokio::test]
    async fn test_timeout_without_screenshot() {
        let probe = Arc::new(Probe::default());
        probe.never_visible.store(true, Ordering::SeqCst);
        let mut source = source(&probe, 20, None);

        assert!(source.acquire().await.is_err());
        assert_eq!(probe.screenshots.load(Ordering::SeqCst), 0);
        assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
        assert!(source.diagnostic().is_none());
    }

    #[tokio::test]
    async fn test_dropped_guard_abandons_renderer() {
        let probe = Arc::new(Probe::default());
        let config = FakeConfig {
            probe: Arc::clone(&probe),
            html: String::new(),
        };

        {
            let _guard = RenderGuard::new(FakeRenderer::launch(&config).await.unwrap());
        }
        assert_eq!(probe.abandoned.load(Ordering::SeqCst), 1);
        assert_eq!(probe.closed.load(Ordering::SeqCst), 0);

        let guard = RenderGuard::new(FakeRenderer::launch(&config).await.unwrap());
        guard.release().await.unwrap();
        assert_eq!(probe.abandoned.load(Ordering::SeqCst), 1);
        assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
    }
}
