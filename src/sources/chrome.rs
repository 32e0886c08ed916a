//! Headless Chromium renderer over the DevTools protocol

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tracing::{debug, warn};
use url::Url;

use super::render::Renderer;
use crate::document::AcquireError;

const VISIBILITY_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct ChromeConfig {
    /// Run without a window (default true)
    pub headless: bool,
    /// Browser binary; auto-detected when unset
    pub executable: Option<PathBuf>,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
        }
    }
}

pub struct ChromeRenderer {
    browser: Option<Browser>,
    page: Option<Page>,
    handler_task: tokio::task::JoinHandle<()>,
}

fn render_err(context: &str, e: impl std::fmt::Display) -> AcquireError {
    AcquireError::Render(format!("{context}: {e}"))
}

impl ChromeRenderer {
    fn page(&self) -> Result<&Page, AcquireError> {
        self.page
            .as_ref()
            .ok_or_else(|| AcquireError::Render("no page has been opened".to_string()))
    }

    fn browser(&mut self) -> Result<&mut Browser, AcquireError> {
        self.browser
            .as_mut()
            .ok_or_else(|| AcquireError::Render("browser already closed".to_string()))
    }
}

#[async_trait]
impl Renderer for ChromeRenderer {
    type Config = ChromeConfig;

    async fn launch(config: &ChromeConfig) -> Result<Self, AcquireError> {
        let mut builder = BrowserConfig::builder();
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(exe) = &config.executable {
            builder = builder.chrome_executable(exe);
        }
        let browser_config = builder.build().map_err(|e| render_err("invalid browser config", e))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| render_err("failed to launch browser", e))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("chromiumoxide handler event error: {}", e);
                }
            }
        });

        debug!("browser launched");
        Ok(Self {
            browser: Some(browser),
            page: None,
            handler_task,
        })
    }

    async fn navigate(&mut self, url: &Url) -> Result<(), AcquireError> {
        let page = self
            .browser()?
            .new_page(url.as_str())
            .await
            .map_err(|e| AcquireError::Network {
                url: url.to_string(),
                cause: e.to_string(),
            })?;
        page.wait_for_navigation()
            .await
            .map_err(|e| AcquireError::Network {
                url: url.to_string(),
                cause: e.to_string(),
            })?;
        self.page = Some(page);
        Ok(())
    }

    async fn wait_for_visible(&mut self, selector: &str) -> Result<(), AcquireError> {
        let page = self.page()?;
        loop {
            if let Ok(element) = page.find_element(selector).await {
                // Present but zero-sized means not rendered yet
                if let Ok(bbox) = element.bounding_box().await {
                    if bbox.width > 0.0 && bbox.height > 0.0 {
                        return Ok(());
                    }
                }
            }
            tokio::time::sleep(VISIBILITY_POLL).await;
        }
    }

    async fn content(&mut self) -> Result<String, AcquireError> {
        self.page()?
            .content()
            .await
            .map_err(|e| render_err("could not read page content", e))
    }

    async fn screenshot(&mut self, path: &Path) -> Result<(), AcquireError> {
        let params = ScreenshotParams::builder().full_page(true).build();
        self.page()?
            .save_screenshot(params, path)
            .await
            .map_err(|e| render_err("screenshot failed", e))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), AcquireError> {
        let result = match self.browser.take() {
            Some(mut browser) => {
                let closed = browser.close().await.map(|_| ());
                let _ = browser.wait().await;
                closed.map_err(|e| render_err("browser close failed", e))
            }
            None => Ok(()),
        };
        self.page = None;
        self.handler_task.abort();
        result
    }

    fn abandon(&mut self) {
        self.page = None;
        self.handler_task.abort();
        if let Some(mut browser) = self.browser.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        let _ = browser.close().await;
                        let _ = browser.wait().await;
                    });
                }
                // No runtime left to drive a graceful close; dropping the
                // browser kills the child process.
                Err(_) => drop(browser),
            }
        }
    }
}
