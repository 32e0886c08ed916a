//! Runs a site end to end: pre-flight checks, source, pipeline

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::document::DocumentSource;
use crate::notify::{ConfigError, Notifier, SlackNotifier, WebhookUrl};
use crate::pipeline::{self, ExportReport, InvalidRecordPolicy, RunError, RunOptions};
use crate::site::{SiteConfig, SourceKind};
use crate::sources::{RenderOptions, StaticSource, DEFAULT_SCREENSHOT_PATH};

/// Per-invocation knobs layered over a [`SiteConfig`]
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub out_dir: PathBuf,
    /// Overrides the site's own limit
    pub limit: Option<usize>,
    pub webhook: Option<String>,
    /// Send the chat notification when the site defines one
    pub notify: bool,
    pub policy: InvalidRecordPolicy,
    pub screenshot: Option<PathBuf>,
    /// Overrides the site's wait timeout
    pub timeout: Option<Duration>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("."),
            limit: None,
            webhook: None,
            notify: true,
            policy: InvalidRecordPolicy::Abort,
            screenshot: Some(PathBuf::from(DEFAULT_SCREENSHOT_PATH)),
            timeout: None,
        }
    }
}

impl JobSettings {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            out_dir: self.out_dir.clone(),
            policy: self.policy,
            captured_at: None,
        }
    }
}

/// Build the notifier, if any, before anything touches the network.
///
/// A site with a notification layout needs a valid webhook unless
/// notifications are switched off.
pub fn preflight(site: &SiteConfig, settings: &JobSettings) -> Result<Option<SlackNotifier>, ConfigError> {
    let layout = match (&site.notification, settings.notify) {
        (Some(layout), true) => layout,
        _ => return Ok(None),
    };
    let webhook = WebhookUrl::parse(settings.webhook.as_deref())?;
    SlackNotifier::new(webhook, layout.clone()).map(Some)
}

/// Run `site` against an already constructed source
pub async fn run_with_source(
    site: &SiteConfig,
    settings: &JobSettings,
    source: &mut dyn DocumentSource,
) -> Result<ExportReport, RunError> {
    let notifier = preflight(site, settings)?;
    let plan = site.plan(settings.limit)?;

    pipeline::run(
        source,
        &plan,
        notifier.as_ref().map(|n| n as &dyn Notifier),
        &settings.run_options(),
    )
    .await
}

/// Run `site` with the source its definition asks for
pub async fn run_site(site: &SiteConfig, settings: &JobSettings) -> Result<ExportReport, RunError> {
    let mut source = build_source(site, settings)?;
    run_with_source(site, settings, source.as_mut()).await
}

fn build_source(site: &SiteConfig, settings: &JobSettings) -> Result<Box<dyn DocumentSource>, RunError> {
    match site.source {
        SourceKind::Static => {
            info!(site = %site.name, "using static source");
            let source = StaticSource::new(site.url.clone()).map_err(|source| RunError::Acquisition {
                source,
                screenshot: None,
            })?;
            Ok(Box::new(source))
        }
        SourceKind::Render => render_source(site, render_options(site, settings)),
    }
}

fn render_options(site: &SiteConfig, settings: &JobSettings) -> RenderOptions {
    let mut options = RenderOptions::new(site.url.clone());
    options.wait_for = site.wait_for.clone();
    if let Some(timeout) = settings.timeout.or_else(|| site.wait_timeout()) {
        options.wait_timeout = timeout;
    }
    options.screenshot_on_error = settings.screenshot.clone();
    options
}

#[cfg(feature = "browser")]
fn render_source(site: &SiteConfig, options: RenderOptions) -> Result<Box<dyn DocumentSource>, RunError> {
    use crate::sources::{ChromeConfig, ChromeRenderer, RenderSource};

    info!(site = %site.name, "using headless browser source");
    Ok(Box::new(RenderSource::<ChromeRenderer>::new(ChromeConfig::default(), options)))
}

#[cfg(not(feature = "browser"))]
fn render_source(site: &SiteConfig, _options: RenderOptions) -> Result<Box<dyn DocumentSource>, RunError> {
    Err(ConfigError::RendererUnavailable {
        site: site.name.clone(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::preset;

    #[test]
    fn test_preflight() {
        let steam = preset("steam-top10").unwrap();

        let settings = JobSettings::default();
        assert_eq!(preflight(&steam, &settings).err(), Some(ConfigError::MissingWebhook));

        let settings = JobSettings {
            webhook: Some("undefined".to_string()),
            ..JobSettings::default()
        };
        assert!(matches!(
            preflight(&steam, &settings).err(),
            Some(ConfigError::InvalidWebhook { .. })
        ));

        let settings = JobSettings {
            notify: false,
            ..JobSettings::default()
        };
        assert!(preflight(&steam, &settings).unwrap().is_none());

        let settings = JobSettings {
            webhook: Some("https://hooks.slack.com/services/T0/B0/abc".to_string()),
            ..JobSettings::default()
        };
        let notifier = preflight(&steam, &settings).unwrap().unwrap();
        assert_eq!(notifier.layout().headline, "Steam Top 10 data received");

        // no notification layout, no webhook needed
        let liberty = preset("liberty-harbor").unwrap();
        assert!(preflight(&liberty, &JobSettings::default()).unwrap().is_none());
    }

    #[test]
    fn test_render_options_overrides() {
        let steam = preset("steam-top10").unwrap();

        let options = render_options(&steam, &JobSettings::default());
        assert_eq!(options.wait_for.as_deref(), Some("table tbody tr"));
        assert_eq!(options.wait_timeout, Duration::from_millis(10_000));
        assert_eq!(options.screenshot_on_error, Some(PathBuf::from("error_screenshot.png")));

        let settings = JobSettings {
            timeout: Some(Duration::from_millis(2_500)),
            screenshot: None,
            ..JobSettings::default()
        };
        let options = render_options(&steam, &settings);
        assert_eq!(options.wait_timeout, Duration::from_millis(2_500));
        assert!(options.screenshot_on_error.is_none());
    }

    #[cfg(not(feature = "browser"))]
    #[tokio::test]
    async fn test_render_site_needs_browser_feature() {
        let steam = preset("steam-top10").unwrap();
        let settings = JobSettings {
            notify: false,
            ..JobSettings::default()
        };
        let err = run_site(&steam, &settings).await.unwrap_err();
        assert!(matches!(
            err,
            RunError::Configuration(ConfigError::RendererUnavailable { .. })
        ));
    }
}
