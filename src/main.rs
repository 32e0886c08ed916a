use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

use scrape_export::notify::WEBHOOK_ENV;
use scrape_export::site;
use scrape_export::sources::DEFAULT_SCREENSHOT_PATH;
use scrape_export::{run_site, Delivery, InvalidRecordPolicy, JobSettings};

#[derive(Parser)]
#[command(name = "scrape-export", version, about = "Scrape a page into a timestamped CSV and notify Slack")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape a site, write the CSV, send the notification
    Run(RunArgs),
    /// List the built-in sites
    Sites,
    /// Print a site definition as JSON
    Show {
        /// Preset name or path to a JSON definition
        site: String,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Preset name or path to a JSON definition
    site: String,
    /// Directory the CSV is written to
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,
    /// Keep at most this many records (overrides the site)
    #[arg(short = 'n', long, value_parser = clap::value_parser!(u64).range(1..))]
    limit: Option<u64>,
    /// Slack incoming webhook URL
    #[arg(long, env = WEBHOOK_ENV, hide_env_values = true)]
    webhook: Option<String>,
    /// Skip the Slack notification
    #[arg(long)]
    no_notify: bool,
    /// Leave invalid records out instead of failing the run
    #[arg(long)]
    skip_invalid: bool,
    /// Where to save a screenshot when rendering fails
    #[arg(long, default_value = DEFAULT_SCREENSHOT_PATH)]
    screenshot: PathBuf,
    /// Don't capture a screenshot on failure
    #[arg(long, conflicts_with = "screenshot")]
    no_screenshot: bool,
    /// How long to wait for the page content, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl RunArgs {
    fn settings(&self) -> JobSettings {
        JobSettings {
            out_dir: self.out_dir.clone(),
            limit: self.limit.map(|n| usize::try_from(n).unwrap_or(usize::MAX)),
            webhook: self.webhook.clone(),
            notify: !self.no_notify,
            policy: if self.skip_invalid {
                InvalidRecordPolicy::Skip
            } else {
                InvalidRecordPolicy::Abort
            },
            screenshot: (!self.no_screenshot).then(|| self.screenshot.clone()),
            timeout: self.timeout_ms.map(Duration::from_millis),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match execute(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Sites => {
            for name in site::preset_names() {
                let config = site::preset(name)?;
                println!("{:<16} {:<7} {}", name, config.source.as_str(), config.url);
            }
            Ok(())
        }
        Commands::Show { site } => {
            let config = site::resolve(&site)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Run(args) => {
            let config = site::resolve(&args.site)?;
            let report = match run_site(&config, &args.settings()).await {
                Ok(report) => report,
                Err(e) => {
                    if let Some(path) = e.screenshot() {
                        warn!("Screenshot saved to {}", path.display());
                    }
                    let stage = e.stage();
                    return Err(e).with_context(|| format!("{} failed ({} stage)", config.name, stage));
                }
            };

            for skipped in &report.skipped {
                warn!("skipped record {}: {}", skipped.index, skipped.violation);
            }
            match &report.delivery {
                Delivery::Delivered => info!("Slack notification sent successfully"),
                Delivery::Failed(e) => warn!("Slack notification failed: {}", e),
                Delivery::NotConfigured => {}
            }
            println!("{}", report.path.display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(extra: &[&str]) -> Result<RunArgs, clap::Error> {
        let argv = ["scrape-export", "run", "steam-top10"].iter().chain(extra).copied();
        match Cli::try_parse_from(argv)?.command {
            Commands::Run(args) => Ok(args),
            _ => panic!("expected the run command"),
        }
    }

    #[test]
    fn test_limit_must_be_positive() {
        assert!(run_args(&["-n", "0"]).is_err());
        assert!(run_args(&["--limit", "-3"]).is_err());

        let settings = run_args(&["-n", "5"]).unwrap().settings();
        assert_eq!(settings.limit, Some(5));
        assert_eq!(run_args(&[]).unwrap().settings().limit, None);
    }

    #[test]
    fn test_run_flags() {
        let settings = run_args(&["--no-notify", "--skip-invalid", "--no-screenshot", "--timeout-ms", "2500"])
            .unwrap()
            .settings();
        assert!(!settings.notify);
        assert_eq!(settings.policy, InvalidRecordPolicy::Skip);
        assert!(settings.screenshot.is_none());
        assert_eq!(settings.timeout, Some(Duration::from_millis(2_500)));
    }
}
