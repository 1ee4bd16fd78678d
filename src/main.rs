//! # Feature Tracker CLI (`ftrack`)
//!
//! The `ftrack` binary is the interface to Feature Tracker. It is meant to be
//! invoked on a schedule (cron, systemd timer, CI) and also supports one-off
//! inspection of sources and recorded history.
//!
//! ## Usage
//!
//! ```bash
//! ftrack --config ./config/ftrack.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ftrack init` | Write an example config file |
//! | `ftrack sources` | List static URLs, dynamic sources and backends |
//! | `ftrack check` | Run discovery and change detection once |
//! | `ftrack discover <name>` | Run discovery for one dynamic source and print the URLs |
//! | `ftrack history [url]` | Show recorded versions |
//! | `ftrack stats` | Summarise the version store |
//!
//! ## Examples
//!
//! ```bash
//! # Hourly cron entry
//! ftrack check --progress off --config /etc/ftrack.toml
//!
//! # Watch a source that sits behind a bot check, solving it by hand
//! ftrack check --debug --wait-secs 30
//!
//! # Versions of one file
//! ftrack history https://example.com/file1.txt
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use feature_tracker::capabilities::Capabilities;
use feature_tracker::challenge::{OperatorSignal, StdinSignal};
use feature_tracker::check::{self, CheckOptions};
use feature_tracker::config;
use feature_tracker::discovery::{Discoverer, DiscoverySettings};
use feature_tracker::error::CheckError;
use feature_tracker::history;
use feature_tracker::progress::ProgressMode;
use feature_tracker::shutdown;
use feature_tracker::sources;

/// Feature Tracker: watch remote files and keep a version history of them.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Run `ftrack init` to write an example.
#[derive(Parser)]
#[command(
    name = "ftrack",
    about = "Feature Tracker: watch remote files and keep a version history of them",
    version,
    long_about = "Feature Tracker checks static URLs and URLs discovered by rendering dynamic \
    sources in a browser, records a new version whenever a file's content changes, keeps a \
    local snapshot of each version and optionally uploads it to Supabase Storage or S3."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ftrack.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an example configuration file.
    ///
    /// Does nothing if the file already exists.
    Init,

    /// List configured sources and backend availability.
    Sources,

    /// Run discovery and change detection once.
    ///
    /// Fetches every static URL and every URL discovered from dynamic
    /// sources, records new versions, and saves the version state only if
    /// something changed.
    Check {
        /// Show browser windows, prompt for manual challenge solving, and keep
        /// sessions open until Enter is pressed at the end of the run.
        #[arg(long)]
        debug: bool,

        /// Seconds to let a rendered page settle before extracting URLs.
        /// Defaults to `discovery.wait_secs`.
        #[arg(long)]
        wait_secs: Option<u64>,

        /// Progress output on stderr: `human`, `json`, or `off`.
        /// Defaults to `human` when stderr is a terminal.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Run discovery for one dynamic source and print the URLs found.
    Discover {
        /// Name of the `[sources.dynamic.<name>]` entry.
        name: String,

        #[arg(long)]
        debug: bool,

        #[arg(long)]
        wait_secs: Option<u64>,
    },

    /// Show recorded versions.
    History {
        /// Only show versions of this URL.
        url: Option<String>,
    },

    /// Summarise the version store.
    Stats,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("feature_tracker=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // Commands that don't require config
    if let Commands::Init = cli.command {
        if config::write_example_config(&cli.config)? {
            println!("Wrote example config to {}", cli.config.display());
        } else {
            println!("Config already exists at {}", cli.config.display());
        }
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            // Handled above (before config loading)
            unreachable!()
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Check {
            debug,
            wait_secs,
            progress,
        } => {
            let mode = ProgressMode::from_flag(progress.as_deref()).map_err(anyhow::Error::msg)?;
            let options = CheckOptions {
                wait: Duration::from_secs(wait_secs.unwrap_or(cfg.discovery.wait_secs)),
                debug,
            };

            let (trigger, shutdown) = shutdown::channel();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    trigger.trigger();
                }
            });

            match check::run_check(&cfg, options, mode, shutdown).await {
                Ok(report) => check::print_report(&report),
                Err(CheckError::Interrupted) => {
                    tracing::warn!("Process interrupted by user");
                    std::process::exit(130);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Discover {
            name,
            debug,
            wait_secs,
        } => {
            let Some(descriptor) = sources::find_descriptor(&cfg, &name) else {
                anyhow::bail!("Unknown dynamic source '{}'", name);
            };
            let caps = Capabilities::resolve(&cfg);
            let discoverer = Discoverer::new(
                caps.launcher,
                Arc::new(StdinSignal),
                DiscoverySettings::from_config(&cfg.discovery),
                shutdown::Shutdown::never(),
            );
            let wait = Duration::from_secs(wait_secs.unwrap_or(cfg.discovery.wait_secs));
            let urls = discoverer.try_discover(&descriptor, wait, debug).await;
            if discoverer.retained_count().await > 0 {
                let _ = StdinSignal
                    .wait_for_confirmation("Browser left open for inspection. Press Enter to close it.")
                    .await;
            }
            discoverer.close_retained().await;
            for url in urls? {
                println!("{}", url);
            }
        }
        Commands::History { url } => {
            history::run_history(&cfg, url.as_deref())?;
        }
        Commands::Stats => {
            history::run_stats(&cfg)?;
        }
    }

    Ok(())
}
