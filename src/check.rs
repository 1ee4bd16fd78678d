//! Change-detection run (`ftrack check`).
//!
//! One run goes through these stages:
//!
//! ```text
//! load state ─▶ discover dynamic sources ─▶ union with static URLs
//!            ─▶ fetch (bounded concurrency) ─▶ per identity:
//!               decide ─▶ snapshot ─▶ upload ─▶ append
//!            ─▶ persist (only if something changed)
//! ```
//!
//! Fetch, discovery and upload failures are logged and cost coverage only.
//! A failed persist is the one fatal outcome. Interruption stops the run
//! before anything is persisted.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::capabilities::Capabilities;
use crate::challenge::{OperatorSignal, StdinSignal};
use crate::config::Config;
use crate::discovery::{Discoverer, DiscoverySettings};
use crate::error::CheckError;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::models::{display_name_for, source_identity, ChangeReport, NewVersion, SourceDescriptor};
use crate::progress::{CheckProgressEvent, CheckProgressReporter, NoProgress, ProgressMode};
use crate::shutdown::Shutdown;
use crate::sources;
use crate::store::{VersionStore, VersionStoreState};
use crate::upload::ObjectStore;

/// Per-run knobs from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOptions {
    /// Idle time after page load before extracting URLs.
    pub wait: Duration,
    /// Visible browsers, operator prompts, sessions left open.
    pub debug: bool,
}

enum UrlOutcome {
    Unchanged,
    Changed(NewVersion),
    Failed,
}

/// One async lock per source identity.
#[derive(Default)]
struct IdentityLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdentityLocks {
    fn for_identity(&self, identity: &str) -> Arc<Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(identity.to_string()).or_default().clone()
    }
}

pub struct Checker {
    store: VersionStore,
    fetcher: Arc<dyn Fetcher>,
    discoverer: Discoverer,
    uploader: Option<Arc<dyn ObjectStore>>,
    max_concurrency: usize,
    shutdown: Shutdown,
    progress: Box<dyn CheckProgressReporter>,
}

impl Checker {
    pub fn new(store: VersionStore, fetcher: Arc<dyn Fetcher>, discoverer: Discoverer) -> Self {
        Self {
            store,
            fetcher,
            discoverer,
            uploader: None,
            max_concurrency: 1,
            shutdown: Shutdown::never(),
            progress: Box::new(NoProgress),
        }
    }

    pub fn with_uploader(mut self, uploader: Option<Arc<dyn ObjectStore>>) -> Self {
        self.uploader = uploader;
        self
    }

    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn CheckProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn discoverer(&self) -> &Discoverer {
        &self.discoverer
    }

    /// Check every static URL plus everything the dynamic sources yield.
    pub async fn run(
        &self,
        static_urls: &[String],
        descriptors: &[SourceDescriptor],
        options: CheckOptions,
    ) -> Result<ChangeReport, CheckError> {
        let state = self.store.load_or_recover();

        let mut urls: BTreeSet<String> = static_urls.iter().cloned().collect();
        for descriptor in descriptors {
            if self.shutdown.is_triggered() {
                return Err(CheckError::Interrupted);
            }
            self.progress.report(CheckProgressEvent::Discovering {
                source: descriptor.name.clone(),
            });
            let found = self
                .discoverer
                .discover(descriptor, options.wait, options.debug)
                .await;
            self.progress.report(CheckProgressEvent::Discovered {
                source: descriptor.name.clone(),
                found: found.len() as u64,
            });
            urls.extend(found);
        }
        if self.shutdown.is_triggered() {
            return Err(CheckError::Interrupted);
        }

        let total = urls.len();
        tracing::info!(urls = total, "checking urls");

        let state = Mutex::new(state);
        let locks = IdentityLocks::default();
        let mut report = ChangeReport {
            processed_count: total,
            ..Default::default()
        };

        let mut outcomes = stream::iter(urls)
            .map(|url| self.check_url(url, &state, &locks))
            .buffer_unordered(self.max_concurrency);

        let mut done = 0u64;
        loop {
            let outcome = tokio::select! {
                next = outcomes.next() => match next {
                    Some(outcome) => outcome,
                    None => break,
                },
                _ = self.shutdown.wait() => return Err(CheckError::Interrupted),
            };

            done += 1;
            self.progress.report(CheckProgressEvent::Checking {
                n: done,
                total: total as u64,
            });

            match outcome {
                UrlOutcome::Unchanged => {}
                UrlOutcome::Changed(v) => {
                    report.any_changed = true;
                    report.new_versions.push(v);
                }
                UrlOutcome::Failed => report.failed_count += 1,
            }
        }
        drop(outcomes);

        if report.any_changed {
            let state = state.into_inner();
            self.store.persist(&state)?;
            report.persisted = true;
            tracing::info!(
                path = %self.store.path().display(),
                new_versions = report.new_versions.len(),
                "version state saved"
            );
        } else {
            tracing::info!("no changes detected");
        }

        report.new_versions.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(report)
    }

    async fn check_url(
        &self,
        url: String,
        state: &Mutex<VersionStoreState>,
        locks: &IdentityLocks,
    ) -> UrlOutcome {
        let doc = match self.fetcher.fetch(&url).await {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(error = %e, "fetch failed; skipping");
                return UrlOutcome::Failed;
            }
        };

        let lock = locks.for_identity(&source_identity(&doc.url));
        let _guard = lock.lock().await;

        let pending = state.lock().await.prepare(&doc, Utc::now());
        let Some(pending) = pending else {
            tracing::debug!(url = %doc.url, "unchanged");
            return UrlOutcome::Unchanged;
        };

        let key = pending.snapshot_key();
        let local_path = match self.store.write_snapshot(&key, &doc.content) {
            Ok(path) => Some(path.display().to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "snapshot write failed");
                None
            }
        };

        let remote_path = match self.uploader {
            Some(ref uploader) => match uploader.upload(&doc.content, &key).await {
                Ok(remote) => Some(remote),
                Err(e) => {
                    tracing::warn!(url = %doc.url, error = %e, "upload failed");
                    None
                }
            },
            None => None,
        };

        let display_name = display_name_for(&doc.url);
        let mut state = state.lock().await;
        let record = state.commit(pending, &display_name, local_path, remote_path);
        tracing::info!(
            url = %doc.url,
            version = %record.id,
            label = %record.sequence_label,
            "new version recorded"
        );

        UrlOutcome::Changed(NewVersion {
            url: doc.url.clone(),
            version_id: record.id.clone(),
            uploaded: record.remote_path.is_some(),
        })
    }
}

/// Wire up the real backends from `config` and perform one run.
///
/// In debug mode, sessions left open for inspection are closed once the
/// operator presses Enter.
pub async fn run_check(
    config: &Config,
    options: CheckOptions,
    progress: ProgressMode,
    shutdown: Shutdown,
) -> Result<ChangeReport, CheckError> {
    let caps = Capabilities::resolve(config);
    let signal: Arc<dyn OperatorSignal> = Arc::new(StdinSignal);
    let discoverer = Discoverer::new(
        caps.launcher,
        signal.clone(),
        DiscoverySettings::from_config(&config.discovery),
        shutdown.clone(),
    );
    let checker = Checker::new(
        VersionStore::from_config(&config.store),
        Arc::new(HttpFetcher::from_config(&config.fetch)?),
        discoverer,
    )
    .with_uploader(caps.uploader)
    .with_concurrency(config.fetch.max_concurrency)
    .with_shutdown(shutdown.clone())
    .with_progress(progress.reporter());

    let descriptors = sources::descriptors(config);
    let result = checker
        .run(&config.sources.urls, &descriptors, options)
        .await;

    let retained = checker.discoverer().retained_count().await;
    if options.debug && retained > 0 && result.is_ok() {
        tokio::select! {
            _ = signal.wait_for_confirmation(
                "Debug mode: browser windows left open. Press Enter to close them."
            ) => {}
            _ = shutdown.wait() => {}
        }
    }
    checker.discoverer().close_retained().await;

    result
}

/// Print the run summary on stdout.
pub fn print_report(report: &ChangeReport) {
    println!(
        "check: {} urls, {} new versions, {} failed",
        report.processed_count,
        report.new_versions.len(),
        report.failed_count
    );
    for v in &report.new_versions {
        let uploaded = if v.uploaded { "  (uploaded)" } else { "" };
        println!("  + {}  {}{}", v.version_id, v.url, uploaded);
    }
    if !report.any_changed {
        println!("No changes detected.");
    }
}
