//! Discovery of candidate URLs from dynamic sources.
//!
//! For each [`SourceDescriptor`] the [`Discoverer`]:
//!
//! 1. launches a browser session (visible when the source needs challenge
//!    handling or when running in debug mode),
//! 2. navigates with a bounded page-load timeout,
//! 3. runs the [`ChallengeHandler`] if the source requires it,
//! 4. idles for the configured wait so async page activity can settle,
//! 5. extracts matching URLs from the rendered HTML and resource list,
//! 6. tears the session down, unless it is an interactive debug session,
//!    which is retained for inspection until [`Discoverer::close_retained`].
//!
//! Discovery never fails the run: errors are logged and yield an empty set.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::browser::{BrowserLauncher, BrowserSession, LaunchOptions};
use crate::challenge::{ChallengeHandler, ChallengeSettings, OperatorSignal};
use crate::config::DiscoveryConfig;
use crate::error::DiscoveryError;
use crate::extract::extract_urls;
use crate::models::SourceDescriptor;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverySettings {
    pub page_load_timeout: Duration,
    pub challenge: ChallengeSettings,
}

impl DiscoverySettings {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            page_load_timeout: Duration::from_secs(config.page_load_timeout_secs),
            challenge: ChallengeSettings {
                probe_timeout: Duration::from_secs(config.challenge_probe_timeout_secs),
                settle_time: Duration::from_secs(config.challenge_settle_secs),
            },
        }
    }
}

pub struct Discoverer {
    launcher: Arc<dyn BrowserLauncher>,
    signal: Arc<dyn OperatorSignal>,
    settings: DiscoverySettings,
    shutdown: Shutdown,
    retained: Mutex<Vec<(String, Box<dyn BrowserSession>)>>,
}

impl Discoverer {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        signal: Arc<dyn OperatorSignal>,
        settings: DiscoverySettings,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            launcher,
            signal,
            settings,
            shutdown,
            retained: Mutex::new(Vec::new()),
        }
    }

    /// Discover candidate URLs for one source. Never fails.
    pub async fn discover(
        &self,
        descriptor: &SourceDescriptor,
        wait: Duration,
        debug: bool,
    ) -> BTreeSet<String> {
        match self.try_discover(descriptor, wait, debug).await {
            Ok(urls) => {
                tracing::info!(
                    source = %descriptor.name,
                    found = urls.len(),
                    "discovery finished"
                );
                urls
            }
            Err(e) => {
                tracing::warn!(source = %descriptor.name, error = %e, "discovery failed");
                BTreeSet::new()
            }
        }
    }

    /// Like [`discover`](Self::discover) but surfaces the failure.
    pub async fn try_discover(
        &self,
        descriptor: &SourceDescriptor,
        wait: Duration,
        debug: bool,
    ) -> Result<BTreeSet<String>, DiscoveryError> {
        let visible = descriptor.requires_challenge_handling || debug;
        let mut session = self.launcher.launch(LaunchOptions { visible }).await?;

        let result = tokio::select! {
            r = self.drive(session.as_mut(), descriptor, wait, debug) => r,
            _ = self.shutdown.wait() => Err(DiscoveryError::Cancelled),
        };

        if debug && session.is_interactive() && !self.shutdown.is_triggered() {
            tracing::info!(source = %descriptor.name, "leaving browser open for inspection");
            self.retained
                .lock()
                .await
                .push((descriptor.name.clone(), session));
        } else if let Err(e) = session.close().await {
            tracing::warn!(source = %descriptor.name, error = %e, "browser teardown failed");
        }

        result
    }

    async fn drive(
        &self,
        session: &mut dyn BrowserSession,
        descriptor: &SourceDescriptor,
        wait: Duration,
        debug: bool,
    ) -> Result<BTreeSet<String>, DiscoveryError> {
        tracing::debug!(source = %descriptor.name, url = %descriptor.source_url, "navigating");
        session
            .navigate(&descriptor.source_url, self.settings.page_load_timeout)
            .await?;

        if descriptor.requires_challenge_handling {
            let interactive = debug && session.is_interactive();
            let outcome =
                ChallengeHandler::new(self.settings.challenge, self.signal.as_ref(), interactive)
                    .run(session)
                    .await;
            tracing::debug!(source = %descriptor.name, state = ?outcome.state, "challenge handler exited");
        }

        tokio::time::sleep(wait).await;

        let html = session.rendered_html().await?;
        let resources = session.resource_list().await?;
        Ok(extract_urls(&html, &resources, &descriptor.pattern))
    }

    /// Number of debug sessions left open.
    pub async fn retained_count(&self) -> usize {
        self.retained.lock().await.len()
    }

    /// Close every session left open for inspection.
    pub async fn close_retained(&self) {
        let sessions: Vec<_> = self.retained.lock().await.drain(..).collect();
        for (name, session) in sessions {
            if let Err(e) = session.close().await {
                tracing::warn!(source = %name, error = %e, "browser teardown failed");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::challenge::tests::{FakePage, ScriptedSignal};
    use crate::shutdown;
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;

    /// Hands out clones of a scripted page and records launch options.
    pub(crate) struct FakeLauncher {
        pub page: FakePage,
        pub fail: bool,
        pub launches: std::sync::Mutex<Vec<LaunchOptions>>,
    }

    impl FakeLauncher {
        pub fn new(page: FakePage) -> Self {
            Self {
                page,
                fail: false,
                launches: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn launch(&self, options: LaunchOptions) -> Result<Box<dyn BrowserSession>, DiscoveryError> {
            self.launches.lock().unwrap().push(options);
            if self.fail {
                return Err(DiscoveryError::Launch("no display".into()));
            }
            let mut page = self.page.clone();
            page.interactive = options.visible;
            Ok(Box::new(page))
        }
    }

    fn settings() -> DiscoverySettings {
        DiscoverySettings {
            page_load_timeout: Duration::from_secs(60),
            challenge: ChallengeSettings {
                probe_timeout: Duration::from_secs(5),
                settle_time: Duration::from_secs(5),
            },
        }
    }

    fn descriptor(requires_challenge_handling: bool) -> SourceDescriptor {
        SourceDescriptor {
            name: "app".into(),
            source_url: "https://app.test/".into(),
            pattern: "cdn.example".into(),
            requires_challenge_handling,
        }
    }

    fn page() -> FakePage {
        FakePage {
            html: r#"<script src="https://cdn.example/v1/app.js"></script>"#.into(),
            resources: vec!["https://cdn.example/v1/app.js".into()],
            ..Default::default()
        }
    }

    fn discoverer(launcher: Arc<FakeLauncher>, signal: Arc<ScriptedSignal>) -> Discoverer {
        Discoverer::new(launcher, signal, settings(), Shutdown::never())
    }

    #[tokio::test(start_paused = true)]
    async fn extracts_deduplicated_urls_without_challenge_handling() {
        let mut p = page();
        p.challenge_frame = true;
        let launcher = Arc::new(FakeLauncher::new(p.clone()));
        let signal = Arc::new(ScriptedSignal::default());
        let d = discoverer(launcher.clone(), signal.clone());

        let urls = d.discover(&descriptor(false), Duration::from_secs(10), false).await;

        assert_eq!(urls.into_iter().collect::<Vec<_>>(), vec!["https://cdn.example/v1/app.js"]);
        assert_eq!(p.clicks.load(Ordering::SeqCst), 0, "challenge handler must not run");
        assert_eq!(signal.calls.load(Ordering::SeqCst), 0);
        assert_eq!(p.closed.load(Ordering::SeqCst), 1);
        assert_eq!(
            launcher.launches.lock().unwrap().as_slice(),
            &[LaunchOptions { visible: false }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unattended_challenge_failure_still_extracts() {
        let mut p = page();
        p.challenge_frame = true;
        p.interaction_fails = true;
        let launcher = Arc::new(FakeLauncher::new(p.clone()));
        let signal = Arc::new(ScriptedSignal::default());
        let d = discoverer(launcher.clone(), signal.clone());

        let urls = d.discover(&descriptor(true), Duration::from_secs(10), false).await;

        assert_eq!(urls.len(), 1);
        assert_eq!(p.clicks.load(Ordering::SeqCst), 1);
        assert_eq!(signal.calls.load(Ordering::SeqCst), 0);
        assert_eq!(p.closed.load(Ordering::SeqCst), 1);
        assert_eq!(
            launcher.launches.lock().unwrap().as_slice(),
            &[LaunchOptions { visible: true }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn debug_session_is_retained_until_closed() {
        let mut p = page();
        p.challenge_frame = true;
        let launcher = Arc::new(FakeLauncher::new(p.clone()));
        let signal = Arc::new(ScriptedSignal::default());
        let d = discoverer(launcher, signal.clone());

        let urls = d.discover(&descriptor(true), Duration::from_secs(1), true).await;

        assert_eq!(urls.len(), 1);
        assert_eq!(signal.calls.load(Ordering::SeqCst), 1);
        assert_eq!(p.closed.load(Ordering::SeqCst), 0);
        assert_eq!(d.retained_count().await, 1);

        d.close_retained().await;
        assert_eq!(p.closed.load(Ordering::SeqCst), 1);
        assert_eq!(d.retained_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn launch_failure_yields_empty_set() {
        let mut launcher = FakeLauncher::new(page());
        launcher.fail = true;
        let d = discoverer(Arc::new(launcher), Arc::new(ScriptedSignal::default()));

        assert!(d.discover(&descriptor(false), Duration::ZERO, false).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_failure_still_tears_down() {
        let mut p = page();
        p.navigation_error = true;
        let launcher = Arc::new(FakeLauncher::new(p.clone()));
        let d = discoverer(launcher, Arc::new(ScriptedSignal::default()));

        let err = d
            .try_discover(&descriptor(false), Duration::ZERO, false)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Navigation { .. }));
        assert_eq!(p.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_and_tears_down() {
        let p = page();
        let launcher = Arc::new(FakeLauncher::new(p.clone()));
        let (trigger, shutdown) = shutdown::channel();
        let d = Discoverer::new(
            launcher,
            Arc::new(ScriptedSignal::default()),
            settings(),
            shutdown,
        );
        trigger.trigger();

        let err = d
            .try_discover(&descriptor(false), Duration::from_secs(3600), true)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Cancelled));
        assert_eq!(p.closed.load(Ordering::SeqCst), 1);
        assert_eq!(d.retained_count().await, 0);
    }
}
