//! Chromium-backed browser sessions using chromiumoxide.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{BrowserLauncher, BrowserSession, LaunchOptions};
use crate::challenge::CHALLENGE_FRAME_SELECTORS;
use crate::error::DiscoveryError;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

const RESOURCE_LIST_JS: &str =
    "performance.getEntriesByType('resource').map(function (e) { return e.name; })";

/// Find a Chromium binary.
///
/// Checks, in order: the configured path, `FTRACK_CHROMIUM_PATH`, then
/// `google-chrome`, `chromium` and `chromium-browser` on `PATH`.
pub fn find_chromium(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Some(path.to_path_buf());
        }
    }

    if let Ok(p) = std::env::var("FTRACK_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Launches a fresh Chromium process per session.
pub struct ChromiumLauncher {
    executable: PathBuf,
}

impl ChromiumLauncher {
    pub fn new(executable: PathBuf) -> Self {
        Self { executable }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, options: LaunchOptions) -> Result<Box<dyn BrowserSession>, DiscoveryError> {
        let mut builder = BrowserConfig::builder()
            .chrome_executable(&self.executable)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");
        if options.visible {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(DiscoveryError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DiscoveryError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(DiscoveryError::Launch(format!("failed to open page: {e}")));
            }
        };

        tracing::debug!(visible = options.visible, "chromium session started");

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler_task,
            visible: options.visible,
        }))
    }
}

/// A running Chromium instance and its single page.
pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    visible: bool,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    fn is_interactive(&self) -> bool {
        self.visible
    }

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), DiscoveryError> {
        let page = &self.page;
        let load = async {
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };

        match tokio::time::timeout(timeout, load).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DiscoveryError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(DiscoveryError::Timeout {
                operation: "page load",
                timeout,
            }),
        }
    }

    async fn rendered_html(&self) -> Result<String, DiscoveryError> {
        self.page
            .content()
            .await
            .map_err(|e| DiscoveryError::Script(format!("failed to read HTML: {e}")))
    }

    async fn resource_list(&self) -> Result<Vec<String>, DiscoveryError> {
        let result = self
            .page
            .evaluate(RESOURCE_LIST_JS)
            .await
            .map_err(|e| DiscoveryError::Script(format!("resource timing query failed: {e}")))?;

        result
            .into_value::<Vec<String>>()
            .map_err(|e| DiscoveryError::Script(format!("unexpected resource list: {e:?}")))
    }

    async fn find_element(&self, selector: &str, timeout: Duration) -> Result<bool, DiscoveryError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn attempt_challenge_interaction(&mut self) -> Result<(), DiscoveryError> {
        for selector in CHALLENGE_FRAME_SELECTORS {
            if let Ok(element) = self.page.find_element(*selector).await {
                element
                    .click()
                    .await
                    .map_err(|e| DiscoveryError::Interaction(e.to_string()))?;
                return Ok(());
            }
        }
        Err(DiscoveryError::Interaction(
            "no challenge widget found to click".to_string(),
        ))
    }

    async fn close(self: Box<Self>) -> Result<(), DiscoveryError> {
        let mut this = *self;
        let _ = this.page.clone().close().await;
        let closed = this.browser.close().await;
        let _ = this.browser.wait().await;
        this.handler_task.abort();
        closed
            .map(|_| ())
            .map_err(|e| DiscoveryError::Launch(format!("failed to close browser: {e}")))
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_renders_and_lists_resources() {
        let executable = find_chromium(None).expect("chromium not found");
        let launcher = ChromiumLauncher::new(executable);
        let mut session = launcher
            .launch(LaunchOptions { visible: false })
            .await
            .expect("launch failed");

        session
            .navigate(
                "data:text/html,<h1>Hello</h1><p>https://cdn.example/a.js</p>",
                Duration::from_secs(10),
            )
            .await
            .expect("navigation failed");

        let html = session.rendered_html().await.expect("html failed");
        assert!(html.contains("<h1>Hello</h1>"));
        assert!(session.resource_list().await.expect("resources failed").is_empty());
        assert!(!session
            .find_element("iframe", Duration::from_millis(300))
            .await
            .unwrap());

        session.close().await.expect("close failed");
    }
}
