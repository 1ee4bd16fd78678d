//! Browser session abstraction for rendering dynamic sources.
//!
//! [`BrowserLauncher`] starts one [`BrowserSession`] per discovery; the
//! session exposes just what discovery and challenge handling need. Which
//! automation backend sits behind it is decided once at startup (see
//! [`capabilities`](crate::capabilities)); the discovery logic never branches
//! on it.

pub mod chromium;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::DiscoveryError;

/// How a session should be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Show a browser window. Required for challenge handling and debugging.
    pub visible: bool,
}

/// Starts browser sessions.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: LaunchOptions) -> Result<Box<dyn BrowserSession>, DiscoveryError>;
}

/// One browser instance with a single page.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Whether the session has a visible window an operator can use.
    fn is_interactive(&self) -> bool;

    /// Navigate and wait for the load, failing with a timeout error when
    /// `timeout` elapses first.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), DiscoveryError>;

    /// The current DOM serialized as HTML.
    async fn rendered_html(&self) -> Result<String, DiscoveryError>;

    /// URLs of every resource the page has loaded so far.
    async fn resource_list(&self) -> Result<Vec<String>, DiscoveryError>;

    /// Poll for an element matching `selector` until `timeout` elapses.
    async fn find_element(&self, selector: &str, timeout: Duration) -> Result<bool, DiscoveryError>;

    /// Click the challenge widget at its expected on-screen location.
    async fn attempt_challenge_interaction(&mut self) -> Result<(), DiscoveryError>;

    /// Tear the browser down.
    async fn close(self: Box<Self>) -> Result<(), DiscoveryError>;
}

/// Launcher used when no browser is available; every launch fails.
pub struct NoopLauncher {
    reason: String,
}

impl NoopLauncher {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl BrowserLauncher for NoopLauncher {
    async fn launch(&self, _options: LaunchOptions) -> Result<Box<dyn BrowserSession>, DiscoveryError> {
        Err(DiscoveryError::Unavailable(self.reason.clone()))
    }
}
