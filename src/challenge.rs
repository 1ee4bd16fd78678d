//! Bot-challenge handling for dynamic sources.
//!
//! The handler runs on a live [`BrowserSession`] after navigation and before
//! extraction. It never fails discovery; every path ends in a terminal state
//! and extraction proceeds regardless.
//!
//! ```text
//!  None ──probe hit──▶ Detected ──click + settle──▶ AutoSolveAttempted
//!   │                                                  │            │
//!   │ (no probe hit)                       interactive │            │ unattended
//!   ▼                                                  ▼            ▼
//!  exit                                     AwaitingManual      Unresolved
//!                                                  │
//!                                    operator done │ (signal lost)
//!                                                  ▼        └──▶ Unresolved
//!                                              Resolved
//! ```
//!
//! Unattended runs never block: they give up after one automatic attempt.
//! Interactive runs wait on the operator with no timeout; only process
//! interruption ends that wait.

use async_trait::async_trait;
use std::io::Write;
use std::time::Duration;
use tokio::time::Instant;

use crate::browser::BrowserSession;
use crate::error::DiscoveryError;

/// Iframes that host known challenge widgets.
pub const CHALLENGE_FRAME_SELECTORS: &[&str] = &[
    "iframe[src*='challenges.cloudflare.com']",
    "iframe[title*='challenge' i]",
    "iframe[src*='hcaptcha.com']",
    "iframe[src*='recaptcha']",
];

/// Page text that indicates a human-verification interstitial.
pub const VERIFICATION_PHRASES: &[&str] = &[
    "verify you are human",
    "verifying you are human",
    "checking your browser",
    "are you a robot",
    "complete the security check",
];

const PROBE_INTERVAL: Duration = Duration::from_millis(250);

const OPERATOR_PROMPT: &str =
    "Challenge detected. Solve it in the browser window, then press Enter to continue...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    None,
    Detected,
    AutoSolveAttempted,
    AwaitingManual,
    Resolved,
    Unresolved,
}

impl ChallengeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChallengeState::None | ChallengeState::Resolved | ChallengeState::Unresolved
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeSettings {
    /// Upper bound on detection probing.
    pub probe_timeout: Duration,
    /// Wait after the automatic interaction.
    pub settle_time: Duration,
}

/// External "operator is done" signal for interactive runs.
#[async_trait]
pub trait OperatorSignal: Send + Sync {
    async fn wait_for_confirmation(&self, prompt: &str) -> Result<(), DiscoveryError>;
}

/// Waits for the operator to press Enter on stdin.
pub struct StdinSignal;

#[async_trait]
impl OperatorSignal for StdinSignal {
    async fn wait_for_confirmation(&self, prompt: &str) -> Result<(), DiscoveryError> {
        let prompt = prompt.to_string();
        let read = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", prompt);
            let _ = stderr.flush();
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)
        })
        .await
        .map_err(|_| DiscoveryError::Cancelled)?;

        match read {
            Ok(0) | Err(_) => Err(DiscoveryError::Cancelled),
            Ok(_) => Ok(()),
        }
    }
}

/// Where the handler ended and the states it passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeOutcome {
    pub state: ChallengeState,
    pub trail: Vec<ChallengeState>,
}

pub struct ChallengeHandler<'a> {
    settings: ChallengeSettings,
    signal: &'a dyn OperatorSignal,
    interactive: bool,
}

impl<'a> ChallengeHandler<'a> {
    pub fn new(settings: ChallengeSettings, signal: &'a dyn OperatorSignal, interactive: bool) -> Self {
        Self {
            settings,
            signal,
            interactive,
        }
    }

    pub async fn run(&self, session: &mut dyn BrowserSession) -> ChallengeOutcome {
        let mut trail = vec![ChallengeState::None];

        if !self.detect(session).await {
            return ChallengeOutcome {
                state: ChallengeState::None,
                trail,
            };
        }
        trail.push(ChallengeState::Detected);
        tracing::info!("challenge detected");

        if let Err(e) = session.attempt_challenge_interaction().await {
            tracing::warn!(error = %e, "automatic challenge interaction failed");
        }
        tokio::time::sleep(self.settings.settle_time).await;
        trail.push(ChallengeState::AutoSolveAttempted);

        if !self.interactive {
            trail.push(ChallengeState::Unresolved);
            tracing::info!("unattended run; continuing past challenge");
            return ChallengeOutcome {
                state: ChallengeState::Unresolved,
                trail,
            };
        }

        trail.push(ChallengeState::AwaitingManual);
        let state = match self.signal.wait_for_confirmation(OPERATOR_PROMPT).await {
            Ok(()) => ChallengeState::Resolved,
            Err(e) => {
                tracing::warn!(error = %e, "operator signal lost");
                ChallengeState::Unresolved
            }
        };
        trail.push(state);
        tracing::info!(?state, "challenge handling finished");
        ChallengeOutcome { state, trail }
    }

    /// Probe for challenge frames or verification text until the probe
    /// timeout elapses.
    async fn detect(&self, session: &mut dyn BrowserSession) -> bool {
        let deadline = Instant::now() + self.settings.probe_timeout;
        loop {
            for selector in CHALLENGE_FRAME_SELECTORS {
                match session.find_element(selector, Duration::ZERO).await {
                    Ok(true) => return true,
                    Ok(false) => {}
                    Err(e) => tracing::debug!(error = %e, selector, "challenge probe failed"),
                }
            }

            match session.rendered_html().await {
                Ok(html) => {
                    let text = html.to_lowercase();
                    if VERIFICATION_PHRASES.iter().any(|p| text.contains(p)) {
                        return true;
                    }
                }
                Err(e) => tracing::debug!(error = %e, "challenge text probe failed"),
            }

            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    }
}
