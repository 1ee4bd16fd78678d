//! Error taxonomy for the tracker.
//!
//! Each stage of a check run has its own error type so the orchestrator can
//! decide, per stage, whether a failure degrades one item or ends the run:
//!
//! | Error | Raised by | Effect on the run |
//! |-------|-----------|-------------------|
//! | [`FetchError`] | [`fetch`](crate::fetch) | URL skipped for this run |
//! | [`DiscoveryError`] | [`discovery`](crate::discovery), [`browser`](crate::browser) | source yields no URLs |
//! | [`PersistenceError`] | [`store`](crate::store) | tolerated on load, fatal on save |
//! | [`UploadError`] | [`upload`](crate::upload) | version recorded without a remote path |

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("timed out after {timeout:?} fetching {url}")]
    Timeout { url: String, timeout: Duration },

    #[error("HTTP {status} fetching {url}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("browser automation is not available: {0}")]
    Unavailable(String),

    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("page script failed: {0}")]
    Script(String),

    #[error("challenge interaction failed: {0}")]
    Interaction(String),

    #[error("discovery cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read version state {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("version state {} is malformed: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize version state: {0}")]
    Serialize(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to build upload client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("object store credentials missing: {0}")]
    Credentials(String),

    #[error("upload of {key} failed: {source}")]
    Request {
        key: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upload of {key} rejected (HTTP {status}): {body}")]
    Rejected {
        key: String,
        status: u16,
        body: String,
    },
}

/// Terminal failures of a check run.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("check run interrupted")]
    Interrupted,
}
