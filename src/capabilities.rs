//! Startup resolution of optional backends.
//!
//! Which browser backend and which remote store a run uses is decided once,
//! here, from the config and the environment. Missing capabilities degrade
//! the run instead of failing it: without a browser every dynamic source
//! yields no URLs; without upload credentials versions are kept locally only.

use std::sync::Arc;

use crate::browser::chromium::{find_chromium, ChromiumLauncher};
use crate::browser::{BrowserLauncher, NoopLauncher};
use crate::config::Config;
use crate::upload::{create_object_store, ObjectStore};

pub struct Capabilities {
    pub launcher: Arc<dyn BrowserLauncher>,
    pub uploader: Option<Arc<dyn ObjectStore>>,
}

impl Capabilities {
    pub fn resolve(config: &Config) -> Self {
        Self {
            launcher: resolve_launcher(config),
            uploader: resolve_uploader(config),
        }
    }
}

fn resolve_launcher(config: &Config) -> Arc<dyn BrowserLauncher> {
    match find_chromium(config.discovery.chromium_path.as_deref()) {
        Some(path) => {
            tracing::debug!(executable = %path.display(), "using chromium");
            Arc::new(ChromiumLauncher::new(path))
        }
        None => {
            if !config.sources.dynamic.is_empty() {
                tracing::warn!(
                    "no chromium binary found; dynamic sources will yield no URLs \
                     (set discovery.chromium_path or FTRACK_CHROMIUM_PATH)"
                );
            }
            Arc::new(NoopLauncher::new("no chromium binary found"))
        }
    }
}

fn resolve_uploader(config: &Config) -> Option<Arc<dyn ObjectStore>> {
    let upload = config.upload.as_ref()?;
    match create_object_store(upload) {
        Ok(store) => {
            tracing::debug!(destination = %store.describe(), "uploads enabled");
            Some(store)
        }
        Err(e) => {
            tracing::warn!(error = %e, "uploads disabled");
            None
        }
    }
}
