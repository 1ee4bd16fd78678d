//! Source registry: what a run watches.
//!
//! Static URLs come straight from `[sources] urls`; each
//! `[sources.dynamic.<name>]` table becomes a [`SourceDescriptor`] for
//! discovery. `ftrack sources` prints both.

use anyhow::Result;

use crate::browser::chromium::find_chromium;
use crate::config::{Config, UploadConfig};
use crate::models::SourceDescriptor;

/// Dynamic source descriptors in name order.
pub fn descriptors(config: &Config) -> Vec<SourceDescriptor> {
    config
        .sources
        .dynamic
        .iter()
        .map(|(name, d)| SourceDescriptor {
            name: name.clone(),
            source_url: d.url.clone(),
            pattern: d.pattern.clone(),
            requires_challenge_handling: d.requires_challenge_handling,
        })
        .collect()
}

/// Look up one dynamic source by name.
pub fn find_descriptor(config: &Config, name: &str) -> Option<SourceDescriptor> {
    descriptors(config).into_iter().find(|d| d.name == name)
}

pub fn list_sources(config: &Config) -> Result<()> {
    println!("{:<16} {:<10} {:<10} URL", "SOURCE", "KIND", "CHALLENGE");
    for url in &config.sources.urls {
        println!("{:<16} {:<10} {:<10} {}", "-", "static", "-", url);
    }
    for d in descriptors(config) {
        let challenge = if d.requires_challenge_handling { "yes" } else { "no" };
        println!(
            "{:<16} {:<10} {:<10} {}  (pattern: {})",
            d.name, "dynamic", challenge, d.source_url, d.pattern
        );
    }

    println!();
    let browser = match find_chromium(config.discovery.chromium_path.as_deref()) {
        Some(path) => path.display().to_string(),
        None => "NOT FOUND".to_string(),
    };
    println!("{:<16} {}", "browser", browser);
    let upload = match config.upload {
        Some(UploadConfig::Supabase(ref s)) => format!("supabase:{}", s.bucket),
        Some(UploadConfig::S3(ref s)) => format!("s3://{}/{}", s.bucket, s.prefix),
        None => "NOT CONFIGURED".to_string(),
    };
    println!("{:<16} {}", "upload", upload);

    Ok(())
}
