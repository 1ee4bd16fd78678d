//! Read-only views of the version store.
//!
//! `ftrack history` lists watched sources and their versions; `ftrack stats`
//! gives a quick summary of what has been recorded so far. Neither command
//! writes anything.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::models::SourceHistory;
use crate::store::VersionStore;

/// Print version history, for every source or for one URL.
pub fn run_history(config: &Config, url: Option<&str>) -> Result<()> {
    let store = VersionStore::from_config(&config.store);
    let state = store
        .load()
        .with_context(|| format!("Failed to read {}", store.path().display()))?;

    if let Some(url) = url {
        let Some(history) = state.history_for_url(url) else {
            bail!("No history recorded for {}", url);
        };
        print_history(history);
        return Ok(());
    }

    if state.is_empty() {
        println!("No versions recorded yet.");
        return Ok(());
    }

    println!("{:<32} {:>8}   {:<20} URL", "FILENAME", "VERSIONS", "LAST CHANGE");
    for (_, history) in state.histories() {
        let last = history
            .current()
            .map(|v| format_relative(v.created_at, Utc::now()))
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<32} {:>8}   {:<20} {}",
            history.display_name,
            history.versions.len(),
            last,
            history.origin_url
        );
    }
    Ok(())
}

fn print_history(history: &SourceHistory) {
    println!("{}", history.origin_url);
    for v in history.versions.iter().rev() {
        let hash = v.content_hash.as_str();
        println!(
            "  {:<22} {}  sha256:{}",
            v.id,
            v.sequence_label,
            hash.get(..12).unwrap_or(hash)
        );
        if let Some(ref local) = v.local_path {
            println!("  {:<22} local:  {}", "", local);
        }
        if let Some(ref remote) = v.remote_path {
            println!("  {:<22} remote: {}", "", remote);
        }
    }
}

/// Summary counts for the version store.
pub fn run_stats(config: &Config) -> Result<()> {
    let store = VersionStore::from_config(&config.store);
    let state = store
        .load()
        .with_context(|| format!("Failed to read {}", store.path().display()))?;

    let total_versions: usize = state.histories().map(|(_, h)| h.versions.len()).sum();
    let uploaded: usize = state
        .histories()
        .flat_map(|(_, h)| h.versions.iter())
        .filter(|v| v.remote_path.is_some())
        .count();
    let last_change = state
        .histories()
        .filter_map(|(_, h)| h.current())
        .map(|v| v.created_at)
        .max();

    let state_size = std::fs::metadata(store.path()).map(|m| m.len()).unwrap_or(0);
    let snapshot_size = dir_size(store.snapshots_dir());

    println!("Feature Tracker: Version Store");
    println!("==============================");
    println!();
    println!("  State file:  {}", store.path().display());
    println!("  Size:        {}", format_bytes(state_size));
    println!("  Snapshots:   {}", store.snapshots_dir().display());
    println!("  Size:        {}", format_bytes(snapshot_size));
    println!();
    println!("  Sources:     {}", state.len());
    println!("  Versions:    {}", total_versions);
    println!("  Uploaded:    {} / {}", uploaded, total_versions);
    println!(
        "  Last change: {}",
        last_change
            .map(|t| format_relative(t, Utc::now()))
            .unwrap_or_else(|| "never".to_string())
    );
    println!();

    Ok(())
}

fn dir_size(dir: &std::path::Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// "3 hours ago" for recent times, otherwise `YYYY-MM-DD HH:MM`.
fn format_relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - at).num_seconds();
    let absolute = || at.format("%Y-%m-%d %H:%M").to_string();

    if delta < 0 {
        absolute()
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        absolute()
    }
}
