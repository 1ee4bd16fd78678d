//! Core data models used throughout the tracker.
//!
//! These types describe what is being watched ([`SourceDescriptor`]), what a
//! single fetch produced ([`FetchedDocument`]), and the persisted version
//! history ([`SourceHistory`], [`VersionRecord`]).

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A dynamic source: a page whose interesting URLs only appear once rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub name: String,
    pub source_url: String,
    /// Plain substring, scheme stripped, matched against candidate URLs.
    pub pattern: String,
    pub requires_challenge_handling: bool,
}

/// Hex-encoded SHA-256 digest of raw content bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content fetched from one URL during one check run.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub url: String,
    pub content: Vec<u8>,
    pub content_hash: ContentHash,
}

impl FetchedDocument {
    pub fn new(url: impl Into<String>, content: Vec<u8>) -> Self {
        let content_hash = ContentHash::of(&content);
        Self {
            url: url.into(),
            content,
            content_hash,
        }
    }
}

/// Derive the stable identity key for a URL.
///
/// The full SHA-256 of the URL string: stable across runs, filesystem safe,
/// and wide enough that two distinct URLs never share a history in practice.
pub fn source_identity(url: &str) -> String {
    ContentHash::of(url.as_bytes()).0
}

/// Display name for a URL: its last path segment, or the host when the path
/// is empty.
pub fn display_name_for(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let trimmed = without_query.trim_end_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    if last.is_empty() || last.ends_with(':') {
        url.to_string()
    } else {
        last.to_string()
    }
}

/// One recorded snapshot. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// `v` + UTC timestamp at seconds granularity; sorts by creation order.
    pub id: String,
    #[serde(rename = "label")]
    pub sequence_label: String,
    /// Files written by the hourly Python tracker carry `timestamp`
    /// (`%Y%m%d%H`) instead.
    #[serde(default, alias = "timestamp", deserialize_with = "created_at_compat")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "hash")]
    pub content_hash: ContentHash,
    #[serde(rename = "path", default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default, alias = "supabase_path", skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,
}

fn created_at_compat<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(at) = raw.parse::<DateTime<Utc>>() {
        return Ok(at);
    }
    NaiveDateTime::parse_from_str(&format!("{raw}0000"), "%Y%m%d%H%M%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| serde::de::Error::custom(format!("invalid created_at {raw:?}: {e}")))
}

/// Ordered, append-only version history of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHistory {
    #[serde(rename = "url")]
    pub origin_url: String,
    #[serde(rename = "filename")]
    pub display_name: String,
    #[serde(default)]
    pub versions: Vec<VersionRecord>,
}

impl SourceHistory {
    pub fn new(origin_url: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            origin_url: origin_url.into(),
            display_name: display_name.into(),
            versions: Vec::new(),
        }
    }

    /// The most recent version, if any.
    pub fn current(&self) -> Option<&VersionRecord> {
        self.versions.last()
    }
}

/// A version appended during a run, reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVersion {
    pub url: String,
    pub version_id: String,
    pub uploaded: bool,
}

/// Outcome of one check run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeReport {
    pub any_changed: bool,
    /// Unique URLs the run attempted.
    pub processed_count: usize,
    /// URLs whose fetch failed and were skipped.
    pub failed_count: usize,
    pub new_versions: Vec<NewVersion>,
    pub persisted: bool,
}
