//! Version store.
//!
//! Maps each source identity to its ordered, append-only version history and
//! decides whether freshly fetched content is a new version. The whole state
//! is a single pretty-printed JSON document keyed by identity:
//!
//! ```json
//! {
//!   "3f1c…": {
//!     "url": "https://x.test/a.txt",
//!     "filename": "a.txt",
//!     "versions": [
//!       { "id": "v20260101120000", "label": "Version 1 (2026-01-01 12:00)",
//!         "created_at": "2026-01-01T12:00:00Z", "hash": "…",
//!         "path": "data/versions/3f1c…-v20260101120000.txt" }
//!     ]
//!   }
//! }
//! ```
//!
//! # Novelty
//!
//! Content is new iff the history is empty or its hash differs from the
//! *latest* version's hash. Returning to an older state (A → B → A) therefore
//! records a new version each time.
//!
//! # Durability
//!
//! [`VersionStore::persist`] writes to a temporary file in the target
//! directory, syncs it, and renames it over the old state, so an interrupted
//! write leaves the previous document intact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::config::StoreConfig;
use crate::error::PersistenceError;
use crate::models::{source_identity, ContentHash, FetchedDocument, SourceHistory, VersionRecord};

/// The entire persisted state: `identity -> history`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionStoreState {
    sources: BTreeMap<String, SourceHistory>,
}

/// A version that has been decided on but not yet appended.
///
/// Produced by [`VersionStoreState::prepare`]; the caller writes the snapshot
/// and uploads it, then hands it back to [`VersionStoreState::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingVersion {
    pub identity: String,
    pub url: String,
    pub id: String,
    pub sequence_label: String,
    pub created_at: DateTime<Utc>,
    pub content_hash: ContentHash,
}

impl PendingVersion {
    /// File name used for both the local snapshot and the remote object key.
    pub fn snapshot_key(&self) -> String {
        format!("{}-{}.txt", self.identity, self.id)
    }
}

impl VersionStoreState {
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, identity: &str) -> Option<&SourceHistory> {
        self.sources.get(identity)
    }

    pub fn history_for_url(&self, url: &str) -> Option<&SourceHistory> {
        self.sources.get(&source_identity(url))
    }

    pub fn histories(&self) -> impl Iterator<Item = (&String, &SourceHistory)> {
        self.sources.iter()
    }

    /// Decide whether `doc` is a new version of its source.
    ///
    /// Returns `None` when the content hash equals the latest recorded hash.
    /// Does not modify the state.
    pub fn prepare(&self, doc: &FetchedDocument, now: DateTime<Utc>) -> Option<PendingVersion> {
        let identity = source_identity(&doc.url);
        let history = self.sources.get(&identity);
        let latest = history.and_then(SourceHistory::current);

        if let Some(latest) = latest {
            if latest.content_hash == doc.content_hash {
                return None;
            }
        }

        // Never step back in time, even if the wall clock does.
        let created_at = match latest {
            Some(l) if now < l.created_at => l.created_at,
            _ => now,
        };
        let id = next_version_id(latest, created_at);
        let position = history.map(|h| h.versions.len()).unwrap_or(0) + 1;

        Some(PendingVersion {
            identity,
            url: doc.url.clone(),
            sequence_label: format!(
                "Version {} ({})",
                position,
                created_at.format("%Y-%m-%d %H:%M")
            ),
            id,
            created_at,
            content_hash: doc.content_hash.clone(),
        })
    }

    /// Append a prepared version, creating the history if needed.
    pub fn commit(
        &mut self,
        pending: PendingVersion,
        display_name: &str,
        local_path: Option<String>,
        remote_path: Option<String>,
    ) -> &VersionRecord {
        let history = self
            .sources
            .entry(pending.identity.clone())
            .or_insert_with(|| SourceHistory::new(pending.url.clone(), display_name));

        if history.origin_url != pending.url {
            tracing::warn!(
                identity = %pending.identity,
                stored = %history.origin_url,
                incoming = %pending.url,
                "source identity already bound to a different URL; rebinding"
            );
            history.origin_url = pending.url.clone();
        }

        let index = history.versions.len();
        history.versions.push(VersionRecord {
            id: pending.id,
            sequence_label: pending.sequence_label,
            created_at: pending.created_at,
            content_hash: pending.content_hash,
            local_path,
            remote_path,
        });
        &history.versions[index]
    }

    /// Re-key every history under the identity of its origin URL.
    ///
    /// State written by the hourly Python tracker is keyed by a mangled URL
    /// (`https_host_path`). Histories that land on the same identity are
    /// merged in creation order; no version is dropped.
    fn keyed_by_identity(self) -> Self {
        let mut sources: BTreeMap<String, SourceHistory> = BTreeMap::new();
        for (key, history) in self.sources {
            let identity = source_identity(&history.origin_url);
            if key != identity {
                tracing::debug!(from = %key, to = %identity, "re-keyed source history");
            }
            match sources.entry(identity) {
                Entry::Vacant(slot) => {
                    slot.insert(history);
                }
                Entry::Occupied(mut slot) => {
                    tracing::warn!(url = %history.origin_url, "merging duplicate source histories");
                    let merged = slot.get_mut();
                    merged.versions.extend(history.versions);
                    merged.versions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                }
            }
        }
        Self { sources }
    }

    /// Record `doc` if it differs from the latest version of its source.
    ///
    /// Returns `true` when a version was appended.
    pub fn record_if_changed(
        &mut self,
        doc: &FetchedDocument,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> bool {
        match self.prepare(doc, now) {
            Some(pending) => {
                self.commit(pending, display_name, None, None);
                true
            }
            None => false,
        }
    }
}

/// `v` + `YYYYmmddHHMMSS`; a `-NNN` suffix keeps ids increasing when two
/// versions land in the same second.
fn next_version_id(latest: Option<&VersionRecord>, created_at: DateTime<Utc>) -> String {
    let base = format!("v{}", created_at.format("%Y%m%d%H%M%S"));
    match latest {
        Some(last) if last.id.as_str() >= base.as_str() => {
            let n = last
                .id
                .strip_prefix(&base)
                .and_then(|rest| rest.strip_prefix('-'))
                .and_then(|n| n.parse::<u32>().ok())
                .unwrap_or(0);
            format!("{}-{:03}", base, n + 1)
        }
        _ => base,
    }
}

/// Durable home of a [`VersionStoreState`] plus the local snapshot directory.
#[derive(Debug, Clone)]
pub struct VersionStore {
    path: PathBuf,
    snapshots_dir: PathBuf,
}

impl VersionStore {
    pub fn new(path: impl Into<PathBuf>, snapshots_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            snapshots_dir: snapshots_dir.into(),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.path.clone(), config.snapshots_dir.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshots_dir(&self) -> &Path {
        &self.snapshots_dir
    }

    /// Read the persisted state. A missing file yields an empty state.
    pub fn load(&self) -> Result<VersionStoreState, PersistenceError> {
        let content = match std::fs::read(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(VersionStoreState::default())
            }
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let state: VersionStoreState =
            serde_json::from_slice(&content).map_err(|source| PersistenceError::Malformed {
                path: self.path.clone(),
                source,
            })?;
        Ok(state.keyed_by_identity())
    }

    /// Load the state, starting from empty on any failure.
    ///
    /// A file that exists but cannot be loaded is moved aside to
    /// `<path>.corrupt-<timestamp>` first so the next persist cannot
    /// overwrite it.
    pub fn load_or_recover(&self) -> VersionStoreState {
        let err = match self.load() {
            Ok(state) => return state,
            Err(e) => e,
        };
        let aside = self.path.with_extension(format!(
            "json.corrupt-{}",
            Utc::now().format("%Y%m%d%H%M%S")
        ));
        match std::fs::rename(&self.path, &aside) {
            Ok(()) => tracing::warn!(
                error = %err,
                moved_to = %aside.display(),
                "starting from empty version state"
            ),
            Err(rename_err) => tracing::warn!(
                error = %err,
                rename_error = %rename_err,
                "starting from empty version state; could not move unreadable file aside"
            ),
        }
        VersionStoreState::default()
    }

    /// Atomically replace the persisted state.
    pub fn persist(&self, state: &VersionStoreState) -> Result<(), PersistenceError> {
        let mut json = serde_json::to_string_pretty(state).map_err(PersistenceError::Serialize)?;
        json.push('\n');
        write_atomic(&self.path, |file| file.write_all(json.as_bytes()))
    }

    /// Write a version's bytes to the snapshot directory, returning its path.
    pub fn write_snapshot(&self, key: &str, content: &[u8]) -> Result<PathBuf, PersistenceError> {
        let path = self.snapshots_dir.join(key);
        write_atomic(&path, |file| file.write_all(content))?;
        Ok(path)
    }
}

/// Write `path` via a synced temp file in the same directory, then rename.
pub(crate) fn write_atomic<F>(path: &Path, write: F) -> Result<(), PersistenceError>
where
    F: FnOnce(&mut File) -> std::io::Result<()>,
{
    let io_err = |source| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(io_err)?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
    write(tmp.as_file_mut()).map_err(io_err)?;
    tmp.as_file_mut().flush().map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, s).unwrap()
    }

    fn doc(url: &str, body: &str) -> FetchedDocument {
        FetchedDocument::new(url, body.as_bytes().to_vec())
    }

    fn store(dir: &TempDir) -> VersionStore {
        VersionStore::new(dir.path().join("versions.json"), dir.path().join("versions"))
    }

    #[test]
    fn identical_content_is_not_a_new_version() {
        let mut state = VersionStoreState::default();
        let url = "https://x.test/a.txt";
        assert!(state.record_if_changed(&doc(url, "same"), "a.txt", at(10, 0, 0)));
        let before = state.clone();
        assert!(!state.record_if_changed(&doc(url, "same"), "a.txt", at(11, 0, 0)));
        assert_eq!(state, before);
    }

    #[test]
    fn reverting_content_records_again() {
        let mut state = VersionStoreState::default();
        let url = "https://x.test/a.txt";
        assert!(state.record_if_changed(&doc(url, "A"), "a.txt", at(10, 0, 0)));
        assert!(state.record_if_changed(&doc(url, "B"), "a.txt", at(10, 0, 1)));
        assert!(state.record_if_changed(&doc(url, "A"), "a.txt", at(10, 0, 2)));

        let history = state.history_for_url(url).unwrap();
        assert_eq!(history.versions.len(), 3);
        assert_eq!(history.versions[0].content_hash, history.versions[2].content_hash);
        assert_eq!(history.versions[2].sequence_label, "Version 3 (2026-03-01 10:00)");
    }

    #[test]
    fn ids_increase_within_one_second_and_under_clock_skew() {
        let mut state = VersionStoreState::default();
        let url = "https://x.test/a.txt";
        state.record_if_changed(&doc(url, "1"), "a.txt", at(10, 0, 5));
        state.record_if_changed(&doc(url, "2"), "a.txt", at(10, 0, 5));
        state.record_if_changed(&doc(url, "3"), "a.txt", at(9, 0, 0));
        state.record_if_changed(&doc(url, "4"), "a.txt", at(10, 0, 6));

        let versions = &state.history_for_url(url).unwrap().versions;
        let ids: Vec<&str> = versions.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "v20260301100005",
                "v20260301100005-001",
                "v20260301100005-002",
                "v20260301100006"
            ]
        );
        assert!(versions.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn prepare_leaves_state_untouched() {
        let state = VersionStoreState::default();
        let pending = state
            .prepare(&doc("https://x.test/a.txt", "A"), at(1, 2, 3))
            .unwrap();
        assert!(state.is_empty());
        assert_eq!(pending.id, "v20260301010203");
        assert_eq!(
            pending.snapshot_key(),
            format!("{}-v20260301010203.txt", pending.identity)
        );
    }

    #[test]
    fn commit_rebinds_mismatched_origin() {
        let mut state = VersionStoreState::default();
        let first = doc("https://x.test/a.txt", "A");
        let pending = state.prepare(&first, at(1, 0, 0)).unwrap();
        let identity = pending.identity.clone();
        state.commit(pending, "a.txt", None, None);

        // Simulate a colliding URL by forging a pending version for the same key.
        let mut forged = state
            .prepare(&doc("https://x.test/a.txt", "B"), at(2, 0, 0))
            .unwrap();
        forged.url = "https://other.test/a.txt".to_string();
        state.commit(forged, "a.txt", None, Some("bucket/key".into()));

        let history = state.get(&identity).unwrap();
        assert_eq!(history.origin_url, "https://other.test/a.txt");
        assert_eq!(history.versions.len(), 2);
        assert_eq!(history.versions[1].remote_path.as_deref(), Some("bucket/key"));
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).load().unwrap().is_empty());
    }

    #[test]
    fn persist_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut state = VersionStoreState::default();
        let d = doc("https://x.test/a.txt", "A");
        let pending = state.prepare(&d, at(1, 0, 0)).unwrap();
        state.commit(pending, "a.txt", Some("local".into()), Some("b/k".into()));
        state.record_if_changed(&doc("https://x.test/b.txt", "B"), "b.txt", at(1, 0, 0));

        store.persist(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);
    }

    #[test]
    fn malformed_state_is_an_error_and_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(
            store.load(),
            Err(PersistenceError::Malformed { .. })
        ));

        assert!(store.load_or_recover().is_empty());
        assert!(!store.path().exists());
        let moved = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(moved);
    }

    #[test]
    fn hourly_tracker_state_is_rekeyed_and_kept() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::write(
            store.path(),
            r#"{
  "https_x.test_a.txt": {
    "url": "https://x.test/a.txt",
    "filename": "a.txt",
    "versions": [
      {
        "id": "v2024031509",
        "label": "Version 1 (2024-03-15 09:12)",
        "timestamp": "2024031509",
        "hash": "5d41402abc4b2a76b9719d911017c592",
        "path": "versions/https_x.test_a.txt-v2024031509.txt",
        "supabase_path": "gemini-files/https_x.test_a.txt-v2024031509.txt"
      }
    ]
  }
}"#,
        )
        .unwrap();

        let mut state = store.load().unwrap();
        let history = state.history_for_url("https://x.test/a.txt").unwrap();
        assert_eq!(history.versions.len(), 1);
        assert!(history.versions[0].remote_path.is_some());

        let pending = state
            .prepare(&doc("https://x.test/a.txt", "hello"), at(10, 0, 0))
            .unwrap();
        assert!(pending.sequence_label.starts_with("Version 2 ("));
        state.commit(pending, "a.txt", None, None);
        assert_eq!(state.len(), 1);
        assert_eq!(state.history_for_url("https://x.test/a.txt").unwrap().versions.len(), 2);
    }

    #[test]
    fn non_utf8_state_is_moved_aside_with_its_bytes() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::write(store.path(), [0xff]).unwrap();
        assert!(matches!(
            store.load(),
            Err(PersistenceError::Malformed { .. })
        ));

        let state = store.load_or_recover();
        assert!(state.is_empty());
        assert!(!store.path().exists());
        let aside = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .find(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .expect("moved aside");
        assert_eq!(std::fs::read(aside.path()).unwrap(), vec![0xff]);

        store.persist(&state).unwrap();
        assert_eq!(std::fs::read(aside.path()).unwrap(), vec![0xff]);
    }

    #[test]
    fn interrupted_write_keeps_previous_state() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut state = VersionStoreState::default();
        state.record_if_changed(&doc("https://x.test/a.txt", "A"), "a.txt", at(1, 0, 0));
        store.persist(&state).unwrap();
        let before = std::fs::read_to_string(store.path()).unwrap();

        let result = write_atomic(store.path(), |file| {
            file.write_all(b"{\"truncated\":")?;
            Err(std::io::Error::other("crash"))
        });
        assert!(result.is_err());

        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
        assert_eq!(store.load().unwrap(), state);
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1, "temp file should be cleaned up");
    }

    #[test]
    fn snapshot_is_written_under_snapshots_dir() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let path = store.write_snapshot("k-v1.txt", b"hello").unwrap();
        assert_eq!(path, dir.path().join("versions").join("k-v1.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }
}
