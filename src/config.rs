use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub upload: Option<UploadConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_snapshots_dir")]
    pub snapshots_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            snapshots_dir: default_snapshots_dir(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/versions.json")
}
fn default_snapshots_dir() -> PathBuf {
    PathBuf::from("./data/versions")
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            user_agent: default_user_agent(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("feature-tracker/{}", env!("CARGO_PKG_VERSION"))
}
fn default_max_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,
    #[serde(default = "default_page_load_timeout_secs")]
    pub page_load_timeout_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub challenge_probe_timeout_secs: u64,
    #[serde(default = "default_settle_secs")]
    pub challenge_settle_secs: u64,
    #[serde(default)]
    pub chromium_path: Option<PathBuf>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            wait_secs: default_wait_secs(),
            page_load_timeout_secs: default_page_load_timeout_secs(),
            challenge_probe_timeout_secs: default_probe_timeout_secs(),
            challenge_settle_secs: default_settle_secs(),
            chromium_path: None,
        }
    }
}

fn default_wait_secs() -> u64 {
    10
}
fn default_page_load_timeout_secs() -> u64 {
    60
}
fn default_probe_timeout_secs() -> u64 {
    5
}
fn default_settle_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    /// Static, directly fetchable URLs.
    #[serde(default)]
    pub urls: Vec<String>,
    /// Dynamic sources keyed by name.
    #[serde(default)]
    pub dynamic: BTreeMap<String, DynamicSourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DynamicSourceConfig {
    pub url: String,
    pub pattern: String,
    #[serde(default)]
    pub requires_challenge_handling: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum UploadConfig {
    Supabase(SupabaseUploadConfig),
    S3(S3UploadConfig),
}

#[derive(Debug, Deserialize, Clone)]
pub struct SupabaseUploadConfig {
    pub url: String,
    #[serde(default = "default_supabase_bucket")]
    pub bucket: String,
    /// Falls back to the `SUPABASE_KEY` environment variable.
    #[serde(default)]
    pub key: Option<String>,
}

fn default_supabase_bucket() -> String {
    "gemini-files".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3UploadConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

pub const EXAMPLE_CONFIG: &str = r#"# feature-tracker configuration

[store]
path = "./data/versions.json"
snapshots_dir = "./data/versions"

[fetch]
timeout_secs = 30
max_concurrency = 4

[discovery]
wait_secs = 10
page_load_timeout_secs = 60

[sources]
urls = [
    "https://example.com/file1.txt",
    "https://example.com/file2.json",
]

# [sources.dynamic.app]
# url = "https://example.com/app"
# pattern = "cdn.example.com/static/"
# requires_challenge_handling = false

# [upload]
# backend = "supabase"
# url = "https://your-project-url.supabase.co"
# bucket = "your-bucket-name"
# key is read from SUPABASE_KEY when omitted
"#;

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.fetch.timeout_secs == 0 {
        bail!("fetch.timeout_secs must be > 0");
    }
    if config.fetch.max_concurrency == 0 {
        bail!("fetch.max_concurrency must be >= 1");
    }
    if config.discovery.page_load_timeout_secs == 0 {
        bail!("discovery.page_load_timeout_secs must be > 0");
    }

    for url in &config.sources.urls {
        if !is_http_url(url) {
            bail!("sources.urls entry is not an http(s) URL: '{}'", url);
        }
    }

    for (name, source) in config.sources.dynamic.iter_mut() {
        if !is_http_url(&source.url) {
            bail!("sources.dynamic.{}.url is not an http(s) URL", name);
        }
        source.pattern = strip_scheme(source.pattern.trim()).to_string();
        if source.pattern.is_empty() {
            bail!("sources.dynamic.{}.pattern must not be empty", name);
        }
    }

    if let Some(UploadConfig::Supabase(ref s)) = config.upload {
        if s.bucket.is_empty() {
            bail!("upload.bucket must not be empty");
        }
    }

    Ok(config)
}

/// Write the example config to `path` unless a file already exists there.
/// Returns whether a file was written.
pub fn write_example_config(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, EXAMPLE_CONFIG)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(true)
}

pub fn strip_scheme(s: &str) -> &str {
    s.strip_prefix("https://")
        .or_else(|| s.strip_prefix("http://"))
        .unwrap_or(s)
}

fn is_http_url(s: &str) -> bool {
    (s.starts_with("http://") || s.starts_with("https://")) && !strip_scheme(s).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("ftrack.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn defaults_apply_to_minimal_config() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "[sources]\nurls = [\"https://x.test/a.txt\"]\n");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.fetch.timeout_secs, 30);
        assert_eq!(cfg.discovery.page_load_timeout_secs, 60);
        assert_eq!(cfg.store.path, PathBuf::from("./data/versions.json"));
        assert!(cfg.upload.is_none());
    }

    #[test]
    fn dynamic_pattern_scheme_is_stripped() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"
[sources.dynamic.app]
url = "https://app.test/"
pattern = "https://cdn.example/"
requires_challenge_handling = true
"#,
        );
        let cfg = load_config(&path).unwrap();
        let app = &cfg.sources.dynamic["app"];
        assert_eq!(app.pattern, "cdn.example/");
        assert!(app.requires_challenge_handling);
    }

    #[test]
    fn rejects_empty_pattern_and_bad_urls() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "[sources.dynamic.app]\nurl = \"https://app.test\"\npattern = \"\"\n",
        );
        assert!(load_config(&path).is_err());

        let path = write(&dir, "[sources]\nurls = [\"ftp://x.test/a\"]\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn upload_backend_is_tagged() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "[upload]\nbackend = \"supabase\"\nurl = \"https://p.supabase.co\"\n",
        );
        match load_config(&path).unwrap().upload {
            Some(UploadConfig::Supabase(s)) => assert_eq!(s.bucket, "gemini-files"),
            other => panic!("unexpected upload config: {:?}", other),
        }
    }

    #[test]
    fn example_config_parses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg").join("ftrack.toml");
        assert!(write_example_config(&path).unwrap());
        assert!(!write_example_config(&path).unwrap());
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.sources.urls.len(), 2);
    }
}
