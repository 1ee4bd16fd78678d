//! Candidate URL extraction from a rendered page.
//!
//! Two inputs feed the result set:
//!
//! 1. **Rendered HTML**: scanned with a permissive regex for anything shaped
//!    like an absolute `http(s)` URL (attribute values, inline scripts, JSON
//!    blobs with escaped slashes).
//! 2. **Resource entries**: URLs the browser reports as loaded (the
//!    resource-timing list). Non-`http(s)` entries such as `data:` or
//!    `blob:` are dropped.
//!
//! A candidate is kept when it contains the source's pattern as a plain
//! substring. No reachability or content-type checks happen here.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::config::strip_scheme;

fn url_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s"'<>()\\`{}|^\[\]]+"#).expect("valid regex"))
}

/// Extract the deduplicated set of absolute URLs containing `pattern`.
pub fn extract_urls(html: &str, resource_entries: &[String], pattern: &str) -> BTreeSet<String> {
    let pattern = strip_scheme(pattern);
    let mut found = BTreeSet::new();

    // Inline JSON often carries `https:\/\/cdn...`.
    let unescaped = html.replace("\\/", "/");
    for m in url_token_regex().find_iter(&unescaped) {
        let candidate = clean_token(m.as_str());
        if is_absolute_http(&candidate) && candidate.contains(pattern) {
            found.insert(candidate);
        }
    }

    for entry in resource_entries {
        let entry = entry.trim();
        if is_absolute_http(entry) && entry.contains(pattern) {
            found.insert(entry.to_string());
        }
    }

    found
}

/// Strip HTML entity noise and trailing punctuation picked up by the scan.
fn clean_token(token: &str) -> String {
    token
        .replace("&amp;", "&")
        .trim_end_matches(['.', ',', ';', ':', '!', '?'])
        .to_string()
}

fn is_absolute_http(s: &str) -> bool {
    let rest = match s
        .strip_prefix("https://")
        .or_else(|| s.strip_prefix("http://"))
    {
        Some(rest) => rest,
        None => return false,
    };
    rest.split('/').next().is_some_and(|host| !host.is_empty())
}
