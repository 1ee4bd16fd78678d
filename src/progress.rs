//! Check progress reporting.
//!
//! Reports observable progress during `ftrack check` so operators see which
//! source is being rendered and how many URLs are left to fetch. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a check run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckProgressEvent {
    /// A dynamic source is being rendered. Total unknown.
    Discovering { source: String },
    /// Discovery finished for a source.
    Discovered { source: String, found: u64 },
    /// URL fetching: n URLs processed out of total.
    Checking { n: u64, total: u64 },
}

/// Reports check progress. Implementations write to stderr (human or JSON).
pub trait CheckProgressReporter: Send + Sync {
    fn report(&self, event: CheckProgressEvent);
}

/// Human-friendly progress on stderr: "check  fetching  12 / 40 urls".
pub struct StderrProgress;

impl CheckProgressReporter for StderrProgress {
    fn report(&self, event: CheckProgressEvent) {
        let line = match &event {
            CheckProgressEvent::Discovering { source } => {
                format!("discover {}  rendering...\n", source)
            }
            CheckProgressEvent::Discovered { source, found } => {
                format!("discover {}  found {} urls\n", source, format_number(*found))
            }
            CheckProgressEvent::Checking { n, total } => {
                format!(
                    "check  fetching  {} / {} urls\n",
                    format_number(*n),
                    format_number(*total)
                )
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl CheckProgressReporter for JsonProgress {
    fn report(&self, event: CheckProgressEvent) {
        let obj = match &event {
            CheckProgressEvent::Discovering { source } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "discovering"
            }),
            CheckProgressEvent::Discovered { source, found } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "discovered",
                "found": found
            }),
            CheckProgressEvent::Checking { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "checking",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl CheckProgressReporter for NoProgress {
    fn report(&self, _event: CheckProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Parse a `--progress` value; `None` falls back to the TTY default.
    pub fn from_flag(flag: Option<&str>) -> Result<Self, String> {
        match flag {
            None => Ok(Self::default_for_tty()),
            Some("off") => Ok(ProgressMode::Off),
            Some("human") => Ok(ProgressMode::Human),
            Some("json") => Ok(ProgressMode::Json),
            Some(other) => Err(format!(
                "invalid progress mode '{}': expected human, json, or off",
                other
            )),
        }
    }

    pub fn reporter(&self) -> Box<dyn CheckProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn progress_flag_parsing() {
        assert_eq!(ProgressMode::from_flag(Some("json")), Ok(ProgressMode::Json));
        assert_eq!(ProgressMode::from_flag(Some("off")), Ok(ProgressMode::Off));
        assert!(ProgressMode::from_flag(Some("loud")).is_err());
    }
}
