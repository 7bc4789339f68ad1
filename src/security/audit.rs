//! Append-only audit log with redaction.
//!
//! One JSON record per line: `{timestamp, identity, action, outcome, detail}`.
//! The detail field is redacted before it is ever written: the configured
//! secret becomes `[REDACTED]`, absolute paths outside the sandbox become
//! `[OUTSIDE_SANDBOX]`, line breaks are stripped (log injection) and the
//! whole thing is length-capped. A logging failure degrades to a warning —
//! it never blocks a security decision that has already been made.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::util::truncate_with_ellipsis;

/// Detail fields longer than this are truncated before writing.
const MAX_DETAIL_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Allowed,
    Denied,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allowed => f.write_str("allowed"),
            Self::Denied => f.write_str("denied"),
        }
    }
}

/// One audit record. `detail` is stored pre-redacted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub identity: i64,
    pub action: String,
    pub outcome: AuditOutcome,
    pub detail: String,
}

/// Append-only structured logger. `path: None` disables persistence but
/// keeps the tracing side channel.
#[derive(Debug)]
pub struct AuditLogger {
    path: Option<PathBuf>,
    secrets: Vec<String>,
    sandbox_root: Option<PathBuf>,
    io_lock: Mutex<()>,
}

impl AuditLogger {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            secrets: Vec::new(),
            sandbox_root: None,
            io_lock: Mutex::new(()),
        }
    }

    /// Register a secret value to scrub from every detail field.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.secrets.push(secret);
        }
        self
    }

    /// Absolute paths outside this root are scrubbed from detail fields.
    pub fn with_sandbox_root(mut self, root: &Path) -> Self {
        self.sandbox_root = Some(root.to_path_buf());
        self
    }

    /// Append one record. Best-effort: I/O errors are logged and swallowed.
    pub fn record(&self, identity: i64, action: &str, outcome: AuditOutcome, detail: &str) {
        let entry = AuditEntry {
            timestamp: Utc::now().to_rfc3339(),
            identity,
            action: action.to_string(),
            outcome,
            detail: self.redact(detail),
        };

        match outcome {
            AuditOutcome::Denied => {
                tracing::warn!(identity, action, detail = %entry.detail, "request denied");
            }
            AuditOutcome::Allowed => {
                tracing::debug!(identity, action, "request allowed");
            }
        }

        let Some(path) = &self.path else { return };
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("audit entry serialization failed: {e}");
                return;
            }
        };

        let _guard = self.io_lock.lock();
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(e) = result {
            tracing::warn!("audit log write failed: {e}");
        }
    }

    /// The last `n` raw log lines, oldest first.
    pub fn tail(&self, n: usize) -> anyhow::Result<Vec<String>> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)?;
        let lines: Vec<String> = content.lines().map(str::to_string).collect();
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..].to_vec())
    }

    fn redact(&self, detail: &str) -> String {
        let mut scrubbed = detail.replace(['\n', '\r'], " ");
        for secret in &self.secrets {
            scrubbed = scrubbed.replace(secret, "[REDACTED]");
        }

        // Scrub absolute path tokens that point outside the sandbox. The
        // candidate that triggered a denial is exactly such a token.
        if let Some(root) = &self.sandbox_root {
            scrubbed = scrubbed
                .split(' ')
                .map(|token| {
                    if is_absolute_token(token) && !Path::new(token).starts_with(root) {
                        "[OUTSIDE_SANDBOX]"
                    } else {
                        token
                    }
                })
                .collect::<Vec<_>>()
                .join(" ");
        }

        truncate_with_ellipsis(&scrubbed, MAX_DETAIL_CHARS)
    }
}

fn is_absolute_token(token: &str) -> bool {
    let trimmed = token.trim_matches(|c: char| matches!(c, '"' | '\'' | ':' | ',' | ';'));
    Path::new(trimmed).is_absolute()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn logger(tmp: &TempDir) -> (PathBuf, AuditLogger) {
        let path = tmp.path().join("audit.log");
        let logger = AuditLogger::new(Some(path.clone()))
            .with_secret("123456789:AAF0super-secret-token-value-here-xx")
            .with_sandbox_root(Path::new("/work/sandbox"));
        (path, logger)
    }

    #[test]
    fn records_are_appended_one_json_per_line() {
        let tmp = TempDir::new().unwrap();
        let (path, logger) = logger(&tmp);

        logger.record(42, "command", AuditOutcome::Allowed, "git status");
        logger.record(42, "path", AuditOutcome::Denied, "escape attempt");

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: AuditEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.identity, 42);
        assert_eq!(first.outcome, AuditOutcome::Allowed);
        let second: AuditEntry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.outcome, AuditOutcome::Denied);
    }

    #[test]
    fn prior_entries_are_never_rewritten() {
        let tmp = TempDir::new().unwrap();
        let (path, logger) = logger(&tmp);

        logger.record(1, "command", AuditOutcome::Allowed, "first");
        let after_first = std::fs::read_to_string(&path).unwrap();
        logger.record(1, "command", AuditOutcome::Allowed, "second");
        let after_second = std::fs::read_to_string(&path).unwrap();

        assert!(after_second.starts_with(&after_first));
    }

    #[test]
    fn secret_is_scrubbed_from_detail() {
        let tmp = TempDir::new().unwrap();
        let (path, logger) = logger(&tmp);

        logger.record(
            1,
            "prompt",
            AuditOutcome::Denied,
            "tried to echo 123456789:AAF0super-secret-token-value-here-xx somewhere",
        );

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("super-secret-token-value"));
        assert!(content.contains("[REDACTED]"));
    }

    #[test]
    fn outside_sandbox_paths_are_scrubbed() {
        let tmp = TempDir::new().unwrap();
        let (path, logger) = logger(&tmp);

        logger.record(1, "path", AuditOutcome::Denied, "requested /etc/passwd");
        logger.record(
            1,
            "path",
            AuditOutcome::Allowed,
            "resolved /work/sandbox/src/main.rs",
        );

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("/etc/passwd"));
        assert!(content.contains("[OUTSIDE_SANDBOX]"));
        // Paths inside the sandbox survive for forensics.
        assert!(content.contains("/work/sandbox/src/main.rs"));
    }

    #[test]
    fn newlines_cannot_forge_entries() {
        let tmp = TempDir::new().unwrap();
        let (path, logger) = logger(&tmp);

        logger.record(
            1,
            "prompt",
            AuditOutcome::Denied,
            "line one\n{\"timestamp\":\"forged\"}",
        );

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn long_details_are_truncated() {
        let tmp = TempDir::new().unwrap();
        let (path, logger) = logger(&tmp);

        logger.record(1, "prompt", AuditOutcome::Denied, &"x".repeat(5000));

        let content = std::fs::read_to_string(&path).unwrap();
        let entry: AuditEntry = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert!(entry.detail.chars().count() <= MAX_DETAIL_CHARS + 3);
    }

    #[test]
    fn disabled_logger_writes_nothing_and_never_panics() {
        let logger = AuditLogger::new(None).with_secret("s3cret");
        logger.record(1, "command", AuditOutcome::Denied, "anything");
        assert!(logger.tail(10).unwrap().is_empty());
    }

    #[test]
    fn unwritable_path_degrades_to_warning() {
        let logger = AuditLogger::new(Some(PathBuf::from("/nonexistent/dir/audit.log")));
        // Must not panic or error out.
        logger.record(1, "command", AuditOutcome::Denied, "detail");
    }

    #[test]
    fn tail_returns_last_n_lines() {
        let tmp = TempDir::new().unwrap();
        let (_path, logger) = logger(&tmp);

        for i in 0..10 {
            logger.record(1, "command", AuditOutcome::Allowed, &format!("entry {i}"));
        }
        let tail = logger.tail(3).unwrap();
        assert_eq!(tail.len(), 3);
        assert!(tail[2].contains("entry 9"));
    }
}
