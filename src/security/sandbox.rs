//! Filesystem sandbox — canonicalizing path validation against a fixed root.
//!
//! Every caller-supplied path must resolve (symlinks and `..` eliminated)
//! to the sandbox root or a descendant of it before any file operation runs.
//! Containment is decided component-wise on the canonical forms, never by
//! string prefix matching on the raw input. Any resolution failure denies
//! the path: the sandbox fails closed.

use regex::Regex;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::error::GateError;

/// Sensitive filename patterns denied even inside the sandbox.
///
/// Matched case-insensitively against the canonical path. The first column is
/// the stable pattern name reported in [`GateError::BlockedFilePattern`].
const BLOCKED_FILE_PATTERNS: &[(&str, &str)] = &[
    ("env-file", r"\.env$"),
    ("env-file", r"\.env\."),
    ("ssh-private-key", r"id_rsa"),
    ("ssh-private-key", r"id_ed25519"),
    ("certificate", r"\.pem$"),
    ("key-file", r"\.key$"),
    ("ssh-dir", r"[/\\]\.ssh([/\\]|$)"),
    ("credential-file", r"credentials"),
    ("secrets-file", r"secrets?\.(json|ya?ml)"),
    ("git-config", r"\.git[/\\]config$"),
];

fn blocked_file_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        BLOCKED_FILE_PATTERNS
            .iter()
            .map(|(name, pattern)| (*name, Regex::new(&format!("(?i){pattern}")).unwrap()))
            .collect()
    })
}

/// Validates caller-supplied paths against one immutable root directory.
///
/// The root is canonicalized once at construction and never changes for the
/// process lifetime; relocating the sandbox requires a restart.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    /// Create a sandbox rooted at `root`. The directory must exist.
    pub fn new(root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let root = root.as_ref();
        let canonical = root
            .canonicalize()
            .map_err(|e| anyhow::anyhow!("sandbox root {} is not usable: {e}", root.display()))?;
        anyhow::ensure!(
            canonical.is_dir(),
            "sandbox root {} is not a directory",
            canonical.display()
        );
        Ok(Self { root: canonical })
    }

    /// The canonical sandbox root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a candidate path and check it stays inside the sandbox.
    ///
    /// Relative candidates are joined onto the root. Returns the canonical
    /// absolute path on success. Denies (fails closed) when:
    /// - the candidate contains a null byte,
    /// - canonicalization fails (dangling symlink, permission error,
    ///   `..` through a nonexistent component),
    /// - the canonical result is not the root or a descendant of it,
    /// - the canonical path matches a protected-file pattern.
    pub fn resolve(&self, candidate: &str) -> Result<PathBuf, GateError> {
        let violation = || GateError::SandboxViolation {
            attempted: candidate.to_string(),
        };

        // Null bytes can truncate paths in C-backed syscalls.
        if candidate.contains('\0') || candidate.is_empty() {
            return Err(violation());
        }

        let requested = Path::new(candidate);
        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            self.root.join(requested)
        };

        let canonical = canonicalize_allowing_new_leaf(&joined).map_err(|_| violation())?;

        if !canonical.starts_with(&self.root) {
            return Err(violation());
        }

        let shown = canonical.to_string_lossy();
        for (name, pattern) in blocked_file_patterns() {
            if pattern.is_match(&shown) {
                return Err(GateError::BlockedFilePattern {
                    pattern: (*name).to_string(),
                });
            }
        }

        Ok(canonical)
    }
}

/// Canonicalize a path whose final components may not exist yet (a file or
/// directory about to be created).
///
/// The longest existing ancestor is canonicalized through the filesystem;
/// the missing suffix is re-appended verbatim. A missing suffix that cannot
/// be decomposed into plain names (`..`, bare root) is refused — lexically
/// collapsing `..` across unresolved symlinks would be unsound. Existence is
/// probed without following symlinks so a dangling link is still handed to
/// `canonicalize`, which rejects it.
fn canonicalize_allowing_new_leaf(path: &Path) -> io::Result<PathBuf> {
    match path.canonicalize() {
        Ok(resolved) => Ok(resolved),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let mut base = path.to_path_buf();
            let mut missing: Vec<OsString> = Vec::new();
            while base.symlink_metadata().is_err() {
                let Some(name) = base.file_name().map(OsString::from) else {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        "unresolvable path component",
                    ));
                };
                missing.push(name);
                if !base.pop() {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        "no existing ancestor",
                    ));
                }
            }
            let mut resolved = base.canonicalize()?;
            for name in missing.iter().rev() {
                resolved.push(name);
            }
            Ok(resolved)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sandbox() -> (TempDir, PathSandbox) {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("project")).unwrap();
        fs::write(tmp.path().join("project/readme.md"), "hi").unwrap();
        let sandbox = PathSandbox::new(tmp.path()).unwrap();
        (tmp, sandbox)
    }

    #[test]
    fn relative_path_inside_is_allowed() {
        let (tmp, sb) = sandbox();
        let resolved = sb.resolve("project/readme.md").unwrap();
        assert_eq!(
            resolved,
            tmp.path().canonicalize().unwrap().join("project/readme.md")
        );
    }

    #[test]
    fn root_itself_is_allowed() {
        let (_tmp, sb) = sandbox();
        let resolved = sb.resolve(".").unwrap();
        assert_eq!(resolved, sb.root());
    }

    #[test]
    fn trailing_separator_is_normalized() {
        let (_tmp, sb) = sandbox();
        assert!(sb.resolve("project/").is_ok());
    }

    #[test]
    fn dot_dot_escape_is_denied() {
        let (_tmp, sb) = sandbox();
        let err = sb.resolve("../../../etc/passwd").unwrap_err();
        assert!(matches!(err, GateError::SandboxViolation { .. }));
    }

    #[test]
    fn dot_dot_that_stays_inside_is_allowed() {
        let (_tmp, sb) = sandbox();
        assert!(sb.resolve("project/../project/readme.md").is_ok());
    }

    #[test]
    fn absolute_path_outside_is_denied() {
        let (_tmp, sb) = sandbox();
        let err = sb.resolve("/etc/passwd").unwrap_err();
        assert!(matches!(err, GateError::SandboxViolation { .. }));
    }

    #[test]
    fn absolute_path_inside_is_allowed() {
        let (tmp, sb) = sandbox();
        let inside = tmp.path().join("project/readme.md");
        assert!(sb.resolve(inside.to_str().unwrap()).is_ok());
    }

    #[test]
    fn new_file_in_existing_dir_is_allowed() {
        let (_tmp, sb) = sandbox();
        let resolved = sb.resolve("project/new_file.rs").unwrap();
        assert!(resolved.starts_with(sb.root()));
    }

    #[test]
    fn new_nested_dirs_are_allowed() {
        let (_tmp, sb) = sandbox();
        assert!(sb.resolve("project/a/b/c").is_ok());
    }

    #[test]
    fn dot_dot_through_missing_component_is_denied() {
        let (_tmp, sb) = sandbox();
        // `missing` does not exist, so `..` after it cannot be resolved
        // against the filesystem. Fail closed.
        assert!(sb.resolve("missing/../project").is_err());
    }

    #[test]
    fn empty_and_null_byte_candidates_are_denied() {
        let (_tmp, sb) = sandbox();
        assert!(sb.resolve("").is_err());
        assert!(sb.resolve("project/evil\0.txt").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_sandbox_is_denied() {
        let (tmp, sb) = sandbox();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("target.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("target.txt"),
            tmp.path().join("escape.txt"),
        )
        .unwrap();
        let err = sb.resolve("escape.txt").unwrap_err();
        assert!(matches!(err, GateError::SandboxViolation { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_inside_sandbox_is_allowed() {
        let (tmp, sb) = sandbox();
        std::os::unix::fs::symlink(
            tmp.path().join("project/readme.md"),
            tmp.path().join("alias.md"),
        )
        .unwrap();
        let resolved = sb.resolve("alias.md").unwrap();
        assert!(resolved.ends_with("project/readme.md"));
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_is_denied() {
        let (tmp, sb) = sandbox();
        std::os::unix::fs::symlink("/nonexistent/target", tmp.path().join("dangling")).unwrap();
        assert!(sb.resolve("dangling").is_err());
        // Writing "through" the dangling link must also be refused.
        assert!(sb.resolve("dangling/file.txt").is_err());
    }

    #[test]
    fn env_file_inside_sandbox_is_blocked() {
        let (tmp, sb) = sandbox();
        fs::write(tmp.path().join(".env"), "TOKEN=x").unwrap();
        let err = sb.resolve(".env").unwrap_err();
        assert!(matches!(err, GateError::BlockedFilePattern { .. }));
        // Variants like .env.local are covered too.
        assert!(matches!(
            sb.resolve(".env.production").unwrap_err(),
            GateError::BlockedFilePattern { .. }
        ));
    }

    #[test]
    fn ssh_key_inside_sandbox_is_blocked() {
        let (tmp, sb) = sandbox();
        fs::create_dir(tmp.path().join(".ssh")).unwrap();
        fs::write(tmp.path().join(".ssh/id_rsa"), "key").unwrap();
        let err = sb.resolve(".ssh/id_rsa").unwrap_err();
        assert!(matches!(err, GateError::BlockedFilePattern { .. }));
    }

    #[test]
    fn other_sensitive_names_are_blocked() {
        let (_tmp, sb) = sandbox();
        for candidate in [
            "server.pem",
            "signing.key",
            "credentials",
            "secrets.json",
            "secrets.yaml",
            ".git/config",
        ] {
            let err = sb.resolve(candidate).unwrap_err();
            assert!(
                matches!(err, GateError::BlockedFilePattern { .. }),
                "{candidate} should be blocked"
            );
        }
    }

    #[test]
    fn blocked_patterns_are_case_insensitive() {
        let (_tmp, sb) = sandbox();
        assert!(matches!(
            sb.resolve("ID_RSA.backup").unwrap_err(),
            GateError::BlockedFilePattern { .. }
        ));
    }

    #[test]
    fn missing_root_is_rejected_at_construction() {
        assert!(PathSandbox::new("/nonexistent/sandbox/root").is_err());
    }
}
