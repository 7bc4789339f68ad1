//! Command policy — executable allow-list and argument hygiene.
//!
//! Commands are always spawned without a shell, but arguments are still
//! scanned for shell metacharacters: an argument that survives here may later
//! be echoed into logs, prompts, or another subprocess, so the scan is
//! defense-in-depth rather than the primary barrier.

use std::collections::BTreeMap;

use super::error::GateError;

/// Default executable allow-list: version control, the IDE launchers, and
/// the handful of read/scaffold utilities the gateway exposes.
pub const DEFAULT_ALLOWED_PROGRAMS: &[&str] =
    &["git", "cursor", "cursor-agent", "code", "mkdir", "ls", "cat"];

/// Metacharacters that deny an argument outright, with the label reported
/// in the denial.
const ARG_METACHARACTERS: &[(&str, &str)] = &[
    ("&&", "command chaining"),
    ("||", "or chaining"),
    (";", "command separator"),
    ("|", "pipe"),
    ("`", "backtick execution"),
    ("$(", "command substitution"),
    ("${", "variable expansion"),
    (">", "output redirect"),
    ("<", "input redirect"),
    ("\n", "newline"),
    ("\r", "carriage return"),
    ("\0", "null byte"),
];

/// Environment variables a spawned subprocess may inherit. Everything else
/// is dropped; secrets never cross the process boundary by accident.
const BASE_ENV_ALLOWLIST: &[&str] = &[
    "PATH",
    "PATHEXT",
    "HOME",
    "USER",
    "USERNAME",
    "SHELL",
    "LANG",
    "LC_ALL",
    "LC_CTYPE",
    "TERM",
    "COLORTERM",
    "EDITOR",
    "VISUAL",
    "PAGER",
    "DISPLAY",
    "XDG_RUNTIME_DIR",
    "XDG_CONFIG_HOME",
    "XDG_DATA_HOME",
    "TEMP",
    "TMP",
    "TMPDIR",
    "SYSTEMROOT",
    "WINDIR",
    "COMSPEC",
    "HOMEDRIVE",
    "HOMEPATH",
    "USERPROFILE",
    "APPDATA",
    "LOCALAPPDATA",
    "OS",
    "COMPUTERNAME",
    // Git-specific
    "GIT_EXEC_PATH",
    "GIT_TEMPLATE_DIR",
    "GIT_SSL_CAINFO",
    "GIT_AUTHOR_NAME",
    "GIT_AUTHOR_EMAIL",
    "GIT_COMMITTER_NAME",
    "GIT_COMMITTER_EMAIL",
];

/// Allow-list gate for subprocess execution.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    allowed: Vec<String>,
    env_passthrough: Vec<String>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_ALLOWED_PROGRAMS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            Vec::new(),
        )
    }
}

impl CommandPolicy {
    pub fn new(allowed: Vec<String>, env_passthrough: Vec<String>) -> Self {
        Self {
            allowed,
            env_passthrough,
        }
    }

    /// Validate an executable name plus its argument list.
    ///
    /// The executable is matched by basename, case-insensitively, with a
    /// trailing `.exe` stripped. Any metacharacter hit in any argument denies
    /// the whole command regardless of position.
    pub fn check(&self, program: &str, args: &[String]) -> Result<(), GateError> {
        let base = normalized_program(program);
        if base.is_empty() {
            return Err(GateError::CommandNotAllowed {
                what: "empty executable name".to_string(),
            });
        }

        if !self.allowed.iter().any(|a| a.eq_ignore_ascii_case(&base)) {
            return Err(GateError::CommandNotAllowed {
                what: format!("executable '{base}' is not on the allow-list"),
            });
        }

        for arg in args {
            if let Some(label) = find_metacharacter(arg) {
                return Err(GateError::CommandNotAllowed {
                    what: format!("argument contains {label}"),
                });
            }
        }

        self.check_program_specific(&base, args)
    }

    /// Per-program argument gates that would otherwise allow sub-command
    /// execution through an allow-listed binary.
    fn check_program_specific(&self, base: &str, args: &[String]) -> Result<(), GateError> {
        if base == "git" {
            // `git config`, `git -c` and alias manipulation can rewrite
            // core.editor or aliases into arbitrary commands.
            for arg in args {
                let lower = arg.to_ascii_lowercase();
                if lower == "config"
                    || lower.starts_with("config.")
                    || lower == "-c"
                    || lower == "alias"
                    || lower.starts_with("alias.")
                {
                    return Err(GateError::CommandNotAllowed {
                        what: format!("git argument '{arg}' is not permitted"),
                    });
                }
            }
        }
        Ok(())
    }

    /// The explicit allow-listed subset of the current environment handed to
    /// any subprocess the gateway spawns. Sorted for deterministic spawning.
    pub fn safe_env(&self) -> BTreeMap<String, String> {
        std::env::vars()
            .filter(|(name, _)| {
                BASE_ENV_ALLOWLIST.contains(&name.as_str())
                    || self.env_passthrough.iter().any(|p| p == name)
            })
            .collect()
    }
}

/// Basename of the executable, lowercased, with a trailing `.exe` removed.
fn normalized_program(program: &str) -> String {
    let base = program
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    base.strip_suffix(".exe").unwrap_or(&base).to_string()
}

/// First metacharacter label found in `arg`, if any.
fn find_metacharacter(arg: &str) -> Option<&'static str> {
    ARG_METACHARACTERS
        .iter()
        .find(|(token, _)| arg.contains(token))
        .map(|(_, label)| *label)
}
