//! Gateway configuration, loaded from `config.toml`.
//!
//! Resolution order for the config directory: `DEVGATE_CONFIG_DIR` env →
//! `~/.devgate`. The secret itself never lives here — the vault owns it;
//! this file carries only policy: the owner identity, sandbox roots, the
//! command allow-list and the rate thresholds.

use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::security::vault::BackendPreference;
use crate::security::DEFAULT_ALLOWED_PROGRAMS;

/// Upper bound on configured sandbox roots.
pub const MAX_SANDBOX_ROOTS: usize = 10;

const CONFIG_FILE: &str = "config.toml";
const AUDIT_FILE: &str = "audit.log";

fn default_true() -> bool {
    true
}

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Directory holding config.toml, the vault and the audit log — computed,
    /// not serialized.
    #[serde(skip)]
    pub config_dir: PathBuf,
    /// Path to config.toml — computed, not serialized.
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Owner identity (`[gateway]`).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Sandbox roots (`[sandbox]`).
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Command allow-list and subprocess environment (`[commands]`).
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Request and auth-failure thresholds (`[rate_limit]`).
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Prompt scanning behavior (`[prompt_guard]`).
    #[serde(default)]
    pub prompt_guard: PromptGuardConfig,

    /// Vault backend selection (`[secrets]`).
    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Audit log location (`[audit]`).
    #[serde(default)]
    pub audit: AuditConfig,
}

/// The single authorized principal. `0` means "not configured yet".
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct GatewayConfig {
    /// Numeric identity of the only user the gateway answers to.
    #[serde(default)]
    pub allowed_user_id: i64,
}

/// Configured sandbox roots. The active root is resolved once at startup
/// and is immutable for the process lifetime; switching requires a restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SandboxConfig {
    /// Absolute directories file operations may resolve into (max 10).
    #[serde(default)]
    pub roots: Vec<String>,
    /// Index of the active root.
    #[serde(default)]
    pub active: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CommandsConfig {
    /// Executable names permitted for subprocess execution.
    #[serde(default = "default_allowed_commands")]
    pub allowed: Vec<String>,
    /// Extra environment variable names passed through to subprocesses, on
    /// top of the built-in safe baseline.
    #[serde(default)]
    pub env_passthrough: Vec<String>,
}

fn default_allowed_commands() -> Vec<String> {
    DEFAULT_ALLOWED_PROGRAMS
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            allowed: default_allowed_commands(),
            env_passthrough: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RateLimitConfig {
    /// Command budget per rolling minute.
    #[serde(default = "default_max_commands")]
    pub max_commands_per_minute: u32,
    /// Auth failures per rolling minute before lockout.
    #[serde(default = "default_max_auth_failures")]
    pub max_auth_failures_per_minute: u32,
    /// Lockout duration in seconds once the failure threshold is hit.
    #[serde(default = "default_lockout_secs")]
    pub lockout_secs: u64,
}

fn default_max_commands() -> u32 {
    30
}

fn default_max_auth_failures() -> u32 {
    5
}

fn default_lockout_secs() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_commands_per_minute: default_max_commands(),
            max_auth_failures_per_minute: default_max_auth_failures(),
            lockout_secs: default_lockout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PromptGuardConfig {
    /// Block prompts on the first matched rule. Disabling this only changes
    /// what collaborators may do with the verdict; the gate still denies.
    #[serde(default = "default_true")]
    pub strict: bool,
}

impl Default for PromptGuardConfig {
    fn default() -> Self {
        Self { strict: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SecretsConfig {
    /// Preferred vault backend. `auto` picks the platform keychain where one
    /// exists and falls back to the encrypted file.
    #[serde(default)]
    pub backend: BackendPreference,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AuditConfig {
    /// Write the append-only audit log.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Audit log path. Defaults to `<config_dir>/audit.log`.
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

// ── Loading, saving, derived paths ────────────────────────────────

impl Config {
    /// Resolve the config directory: `DEVGATE_CONFIG_DIR` env override, else
    /// `~/.devgate`.
    pub fn default_config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("DEVGATE_CONFIG_DIR") {
            if !dir.trim().is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }
        let user_dirs = UserDirs::new().context("Could not determine home directory")?;
        Ok(user_dirs.home_dir().join(".devgate"))
    }

    /// Load from the default config directory.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_config_dir()?)
    }

    /// Load from an explicit directory. A missing file yields defaults; a
    /// malformed file is an error rather than a silent fallback.
    pub fn load_from(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        let mut config = if config_path.exists() {
            let text = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str::<Self>(&text)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            Self::default()
        };
        config.config_dir = config_dir.to_path_buf();
        config.config_path = config_path;
        Ok(config)
    }

    /// Persist to `config.toml`. The vault record and audit log are owned by
    /// their modules and never written here.
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config_dir).with_context(|| {
            format!("Failed to create config dir {}", self.config_dir.display())
        })?;
        let text = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&self.config_path, text)
            .with_context(|| format!("Failed to write {}", self.config_path.display()))?;
        Ok(())
    }

    /// Effective audit log path, or `None` when auditing is disabled.
    pub fn audit_log_path(&self) -> Option<PathBuf> {
        if !self.audit.enabled {
            return None;
        }
        Some(match &self.audit.path {
            Some(path) => PathBuf::from(path),
            None => self.config_dir.join(AUDIT_FILE),
        })
    }

    /// The active sandbox root, validated to exist. This is read once at
    /// gate construction; later config edits require a restart to apply.
    pub fn active_sandbox_root(&self) -> Result<PathBuf> {
        anyhow::ensure!(
            !self.sandbox.roots.is_empty(),
            "No sandbox roots configured; add one with `devgate sandbox add <dir>`"
        );
        let index = self.sandbox.active.min(self.sandbox.roots.len() - 1);
        let root = PathBuf::from(&self.sandbox.roots[index]);
        anyhow::ensure!(
            root.is_dir(),
            "Active sandbox root {} does not exist or is not a directory",
            root.display()
        );
        Ok(root)
    }

    /// Add a sandbox root. Mirrors the limits of the original manager:
    /// the directory must exist, duplicates are rejected, at most
    /// [`MAX_SANDBOX_ROOTS`] entries.
    pub fn add_sandbox_root(&mut self, path: &str) -> Result<String> {
        let resolved = PathBuf::from(path)
            .canonicalize()
            .with_context(|| format!("Invalid sandbox path: {path}"))?;
        anyhow::ensure!(resolved.is_dir(), "Not a directory: {}", resolved.display());

        let resolved_str = resolved.display().to_string();
        anyhow::ensure!(
            !self.sandbox.roots.contains(&resolved_str),
            "Sandbox already configured: {resolved_str}"
        );
        anyhow::ensure!(
            self.sandbox.roots.len() < MAX_SANDBOX_ROOTS,
            "At most {MAX_SANDBOX_ROOTS} sandbox roots are allowed"
        );

        self.sandbox.roots.push(resolved_str.clone());
        Ok(resolved_str)
    }

    /// Remove a sandbox root by index. The last root cannot be removed.
    pub fn remove_sandbox_root(&mut self, index: usize) -> Result<String> {
        anyhow::ensure!(index < self.sandbox.roots.len(), "Invalid index: {index}");
        anyhow::ensure!(
            self.sandbox.roots.len() > 1,
            "Cannot remove the last sandbox root; add another first"
        );
        let removed = self.sandbox.roots.remove(index);
        if self.sandbox.active >= self.sandbox.roots.len() {
            self.sandbox.active = self.sandbox.roots.len() - 1;
        } else if self.sandbox.active > index {
            self.sandbox.active -= 1;
        }
        Ok(removed)
    }

    /// Switch the active sandbox root. Takes effect on the next process
    /// start — a running gate keeps the root it was built with.
    pub fn set_active_sandbox(&mut self, index: usize) -> Result<String> {
        anyhow::ensure!(index < self.sandbox.roots.len(), "Invalid index: {index}");
        self.sandbox.active = index;
        Ok(self.sandbox.roots[index].clone())
    }
}
