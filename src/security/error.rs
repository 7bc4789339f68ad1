//! Discriminated error surface of the access gate.
//!
//! Every denial the gate can produce is one of these variants. Collaborators
//! match on the variant to decide retry behavior; the remote caller only ever
//! sees [`GateError::user_message`], which leaks neither paths nor the secret.

use super::prompt_guard::GuardLayer;

/// A security check rejected the request (or the vault refused to open).
///
/// All variants are fatal to the request that triggered them. Only the
/// rate-related variants are self-healing — the caller may retry after the
/// indicated delay. `VaultDecryption` is fatal to startup/configuration, not
/// to a single request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// The sender is not the configured gateway owner.
    #[error("unauthorized identity")]
    Unauthorized,

    /// A candidate path resolved outside the sandbox root, or could not be
    /// resolved at all (dangling symlink, permission error).
    #[error("path escapes sandbox: {attempted}")]
    SandboxViolation { attempted: String },

    /// The path is inside the sandbox but matches a protected-file pattern.
    #[error("blocked file pattern: {pattern}")]
    BlockedFilePattern { pattern: String },

    /// The executable is not allow-listed, or an argument carries shell
    /// metacharacters.
    #[error("command not allowed: {what}")]
    CommandNotAllowed { what: String },

    /// The prompt matched an injection rule. The raw prompt text is never
    /// carried in the error — only the layer and rule identifiers.
    #[error("prompt blocked by {layer} rule '{rule}'")]
    PromptBlocked { layer: GuardLayer, rule: &'static str },

    /// Command budget for the current window is exhausted.
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    /// Too many authentication failures; everything is denied until the
    /// lockout elapses.
    #[error("locked out, retry in {remaining_secs}s")]
    LockedOut { remaining_secs: u64 },

    /// The stored credential could not be decrypted. The process must not
    /// fall back to an unauthenticated default.
    #[error("vault decryption failed")]
    VaultDecryption,
}

impl GateError {
    /// Generic message safe to show the remote caller. Details stay in the
    /// local audit log.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Access denied.",
            Self::SandboxViolation { .. } => "Access denied. Path is outside the allowed workspace.",
            Self::BlockedFilePattern { .. } => "Access denied. This file is protected.",
            Self::CommandNotAllowed { .. } => "Command not allowed.",
            Self::PromptBlocked { .. } => {
                "Prompt blocked for security reasons. Please rephrase your request."
            }
            Self::RateLimitExceeded { .. } => "Too many requests. Try again shortly.",
            Self::LockedOut { .. } => "Temporarily locked out. Try again later.",
            Self::VaultDecryption => "Credential vault could not be opened.",
        }
    }

    /// Whether the caller may retry after a delay (rate-related denials).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded { .. } | Self::LockedOut { .. }
        )
    }
}
