//! Security subsystem — the access-control and integrity boundary.
//!
//! Every inbound request crosses [`AccessGate::authorize`] before any
//! privileged action runs. The gate composes the pure checks
//! ([`PathSandbox`], [`CommandPolicy`], [`PromptGuard`]) with the one piece
//! of mutable state ([`RateLimiter`]) and writes an [`audit::AuditLogger`]
//! entry for every decision. [`CredentialVault`] protects the long-lived
//! bot token at rest and is used at startup/configuration time, not per
//! request.
//!
//! Everything here fails closed: an unresolvable path, an unlisted command,
//! a matched prompt rule or an undecryptable vault is a denial, never a
//! fallback.

pub mod audit;
pub mod command;
pub mod error;
pub mod gate;
pub mod prompt_guard;
pub mod rate_limit;
pub mod sandbox;
pub mod vault;

pub use audit::{AuditEntry, AuditLogger, AuditOutcome};
pub use command::{CommandPolicy, DEFAULT_ALLOWED_PROGRAMS};
pub use error::GateError;
pub use gate::{AccessGate, Action, AuthGrant};
pub use prompt_guard::{GuardLayer, PromptGuard, PromptVerdict};
pub use rate_limit::{Clock, LimitKind, ManualClock, RateLimiter, RateLimits, SystemClock};
pub use sandbox::PathSandbox;
pub use vault::{
    mask_token, select_backend, validate_token_format, BackendKind, BackendPreference,
    CredentialVault, EncryptedFileBackend, Secret, SecretBackend, VaultRecord,
};

/// Redact a sensitive value for safe display. Shows the first 4 characters
/// plus a `***` suffix.
pub fn redact(value: &str) -> String {
    if value.len() <= 4 {
        "***".to_string()
    } else {
        format!("{}***", &value[..4])
    }
}
