//! Access gate — the single entry point for authorization decisions.
//!
//! Every collaborator (message transport, git wrapper, IDE bridge) calls
//! [`AccessGate::authorize`] before any privileged side effect. Checks run
//! cheapest-and-most-global first: lockout and identity, then the command
//! rate budget, then the per-kind check (sandbox, command policy or prompt
//! guard). The first rejection stops the pipeline, is audited, and comes
//! back as a typed [`GateError`]. Nothing in here retries; retries belong to
//! the caller.

use std::path::PathBuf;

use crate::config::Config;

use super::audit::{AuditLogger, AuditOutcome};
use super::command::CommandPolicy;
use super::error::GateError;
use super::prompt_guard::{PromptGuard, PromptVerdict};
use super::rate_limit::{LimitKind, RateLimiter, RateLimits};
use super::sandbox::PathSandbox;

/// A request the gate can authorize.
#[derive(Debug, Clone)]
pub enum Action {
    /// Read or create a file/directory at a caller-supplied path.
    Path { candidate: String },
    /// Spawn an allow-listed program.
    Command { program: String, args: Vec<String> },
    /// Forward free text to the AI editor.
    Prompt { text: String },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Path { .. } => "path",
            Self::Command { .. } => "command",
            Self::Prompt { .. } => "prompt",
        }
    }

    /// What lands in the audit detail. Prompt text is deliberately not
    /// included — only its length is ever persisted.
    fn audit_detail(&self) -> String {
        match self {
            Self::Path { candidate } => candidate.clone(),
            Self::Command { program, args } => {
                if args.is_empty() {
                    program.clone()
                } else {
                    format!("{program} {}", args.join(" "))
                }
            }
            Self::Prompt { text } => format!("prompt ({} chars)", text.chars().count()),
        }
    }
}

/// What an allowed action entitles the caller to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthGrant {
    /// The canonical, sandbox-contained path to operate on.
    Path(PathBuf),
    Command,
    Prompt,
}

/// Composition of the security components behind one `authorize` call.
#[derive(Debug)]
pub struct AccessGate {
    allowed_user_id: i64,
    sandbox: PathSandbox,
    commands: CommandPolicy,
    guard: PromptGuard,
    limiter: RateLimiter,
    audit: AuditLogger,
}

impl AccessGate {
    pub fn new(
        allowed_user_id: i64,
        sandbox: PathSandbox,
        commands: CommandPolicy,
        guard: PromptGuard,
        limiter: RateLimiter,
        audit: AuditLogger,
    ) -> Self {
        Self {
            allowed_user_id,
            sandbox,
            commands,
            guard,
            limiter,
            audit,
        }
    }

    /// Build a gate from loaded configuration. Fails when no owner identity
    /// is configured or the active sandbox root is unusable — the gateway
    /// must not start half-locked.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        anyhow::ensure!(
            config.gateway.allowed_user_id != 0,
            "No authorized user configured; set [gateway].allowed_user_id"
        );
        let root = config.active_sandbox_root()?;
        let sandbox = PathSandbox::new(root)?;
        let audit = AuditLogger::new(config.audit_log_path()).with_sandbox_root(sandbox.root());

        Ok(Self::new(
            config.gateway.allowed_user_id,
            sandbox,
            CommandPolicy::new(
                config.commands.allowed.clone(),
                config.commands.env_passthrough.clone(),
            ),
            PromptGuard::new(config.prompt_guard.strict),
            RateLimiter::new(RateLimits {
                max_commands_per_minute: config.rate_limit.max_commands_per_minute,
                max_auth_failures_per_minute: config.rate_limit.max_auth_failures_per_minute,
                lockout: std::time::Duration::from_secs(config.rate_limit.lockout_secs),
            }),
            audit,
        ))
    }

    /// Register the vault secret so it can never appear in audit output.
    pub fn redacting(mut self, secret: &str) -> Self {
        let audit = std::mem::replace(&mut self.audit, AuditLogger::new(None));
        self.audit = audit.with_secret(secret);
        self
    }

    /// The canonical sandbox root this gate enforces.
    pub fn sandbox_root(&self) -> &std::path::Path {
        self.sandbox.root()
    }

    /// Safe subprocess environment for collaborators that spawn commands.
    pub fn safe_env(&self) -> std::collections::BTreeMap<String, String> {
        self.commands.safe_env()
    }

    /// Authorize one request. Writes exactly one audit entry per call.
    pub fn authorize(&self, identity: i64, action: &Action) -> Result<AuthGrant, GateError> {
        let decision = self.evaluate(identity, action);
        match &decision {
            Ok(_) => {
                self.audit
                    .record(identity, action.kind(), AuditOutcome::Allowed, &action.audit_detail());
            }
            Err(err) => {
                let detail = format!("{err}; requested: {}", action.audit_detail());
                self.audit
                    .record(identity, action.kind(), AuditOutcome::Denied, &detail);
            }
        }
        decision
    }

    fn evaluate(&self, identity: i64, action: &Action) -> Result<AuthGrant, GateError> {
        // An auth-failure lockout gates everything, correct identity included.
        if let Some(remaining) = self.limiter.locked_out(identity, LimitKind::AuthFailure) {
            return Err(GateError::LockedOut {
                remaining_secs: remaining,
            });
        }

        if identity != self.allowed_user_id {
            // Record the failure; the Nth one engages the lockout. The caller
            // still only ever sees Unauthorized for this request.
            let _ = self
                .limiter
                .check_and_record(identity, LimitKind::AuthFailure);
            return Err(GateError::Unauthorized);
        }
        self.limiter.reset(identity, LimitKind::AuthFailure);

        self.limiter.check_and_record(identity, LimitKind::Command)?;

        match action {
            Action::Path { candidate } => self.sandbox.resolve(candidate).map(AuthGrant::Path),
            Action::Command { program, args } => self
                .commands
                .check(program, args)
                .map(|()| AuthGrant::Command),
            Action::Prompt { text } => match self.guard.scan(text) {
                PromptVerdict::Clean => Ok(AuthGrant::Prompt),
                PromptVerdict::Blocked { layer, rule } => {
                    Err(GateError::PromptBlocked { layer, rule })
                }
            },
        }
    }
}
