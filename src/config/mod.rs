pub mod schema;

pub use schema::{
    AuditConfig, CommandsConfig, Config, GatewayConfig, PromptGuardConfig, RateLimitConfig,
    SandboxConfig, SecretsConfig, MAX_SANDBOX_ROOTS,
};
