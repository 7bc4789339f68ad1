#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use dialoguer::Password;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use devgate::config::Config;
use devgate::security::{
    mask_token, select_backend, validate_token_format, AccessGate, Action, AuditLogger,
    CredentialVault,
};

/// `devgate` — access-control core for a single-user remote-control gateway.
#[derive(Parser, Debug)]
#[command(name = "devgate")]
#[command(version)]
#[command(about = "Access-control and integrity boundary for a remote-control dev gateway.", long_about = None)]
struct Cli {
    /// Override the config directory (default: ~/.devgate or $DEVGATE_CONFIG_DIR).
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage the encrypted gateway credential
    #[command(subcommand)]
    Vault(VaultCommands),
    /// Dry-run an authorization decision against the configured gate
    #[command(subcommand)]
    Check(CheckCommands),
    /// Manage sandbox root directories
    #[command(subcommand)]
    Sandbox(SandboxCommands),
    /// Inspect the audit log
    #[command(subcommand)]
    Audit(AuditCommands),
    /// Show or export configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum VaultCommands {
    /// Encrypt and store the gateway token (prompts if not given)
    Set {
        /// Token value; omit to be prompted without terminal echo
        token: Option<String>,
        /// Skip the token format check
        #[arg(long)]
        allow_any_format: bool,
    },
    /// Show vault backend and whether the record decrypts on this machine
    Status,
    /// Remove the stored credential from every backend
    Clear,
}

#[derive(Subcommand, Debug)]
enum CheckCommands {
    /// Validate a filesystem path against the sandbox
    Path {
        /// Candidate path (relative to the sandbox root, or absolute)
        candidate: String,
    },
    /// Validate a program invocation against the command policy
    Command {
        /// Executable name
        program: String,
        /// Arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Scan a prompt through the injection guard
    Prompt {
        /// Prompt text
        text: String,
    },
}

#[derive(Subcommand, Debug)]
enum SandboxCommands {
    /// List configured sandbox roots
    List,
    /// Add a sandbox root directory
    Add {
        /// Directory path
        path: String,
    },
    /// Remove a sandbox root by index
    Remove {
        /// Index from `devgate sandbox list`
        index: usize,
    },
    /// Set the active sandbox root (takes effect on next start)
    Use {
        /// Index from `devgate sandbox list`
        index: usize,
    },
}

#[derive(Subcommand, Debug)]
enum AuditCommands {
    /// Print the most recent audit records
    Tail {
        /// Number of records
        #[arg(short = 'n', long, default_value = "20")]
        lines: usize,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file location
    Path,
    /// Export the configuration JSON schema
    Schema,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config_dir {
        Some(dir) => Config::load_from(dir)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Vault(cmd) => run_vault(&config, cmd),
        Commands::Check(cmd) => run_check(&config, &cmd),
        Commands::Sandbox(cmd) => run_sandbox(config, cmd),
        Commands::Audit(cmd) => run_audit(&config, &cmd),
        Commands::Config(cmd) => run_config(&config, &cmd),
    }
}

fn vault_for(config: &Config) -> CredentialVault {
    CredentialVault::new(
        select_backend(config.secrets.backend, &config.config_dir),
        &config.config_dir,
    )
}

fn run_vault(config: &Config, cmd: VaultCommands) -> Result<()> {
    let vault = vault_for(config);
    match cmd {
        VaultCommands::Set {
            token,
            allow_any_format,
        } => {
            let token = match token {
                Some(token) => token,
                None => Password::new()
                    .with_prompt("Gateway token")
                    .interact()?,
            };
            if !allow_any_format && !validate_token_format(&token) {
                bail!(
                    "Token does not look like a gateway token (<id>:<secret>). \
                     Use --allow-any-format to store it anyway."
                );
            }
            let record = vault.store(&token)?;
            println!("Stored {} via {}.", mask_token(&token), record.backend);
            Ok(())
        }
        VaultCommands::Status => {
            match vault.load_record()? {
                None => println!("No credential stored."),
                Some(record) => {
                    println!("Backend: {}", record.backend);
                    match vault.decrypt(&record) {
                        Ok(_) => println!("Record decrypts on this machine."),
                        Err(e) => bail!("Record cannot be opened: {e}"),
                    }
                }
            }
            Ok(())
        }
        VaultCommands::Clear => {
            vault.clear()?;
            println!("Credential removed.");
            Ok(())
        }
    }
}

fn run_check(config: &Config, cmd: &CheckCommands) -> Result<()> {
    let mut gate = AccessGate::from_config(config)?;

    // Make sure the stored secret can never leak through the local verdict
    // output or the audit log, even in a dry run.
    let vault = vault_for(config);
    if let Some(secret) = vault.retrieve()? {
        gate = gate.redacting(&secret.expose());
    }

    let action = match cmd {
        CheckCommands::Path { candidate } => Action::Path {
            candidate: candidate.clone(),
        },
        CheckCommands::Command { program, args } => Action::Command {
            program: program.clone(),
            args: args.clone(),
        },
        CheckCommands::Prompt { text } => Action::Prompt { text: text.clone() },
    };

    match gate.authorize(config.gateway.allowed_user_id, &action) {
        Ok(grant) => {
            println!("ALLOWED: {grant:?}");
            Ok(())
        }
        Err(err) => {
            println!("DENIED: {err}");
            println!("Remote caller would see: {}", err.user_message());
            std::process::exit(1);
        }
    }
}

fn run_sandbox(mut config: Config, cmd: SandboxCommands) -> Result<()> {
    match cmd {
        SandboxCommands::List => {
            if config.sandbox.roots.is_empty() {
                println!("No sandbox roots configured.");
                return Ok(());
            }
            for (index, root) in config.sandbox.roots.iter().enumerate() {
                let marker = if index == config.sandbox.active {
                    "*"
                } else {
                    " "
                };
                println!("{marker} [{index}] {root}");
            }
            Ok(())
        }
        SandboxCommands::Add { path } => {
            let added = config.add_sandbox_root(&path)?;
            config.save()?;
            println!("Added sandbox root: {added}");
            Ok(())
        }
        SandboxCommands::Remove { index } => {
            let removed = config.remove_sandbox_root(index)?;
            config.save()?;
            println!("Removed sandbox root: {removed}");
            Ok(())
        }
        SandboxCommands::Use { index } => {
            let active = config.set_active_sandbox(index)?;
            config.save()?;
            println!("Active sandbox root: {active} (applies on next start)");
            Ok(())
        }
    }
}

fn run_audit(config: &Config, cmd: &AuditCommands) -> Result<()> {
    match cmd {
        AuditCommands::Tail { lines } => {
            let logger = AuditLogger::new(config.audit_log_path());
            let tail = logger.tail(*lines)?;
            if tail.is_empty() {
                println!("Audit log is empty.");
            }
            for line in tail {
                println!("{line}");
            }
            Ok(())
        }
    }
}

fn run_config(config: &Config, cmd: &ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            print!("{}", toml::to_string_pretty(config)?);
            Ok(())
        }
        ConfigCommands::Path => {
            println!("{}", config.config_path.display());
            Ok(())
        }
        ConfigCommands::Schema => {
            let schema = schemars::schema_for!(Config);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
    }
}
