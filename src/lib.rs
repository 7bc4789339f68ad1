#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

pub mod config;
pub mod security;
pub(crate) mod util;

pub use config::Config;
pub use security::{AccessGate, Action, AuthGrant, CredentialVault, GateError};
