//! Config round-trips and vault persistence through the public API.

use tempfile::TempDir;

use devgate::config::Config;
use devgate::security::{select_backend, BackendKind, BackendPreference, CredentialVault};

const TOKEN: &str = "123456789:AAF0persisted_token_value_abcdefghijk";

#[test]
fn config_roundtrip_preserves_policy() {
    let tmp = TempDir::new().unwrap();
    let sandbox = TempDir::new().unwrap();

    let mut config = Config::load_from(tmp.path()).unwrap();
    config.gateway.allowed_user_id = 555;
    config
        .add_sandbox_root(sandbox.path().to_str().unwrap())
        .unwrap();
    config.commands.allowed = vec!["git".into(), "ls".into()];
    config.rate_limit.max_commands_per_minute = 12;
    config.save().unwrap();

    let reloaded = Config::load_from(tmp.path()).unwrap();
    assert_eq!(reloaded.gateway.allowed_user_id, 555);
    assert_eq!(reloaded.commands.allowed, vec!["git", "ls"]);
    assert_eq!(reloaded.rate_limit.max_commands_per_minute, 12);
    assert_eq!(
        reloaded.active_sandbox_root().unwrap(),
        sandbox.path().canonicalize().unwrap()
    );
}

#[test]
fn config_file_never_contains_the_secret() {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::load_from(tmp.path()).unwrap();
    config.gateway.allowed_user_id = 555;
    config.save().unwrap();

    let vault = CredentialVault::new(
        select_backend(BackendPreference::File, tmp.path()),
        tmp.path(),
    );
    vault.store(TOKEN).unwrap();

    let config_text = std::fs::read_to_string(tmp.path().join("config.toml")).unwrap();
    assert!(!config_text.contains(TOKEN));

    let vault_text = std::fs::read_to_string(tmp.path().join("vault.toml")).unwrap();
    assert!(
        !vault_text.contains(TOKEN),
        "vault file must hold ciphertext only"
    );
}

#[test]
fn vault_survives_process_restart() {
    let tmp = TempDir::new().unwrap();

    // "First process" stores the token.
    {
        let vault = CredentialVault::new(
            select_backend(BackendPreference::File, tmp.path()),
            tmp.path(),
        );
        let record = vault.store(TOKEN).unwrap();
        assert_eq!(record.backend, BackendKind::File);
    }

    // "Second process" loads and decrypts it.
    let vault = CredentialVault::new(
        select_backend(BackendPreference::File, tmp.path()),
        tmp.path(),
    );
    let secret = vault.retrieve().unwrap().expect("record persisted");
    assert_eq!(secret.expose(), TOKEN);
}
