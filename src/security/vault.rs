//! Credential vault — machine-bound encrypted storage of the bot token.
//!
//! The secret is encrypted with ChaCha20-Poly1305 under a key derived from
//! machine-specific material (hostname, username, home directory) and a
//! per-record random salt, so a copied vault record is useless on another
//! machine. Physical storage goes through a [`SecretBackend`]: the platform
//! keychain where available, otherwise an encrypted file with owner-only
//! permissions. Decryption failures are explicit errors — a corrupted vault
//! never downgrades the gateway to an unauthenticated default.
//!
//! While the secret sits in process memory between uses it stays XOR-masked
//! against a random per-process mask ([`Secret`]), shrinking the window in
//! which a memory dump exposes it in clear form.

use anyhow::{Context, Result};
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, ChaCha20Poly1305, Key, Nonce};
use hmac::{Hmac, Mac};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::error::GateError;

/// ChaCha20-Poly1305 nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Key-derivation salt length in bytes.
const SALT_LEN: usize = 16;

/// HMAC-chain stretching rounds for the derived key.
const KEY_STRETCH_ROUNDS: u32 = 10_000;

/// Vault record filename inside the config directory (file backend).
const VAULT_FILE: &str = "vault.toml";

type HmacSha256 = Hmac<Sha256>;

/// Which physical store holds the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Keychain,
    File,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keychain => f.write_str("keychain"),
            Self::File => f.write_str("encrypted file"),
        }
    }
}

/// Persisted form of the encrypted secret. The derivation salt travels with
/// the ciphertext; the key material itself never does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultRecord {
    /// Hex of `nonce ‖ ciphertext ‖ tag`.
    pub ciphertext: String,
    /// Hex of the key-derivation salt.
    pub salt: String,
    /// Backend that stored this record.
    pub backend: BackendKind,
}

/// Capability interface over physical secret storage. Implementations hold
/// opaque serialized record bytes; encryption happens above this trait.
pub trait SecretBackend: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> BackendKind;
    fn save(&self, blob: &[u8]) -> Result<()>;
    fn load(&self) -> Result<Option<Vec<u8>>>;
    fn clear(&self) -> Result<()>;
}

/// Encrypted-file fallback backend. Always available.
#[derive(Debug, Clone)]
pub struct EncryptedFileBackend {
    path: PathBuf,
}

impl EncryptedFileBackend {
    pub fn new(config_dir: &Path) -> Self {
        Self {
            path: config_dir.join(VAULT_FILE),
        }
    }
}

impl SecretBackend for EncryptedFileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn save(&self, blob: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create vault directory")?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .context("Failed to open vault file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .context("Failed to set vault file permissions")?;
        }
        file.write_all(blob).context("Failed to write vault file")?;
        file.sync_all().context("Failed to fsync vault file")?;
        Ok(())
    }

    fn load(&self) -> Result<Option<Vec<u8>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        fs::read(&self.path)
            .map(Some)
            .context("Failed to read vault file")
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            // Overwrite before unlinking so the plaintext-length ciphertext
            // does not linger in unallocated blocks.
            let mut noise = vec![0u8; 256];
            rand::rng().fill_bytes(&mut noise);
            let _ = fs::write(&self.path, &noise);
            fs::remove_file(&self.path).context("Failed to remove vault file")?;
        }
        Ok(())
    }
}

/// macOS keychain backend driven through `security(1)`.
#[cfg(target_os = "macos")]
#[derive(Debug, Clone)]
pub struct KeychainBackend {
    service: String,
    account: String,
}

#[cfg(target_os = "macos")]
impl KeychainBackend {
    pub fn new() -> Self {
        Self {
            service: "devgate".to_string(),
            account: "gateway_token".to_string(),
        }
    }
}

#[cfg(target_os = "macos")]
impl Default for KeychainBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "macos")]
impl SecretBackend for KeychainBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Keychain
    }

    fn save(&self, blob: &[u8]) -> Result<()> {
        let value = String::from_utf8(blob.to_vec())
            .context("Vault record is not valid UTF-8 for keychain storage")?;
        // Replace any existing entry; `-U` alone does not update the value
        // reliably across macOS versions.
        let _ = std::process::Command::new("security")
            .args(["delete-generic-password", "-s", &self.service, "-a", &self.account])
            .output();
        let output = std::process::Command::new("security")
            .args([
                "add-generic-password",
                "-s",
                &self.service,
                "-a",
                &self.account,
                "-w",
                &value,
                "-U",
            ])
            .output()
            .context("Failed to invoke security(1)")?;
        anyhow::ensure!(
            output.status.success(),
            "Keychain store failed with status {:?}",
            output.status.code()
        );
        Ok(())
    }

    fn load(&self) -> Result<Option<Vec<u8>>> {
        let output = std::process::Command::new("security")
            .args([
                "find-generic-password",
                "-s",
                &self.service,
                "-a",
                &self.account,
                "-w",
            ])
            .output()
            .context("Failed to invoke security(1)")?;
        if !output.status.success() {
            return Ok(None);
        }
        let value = String::from_utf8(output.stdout).context("Keychain value is not UTF-8")?;
        Ok(Some(value.trim_end().as_bytes().to_vec()))
    }

    fn clear(&self) -> Result<()> {
        let _ = std::process::Command::new("security")
            .args(["delete-generic-password", "-s", &self.service, "-a", &self.account])
            .output();
        Ok(())
    }
}

/// Preferred backend, from `[secrets]` config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    #[default]
    Auto,
    Keychain,
    File,
}

/// Select the physical backend at startup. `Auto` prefers the platform
/// keychain where one exists and falls back to the encrypted file.
pub fn select_backend(preference: BackendPreference, config_dir: &Path) -> Box<dyn SecretBackend> {
    match preference {
        BackendPreference::File => Box::new(EncryptedFileBackend::new(config_dir)),
        BackendPreference::Keychain | BackendPreference::Auto => {
            #[cfg(target_os = "macos")]
            {
                Box::new(KeychainBackend::new())
            }
            #[cfg(not(target_os = "macos"))]
            {
                if preference == BackendPreference::Keychain {
                    tracing::warn!(
                        "No platform keychain on this OS; using encrypted-file backend"
                    );
                }
                Box::new(EncryptedFileBackend::new(config_dir))
            }
        }
    }
}

/// A secret held in process memory, XOR-masked against a random mask
/// between uses. `Debug` is redacted; the plaintext only exists inside
/// [`Secret::expose`] callers.
pub struct Secret {
    masked: Vec<u8>,
    mask: Vec<u8>,
}

impl Secret {
    pub(crate) fn conceal(plaintext: &[u8]) -> Self {
        let mut mask = vec![0u8; plaintext.len()];
        rand::rng().fill_bytes(&mut mask);
        let masked = plaintext
            .iter()
            .zip(mask.iter())
            .map(|(b, m)| b ^ m)
            .collect();
        Self { masked, mask }
    }

    /// Unmask the secret. The returned `String` is the caller's exposure
    /// window; drop it as soon as the use is over.
    pub fn expose(&self) -> String {
        let bytes: Vec<u8> = self
            .masked
            .iter()
            .zip(self.mask.iter())
            .map(|(b, m)| b ^ m)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.masked.iter_mut().for_each(|b| *b = 0);
        self.mask.iter_mut().for_each(|b| *b = 0);
    }
}

/// Encrypts, persists and retrieves the single gateway credential.
#[derive(Debug)]
pub struct CredentialVault {
    backend: Box<dyn SecretBackend>,
    fallback_dir: PathBuf,
    machine_material: Vec<u8>,
}

impl CredentialVault {
    pub fn new(backend: Box<dyn SecretBackend>, fallback_dir: &Path) -> Self {
        Self {
            backend,
            fallback_dir: fallback_dir.to_path_buf(),
            machine_material: machine_material(),
        }
    }

    /// Substitute the key-derivation material. Exists so tests can simulate
    /// a vault record copied to a different machine.
    pub(crate) fn with_machine_material(mut self, material: Vec<u8>) -> Self {
        self.machine_material = material;
        self
    }

    /// Encrypt and persist `secret`. Returns the record that was stored.
    pub fn store(&self, secret: &str) -> Result<VaultRecord> {
        anyhow::ensure!(!secret.is_empty(), "Refusing to store an empty secret");

        let mut salt = [0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);
        let key_bytes = derive_key(&self.machine_material, &salt)?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key_bytes));
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("Encryption failed: {e}"))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        let mut record = VaultRecord {
            ciphertext: hex::encode(&blob),
            salt: hex::encode(salt),
            backend: self.backend.kind(),
        };

        let serialized = toml::to_string(&record).context("Failed to serialize vault record")?;
        if let Err(e) = self.backend.save(serialized.as_bytes()) {
            if self.backend.kind() == BackendKind::File {
                return Err(e);
            }
            // Keychain refused; fall back to the encrypted file so the
            // credential is not lost. The record stays machine-bound either way.
            tracing::warn!("Secret backend failed ({e:#}); using encrypted-file fallback");
            record.backend = BackendKind::File;
            let serialized =
                toml::to_string(&record).context("Failed to serialize vault record")?;
            EncryptedFileBackend::new(&self.fallback_dir).save(serialized.as_bytes())?;
        }

        Ok(record)
    }

    /// Load the persisted record, if any.
    pub fn load_record(&self) -> Result<Option<VaultRecord>> {
        let blob = match self.backend.load()? {
            Some(blob) => Some(blob),
            None if self.backend.kind() != BackendKind::File => {
                EncryptedFileBackend::new(&self.fallback_dir).load()?
            }
            None => None,
        };
        let Some(blob) = blob else { return Ok(None) };
        let text = String::from_utf8(blob).context("Vault record is not valid UTF-8")?;
        let record: VaultRecord =
            toml::from_str(&text).context("Vault record is not valid TOML")?;
        Ok(Some(record))
    }

    /// Decrypt a record into a masked in-memory [`Secret`].
    ///
    /// Fails closed: a wrong machine, a truncated blob or a flipped bit all
    /// yield [`GateError::VaultDecryption`] — never a wrong-but-plausible
    /// secret (the Poly1305 tag authenticates the ciphertext).
    pub fn decrypt(&self, record: &VaultRecord) -> Result<Secret, GateError> {
        let salt = hex::decode(&record.salt).map_err(|_| GateError::VaultDecryption)?;
        let blob = hex::decode(&record.ciphertext).map_err(|_| GateError::VaultDecryption)?;
        if blob.len() <= NONCE_LEN {
            return Err(GateError::VaultDecryption);
        }

        let key_bytes =
            derive_key(&self.machine_material, &salt).map_err(|_| GateError::VaultDecryption)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key_bytes));
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| GateError::VaultDecryption)?;

        if std::str::from_utf8(&plaintext).is_err() {
            return Err(GateError::VaultDecryption);
        }
        Ok(Secret::conceal(&plaintext))
    }

    /// Load and decrypt in one step. `Ok(None)` means no credential has been
    /// stored yet; decryption failure is still an error.
    pub fn retrieve(&self) -> Result<Option<Secret>> {
        match self.load_record()? {
            None => Ok(None),
            Some(record) => {
                let secret = self
                    .decrypt(&record)
                    .map_err(|e| anyhow::anyhow!("{e}: vault record cannot be opened on this machine"))?;
                Ok(Some(secret))
            }
        }
    }

    /// Remove the stored credential from every backend.
    pub fn clear(&self) -> Result<()> {
        self.backend.clear()?;
        if self.backend.kind() != BackendKind::File {
            EncryptedFileBackend::new(&self.fallback_dir).clear()?;
        }
        Ok(())
    }
}

/// Machine-specific key material: hostname, username and home directory,
/// hashed. None of it is secret on its own; it only binds the derived key
/// to this machine and user.
fn machine_material() -> Vec<u8> {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();
    let home = directories::UserDirs::new()
        .map(|d| d.home_dir().display().to_string())
        .unwrap_or_default();

    let combined = [host, user, home].join("|");
    Sha256::digest(combined.as_bytes()).to_vec()
}

/// Stretch machine material + salt into a 256-bit key via an HMAC-SHA256
/// chain.
fn derive_key(material: &[u8], salt: &[u8]) -> Result<[u8; 32]> {
    let mut state: Vec<u8> = salt.to_vec();
    for _ in 0..KEY_STRETCH_ROUNDS {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(material)
            .map_err(|e| anyhow::anyhow!("HMAC init failed: {e}"))?;
        mac.update(&state);
        state = mac.finalize().into_bytes().to_vec();
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&state);
    Ok(key)
}

/// Gateway tokens look like `<numeric id>:<35-40 url-safe chars>`.
pub fn validate_token_format(token: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern =
        PATTERN.get_or_init(|| Regex::new(r"^\d{8,10}:[A-Za-z0-9_-]{35,40}$").unwrap());
    pattern.is_match(token)
}

/// Mask a token for display: first 3 characters of each half survive, the
/// rest is starred out.
pub fn mask_token(token: &str) -> String {
    let Some((id, secret)) = token.split_once(':') else {
        return "[INVALID]".to_string();
    };
    if id.len() < 3 || secret.len() < 6 {
        return "[INVALID]".to_string();
    }
    let masked_id = format!("{}{}", &id[..3], "*".repeat(id.len() - 3));
    let masked_secret = format!(
        "{}{}{}",
        &secret[..3],
        "*".repeat(secret.len() - 6),
        &secret[secret.len() - 3..]
    );
    format!("{masked_id}:{masked_secret}")
}
