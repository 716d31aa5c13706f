//! Filesystem implementation of the `KeyStore` port, plus the trust key loader.
//!
//! `activation.key` is written with an atomic write (temp file + rename) and
//! owner-only permissions, so a crash mid-write never leaves a truncated key.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use outpost_common::signature::{self, VerifyingKey};

use crate::application::ports::KeyStore;

pub const ACTIVATION_KEY_FILE: &str = "activation.key";
pub const USER_KEY_FILE: &str = "user.key";
pub const TRUST_KEY_FILE: &str = "trust.pem";

/// Key files under the agent home directory.
#[derive(Debug, Clone)]
pub struct FsKeyStore {
    home: PathBuf,
}

impl FsKeyStore {
    #[must_use]
    pub fn new(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
        }
    }

    #[must_use]
    pub fn activation_path(&self) -> PathBuf {
        self.home.join(ACTIVATION_KEY_FILE)
    }

    #[must_use]
    pub fn user_key_path(&self) -> PathBuf {
        self.home.join(USER_KEY_FILE)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

impl KeyStore for FsKeyStore {
    fn load_activation(&self) -> Result<Option<String>> {
        read_optional(&self.activation_path())
    }

    fn save_activation(&self, blob: &[u8]) -> Result<()> {
        let path = self.activation_path();
        std::fs::create_dir_all(&self.home)
            .with_context(|| format!("creating directory {}", self.home.display()))?;

        let temp_path = path.with_extension("key.tmp");
        std::fs::write(&temp_path, blob)
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("setting permissions on {}", temp_path.display()))?;
        }

        std::fs::rename(&temp_path, &path)
            .with_context(|| format!("finalizing activation key {}", path.display()))?;
        tracing::info!(path = %path.display(), "activation key saved");
        Ok(())
    }

    fn load_user_key(&self) -> Result<Option<String>> {
        read_optional(&self.user_key_path())
    }

    fn location(&self) -> String {
        self.home.display().to_string()
    }
}

/// Load the fleet trust key. Private key material is refused.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not hold an Ed25519
/// public key.
pub fn load_trust_key(path: &Path) -> Result<VerifyingKey> {
    let pem = std::fs::read_to_string(path)
        .with_context(|| format!("reading trust key {}", path.display()))?;
    signature::verifying_key_from_pem(&pem)
        .with_context(|| format!("parsing trust key {}", path.display()))
}
