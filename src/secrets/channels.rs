//! Secret sourcing channels.
//!
//! Each required secret is sourced independently: the first channel in the
//! chain that produces a value wins, and later channels are not consulted
//! for that name. A channel returning `Ok(None)` defers to the next one;
//! an error aborts sourcing entirely.

use std::env;
use std::fmt;
use std::path::Path;

use age::secrecy::SecretString;
use zeroize::Zeroize;

use crate::error::SecretError;
use crate::secrets::{Provenance, SecretBundle, SecretName, SecretValue};

/// A source that may produce values for secrets.
pub trait SecretChannel: fmt::Debug {
    /// Provenance recorded for values this channel produces.
    fn provenance(&self) -> Provenance;

    /// Try to produce a value for `name`.
    ///
    /// # Errors
    ///
    /// Channel-specific failures (unreadable terminal, ...) abort sourcing;
    /// "I don't have this one" is `Ok(None)`.
    fn produce(&self, name: SecretName) -> Result<Option<SecretValue>, SecretError>;
}

/// Sources secrets from `PROVISION_*` environment variables.
///
/// Empty variables count as unset, so `PROVISION_ROOT_PASSWORD=` defers
/// to the next channel instead of producing an empty value.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvChannel;

impl SecretChannel for EnvChannel {
    fn provenance(&self) -> Provenance {
        Provenance::Env
    }

    fn produce(&self, name: SecretName) -> Result<Option<SecretValue>, SecretError> {
        Ok(env::var(name.env_var())
            .ok()
            .filter(|value| !value.is_empty())
            .map(SecretValue::new))
    }
}

/// Sources secrets from an age-encrypted TOML file.
///
/// The file is decrypted once at open time with a passphrase (scrypt
/// recipient). Keys matching [`SecretName::as_str`] become candidate
/// values; unknown keys are ignored so the same file can carry entries
/// for several machines.
pub struct EncryptedFileChannel {
    path: String,
    entries: Vec<(SecretName, SecretValue)>,
}

impl EncryptedFileChannel {
    /// Read and decrypt the secrets file at `path`.
    ///
    /// # Errors
    ///
    /// [`SecretError::Io`] if the file cannot be read,
    /// [`SecretError::Decryption`] on a wrong passphrase or corrupt body,
    /// and [`SecretError::Parse`] when the plaintext is not a TOML table
    /// of string values.
    pub fn open(path: &Path, passphrase: &str) -> Result<Self, SecretError> {
        let display = path.display().to_string();

        let encrypted = std::fs::read(path).map_err(|source| SecretError::Io {
            path: display.clone(),
            source,
        })?;

        let identity = age::scrypt::Identity::new(SecretString::from(passphrase.to_string()));
        let plaintext =
            age::decrypt(&identity, &encrypted).map_err(|e| SecretError::Decryption {
                path: display.clone(),
                message: e.to_string(),
            })?;

        let mut text = String::from_utf8(plaintext).map_err(|_| SecretError::Parse {
            path: display.clone(),
            message: "decrypted content is not UTF-8".to_string(),
        })?;

        let parsed = text.parse::<toml::Table>();
        // The plaintext carried secret values; wipe it once parsed.
        text.zeroize();

        let table = parsed.map_err(|e| SecretError::Parse {
            path: display.clone(),
            message: e.message().to_string(),
        })?;

        let mut entries = Vec::new();
        for (key, value) in table {
            let Some(name) = SecretName::from_key(&key) else {
                continue;
            };
            let Some(s) = value.as_str() else {
                return Err(SecretError::Parse {
                    path: display,
                    message: format!("key '{key}' must be a string"),
                });
            };
            entries.push((name, SecretValue::new(s)));
        }

        Ok(Self {
            path: display,
            entries,
        })
    }
}

impl fmt::Debug for EncryptedFileChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedFileChannel")
            .field("path", &self.path)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl SecretChannel for EncryptedFileChannel {
    fn provenance(&self) -> Provenance {
        Provenance::EncryptedFile
    }

    fn produce(&self, name: SecretName) -> Result<Option<SecretValue>, SecretError> {
        Ok(self
            .entries
            .iter()
            .find(|(entry_name, _)| *entry_name == name)
            .map(|(_, value)| value.clone()))
    }
}

/// Sources secrets by asking on the terminal. Disabled entirely in
/// non-interactive runs, where it defers to no one and sourcing fails
/// with the missing-secret error instead of hanging on a prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptChannel {
    enabled: bool,
}

impl PromptChannel {
    /// Create a prompt channel; a disabled one produces nothing.
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl SecretChannel for PromptChannel {
    fn provenance(&self) -> Provenance {
        Provenance::Prompt
    }

    fn produce(&self, name: SecretName) -> Result<Option<SecretValue>, SecretError> {
        if !self.enabled {
            return Ok(None);
        }
        let entered = inquire::Password::new(&format!("Secret '{name}':"))
            .without_confirmation()
            .prompt()
            .map_err(|e| SecretError::Prompt {
                name: name.to_string(),
                message: e.to_string(),
            })?;
        Ok((!entered.is_empty()).then(|| SecretValue::new(entered)))
    }
}

/// Encrypt a secrets file body with a passphrase.
///
/// Counterpart of [`EncryptedFileChannel::open`], used to author the
/// secrets file in the first place.
///
/// # Errors
///
/// Returns [`SecretError::Encryption`] if the cipher fails.
pub fn encrypt(plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>, SecretError> {
    let recipient = age::scrypt::Recipient::new(SecretString::from(passphrase.to_string()));
    age::encrypt(&recipient, plaintext).map_err(|e| SecretError::Encryption {
        message: e.to_string(),
    })
}

/// Source every secret in `required` through the ordered `channels`.
///
/// Logs which channel satisfied each name at debug level; values are
/// never logged.
///
/// # Errors
///
/// Returns [`SecretError::Missing`] naming the first secret no channel
/// produced, or the first channel error encountered.
pub fn gather(
    required: &[SecretName],
    channels: &[&dyn SecretChannel],
) -> Result<SecretBundle, SecretError> {
    let mut bundle = SecretBundle::new();

    for &name in required {
        let mut satisfied = false;
        for channel in channels {
            if let Some(value) = channel.produce(name)? {
                tracing::debug!(
                    secret = name.as_str(),
                    source = %channel.provenance(),
                    "sourced secret"
                );
                bundle.insert(name, value, channel.provenance());
                satisfied = true;
                break;
            }
        }
        if !satisfied {
            return Err(SecretError::Missing {
                name: name.to_string(),
                env_var: name.env_var().to_string(),
            });
        }
    }

    Ok(bundle)
}
