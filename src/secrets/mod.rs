//! Secret sourcing, validation and injection.
//!
//! Secrets are identified by a small closed set of [`SecretName`]s. Each is
//! sourced independently through an ordered channel chain (environment,
//! encrypted file, interactive prompt) into a [`SecretBundle`] that lives
//! only in memory and zeroizes its values on drop.
//!
//! Values never appear in logs or serialized output; anything user-facing
//! reports the name and the [`Provenance`] a value came from.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

pub mod channels;
pub mod inject;

pub use channels::{gather, EncryptedFileChannel, EnvChannel, PromptChannel, SecretChannel};
pub use inject::{inject, required_secrets};

/// Every secret the pipeline knows how to source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecretName {
    /// Password for the managed login account.
    UserPassword,
    /// Password for root.
    RootPassword,
    /// Passphrase for the LUKS container.
    LuksPassphrase,
    /// SSID of the provisioned Wi-Fi connection.
    WifiSsid,
    /// PSK of the provisioned Wi-Fi connection.
    WifiPassword,
}

impl SecretName {
    /// All names, in sourcing order.
    pub const ALL: [Self; 5] = [
        Self::UserPassword,
        Self::RootPassword,
        Self::LuksPassphrase,
        Self::WifiSsid,
        Self::WifiPassword,
    ];

    /// Stable key used in the secrets file and under `secrets.*`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserPassword => "user_password",
            Self::RootPassword => "root_password",
            Self::LuksPassphrase => "luks_passphrase",
            Self::WifiSsid => "wifi_ssid",
            Self::WifiPassword => "wifi_password",
        }
    }

    /// Environment variable consulted by the environment channel.
    #[must_use]
    pub const fn env_var(self) -> &'static str {
        match self {
            Self::UserPassword => "PROVISION_USER_PASSWORD",
            Self::RootPassword => "PROVISION_ROOT_PASSWORD",
            Self::LuksPassphrase => "PROVISION_LUKS_PASSPHRASE",
            Self::WifiSsid => "PROVISION_WIFI_SSID",
            Self::WifiPassword => "PROVISION_WIFI_PASSWORD",
        }
    }

    /// Validation class this secret belongs to.
    #[must_use]
    pub const fn class(self) -> SecretClass {
        match self {
            Self::UserPassword | Self::RootPassword | Self::WifiPassword => {
                SecretClass::AccountPassword
            }
            Self::LuksPassphrase => SecretClass::DiskPassphrase,
            Self::WifiSsid => SecretClass::Identifier,
        }
    }

    /// Reverse of [`Self::as_str`], for parsing secrets-file keys.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|name| name.as_str() == key)
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation class, deciding the minimum length a value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretClass {
    /// Login and service passwords.
    AccountPassword,
    /// Disk encryption passphrases.
    DiskPassphrase,
    /// Non-credential identifiers (an SSID), only required non-empty.
    Identifier,
}

impl SecretClass {
    /// Minimum accepted length in bytes.
    #[must_use]
    pub const fn min_len(self) -> usize {
        match self {
            Self::AccountPassword => 8,
            Self::DiskPassphrase => 12,
            Self::Identifier => 1,
        }
    }
}

/// Where a secret value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// A `PROVISION_*` environment variable.
    Env,
    /// The age-encrypted secrets file.
    EncryptedFile,
    /// An interactive prompt.
    Prompt,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Env => "environment",
            Self::EncryptedFile => "encrypted file",
            Self::Prompt => "prompt",
        })
    }
}

/// One secret value. Zeroized on drop; `Debug` never shows the content.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretValue(String);

impl SecretValue {
    /// Wrap a plaintext value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the plaintext. Callers must not log or persist it.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue([redacted])")
    }
}

#[derive(Debug)]
struct SecretEntry {
    name: SecretName,
    value: SecretValue,
    provenance: Provenance,
}

/// In-memory collection of sourced secrets for one run.
///
/// The bundle is never serialized. Dropping it zeroizes every value.
#[derive(Default)]
pub struct SecretBundle {
    entries: Vec<SecretEntry>,
}

impl SecretBundle {
    /// An empty bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing any previous entry for the same name.
    pub fn insert(&mut self, name: SecretName, value: SecretValue, provenance: Provenance) {
        self.entries.retain(|entry| entry.name != name);
        self.entries.push(SecretEntry {
            name,
            value,
            provenance,
        });
    }

    /// Value for `name`, if present.
    #[must_use]
    pub fn get(&self, name: SecretName) -> Option<&SecretValue> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.value)
    }

    /// Which channel produced `name`, if present.
    #[must_use]
    pub fn provenance(&self, name: SecretName) -> Option<Provenance> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.provenance)
    }

    /// Names present, in insertion order.
    #[must_use]
    pub fn names(&self) -> Vec<SecretName> {
        self.entries.iter().map(|entry| entry.name).collect()
    }

    /// Number of secrets held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bundle holds no secrets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for SecretBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for entry in &self.entries {
            map.entry(&entry.name.as_str(), &entry.provenance);
        }
        map.finish()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn name_keys_are_stable() {
        assert_eq!(SecretName::UserPassword.as_str(), "user_password");
        assert_eq!(SecretName::LuksPassphrase.as_str(), "luks_passphrase");
        assert_eq!(SecretName::WifiSsid.as_str(), "wifi_ssid");
    }

    #[test]
    fn env_vars_follow_the_prefix_convention() {
        for name in SecretName::ALL {
            let var = name.env_var();
            assert!(var.starts_with("PROVISION_"), "{var}");
            assert_eq!(
                var.trim_start_matches("PROVISION_").to_lowercase(),
                name.as_str()
            );
        }
    }

    #[test]
    fn from_key_round_trips() {
        for name in SecretName::ALL {
            assert_eq!(SecretName::from_key(name.as_str()), Some(name));
        }
        assert_eq!(SecretName::from_key("api_token"), None);
    }

    #[test]
    fn class_minimums() {
        assert_eq!(SecretName::UserPassword.class().min_len(), 8);
        assert_eq!(SecretName::RootPassword.class().min_len(), 8);
        assert_eq!(SecretName::LuksPassphrase.class().min_len(), 12);
        assert_eq!(SecretName::WifiSsid.class().min_len(), 1);
        assert_eq!(SecretName::WifiPassword.class().min_len(), 8);
    }

    #[test]
    fn secret_value_debug_is_redacted() {
        let value = SecretValue::new("hunter2hunter2");
        let rendered = format!("{value:?}");
        assert!(!rendered.contains("hunter2"), "got: {rendered}");
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn bundle_stores_and_replaces() {
        let mut bundle = SecretBundle::new();
        bundle.insert(
            SecretName::RootPassword,
            SecretValue::new("first-value"),
            Provenance::Env,
        );
        bundle.insert(
            SecretName::RootPassword,
            SecretValue::new("second-value"),
            Provenance::Prompt,
        );
        assert_eq!(bundle.len(), 1);
        assert_eq!(
            bundle.get(SecretName::RootPassword).unwrap().expose(),
            "second-value"
        );
        assert_eq!(
            bundle.provenance(SecretName::RootPassword),
            Some(Provenance::Prompt)
        );
    }

    #[test]
    fn bundle_debug_lists_provenance_not_values() {
        let mut bundle = SecretBundle::new();
        bundle.insert(
            SecretName::WifiPassword,
            SecretValue::new("super-secret-psk"),
            Provenance::EncryptedFile,
        );
        let rendered = format!("{bundle:?}");
        assert!(!rendered.contains("super-secret-psk"), "got: {rendered}");
        assert!(rendered.contains("wifi_password"));
        assert!(rendered.contains("EncryptedFile"));
    }
}
