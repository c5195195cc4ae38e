//! Secret validation and injection under `secrets.*`.
//!
//! Sourced values are validated (minimum lengths per class, well-known
//! placeholders rejected outright) and then grafted into a copy of the
//! resolved document under the reserved `secrets` table, where templates
//! reference them like any other key. The injected document exists for
//! rendering only; nothing may serialize or print it.

use toml::{Table, Value};

use crate::config::layers::RESERVED_NAMESPACE;
use crate::config::resolver::ResolvedConfig;
use crate::config::settings::Settings;
use crate::error::SecretError;
use crate::secrets::{SecretBundle, SecretClass, SecretName, SecretValue};

/// Values rejected regardless of length.
const PLACEHOLDER_VALUES: &[&str] = &[
    "changeme",
    "change-me",
    "password",
    "correct-horse-battery-staple",
    "example-password",
];

/// Which secrets this configuration requires.
///
/// Password secrets apply while password management is on (the user
/// password only when a login account is declared); the LUKS passphrase
/// when an encrypted device is configured; the Wi-Fi pair when a
/// connection is provisioned.
#[must_use]
pub fn required_secrets(settings: &Settings) -> Vec<SecretName> {
    let mut required = Vec::new();

    if settings.users.manage_passwords {
        if settings.users.login.is_some() {
            required.push(SecretName::UserPassword);
        }
        required.push(SecretName::RootPassword);
    }
    if settings.storage.luks.device.is_some() {
        required.push(SecretName::LuksPassphrase);
    }
    if settings.network.wifi.enabled {
        required.push(SecretName::WifiSsid);
        required.push(SecretName::WifiPassword);
    }

    required
}

fn check(name: SecretName, value: &SecretValue) -> Result<(), SecretError> {
    let text = value.expose();

    if PLACEHOLDER_VALUES
        .iter()
        .any(|placeholder| placeholder.eq_ignore_ascii_case(text))
    {
        return Err(SecretError::Weak {
            name: name.to_string(),
            rule: "value is a well-known placeholder".to_string(),
        });
    }

    let min = name.class().min_len();
    let len = text.chars().count();
    if len < min {
        let rule = match name.class() {
            SecretClass::Identifier => "must not be empty".to_string(),
            SecretClass::AccountPassword | SecretClass::DiskPassphrase => {
                format!("must be at least {min} characters (got {len})")
            }
        };
        return Err(SecretError::Weak {
            name: name.to_string(),
            rule,
        });
    }

    Ok(())
}

/// Validate every value in the bundle.
///
/// # Errors
///
/// Returns [`SecretError::Weak`] for the first value that is too short
/// for its class or matches a placeholder.
pub fn validate(bundle: &SecretBundle) -> Result<(), SecretError> {
    for name in bundle.names() {
        if let Some(value) = bundle.get(name) {
            check(name, value)?;
        }
    }
    Ok(())
}

/// Validate the bundle and graft it into a copy of the resolved document
/// under `secrets.*`.
///
/// Layer loading rejects user-defined `secrets` keys, so the graft never
/// collides with configuration.
///
/// # Errors
///
/// Returns [`SecretError::Weak`] when validation fails; nothing is
/// injected in that case.
pub fn inject(
    config: &ResolvedConfig,
    bundle: &SecretBundle,
) -> Result<ResolvedConfig, SecretError> {
    validate(bundle)?;

    let mut doc = config.clone().into_table();
    let mut secrets = Table::new();
    for name in bundle.names() {
        if let Some(value) = bundle.get(name) {
            secrets.insert(
                name.as_str().to_string(),
                Value::String(value.expose().to_string()),
            );
        }
    }
    doc.insert(RESERVED_NAMESPACE.to_string(), Value::Table(secrets));

    Ok(ResolvedConfig::from_table(doc))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::secrets::Provenance;

    fn settings(content: &str) -> Settings {
        let resolved =
            ResolvedConfig::from_table(content.parse().expect("test doc must be valid TOML"));
        Settings::from_resolved(&resolved).expect("test settings must deserialize")
    }

    fn bundle_with(name: SecretName, value: &str) -> SecretBundle {
        let mut bundle = SecretBundle::new();
        bundle.insert(name, SecretValue::new(value), Provenance::Env);
        bundle
    }

    // -----------------------------------------------------------------------
    // Required secrets
    // -----------------------------------------------------------------------

    #[test]
    fn defaults_require_only_the_root_password() {
        assert_eq!(
            required_secrets(&settings("")),
            vec![SecretName::RootPassword]
        );
    }

    #[test]
    fn login_account_adds_the_user_password() {
        assert_eq!(
            required_secrets(&settings("[users]\nlogin = \"sam\"\n")),
            vec![SecretName::UserPassword, SecretName::RootPassword]
        );
    }

    #[test]
    fn disabling_password_management_drops_passwords() {
        assert!(required_secrets(&settings(
            "[users]\nlogin = \"sam\"\nmanage_passwords = false\n"
        ))
        .is_empty());
    }

    #[test]
    fn luks_device_requires_a_passphrase() {
        let required = required_secrets(&settings("[storage.luks]\ndevice = \"/dev/sdb1\"\n"));
        assert!(required.contains(&SecretName::LuksPassphrase));
    }

    #[test]
    fn wifi_requires_ssid_and_password() {
        let required = required_secrets(&settings("[network.wifi]\nenabled = true\n"));
        assert!(required.contains(&SecretName::WifiSsid));
        assert!(required.contains(&SecretName::WifiPassword));
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    #[test]
    fn seven_character_password_is_weak() {
        let err = validate(&bundle_with(SecretName::RootPassword, "sevench")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Weak secret 'root_password': must be at least 8 characters (got 7)"
        );
    }

    #[test]
    fn eight_character_password_passes() {
        assert!(validate(&bundle_with(SecretName::RootPassword, "eightchr")).is_ok());
    }

    #[test]
    fn eleven_character_passphrase_is_weak() {
        let err = validate(&bundle_with(SecretName::LuksPassphrase, "elevenchars")).unwrap_err();
        assert!(err.to_string().contains("at least 12"), "got: {err}");
    }

    #[test]
    fn twelve_character_passphrase_passes() {
        assert!(validate(&bundle_with(SecretName::LuksPassphrase, "twelve-chars")).is_ok());
    }

    #[test]
    fn long_placeholder_is_still_rejected() {
        let err = validate(&bundle_with(
            SecretName::LuksPassphrase,
            "correct-horse-battery-staple",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("placeholder"), "got: {err}");
    }

    #[test]
    fn placeholder_match_ignores_case() {
        let err = validate(&bundle_with(SecretName::UserPassword, "ChangeMe")).unwrap_err();
        assert!(err.to_string().contains("placeholder"), "got: {err}");
    }

    #[test]
    fn empty_ssid_is_rejected() {
        let err = validate(&bundle_with(SecretName::WifiSsid, "")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Weak secret 'wifi_ssid': must not be empty"
        );
    }

    #[test]
    fn one_character_ssid_passes() {
        assert!(validate(&bundle_with(SecretName::WifiSsid, "x")).is_ok());
    }

    // -----------------------------------------------------------------------
    // Injection
    // -----------------------------------------------------------------------

    #[test]
    fn injected_values_live_under_the_reserved_table() {
        let config = ResolvedConfig::from_table("hostname = \"phoenix\"\n".parse().unwrap());
        let mut bundle = SecretBundle::new();
        bundle.insert(
            SecretName::RootPassword,
            SecretValue::new("a-long-password"),
            Provenance::Env,
        );
        bundle.insert(
            SecretName::WifiSsid,
            SecretValue::new("home-net"),
            Provenance::Prompt,
        );

        let injected = inject(&config, &bundle).unwrap();
        assert_eq!(
            injected.get_str("secrets.root_password"),
            Some("a-long-password")
        );
        assert_eq!(injected.get_str("secrets.wifi_ssid"), Some("home-net"));
        assert_eq!(injected.get_str("hostname"), Some("phoenix"));
    }

    #[test]
    fn weak_bundle_is_not_injected() {
        let config = ResolvedConfig::from_table(Table::new());
        let err = inject(&config, &bundle_with(SecretName::RootPassword, "short")).unwrap_err();
        assert!(matches!(err, SecretError::Weak { .. }), "got: {err}");
    }

    #[test]
    fn empty_bundle_injects_an_empty_table() {
        let config = ResolvedConfig::from_table(Table::new());
        let injected = inject(&config, &SecretBundle::new()).unwrap();
        assert!(injected.get("secrets").unwrap().as_table().unwrap().is_empty());
    }
}
