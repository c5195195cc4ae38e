//! Typed view over the resolved configuration.
//!
//! The planner works against [`Settings`], not the raw document. Keys the
//! planner does not consume (role markers, template inputs) stay in the
//! resolved document and are simply not mirrored here, so unknown keys are
//! never an error.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::config::resolver::ResolvedConfig;
use crate::error::ConfigError;

/// Minimum length for octal mode strings.
const OCTAL_MODE_MIN_LEN: usize = 3;

/// Maximum length for octal mode strings.
const OCTAL_MODE_MAX_LEN: usize = 4;

fn default_file_mode() -> String {
    "0644".to_string()
}

fn default_wifi_connection() -> String {
    "wifi".to_string()
}

/// Everything the planner reads, deserialized from the resolved document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Desired machine hostname, if managed.
    pub hostname: Option<String>,
    /// Package install and exclusion lists.
    pub packages: Packages,
    /// Systemd units to enable or disable.
    pub services: Services,
    /// Files rendered from templates.
    pub files: Files,
    /// Kernel hardening knobs.
    pub hardening: Hardening,
    /// Account management.
    pub users: Users,
    /// Disk encryption.
    pub storage: Storage,
    /// Network provisioning.
    pub network: Network,
}

/// Package lists. `base`, `extra` and (with `--dev`) `dev` install via
/// pacman; `aur` installs via the AUR helper under `aur_user`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Packages {
    /// Core set installed on every host.
    pub base: Vec<String>,
    /// Host- or profile-specific additions.
    pub extra: Vec<String>,
    /// AUR packages, installed via the helper.
    pub aur: Vec<String>,
    /// Development tooling, included only with `--dev`.
    pub dev: Vec<String>,
    /// Packages that must never be selected for install. Planning stops
    /// with a hard error if one appears in any install list.
    pub excluded: Vec<String>,
    /// Unprivileged account the AUR helper runs as.
    pub aur_user: String,
}

impl Default for Packages {
    fn default() -> Self {
        Self {
            base: Vec::new(),
            extra: Vec::new(),
            aur: Vec::new(),
            dev: Vec::new(),
            excluded: Vec::new(),
            aur_user: "aur_builder".to_string(),
        }
    }
}

/// Systemd unit state. A unit listed in both vectors is a planning error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Services {
    /// Units to enable and start.
    pub enable: Vec<String>,
    /// Units to disable and stop.
    pub disable: Vec<String>,
}

/// Files rendered from templates in the configuration tree.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Files {
    /// Templates to render, in listed order.
    pub render: Vec<FileRender>,
}

/// One template to render.
#[derive(Debug, Clone, Deserialize)]
pub struct FileRender {
    /// Template path relative to the configuration root.
    pub src: String,
    /// Absolute destination path.
    pub dest: String,
    /// Octal permission mode for the destination.
    #[serde(default = "default_file_mode")]
    pub mode: String,
    /// Unit to restart when rendering changes the destination.
    pub notify: Option<String>,
}

/// Kernel parameters applied with sysctl.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Hardening {
    /// `key = value` pairs; values may be integers or strings.
    pub sysctl: BTreeMap<String, toml::Value>,
}

/// Account management.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Users {
    /// Primary login account, if one is managed besides root.
    pub login: Option<String>,
    /// Whether account passwords are set during apply.
    pub manage_passwords: bool,
}

impl Default for Users {
    fn default() -> Self {
        Self {
            login: None,
            manage_passwords: true,
        }
    }
}

/// Disk encryption settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Storage {
    /// LUKS container settings.
    pub luks: Luks,
}

/// LUKS container to initialize. Formatting only happens when `device`
/// is set and the device is not already a LUKS container.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Luks {
    /// Block device to format, e.g. `/dev/sdb2`.
    pub device: Option<String>,
}

/// Network provisioning settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Network {
    /// Wi-Fi connection settings.
    pub wifi: Wifi,
}

/// Wi-Fi connection provisioned through NetworkManager.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Wifi {
    /// Whether a connection is provisioned at all.
    pub enabled: bool,
    /// Connection profile name, used for the keyfile under
    /// `/etc/NetworkManager/system-connections/`.
    pub connection: String,
}

impl Default for Wifi {
    fn default() -> Self {
        Self {
            enabled: false,
            connection: default_wifi_connection(),
        }
    }
}

/// A non-fatal configuration issue reported before planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    /// The key or item that triggered the warning.
    pub item: String,
    /// Human-readable warning message.
    pub message: String,
}

impl ValidationWarning {
    /// Build a warning for `item`.
    #[must_use]
    pub fn new(item: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            message: message.into(),
        }
    }
}

impl Settings {
    /// Deserialize the planner's view from a resolved document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSettings`] when a known key has the
    /// wrong shape (e.g. `packages.base` is not a list of strings).
    pub fn from_resolved(config: &ResolvedConfig) -> Result<Self, ConfigError> {
        config
            .doc()
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::InvalidSettings(e.message().to_string()))
    }

    /// Check for suspicious-but-survivable configuration and return
    /// warnings to surface before planning.
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        let mut seen = std::collections::BTreeSet::new();
        for list in [
            &self.packages.base,
            &self.packages.extra,
            &self.packages.aur,
            &self.packages.dev,
        ] {
            for package in list {
                if !seen.insert(package.as_str()) {
                    warnings.push(ValidationWarning::new(
                        package.clone(),
                        "package listed more than once across install lists",
                    ));
                }
            }
        }

        for render in &self.files.render {
            if !render.dest.starts_with('/') {
                warnings.push(ValidationWarning::new(
                    render.dest.clone(),
                    "render destination should be an absolute path",
                ));
            }
            let mode_ok = (OCTAL_MODE_MIN_LEN..=OCTAL_MODE_MAX_LEN).contains(&render.mode.len())
                && render.mode.chars().all(|c| ('0'..='7').contains(&c));
            if !mode_ok {
                warnings.push(ValidationWarning::new(
                    render.dest.clone(),
                    format!("invalid octal mode '{}'", render.mode),
                ));
            }
        }

        let mut seen_units = std::collections::BTreeSet::new();
        for unit in &self.services.enable {
            if !seen_units.insert(unit.as_str()) {
                warnings.push(ValidationWarning::new(
                    unit.clone(),
                    "unit listed more than once under services.enable",
                ));
            }
        }

        if matches!(self.hostname.as_deref(), Some("")) {
            warnings.push(ValidationWarning::new(
                "hostname",
                "hostname is set but empty",
            ));
        }

        warnings
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn resolved(content: &str) -> ResolvedConfig {
        ResolvedConfig::from_table(content.parse().expect("test doc must be valid TOML"))
    }

    #[test]
    fn defaults_from_empty_document() {
        let settings = Settings::from_resolved(&resolved("")).unwrap();
        assert!(settings.hostname.is_none());
        assert!(settings.packages.base.is_empty());
        assert_eq!(settings.packages.aur_user, "aur_builder");
        assert!(settings.users.manage_passwords);
        assert!(!settings.network.wifi.enabled);
        assert_eq!(settings.network.wifi.connection, "wifi");
        assert!(settings.storage.luks.device.is_none());
    }

    #[test]
    fn full_document_deserializes() {
        let settings = Settings::from_resolved(&resolved(
            r#"
            hostname = "phoenix"

            [packages]
            base = ["git", "vim"]
            extra = ["firefox"]
            aur = ["paru-bin"]
            excluded = ["nano"]

            [services]
            enable = ["sshd.service"]
            disable = ["bluetooth.service"]

            [[files.render]]
            src = "templates/vconsole.conf"
            dest = "/etc/vconsole.conf"

            [hardening.sysctl]
            "kernel.kptr_restrict" = 2

            [users]
            login = "sam"

            [storage.luks]
            device = "/dev/sdb1"

            [network.wifi]
            enabled = true
            connection = "home"
            "#,
        ))
        .unwrap();

        assert_eq!(settings.hostname.as_deref(), Some("phoenix"));
        assert_eq!(settings.packages.base, vec!["git", "vim"]);
        assert_eq!(settings.services.disable, vec!["bluetooth.service"]);
        assert_eq!(settings.files.render[0].dest, "/etc/vconsole.conf");
        assert_eq!(settings.files.render[0].mode, "0644");
        assert!(settings.files.render[0].notify.is_none());
        assert_eq!(
            settings.hardening.sysctl["kernel.kptr_restrict"].as_integer(),
            Some(2)
        );
        assert_eq!(settings.users.login.as_deref(), Some("sam"));
        assert_eq!(settings.storage.luks.device.as_deref(), Some("/dev/sdb1"));
        assert!(settings.network.wifi.enabled);
        assert_eq!(settings.network.wifi.connection, "home");
    }

    #[test]
    fn unknown_keys_are_tolerated() {
        let settings = Settings::from_resolved(&resolved(
            "[roles]\nworkstation = true\n\n[storage.swap]\nzram_size = \"6G\"\n",
        ))
        .unwrap();
        assert!(settings.packages.base.is_empty());
    }

    #[test]
    fn wrong_shape_is_invalid_settings() {
        let err = Settings::from_resolved(&resolved("[packages]\nbase = \"git\"\n")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSettings(_)), "got: {err}");
    }

    #[test]
    fn render_notify_round_trips() {
        let settings = Settings::from_resolved(&resolved(
            "[[files.render]]\nsrc = \"t/sshd\"\ndest = \"/etc/ssh/sshd_config\"\nmode = \"0600\"\nnotify = \"sshd.service\"\n",
        ))
        .unwrap();
        assert_eq!(settings.files.render[0].mode, "0600");
        assert_eq!(
            settings.files.render[0].notify.as_deref(),
            Some("sshd.service")
        );
    }

    // -----------------------------------------------------------------------
    // Validation warnings
    // -----------------------------------------------------------------------

    #[test]
    fn duplicate_package_warns() {
        let settings = Settings::from_resolved(&resolved(
            "[packages]\nbase = [\"git\"]\nextra = [\"git\"]\n",
        ))
        .unwrap();
        let warnings = settings.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].item, "git");
    }

    #[test]
    fn relative_dest_warns() {
        let settings = Settings::from_resolved(&resolved(
            "[[files.render]]\nsrc = \"t/x\"\ndest = \"etc/x\"\n",
        ))
        .unwrap();
        let warnings = settings.validate();
        assert!(warnings
            .iter()
            .any(|w| w.message.contains("absolute path")));
    }

    #[test]
    fn bad_mode_warns() {
        let settings = Settings::from_resolved(&resolved(
            "[[files.render]]\nsrc = \"t/x\"\ndest = \"/etc/x\"\nmode = \"rw-r--r--\"\n",
        ))
        .unwrap();
        let warnings = settings.validate();
        assert!(warnings.iter().any(|w| w.message.contains("octal mode")));
    }

    #[test]
    fn clean_settings_have_no_warnings() {
        let settings = Settings::from_resolved(&resolved(
            "hostname = \"phoenix\"\n[packages]\nbase = [\"git\"]\n",
        ))
        .unwrap();
        assert!(settings.validate().is_empty());
    }
}
