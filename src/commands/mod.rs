//! Top-level subcommand orchestration.

pub mod apply;
pub mod check;
pub mod plan;

use std::path::PathBuf;

use anyhow::{Context as _, Result};

use crate::cli::GlobalOpts;
use crate::config::profiles::{self, Profile};
use crate::config::resolver::ResolvedConfig;
use crate::config::settings::Settings;
use crate::config;
use crate::logging::Logger;

/// Shared state produced by the common command setup sequence.
///
/// Encapsulates root discovery, profile resolution, configuration loading,
/// and settings validation so that each command does not have to repeat
/// the boilerplate.
#[derive(Debug)]
pub struct CommandSetup {
    /// Configuration root directory.
    pub root: PathBuf,
    /// Resolved deployment profile.
    pub profile: Profile,
    /// Host name used for layer selection.
    pub host: String,
    /// Merged configuration document.
    pub config: ResolvedConfig,
    /// Typed view of the merged document.
    pub settings: Settings,
}

impl CommandSetup {
    /// Resolve the root, profile, host, and group, then load configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be determined, the
    /// profile cannot be resolved, or any configuration layer fails to
    /// load, merge, or deserialize.
    pub fn init(global: &GlobalOpts, log: &Logger) -> Result<Self> {
        let root = resolve_root(global)?;
        let host = resolve_host(global)?;
        let group = global.group.clone().unwrap_or_else(|| "all".to_string());

        log.stage("Resolving profile");
        let profile =
            profiles::resolve_from_args(global.profile.as_deref(), &root, global.non_interactive)?;
        log.info(&format!("profile: {}", profile.name));

        log.stage("Loading configuration");
        log.debug(&format!("root: {}", root.display()));
        log.debug(&format!("host: {host}, group: {group}"));
        let config = config::load(&root, &profile.name, &host, &group)
            .with_context(|| format!("failed to load configuration from {}", root.display()))?;
        let settings = Settings::from_resolved(&config)?;

        let package_count = settings.packages.base.len()
            + settings.packages.extra.len()
            + settings.packages.dev.len()
            + settings.packages.aur.len();
        log.debug(&format!("{} sysctl keys", settings.hardening.sysctl.len()));
        log.info(&format!(
            "loaded {} packages, {} services, {} file renders",
            package_count,
            settings.services.enable.len() + settings.services.disable.len(),
            settings.files.render.len(),
        ));

        let warnings = settings.validate();
        if !warnings.is_empty() {
            log.warn(&format!(
                "found {} configuration warning(s):",
                warnings.len()
            ));
            for warning in &warnings {
                log.warn(&format!("  [{}]: {}", warning.item, warning.message));
            }
        }

        Ok(Self {
            root,
            profile,
            host,
            config,
            settings,
        })
    }
}

/// Resolve the configuration root from CLI arguments or the environment.
///
/// # Errors
///
/// Returns an error if no root was given and the current directory does
/// not hold a `vars/global.toml`.
pub fn resolve_root(global: &GlobalOpts) -> Result<PathBuf> {
    if let Some(ref root) = global.root {
        return Ok(root.clone());
    }

    if let Ok(root) = std::env::var("PROVISION_ROOT") {
        return Ok(PathBuf::from(root));
    }

    let cwd = std::env::current_dir()?;
    if cwd.join("vars").join("global.toml").exists() {
        return Ok(cwd);
    }

    anyhow::bail!("cannot determine configuration root. Use --root or set PROVISION_ROOT")
}

/// Resolve the host name from CLI arguments or the system hostname.
fn resolve_host(global: &GlobalOpts) -> Result<String> {
    if let Some(ref host) = global.host {
        return Ok(host.clone());
    }
    let name = hostname::get().context("failed to read system hostname")?;
    Ok(name.to_string_lossy().into_owned())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn opts() -> GlobalOpts {
        GlobalOpts {
            profile: None,
            dry_run: false,
            root: None,
            host: None,
            group: None,
            secrets_file: None,
            non_interactive: true,
        }
    }

    #[test]
    fn resolve_root_uses_explicit_root() {
        let global = GlobalOpts {
            root: Some(PathBuf::from("/explicit/path")),
            ..opts()
        };
        let result = resolve_root(&global).unwrap();
        assert_eq!(result, PathBuf::from("/explicit/path"));
    }

    #[test]
    fn resolve_host_uses_explicit_host() {
        let global = GlobalOpts {
            host: Some("phoenix".to_string()),
            ..opts()
        };
        assert_eq!(resolve_host(&global).unwrap(), "phoenix");
    }

    #[test]
    fn resolve_host_falls_back_to_system_hostname() {
        let name = resolve_host(&opts()).unwrap();
        assert!(!name.is_empty(), "system hostname should not be empty");
    }
}
