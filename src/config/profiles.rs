//! Profile discovery and resolution.
//!
//! A profile is a deployment persona (`work`, `personal`, `development`)
//! backed by one layer file under `profiles/`. The set of known profiles is
//! whatever `.toml` files exist in that directory.

use std::path::Path;

use anyhow::Result;

use crate::config::layers::LayerName;
use crate::error::ConfigError;

/// A resolved profile identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// Validated profile name.
    pub name: String,
}

impl Profile {
    /// The layer identity this profile contributes at `profile` precedence.
    #[must_use]
    pub fn layer_name(&self) -> LayerName {
        LayerName::Profile(self.name.clone())
    }
}

/// All profile names defined under `<root>/profiles/`, sorted.
///
/// A missing directory yields an empty list rather than an error; the
/// caller's resolve step will then fail with the empty set spelled out.
#[must_use]
pub fn available(root: &Path) -> Vec<String> {
    let dir = root.join("profiles");
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
            } else {
                None
            }
        })
        .collect();
    names.sort();
    names
}

/// Resolve a profile by name against the profiles directory.
///
/// # Errors
///
/// Returns [`ConfigError::UnknownProfile`] listing the available names if no
/// `profiles/<name>.toml` exists.
pub fn resolve(root: &Path, name: &str) -> Result<Profile, ConfigError> {
    let names = available(root);
    if names.iter().any(|n| n == name) {
        Ok(Profile {
            name: name.to_string(),
        })
    } else {
        let available = if names.is_empty() {
            "none".to_string()
        } else {
            names.join(", ")
        };
        Err(ConfigError::UnknownProfile {
            name: name.to_string(),
            available,
        })
    }
}

/// Interactively prompt the operator to select a profile.
///
/// # Errors
///
/// Returns an error if no profiles exist or the prompt cannot be read.
pub fn prompt_interactive(root: &Path) -> Result<String> {
    let options = available(root);
    if options.is_empty() {
        anyhow::bail!("no profiles defined under {}", root.join("profiles").display());
    }

    let choice = inquire::Select::new("Select a profile:", options).prompt()?;
    Ok(choice)
}

/// Resolve the profile from the CLI argument or an interactive prompt.
///
/// # Errors
///
/// Returns an error if the name is unknown, prompting is disabled and no
/// name was given, or the prompt fails.
pub fn resolve_from_args(
    cli_profile: Option<&str>,
    root: &Path,
    non_interactive: bool,
) -> Result<Profile> {
    let name = if let Some(name) = cli_profile {
        name.to_string()
    } else if non_interactive {
        anyhow::bail!("no profile selected (pass --profile in non-interactive mode)");
    } else {
        prompt_interactive(root)?
    };

    Ok(resolve(root, &name)?)
}
