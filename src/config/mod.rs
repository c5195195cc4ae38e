//! Layered configuration: load, merge, and resolve.
//!
//! Configuration for a run comes from four TOML layers in fixed precedence
//! order (lowest first):
//!
//! 1. `vars/global.toml` — defaults for every machine (required)
//! 2. `vars/groups/<group>.toml` — group-level defaults (optional)
//! 3. `vars/hosts/<host>.toml` — host-specific overrides (optional)
//! 4. `profiles/<profile>.toml` — the selected deployment persona
//!
//! [`layers::LayerStore`] loads them, [`resolver::resolve`] merges them into a
//! single read-only [`resolver::ResolvedConfig`], and [`settings::Settings`]
//! gives planner code a typed view of the result.

pub mod layers;
pub mod profiles;
pub mod resolver;
pub mod settings;

use std::path::Path;

use crate::error::ConfigError;

/// Load all four layers for `profile` and merge them into one document.
///
/// Convenience wrapper tying [`layers::LayerStore`] to [`resolver::resolve`];
/// commands call this once per run.
///
/// # Errors
///
/// Returns any [`ConfigError`] raised while loading a layer, resolving the
/// profile name, or merging and resolving references.
pub fn load(
    root: &Path,
    profile: &str,
    host: &str,
    group: &str,
) -> Result<resolver::ResolvedConfig, ConfigError> {
    let store = layers::LayerStore::new(root, group, host);
    let layers = store.layers(profile)?;
    resolver::resolve(&layers)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    /// Write a minimal config root (global + one profile) into a temp dir.
    fn minimal_root() -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().expect("failed to create temp dir");
        let root = tmp.path().to_path_buf();
        fs::create_dir_all(root.join("vars")).unwrap();
        fs::create_dir_all(root.join("profiles")).unwrap();
        fs::write(
            root.join("vars/global.toml"),
            "hostname = \"default\"\n\n[packages]\nbase = [\"base-devel\"]\n",
        )
        .unwrap();
        fs::write(root.join("profiles/work.toml"), "hostname = \"desk\"\n").unwrap();
        (tmp, root)
    }

    #[test]
    fn load_merges_profile_over_global() {
        let (_tmp, root) = minimal_root();
        let resolved = super::load(&root, "work", "nohost", "all").unwrap();
        assert_eq!(resolved.get_str("hostname"), Some("desk"));
    }

    #[test]
    fn load_unknown_profile_fails() {
        let (_tmp, root) = minimal_root();
        let err = super::load(&root, "gaming", "nohost", "all").unwrap_err();
        assert!(err.to_string().contains("Unknown profile 'gaming'"));
    }
}
