//! Variable layer store: named, immutable configuration sources.
//!
//! A [`ConfigLayer`] is one nested TOML document at a fixed precedence level.
//! The [`LayerStore`] knows where each layer lives under the config root and
//! produces exactly four layers per run, lowest precedence first.

use std::fmt;
use std::path::PathBuf;

use toml::Table;

use crate::config::profiles;
use crate::error::ConfigError;

/// Key reserved for injected secret material; no layer may define it.
pub const RESERVED_NAMESPACE: &str = "secrets";

/// Identity of a configuration layer, in ascending precedence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerName {
    /// Defaults for every machine (`vars/global.toml`).
    Global,
    /// Group-level defaults (`vars/groups/<name>.toml`).
    Group(String),
    /// Host-specific overrides (`vars/hosts/<name>.toml`).
    Host(String),
    /// The selected deployment persona (`profiles/<name>.toml`).
    Profile(String),
}

impl fmt::Display for LayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Group(name) => write!(f, "group:{name}"),
            Self::Host(name) => write!(f, "host:{name}"),
            Self::Profile(name) => write!(f, "profile:{name}"),
        }
    }
}

/// One named, immutable configuration layer.
///
/// Created by [`LayerStore::load`] at process start and discarded at process
/// end; never mutated in between.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    name: LayerName,
    doc: Table,
}

impl ConfigLayer {
    /// Wrap a parsed document as a layer, rejecting the reserved namespace.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReservedNamespace`] if `doc` defines a
    /// top-level `secrets` key.
    pub fn new(name: LayerName, doc: Table) -> Result<Self, ConfigError> {
        if doc.contains_key(RESERVED_NAMESPACE) {
            return Err(ConfigError::ReservedNamespace {
                layer: name.to_string(),
            });
        }
        Ok(Self { name, doc })
    }

    /// An empty layer that keeps its identity (absent optional source file).
    #[must_use]
    pub fn empty(name: LayerName) -> Self {
        Self {
            name,
            doc: Table::new(),
        }
    }

    /// Layer identity.
    #[must_use]
    pub const fn name(&self) -> &LayerName {
        &self.name
    }

    /// The layer's document.
    #[must_use]
    pub const fn doc(&self) -> &Table {
        &self.doc
    }

    /// Whether the layer contributes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc.is_empty()
    }
}

/// Loads the four layers for a run from fixed locations under the config root.
#[derive(Debug)]
pub struct LayerStore {
    root: PathBuf,
    group: String,
    host: String,
}

impl LayerStore {
    /// Create a store rooted at `root` for the given group and host identity.
    pub fn new(root: impl Into<PathBuf>, group: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            group: group.into(),
            host: host.into(),
        }
    }

    /// Path of a layer's source file and whether the file must exist.
    ///
    /// The global layer is required; group and host overlays are optional
    /// (an absent file is an empty layer). Profile files are validated
    /// separately by [`profiles::resolve`] before they reach `load`.
    fn source(&self, name: &LayerName) -> (PathBuf, bool) {
        match name {
            LayerName::Global => (self.root.join("vars/global.toml"), true),
            LayerName::Group(g) => (self.root.join(format!("vars/groups/{g}.toml")), false),
            LayerName::Host(h) => (self.root.join(format!("vars/hosts/{h}.toml")), false),
            LayerName::Profile(p) => (self.root.join(format!("profiles/{p}.toml")), true),
        }
    }

    /// Load a single layer from its source file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::LayerLoad`] if a required source is missing or
    /// the file is not valid TOML, [`ConfigError::Io`] if it cannot be read,
    /// and [`ConfigError::ReservedNamespace`] if it defines `secrets`.
    pub fn load(&self, name: &LayerName) -> Result<ConfigLayer, ConfigError> {
        let (path, required) = self.source(name);

        if !path.exists() {
            if required {
                return Err(ConfigError::LayerLoad {
                    layer: name.to_string(),
                    path: path.display().to_string(),
                    message: "file not found".to_string(),
                });
            }
            return Ok(ConfigLayer::empty(name.clone()));
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let doc: Table = content.parse().map_err(|e: toml::de::Error| {
            ConfigError::LayerLoad {
                layer: name.to_string(),
                path: path.display().to_string(),
                message: e.message().to_string(),
            }
        })?;

        ConfigLayer::new(name.clone(), doc)
    }

    /// The four layers for `profile`, lowest precedence first.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownProfile`] if `profile` has no layer file,
    /// or any error from [`LayerStore::load`].
    pub fn layers(&self, profile: &str) -> Result<Vec<ConfigLayer>, ConfigError> {
        let profile = profiles::resolve(&self.root, profile)?;

        let names = [
            LayerName::Global,
            LayerName::Group(self.group.clone()),
            LayerName::Host(self.host.clone()),
            profile.layer_name(),
        ];

        names.iter().map(|name| self.load(name)).collect()
    }
}
