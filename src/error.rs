//! Domain-specific error types for the provisioning engine.
//!
//! This module provides a structured error hierarchy using [`thiserror`].
//! Internal modules return typed errors (e.g., [`ConfigError`], [`SecretError`])
//! while command handlers at the CLI boundary convert them to [`anyhow::Error`]
//! via the standard `?` operator.
//!
//! # Error hierarchy
//!
//! ```text
//! ProvisionError
//! ├── Config(ConfigError) — layer loading, profile resolution, merge conflicts
//! ├── Secret(SecretError) — secret channels, decryption, strength validation
//! └── Plan(PlanError)     — plan construction hard stops
//! ```
//!
//! All three classes are fatal before the first action executes: a run never
//! reaches the executor with a partially validated configuration.

use thiserror::Error;

/// Top-level error type for the provisioning engine.
///
/// Aggregates domain-specific sub-errors and is convertible to
/// [`anyhow::Error`] for use at CLI command boundaries.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Configuration-related error (layer loading, profile resolution, merge).
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Secret acquisition or validation error.
    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    /// Plan construction error (excluded packages, service conflicts).
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),
}

/// Errors that arise from layer loading and configuration resolution.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The requested profile name has no layer file under `profiles/`.
    #[error("Unknown profile '{name}' (available: {available})")]
    UnknownProfile {
        /// The name that was requested.
        name: String,
        /// Comma-separated list of profiles that do exist.
        available: String,
    },

    /// A layer source exists but cannot be parsed as TOML.
    #[error("Failed to load layer '{layer}' from {path}: {message}")]
    LayerLoad {
        /// Layer identity (`global`, `host:phoenix`, ...).
        layer: String,
        /// Path of the offending file.
        path: String,
        /// Parser diagnostic.
        message: String,
    },

    /// A layer defines the reserved `secrets` namespace.
    #[error("Layer '{layer}' defines the reserved key 'secrets'")]
    ReservedNamespace {
        /// Layer identity that carries the reserved key.
        layer: String,
    },

    /// An I/O error occurred while reading a layer file.
    #[error("IO error reading layer file {path}: {source}")]
    Io {
        /// Path to the file that could not be read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A `${...}` expression references a key that cannot be resolved.
    #[error("Unresolved reference in '{key}': {detail}")]
    UnresolvedReference {
        /// Key whose value contains the expression.
        key: String,
        /// What went wrong (undefined target, or the cycle chain).
        detail: String,
    },

    /// A higher layer redefines a key with an incompatible value kind.
    #[error(
        "Type conflict at '{key}': layer '{new_layer}' redefines {old_kind} (from layer '{old_layer}') as {new_kind}"
    )]
    TypeConflict {
        /// Key path where the kinds disagree.
        key: String,
        /// Value kind in the lower-precedence layer.
        old_kind: String,
        /// Lower-precedence layer identity.
        old_layer: String,
        /// Value kind in the higher-precedence layer.
        new_kind: String,
        /// Higher-precedence layer identity.
        new_layer: String,
    },

    /// The resolved document does not fit the typed settings schema.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

/// Errors that arise from secret acquisition and validation.
#[derive(Error, Debug)]
pub enum SecretError {
    /// No channel produced a required secret.
    #[error("Missing required secret '{name}' (set {env_var}, or provide it via secrets file or prompt)")]
    Missing {
        /// Secret name (`user_password`, ...).
        name: String,
        /// Environment variable that would satisfy it.
        env_var: String,
    },

    /// The encrypted secrets file could not be decrypted.
    #[error("Failed to decrypt secrets file {path}: {message}")]
    Decryption {
        /// Path of the encrypted file.
        path: String,
        /// Reason reported by the cipher (wrong passphrase, corrupt data).
        message: String,
    },

    /// A secrets file body could not be encrypted.
    #[error("Failed to encrypt secrets: {message}")]
    Encryption {
        /// Reason reported by the cipher.
        message: String,
    },

    /// The decrypted secrets document is not valid TOML.
    #[error("Secrets file {path} did not decrypt to valid TOML: {message}")]
    Parse {
        /// Path of the encrypted file.
        path: String,
        /// Parser diagnostic.
        message: String,
    },

    /// An I/O error occurred while reading the encrypted secrets file.
    #[error("IO error reading secrets file {path}: {source}")]
    Io {
        /// Path to the file that could not be read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An interactive prompt could not be read.
    #[error("Failed to read secret '{name}' from prompt: {message}")]
    Prompt {
        /// Secret name being prompted for.
        name: String,
        /// Terminal error description.
        message: String,
    },

    /// A secret value failed a strength or placeholder rule.
    #[error("Weak secret '{name}': {rule}")]
    Weak {
        /// Secret name that failed validation.
        name: String,
        /// The rule that was violated.
        rule: String,
    },
}

/// Errors that arise while constructing the execution plan.
#[derive(Error, Debug)]
pub enum PlanError {
    /// The install request contains packages on the excluded list.
    #[error("Refusing to install excluded package(s): {packages}")]
    ExcludedPackage {
        /// Comma-separated excluded names found in the request.
        packages: String,
    },

    /// The same unit appears in both the enable and disable lists.
    #[error("Conflicting service state: {units} listed for both enable and disable")]
    ConflictingServiceState {
        /// Comma-separated unit names with conflicting state.
        units: String,
    },
}
