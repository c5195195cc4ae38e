//! Declarative Arch Linux host provisioning engine.
//!
//! Converges a host against layered TOML configuration: packages, systemd
//! units, rendered files, kernel hardening, account passwords, disk
//! encryption, and Wi-Fi. Secrets are sourced at run time through ordered
//! channels and injected under a reserved namespace; they never touch the
//! configuration files, the plan output, or the logs.
//!
//! The public API is organised into four layers:
//!
//! - **[`config`]**: load, merge, and resolve layered TOML configuration
//! - **[`secrets`]**: source, validate, and inject run-time secrets
//! - **[`plan`]**: build and execute the ordered idempotent action plan
//! - **[`commands`]**: top-level subcommand orchestration (`apply`, `plan`, `check`)
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod exec;
pub mod logging;
pub mod plan;
pub mod secrets;
