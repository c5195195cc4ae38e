//! Plan actions: one idempotent check + apply pair per operation.
//!
//! Every action can describe the difference between desired and live
//! state before touching anything, so a converged system applies
//! nothing. Commands that need privileges run under `sudo`; secret
//! values travel to child processes via stdin, never argv.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{bail, Context as _, Result};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use super::RunContext;
use crate::exec::Executor;
use crate::secrets::{SecretName, SecretValue};

/// NetworkManager keyfile directory.
const NM_CONNECTIONS_DIR: &str = "/etc/NetworkManager/system-connections";

/// Package managers the install operation can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    /// Official repositories via pacman.
    Pacman,
    /// AUR packages via paru, run as the builder account.
    Aur,
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pacman => f.write_str("pacman"),
            Self::Aur => f.write_str("aur"),
        }
    }
}

/// Subsystem an action belongs to, for grouping in output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Package installation (pacman and AUR).
    Packages,
    /// Systemd unit state.
    Services,
    /// Rendered configuration files.
    Files,
    /// Kernel parameter hardening.
    Hardening,
    /// Account passwords.
    Users,
    /// Disk encryption.
    Storage,
    /// Wi-Fi connectivity.
    Network,
}

impl Role {
    /// Stable lower-case tag for listings and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Packages => "packages",
            Self::Services => "services",
            Self::Files => "files",
            Self::Hardening => "hardening",
            Self::Users => "users",
            Self::Storage => "storage",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one action checks and applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Install every listed package through one manager invocation.
    InstallPackages {
        /// Which manager performs the install.
        manager: PackageManager,
        /// Packages installed in one batch.
        packages: Vec<String>,
    },
    /// `systemctl enable --now`.
    EnableUnit {
        /// Unit name, e.g. `sshd.service`.
        unit: String,
    },
    /// `systemctl disable --now`.
    DisableUnit {
        /// Unit name.
        unit: String,
    },
    /// Render a template to an absolute destination with an octal mode.
    RenderFile {
        /// Template path relative to the configuration root.
        src: String,
        /// Absolute destination path.
        dest: String,
        /// Octal permission mode for the destination.
        mode: String,
    },
    /// Restart a unit when one of its rendered files changed.
    RestartUnit {
        /// Unit name.
        unit: String,
    },
    /// Set one kernel parameter.
    SetSysctl {
        /// Parameter key, e.g. `kernel.kptr_restrict`.
        key: String,
        /// Desired value in kernel string form.
        value: String,
    },
    /// Set an account password via chpasswd.
    SetPassword {
        /// Account login.
        user: String,
        /// Bundle entry holding the password.
        secret: SecretName,
    },
    /// Initialize a LUKS container on a device that has none.
    FormatLuks {
        /// Block device path.
        device: String,
        /// Bundle entry holding the passphrase.
        secret: SecretName,
    },
    /// Provision a NetworkManager Wi-Fi connection keyfile.
    ConnectWifi {
        /// Connection profile name.
        connection: String,
        /// Bundle entry holding the SSID.
        ssid: SecretName,
        /// Bundle entry holding the pre-shared key.
        psk: SecretName,
    },
}

impl Operation {
    /// Stable operation kind tag used in machine-readable plan output.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InstallPackages { .. } => "package-install",
            Self::EnableUnit { .. } => "service-enable",
            Self::DisableUnit { .. } => "service-disable",
            Self::RenderFile { .. } => "file-render",
            Self::RestartUnit { .. } => "service-restart",
            Self::SetSysctl { .. } => "sysctl-set",
            Self::SetPassword { .. } => "password-set",
            Self::FormatLuks { .. } => "luks-format",
            Self::ConnectWifi { .. } => "wifi-connect",
        }
    }
}

/// One step of the execution plan.
#[derive(Debug, Clone)]
pub struct Action {
    /// Unique name within the plan (`render:/etc/vconsole.conf`).
    pub name: String,
    /// Subsystem the action belongs to.
    pub role: Role,
    /// What to check and apply.
    pub operation: Operation,
    /// Names of actions that must succeed before this one runs.
    pub after: Vec<String>,
    /// Failure degrades to a warning instead of failing the run.
    pub best_effort: bool,
    /// Binary this action needs; evaluated once at plan time.
    pub requires: Option<String>,
}

impl Action {
    /// Whether the live system already matches the desired state.
    ///
    /// Restart actions always report satisfied here; the runner fires
    /// them from render notifications instead.
    ///
    /// # Errors
    ///
    /// Returns an error when the state cannot be determined (query
    /// command missing, unreadable template, invalid mode string).
    pub fn check(&self, ctx: &RunContext<'_>) -> Result<bool> {
        match &self.operation {
            Operation::InstallPackages { packages, .. } => {
                let installed = installed_packages(ctx.executor)?;
                Ok(packages.iter().all(|package| installed.contains(package)))
            }
            Operation::EnableUnit { unit } => {
                Ok(unit_enabled_state(ctx.executor, unit)? == "enabled")
            }
            Operation::DisableUnit { unit } => {
                Ok(unit_enabled_state(ctx.executor, unit)? != "enabled")
            }
            Operation::RenderFile { src, dest, mode } => render_current(ctx, src, dest, mode),
            Operation::RestartUnit { .. } => Ok(true),
            Operation::SetSysctl { key, value } => sysctl_current(ctx.executor, key, value),
            // Password hashes are not inspectable; converge by reapplying.
            Operation::SetPassword { .. } => Ok(false),
            Operation::FormatLuks { device, .. } => {
                let result = ctx
                    .executor
                    .run_unchecked("sudo", &["cryptsetup", "isLuks", device])?;
                Ok(result.success)
            }
            Operation::ConnectWifi { connection, .. } => {
                let result = ctx
                    .executor
                    .run_unchecked("nmcli", &["-t", "-f", "NAME", "connection", "show"])?;
                Ok(result.success
                    && result.stdout.lines().any(|line| line.trim() == connection))
            }
        }
    }

    /// Apply the change. The runner only calls this after [`Self::check`]
    /// reported a difference (or, for restarts, after a notification).
    ///
    /// # Errors
    ///
    /// Returns an error if a command exits non-zero or a file cannot be
    /// written; the runner turns it into a failed outcome.
    pub fn apply(&self, ctx: &RunContext<'_>) -> Result<()> {
        match &self.operation {
            Operation::InstallPackages { manager, packages } => {
                install_packages(ctx, *manager, packages)
            }
            Operation::EnableUnit { unit } => {
                ctx.executor
                    .run("sudo", &["systemctl", "enable", "--now", unit])?;
                Ok(())
            }
            Operation::DisableUnit { unit } => {
                ctx.executor
                    .run("sudo", &["systemctl", "disable", "--now", unit])?;
                Ok(())
            }
            Operation::RenderFile { src, dest, mode } => write_render(ctx, src, dest, mode),
            Operation::RestartUnit { unit } => {
                ctx.executor.run("sudo", &["systemctl", "restart", unit])?;
                Ok(())
            }
            Operation::SetSysctl { key, value } => {
                ctx.executor
                    .run("sudo", &["sysctl", "-w", &format!("{key}={value}")])?;
                Ok(())
            }
            Operation::SetPassword { user, secret } => set_password(ctx, user, *secret),
            Operation::FormatLuks { device, secret } => format_luks(ctx, device, *secret),
            Operation::ConnectWifi {
                connection,
                ssid,
                psk,
            } => connect_wifi(ctx, connection, *ssid, *psk),
        }
    }
}

/// Query the full set of installed package names with a single command.
fn installed_packages(executor: &dyn Executor) -> Result<HashSet<String>> {
    let result = executor.run_unchecked("pacman", &["-Qq"])?;
    if !result.success {
        bail!("pacman -Qq failed: {}", result.stderr.trim());
    }
    Ok(result
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect())
}

fn install_packages(
    ctx: &RunContext<'_>,
    manager: PackageManager,
    packages: &[String],
) -> Result<()> {
    if packages.is_empty() {
        return Ok(());
    }
    // --needed makes reinstalls no-ops, so passing the full list is safe.
    match manager {
        PackageManager::Pacman => {
            let mut args = vec!["pacman", "-S", "--needed", "--noconfirm"];
            args.extend(packages.iter().map(String::as_str));
            ctx.executor.run("sudo", &args)?;
        }
        PackageManager::Aur => {
            let user = ctx.settings.packages.aur_user.as_str();
            let mut args = vec!["-u", user, "paru", "-S", "--needed", "--noconfirm"];
            args.extend(packages.iter().map(String::as_str));
            ctx.executor.run("sudo", &args)?;
        }
    }
    Ok(())
}

/// `systemctl is-enabled` output for a unit (`enabled`, `disabled`,
/// `masked`, `static`, or an error string for unknown units).
fn unit_enabled_state(executor: &dyn Executor, unit: &str) -> Result<String> {
    let result = executor.run_unchecked("systemctl", &["is-enabled", unit])?;
    Ok(result.stdout.trim().to_string())
}

fn render_template(ctx: &RunContext<'_>, src: &str, dest: &str) -> Result<String> {
    let path = ctx.root.join(src);
    let template = fs::read_to_string(&path)
        .with_context(|| format!("failed to read template {}", path.display()))?;
    Ok(ctx.config.expand(&template, dest)?)
}

fn parse_mode(mode: &str) -> Result<u32> {
    u32::from_str_radix(mode, 8).with_context(|| format!("invalid octal mode '{mode}'"))
}

fn content_digest(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

fn render_current(ctx: &RunContext<'_>, src: &str, dest: &str, mode: &str) -> Result<bool> {
    let rendered = render_template(ctx, src, dest)?;
    let want_mode = parse_mode(mode)?;

    let dest_path = Path::new(dest);
    if !dest_path.exists() {
        return Ok(false);
    }
    let current = fs::read(dest_path)
        .with_context(|| format!("failed to read destination {dest}"))?;
    if content_digest(&current) != content_digest(rendered.as_bytes()) {
        return Ok(false);
    }
    let metadata = fs::metadata(dest_path)
        .with_context(|| format!("failed to stat destination {dest}"))?;
    Ok(metadata.permissions().mode() & 0o7777 == want_mode)
}

fn write_render(ctx: &RunContext<'_>, src: &str, dest: &str, mode: &str) -> Result<()> {
    let rendered = render_template(ctx, src, dest)?;
    let mode_bits = parse_mode(mode)?;

    let dest_path = Path::new(dest);
    if let Some(parent) = dest_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(dest_path, rendered).with_context(|| format!("failed to write {dest}"))?;
    fs::set_permissions(dest_path, fs::Permissions::from_mode(mode_bits))
        .with_context(|| format!("failed to set mode on {dest}"))?;
    Ok(())
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn sysctl_current(executor: &dyn Executor, key: &str, value: &str) -> Result<bool> {
    let result = executor.run_unchecked("sysctl", &["-n", key])?;
    if !result.success {
        // Unknown key; let -w surface the real error at apply time.
        return Ok(false);
    }
    Ok(normalize_ws(&result.stdout) == normalize_ws(value))
}

fn require_secret<'a>(ctx: &'a RunContext<'_>, name: SecretName) -> Result<&'a SecretValue> {
    ctx.bundle
        .get(name)
        .with_context(|| format!("secret '{name}' was not sourced"))
}

fn set_password(ctx: &RunContext<'_>, user: &str, secret: SecretName) -> Result<()> {
    let value = require_secret(ctx, secret)?;
    let mut payload = format!("{user}:{}\n", value.expose());
    let result = ctx.executor.run_with_stdin("sudo", &["chpasswd"], &payload);
    payload.zeroize();
    result?;
    Ok(())
}

fn format_luks(ctx: &RunContext<'_>, device: &str, secret: SecretName) -> Result<()> {
    let value = require_secret(ctx, secret)?;
    // No trailing newline: with --key-file=- it would become key material.
    ctx.executor.run_with_stdin(
        "sudo",
        &[
            "cryptsetup",
            "luksFormat",
            "--batch-mode",
            "--key-file=-",
            device,
        ],
        value.expose(),
    )?;
    Ok(())
}

/// NetworkManager keyfile body for a WPA-PSK connection.
fn wifi_keyfile(connection: &str, ssid: &str, psk: &str) -> String {
    format!(
        "[connection]\n\
         id={connection}\n\
         type=wifi\n\
         \n\
         [wifi]\n\
         mode=infrastructure\n\
         ssid={ssid}\n\
         \n\
         [wifi-security]\n\
         key-mgmt=wpa-psk\n\
         psk={psk}\n\
         \n\
         [ipv4]\n\
         method=auto\n\
         \n\
         [ipv6]\n\
         method=auto\n"
    )
}

fn connect_wifi(
    ctx: &RunContext<'_>,
    connection: &str,
    ssid: SecretName,
    psk: SecretName,
) -> Result<()> {
    let ssid_value = require_secret(ctx, ssid)?;
    let psk_value = require_secret(ctx, psk)?;

    let mut keyfile = wifi_keyfile(connection, ssid_value.expose(), psk_value.expose());
    let path = Path::new(NM_CONNECTIONS_DIR).join(format!("{connection}.nmconnection"));
    let write_result = write_keyfile(&path, &keyfile);
    keyfile.zeroize();
    write_result?;

    ctx.executor.run("sudo", &["nmcli", "connection", "reload"])?;
    Ok(())
}

fn write_keyfile(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, content)
        .with_context(|| format!("failed to write {}", path.display()))?;
    // The keyfile carries the PSK; NetworkManager also requires 0600.
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("failed to set mode on {}", path.display()))?;
    Ok(())
}
