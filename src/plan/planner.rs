//! Plan construction.
//!
//! Turns [`Settings`] into the ordered action list: package installs
//! first, then rendered files with their restart notifications, kernel
//! parameters, account passwords, storage, network, and finally service
//! state. Exclusion and service-conflict violations abort planning, and
//! actions whose required binary is neither present nor about to be
//! installed are dropped here, once, rather than failing at run time.

use std::collections::BTreeSet;

use crate::config::settings::Settings;
use crate::error::PlanError;
use crate::exec::Executor;
use crate::secrets::SecretName;

use super::actions::{Action, Operation, PackageManager, Role};

/// Capability providers: binary name to the packages that ship it.
const PROVIDERS: &[(&str, &[&str])] = &[
    ("paru", &["paru", "paru-bin"]),
    ("nmcli", &["networkmanager"]),
];

/// Options affecting plan construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Include the development package list.
    pub with_dev: bool,
}

/// Build the ordered execution plan for `settings`.
///
/// # Errors
///
/// Returns [`PlanError::ExcludedPackage`] when an install list names an
/// excluded package and [`PlanError::ConflictingServiceState`] when a
/// unit appears under both enable and disable.
pub fn plan(
    settings: &Settings,
    opts: &PlanOptions,
    executor: &dyn Executor,
) -> Result<Vec<Action>, PlanError> {
    let install = install_list(settings, opts);
    check_exclusions(settings, &install)?;
    check_service_conflicts(settings)?;

    let have_install = !install.is_empty();
    let have_aur = !settings.packages.aur.is_empty();
    let after_install: Vec<String> = if have_install {
        vec!["packages:install".to_string()]
    } else {
        Vec::new()
    };

    let mut actions = Vec::new();

    if have_install {
        actions.push(Action {
            name: "packages:install".to_string(),
            role: Role::Packages,
            operation: Operation::InstallPackages {
                manager: PackageManager::Pacman,
                packages: install.clone(),
            },
            after: Vec::new(),
            best_effort: false,
            requires: None,
        });
    }

    if have_aur {
        actions.push(Action {
            name: "packages:aur".to_string(),
            role: Role::Packages,
            operation: Operation::InstallPackages {
                manager: PackageManager::Aur,
                packages: settings.packages.aur.clone(),
            },
            after: after_install.clone(),
            best_effort: false,
            requires: Some("paru".to_string()),
        });
    }

    for render in &settings.files.render {
        actions.push(Action {
            name: format!("render:{}", render.dest),
            role: Role::Files,
            operation: Operation::RenderFile {
                src: render.src.clone(),
                dest: render.dest.clone(),
                mode: render.mode.clone(),
            },
            after: after_install.clone(),
            best_effort: false,
            requires: None,
        });
    }

    // One restart per notified unit, after every render that notifies it.
    let mut notified: Vec<String> = Vec::new();
    for render in &settings.files.render {
        if let Some(unit) = &render.notify {
            if !notified.contains(unit) {
                notified.push(unit.clone());
            }
        }
    }
    for unit in &notified {
        let after: Vec<String> = settings
            .files
            .render
            .iter()
            .filter(|render| render.notify.as_ref() == Some(unit))
            .map(|render| format!("render:{}", render.dest))
            .collect();
        actions.push(Action {
            name: format!("restart:{unit}"),
            role: Role::Services,
            operation: Operation::RestartUnit { unit: unit.clone() },
            after,
            best_effort: false,
            requires: None,
        });
    }

    for (key, value) in &settings.hardening.sysctl {
        let Some(rendered) = sysctl_value(value) else {
            tracing::warn!(key = %key, "skipping sysctl entry with non-scalar value");
            continue;
        };
        actions.push(Action {
            name: format!("sysctl:{key}"),
            role: Role::Hardening,
            operation: Operation::SetSysctl {
                key: key.clone(),
                value: rendered,
            },
            after: Vec::new(),
            best_effort: true,
            requires: None,
        });
    }

    if settings.users.manage_passwords {
        if let Some(login) = &settings.users.login {
            actions.push(Action {
                name: format!("password:{login}"),
                role: Role::Users,
                operation: Operation::SetPassword {
                    user: login.clone(),
                    secret: SecretName::UserPassword,
                },
                after: Vec::new(),
                best_effort: false,
                requires: None,
            });
        }
        actions.push(Action {
            name: "password:root".to_string(),
            role: Role::Users,
            operation: Operation::SetPassword {
                user: "root".to_string(),
                secret: SecretName::RootPassword,
            },
            after: Vec::new(),
            best_effort: false,
            requires: None,
        });
    }

    if let Some(device) = &settings.storage.luks.device {
        actions.push(Action {
            name: format!("luks:{device}"),
            role: Role::Storage,
            operation: Operation::FormatLuks {
                device: device.clone(),
                secret: SecretName::LuksPassphrase,
            },
            after: Vec::new(),
            best_effort: false,
            requires: None,
        });
    }

    if settings.network.wifi.enabled {
        let connection = settings.network.wifi.connection.clone();
        actions.push(Action {
            name: format!("wifi:{connection}"),
            role: Role::Network,
            operation: Operation::ConnectWifi {
                connection,
                ssid: SecretName::WifiSsid,
                psk: SecretName::WifiPassword,
            },
            after: after_install.clone(),
            best_effort: true,
            requires: Some("nmcli".to_string()),
        });
    }

    // Units come from packages, so service state lands after installs.
    let mut package_deps = after_install;
    if have_aur {
        package_deps.push("packages:aur".to_string());
    }
    for unit in &settings.services.enable {
        actions.push(Action {
            name: format!("enable:{unit}"),
            role: Role::Services,
            operation: Operation::EnableUnit { unit: unit.clone() },
            after: package_deps.clone(),
            best_effort: false,
            requires: None,
        });
    }
    for unit in &settings.services.disable {
        actions.push(Action {
            name: format!("disable:{unit}"),
            role: Role::Services,
            operation: Operation::DisableUnit { unit: unit.clone() },
            after: Vec::new(),
            best_effort: false,
            requires: None,
        });
    }

    Ok(filter_capabilities(
        actions,
        &install,
        &settings.packages.aur,
        executor,
    ))
}

/// Pacman install list: base, extra, and with `--dev` the dev list,
/// deduplicated preserving first occurrence.
fn install_list(settings: &Settings, opts: &PlanOptions) -> Vec<String> {
    let dev: &[String] = if opts.with_dev {
        &settings.packages.dev
    } else {
        &[]
    };
    let mut seen = BTreeSet::new();
    let mut install = Vec::new();
    for package in settings
        .packages
        .base
        .iter()
        .chain(&settings.packages.extra)
        .chain(dev)
    {
        if seen.insert(package.as_str()) {
            install.push(package.clone());
        }
    }
    install
}

fn check_exclusions(settings: &Settings, install: &[String]) -> Result<(), PlanError> {
    let excluded: BTreeSet<&str> = settings
        .packages
        .excluded
        .iter()
        .map(String::as_str)
        .collect();
    if excluded.is_empty() {
        return Ok(());
    }

    let mut offenders: Vec<&str> = install
        .iter()
        .chain(&settings.packages.aur)
        .map(String::as_str)
        .filter(|package| excluded.contains(package))
        .collect();
    offenders.sort_unstable();
    offenders.dedup();

    if offenders.is_empty() {
        Ok(())
    } else {
        Err(PlanError::ExcludedPackage {
            packages: offenders.join(", "),
        })
    }
}

fn check_service_conflicts(settings: &Settings) -> Result<(), PlanError> {
    let enable: BTreeSet<&str> = settings
        .services
        .enable
        .iter()
        .map(String::as_str)
        .collect();

    let mut conflicted: Vec<&str> = settings
        .services
        .disable
        .iter()
        .map(String::as_str)
        .filter(|unit| enable.contains(unit))
        .collect();
    conflicted.sort_unstable();
    conflicted.dedup();

    if conflicted.is_empty() {
        Ok(())
    } else {
        Err(PlanError::ConflictingServiceState {
            units: conflicted.join(", "),
        })
    }
}

/// String form for a sysctl value; non-scalars have none.
fn sysctl_value(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        // Kernel booleans are 0/1.
        toml::Value::Boolean(b) => Some(i32::from(*b).to_string()),
        toml::Value::Datetime(_) | toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}

/// Drop actions whose required binary is neither on PATH nor provided by
/// a pending package install, then scrub dangling dependency names.
fn filter_capabilities(
    actions: Vec<Action>,
    install: &[String],
    aur: &[String],
    executor: &dyn Executor,
) -> Vec<Action> {
    let pending: BTreeSet<&str> = install.iter().chain(aur).map(String::as_str).collect();

    let mut kept: Vec<Action> = actions
        .into_iter()
        .filter(|action| {
            let Some(binary) = &action.requires else {
                return true;
            };
            if executor.which(binary) || provider_pending(binary, &pending) {
                return true;
            }
            tracing::info!(
                action = %action.name,
                requires = %binary,
                "dropped from plan; capability unavailable"
            );
            false
        })
        .collect();

    let names: BTreeSet<String> = kept.iter().map(|action| action.name.clone()).collect();
    for action in &mut kept {
        action.after.retain(|dep| names.contains(dep));
    }
    kept
}

fn provider_pending(binary: &str, pending: &BTreeSet<&str>) -> bool {
    PROVIDERS
        .iter()
        .find(|(bin, _)| *bin == binary)
        .is_some_and(|(_, packages)| packages.iter().any(|package| pending.contains(package)))
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::config::resolver::ResolvedConfig;
    use crate::plan::test_helpers::MockExecutor;

    fn settings(content: &str) -> Settings {
        let resolved =
            ResolvedConfig::from_table(content.parse().expect("test doc must be valid TOML"));
        Settings::from_resolved(&resolved).expect("test settings must deserialize")
    }

    fn names(actions: &[Action]) -> Vec<&str> {
        actions.iter().map(|action| action.name.as_str()).collect()
    }

    fn find<'a>(actions: &'a [Action], name: &str) -> &'a Action {
        actions
            .iter()
            .find(|action| action.name == name)
            .unwrap_or_else(|| panic!("plan should contain '{name}'"))
    }

    #[test]
    fn empty_settings_plan_nothing() {
        let settings = settings("[users]\nmanage_passwords = false\n");
        let plan = plan(&settings, &PlanOptions::default(), &MockExecutor::new()).unwrap();
        assert!(plan.is_empty(), "got: {:?}", names(&plan));
    }

    #[test]
    fn install_list_merges_and_dedups_in_order() {
        let settings = settings(
            "[packages]\nbase = [\"git\", \"vim\"]\nextra = [\"vim\", \"firefox\"]\n[users]\nmanage_passwords = false\n",
        );
        let plan = plan(&settings, &PlanOptions::default(), &MockExecutor::new()).unwrap();
        let Operation::InstallPackages { packages, .. } =
            &find(&plan, "packages:install").operation
        else {
            panic!("expected install operation");
        };
        assert_eq!(packages, &["git", "vim", "firefox"]);
    }

    #[test]
    fn dev_packages_are_opt_in() {
        let settings = settings(
            "[packages]\nbase = [\"git\"]\ndev = [\"rustup\"]\n[users]\nmanage_passwords = false\n",
        );
        let default_plan =
            plan(&settings, &PlanOptions::default(), &MockExecutor::new()).unwrap();
        let Operation::InstallPackages { packages, .. } =
            &find(&default_plan, "packages:install").operation
        else {
            panic!("expected install operation");
        };
        assert!(!packages.contains(&"rustup".to_string()));

        let dev_plan = plan(
            &settings,
            &PlanOptions { with_dev: true },
            &MockExecutor::new(),
        )
        .unwrap();
        let Operation::InstallPackages { packages, .. } =
            &find(&dev_plan, "packages:install").operation
        else {
            panic!("expected install operation");
        };
        assert!(packages.contains(&"rustup".to_string()));
    }

    #[test]
    fn excluded_package_stops_planning() {
        let settings = settings(
            "[packages]\nbase = [\"linux\", \"git\"]\nexcluded = [\"linux\"]\n",
        );
        let err = plan(&settings, &PlanOptions::default(), &MockExecutor::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Refusing to install excluded package(s): linux"
        );
    }

    #[test]
    fn excluded_check_covers_aur_and_sorts_names() {
        let settings = settings(
            "[packages]\nbase = [\"zfs-dkms\"]\naur = [\"agent-bin\"]\nexcluded = [\"zfs-dkms\", \"agent-bin\"]\n",
        );
        let err = plan(&settings, &PlanOptions::default(), &MockExecutor::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Refusing to install excluded package(s): agent-bin, zfs-dkms"
        );
    }

    #[test]
    fn excluded_list_alone_is_not_an_error() {
        let settings = settings(
            "[packages]\nbase = [\"git\"]\nexcluded = [\"nano\"]\n[users]\nmanage_passwords = false\n",
        );
        assert!(plan(&settings, &PlanOptions::default(), &MockExecutor::new()).is_ok());
    }

    #[test]
    fn service_conflict_stops_planning() {
        let settings = settings(
            "[services]\nenable = [\"sshd.service\"]\ndisable = [\"sshd.service\"]\n",
        );
        let err = plan(&settings, &PlanOptions::default(), &MockExecutor::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Conflicting service state: sshd.service listed for both enable and disable"
        );
    }

    #[test]
    fn aur_requires_paru_and_follows_install() {
        let settings = settings(
            "[packages]\nbase = [\"git\"]\naur = [\"tool-bin\"]\n[users]\nmanage_passwords = false\n",
        );
        let executor = MockExecutor::new().with_which("paru");
        let plan = plan(&settings, &PlanOptions::default(), &executor).unwrap();
        let aur = find(&plan, "packages:aur");
        assert_eq!(aur.after, vec!["packages:install"]);
        assert_eq!(aur.requires.as_deref(), Some("paru"));
    }

    #[test]
    fn aur_dropped_without_paru() {
        let settings = settings("[packages]\naur = [\"tool-bin\"]\n[users]\nmanage_passwords = false\n");
        let plan = plan(&settings, &PlanOptions::default(), &MockExecutor::new()).unwrap();
        assert!(!names(&plan).contains(&"packages:aur"), "got: {:?}", names(&plan));
    }

    #[test]
    fn pending_paru_install_keeps_the_aur_action() {
        let settings = settings(
            "[packages]\naur = [\"paru-bin\", \"tool-bin\"]\n[users]\nmanage_passwords = false\n",
        );
        let plan = plan(&settings, &PlanOptions::default(), &MockExecutor::new()).unwrap();
        assert!(names(&plan).contains(&"packages:aur"));
    }

    #[test]
    fn wifi_dropped_without_networkmanager() {
        let settings = settings("[network.wifi]\nenabled = true\n[users]\nmanage_passwords = false\n");
        let plan = plan(&settings, &PlanOptions::default(), &MockExecutor::new()).unwrap();
        assert!(plan.is_empty(), "got: {:?}", names(&plan));
    }

    #[test]
    fn pending_networkmanager_keeps_the_wifi_action() {
        let settings = settings(
            "[packages]\nbase = [\"networkmanager\"]\n[network.wifi]\nenabled = true\nconnection = \"home\"\n[users]\nmanage_passwords = false\n",
        );
        let plan = plan(&settings, &PlanOptions::default(), &MockExecutor::new()).unwrap();
        let wifi = find(&plan, "wifi:home");
        assert!(wifi.best_effort);
        assert_eq!(wifi.after, vec!["packages:install"]);
    }

    #[test]
    fn dropped_dependencies_are_scrubbed() {
        let settings = settings(
            "[packages]\naur = [\"tool-bin\"]\n[services]\nenable = [\"sshd.service\"]\n[users]\nmanage_passwords = false\n",
        );
        let plan = plan(&settings, &PlanOptions::default(), &MockExecutor::new()).unwrap();
        let enable = find(&plan, "enable:sshd.service");
        assert!(
            enable.after.is_empty(),
            "dangling dep remained: {:?}",
            enable.after
        );
    }

    #[test]
    fn restarts_are_deduplicated_per_unit() {
        let settings = settings(
            "[[files.render]]\nsrc = \"t/a\"\ndest = \"/etc/a\"\nnotify = \"sshd.service\"\n\
             [[files.render]]\nsrc = \"t/b\"\ndest = \"/etc/b\"\nnotify = \"sshd.service\"\n\
             [users]\nmanage_passwords = false\n",
        );
        let plan = plan(&settings, &PlanOptions::default(), &MockExecutor::new()).unwrap();
        let restarts: Vec<_> = plan
            .iter()
            .filter(|action| action.name.starts_with("restart:"))
            .collect();
        assert_eq!(restarts.len(), 1);
        assert_eq!(
            restarts[0].after,
            vec!["render:/etc/a", "render:/etc/b"],
            "restart must wait on every notifying render"
        );
    }

    #[test]
    fn sysctl_actions_are_sorted_and_best_effort() {
        let settings = settings(
            "[hardening.sysctl]\n\"net.ipv4.ip_forward\" = 0\n\"kernel.kptr_restrict\" = 2\n[users]\nmanage_passwords = false\n",
        );
        let plan = plan(&settings, &PlanOptions::default(), &MockExecutor::new()).unwrap();
        assert_eq!(
            names(&plan),
            vec!["sysctl:kernel.kptr_restrict", "sysctl:net.ipv4.ip_forward"]
        );
        assert!(plan.iter().all(|action| action.best_effort));
    }

    #[test]
    fn boolean_sysctl_renders_as_zero_or_one() {
        let settings = settings(
            "[hardening.sysctl]\n\"kernel.unprivileged_userns_clone\" = false\n[users]\nmanage_passwords = false\n",
        );
        let plan = plan(&settings, &PlanOptions::default(), &MockExecutor::new()).unwrap();
        let Operation::SetSysctl { value, .. } = &plan[0].operation else {
            panic!("expected sysctl operation");
        };
        assert_eq!(value, "0");
    }

    #[test]
    fn passwords_cover_login_then_root() {
        let settings = settings("[users]\nlogin = \"sam\"\n");
        let plan = plan(&settings, &PlanOptions::default(), &MockExecutor::new()).unwrap();
        assert_eq!(names(&plan), vec!["password:sam", "password:root"]);
    }

    #[test]
    fn luks_action_comes_from_the_device_key() {
        let settings = settings(
            "[storage.luks]\ndevice = \"/dev/sdb1\"\n[users]\nmanage_passwords = false\n",
        );
        let plan = plan(&settings, &PlanOptions::default(), &MockExecutor::new()).unwrap();
        assert_eq!(names(&plan), vec!["luks:/dev/sdb1"]);
    }

    #[test]
    fn full_plan_keeps_phase_order_and_unique_names() {
        let settings = settings(
            r#"
            [packages]
            base = ["git", "openssh"]
            aur = ["tool-bin"]

            [services]
            enable = ["sshd.service"]
            disable = ["bluetooth.service"]

            [[files.render]]
            src = "t/sshd"
            dest = "/etc/ssh/sshd_config"
            notify = "sshd.service"

            [hardening.sysctl]
            "kernel.kptr_restrict" = 2

            [users]
            login = "sam"

            [storage.luks]
            device = "/dev/sdb1"
            "#,
        );
        let executor = MockExecutor::new().with_which("paru");
        let plan = plan(&settings, &PlanOptions::default(), &executor).unwrap();

        assert_eq!(
            names(&plan),
            vec![
                "packages:install",
                "packages:aur",
                "render:/etc/ssh/sshd_config",
                "restart:sshd.service",
                "sysctl:kernel.kptr_restrict",
                "password:sam",
                "password:root",
                "luks:/dev/sdb1",
                "enable:sshd.service",
                "disable:bluetooth.service",
            ]
        );

        let unique: BTreeSet<&str> = names(&plan).into_iter().collect();
        assert_eq!(unique.len(), plan.len(), "action names must be unique");

        for action in &plan {
            for dep in &action.after {
                assert!(
                    plan.iter().any(|candidate| candidate.name == *dep),
                    "dependency '{dep}' of '{}' is not in the plan",
                    action.name
                );
            }
        }
    }
}
