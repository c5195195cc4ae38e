//! Sequential plan execution.
//!
//! Actions run in plan order. Each one checks the live system first and
//! applies only on a difference; in dry-run mode the apply step is
//! replaced by a would-change outcome. An action whose dependency failed
//! or was skipped is skipped itself, recording which dependency blocked
//! it. Restart actions are driven by notifications: they fire only when
//! a render they wait on actually changed its destination.

use std::collections::BTreeSet;

use super::actions::{Action, Operation};
use super::{Outcome, RunContext};
use crate::logging::ActionStatus;

/// Per-action outcomes for one run.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    entries: Vec<(String, Outcome)>,
    fatal_failures: usize,
}

impl ExecutionReport {
    /// Outcomes in execution order.
    #[must_use]
    pub fn outcomes(&self) -> &[(String, Outcome)] {
        &self.entries
    }

    /// Outcome of a single action by name.
    #[must_use]
    pub fn outcome_of(&self, name: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, outcome)| outcome)
    }

    /// Failures excluding best-effort actions.
    #[must_use]
    pub const fn fatal_failures(&self) -> usize {
        self.fatal_failures
    }

    /// Whether the run should exit non-zero.
    #[must_use]
    pub const fn has_fatal_failures(&self) -> bool {
        self.fatal_failures > 0
    }

    /// Number of actions that applied (or would apply) a change.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, outcome)| {
                matches!(outcome, Outcome::Changed | Outcome::WouldChange)
            })
            .count()
    }
}

/// Run `actions` in order against the live system.
pub fn execute(actions: &[Action], ctx: &RunContext<'_>) -> ExecutionReport {
    let mut report = ExecutionReport::default();
    // Names whose outcome blocks dependents (failed or skipped).
    let mut blocking: BTreeSet<String> = BTreeSet::new();
    // Render actions that changed (or would change) their destination.
    let mut changed_renders: BTreeSet<String> = BTreeSet::new();

    for action in actions {
        let outcome = action
            .after
            .iter()
            .find(|dep| blocking.contains(dep.as_str()))
            .map_or_else(
                || run_action(action, ctx, &changed_renders),
                |dep| Outcome::Skipped {
                    blocked_by: dep.clone(),
                },
            );

        if matches!(action.operation, Operation::RenderFile { .. })
            && matches!(outcome, Outcome::Changed | Outcome::WouldChange)
        {
            changed_renders.insert(action.name.clone());
        }
        if matches!(outcome, Outcome::Failed { .. } | Outcome::Skipped { .. }) {
            blocking.insert(action.name.clone());
        }
        if matches!(outcome, Outcome::Failed { .. }) && !action.best_effort {
            report.fatal_failures += 1;
        }

        record(ctx, action, &outcome);
        report.entries.push((action.name.clone(), outcome));
    }

    report
}

fn run_action(action: &Action, ctx: &RunContext<'_>, changed_renders: &BTreeSet<String>) -> Outcome {
    if matches!(action.operation, Operation::RestartUnit { .. }) {
        let notified = action
            .after
            .iter()
            .any(|dep| changed_renders.contains(dep.as_str()));
        if !notified {
            return Outcome::Unchanged;
        }
        if ctx.dry_run {
            return Outcome::WouldChange;
        }
        return apply(action, ctx);
    }

    match action.check(ctx) {
        Ok(true) => Outcome::Unchanged,
        Ok(false) if ctx.dry_run => Outcome::WouldChange,
        Ok(false) => apply(action, ctx),
        Err(error) => Outcome::Failed {
            reason: flatten_error(&error),
        },
    }
}

fn apply(action: &Action, ctx: &RunContext<'_>) -> Outcome {
    match action.apply(ctx) {
        Ok(()) => Outcome::Changed,
        Err(error) => Outcome::Failed {
            reason: flatten_error(&error),
        },
    }
}

/// Single-line error chain for summaries.
fn flatten_error(error: &anyhow::Error) -> String {
    format!("{error:#}")
}

fn record(ctx: &RunContext<'_>, action: &Action, outcome: &Outcome) {
    match outcome {
        Outcome::Unchanged => ctx.log.debug(&format!("{}: unchanged", action.name)),
        Outcome::Changed => ctx.log.info(&format!("{}: changed", action.name)),
        Outcome::WouldChange => ctx.log.dry_run(&format!("would change {}", action.name)),
        Outcome::Skipped { blocked_by } => ctx
            .log
            .warn(&format!("{} skipped (blocked by {blocked_by})", action.name)),
        Outcome::Failed { reason } => {
            ctx.log.error(&format!("{} failed: {reason}", action.name));
        }
    }

    let (status, detail) = match outcome {
        Outcome::Unchanged => (ActionStatus::Unchanged, None),
        Outcome::Changed => (ActionStatus::Changed, None),
        Outcome::WouldChange => (ActionStatus::WouldChange, None),
        Outcome::Skipped { blocked_by } => (
            ActionStatus::Skipped,
            Some(format!("blocked-by={blocked_by}")),
        ),
        Outcome::Failed { reason } => (ActionStatus::Failed, Some(reason.clone())),
    };
    ctx.log.record_action(&action.name, status, detail.as_deref());
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use std::fs;

    use super::*;
    use crate::config::resolver::ResolvedConfig;
    use crate::config::settings::Settings;
    use crate::exec::Executor;
    use crate::logging::{isolated_logger, Logger};
    use crate::plan::actions::Role;
    use crate::plan::test_helpers::MockExecutor;
    use crate::secrets::SecretBundle;

    struct Fixture {
        config: ResolvedConfig,
        settings: Settings,
        bundle: SecretBundle,
        logger: Logger,
        root: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let config = ResolvedConfig::from_table(toml::Table::new());
            let settings = Settings::from_resolved(&config).expect("fixture settings");
            Self {
                config,
                settings,
                bundle: SecretBundle::new(),
                logger: isolated_logger(),
                root: tempfile::tempdir().expect("tempdir"),
            }
        }

        fn ctx<'a>(&'a self, executor: &'a dyn Executor, dry_run: bool) -> RunContext<'a> {
            RunContext {
                config: &self.config,
                settings: &self.settings,
                bundle: &self.bundle,
                executor,
                log: &self.logger,
                dry_run,
                root: self.root.path(),
            }
        }
    }

    fn enable(name: &str, unit: &str, after: &[&str]) -> Action {
        Action {
            name: name.to_string(),
            role: Role::Services,
            operation: Operation::EnableUnit {
                unit: unit.to_string(),
            },
            after: after.iter().map(ToString::to_string).collect(),
            best_effort: false,
            requires: None,
        }
    }

    fn render(fixture: &Fixture, name: &str, src_body: &str, dest_rel: &str) -> Action {
        let src_path = fixture.root.path().join("templates/t");
        fs::create_dir_all(src_path.parent().unwrap()).unwrap();
        fs::write(&src_path, src_body).unwrap();
        Action {
            name: name.to_string(),
            role: Role::Files,
            operation: Operation::RenderFile {
                src: "templates/t".to_string(),
                dest: fixture.root.path().join(dest_rel).display().to_string(),
                mode: "0644".to_string(),
            },
            after: Vec::new(),
            best_effort: false,
            requires: None,
        }
    }

    fn restart(name: &str, unit: &str, after: &[&str]) -> Action {
        Action {
            name: name.to_string(),
            role: Role::Services,
            operation: Operation::RestartUnit {
                unit: unit.to_string(),
            },
            after: after.iter().map(ToString::to_string).collect(),
            best_effort: false,
            requires: None,
        }
    }

    #[test]
    fn satisfied_action_reports_unchanged() {
        let fixture = Fixture::new();
        let mock = MockExecutor::ok("enabled\n");
        let report = execute(
            &[enable("enable:sshd.service", "sshd.service", &[])],
            &fixture.ctx(&mock, false),
        );
        assert_eq!(
            report.outcome_of("enable:sshd.service"),
            Some(&Outcome::Unchanged)
        );
        assert!(!report.has_fatal_failures());
        assert_eq!(mock.call_count(), 1, "check only, no apply");
    }

    #[test]
    fn unsatisfied_action_applies_and_reports_changed() {
        let fixture = Fixture::new();
        let mock = MockExecutor::with_responses(vec![
            (false, "disabled\n".to_string()),
            (true, String::new()),
        ]);
        let report = execute(
            &[enable("enable:sshd.service", "sshd.service", &[])],
            &fixture.ctx(&mock, false),
        );
        assert_eq!(
            report.outcome_of("enable:sshd.service"),
            Some(&Outcome::Changed)
        );
        assert_eq!(report.change_count(), 1);
    }

    #[test]
    fn failed_apply_reports_the_reason() {
        let fixture = Fixture::new();
        let mock = MockExecutor::with_responses(vec![
            (false, "disabled\n".to_string()),
            (false, String::new()),
        ]);
        let report = execute(
            &[enable("enable:sshd.service", "sshd.service", &[])],
            &fixture.ctx(&mock, false),
        );
        let Some(Outcome::Failed { reason }) = report.outcome_of("enable:sshd.service") else {
            panic!("expected a failure");
        };
        assert!(reason.contains("mock command failed"), "got: {reason}");
        assert_eq!(report.fatal_failures(), 1);
    }

    #[test]
    fn failure_skips_dependents_with_the_blocker_named() {
        let fixture = Fixture::new();
        // First action: check says missing, apply fails. Second never runs.
        let mock = MockExecutor::with_responses(vec![
            (false, "disabled\n".to_string()),
            (false, String::new()),
        ]);
        let actions = [
            enable("enable:a.service", "a.service", &[]),
            enable("enable:b.service", "b.service", &["enable:a.service"]),
        ];
        let report = execute(&actions, &fixture.ctx(&mock, false));

        assert_eq!(
            report.outcome_of("enable:b.service"),
            Some(&Outcome::Skipped {
                blocked_by: "enable:a.service".to_string()
            })
        );
        assert_eq!(mock.call_count(), 2, "blocked action must not touch the system");
    }

    #[test]
    fn skips_propagate_down_the_chain() {
        let fixture = Fixture::new();
        let mock = MockExecutor::with_responses(vec![
            (false, "disabled\n".to_string()),
            (false, String::new()),
        ]);
        let actions = [
            enable("enable:a.service", "a.service", &[]),
            enable("enable:b.service", "b.service", &["enable:a.service"]),
            enable("enable:c.service", "c.service", &["enable:b.service"]),
        ];
        let report = execute(&actions, &fixture.ctx(&mock, false));
        assert_eq!(
            report.outcome_of("enable:c.service"),
            Some(&Outcome::Skipped {
                blocked_by: "enable:b.service".to_string()
            })
        );
    }

    #[test]
    fn best_effort_failure_does_not_fail_the_run() {
        let fixture = Fixture::new();
        let sysctl = Action {
            name: "sysctl:kernel.kptr_restrict".to_string(),
            role: Role::Hardening,
            operation: Operation::SetSysctl {
                key: "kernel.kptr_restrict".to_string(),
                value: "2".to_string(),
            },
            after: Vec::new(),
            best_effort: true,
            requires: None,
        };
        let mock = MockExecutor::with_responses(vec![
            (false, String::new()),
            (false, String::new()),
        ]);
        let report = execute(&[sysctl], &fixture.ctx(&mock, false));

        assert!(matches!(
            report.outcome_of("sysctl:kernel.kptr_restrict"),
            Some(Outcome::Failed { .. })
        ));
        assert!(!report.has_fatal_failures(), "best-effort failures are not fatal");
    }

    #[test]
    fn best_effort_failure_still_blocks_dependents() {
        let fixture = Fixture::new();
        let mut first = enable("enable:a.service", "a.service", &[]);
        first.best_effort = true;
        let actions = [first, enable("enable:b.service", "b.service", &["enable:a.service"])];
        let mock = MockExecutor::with_responses(vec![
            (false, "disabled\n".to_string()),
            (false, String::new()),
        ]);
        let report = execute(&actions, &fixture.ctx(&mock, false));
        assert!(matches!(
            report.outcome_of("enable:b.service"),
            Some(Outcome::Skipped { .. })
        ));
        assert!(!report.has_fatal_failures());
    }

    #[test]
    fn dry_run_reports_would_change_without_applying() {
        let fixture = Fixture::new();
        let mock = MockExecutor::with_responses(vec![(false, "disabled\n".to_string())]);
        let report = execute(
            &[enable("enable:sshd.service", "sshd.service", &[])],
            &fixture.ctx(&mock, true),
        );
        assert_eq!(
            report.outcome_of("enable:sshd.service"),
            Some(&Outcome::WouldChange)
        );
        assert_eq!(mock.call_count(), 1, "dry run checks but never applies");
    }

    #[test]
    fn restart_fires_only_after_a_changed_render() {
        let fixture = Fixture::new();
        let actions = [
            render(&fixture, "render:config", "body\n", "etc/config"),
            restart("restart:svc.service", "svc.service", &["render:config"]),
        ];
        // Only call expected: the restart itself.
        let mock = MockExecutor::ok("");
        let report = execute(&actions, &fixture.ctx(&mock, false));

        assert_eq!(report.outcome_of("render:config"), Some(&Outcome::Changed));
        assert_eq!(
            report.outcome_of("restart:svc.service"),
            Some(&Outcome::Changed)
        );
        assert_eq!(mock.calls(), vec!["sudo systemctl restart svc.service"]);

        // Second run: render converged, so the restart must not fire.
        let quiet = MockExecutor::new();
        let report = execute(&actions, &fixture.ctx(&quiet, false));
        assert_eq!(report.outcome_of("render:config"), Some(&Outcome::Unchanged));
        assert_eq!(
            report.outcome_of("restart:svc.service"),
            Some(&Outcome::Unchanged)
        );
        assert_eq!(quiet.call_count(), 0);
    }

    #[test]
    fn restart_would_change_in_dry_run_when_notified() {
        let fixture = Fixture::new();
        let actions = [
            render(&fixture, "render:config", "body\n", "etc/config"),
            restart("restart:svc.service", "svc.service", &["render:config"]),
        ];
        let mock = MockExecutor::new();
        let report = execute(&actions, &fixture.ctx(&mock, true));
        assert_eq!(
            report.outcome_of("render:config"),
            Some(&Outcome::WouldChange)
        );
        assert_eq!(
            report.outcome_of("restart:svc.service"),
            Some(&Outcome::WouldChange)
        );
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn outcomes_are_recorded_for_the_summary() {
        let fixture = Fixture::new();
        let mock = MockExecutor::ok("enabled\n");
        execute(
            &[enable("enable:sshd.service", "sshd.service", &[])],
            &fixture.ctx(&mock, false),
        );
        let recorded = fixture.logger.recorded_actions();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].name, "enable:sshd.service");
        assert_eq!(recorded[0].status, ActionStatus::Unchanged);
    }
}
