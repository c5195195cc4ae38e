//! Execution planning and application.
//!
//! [`planner::plan`] turns [`Settings`](crate::config::settings::Settings)
//! into an ordered list of idempotent [`Action`]s. [`execute::execute`]
//! walks that list in order: each action checks the live system first and
//! applies only when something differs, so a converged machine reports
//! every action unchanged. An action whose dependency failed or was
//! skipped is itself skipped, never attempted.

pub mod actions;
pub mod execute;
pub mod planner;

pub use actions::{Action, Operation, PackageManager, Role};
pub use execute::{execute, ExecutionReport};
pub use planner::{plan, PlanOptions};

use std::fmt;
use std::path::Path;

use crate::config::resolver::ResolvedConfig;
use crate::config::settings::Settings;
use crate::exec::Executor;
use crate::logging::Log;
use crate::secrets::SecretBundle;

/// Result of running one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The system already matched; nothing was done.
    Unchanged,
    /// A change was applied.
    Changed,
    /// Dry-run: a change would have been applied.
    WouldChange,
    /// Not attempted because a dependency did not succeed.
    Skipped {
        /// Name of the dependency that blocked this action.
        blocked_by: String,
    },
    /// The action ran and failed.
    Failed {
        /// Failure description.
        reason: String,
    },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged => f.write_str("unchanged"),
            Self::Changed => f.write_str("changed"),
            Self::WouldChange => f.write_str("would-change"),
            Self::Skipped { blocked_by } => write!(f, "skipped(blocked-by={blocked_by})"),
            Self::Failed { reason } => write!(f, "failed({reason})"),
        }
    }
}

/// Everything an action needs at execution time.
pub struct RunContext<'a> {
    /// Resolved document with secrets injected; template rendering input.
    pub config: &'a ResolvedConfig,
    /// Typed settings the plan was built from.
    pub settings: &'a Settings,
    /// Sourced secrets for password, LUKS and Wi-Fi actions.
    pub bundle: &'a SecretBundle,
    /// Command runner.
    pub executor: &'a dyn Executor,
    /// Logging sink.
    pub log: &'a dyn Log,
    /// Report what would change without touching the system.
    pub dry_run: bool,
    /// Configuration tree root; template sources live beneath it.
    pub root: &'a Path,
}

impl fmt::Debug for RunContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("dry_run", &self.dry_run)
            .field("root", &self.root)
            .field("secrets", &self.bundle.len())
            .finish_non_exhaustive()
    }
}
