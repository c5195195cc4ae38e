//! Core logging types: action entries, status, and the [`Log`] trait.

/// Action execution result for summary reporting.
#[derive(Debug, Clone)]
pub struct ActionEntry {
    /// Plan action name, e.g. `enable:sshd.service`.
    pub name: String,
    /// Final status of the action.
    pub status: ActionStatus,
    /// Optional detail message (e.g., skip reason or error description).
    pub message: Option<String>,
}

/// Status of a completed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    /// The action applied a change to the system.
    Changed,
    /// The system already matched the desired state; nothing was done.
    Unchanged,
    /// Dry-run mode detected a difference; no change was applied.
    WouldChange,
    /// The action was not attempted because a dependency failed or was skipped.
    Skipped,
    /// The action encountered an error and could not complete.
    Failed,
}

/// Abstraction over logging backends.
///
/// Execution code logs through this trait so tests can substitute a
/// recorder without touching the console or the log file.
pub trait Log: Send + Sync {
    /// Log a stage header (major section).
    fn stage(&self, msg: &str);
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (may be suppressed on console).
    fn debug(&self, msg: &str);
    /// Log a warning message.
    fn warn(&self, msg: &str);
    /// Log an error message.
    fn error(&self, msg: &str);
    /// Log a dry-run action message.
    fn dry_run(&self, msg: &str);
    /// Record an action result for the summary.
    fn record_action(&self, name: &str, status: ActionStatus, message: Option<&str>);
}
