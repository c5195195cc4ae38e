//! Command: validate configuration and report required secrets.

use anyhow::Result;

use super::CommandSetup;
use crate::cli::GlobalOpts;
use crate::exec::SystemExecutor;
use crate::logging::Logger;
use crate::plan::{self, Operation, PlanOptions};
use crate::secrets::{self, SecretName};

/// Run the check command.
///
/// Resolves and validates configuration, builds the plan (including the
/// dev package set so excluded-package conflicts surface either way), and
/// reports which secrets a real run would need and which channel would
/// satisfy each. Secret values are never read.
///
/// # Errors
///
/// Returns an error if configuration loading or planning fails.
pub fn run(global: &GlobalOpts, log: &Logger) -> Result<()> {
    let setup = CommandSetup::init(global, log)?;
    let executor = SystemExecutor;

    log.stage("Planning");
    let plan_opts = PlanOptions { with_dev: true };
    let actions = plan::plan(&setup.settings, &plan_opts, &executor)?;
    log.info(&format!("{} action(s) planned", actions.len()));

    for action in &actions {
        if let Operation::RenderFile { src, .. } = &action.operation {
            let template = setup.root.join(src);
            if !template.exists() {
                log.warn(&format!("{}: template {src} not found", action.name));
            }
        }
    }

    log.stage("Required secrets");
    let required = secrets::required_secrets(&setup.settings);
    if required.is_empty() {
        log.info("none");
    } else {
        for name in &required {
            match predicted_source(*name, global) {
                Some(source) => log.info(&format!("{name}: {source}")),
                None => log.warn(&format!("{name}: no channel available")),
            }
        }
    }

    Ok(())
}

/// Predict which channel would satisfy `name` without reading any value.
fn predicted_source(name: SecretName, global: &GlobalOpts) -> Option<String> {
    if std::env::var(name.env_var()).is_ok_and(|v| !v.is_empty()) {
        return Some(format!("environment ({})", name.env_var()));
    }
    if let Some(ref path) = global.secrets_file {
        return Some(format!("encrypted file ({})", path.display()));
    }
    if global.non_interactive {
        return None;
    }
    Some("prompt".to_string())
}
