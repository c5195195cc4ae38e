//! Command: print the ordered action plan without executing it.

use anyhow::Result;
use serde_json::json;

use super::CommandSetup;
use crate::cli::{GlobalOpts, OutputFormat, PlanOpts};
use crate::exec::SystemExecutor;
use crate::logging::Logger;
use crate::plan::{self, Action, Operation, PlanOptions};

/// Run the plan command.
///
/// Secrets are never gathered here; the listing carries secret names
/// only, so it is safe to pipe or archive.
///
/// # Errors
///
/// Returns an error if configuration loading or planning fails.
pub fn run(global: &GlobalOpts, opts: &PlanOpts, log: &Logger) -> Result<()> {
    let setup = CommandSetup::init(global, log)?;
    let executor = SystemExecutor;

    log.stage("Planning");
    let plan_opts = PlanOptions { with_dev: opts.dev };
    let actions = plan::plan(&setup.settings, &plan_opts, &executor)?;
    log.info(&format!("{} action(s) planned", actions.len()));

    match opts.format {
        OutputFormat::Text => print_text(&actions),
        OutputFormat::Json => print_json(&setup, &actions)?,
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_text(actions: &[Action]) {
    for action in actions {
        let mut line = format!("{}  [{}]", action.name, action.role);
        if !action.after.is_empty() {
            line.push_str(&format!("  after {}", action.after.join(", ")));
        }
        if let Some(ref requires) = action.requires {
            line.push_str(&format!("  requires {requires}"));
        }
        if action.best_effort {
            line.push_str("  (best-effort)");
        }
        println!("{line}");
    }
}

#[allow(clippy::print_stdout)]
fn print_json(setup: &CommandSetup, actions: &[Action]) -> Result<()> {
    let doc = json!({
        "profile": setup.profile.name,
        "host": setup.host,
        "actions": actions.iter().map(action_json).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

/// Render one action as JSON. Secret-bearing operations carry the secret
/// *name*, never a value.
fn action_json(action: &Action) -> serde_json::Value {
    let params = match &action.operation {
        Operation::InstallPackages { manager, packages } => json!({
            "manager": manager.to_string(),
            "packages": packages,
        }),
        Operation::EnableUnit { unit } | Operation::DisableUnit { unit } | Operation::RestartUnit { unit } => {
            json!({ "unit": unit })
        }
        Operation::RenderFile { src, dest, mode } => json!({
            "src": src,
            "dest": dest,
            "mode": mode,
        }),
        Operation::SetSysctl { key, value } => json!({
            "key": key,
            "value": value,
        }),
        Operation::SetPassword { user, secret } => json!({
            "user": user,
            "secret": secret.as_str(),
        }),
        Operation::FormatLuks { device, secret } => json!({
            "device": device,
            "secret": secret.as_str(),
        }),
        Operation::ConnectWifi { connection, ssid, psk } => json!({
            "connection": connection,
            "ssid_secret": ssid.as_str(),
            "psk_secret": psk.as_str(),
        }),
    };

    json!({
        "name": action.name,
        "role": action.role.to_string(),
        "operation": action.operation.kind(),
        "after": action.after,
        "best_effort": action.best_effort,
        "requires": action.requires,
        "params": params,
    })
}
