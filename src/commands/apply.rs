//! Command: converge the host against the resolved configuration.

use anyhow::{Context as _, Result};
use zeroize::Zeroize;

use super::CommandSetup;
use crate::cli::{ApplyOpts, GlobalOpts};
use crate::exec::SystemExecutor;
use crate::logging::Logger;
use crate::plan::{self, PlanOptions, RunContext};
use crate::secrets::{
    self, EncryptedFileChannel, EnvChannel, PromptChannel, SecretBundle, SecretChannel,
};

/// Run the apply command.
///
/// Pipeline: resolve configuration, gather and validate secrets, inject
/// them into the document, plan, execute, summarize.
///
/// # Errors
///
/// Returns an error if any pipeline stage fails or if any non-best-effort
/// action reports a failure.
pub fn run(global: &GlobalOpts, opts: &ApplyOpts, log: &Logger) -> Result<()> {
    let version = option_env!("PROVISION_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"));
    log.info(&format!("provision {version}"));

    let setup = CommandSetup::init(global, log)?;
    let executor = SystemExecutor;

    log.stage("Gathering secrets");
    let required = secrets::required_secrets(&setup.settings);
    let bundle = if required.is_empty() {
        log.debug("no secrets required by this configuration");
        SecretBundle::new()
    } else {
        let env_channel = EnvChannel;
        let file_channel = open_secrets_file(global, log)?;
        let prompt_channel = PromptChannel::new(!global.non_interactive);

        let mut channels: Vec<&dyn SecretChannel> = vec![&env_channel];
        if let Some(ref channel) = file_channel {
            channels.push(channel);
        }
        channels.push(&prompt_channel);
        secrets::gather(&required, &channels)?
    };

    let config = secrets::inject(&setup.config, &bundle)?;

    log.stage("Planning");
    let plan_opts = PlanOptions { with_dev: opts.dev };
    let actions = plan::plan(&setup.settings, &plan_opts, &executor)?;
    log.info(&format!("{} action(s) planned", actions.len()));

    log.stage(if global.dry_run {
        "Previewing changes"
    } else {
        "Applying changes"
    });
    let ctx = RunContext {
        config: &config,
        settings: &setup.settings,
        bundle: &bundle,
        executor: &executor,
        log,
        dry_run: global.dry_run,
        root: &setup.root,
    };
    let report = plan::execute(&actions, &ctx);

    log.print_summary();

    if report.has_fatal_failures() {
        anyhow::bail!("{} action(s) failed", report.fatal_failures());
    }
    Ok(())
}

/// Open the encrypted secrets file named on the command line, if any.
///
/// The file passphrase comes from `PROVISION_SECRETS_KEY` or an
/// interactive prompt.
fn open_secrets_file(
    global: &GlobalOpts,
    log: &Logger,
) -> Result<Option<EncryptedFileChannel>> {
    let Some(ref path) = global.secrets_file else {
        return Ok(None);
    };

    let mut passphrase = secrets_key(global)?;
    let channel = EncryptedFileChannel::open(path, &passphrase);
    passphrase.zeroize();
    let channel = channel.with_context(|| {
        format!("failed to open encrypted secrets file {}", path.display())
    })?;
    log.debug(&format!("opened encrypted secrets file {}", path.display()));
    Ok(Some(channel))
}

/// Source the passphrase protecting the encrypted secrets file.
fn secrets_key(global: &GlobalOpts) -> Result<String> {
    if let Ok(key) = std::env::var("PROVISION_SECRETS_KEY")
        && !key.is_empty()
    {
        return Ok(key);
    }

    if global.non_interactive {
        anyhow::bail!("--secrets-file requires PROVISION_SECRETS_KEY in non-interactive mode");
    }

    inquire::Password::new("Secrets file passphrase:")
        .without_confirmation()
        .prompt()
        .context("failed to read secrets file passphrase")
}
