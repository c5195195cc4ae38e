//! Command-line interface definitions.

use clap::{Parser, Subcommand, ValueEnum};

/// Top-level CLI entry point for the host provisioning engine.
#[derive(Parser, Debug)]
#[command(
    name = "provision",
    about = "Declarative Arch Linux host provisioning",
    version
)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Options shared across all subcommands.
    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Options shared across all subcommands.
#[derive(Parser, Debug, Clone)]
pub struct GlobalOpts {
    /// Profile to use (work, personal, development)
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Preview changes without applying
    #[arg(short = 'd', long, global = true)]
    pub dry_run: bool,

    /// Override the configuration root directory
    #[arg(long, global = true)]
    pub root: Option<std::path::PathBuf>,

    /// Override the host name used to select the host layer
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Override the group used to select the group layer
    #[arg(long, global = true)]
    pub group: Option<String>,

    /// Encrypted secrets file consulted before prompting
    #[arg(long, global = true, value_name = "PATH")]
    pub secrets_file: Option<std::path::PathBuf>,

    /// Never prompt; fail when a secret has no other source
    #[arg(long, global = true)]
    pub non_interactive: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve configuration, gather secrets, and converge the host
    Apply(ApplyOpts),
    /// Print the ordered action plan without executing it
    Plan(PlanOpts),
    /// Validate configuration and report required secrets
    Check,
    /// Print version information
    Version,
}

/// Options for the `apply` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ApplyOpts {
    /// Include the development package set
    #[arg(long)]
    pub dev: bool,
}

/// Options for the `plan` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct PlanOpts {
    /// Include the development package set
    #[arg(long)]
    pub dev: bool,

    /// Output format for the plan listing
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Plan listing output formats.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable one-line-per-action listing.
    Text,
    /// Machine-readable JSON document.
    Json,
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
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_apply_with_profile() {
        let cli = Cli::parse_from(["provision", "--profile", "work", "apply"]);
        assert_eq!(cli.global.profile, Some("work".to_string()));
        assert!(matches!(cli.command, Command::Apply(_)));
    }

    #[test]
    fn parse_apply_with_profile_short() {
        let cli = Cli::parse_from(["provision", "-p", "work", "apply"]);
        assert_eq!(cli.global.profile, Some("work".to_string()));
        assert!(matches!(cli.command, Command::Apply(_)));
    }

    #[test]
    fn parse_apply_dry_run() {
        let cli = Cli::parse_from(["provision", "--dry-run", "apply"]);
        assert!(cli.global.dry_run);
    }

    #[test]
    fn parse_apply_dry_run_short() {
        let cli = Cli::parse_from(["provision", "-d", "apply"]);
        assert!(cli.global.dry_run);
    }

    #[test]
    fn parse_apply_dev() {
        let cli = Cli::parse_from(["provision", "apply", "--dev"]);
        let Command::Apply(opts) = cli.command else {
            panic!("expected apply command");
        };
        assert!(opts.dev);
    }

    #[test]
    fn parse_plan_defaults_to_text() {
        let cli = Cli::parse_from(["provision", "plan"]);
        let Command::Plan(opts) = cli.command else {
            panic!("expected plan command");
        };
        assert_eq!(opts.format, OutputFormat::Text);
        assert!(!opts.dev);
    }

    #[test]
    fn parse_plan_json_format() {
        let cli = Cli::parse_from(["provision", "plan", "--format", "json"]);
        let Command::Plan(opts) = cli.command else {
            panic!("expected plan command");
        };
        assert_eq!(opts.format, OutputFormat::Json);
    }

    #[test]
    fn parse_check() {
        let cli = Cli::parse_from(["provision", "check"]);
        assert!(matches!(cli.command, Command::Check));
    }

    #[test]
    fn parse_version() {
        let cli = Cli::parse_from(["provision", "version"]);
        assert!(matches!(cli.command, Command::Version));
    }

    #[test]
    fn parse_verbose() {
        let cli = Cli::parse_from(["provision", "-v", "apply"]);
        assert!(cli.verbose);
    }

    #[test]
    fn parse_root_override() {
        let cli = Cli::parse_from(["provision", "--root", "/tmp/provision", "apply"]);
        assert_eq!(
            cli.global.root,
            Some(std::path::PathBuf::from("/tmp/provision"))
        );
    }

    #[test]
    fn parse_host_and_group_overrides() {
        let cli = Cli::parse_from([
            "provision", "--host", "phoenix", "--group", "laptops", "plan",
        ]);
        assert_eq!(cli.global.host, Some("phoenix".to_string()));
        assert_eq!(cli.global.group, Some("laptops".to_string()));
    }

    #[test]
    fn parse_secrets_file() {
        let cli = Cli::parse_from(["provision", "--secrets-file", "/etc/secrets.age", "apply"]);
        assert_eq!(
            cli.global.secrets_file,
            Some(std::path::PathBuf::from("/etc/secrets.age"))
        );
    }

    #[test]
    fn parse_non_interactive() {
        let cli = Cli::parse_from(["provision", "--non-interactive", "apply"]);
        assert!(cli.global.non_interactive);
    }
}
