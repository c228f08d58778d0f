//! Shared CLI argument surface for the `netshieldd` daemon and
//! `netshield-selftest` binaries. Grounded on the teacher's
//! `proxyvpn-cli::RunArgs`: one flattened `clap::Args` struct with
//! `--config`-file-then-flag-override layering, parsed once by `Cli::parse`
//! and handed to whichever binary embeds it.

use std::path::PathBuf;

use clap::{Args, Parser, ValueEnum};

use netshield_model::{DefaultPolicy, Mode};

#[derive(Parser, Debug)]
#[command(name = "netshieldd", version, about = "Per-application firewall control core")]
pub struct Cli {
    #[command(flatten)]
    pub args: RunArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Path to the TOML config file (created with defaults if absent).
    #[arg(long, default_value = "/etc/netshield/config.toml")]
    pub config: PathBuf,

    /// Directory holding the rule store and persisted flags.
    #[arg(long, default_value = "/var/lib/netshield")]
    pub state_dir: PathBuf,

    /// Override the persisted firewall mode for this run.
    #[arg(long, value_enum)]
    pub mode: Option<CliMode>,

    /// Override the persisted default policy for this run.
    #[arg(long, value_enum)]
    pub default_policy: Option<CliDefaultPolicy>,

    /// Override the persisted allow-critical flag for this run.
    #[arg(long)]
    pub allow_critical: Option<bool>,

    /// Verbose command logging for backend plumbing (nft/assist exec).
    #[arg(long)]
    pub verbose: bool,

    /// Print intended backend commands without executing them.
    #[arg(long)]
    pub dry_run: bool,

    /// Start the firewall immediately instead of waiting for a client call.
    #[arg(long)]
    pub autostart: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliMode {
    Auto,
    VirtualDevice,
    PacketFilter,
    PolicyChain,
    NetPolicy,
}

impl From<CliMode> for Mode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Auto => Mode::Auto,
            CliMode::VirtualDevice => Mode::VirtualDevice,
            CliMode::PacketFilter => Mode::PacketFilter,
            CliMode::PolicyChain => Mode::PolicyChain,
            CliMode::NetPolicy => Mode::NetPolicy,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliDefaultPolicy {
    AllowAll,
    BlockAll,
}

impl From<CliDefaultPolicy> for DefaultPolicy {
    fn from(value: CliDefaultPolicy) -> Self {
        match value {
            CliDefaultPolicy::AllowAll => DefaultPolicy::AllowAll,
            CliDefaultPolicy::BlockAll => DefaultPolicy::BlockAll,
        }
    }
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Applies `--mode`/`--default-policy`/`--allow-critical` CLI overrides on
/// top of a config loaded from disk, the same override-after-load order the
/// teacher's `run_with_args` applies to its own file-free `RunArgs` fields.
pub fn apply_overrides(mut config: netshield_model::config::NetshieldConfig, args: &RunArgs) -> netshield_model::config::NetshieldConfig {
    if let Some(mode) = args.mode {
        config.firewall_mode = mode.into();
    }
    if let Some(policy) = args.default_policy {
        config.default_policy = policy.into();
    }
    if let Some(allow_critical) = args.allow_critical {
        config.allow_critical = allow_critical;
    }
    config
}
