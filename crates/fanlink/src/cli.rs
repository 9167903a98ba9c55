//! Clap derive structures for the `fanlink` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::net::IpAddr;

use clap::{Args, Parser, Subcommand, ValueEnum};
use fanlink_config::Defaults;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// fanlink -- drive fleets of fan-array controllers over UDP
#[derive(Debug, Parser)]
#[command(
    name = "fanlink",
    version,
    about = "Discover, connect and drive fan-array controllers",
    long_about = "Runs the UDP communicator that discovers fan-array controllers,\n\
        keeps each adopted device connected, and routes duty-cycle commands\n\
        read as JSON lines from stdin.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration profile to use
    #[arg(long, short = 'p', env = "FANLINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Output format [default: `defaults.output` from config, else table]
    #[arg(long, short = 'o', env = "FANLINK_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// When to use color output [default: `defaults.color` from config, else auto]
    #[arg(long, global = true)]
    pub color: Option<ColorMode>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

impl GlobalOpts {
    /// Fill unset output and color flags from the config file's `[defaults]`.
    ///
    /// Unparseable config values are ignored with a warning.
    pub fn apply_defaults(&mut self, defaults: &Defaults) {
        if self.output.is_none() {
            self.output = from_config("output", &defaults.output);
        }
        if self.color.is_none() {
            self.color = from_config("color", &defaults.color);
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output.unwrap_or(OutputFormat::Table)
    }

    pub fn color_mode(&self) -> ColorMode {
        self.color.unwrap_or(ColorMode::Auto)
    }
}

fn from_config<T: ValueEnum>(key: &str, value: &str) -> Option<T> {
    let parsed = T::from_str(value, true).ok();
    if parsed.is_none() {
        tracing::warn!(key, value, "ignoring invalid value in [defaults]");
    }
    parsed
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one record per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the communicator, reading JSON command lines from stdin
    Run(RunArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  RUN
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Published output streams that can be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WatchKind {
    /// Listener and beacon settings (on change)
    Network,
    /// Device registry (on change)
    Registry,
    /// Flat RPM + duty-cycle vector (every period)
    Feedback,
    /// Performance statistics (on request)
    Performance,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Discovery passcode (overrides profile and keyring)
    #[arg(long, env = "FANLINK_PASSCODE", hide_env_values = true)]
    pub passcode: Option<String>,

    /// Local address to bind every socket to
    #[arg(long)]
    pub bind_ip: Option<IpAddr>,

    /// Listener port (0 picks an ephemeral port)
    #[arg(long)]
    pub listener_port: Option<u16>,

    /// Beacon destination: <broadcast> or a dotted quad
    #[arg(long)]
    pub broadcast_ip: Option<String>,

    /// Port devices listen on for beacons
    #[arg(long)]
    pub broadcast_port: Option<u16>,

    /// Exchange and publishing period in milliseconds
    #[arg(long)]
    pub period_ms: Option<u64>,

    /// Outputs to render
    #[arg(
        long,
        short = 'w',
        value_delimiter = ',',
        default_value = "network,registry,performance"
    )]
    pub watch: Vec<WatchKind>,

    /// Ignore stdin and run until interrupted
    #[arg(long)]
    pub no_input: bool,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create initial config file with guided setup
    Init,

    /// Display current configuration (passcodes redacted)
    Show,

    /// Print the config file location
    Path,

    /// Store a passcode in the system keyring for the active profile
    SetPasscode,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
