//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// mqlux - MQTT to InfluxDB bridge
#[derive(Parser, Debug)]
#[command(
    name = "mqlux",
    author,
    version,
    about = "Route MQTT messages into InfluxDB measurements",
    long_about = "Routes broker messages to subscriptions by topic pattern, turns payloads \n\
                  into records with a float parser or a user script, and writes them \n\
                  to InfluxDB. Recorded message logs can be replayed."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "MQLUX_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "MQLUX_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Filter used when `RUST_LOG` is unset
    pub fn default_log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Prometheus port, only the `run` command serves metrics
    pub fn metrics_port(&self) -> Option<u16> {
        match &self.command {
            Commands::Run(args) if args.metrics_port != 0 => Some(args.metrics_port),
            _ => None,
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the bridge on a live message stream or a replay file
    Run(RunArgs),

    /// Validate configuration file and compile all subscriptions
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "mqlux.toml", env = "MQLUX_CONFIG")]
    pub config: PathBuf,

    /// Replay a recorded CSV message log instead of the live stream (`-` = stdin)
    #[arg(long, conflicts_with = "stdin")]
    pub replay: Option<PathBuf>,

    /// Read the live stream as CSV from stdin instead of the broker
    #[arg(long)]
    pub stdin: bool,

    /// Deliveries in flight while replaying
    #[arg(long, default_value_t = ingestion::DEFAULT_CONCURRENCY, env = "MQLUX_CONCURRENCY")]
    pub concurrency: usize,

    /// Log records instead of writing them to InfluxDB
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "MQLUX_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "mqlux.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "mqlux.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format options
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => observability::LogFormat::Json,
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
        }
    }
}
