use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use regionguard_common::RegionGuardConfig;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "regionguard")]
#[command(about = "RegionGuard - multi-region failover orchestrator")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        global = true,
        env = "REGIONGUARD_CONFIG",
        default_value = "/etc/regionguard/regionguard.toml"
    )]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one evaluation cycle and print the JSON report
    Run {
        /// Also write the report to this file
        #[arg(long)]
        report_file: Option<PathBuf>,
        /// Skip the end-to-end DR validation suite
        #[arg(long)]
        skip_e2e: bool,
        /// Write Prometheus metrics in text format to this file
        #[arg(long)]
        metrics_file: Option<PathBuf>,
    },
    /// Evaluate on the policy interval until interrupted
    Watch {
        /// Overwrite this file with the latest report after every cycle
        #[arg(long)]
        report_file: Option<PathBuf>,
        /// Skip the end-to-end DR validation suite
        #[arg(long)]
        skip_e2e: bool,
    },
    /// Show the current routing state
    Status,
    /// Summarize the failover history
    Report,
    /// Move traffic to the secondary region
    Failover {
        /// Reason recorded in the failover event
        #[arg(short, long)]
        reason: String,
    },
    /// Return traffic to the primary region
    Failback {
        /// Reason recorded in the failover event
        #[arg(short, long)]
        reason: String,
    },
    /// Validate the standby region without moving traffic
    DrTest,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the JSON report
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = match RegionGuardConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Error: invalid configuration {}: {}",
                cli.config.display(),
                e
            );
            process::exit(2);
        }
    };

    match commands::handle_command(cli.command, config).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
