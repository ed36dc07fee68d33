use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::adaptive::LearningMode;

#[derive(Parser, Debug)]
#[command(name = "adaptive-telemetry")]
#[command(version)]
#[command(about = "Drive operations through the adaptive executor and inspect the telemetry it produces")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a synthetic operation through the executor and print a JSON report
    Simulate(SimulateArgs),
    /// Print the effective configuration as TOML
    ShowConfig {
        /// TOML config file (defaults apply to anything it omits)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Operation name used for metrics, breaker and strategies
    #[arg(long, default_value = "synthetic")]
    pub operation: String,

    /// Number of executions to run
    #[arg(long, default_value = "200")]
    pub requests: usize,

    /// Probability that one attempt of the synthetic operation fails
    #[arg(long, default_value = "0.1")]
    pub failure_rate: f64,

    /// Mean latency of one attempt in milliseconds
    #[arg(long, default_value = "20")]
    pub mean_latency_ms: f64,

    /// Learning mode; overrides the config file
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Executions in flight at once
    #[arg(long, default_value = "8")]
    pub concurrency: usize,

    /// Strategies to trial in active mode
    #[arg(long, default_value = "2")]
    pub candidates: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ModeArg {
    Passive,
    Active,
}

impl From<ModeArg> for LearningMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Passive => LearningMode::Passive,
            ModeArg::Active  => LearningMode::Active,
        }
    }
}
