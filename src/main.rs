use adaptive_telemetry::{
    cli::{Cli, Command},
    simulate::{self, SimulationSpec},
    CoreConfig,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn load_config(path: Option<&std::path::Path>) -> Result<CoreConfig, adaptive_telemetry::ConfigError> {
    match path {
        Some(p) => CoreConfig::load(p),
        None => Ok(CoreConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Simulate(args) => {
            let mut config = load_config(args.config.as_deref())?;
            if let Some(mode) = args.mode {
                config.learning.mode = mode.into();
            }
            let spec = SimulationSpec {
                operation: args.operation,
                requests: args.requests,
                failure_rate: args.failure_rate,
                mean_latency_ms: args.mean_latency_ms,
                concurrency: args.concurrency,
                candidates: args.candidates,
            };
            let report = simulate::run(config, spec).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::ShowConfig { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
