mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use rc_core::config::Config;
use rc_core::types::IncidentDescriptor;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// rootcause CLI -- investigate AWS incidents with a crew of LLM agents.
#[derive(Parser)]
#[command(name = "rootcause", version, about)]
struct Cli {
    /// Path to config.toml (defaults to $ROOTCAUSE_CONFIG or ~/.rootcause/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the rootcause daemon.
    #[arg(
        long,
        global = true,
        env = "ROOTCAUSE_API_URL",
        default_value = "http://127.0.0.1:8000"
    )]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an investigation in-process and print the report.
    Run(IncidentArgs),

    /// Submit an investigation to the daemon.
    Submit(IncidentArgs),

    /// Show the daemon's current investigation status.
    Status,

    /// List the evidence tools and their argument schemas.
    Tools,
}

/// The incident under investigation.
#[derive(Args, Debug)]
struct IncidentArgs {
    /// CloudWatch log group, e.g. /aws/lambda/production-api-service
    #[arg(long)]
    log_group: String,
    /// Metric namespace, e.g. AWS/Lambda
    #[arg(long)]
    namespace: String,
    /// Metric name, e.g. Errors
    #[arg(long)]
    metric_name: String,
    /// Dimension name, e.g. FunctionName
    #[arg(long)]
    dimension_name: String,
    /// Dimension value, e.g. production-api-service
    #[arg(long)]
    dimension_value: String,
    /// How far back to look, in minutes.
    #[arg(long, default_value_t = rc_core::types::DEFAULT_LOOKBACK_MINUTES)]
    minutes_ago: u32,
}

impl IncidentArgs {
    fn into_descriptor(self) -> IncidentDescriptor {
        IncidentDescriptor::new(
            self.log_group,
            self.namespace,
            self.metric_name,
            self.dimension_name,
            self.dimension_value,
        )
        .with_minutes_ago(self.minutes_ago)
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Config::load().context("failed to load config"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let api_url = cli.api_url.trim_end_matches('/').to_string();

    match cli.command {
        Commands::Run(args) => {
            let config = load_config(cli.config.as_deref())?;
            rc_telemetry::logging::init_from_config(&config.general);
            commands::run::run(&config, args.into_descriptor()).await?;
        }
        Commands::Submit(args) => {
            commands::submit::run(&api_url, &args.into_descriptor()).await?;
        }
        Commands::Status => {
            commands::status::run(&api_url).await?;
        }
        Commands::Tools => {
            commands::tools::run();
        }
    }

    Ok(())
}
