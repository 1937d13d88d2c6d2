//! autobot command line
//!
//! Runs plans against the site adapters under the policy gate, inspects the
//! adapter catalog and policy, and serves the HTTP control surface.

use std::path::PathBuf;
use std::sync::Arc;

use adapter_telemetry::{init_tracing, TracingOptions};
use anyhow::{Context, Result};
use autobot_cli::app_context::AppContext;
use autobot_cli::config::AppConfig;
use clap::{Parser, Subcommand};
use tracing::debug;

mod cli;

use cli::{
    cmd_adapters, cmd_info, cmd_policy, cmd_run, cmd_serve, cmd_validate, OutputFormat,
    PolicyArgs, RunArgs, ServeArgs, ValidateArgs,
};

#[derive(Parser)]
#[command(name = "autobot")]
#[command(about = "Policy-gated automation of web and desktop applications")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level filter (overrides the config file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Shorthand for --log-level debug
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan file
    Run(RunArgs),

    /// Check a plan file without running it
    Validate(ValidateArgs),

    /// List adapters and their actions
    Adapters,

    /// Inspect or exercise the policy
    Policy(PolicyArgs),

    /// Serve the HTTP control surface
    Serve(ServeArgs),

    /// Show build and runtime information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    init_logging(&cli, &config.logging)?;
    debug!(?config, "configuration resolved");

    let context = Arc::new(AppContext::build(config).context("failed to initialise")?);

    match cli.command {
        Commands::Run(args) => cmd_run(args, context, cli.output).await,
        Commands::Validate(args) => cmd_validate(args, &context, cli.output),
        Commands::Adapters => cmd_adapters(&context, cli.output),
        Commands::Policy(args) => cmd_policy(args, &context, cli.output),
        Commands::Serve(args) => cmd_serve(args, context).await,
        Commands::Info => cmd_info(&context, cli.output),
    }
}

fn init_logging(cli: &Cli, configured: &TracingOptions) -> Result<()> {
    let mut options = configured.clone();
    if cli.debug {
        options.level = "debug".to_string();
    } else if let Some(level) = &cli.log_level {
        options.level = level.clone();
    }
    options.json |= cli.log_json;
    init_tracing(&options)?;
    Ok(())
}
