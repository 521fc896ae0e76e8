//! CarePilot CLI: the main entry point.
//!
//! Commands:
//! - `init`: Print (or write) the default configuration
//! - `assess`: Assess one patient against fixture-backed tools
//! - `history`: Show a patient's stored assessment context

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod fixtures;

#[derive(Parser)]
#[command(
    name = "carepilot",
    about = "CarePilot: discharge-readiness assessment agent",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the default configuration
    Init {
        /// Also write it to ~/.carepilot/config.toml if none exists
        #[arg(long)]
        write: bool,
    },

    /// Assess a patient's discharge readiness
    Assess {
        /// Patient id
        #[arg(short, long)]
        patient: String,

        /// JSON file mapping tool name to the data it returns
        #[arg(short, long)]
        fixtures: PathBuf,

        /// Run the fixed dependency plan instead of the reasoning agent
        #[arg(long)]
        pipeline: bool,

        /// Override the goal given to the agent
        #[arg(short, long)]
        goal: Option<String>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show stored assessments for a patient
    History {
        /// Patient id
        #[arg(short, long)]
        patient: String,

        /// Print the assessment context as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { write } => commands::init::run(write).await?,
        Commands::Assess {
            patient,
            fixtures,
            pipeline,
            goal,
            json,
        } => {
            commands::assess::run(commands::assess::AssessArgs {
                patient,
                fixtures,
                pipeline,
                goal,
                json,
            })
            .await?
        }
        Commands::History { patient, json } => commands::history::run(&patient, json).await?,
    }

    Ok(())
}
