use clap::{Parser, Subcommand};
use context_engine::Result;
use context_engine::commands::{index_workspace, run_query, show_config, show_status};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "context-engine")]
#[command(about = "Code-aware context engine: index a workspace and retrieve budgeted context")]
#[command(version)]
struct Cli {
    /// Workspace root (defaults to the current directory)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the workspace (full build or incremental replay)
    Index,
    /// Retrieve a packed context block for a request
    Query {
        /// The natural-language request
        input: String,
        /// Total token budget for the prompt
        #[arg(long, default_value_t = 4000)]
        budget: u32,
        /// Workspace-relative path of the active editor file
        #[arg(long)]
        active_file: Option<String>,
    },
    /// Show index status and store statistics
    Status,
    /// Show the active configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Index => {
            index_workspace(cli.workspace).await?;
        }
        Commands::Query {
            input,
            budget,
            active_file,
        } => {
            run_query(cli.workspace, input, budget, active_file).await?;
        }
        Commands::Status => {
            show_status(cli.workspace).await?;
        }
        Commands::Config => {
            show_config(cli.workspace)?;
        }
    }

    Ok(())
}
