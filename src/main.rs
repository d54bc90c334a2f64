use clap::{Parser, Subcommand};
use corpus_ingest::Result;
use corpus_ingest::commands::{
    configure, notify, requeue_failed, run_pipeline, scan, show_results, show_status,
};
use corpus_ingest::config::{BASE_DIR_ENV, Config, get_config_dir};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "corpus-ingest")]
#[command(about = "Incremental document ingestion into a vector store")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml, the cache database, vectors and artifacts
    #[arg(long, global = true, env = BASE_DIR_ENV)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the configuration file, or show the effective configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Record uploads of the given object keys
    Notify {
        /// Object keys in the uploads store
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Record every object currently in the uploads store
    Scan,
    /// Run the ingestion pipeline once
    Run {
        /// Identifier for the run's artifacts, generated when omitted
        #[arg(long)]
        run_id: Option<String>,
        /// Drop and recreate the vector table before processing
        #[arg(long)]
        purge: bool,
    },
    /// Show cache entry counts and stored vectors
    Status,
    /// Show the per-document results of a run
    Results {
        /// Run identifier
        run_id: String,
    },
    /// Move failed documents back to pending
    Requeue,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let base_dir = match cli.base_dir {
        Some(dir) => dir,
        None => get_config_dir().map_err(anyhow::Error::from)?,
    };
    let config = Config::load(&base_dir)?;

    match cli.command {
        Commands::Config { show } => {
            configure(&config, show)?;
        }
        Commands::Notify { keys } => {
            notify(&config, keys).await?;
        }
        Commands::Scan => {
            scan(&config).await?;
        }
        Commands::Run { run_id, purge } => {
            run_pipeline(&config, run_id, purge).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
        Commands::Results { run_id } => {
            show_results(&config, &run_id).await?;
        }
        Commands::Requeue => {
            requeue_failed(&config).await?;
        }
    }

    Ok(())
}
