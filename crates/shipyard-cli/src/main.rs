//! Shipyard deployment worker.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(about = "Deploy git repositories to managed cloud infrastructure", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
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
enum Commands {
    /// Run one deployment and print the result document
    Deploy {
        /// Request document; defaults to PROJECT_CONFIG, then stdin
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Normalize a request document and print the canonical spec
    Validate {
        /// Request document; defaults to PROJECT_CONFIG, then stdin
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, env = "DEPLOYMENT_ID", default_value = "local")]
        deployment_id: String,
        #[arg(long, env = "PROJECT_ID", default_value = "local")]
        project_id: String,
        #[arg(long, env = "SUBDOMAIN", default_value = "local")]
        subdomain: String,
    },
    /// Print the build plan for a checked-out tree
    Classify {
        /// Repository root
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// Framework name or alias; detected when omitted
        #[arg(long)]
        framework: Option<String>,
        /// Database engine
        #[arg(long)]
        db: Option<String>,
        /// Port override
        #[arg(long)]
        port: Option<String>,
    },
    /// Delete every resource tagged with a deployment id
    Reconcile {
        /// Deployment to clean up; defaults to DEPLOYMENT_ID
        #[arg(long)]
        deployment_id: Option<String>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Deploy { config } => commands::deploy::run(config.as_deref()).await,
        Commands::Validate {
            config,
            deployment_id,
            project_id,
            subdomain,
        } => commands::validate(config.as_deref(), &deployment_id, &project_id, &subdomain),
        Commands::Classify {
            dir,
            framework,
            db,
            port,
        } => commands::classify(&dir, framework.as_deref(), db.as_deref(), port.as_deref()),
        Commands::Reconcile { deployment_id } => {
            commands::reconcile::run(deployment_id.as_deref()).await
        }
    }
}
