mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "stacport",
    version,
    about = "STAC catalog harvester with spatiotemporal search and replayable ingestion jobs",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (defaults to environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json), overrides the configuration
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve,

    /// Discover public catalogs and harvest them
    Sync,

    /// Register (if needed) and harvest one catalog
    Harvest {
        /// Catalog root URL
        #[arg(short, long)]
        url: String,

        /// Catalog name
        #[arg(short, long)]
        name: String,

        /// Catalog description
        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// Search harvested collections
    Search {
        /// Bounding box as minX,minY,maxX,maxY
        #[arg(short, long, allow_hyphen_values = true)]
        bbox: String,

        /// Time interval as start/end, '..' for open bounds
        #[arg(short, long, default_value = "../..")]
        interval: String,

        /// Restrict to one catalog
        #[arg(long)]
        catalog: Option<i64>,
    },

    /// Dispatch an ingestion job for a catalog
    Ingest {
        /// Catalog id
        #[arg(long)]
        catalog: i64,

        /// Comma-separated collection ids
        #[arg(long, value_delimiter = ',')]
        collections: Vec<String>,

        /// Bounding box as minX,minY,maxX,maxY
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        bbox: Option<Vec<f64>>,

        /// STAC datetime filter (instant or start/end)
        #[arg(long)]
        datetime: Option<String>,

        /// Update collections already present in the target
        #[arg(long, default_value = "false")]
        update: bool,

        /// Print the settled status of every job
        #[arg(long, default_value = "false")]
        wait: bool,
    },

    /// Replay stored ingestion requests with update enabled
    Replay {
        /// Only this catalog
        #[arg(long)]
        catalog: Option<i64>,

        /// Comma-separated collection ids (requires --catalog)
        #[arg(long, value_delimiter = ',', requires = "catalog")]
        collections: Vec<String>,

        /// Print the settled status of every job
        #[arg(long, default_value = "false")]
        wait: bool,
    },

    /// Show ingestion status rows
    Status {
        /// Status id, all rows when omitted
        id: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = commands::load_config(cli.config.as_deref())?;
    let log_format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(log_format, &config.logging.level, cli.verbose)?;

    tracing::debug!(command = command_name(&cli.command), "stacport starting");

    match cli.command {
        Commands::Serve => commands::serve(config).await?,
        Commands::Sync => commands::sync(config).await?,
        Commands::Harvest {
            url,
            name,
            description,
        } => {
            tracing::info!(url = %url, name = %name, "Starting harvest command");
            commands::harvest(config, &name, &url, &description).await?;
        }
        Commands::Search {
            bbox,
            interval,
            catalog,
        } => commands::search(config, &bbox, &interval, catalog)?,
        Commands::Ingest {
            catalog,
            collections,
            bbox,
            datetime,
            update,
            wait,
        } => {
            let request = commands::IngestArgs {
                catalog,
                collections,
                bbox,
                datetime,
                update,
            };
            commands::ingest(config, request, wait).await?;
        }
        Commands::Replay {
            catalog,
            collections,
            wait,
        } => commands::replay(config, catalog, collections, wait).await?,
        Commands::Status { id } => commands::status(config, id)?,
    }

    Ok(())
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Serve => "serve",
        Commands::Sync => "sync",
        Commands::Harvest { .. } => "harvest",
        Commands::Search { .. } => "search",
        Commands::Ingest { .. } => "ingest",
        Commands::Replay { .. } => "replay",
        Commands::Status { .. } => "status",
    }
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("stacport=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("stacport={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
