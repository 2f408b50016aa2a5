use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linkgate::config::Config;

mod commands;

use commands::RequestArgs;

#[derive(Parser)]
#[command(
    name = "linkgate",
    version,
    about = "Serve coordinator links to verified search engine crawlers",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file (default: LINKGATE_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the link for one request as JSON
    Link {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Print several links for one request as a JSON array
    Links {
        #[command(flatten)]
        request: RequestArgs,

        /// Number of links wanted
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,

        /// Allocate and report all links as one batch
        #[arg(long, default_value = "false")]
        new: bool,
    },

    /// Print the crawler identity of a request
    Classify {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Register the site with the coordinator
    Register {
        /// Site to register (default: configured site)
        #[arg(short, long)]
        site: Option<String>,
    },

    /// Show cached state of a site
    Status {
        /// Site to inspect (default: configured site)
        #[arg(short, long)]
        site: Option<String>,
    },

    /// Print the link queue of a site
    Queue {
        /// Site to inspect (default: configured site)
        #[arg(short, long)]
        site: Option<String>,

        /// Fetch from the coordinator even if the cache is fresh
        #[arg(long, default_value = "false")]
        refresh: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;

    // Initialize tracing/logging
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    tracing::debug!(data_dir = %config.data_dir.display(), "linkgate starting");

    match cli.command {
        Commands::Link { request } => commands::link(config, request).await?,

        Commands::Links {
            request,
            count,
            new,
        } => {
            tracing::debug!(count, new, "Starting links command");
            commands::links(config, request, count, new).await?;
        }

        Commands::Classify { request } => commands::classify(config, request).await?,

        Commands::Register { site } => commands::register(config, site).await?,

        Commands::Status { site } => commands::status(config, site).await?,

        Commands::Queue { site, refresh } => commands::queue(config, site, refresh).await?,
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Logs go to stderr; stdout carries the command output
fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("linkgate=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .or_else(|_| tracing_subscriber::EnvFilter::try_new(format!("linkgate={level},warn")))
            .context("Invalid log level")?
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
