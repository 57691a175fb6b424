mod config;
mod error;
mod model;
mod normalize;
mod parser;
mod pipeline;
mod scraper;
mod writer;

use std::path::Path;

use clap::{ArgAction, Parser, Subcommand};
use tracing::{error, info, warn};

use crate::config::ScraperConfig;
use crate::pipeline::DataPipeline;
use crate::scraper::TenderScraper;
use crate::writer::JsonlWriter;

#[derive(Parser)]
#[command(name = "tender_scraper", about = "nProcure tender listing scraper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape the tender listing table into JSONL output
    Scrape {
        /// Max number of tenders to accept
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: u64,
        /// Concurrent pages (accepted for forward compatibility, currently
        /// a single page is driven)
        #[arg(long, env = "CONCURRENCY", default_value_t = 1)]
        concurrency: usize,
        /// Delay between page actions in seconds
        #[arg(long, env = "RATE_LIMIT", default_value_t = 1.0)]
        rate_limit: f64,
        /// Output directory for record and summary files
        #[arg(long, env = "OUTPUT_DIR", default_value = "data")]
        output_dir: String,
        /// Run the browser headless
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        headless: bool,
        /// Navigation and table-wait timeout in seconds
        #[arg(long, env = "TIMEOUT_SECONDS", default_value_t = 30)]
        timeout_seconds: u64,
        /// Max navigation retry attempts
        #[arg(long, env = "RETRIES", default_value_t = 3)]
        retries: u32,
        /// Override the browser user agent
        #[arg(long)]
        user_agent: Option<String>,
        /// Parse and count without writing any output
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scrape {
            limit,
            concurrency,
            rate_limit,
            output_dir,
            headless,
            timeout_seconds,
            retries,
            user_agent,
            dry_run,
        } => {
            let config = ScraperConfig {
                rate_limit,
                concurrency,
                limit,
                headless,
                timeout_seconds,
                retries,
                user_agent,
                output_dir,
                dry_run,
            };
            if config.concurrency > 1 {
                warn!(
                    "concurrency={} requested, but a single page is driven per run",
                    config.concurrency
                );
            }

            let run_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
            info!("Starting scraper run {}", run_id);

            let writer = JsonlWriter::new(Path::new(&config.output_dir), &run_id, config.dry_run)?;
            let prior_keys = writer.load_existing_keys()?;
            let mut pipeline = DataPipeline::new(writer, run_id);
            pipeline.seed_keys(prior_keys);

            match TenderScraper::new(config, pipeline).run().await {
                Ok(summary) => {
                    info!(
                        "Scrape finished in {:.1}s: {} pages, {} rows, {} saved",
                        summary.duration_seconds,
                        summary.pages_visited,
                        summary.rows_seen,
                        summary.saved
                    );
                }
                Err(e) => {
                    error!("Scrape failed: {:#}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
