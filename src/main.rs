use clap::{Parser, Subcommand};
use mra_harvester::config::Config;
use mra_harvester::logging;
use mra_harvester::pipeline::{Pipeline, RunOutcome};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "mra_harvester")]
#[command(about = "TMDB catalog harvester for the Movie Reviews App")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the daily export, bulk-load stubs, then enrich to completion
    FullSync {
        /// Records drained per enrichment batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// Override the export download URL
        #[arg(long)]
        export_url: Option<String>,
    },
    /// Enrich unenriched stubs already in the store
    Enrich {
        /// Records drained per enrichment batch
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Walk the live listing endpoints for movies the catalog is missing
    Discover {
        /// Endpoints to walk (comma-separated). Available: popular,
        /// top_rated, upcoming, now_playing
        #[arg(long)]
        endpoints: Option<String>,
    },
}

fn spawn_stop_handler() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n⏹  Stop requested, finishing the current batch...");
            flag.store(true, Ordering::Relaxed);
        }
    });
    stop
}

fn print_outcome(outcome: RunOutcome) {
    match outcome {
        RunOutcome::Complete => println!("✅ Run complete"),
        RunOutcome::Cancelled => println!("⏹  Run stopped with work remaining"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    let mut config = Config::load()?;

    let stop = spawn_stop_handler();

    match cli.command {
        Commands::FullSync {
            batch_size,
            export_url,
        } => {
            if let Some(batch_size) = batch_size {
                config.tuning.batch_size = batch_size;
            }
            if let Some(export_url) = export_url {
                config.export_url = export_url;
            }

            println!("🔄 Running full sync...");
            let pipeline = Pipeline::from_config(&config, stop)?;
            match pipeline
                .run_full_sync(&config.export_url, Path::new(&config.export_file))
                .await
            {
                Ok(report) => {
                    println!("\n📊 Full sync results:");
                    println!("   Export downloaded: {}", report.downloaded);
                    println!("   Stubs inserted: {}", report.import.inserted);
                    println!("   Already present: {}", report.import.already_present);
                    println!("   Malformed lines: {}", report.import.skipped_lines);
                    println!("   Enriched: {}", report.enrich.enriched);
                    println!("   Not found upstream: {}", report.enrich.not_found);
                    println!("   Abandoned: {}", report.enrich.abandoned);
                    print_outcome(report.outcome);
                }
                Err(e) => {
                    error!("Full sync failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        Commands::Enrich { batch_size } => {
            if let Some(batch_size) = batch_size {
                config.tuning.batch_size = batch_size;
            }

            println!("🔄 Running enrichment...");
            let pipeline = Pipeline::from_config(&config, stop)?;
            match pipeline.run_enrichment().await {
                Ok((stats, outcome)) => {
                    let remaining = pipeline.remaining_unenriched().await.unwrap_or(0);
                    println!("\n📊 Enrichment results:");
                    println!("   Enriched: {}", stats.enriched);
                    println!("   Not found upstream: {}", stats.not_found);
                    println!("   Abandoned: {}", stats.abandoned);
                    println!("   Deferred (transient): {}", stats.deferred);
                    println!("   Remaining unenriched: {}", remaining);
                    print_outcome(outcome);
                }
                Err(e) => {
                    error!("Enrichment failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        Commands::Discover { endpoints } => {
            let endpoints: Vec<String> = match endpoints {
                Some(list) => list.split(',').map(|s| s.trim().to_string()).collect(),
                None => config.tuning.discovery_endpoints.clone(),
            };
            info!("Discovery endpoints: {}", endpoints.join(", "));

            println!("🔍 Running discovery sync...");
            let pipeline = Pipeline::from_config(&config, stop)?;
            match pipeline.run_discovery(&endpoints).await {
                Ok((stats, outcome)) => {
                    println!("\n📊 Discovery results:");
                    println!("   Pages walked: {}", stats.pages);
                    println!("   Page retries: {}", stats.page_retries);
                    println!("   Detail fetches: {}", stats.detail_fetches);
                    println!("   Saved: {}", stats.saved);
                    println!("   Already known: {}", stats.already_known);
                    println!("   Not found upstream: {}", stats.not_found);
                    println!("   Deferred (transient): {}", stats.deferred);
                    print_outcome(outcome);
                }
                Err(e) => {
                    error!("Discovery sync failed: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}
