//! restocache - command line front end for the offline restaurant data layer.
//!
//! Every command opens the service, runs the page-load work (asset
//! activation and a queue drain), does its job and flushes on exit.

use std::io;
use std::path::Path;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use restocache_core::api::Method;
use restocache_core::models::catalog::ALL;
use restocache_core::{Config, DrainOutcome, NewReview, Request, SyncEvent, SyncService};
use tokio::sync::broadcast;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log file name inside the cache directory (rotated daily).
const LOG_FILE: &str = "restocache.log";

#[derive(Parser)]
#[command(name = "restocache", version, about = "Offline-first restaurant reviews")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List restaurants, optionally filtered
    Restaurants {
        #[arg(long, default_value = ALL)]
        cuisine: String,
        #[arg(long, default_value = ALL)]
        neighborhood: String,
    },
    /// Show one restaurant
    Restaurant { id: i64 },
    /// List neighborhoods
    Neighborhoods,
    /// List cuisines
    Cuisines,
    /// Show reviews for a restaurant
    Reviews { restaurant_id: i64 },
    /// Re-download restaurants, or one restaurant's reviews, into the local store
    Refresh {
        #[arg(long)]
        reviews: Option<i64>,
    },
    /// Post a review; queued if the server is unreachable
    Review {
        restaurant_id: i64,
        #[arg(long)]
        name: String,
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..=5))]
        rating: i64,
        #[arg(long, default_value = "")]
        comments: String,
    },
    /// Toggle a restaurant's favorite flag
    Favorite { id: i64 },
    /// Replay queued writes now
    Drain,
    /// List queued writes
    Queue,
    /// Pre-populate the current asset cache
    Install,
    /// Delete old asset cache generations
    Activate,
    /// Route a GET through the interceptor and print the response
    Fetch { url: String },
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and, when the cache directory is usable, to a daily
/// rotated file. The returned guard must live until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir.filter(|dir| std::fs::create_dir_all(dir).is_ok()) {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE));
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::load()?;
    let _guard = init_tracing(config.cache_dir().ok().as_deref());
    info!("restocache starting");

    let service = SyncService::open(&config).await?;
    let banner = tokio::spawn(offline_banner(service.subscribe()));

    if let Some(DrainOutcome::Completed(report)) = service.start().await {
        if report.replayed > 0 {
            eprintln!("Synced {} queued write(s)", report.replayed);
        }
    }

    let result = run(&service, cli.command).await;
    service.close().await?;
    banner.abort();
    result
}

/// Print the transient offline notice whenever a write is queued.
async fn offline_banner(mut events: broadcast::Receiver<SyncEvent>) {
    loop {
        match events.recv().await {
            Ok(SyncEvent::Queued { description, .. }) => {
                eprintln!("You are offline. {} will be sent when the connection returns.", description);
            }
            Ok(event) => debug!(?event, "Sync event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => debug!(skipped, "Missed sync events"),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn run(service: &SyncService, command: Command) -> Result<()> {
    match command {
        Command::Restaurants { cuisine, neighborhood } => {
            for r in service.restaurants_by(&cuisine, &neighborhood).await? {
                let star = if r.is_favorite { "*" } else { " " };
                println!("{} {:>3}  {}  ({}, {})", star, r.id, r.name, r.display_neighborhood(), r.display_cuisine());
            }
        }
        Command::Restaurant { id } => {
            let restaurant = service.restaurant(id).await?;
            println!("{}", serde_json::to_string_pretty(&restaurant)?);
        }
        Command::Neighborhoods => {
            for name in service.neighborhoods().await? {
                println!("{}", name);
            }
        }
        Command::Cuisines => {
            for name in service.cuisines().await? {
                println!("{}", name);
            }
        }
        Command::Reviews { restaurant_id } => {
            let reviews = service.reviews(restaurant_id).await?;
            if reviews.is_empty() {
                println!("No reviews yet!");
            }
            for review in reviews {
                let pending = if review.unsynced { " (pending)" } else { "" };
                let rating = review.rating.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string());
                println!("{} - {}/5{}\n  {}", review.name, rating, pending, review.comments);
            }
        }
        Command::Refresh { reviews } => {
            let count = match reviews {
                Some(restaurant_id) => service.refresh_reviews(restaurant_id).await?,
                None => service.refresh_restaurants().await?,
            };
            println!("Refreshed {} record(s)", count);
        }
        Command::Review { restaurant_id, name, rating, comments } => {
            let review = NewReview::new(restaurant_id, name, rating, comments);
            match service.create_review(&review).await {
                Ok(saved) => println!("Review saved (id {})", saved.id.unwrap_or_default()),
                Err(e) if e.queued().is_some() => println!("{}", e),
                Err(e) => return Err(e.into()),
            }
        }
        Command::Favorite { id } => {
            let restaurant = service.restaurant(id).await?;
            match service.toggle_favorite(&restaurant).await {
                Ok(updated) => println!("{} favorite: {}", updated.name, updated.is_favorite),
                Err(e) if e.queued().is_some() => println!("{}", e),
                Err(e) => return Err(e.into()),
            }
        }
        Command::Drain => match service.drain_queue().await? {
            DrainOutcome::AlreadyRunning => println!("A drain is already running"),
            DrainOutcome::Completed(report) => {
                println!("Replayed {}, {} remaining", report.replayed, report.remaining);
                if let (Some(key), Some(error)) = (report.halted_at, report.error) {
                    println!("Stopped at entry {}: {}", key, error);
                }
            }
        },
        Command::Queue => {
            let pending = service.pending_writes().await?;
            if pending.is_empty() {
                println!("No queued writes");
            }
            for (key, entry) in pending {
                println!(
                    "{:>4}  {} {}  {}  queued {}",
                    key,
                    entry.request.method,
                    entry.request.url,
                    entry.describe(),
                    entry.queued_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Command::Install => {
            let report = service.install_assets().await?;
            println!("Cached {} asset(s)", report.cached);
            for path in report.failed {
                println!("  failed: {}", path);
            }
        }
        Command::Activate => {
            for name in service.activate_assets().await? {
                println!("Deleted {}", name);
            }
        }
        Command::Fetch { url } => {
            let Some(response) = service.fetch(&Request::new(Method::Get, url)).await else {
                bail!("Request is not handled offline");
            };
            eprintln!("{} {} ({})", response.status, response.status_text, response.source);
            println!("{}", response.text());
        }
    }
    Ok(())
}
