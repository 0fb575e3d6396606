use std::fs;
use std::path::Path;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

use referral_engine::repositories::{memory::MemoryStore, Stores};
use referral_engine::services;
use referral_engine::settings::{Settings, StorageBackend};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "referral.toml")]
    config: String,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the referral service and its HTTP trigger surface.
    Serve,
    /// Recompute the daily statistics snapshot and exit.
    RefreshStatistics {
        /// Defaults to today (UTC).
        #[arg(long)]
        date: Option<chrono::NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    let settings = Settings::new(&args.config)?;

    init_logging(&args.log4rs)?;
    log::info!("Starting referral engine.");

    let stores = connect_stores(&settings).await?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => services::start_services(stores, settings).await?,
        Command::RefreshStatistics { date } => {
            let date = date.unwrap_or_else(|| chrono::Utc::now().date_naive());
            let snapshotter = services::statistics::Snapshotter::new(stores.statistics.clone());
            let snapshot = snapshotter.refresh(date).await?;
            log::info!("Refreshed statistics for {}.", snapshot.date);
        }
    }

    Ok(())
}

async fn connect_stores(settings: &Settings) -> Result<Stores> {
    match settings.storage.backend {
        StorageBackend::Postgres => {
            let conn = PgPoolOptions::new()
                .max_connections(settings.postgres.max_connections)
                .connect(&settings.postgres.url)
                .await?;
            sqlx::migrate!("./migrations").run(&conn).await?;

            Ok(Stores::postgres(conn))
        }
        StorageBackend::Memory => {
            log::warn!("Using in-memory storage; state is lost on exit.");
            let store = MemoryStore::new();
            for channel in &settings.storage.channels {
                store
                    .add_channel(&channel.title, &channel.url, channel.required)
                    .await;
            }

            Ok(Stores::memory(store))
        }
    }
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    log4rs::init_file(path, Default::default())
        .map_err(|e| anyhow::anyhow!("Could not initialize logging: {}", e))
}
