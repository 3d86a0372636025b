mod api;
mod collab;
mod config;
mod context;
mod db;
mod detector;
mod error;
mod fetcher;
mod guard;
mod mailer;
mod normalizer;
mod scan;
mod stats;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::routes::{router, ApiState};
use crate::collab::Mailer;
use crate::config::{Config, SalesDriftVariant};
use crate::db::SqliteStore;
use crate::error::Result;
use crate::fetcher::ShopifyFetcher;
use crate::mailer::HttpMailer;
use crate::scan::{ScanEngine, ScanSweeper};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let store = Arc::new(SqliteStore::connect(&cfg.db_path).await?);
    info!("Database ready at {}", cfg.db_path);

    // --- Collaborators ---
    let fetcher = Arc::new(ShopifyFetcher::new(&cfg.shopify_api_version)?);
    let mailer: Option<Arc<dyn Mailer>> = match cfg.mail.clone() {
        Some(mail) => {
            info!("Digest mail via {}", mail.api_url);
            Some(Arc::new(HttpMailer::new(mail)?))
        }
        None => {
            warn!("MAIL_API_URL not set: daily digests will not be sent");
            None
        }
    };

    let engine = Arc::new(ScanEngine::from_config(&cfg, fetcher, store, mailer));
    let variant = match cfg.sales_drift_variant {
        SalesDriftVariant::Weekday => "weekday",
        SalesDriftVariant::Window => "window",
    };
    info!(
        "Scan engine ready: lookback={}d sales_drift={variant} velocity_window={}d",
        cfg.scan_lookback_days, cfg.inventory_velocity_window_days,
    );

    // --- Background sweep of due shops ---
    let health = Arc::new(HealthState::new());
    let sweeper = ScanSweeper::new(Arc::clone(&engine), Arc::clone(&health), cfg.sweep_interval_secs);
    tokio::spawn(async move { sweeper.run().await });
    info!("[SWEEP] checking for due shops every {}s", cfg.sweep_interval_secs);

    // --- HTTP API server ---
    let app = router(ApiState { engine, health });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
