use crate::error::{AppError, Result};

pub const SHOPIFY_API_VERSION: &str = "2024-10";

/// Days of order history fetched per scan.
pub const DEFAULT_SCAN_LOOKBACK_DAYS: i64 = 60;

/// How often the sweeper looks for shops whose `next_scan_at` has passed (seconds).
pub const SWEEP_INTERVAL_SECS: u64 = 300;

/// Shop-local hour at which the next automatic scan is scheduled.
pub const SCAN_LOCAL_HOUR: u32 = 11;

/// Upper bound on pages followed per Shopify collection, to keep a runaway shop bounded.
pub const MAX_FETCH_PAGES: usize = 40;

/// Page size for Shopify Admin REST list endpoints.
pub const FETCH_PAGE_SIZE: usize = 250;

/// Business-tuned cutoffs. These are published behavior: change them only with
/// product sign-off.
pub mod thresholds {
    // Sales rhythm drift, same-weekday baseline.
    pub const RHYTHM_LOOKBACK_DAYS: i64 = 56;
    pub const RHYTHM_MIN_DAY_ORDERS: usize = 3;
    pub const RHYTHM_MIN_BASELINE_DAYS: usize = 4;
    pub const RHYTHM_MIN_BASELINE_MEDIAN: f64 = 6.0;
    pub const RHYTHM_IQR_FENCE: f64 = 1.5;
    pub const RHYTHM_DROP_RATIO: f64 = 0.6;
    pub const RHYTHM_HIGH_RATIO: f64 = 0.4;
    pub const RHYTHM_MIN_DAY_PROGRESS: f64 = 0.25;

    // Sales drift, 7-day window comparison.
    pub const WINDOW_DAYS: i64 = 7;
    pub const WINDOW_MIN_BASELINE_ORDERS: usize = 5;
    pub const WINDOW_HIGH_DROP: f64 = 0.30;
    pub const WINDOW_MEDIUM_DROP: f64 = 0.15;
    pub const WINDOW_LOW_DROP: f64 = 0.10;
    pub const WINDOW_CANCEL_HIGH_MULTIPLIER: f64 = 2.0;
    pub const WINDOW_CANCEL_HIGH_MIN_RATE: f64 = 0.05;
    pub const WINDOW_CANCEL_MEDIUM_MULTIPLIER: f64 = 1.5;

    // Inventory velocity risk.
    pub const VELOCITY_WINDOW_DAYS: i64 = 14;
    pub const VELOCITY_WINDOW_DAYS_EXTENDED: i64 = 30;
    pub const SUPPLY_HIGH_DAYS: f64 = 3.0;
    pub const SUPPLY_MEDIUM_DAYS: f64 = 7.0;
    pub const LOW_STOCK_HIGH_UNITS: i64 = 5;
    pub const LOW_STOCK_MEDIUM_UNITS: i64 = 15;
    pub const LOW_STOCK_MIN_ITEMS: usize = 2;

    // Dead inventory.
    pub const DEAD_MIN_STOCK: i64 = 10;
    pub const DEAD_STOPPED_DAYS: i64 = 30;
    pub const DEAD_HORIZON_DAYS: i64 = 90;
    pub const DEAD_SLOW_COVER_DAYS: f64 = 90.0;
    pub const DEAD_HIGH_CASH: f64 = 500.0;
    pub const DEAD_MEDIUM_ITEMS: usize = 3;

    // Price volatility risk.
    pub const PRICE_LOOKBACK_DAYS: i64 = 7;
    /// Snapshots older than this are pruned when new ones are recorded.
    pub const PRICE_SNAPSHOT_RETENTION_DAYS: i64 = 2 * PRICE_LOOKBACK_DAYS;
    pub const PRICE_MIN_DISTINCT: usize = 3;
    pub const PRICE_MIN_SWING: f64 = 0.10;
    pub const PRICE_HIGH_SWING: f64 = 0.25;
    pub const PRICE_HIGH_DISTINCT: usize = 5;
    pub const PRICE_MEDIUM_SWING: f64 = 0.15;
    pub const PRICE_MEDIUM_DISTINCT: usize = 4;

    // Product concentration risk.
    pub const CONCENTRATION_WINDOW_DAYS: i64 = 14;
    pub const CONCENTRATION_MIN_UNITS: u64 = 3;
    pub const CONCENTRATION_MIN_REVENUE: f64 = 50.0;
    pub const CONCENTRATION_HIGH_TOP1: f64 = 0.60;
    pub const CONCENTRATION_MEDIUM_TOP3: f64 = 0.80;
    pub const CONCENTRATION_LOW_TOP3: f64 = 0.70;
}

/// Minimum hours between two persisted insights of the same type for a shop.
pub mod guard_hours {
    pub const SALES: i64 = 6;
    pub const INVENTORY: i64 = 6;
    pub const DEAD_INVENTORY: i64 = 168;
    pub const PRICE_VOLATILITY: i64 = 24;
    pub const CONCENTRATION: i64 = 72;
    pub const DEFAULT: i64 = 24;
}

/// Which sales-drift formulation the registry runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SalesDriftVariant {
    /// Today vs same weekday over the trailing eight weeks.
    Weekday,
    /// Trailing 7 days vs the 7 days before.
    Window,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub shopify_api_version: String,
    /// Days of order history fetched per scan (SCAN_LOOKBACK_DAYS)
    pub scan_lookback_days: i64,
    /// Seconds between due-shop sweeps (SWEEP_INTERVAL_SECS)
    pub sweep_interval_secs: u64,
    /// SCAN_SALES_DRIFT_VARIANT: `weekday` (default) or `window`
    pub sales_drift_variant: SalesDriftVariant,
    /// INVENTORY_VELOCITY_WINDOW_DAYS: 14 (default) or 30
    pub inventory_velocity_window_days: i64,
    /// None when MAIL_API_URL is unset; digests are then skipped.
    pub mail: Option<MailConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let sales_drift_variant = match std::env::var("SCAN_SALES_DRIFT_VARIANT")
            .unwrap_or_else(|_| "weekday".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "weekday" => SalesDriftVariant::Weekday,
            "window" => SalesDriftVariant::Window,
            other => {
                return Err(AppError::Config(format!(
                    "SCAN_SALES_DRIFT_VARIANT must be `weekday` or `window`, got `{other}`"
                )))
            }
        };

        let inventory_velocity_window_days = std::env::var("INVENTORY_VELOCITY_WINDOW_DAYS")
            .unwrap_or_else(|_| thresholds::VELOCITY_WINDOW_DAYS.to_string())
            .parse::<i64>()
            .map_err(|_| AppError::Config("INVENTORY_VELOCITY_WINDOW_DAYS must be an integer".to_string()))?;
        if inventory_velocity_window_days != thresholds::VELOCITY_WINDOW_DAYS
            && inventory_velocity_window_days != thresholds::VELOCITY_WINDOW_DAYS_EXTENDED
        {
            return Err(AppError::Config(
                "INVENTORY_VELOCITY_WINDOW_DAYS must be 14 or 30".to_string(),
            ));
        }

        let mail = match std::env::var("MAIL_API_URL") {
            Ok(api_url) if !api_url.trim().is_empty() => Some(MailConfig {
                api_url,
                api_key: std::env::var("MAIL_API_KEY").unwrap_or_default(),
                from: std::env::var("MAIL_FROM")
                    .unwrap_or_else(|_| "insights@localhost".to_string()),
            }),
            _ => None,
        };

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "insights.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            shopify_api_version: std::env::var("SHOPIFY_API_VERSION")
                .unwrap_or_else(|_| SHOPIFY_API_VERSION.to_string()),
            scan_lookback_days: parse_lookback_days(std::env::var("SCAN_LOOKBACK_DAYS").ok().as_deref())?,
            sweep_interval_secs: std::env::var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| SWEEP_INTERVAL_SECS.to_string())
                .parse::<u64>()
                .map_err(|_| AppError::Config("SWEEP_INTERVAL_SECS must be a positive integer".to_string()))?,
            sales_drift_variant,
            inventory_velocity_window_days,
            mail,
        })
    }
}

/// SCAN_LOOKBACK_DAYS must cover the same-weekday baseline.
fn parse_lookback_days(raw: Option<&str>) -> Result<i64> {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(DEFAULT_SCAN_LOOKBACK_DAYS);
    };
    let days = raw
        .parse::<i64>()
        .map_err(|_| AppError::Config("SCAN_LOOKBACK_DAYS must be an integer".to_string()))?;
    if days < thresholds::RHYTHM_LOOKBACK_DAYS {
        return Err(AppError::Config(format!(
            "SCAN_LOOKBACK_DAYS must be at least {}, got {days}",
            thresholds::RHYTHM_LOOKBACK_DAYS
        )));
    }
    Ok(days)
}
