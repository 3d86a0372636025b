pub mod orchestrator;
pub mod schedule;
pub mod sweeper;

pub use orchestrator::{DigestOutcome, ScanEngine, ScanSummary, SkipEntry};
pub use sweeper::{run_due_scans, ScanSweeper, ShopScanResult};
