pub mod config;
pub mod models;
pub mod db;
pub mod store; // Record Store
pub mod screening; // Workflow Engine + Attachment Pipeline
pub mod sync; // Sync Reconciler
pub mod connectivity; // Connectivity Monitor
pub mod auth;
pub mod core_state;

#[cfg(test)]
mod test_support;

pub use core_state::{AppContext, CoreError, Services, SyncSummary};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Reads `RUST_LOG`, falling back to `config::default_log_filter()`.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();

    if result.is_ok() {
        tracing::info!("{} core v{}", config::APP_NAME, config::APP_VERSION);
    }
}
