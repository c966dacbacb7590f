//! Retention worker for periodic audit log cleanup

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::audit::AuditLog;
use crate::models::audit::DEFAULT_DAYS_TO_KEEP;

/// Retention worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Cleanup interval
    pub interval: Duration,

    /// Initial delay before first cleanup
    pub initial_delay: Duration,

    /// Entries started more than this many days ago are deleted
    pub days_to_keep: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            initial_delay: Duration::from_secs(5),
            days_to_keep: DEFAULT_DAYS_TO_KEEP,
        }
    }
}

/// Run the retention worker until `shutdown_signal` resolves
pub async fn run<S, F>(
    options: &Options,
    audit: &AuditLog,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!(
        "Retention worker starting (keep {} days, every {:?})...",
        options.days_to_keep, options.interval
    );

    let mut delay = options.initial_delay;
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Retention worker shutting down...");
                return;
            }
            _ = sleep_fn(delay) => {
                // Continue with cleanup
            }
        }
        delay = options.interval;

        debug!("Running audit log cleanup...");
        match audit.cleanup_old_logs(options.days_to_keep).await {
            Ok(deleted) => {
                debug!("Cleanup removed {} entries", deleted);
            }
            Err(e) => {
                error!("Audit log cleanup failed: {}", e);
            }
        }
    }
}
