//! # accel-dl
//!
//! Supervision library for external multi-connection download accelerators.
//!
//! An accelerator process (axel and its relatives) reports progress as loosely
//! formatted text. accel-dl turns that text into structured progress, decides
//! what kind of failure a dead process suffered, and reacts to it: retry after
//! a delay, mark the download failed, or ask the embedding application to deal
//! with a full disk or a missing permission.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - No process spawning and no UI, the embedder owns both
//! - **Event-driven** - Consumers subscribe to a broadcast channel of [`Event`]s
//! - **Pause wins** - A scheduled retry never overrides a user's pause, stop,
//!   cancel, or a completed transfer
//!
//! ## Quick Start
//!
//! ```no_run
//! use accel_dl::{Config, DownloadId, DownloadItem, OutputMonitor, RecoveryReactor, Status};
//! use std::sync::Arc;
//! use tokio::io::BufReader;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let (event_tx, mut events) = accel_dl::event_channel(&config);
//!     let reactor = RecoveryReactor::from_config(&config, event_tx.clone());
//!
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let item = Arc::new(DownloadItem::new(DownloadId(1), "file.iso", "/downloads", 0));
//!     item.set_status(Status::Downloading);
//!
//!     let mut child = tokio::process::Command::new("axel")
//!         .arg("https://example.com/file.iso")
//!         .stdout(std::process::Stdio::piped())
//!         .spawn()?;
//!
//!     let mut monitor = OutputMonitor::new(item, event_tx, &config.monitor);
//!     if let Some(stdout) = child.stdout.take() {
//!         monitor.run(BufReader::new(stdout)).await?;
//!     }
//!
//!     let status = child.wait().await?;
//!     monitor.finish(status.code().unwrap_or(-1), &reactor).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Failure classification
pub mod failure;
/// Per-download output monitoring
pub mod monitor;
/// Accelerator output parsing
pub mod output;
/// Failure recovery policy and remediation
pub mod recovery;
/// Core types: download items, status, progress and events
pub mod types;
/// Formatting and filesystem helpers
pub mod utils;

// Re-export commonly used types
pub use config::{Config, DiskSpaceConfig, MonitorConfig, RecoveryConfig};
pub use error::{Error, Result};
pub use failure::{FailureKind, FailureRecord, IsRetryable, classify};
pub use monitor::OutputMonitor;
pub use output::{ProgressSnapshot, parse};
pub use recovery::{EventRemediation, NoOpRemediation, RecoveryAction, RecoveryReactor, Remediation};
pub use types::{DownloadId, DownloadItem, DownloadProgress, Event, Status};

use tokio::sync::broadcast;

/// Create the event bus sized from [`MonitorConfig::event_channel_capacity`]
pub fn event_channel(config: &Config) -> (broadcast::Sender<Event>, broadcast::Receiver<Event>) {
    broadcast::channel(config.monitor.event_channel_capacity.max(1))
}

/// Wait for a termination signal, then shut the reactor down.
///
/// Pending retries are cancelled and no new ones are accepted.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to Ctrl+C if
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(reactor: RecoveryReactor) {
    wait_for_signal().await;
    reactor.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
    }
}
