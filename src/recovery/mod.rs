//! Failure recovery
//!
//! The [`RecoveryReactor`] applies the recovery policy to a classified
//! [`FailureRecord`](crate::failure::FailureRecord): mark the download failed,
//! re-queue it after a fixed delay, or call a [`Remediation`] collaborator
//! first (disk space check, disk access request).
//!
//! ## Architecture
//!
//! Remediation is a trait so the embedding application decides how a
//! shortage or a permission problem reaches the user:
//!
//! - [`EventRemediation`]: publishes [`Event`](crate::types::Event)s on the
//!   broadcast channel for a UI to render
//! - [`NoOpRemediation`]: does nothing
//!
//! ## Usage
//!
//! ```no_run
//! use accel_dl::config::Config;
//! use accel_dl::failure::classify;
//! use accel_dl::recovery::RecoveryReactor;
//! use accel_dl::types::{DownloadId, DownloadItem, Status};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let (event_tx, mut events) = tokio::sync::broadcast::channel(config.monitor.event_channel_capacity);
//! let reactor = RecoveryReactor::from_config(&config, event_tx);
//!
//! let item = Arc::new(DownloadItem::new(DownloadId(1), "file.iso", "/downloads", 0));
//! item.set_status(Status::Downloading);
//!
//! let failure = classify("Connection refused", 1, item.file_name());
//! reactor.handle(&failure, &item).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

mod reactor;
mod remediation;


pub use reactor::{RecoveryAction, RecoveryReactor};
pub use remediation::{EventRemediation, NoOpRemediation, Remediation};
