//! Remediation collaborators called by the recovery reactor

use crate::config::DiskSpaceConfig;
use crate::error::Error;
use crate::types::{DownloadItem, Event};
use crate::utils::check_free_space;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Side effects the reactor triggers before marking a download failed
///
/// Neither method returns a value the reactor acts on; the outcome is
/// reported to the user by whatever the implementation chooses to do.
#[async_trait]
pub trait Remediation: Send + Sync {
    /// Called when a download failed because the disk is full
    async fn check_disk_space(&self, item: &DownloadItem);

    /// Called when a download failed because the save path is not writable
    async fn request_disk_access(&self, item: &DownloadItem);

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Remediation that reports through the event bus
///
/// The disk space check requires the item's file size plus a safety margin
/// to be free at its save path. A shortage is published as
/// [`Event::InsufficientDiskSpace`]; a failed filesystem query is only logged.
pub struct EventRemediation {
    config: DiskSpaceConfig,
    event_tx: broadcast::Sender<Event>,
}

impl EventRemediation {
    /// Create a remediation publishing on `event_tx`
    pub fn new(config: DiskSpaceConfig, event_tx: broadcast::Sender<Event>) -> Self {
        Self { config, event_tx }
    }
}

#[async_trait]
impl Remediation for EventRemediation {
    async fn check_disk_space(&self, item: &DownloadItem) {
        if !self.config.enabled {
            tracing::debug!(download_id = %item.id(), "disk space check disabled");
            return;
        }

        let id = item.id();
        let path = item.save_path().to_path_buf();
        let required = item
            .file_size()
            .saturating_add(self.config.safety_margin_bytes);

        // statvfs can block on network filesystems
        let result = tokio::task::spawn_blocking(move || check_free_space(&path, required)).await;

        match result {
            Ok(Ok(available)) => {
                tracing::debug!(download_id = %id, required, available, "disk space sufficient");
            }
            Ok(Err(Error::InsufficientSpace {
                required,
                available,
            })) => {
                tracing::warn!(
                    download_id = %id,
                    file = item.file_name(),
                    required,
                    available,
                    "insufficient disk space"
                );
                self.event_tx
                    .send(Event::InsufficientDiskSpace {
                        id,
                        required,
                        available,
                    })
                    .ok();
            }
            Ok(Err(e)) => {
                tracing::warn!(download_id = %id, error = %e, "failed to check disk space");
            }
            Err(e) => {
                tracing::warn!(download_id = %id, error = %e, "disk space check task failed");
            }
        }
    }

    async fn request_disk_access(&self, item: &DownloadItem) {
        tracing::warn!(
            download_id = %item.id(),
            path = %item.save_path().display(),
            "disk access required"
        );
        self.event_tx
            .send(Event::DiskAccessRequired {
                id: item.id(),
                path: item.save_path().to_path_buf(),
            })
            .ok();
    }

    fn name(&self) -> &'static str {
        "event"
    }
}

/// Remediation that does nothing
///
/// For embedders that render failures purely from the download's status.
pub struct NoOpRemediation;

#[async_trait]
impl Remediation for NoOpRemediation {
    async fn check_disk_space(&self, _item: &DownloadItem) {}

    async fn request_disk_access(&self, _item: &DownloadItem) {}

    fn name(&self) -> &'static str {
        "noop"
    }
}
