//! The recovery reactor

use super::remediation::{EventRemediation, Remediation};
use crate::config::{Config, RecoveryConfig};
use crate::error::{Error, Result};
use crate::failure::{FailureKind, FailureRecord, IsRetryable};
use crate::types::{DownloadId, DownloadItem, Event, Status};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

/// What the reactor did with a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// The item was moved to `Failed`
    MarkedFailed,
    /// A delayed move to `Waiting` plus a retry signal was scheduled
    RetryScheduled {
        /// Delay before the retry fires
        delay: Duration,
    },
    /// The item's status was protected and left as is
    LeftUnchanged {
        /// The status that was kept
        status: Status,
    },
}

struct PendingRetry {
    generation: u64,
    token: CancellationToken,
}

/// Applies the recovery policy to classified failures
///
/// Cloneable; all state is shared. Construct one per application and hand
/// clones to whatever owns the active downloads.
///
/// Delayed retries are tokio tasks racing a [`CancellationToken`] against a
/// sleep, so a pending retry never blocks other work and can be withdrawn
/// with [`cancel_retry`](Self::cancel_retry). When a retry fires, the status
/// check and the write to `Waiting` happen under the pending-retry lock,
/// serializing them against cancellation.
#[derive(Clone)]
pub struct RecoveryReactor {
    config: Arc<RecoveryConfig>,
    event_tx: broadcast::Sender<Event>,
    remediation: Arc<dyn Remediation>,
    pending: Arc<Mutex<HashMap<DownloadId, PendingRetry>>>,
    next_generation: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl RecoveryReactor {
    /// Create a reactor with an explicit remediation implementation
    pub fn new(
        config: RecoveryConfig,
        event_tx: broadcast::Sender<Event>,
        remediation: Arc<dyn Remediation>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            event_tx,
            remediation,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(0)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a reactor that reports remediation through the event bus
    pub fn from_config(config: &Config, event_tx: broadcast::Sender<Event>) -> Self {
        let remediation = Arc::new(EventRemediation::new(
            config.disk_space.clone(),
            event_tx.clone(),
        ));
        tracing::debug!(remediation = remediation.name(), "creating recovery reactor");
        Self::new(config.recovery.clone(), event_tx, remediation)
    }

    /// Subscribe to the events this reactor emits
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The sender this reactor publishes on, for attaching more monitors
    pub fn event_sender(&self) -> broadcast::Sender<Event> {
        self.event_tx.clone()
    }

    /// Apply the recovery policy for `failure` to `item`
    ///
    /// | kind        | retryable | action                                        |
    /// |-------------|-----------|-----------------------------------------------|
    /// | network     | yes       | retry after `network_retry_delay`             |
    /// | network     | no        | failed                                        |
    /// | filesystem  | -         | disk space check if out of space, then failed |
    /// | permission  | -         | disk access request, then failed              |
    /// | server      | yes       | retry after `server_retry_delay`              |
    /// | server      | no        | failed                                        |
    /// | process     | -         | failed, unless the item is paused             |
    /// | unknown     | -         | retry after `unknown_retry_delay`             |
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] if a retry would be scheduled after
    /// [`shutdown`](Self::shutdown).
    pub async fn handle(
        &self,
        failure: &FailureRecord,
        item: &Arc<DownloadItem>,
    ) -> Result<RecoveryAction> {
        tracing::warn!(
            download_id = %item.id(),
            source = %failure.source_name,
            kind = ?failure.kind,
            retryable = failure.is_retryable(),
            "{}",
            failure.formatted_message()
        );
        self.event_tx
            .send(Event::FailureDetected {
                id: item.id(),
                failure: failure.clone(),
            })
            .ok();

        match failure.kind {
            FailureKind::Network if failure.is_retryable() => {
                self.schedule_retry(item, self.config.network_retry_delay)
                    .await
            }
            FailureKind::Network => Ok(self.mark_failed(item).await),
            FailureKind::Filesystem => {
                if failure.indicates_no_space() {
                    self.remediation.check_disk_space(item).await;
                }
                Ok(self.mark_failed(item).await)
            }
            FailureKind::Permission => {
                self.remediation.request_disk_access(item).await;
                Ok(self.mark_failed(item).await)
            }
            FailureKind::Server if failure.is_retryable() => {
                self.schedule_retry(item, self.config.server_retry_delay)
                    .await
            }
            FailureKind::Server => Ok(self.mark_failed(item).await),
            FailureKind::Process => Ok(self.mark_failed_unless_paused(item).await),
            FailureKind::Unknown => {
                self.schedule_retry(item, self.config.unknown_retry_delay)
                    .await
            }
        }
    }

    /// Withdraw a pending retry (call on pause, stop, cancel or removal)
    ///
    /// Returns `true` if a retry was pending.
    pub async fn cancel_retry(&self, id: DownloadId) -> bool {
        let removed = self.pending.lock().await.remove(&id);
        match removed {
            Some(pending) => {
                pending.token.cancel();
                tracing::debug!(download_id = %id, "pending retry cancelled");
                self.event_tx.send(Event::RetryCancelled { id }).ok();
                true
            }
            None => false,
        }
    }

    /// Whether a retry is pending for `id`
    pub async fn has_pending_retry(&self, id: DownloadId) -> bool {
        self.pending.lock().await.contains_key(&id)
    }

    /// Number of retries waiting to fire
    pub async fn pending_retries(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Cancel every pending retry and refuse to schedule new ones
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let drained = {
            let mut pending = self.pending.lock().await;
            pending.drain().count()
        };
        tracing::info!(cancelled = drained, "recovery reactor shut down");
    }

    async fn mark_failed(&self, item: &DownloadItem) -> RecoveryAction {
        // A fresh failure supersedes any retry still waiting for this item
        self.cancel_retry(item.id()).await;

        let from = item.set_status(Status::Failed);
        self.status_changed(item.id(), from, Status::Failed);
        RecoveryAction::MarkedFailed
    }

    async fn mark_failed_unless_paused(&self, item: &DownloadItem) -> RecoveryAction {
        match item.transition_unless(&[Status::Paused], Status::Failed) {
            Some(from) => {
                self.cancel_retry(item.id()).await;
                self.status_changed(item.id(), from, Status::Failed);
                RecoveryAction::MarkedFailed
            }
            None => {
                tracing::info!(
                    download_id = %item.id(),
                    "process exit observed while paused, keeping paused"
                );
                RecoveryAction::LeftUnchanged {
                    status: Status::Paused,
                }
            }
        }
    }

    async fn schedule_retry(
        &self,
        item: &Arc<DownloadItem>,
        delay: Duration,
    ) -> Result<RecoveryAction> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let id = item.id();
        let token = self.shutdown.child_token();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        {
            let mut pending = self.pending.lock().await;
            let previous = pending.insert(
                id,
                PendingRetry {
                    generation,
                    token: token.clone(),
                },
            );
            if let Some(previous) = previous {
                previous.token.cancel();
                tracing::debug!(download_id = %id, "replaced pending retry");
            }
        }

        tracing::info!(
            download_id = %id,
            delay_secs = delay.as_secs(),
            "retry scheduled"
        );
        self.event_tx
            .send(Event::RetryScheduled {
                id,
                delay_secs: delay.as_secs(),
            })
            .ok();

        let reactor = self.clone();
        let item = Arc::clone(item);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(download_id = %item.id(), "retry timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    reactor.fire_retry(&item, generation).await;
                }
            }
        });

        Ok(RecoveryAction::RetryScheduled { delay })
    }

    async fn fire_retry(&self, item: &DownloadItem, generation: u64) {
        let id = item.id();
        let mut pending = self.pending.lock().await;

        match pending.get(&id) {
            Some(entry) if entry.generation == generation => {
                pending.remove(&id);
            }
            // Cancelled or replaced between the timer firing and taking the lock
            _ => return,
        }

        match item.transition_unless(&Status::SETTLED, Status::Waiting) {
            Some(from) => {
                self.status_changed(id, from, Status::Waiting);
                tracing::info!(download_id = %id, "retry requested");
                self.event_tx.send(Event::RetryRequested { id }).ok();
            }
            None => {
                tracing::debug!(
                    download_id = %id,
                    status = %item.status(),
                    "item settled before retry fired, dropping retry"
                );
            }
        }
    }

    fn status_changed(&self, id: DownloadId, from: Status, to: Status) {
        if from == to {
            return;
        }
        tracing::info!(download_id = %id, %from, %to, "status changed");
        self.event_tx
            .send(Event::StatusChanged { id, from, to })
            .ok();
    }
}
