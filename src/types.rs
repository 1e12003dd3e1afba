//! Core types for accel-dl

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::failure::FailureRecord;

/// Unique identifier for a download
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(pub i64);

impl DownloadId {
    /// Create a new DownloadId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for DownloadId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<DownloadId> for i64 {
    fn from(id: DownloadId) -> Self {
        id.0
    }
}

impl std::fmt::Display for DownloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DownloadId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Download status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Queued and waiting to (re)start
    Waiting,
    /// Accelerator process is running
    Downloading,
    /// Paused by user
    Paused,
    /// Successfully completed
    Completed,
    /// Failed with error
    Failed,
    /// Stopped by user
    Stopped,
    /// Cancelled by user
    Cancelled,
}

impl Status {
    /// Statuses set by an explicit user action or by successful completion.
    ///
    /// A delayed retry that fires while the item sits in one of these must not
    /// move it back to `Waiting`.
    pub const SETTLED: [Status; 4] = [
        Status::Paused,
        Status::Stopped,
        Status::Cancelled,
        Status::Completed,
    ];

    /// Human-readable name
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Waiting => "Waiting",
            Status::Downloading => "Downloading",
            Status::Paused => "Paused",
            Status::Completed => "Completed",
            Status::Failed => "Failed",
            Status::Stopped => "Stopped",
            Status::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A download as seen by the output monitor and the recovery reactor.
///
/// Owned by the embedding application and shared as `Arc<DownloadItem>`. The
/// status lives behind a lock so that every transition is a single
/// check-then-write under one acquisition; a delayed retry racing a user pause
/// can never overwrite the pause.
#[derive(Debug)]
pub struct DownloadItem {
    id: DownloadId,
    file_name: String,
    save_path: PathBuf,
    file_size: AtomicU64,
    status: Mutex<Status>,
}

impl DownloadItem {
    /// Create a new item in the `Waiting` state
    pub fn new(
        id: DownloadId,
        file_name: impl Into<String>,
        save_path: impl Into<PathBuf>,
        file_size: u64,
    ) -> Self {
        Self {
            id,
            file_name: file_name.into(),
            save_path: save_path.into(),
            file_size: AtomicU64::new(file_size),
            status: Mutex::new(Status::Waiting),
        }
    }

    /// Item identity, used to key retry signals
    pub fn id(&self) -> DownloadId {
        self.id
    }

    /// File name shown to the user
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Directory the accelerator writes into
    pub fn save_path(&self) -> &Path {
        &self.save_path
    }

    /// Announced file size in bytes (0 if unknown)
    pub fn file_size(&self) -> u64 {
        self.file_size.load(Ordering::Relaxed)
    }

    /// Record the file size announced by the accelerator
    pub fn set_file_size(&self, bytes: u64) {
        self.file_size.store(bytes, Ordering::Relaxed);
    }

    /// Current status
    pub fn status(&self) -> Status {
        *self.lock_status()
    }

    /// Unconditionally set the status, returning the previous one
    pub fn set_status(&self, to: Status) -> Status {
        let mut status = self.lock_status();
        std::mem::replace(&mut *status, to)
    }

    /// Set the status only if it currently equals `expected`.
    ///
    /// Returns `true` if the transition was applied.
    pub fn transition_if(&self, expected: Status, to: Status) -> bool {
        let mut status = self.lock_status();
        if *status == expected {
            *status = to;
            true
        } else {
            false
        }
    }

    /// Set the status unless it is currently one of `protected`.
    ///
    /// Returns the previous status if the transition was applied.
    pub fn transition_unless(&self, protected: &[Status], to: Status) -> Option<Status> {
        let mut status = self.lock_status();
        if protected.contains(&*status) {
            None
        } else {
            Some(std::mem::replace(&mut *status, to))
        }
    }

    fn lock_status(&self) -> MutexGuard<'_, Status> {
        // A panic while holding the lock cannot leave a Status half-written
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cumulative progress for one download, as published on the event bus.
///
/// Unlike [`ProgressSnapshot`](crate::output::ProgressSnapshot), which describes
/// a single output line, this carries the file size forward from earlier lines
/// and includes a computed ETA.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// Total size in bytes (0 if not yet announced)
    pub total_bytes: u64,
    /// Downloaded bytes so far
    pub downloaded_bytes: u64,
    /// Fraction complete (0.0 to 1.0)
    pub progress: f64,
    /// Latest reported speed in bytes per second
    pub speed_bps: f64,
    /// Estimated time remaining (`MM:SS`, `HH:MM:SS` or `--:--`)
    pub eta: String,
    /// Parallel connections in use
    pub connections: u32,
}

/// Event emitted while monitoring and recovering downloads
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Progress update parsed from accelerator output
    Progress {
        /// Download ID
        id: DownloadId,
        /// Cumulative progress
        progress: DownloadProgress,
    },

    /// The accelerator reported a finished transfer
    Completed {
        /// Download ID
        id: DownloadId,
    },

    /// A failure was classified and handed to the recovery reactor
    FailureDetected {
        /// Download ID
        id: DownloadId,
        /// Classified failure
        failure: FailureRecord,
    },

    /// The download's status changed
    StatusChanged {
        /// Download ID
        id: DownloadId,
        /// Previous status
        from: Status,
        /// New status
        to: Status,
    },

    /// A delayed retry was scheduled
    RetryScheduled {
        /// Download ID
        id: DownloadId,
        /// Delay before the retry fires, in seconds
        delay_secs: u64,
    },

    /// The item was moved to `Waiting` and should be restarted
    RetryRequested {
        /// Download ID
        id: DownloadId,
    },

    /// A pending retry was cancelled before it fired
    RetryCancelled {
        /// Download ID
        id: DownloadId,
    },

    /// Not enough free space at the save path
    InsufficientDiskSpace {
        /// Download ID
        id: DownloadId,
        /// Bytes required (file size plus safety margin)
        required: u64,
        /// Bytes available
        available: u64,
    },

    /// The accelerator could not write to the save path
    DiskAccessRequired {
        /// Download ID
        id: DownloadId,
        /// Path that needs access
        path: PathBuf,
    },
}
