//! Captured accelerator output and pipeline construction

use accel_dl::{
    Config, DownloadId, DownloadItem, Event, OutputMonitor, RecoveryReactor, Status,
    event_channel,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A clean run: size announcement, bar redraws, completion summary
pub const SUCCESSFUL_RUN: &str = "\
Initializing download: https://example.com/file.iso
File size: 1 Megabyte(s) (1048576 bytes)
Opening output file file.iso
Starting download with 4 connections

[ 10%] [..                  ] [ 100.0KB/s] [00:09]\r[ 42%] [........            ] [ 125.5KB/s] [00:05]
[ 99%] [................... ] [ 127.0KB/s] [00:00]
Connection 2 finished
Downloaded 1048576 byte(s) in 8.2 second(s) (127.9 KB/s)
";

/// Output mentioning both a 404 and a timeout
pub const TIMEOUT_AND_404_RUN: &str = "\
Initializing download: https://example.com/file.iso
File size: 1 Megabyte(s) (1048576 bytes)
[ 12%] [..                  ] [ 80.0KB/s] [00:12]
Error: HTTP/1.1 404 Not Found on mirror, connection timeout
";

/// Output of a run that ran out of disk
pub const DISK_FULL_RUN: &str = "\
File size: 8192 Petabyte(s) (9223372036854775807 bytes)
[  1%] [                    ] [ 1.0MB/s] [99:59:59]
Write error: No space left on device
";

/// Everything needed to drive one download end to end
pub struct Pipeline {
    pub item: Arc<DownloadItem>,
    pub monitor: OutputMonitor,
    pub reactor: RecoveryReactor,
    pub events: broadcast::Receiver<Event>,
}

/// Build a pipeline for an item that is already downloading
pub fn pipeline(config: &Config, save_path: &Path) -> Pipeline {
    let (event_tx, events) = event_channel(config);
    let reactor = RecoveryReactor::from_config(config, event_tx.clone());
    let item = Arc::new(DownloadItem::new(DownloadId(7), "file.iso", save_path, 0));
    item.set_status(Status::Downloading);
    let monitor = OutputMonitor::new(item.clone(), event_tx, &config.monitor);

    Pipeline {
        item,
        monitor,
        reactor,
        events,
    }
}
