//! Per-download output monitoring
//!
//! [`OutputMonitor`] is the consumer of an accelerator's combined output
//! stream. It feeds each line through the [`output`](crate::output) parser,
//! carries the announced file size forward (the parser forgets it between
//! lines), publishes cumulative [`DownloadProgress`] on the event bus, keeps the
//! trailing error lines, and hands a classified failure to the
//! [`RecoveryReactor`] when the process exits unsuccessfully.

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::failure::{FailureRecord, classify, has_failure_evidence};
use crate::output::{self, ProgressSnapshot};
use crate::recovery::RecoveryReactor;
use crate::types::{DownloadItem, DownloadProgress, Event, Status};
use crate::utils::estimate_eta;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast;

/// ETA reported once the accelerator has confirmed completion
const FINISHED_ETA: &str = "00:00";

/// Longest unterminated segment buffered before it is processed anyway
const MAX_SEGMENT_BYTES: usize = 64 * 1024;

/// Tracks one accelerator process's output for one download
pub struct OutputMonitor {
    item: Arc<DownloadItem>,
    event_tx: broadcast::Sender<Event>,
    total_bytes: u64,
    downloaded_bytes: u64,
    progress: f64,
    speed_bps: f64,
    connections: u32,
    completed: bool,
    error_tail: VecDeque<String>,
    error_tail_lines: usize,
}

impl OutputMonitor {
    /// Create a monitor for `item`, publishing on `event_tx`
    ///
    /// A file size already known on the item is used until the accelerator
    /// announces one.
    pub fn new(
        item: Arc<DownloadItem>,
        event_tx: broadcast::Sender<Event>,
        config: &MonitorConfig,
    ) -> Self {
        let total_bytes = item.file_size();
        Self {
            item,
            event_tx,
            total_bytes,
            downloaded_bytes: 0,
            progress: 0.0,
            speed_bps: 0.0,
            connections: 1,
            completed: false,
            error_tail: VecDeque::with_capacity(config.error_tail_lines),
            error_tail_lines: config.error_tail_lines.max(1),
        }
    }

    /// The monitored item
    pub fn item(&self) -> &Arc<DownloadItem> {
        &self.item
    }

    /// Whether the accelerator reported a finished transfer
    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Retained error lines, oldest first, joined by newlines
    pub fn error_output(&self) -> String {
        self.error_tail
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Cumulative progress across all lines seen so far
    pub fn progress(&self) -> DownloadProgress {
        let eta = if self.completed {
            FINISHED_ETA.to_string()
        } else {
            estimate_eta(self.total_bytes, self.downloaded_bytes, self.speed_bps)
        };

        DownloadProgress {
            total_bytes: self.total_bytes,
            downloaded_bytes: self.downloaded_bytes,
            progress: self.progress,
            speed_bps: self.speed_bps,
            eta,
            connections: self.connections,
        }
    }

    /// Feed one line of output
    ///
    /// Returns the line's own snapshot, or `None` for a blank line.
    pub fn process_line(&mut self, line: &str) -> Option<ProgressSnapshot> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let snapshot = output::parse(line);
        let mut changed = false;

        // Bars and size announcements carry digits such as "403.2KB/s" or
        // "(14290000 bytes)" that would read as status codes
        if !output::is_progress_line(line)
            && snapshot.total_bytes == 0
            && (output::is_error_line(line) || has_failure_evidence(line))
        {
            tracing::debug!(download_id = %self.item.id(), line, "accelerator reported an error");
            self.push_error_line(line);
        }

        if snapshot.total_bytes > 0 {
            self.total_bytes = snapshot.total_bytes;
            self.item.set_file_size(snapshot.total_bytes);
            changed = true;
        }

        if snapshot.progress > 0.0 && !snapshot.is_complete {
            self.progress = snapshot.progress;
            self.downloaded_bytes = (self.total_bytes as f64 * snapshot.progress) as u64;
            changed = true;
        }

        if snapshot.speed_bytes_per_sec > 0.0 {
            self.speed_bps = snapshot.speed_bytes_per_sec;
            changed = true;
        }

        if let Some(count) = output::connection_count(line) {
            self.connections = count;
        }

        if snapshot.is_complete {
            self.complete();
            changed = true;
        }

        if changed {
            self.event_tx
                .send(Event::Progress {
                    id: self.item.id(),
                    progress: self.progress(),
                })
                .ok();
        }

        Some(snapshot)
    }

    /// Record raw error output (for example the process's stderr)
    ///
    /// Every non-blank line is retained for classification, whether or not
    /// it contains an error keyword.
    pub fn record_error_output(&mut self, text: &str) {
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            self.push_error_line(line);
        }
    }

    /// Consume an output stream until EOF
    ///
    /// Carriage returns split lines as well as newlines, since the
    /// accelerator redraws its progress bar in place. Each segment is
    /// processed as soon as its terminator arrives, so redraws publish
    /// progress without waiting for a newline. Invalid UTF-8 is replaced
    /// rather than rejected.
    pub async fn run<R>(&mut self, mut reader: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut pending: Vec<u8> = Vec::new();
        loop {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                break;
            }
            let len = chunk.len();
            pending.extend_from_slice(chunk);
            reader.consume(len);

            let mut start = 0;
            while let Some(offset) = pending[start..]
                .iter()
                .position(|&b| b == b'\r' || b == b'\n')
            {
                let end = start + offset;
                self.process_segment(&pending[start..end]);
                start = end + 1;
            }
            pending.drain(..start);

            if pending.len() > MAX_SEGMENT_BYTES {
                tracing::debug!(
                    download_id = %self.item.id(),
                    bytes = pending.len(),
                    "flushing oversized unterminated segment"
                );
                self.process_segment(&pending);
                pending.clear();
            }
        }

        if !pending.is_empty() {
            self.process_segment(&pending);
        }
        tracing::debug!(
            download_id = %self.item.id(),
            complete = self.completed,
            "accelerator output closed"
        );
        Ok(())
    }

    /// Report the process exit and trigger recovery if it failed
    ///
    /// A zero exit code or a confirmed completion means there is nothing to
    /// recover. Otherwise the retained error output and the exit code are
    /// classified and handed to `reactor`.
    pub async fn finish(
        &mut self,
        exit_code: i32,
        reactor: &RecoveryReactor,
    ) -> Result<Option<FailureRecord>> {
        if self.completed || exit_code == 0 {
            return Ok(None);
        }

        let record = classify(&self.error_output(), exit_code, self.item.file_name());
        reactor.handle(&record, &self.item).await?;
        Ok(Some(record))
    }

    fn complete(&mut self) {
        self.completed = true;
        self.progress = 1.0;
        self.downloaded_bytes = self.total_bytes;

        let id = self.item.id();
        if self
            .item
            .transition_if(Status::Downloading, Status::Completed)
        {
            tracing::info!(download_id = %id, file = self.item.file_name(), "download completed");
            self.event_tx
                .send(Event::StatusChanged {
                    id,
                    from: Status::Downloading,
                    to: Status::Completed,
                })
                .ok();
            self.event_tx.send(Event::Completed { id }).ok();
        } else {
            tracing::warn!(
                download_id = %id,
                status = %self.item.status(),
                "ignoring completion, download is not active"
            );
        }
    }

    fn process_segment(&mut self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        self.process_line(&text);
    }

    fn push_error_line(&mut self, line: &str) {
        if self.error_tail.len() == self.error_tail_lines {
            self.error_tail.pop_front();
        }
        self.error_tail.push_back(line.to_string());
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecoveryConfig;
    use crate::failure::FailureKind;
    use crate::recovery::NoOpRemediation;
    use crate::types::DownloadId;
    use std::time::Duration;
    use tokio::io::BufReader;

    struct Fixture {
        monitor: OutputMonitor,
        reactor: RecoveryReactor,
        events: broadcast::Receiver<Event>,
    }

    fn fixture(tail_lines: usize) -> Fixture {
        let (event_tx, events) = broadcast::channel(100);
        let item = Arc::new(DownloadItem::new(DownloadId(1), "file.iso", "/tmp", 0));
        item.set_status(Status::Downloading);
        let config = MonitorConfig {
            error_tail_lines: tail_lines,
            ..Default::default()
        };
        let monitor = OutputMonitor::new(item, event_tx.clone(), &config);
        let reactor = RecoveryReactor::new(
            RecoveryConfig::default(),
            event_tx,
            Arc::new(NoOpRemediation),
        );
        Fixture {
            monitor,
            reactor,
            events,
        }
    }

    fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
        let mut collected = Vec::new();
        while let Ok(event) = events.try_recv() {
            collected.push(event);
        }
        collected
    }

    #[test]
    fn total_is_carried_forward_to_progress_lines() {
        let Fixture { mut monitor, .. } = fixture(10);

        let first = monitor
            .process_line("File size: 1 Megabyte(s) (1048576 bytes)")
            .unwrap();
        assert_eq!(first.total_bytes, 1_048_576);

        let second = monitor
            .process_line("[ 42%] [....................          ] [ 125.5KB/s] [00:05]")
            .unwrap();
        // The line itself knows nothing about the size
        assert_eq!(second.total_bytes, 0);
        assert_eq!(second.progress, 0.42);

        let progress = monitor.progress();
        assert_eq!(progress.total_bytes, 1_048_576);
        assert_eq!(progress.downloaded_bytes, 440_401);
        assert_eq!(progress.speed_bps, 128_512.0);
        // (1048576 - 440401) / 128512 = 4.73s
        assert_eq!(progress.eta, "00:04");
        assert_eq!(monitor.item().file_size(), 1_048_576);
    }

    #[test]
    fn known_item_size_is_used_before_announcement() {
        let (event_tx, _events) = broadcast::channel(10);
        let item = Arc::new(DownloadItem::new(DownloadId(1), "f", "/tmp", 1000));
        let mut monitor = OutputMonitor::new(item, event_tx, &MonitorConfig::default());

        monitor.process_line("[ 50%]");
        assert_eq!(monitor.progress().downloaded_bytes, 500);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let Fixture {
            mut monitor,
            mut events,
            ..
        } = fixture(10);
        assert!(monitor.process_line("   ").is_none());
        assert!(drain(&mut events).is_empty());
    }

    #[test]
    fn progress_events_are_published() {
        let Fixture {
            mut monitor,
            mut events,
            ..
        } = fixture(10);
        monitor.process_line("File size: (2048 bytes)");
        monitor.process_line("Initializing download: http://example.com/file.iso");
        monitor.process_line("[ 50%] [ 1KB/s]");

        let events = drain(&mut events);
        assert_eq!(events.len(), 2, "chatter line must not publish: {events:?}");
        match &events[1] {
            Event::Progress { id, progress } => {
                assert_eq!(*id, DownloadId(1));
                assert_eq!(progress.downloaded_bytes, 1024);
                assert_eq!(progress.eta, "00:01");
            }
            other => panic!("expected progress event, got {other:?}"),
        }
    }

    #[test]
    fn connection_count_is_remembered() {
        let Fixture { mut monitor, .. } = fixture(10);
        monitor.process_line("Starting download with 4 connections");
        monitor.process_line("[ 10%]");
        assert_eq!(monitor.progress().connections, 4);
    }

    #[test]
    fn connection_count_can_drop_back_to_one() {
        let Fixture { mut monitor, .. } = fixture(10);
        monitor.process_line("Starting download with 4 connections");
        monitor.process_line("connection refused");
        assert_eq!(monitor.progress().connections, 4);

        monitor.process_line("Continuing with 1 connection");
        assert_eq!(monitor.progress().connections, 1);
    }

    #[test]
    fn completion_marks_item_completed() {
        let Fixture {
            mut monitor,
            mut events,
            ..
        } = fixture(10);
        monitor.process_line("File size: (1048576 bytes)");
        monitor.process_line("[ 99%] [ 1.2MB/s]");
        monitor.process_line("Downloaded 1048576 byte(s) in 8.2 second(s) (127.9 KB/s)");

        assert!(monitor.is_complete());
        assert_eq!(monitor.item().status(), Status::Completed);
        let progress = monitor.progress();
        assert_eq!(progress.progress, 1.0);
        assert_eq!(progress.downloaded_bytes, 1_048_576);
        assert_eq!(progress.eta, "00:00");

        let events = drain(&mut events);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, Event::Completed { id } if *id == DownloadId(1)))
        );
    }

    #[test]
    fn full_bar_alone_does_not_complete() {
        let Fixture { mut monitor, .. } = fixture(10);
        monitor.process_line("[100%] [..........] [ 1.2MB/s]");

        assert!(!monitor.is_complete());
        assert_eq!(monitor.item().status(), Status::Downloading);
        assert_eq!(monitor.progress().progress, 1.0);
    }

    #[test]
    fn completion_is_ignored_while_paused() {
        let Fixture {
            mut monitor,
            mut events,
            ..
        } = fixture(10);
        monitor.item().set_status(Status::Paused);

        monitor.process_line("Downloaded 10 byte(s) in 1 second(s)");

        assert_eq!(monitor.item().status(), Status::Paused);
        assert!(
            !drain(&mut events)
                .iter()
                .any(|e| matches!(e, Event::Completed { .. }))
        );
    }

    #[test]
    fn error_tail_is_bounded() {
        let Fixture { mut monitor, .. } = fixture(2);
        monitor.process_line("error one");
        monitor.process_line("[ 10%]");
        monitor.process_line("error two");
        monitor.process_line("error three");

        assert_eq!(monitor.error_output(), "error two\nerror three");
    }

    #[test]
    fn recorded_error_output_keeps_every_line() {
        let Fixture { mut monitor, .. } = fixture(10);
        monitor.record_error_output("HTTP/1.1 503 Service Unavailable\n\n  retrying  \n");
        assert_eq!(
            monitor.error_output(),
            "HTTP/1.1 503 Service Unavailable\nretrying"
        );
    }

    #[tokio::test]
    async fn run_splits_carriage_return_redraws() {
        let Fixture { mut monitor, .. } = fixture(10);
        let stream = tokio_test::io::Builder::new()
            .read(b"File size: 1 Megabyte(s) (1048576 bytes)\n")
            .read(b"[ 10%] [ 100KB/s]\r[ 20%] [ 200KB/s]\r")
            .read(b"[ 30%] [ 300KB/s]\n")
            .build();

        monitor.run(BufReader::new(stream)).await.unwrap();

        let progress = monitor.progress();
        assert_eq!(progress.progress, 0.3);
        assert_eq!(progress.speed_bps, 300.0 * 1024.0);
    }

    #[tokio::test]
    async fn run_publishes_redraws_before_any_newline() {
        use tokio::io::AsyncWriteExt;

        let Fixture {
            mut monitor,
            mut events,
            ..
        } = fixture(10);
        let (mut writer, reader) = tokio::io::duplex(1024);
        let task = tokio::spawn(async move {
            monitor.run(BufReader::new(reader)).await.unwrap();
            monitor
        });

        writer
            .write_all(b"[ 10%] [..   ] [ 100KB/s]\r[ 42%] [.... ] [ 125.5KB/s]\r")
            .await
            .unwrap();

        // The stream stays open and no newline has been written
        let seen = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(Event::Progress { progress, .. }) = events.recv().await
                    && progress.progress == 0.42
                {
                    return progress;
                }
            }
        })
        .await
        .expect("redraw published while the stream is open");
        assert_eq!(seen.speed_bps, 128_512.0);

        writer.write_all(b"[ 50%]").await.unwrap();
        drop(writer);
        let monitor = task.await.unwrap();
        // The unterminated tail is processed at EOF
        assert_eq!(monitor.progress().progress, 0.5);
    }

    #[tokio::test]
    async fn run_tolerates_invalid_utf8() {
        let Fixture { mut monitor, .. } = fixture(10);
        let stream = tokio_test::io::Builder::new()
            .read(b"\xff\xfe garbage\n[ 25%]\n")
            .build();

        monitor.run(BufReader::new(stream)).await.unwrap();
        assert_eq!(monitor.progress().progress, 0.25);
    }

    #[tokio::test]
    async fn finish_with_success_exit_does_nothing() {
        let Fixture {
            mut monitor,
            reactor,
            ..
        } = fixture(10);
        monitor.process_line("connection refused");

        assert!(monitor.finish(0, &reactor).await.unwrap().is_none());
        assert_eq!(monitor.item().status(), Status::Downloading);
    }

    #[tokio::test]
    async fn finish_after_completion_does_nothing() {
        let Fixture {
            mut monitor,
            reactor,
            ..
        } = fixture(10);
        monitor.process_line("Downloaded 10 byte(s) in 1 second(s)");

        assert!(monitor.finish(1, &reactor).await.unwrap().is_none());
        assert_eq!(monitor.item().status(), Status::Completed);
    }

    #[tokio::test]
    async fn finish_classifies_retained_errors() {
        let Fixture {
            mut monitor,
            reactor,
            ..
        } = fixture(10);
        monitor.process_line("HTTP/1.1 404 Not Found");

        let record = monitor.finish(1, &reactor).await.unwrap().unwrap();

        assert_eq!(record.kind, FailureKind::Server);
        assert!(!record.retryable);
        assert_eq!(record.source_name, "file.iso");
        assert_eq!(monitor.item().status(), Status::Failed);
    }

    #[tokio::test]
    async fn finish_classifies_evidence_without_error_keywords() {
        let cases = [
            ("HTTP/1.1 429 Too Many Requests", FailureKind::Server, true),
            ("Too many requests", FailureKind::Server, true),
            ("No space left on device", FailureKind::Filesystem, false),
            ("Disk full", FailureKind::Filesystem, false),
            (
                "Unable to open file.iso: Permission denied",
                FailureKind::Permission,
                false,
            ),
            ("Access denied", FailureKind::Permission, false),
        ];

        for (line, kind, retryable) in cases {
            assert!(!output::is_error_line(line), "{line}");
            let Fixture {
                mut monitor,
                reactor,
                ..
            } = fixture(10);
            monitor.process_line(line);

            let record = monitor.finish(1, &reactor).await.unwrap().unwrap();

            assert_eq!(record.kind, kind, "{line}");
            assert_eq!(record.retryable, retryable, "{line}");
            reactor.shutdown().await;
        }
    }

    #[tokio::test]
    async fn permission_line_requests_disk_access() {
        let Fixture {
            mut monitor,
            reactor: quiet,
            mut events,
        } = fixture(10);
        // NoOpRemediation publishes nothing
        let reactor =
            RecoveryReactor::from_config(&crate::config::Config::default(), quiet.event_sender());
        monitor.process_line("Unable to open file.iso: Permission denied");

        monitor.finish(1, &reactor).await.unwrap();

        assert_eq!(monitor.item().status(), Status::Failed);
        assert!(
            drain(&mut events)
                .iter()
                .any(|e| matches!(e, Event::DiskAccessRequired { .. }))
        );
        assert_eq!(reactor.pending_retries().await, 0);
    }

    #[tokio::test]
    async fn status_like_digits_in_bars_are_not_evidence() {
        let Fixture {
            mut monitor,
            reactor,
            ..
        } = fixture(10);
        monitor.process_line("File size: 13 Megabyte(s) (14290000 bytes)");
        monitor.process_line("[ 40%] [........   ] [ 403.2KB/s] [00:20]");

        assert_eq!(monitor.error_output(), "");
        let record = monitor.finish(1, &reactor).await.unwrap().unwrap();
        assert_eq!(record.kind, FailureKind::Unknown);
        reactor.shutdown().await;
    }

    #[tokio::test]
    async fn finish_on_signal_keeps_paused_item() {
        let Fixture {
            mut monitor,
            reactor,
            ..
        } = fixture(10);
        monitor.item().set_status(Status::Paused);

        let record = monitor.finish(15, &reactor).await.unwrap().unwrap();

        assert_eq!(record.kind, FailureKind::Process);
        assert_eq!(monitor.item().status(), Status::Paused);
    }
}
