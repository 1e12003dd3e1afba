//! Accelerator output parsing
//!
//! The accelerator writes free-form text: a size announcement, a redrawn
//! progress bar, connection chatter and a final summary. This module turns one
//! line of that text into a structured [`ProgressSnapshot`], and offers cheap
//! predicates for routing lines before parsing them.
//!
//! ## Usage
//!
//! ```
//! use accel_dl::output::{self, ProgressSnapshot};
//!
//! let line = "[ 42%] [..........] [ 125.5KB/s] [00:05]";
//! assert!(output::is_progress_line(line));
//!
//! let snapshot: ProgressSnapshot = output::parse(line);
//! assert_eq!(snapshot.progress, 0.42);
//! assert_eq!(snapshot.speed_bytes_per_sec, 125.5 * 1024.0);
//! ```
//!
//! Every call is independent. A file size announced on one line is not
//! remembered for the next; [`OutputMonitor`](crate::monitor::OutputMonitor)
//! carries it forward.

mod lines;
mod parser;

pub use lines::{ERROR_KEYWORDS, is_completion_line, is_error_line, is_progress_line};
pub use parser::{
    ProgressSnapshot, UNKNOWN_ETA, connection_count, normalize_rate, parse, parse_rate,
};
