//! Parser for accelerator output lines

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// ETA placeholder; the parser never computes a remaining time itself
pub const UNKNOWN_ETA: &str = "--:--";

// Patterns are literals, so compilation cannot fail in practice. A `None`
// simply means "no match", which keeps the parser total.
static FILE_SIZE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\((\d+)\s*bytes?\)").ok());
static PERCENT: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\[\s*(\d+)%\]").ok());
static BAR_SPEED: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[\s*([\d.]+[KMG]?B/s)\s*\]").ok());
static FINAL_SPEED: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\(([\d.]+\s*[KMG]?B/s)\)").ok());
static CONNECTIONS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*connection").ok());

/// One parsed observation of accelerator output.
///
/// Produced fresh for every line; it carries no state from earlier lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Announced file size in bytes (0 if this line did not announce it)
    pub total_bytes: u64,
    /// Bytes downloaded, derived from `total_bytes` and `progress`
    pub downloaded_bytes: u64,
    /// Fraction complete (0.0 to 1.0)
    pub progress: f64,
    /// Transfer rate in bytes per second
    pub speed_bytes_per_sec: f64,
    /// Always [`UNKNOWN_ETA`]
    pub eta: String,
    /// Parallel connection count (at least 1)
    pub connections: u32,
    /// Set only by an explicit completion summary, never by a 100% bar
    pub is_complete: bool,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            total_bytes: 0,
            downloaded_bytes: 0,
            progress: 0.0,
            speed_bytes_per_sec: 0.0,
            eta: UNKNOWN_ETA.to_string(),
            connections: 1,
            is_complete: false,
        }
    }
}

/// Parse one line of accelerator output
///
/// Never fails: anything that cannot be extracted keeps its default value
/// (0 bytes, 0 progress, 0 speed, 1 connection, not complete).
///
/// # Arguments
///
/// * `line` - A single output line; surrounding whitespace is ignored
///
/// # Returns
///
/// A `ProgressSnapshot` describing only what this line reports
///
/// # Examples
///
/// ```
/// use accel_dl::output::parse;
///
/// let done = parse("Downloaded 1048576 byte(s) in 8.2 second(s) (127.9 KB/s)");
/// assert!(done.is_complete);
/// assert_eq!(done.progress, 1.0);
///
/// // A full bar is not a finished transfer
/// assert!(!parse("[100%] [..........] [ 1.2MB/s]").is_complete);
/// ```
pub fn parse(line: &str) -> ProgressSnapshot {
    let line = line.trim();
    let mut snapshot = ProgressSnapshot::default();

    if line.contains("File size:")
        && let Some(bytes) = capture(&FILE_SIZE, line).and_then(|s| s.parse::<u64>().ok())
    {
        snapshot.total_bytes = bytes;
    }

    if line.contains('[') && line.contains(']') && line.contains('%') {
        if let Some(percent) = capture(&PERCENT, line).and_then(|s| s.parse::<u32>().ok()) {
            snapshot.progress = (f64::from(percent) / 100.0).min(1.0);
            snapshot.downloaded_bytes = fraction_of(snapshot.total_bytes, snapshot.progress);
        }

        if let Some(token) = capture(&BAR_SPEED, line) {
            snapshot.speed_bytes_per_sec = parse_rate(token);
        }
    }

    if is_completion_summary(line) {
        snapshot.is_complete = true;
        snapshot.progress = 1.0;
        snapshot.downloaded_bytes = snapshot.total_bytes;

        if let Some(token) = capture(&FINAL_SPEED, line) {
            snapshot.speed_bytes_per_sec = parse_rate(token);
        }
    }

    if let Some(count) = connection_count(line) {
        snapshot.connections = count;
    }

    tracing::trace!(line = %line, ?snapshot, "parsed accelerator output");
    snapshot
}

/// Connection count stated explicitly on this line, if any
///
/// Unlike [`ProgressSnapshot::connections`], which defaults to 1, this tells
/// "the line says 1 connection" apart from "the line says nothing".
///
/// ```
/// use accel_dl::output::connection_count;
///
/// assert_eq!(connection_count("Starting download with 4 connections"), Some(4));
/// assert_eq!(connection_count("Using 1 connection"), Some(1));
/// assert_eq!(connection_count("connection refused"), None);
/// ```
pub fn connection_count(line: &str) -> Option<u32> {
    if !line.contains("connection") {
        return None;
    }
    capture(&CONNECTIONS, line)
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|&n| n > 0)
}

/// Parse a rate token such as `"125.5KB/s"` or `"127.9 KB/s"` into bytes per second
///
/// The token is split into a numeric prefix and a unit suffix, which are
/// passed to [`normalize_rate`].
pub fn parse_rate(token: &str) -> f64 {
    let token = token.trim();
    let split = token
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(token.len());
    let (value, unit) = token.split_at(split);
    normalize_rate(value, unit.trim())
}

/// Convert a numeric value and a rate unit into bytes per second
///
/// Scaling is binary: `KB/s` is 1024 bytes per second, `MB/s` is 1024², `GB/s`
/// is 1024³. Units are matched case-insensitively, and the `bps`, `kbps`,
/// `mbps`, `gbps` spellings map to the same factors. An unrecognized unit
/// leaves the value unscaled; a malformed or negative number yields 0.
///
/// # Examples
///
/// ```
/// use accel_dl::output::normalize_rate;
///
/// assert_eq!(normalize_rate("1.5", "MB/s"), 1.5 * 1024.0 * 1024.0);
/// assert_eq!(normalize_rate("500", "KB/s"), 500.0 * 1024.0);
/// assert_eq!(normalize_rate("42", "XB/s"), 42.0);
/// assert_eq!(normalize_rate("1.2.3", "KB/s"), 0.0);
/// ```
pub fn normalize_rate(value: &str, unit: &str) -> f64 {
    let value = match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => v,
        _ => return 0.0,
    };

    let factor = match unit.trim().to_lowercase().as_str() {
        "b/s" | "bps" => 1.0,
        "kb/s" | "kbps" => 1024.0,
        "mb/s" | "mbps" => 1024.0 * 1024.0,
        "gb/s" | "gbps" => 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    };

    value * factor
}

/// The strict completion signature: all four substrings must be present
fn is_completion_summary(line: &str) -> bool {
    line.contains("Downloaded")
        && line.contains("byte(s)")
        && line.contains("in")
        && line.contains("second(s)")
}

/// `floor(total * fraction)`, saturating at `total`
fn fraction_of(total: u64, fraction: f64) -> u64 {
    // Float-to-int casts truncate toward zero, which is floor for non-negatives
    ((total as f64 * fraction) as u64).min(total)
}

/// Capture group 1 of the first match
fn capture<'a>(pattern: &LazyLock<Option<Regex>>, text: &'a str) -> Option<&'a str> {
    let regex = pattern.as_ref()?;
    regex
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
