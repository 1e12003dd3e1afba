//! Line routing predicates
//!
//! These are substring tests only. They tell a caller which lines are worth a
//! full [`parse`](super::parse) and which should be kept for failure
//! classification. They are not mutually exclusive.

/// Keywords that mark a line as an error report (matched case-insensitively)
pub const ERROR_KEYWORDS: [&str; 6] = [
    "error",
    "failed",
    "timeout",
    "connection refused",
    "not found",
    "forbidden",
];

/// Returns `true` if the line looks like a progress bar redraw
pub fn is_progress_line(line: &str) -> bool {
    let line = line.trim();
    line.contains('[') && line.contains('%') && line.contains(']')
}

/// Returns `true` if the line looks like the final transfer summary.
///
/// Looser than the completion rule in [`parse`](super::parse), which also
/// requires `"in"` and `"second(s)"` before it reports a finished transfer.
pub fn is_completion_line(line: &str) -> bool {
    let line = line.trim();
    line.contains("Downloaded") && line.contains("byte(s)")
}

/// Returns `true` if the line mentions any of [`ERROR_KEYWORDS`]
pub fn is_error_line(line: &str) -> bool {
    let lower = line.trim().to_lowercase();
    ERROR_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}
