//! Failure classification
//!
//! Maps the output an accelerator produced before it exited, plus its exit
//! code, to a single [`FailureRecord`]. Classification is ordered and the
//! first matching rule wins. Textual evidence is checked before the exit
//! code, so a terminated process that also printed a server error is
//! classified by the server error.

use serde::{Deserialize, Serialize};

/// Trait for failures that can be classified as retryable or not
///
/// Transient failures (timeouts, refused connections, rate limiting) should return `true`.
/// Permanent failures (missing file, forbidden, disk full) should return `false`.
pub trait IsRetryable {
    /// Returns true if the failure is transient and the download should be re-queued
    fn is_retryable(&self) -> bool;
}

/// Broad cause of a failed download
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection timed out or was refused
    Network,
    /// Local storage problem (disk full)
    Filesystem,
    /// Save location is not writable
    Permission,
    /// Server answered with an error status
    Server,
    /// Accelerator process was terminated by a signal
    Process,
    /// Nothing recognizable in the output
    Unknown,
}

impl FailureKind {
    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Network => "Network Error",
            FailureKind::Filesystem => "File System Error",
            FailureKind::Permission => "Permission Error",
            FailureKind::Server => "Server Error",
            FailureKind::Process => "Process Error",
            FailureKind::Unknown => "Unknown Error",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified failure
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Failure category
    pub kind: FailureKind,
    /// Human-readable cause
    pub message: String,
    /// Name of the affected download (usually the file name)
    pub source_name: String,
    /// Whether automatic re-queueing is appropriate
    pub retryable: bool,
}

impl FailureRecord {
    /// `"<label>: <message>"`, e.g. `"Server Error: File not found (404)"`
    pub fn formatted_message(&self) -> String {
        format!("{}: {}", self.kind.label(), self.message)
    }

    /// Whether the message reports exhausted disk space
    pub fn indicates_no_space(&self) -> bool {
        self.message.contains(NO_SPACE_MESSAGE)
    }
}

impl IsRetryable for FailureRecord {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

const NO_SPACE_MESSAGE: &str = "No disk space available";

/// Exit codes conventionally produced by SIGKILL (9) and SIGTERM (15)
const TERMINATION_EXIT_CODES: [i32; 2] = [9, 15];

struct TextRule {
    needles: [&'static str; 2],
    kind: FailureKind,
    message: &'static str,
    retryable: bool,
}

/// Text rules in evaluation order. Reordering changes outcomes: output
/// mentioning both "404" and "timeout" must classify as a network failure.
const TEXT_RULES: [TextRule; 6] = [
    TextRule {
        needles: ["timeout", "connection refused"],
        kind: FailureKind::Network,
        message: "Connection timeout or refused",
        retryable: true,
    },
    TextRule {
        needles: ["404", "not found"],
        kind: FailureKind::Server,
        message: "File not found (404)",
        retryable: false,
    },
    TextRule {
        needles: ["403", "forbidden"],
        kind: FailureKind::Server,
        message: "Access forbidden (403)",
        retryable: false,
    },
    TextRule {
        needles: ["429", "too many requests"],
        kind: FailureKind::Server,
        message: "Too many requests (429) - Rate limited",
        retryable: true,
    },
    TextRule {
        needles: ["no space left", "disk full"],
        kind: FailureKind::Filesystem,
        message: NO_SPACE_MESSAGE,
        retryable: false,
    },
    TextRule {
        needles: ["permission denied", "access denied"],
        kind: FailureKind::Permission,
        message: "Permission denied - Check disk access",
        retryable: false,
    },
];

/// Whether `line` carries evidence any classification rule would act on
///
/// Used to decide which output lines are worth keeping for [`classify`].
/// Matching is case-insensitive, like `classify` itself.
pub fn has_failure_evidence(line: &str) -> bool {
    let lower = line.to_lowercase();
    TEXT_RULES
        .iter()
        .flat_map(|rule| rule.needles.iter())
        .any(|needle| lower.contains(needle))
}

/// Classify accelerator output and exit code into a failure record
///
/// Always returns a record; output with no recognizable evidence and an
/// ordinary exit code classifies as a retryable `Unknown` failure.
///
/// # Arguments
///
/// * `output` - Output collected from the accelerator (any case)
/// * `exit_code` - The accelerator's exit code
/// * `source_name` - Name of the affected download
///
/// # Examples
///
/// ```
/// use accel_dl::failure::{FailureKind, classify};
///
/// let record = classify("HTTP/1.1 404 Not Found", 1, "file.iso");
/// assert_eq!(record.kind, FailureKind::Server);
/// assert!(!record.retryable);
/// ```
pub fn classify(output: &str, exit_code: i32, source_name: &str) -> FailureRecord {
    let lower = output.to_lowercase();

    let (kind, message, retryable) = TEXT_RULES
        .iter()
        .find(|rule| rule.needles.iter().any(|needle| lower.contains(needle)))
        .map(|rule| (rule.kind, rule.message, rule.retryable))
        .unwrap_or_else(|| {
            if TERMINATION_EXIT_CODES.contains(&exit_code) {
                (FailureKind::Process, "Process terminated", true)
            } else {
                (FailureKind::Unknown, "Unknown error occurred", true)
            }
        });

    FailureRecord {
        kind,
        message: message.to_string(),
        source_name: source_name.to_string(),
        retryable,
    }
}
