//! Password redaction for connection logging
//!
//! Dialing a backend logs the connection parameters at debug level. The
//! password field is suppressed by default; operators debugging credential
//! problems can disable the filter at runtime with [`secure_logging`].

use std::sync::atomic::{AtomicBool, Ordering};

/// Redaction policy for password-bearing log lines.
///
/// One instance exists per process (see [`log_policy`]); it is the only
/// process-wide shared state in the crate apart from the test-mode flag.
#[derive(Debug)]
pub struct LogPolicy {
    redact: AtomicBool,
}

const REDACTED: &str = "<redacted>";

impl LogPolicy {
    const fn new() -> Self {
        Self {
            redact: AtomicBool::new(true),
        }
    }

    /// Enable or disable password redaction. Idempotent.
    pub fn secure_logging(&self, enabled: bool) {
        self.redact.store(enabled, Ordering::Relaxed);
    }

    /// Whether passwords are currently redacted.
    pub fn redacting(&self) -> bool {
        self.redact.load(Ordering::Relaxed)
    }

    /// The form of `password` that may appear in a log line.
    pub(crate) fn password_display<'a>(&self, password: &'a str) -> &'a str {
        if self.redacting() {
            REDACTED
        } else {
            password
        }
    }
}

static LOG_POLICY: LogPolicy = LogPolicy::new();

/// The process-wide redaction policy.
pub fn log_policy() -> &'static LogPolicy {
    &LOG_POLICY
}

/// Enable or disable password redaction in debug logs.
///
/// Redaction is on by default.
pub fn secure_logging(enabled: bool) {
    log_policy().secure_logging(enabled);
}
