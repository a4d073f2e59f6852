use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info, warn};

use super::AuditSink;
use crate::error::PersistenceError;
use crate::models::decision::DecisionRecord;

/// Decision log that appends one JSON line per record.
/// Uses `File` directly (OS kernel handles buffering) so every decision is
/// visible in the file as soon as it is made.
///
/// A failed write is reported once with `warn!` and then at debug level until
/// a write succeeds again.
pub struct DecisionLog {
    writer: Mutex<File>,
    failing: AtomicBool,
}

impl DecisionLog {
    /// Open (or create) the decision log in append mode.
    pub fn new(path: &str) -> std::io::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(file),
            failing: AtomicBool::new(false),
        })
    }

    fn write_line(&self, line: &serde_json::Value) {
        let mut f = self.writer.lock();
        match writeln!(f, "{}", line) {
            Ok(()) => {
                if self.failing.swap(false, Ordering::Relaxed) {
                    info!("Decision log writes recovered");
                }
            }
            Err(e) => {
                if self.failing.swap(true, Ordering::Relaxed) {
                    debug!(error = %e, "Decision log write failed");
                } else {
                    warn!(error = %e, "Failed to write decision log; decisions are not being recorded");
                }
            }
        }
    }
}

impl AuditSink for DecisionLog {
    fn record(&self, record: &DecisionRecord) {
        match serde_json::to_value(record) {
            Ok(line) => self.write_line(&line),
            Err(e) => warn!(error = %e, "Failed to serialize decision record"),
        }
    }

    fn persistence_failure(&self, operation: &'static str, error: &PersistenceError) {
        self.write_line(&json!({
            "timestamp": Utc::now(),
            "event": "persistenceFailure",
            "operation": operation,
            "error": error.to_string(),
        }));
    }
}
