//! Audit trail of sync attempts.
//!
//! The dispatcher hands every call, successful or not, to an [`AuditSink`]
//! exactly once. The file sink writes one line per record:
//!
//! ```text
//! 2024-05-01 12:00:00 - INFO - SYNC FAILED - IP: 10.0.0.7 - User: bob - Operation: authentication - Error: Invalid credentials
//! ```

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Outcome of an audited attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    /// The operation succeeded.
    Success,
    /// The operation failed.
    Failed,
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditStatus::Success => f.write_str("SUCCESS"),
            AuditStatus::Failed => f.write_str("FAILED"),
        }
    }
}

/// One audited attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    /// When the attempt finished.
    pub timestamp: DateTime<Local>,
    /// Success or failure.
    pub status: AuditStatus,
    /// Caller address as reported by the transport.
    pub client_addr: String,
    /// Username from the call (may be unauthenticated).
    pub username: String,
    /// Operation label, e.g. `get_file_content (RR)`.
    pub operation: String,
    /// Failure text.
    pub error: Option<String>,
}

impl AuditRecord {
    /// Creates a record stamped with the current local time.
    pub fn new(
        status: AuditStatus,
        client_addr: &str,
        username: &str,
        operation: &str,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: Local::now(),
            status,
            client_addr: client_addr.to_string(),
            username: username.to_string(),
            operation: operation.to_string(),
            error,
        }
    }

    /// Formats the record as a single log line, without a newline.
    ///
    /// Control characters in caller-supplied fields are escaped, so a
    /// record always occupies exactly one line.
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "{} - INFO - SYNC {} - IP: {} - User: {} - Operation: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.status,
            escape_field(&self.client_addr),
            escape_field(&self.username),
            escape_field(&self.operation)
        );
        if let Some(error) = &self.error {
            line.push_str(" - Error: ");
            line.push_str(&escape_field(error));
        }
        line
    }
}

fn escape_field(field: &str) -> Cow<'_, str> {
    if !field.chars().any(char::is_control) {
        return Cow::Borrowed(field);
    }
    let mut escaped = String::with_capacity(field.len() + 8);
    for c in field.chars() {
        if c.is_control() {
            escaped.extend(c.escape_default());
        } else {
            escaped.push(c);
        }
    }
    Cow::Owned(escaped)
}

/// Receiver of audit records.
///
/// Implementations must serialize concurrent writers so that records never
/// interleave.
pub trait AuditSink: Send + Sync {
    /// Records one attempt.
    fn record(&self, record: &AuditRecord);
}

/// Append-only text file sink.
#[derive(Debug)]
pub struct FileAuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileAuditLog {
    /// Opens the log for appending, creating it and its parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or opened.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Returns the log path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditLog {
    fn record(&self, record: &AuditRecord) {
        let line = record.to_line();
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
            // The audit trail must not take a request down with it.
            tracing::error!("Failed to write audit record to {}: {}", self.path.display(), e);
        }
    }
}

/// In-memory sink, mostly for tests.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all records so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Returns the most recent record.
    pub fn last(&self) -> Option<AuditRecord> {
        self.records.lock().last().cloned()
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&self, record: &AuditRecord) {
        self.records.lock().push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn line_format_success() {
        let record = AuditRecord::new(
            AuditStatus::Success,
            "127.0.0.1",
            "alice",
            "check_master_version",
            None,
        );
        let line = record.to_line();
        assert!(line.ends_with(
            " - INFO - SYNC SUCCESS - IP: 127.0.0.1 - User: alice - Operation: check_master_version"
        ));
        // "YYYY-MM-DD HH:MM:SS" prefix
        assert_eq!(line.find(" - INFO"), Some(19));
    }

    #[test]
    fn line_format_failure_carries_error() {
        let record = AuditRecord::new(
            AuditStatus::Failed,
            "10.0.0.7",
            "bob",
            "authentication",
            Some("Invalid credentials".into()),
        );
        assert!(record
            .to_line()
            .ends_with("SYNC FAILED - IP: 10.0.0.7 - User: bob - Operation: authentication - Error: Invalid credentials"));
    }

    #[test]
    fn control_characters_cannot_split_a_record() {
        let record = AuditRecord::new(
            AuditStatus::Failed,
            "10.0.0.7\r",
            "mallory\n2026-01-01 00:00:00 - INFO - SYNC SUCCESS - User: admin",
            "nope\nforged line",
            Some("bad\u{1b}[2J".into()),
        );
        let line = record.to_line();
        assert!(!line.contains('\n'));
        assert!(!line.contains('\r'));
        assert!(!line.chars().any(char::is_control));
        assert!(line.contains("IP: 10.0.0.7\\r - User: mallory\\n2026-01-01"));
        assert!(line.contains("Operation: nope\\nforged line"));
        assert!(line.ends_with("Error: bad\\u{1b}[2J"));
    }

    #[test]
    fn plain_fields_are_written_verbatim() {
        assert!(matches!(escape_field("alice"), Cow::Borrowed("alice")));
        assert_eq!(escape_field("tab\there"), "tab\\there");
    }

    #[test]
    fn file_log_appends_whole_lines_concurrently() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("sync.log");
        let log = Arc::new(FileAuditLog::open(&path).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        log.record(&AuditRecord::new(
                            AuditStatus::Success,
                            "127.0.0.1",
                            &format!("user{}", t),
                            &format!("op{}", i),
                            None,
                        ));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 200);
        assert!(lines.iter().all(|l| l.contains(" - INFO - SYNC SUCCESS - IP: 127.0.0.1 - User: user")));
    }

    #[test]
    fn file_log_reopens_in_append_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.log");
        let record = AuditRecord::new(AuditStatus::Success, "a", "u", "op", None);

        FileAuditLog::open(&path).unwrap().record(&record);
        FileAuditLog::open(&path).unwrap().record(&record);

        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[test]
    fn memory_log_keeps_order() {
        let log = MemoryAuditLog::new();
        assert!(log.is_empty());
        log.record(&AuditRecord::new(AuditStatus::Failed, "a", "u", "first", None));
        log.record(&AuditRecord::new(AuditStatus::Success, "a", "u", "second", None));
        assert_eq!(log.len(), 2);
        assert_eq!(log.records()[0].operation, "first");
        assert_eq!(log.last().unwrap().status, AuditStatus::Success);
    }
}
