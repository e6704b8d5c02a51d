//! Rotating JSONL audit log with cross-process locking.

use crate::model::AuditEntry;
use crate::AuditError;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::warn;

/// Where audit records are written.
pub trait AuditSink: Send + Sync {
    /// Append one record. Must never drop the record silently: failures
    /// surface as errors for the caller to report.
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

/// The durable audit log: `audit.log` plus rotated generations
/// `audit.log.1` … `audit.log.N` in one directory.
pub struct FileAuditLog {
    dir: PathBuf,
    max_file_bytes: u64,
    max_generations: u32,
    retention_days: u32,
}

impl FileAuditLog {
    /// Create a log writing into `dir` (created on first append).
    pub fn new(dir: impl Into<PathBuf>, max_file_bytes: u64, max_generations: u32, retention_days: u32) -> Self {
        Self {
            dir: dir.into(),
            max_file_bytes,
            max_generations,
            retention_days,
        }
    }

    /// Path of the live segment.
    pub fn live_path(&self) -> PathBuf {
        self.dir.join("audit.log")
    }

    /// Path of rotated generation `n` (1 = newest).
    pub fn rotated_path(&self, n: u32) -> PathBuf {
        self.dir.join(format!("audit.log.{n}"))
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join("audit.lock")
    }

    /// Take the exclusive advisory lock serializing rotation and append
    /// across processes. Released when the returned file drops.
    fn lock(&self) -> Result<File, AuditError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(self.lock_path())
            .map_err(|e| AuditError::Io(format!("open lock file: {e}")))?;
        file.lock()
            .map_err(|e| AuditError::Io(format!("acquire audit lock: {e}")))?;
        Ok(file)
    }

    /// Run the retention sweep now, without appending.
    ///
    /// Deletes rotated segments (never the live file) whose modification
    /// time is strictly older than the retention period. Returns how many
    /// segments were removed.
    pub fn sweep_retention(&self, now: SystemTime) -> Result<usize, AuditError> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let _lock = self.lock()?;
        Ok(self.sweep_locked(now))
    }

    /// Read every recoverable record, oldest first, across all segments.
    ///
    /// Corrupted lines are skipped with a warning, matching the
    /// load-what-you-can contract of the JSONL format.
    pub fn read_all(&self) -> Result<Vec<AuditEntry>, AuditError> {
        let mut entries = Vec::new();
        for n in (1..=self.max_generations).rev() {
            self.read_segment(&self.rotated_path(n), &mut entries);
        }
        self.read_segment(&self.live_path(), &mut entries);
        Ok(entries)
    }

    fn read_segment(&self, path: &Path, into: &mut Vec<AuditEntry>) {
        let Ok(content) = std::fs::read_to_string(path) else {
            return;
        };
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) => into.push(entry),
                Err(e) => warn!(error = %e, path = %path.display(), "Skipping corrupted audit line"),
            }
        }
    }

    /// Rotate if the live segment has reached the size threshold.
    /// Caller holds the lock.
    fn rotate_if_needed_locked(&self) -> Result<(), AuditError> {
        let live = self.live_path();
        let size = match std::fs::metadata(&live) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if size < self.max_file_bytes {
            return Ok(());
        }

        if self.max_generations == 0 {
            std::fs::remove_file(&live)
                .map_err(|e| AuditError::Io(format!("drop full live segment: {e}")))?;
            return Ok(());
        }

        // Shift generations up; the rename onto generation N drops the
        // oldest segment.
        for n in (1..self.max_generations).rev() {
            let from = self.rotated_path(n);
            if from.exists() {
                std::fs::rename(&from, self.rotated_path(n + 1))
                    .map_err(|e| AuditError::Io(format!("shift generation {n}: {e}")))?;
            }
        }
        std::fs::rename(&live, self.rotated_path(1))
            .map_err(|e| AuditError::Io(format!("rotate live segment: {e}")))?;
        Ok(())
    }

    /// Caller holds the lock.
    fn sweep_locked(&self, now: SystemTime) -> usize {
        let mut removed = 0;
        for n in 1..=self.max_generations {
            let path = self.rotated_path(n);
            let Ok(meta) = std::fs::metadata(&path) else {
                continue;
            };
            let Ok(mtime) = meta.modified() else {
                continue;
            };
            if expired(mtime, now, self.retention_days) {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "Retention sweep failed"),
                }
            }
        }
        removed
    }
}

/// Whether a segment modified at `mtime` is strictly older than the
/// retention period: a segment exactly `retention_days` old survives.
fn expired(mtime: SystemTime, now: SystemTime, retention_days: u32) -> bool {
    match now.duration_since(mtime) {
        Ok(age) => age.as_secs() > u64::from(retention_days) * 86_400,
        Err(_) => false,
    }
}

impl AuditSink for FileAuditLog {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let line = serde_json::to_string(entry)?;

        std::fs::create_dir_all(&self.dir)
            .map_err(|e| AuditError::Io(format!("create audit dir: {e}")))?;
        let _lock = self.lock()?;

        self.rotate_if_needed_locked()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.live_path())
            .map_err(|e| AuditError::Io(format!("open live segment: {e}")))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.write_all(b"\n"))
            .map_err(|e| AuditError::Io(format!("append audit record: {e}")))?;

        self.sweep_locked(SystemTime::now());
        Ok(())
    }
}

/// Fallback sink that reports entries through `tracing` instead of disk.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        tracing::info!(
            agent = %entry.agent,
            user = %entry.user,
            session = %entry.session_id,
            event = ?entry.event,
            "AUDIT"
        );
        Ok(())
    }
}
