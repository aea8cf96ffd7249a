use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, error, info};

use crate::error_handling::types::StorageError;
use crate::storage::types::Event;

/// Append-only sink for the newline-delimited event log.
///
/// Every append opens the file, writes one complete line and closes it again, so no handle
/// outlives a single event and external readers can tail the file at any time. Failed
/// appends drop the event, are reported at ERROR level and are counted in
/// [`write_failures`](Self::write_failures); they never propagate into a session.
pub struct EventLogger {
    path: PathBuf,
    appended: AtomicU64,
    write_failures: AtomicU64,
}

impl EventLogger {
    /// Creates the logger, making sure the parent directory of `path` exists.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    error!("Failed to create event log dir {}: {}", parent.display(), e);
                    StorageError::WriteFailed(e)
                })?;
            }
        }
        info!("EventLogger writing to {}", path.display());

        Ok(Self {
            path,
            appended: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of events written since start.
    pub fn appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    /// Number of events lost to serialization or storage failures since start.
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// Appends one event as a single line.
    ///
    /// Returns once the line has been handed to the filesystem. Errors are already counted
    /// and logged when this returns; callers may ignore them.
    pub async fn append(&self, event: &Event) -> Result<(), StorageError> {
        let result = match event.to_line() {
            Ok(mut line) => {
                line.push('\n');
                let path = self.path.clone();
                match tokio::task::spawn_blocking(move || append_line(&path, line.as_bytes())).await
                {
                    Ok(res) => res,
                    Err(e) => Err(StorageError::WriteFailed(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        e,
                    ))),
                }
            }
            Err(e) => Err(StorageError::SerializeFailed(e.to_string())),
        };

        match &result {
            Ok(()) => {
                self.appended.fetch_add(1, Ordering::Relaxed);
                debug!("Logged {} event from {}", event.kind(), event.client_ip());
            }
            Err(e) => {
                let failures = self.write_failures.fetch_add(1, Ordering::Relaxed) + 1;
                error!(
                    "Dropped {} event from {} ({} write failure(s) so far): {}",
                    event.kind(),
                    event.client_ip(),
                    failures,
                    e
                );
            }
        }
        result
    }
}

fn append_line(path: &Path, line: &[u8]) -> Result<(), StorageError> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(StorageError::WriteFailed)?;
    f.write_all(line).map_err(StorageError::WriteFailed)
}
