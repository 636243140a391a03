use chrono::Local;
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tokio::runtime::Handle;

/// Best-effort, append-only event log shared by workers and forwarders.
pub trait ErrorLog: Send + Sync {
    fn record(&self, source: &str, message: &str);
}

/// Writes `<dir>/<YYYYMMDD>.log`, one line per event.
///
/// Inside a tokio runtime the file write is handed to the blocking pool.
pub struct FileErrorLog {
    inner: Arc<LogFile>,
}

struct LogFile {
    base: PathBuf,
    write_lock: Mutex<()>,
}

impl LogFile {
    fn append(&self, date: &str, line: &str) -> std::io::Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        fs::create_dir_all(&self.base)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.base.join(format!("{date}.log")))?;
        writeln!(file, "{line}")
    }

    fn write(&self, date: &str, line: &str) {
        if let Err(err) = self.append(date, line) {
            tracing::warn!(
                error = %err,
                dir = %self.base.display(),
                "unable to write error log"
            );
        }
    }
}

impl FileErrorLog {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            inner: Arc::new(LogFile {
                base: base_dir.as_ref().to_path_buf(),
                write_lock: Mutex::new(()),
            }),
        }
    }

    pub fn current_path(&self) -> PathBuf {
        self.inner
            .base
            .join(format!("{}.log", Local::now().format("%Y%m%d")))
    }
}

impl ErrorLog for FileErrorLog {
    fn record(&self, source: &str, message: &str) {
        tracing::warn!(source = %source, "{message}");
        let now = Local::now();
        let date = now.format("%Y%m%d").to_string();
        let line = format!("[{}] {}: {}", now.format("%Y-%m-%d %H:%M:%S"), source, message);
        match Handle::try_current() {
            Ok(handle) => {
                let file = self.inner.clone();
                handle.spawn_blocking(move || file.write(&date, &line));
            }
            Err(_) => self.inner.write(&date, &line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn records_dated_lines() {
        let tmp = tempdir().expect("tmp");
        let log = FileErrorLog::new(tmp.path().join("error"));
        log.record("COM1", "Failed to open port");
        log.record("TCP", "Send timeout or error, clearing queue");

        let content = fs::read_to_string(log.current_path()).expect("read log");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] COM1: Failed to open port"));
        assert!(lines[1].ends_with("TCP: Send timeout or error, clearing queue"));
    }

    #[test]
    fn write_failure_is_swallowed() {
        let tmp = tempdir().expect("tmp");
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, "not a directory").expect("write blocker");
        let log = FileErrorLog::new(blocker.join("error"));
        log.record("COM1", "nowhere to go");
    }

    #[tokio::test]
    async fn records_from_async_tasks_without_blocking() {
        let tmp = tempdir().expect("tmp");
        let log = FileErrorLog::new(tmp.path().join("error"));
        log.record("COM2", "Read failed - Further errors will be suppressed");

        let path = log.current_path();
        let mut content = String::new();
        for _ in 0..500 {
            content = tokio::fs::read_to_string(&path).await.unwrap_or_default();
            if !content.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(content.ends_with("] COM2: Read failed - Further errors will be suppressed\n"));
    }
}
