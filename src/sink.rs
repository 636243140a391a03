use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use std::path::{Path, PathBuf};
use tokio::{
    fs::{create_dir_all, File, OpenOptions},
    io::AsyncWriteExt,
};

/// Destination for the raw bytes captured on one port.
#[async_trait]
pub trait Sink: Send {
    async fn append(&mut self, payload: &[u8], with_timestamp: bool) -> Result<()>;
}

/// Writes `<data_dir>/<port>/<YYYYMMDD>.data`, rolling to a new file when the
/// local date changes. Every chunk ends up on its own line.
pub struct FileSink {
    dir: PathBuf,
    date: Option<NaiveDate>,
    file: Option<File>,
}

impl FileSink {
    pub async fn new(data_dir: impl AsRef<Path>, port_name: &str) -> Result<Self> {
        let dir = data_dir.as_ref().join(port_dir_name(port_name));
        create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create data directory {}", dir.display()))?;
        Ok(Self {
            dir,
            date: None,
            file: None,
        })
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.data", date.format("%Y%m%d")))
    }

    pub fn current_path(&self) -> PathBuf {
        self.path_for(self.date.unwrap_or_else(|| Local::now().date_naive()))
    }

    async fn roll_to_date(&mut self, date: NaiveDate) -> Result<()> {
        self.file = None;
        let path = self.path_for(date);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        self.file = Some(file);
        self.date = Some(date);
        Ok(())
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn append(&mut self, payload: &[u8], with_timestamp: bool) -> Result<()> {
        let now = Local::now();
        let today = now.date_naive();
        if self.date != Some(today) || self.file.is_none() {
            self.roll_to_date(today).await?;
        }
        if let Some(file) = self.file.as_mut() {
            if with_timestamp {
                let prefix = now.format("[%Y-%m-%d %H:%M:%S] ").to_string();
                file.write_all(prefix.as_bytes())
                    .await
                    .context("failed to write timestamp")?;
            }
            file.write_all(payload)
                .await
                .context("failed to write payload")?;
            if payload.last() != Some(&b'\n') {
                file.write_all(b"\n")
                    .await
                    .context("failed to terminate payload")?;
            }
            file.flush().await.context("failed to flush payload")?;
        }
        Ok(())
    }
}

/// Port names such as `/dev/ttyUSB0` or `\\.\COM10` become a single path component.
pub fn port_dir_name(port_name: &str) -> String {
    let cleaned: String = port_name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            other => other,
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        "port".to_string()
    } else {
        trimmed.to_string()
    }
}
