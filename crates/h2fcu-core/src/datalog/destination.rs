//! Log destinations

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use super::format::EXTENSION;
use super::DatalogError;
use crate::config::DatalogConfig;

/// Suffixes tried when log names collide
const MAX_NAME_SUFFIX: u32 = 1000;

/// An open log target
pub struct LogSink {
    /// Display name, e.g. the file path
    pub name: String,
    /// Destination for CSV bytes
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl LogSink {
    /// Wrap an open writer
    pub fn new(name: impl Into<String>, writer: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            name: name.into(),
            writer,
        }
    }

    /// Flush and release the target
    pub async fn close(mut self) {
        if let Err(e) = self.writer.shutdown().await {
            warn!("Error closing log {}: {}", self.name, e);
        }
    }
}

/// Somewhere a log can be written
///
/// `acquire` fails with [`DatalogError::ResourceUnavailable`] when there is
/// nowhere to write and [`DatalogError::UserCancelled`] when an operator
/// declined to pick a target.
#[async_trait]
pub trait LogDestination: Send + Sync {
    /// Open a fresh log target
    async fn acquire(&self) -> Result<LogSink, DatalogError>;
}

/// Timestamped CSV files in a directory
#[derive(Debug, Clone, Default)]
pub struct FileDestination {
    directory: Option<PathBuf>,
}

impl FileDestination {
    /// Files go to `directory`, or the user's documents directory if `None`
    pub fn new(directory: Option<PathBuf>) -> Self {
        Self { directory }
    }

    /// Destination for the configured directory
    pub fn from_config(config: &DatalogConfig) -> Self {
        Self::new(config.directory.as_ref().map(PathBuf::from))
    }

    /// `h2_fcu_log_YYYYMMDD_HHMMSS.csv`
    pub fn file_name(now: DateTime<Local>) -> String {
        Self::numbered_file_name(now, 0)
    }

    /// [`file_name`](Self::file_name) with a `_N` suffix for `n > 0`
    pub fn numbered_file_name(now: DateTime<Local>, n: u32) -> String {
        let stamp = now.format("%Y%m%d_%H%M%S");
        match n {
            0 => format!("h2_fcu_log_{}.{}", stamp, EXTENSION),
            n => format!("h2_fcu_log_{}_{}.{}", stamp, n, EXTENSION),
        }
    }

    fn directory(&self) -> Result<PathBuf, DatalogError> {
        self.directory
            .clone()
            .or_else(dirs::document_dir)
            .ok_or_else(|| DatalogError::ResourceUnavailable("no documents directory".to_string()))
    }
}

#[async_trait]
impl LogDestination for FileDestination {
    async fn acquire(&self) -> Result<LogSink, DatalogError> {
        let dir = self.directory()?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DatalogError::ResourceUnavailable(format!("{}: {}", dir.display(), e)))?;

        let now = Local::now();
        for n in 0..MAX_NAME_SUFFIX {
            let path = dir.join(Self::numbered_file_name(now, n));
            // Never truncate an earlier log started within the same second
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => {
                    info!("Logging to {}", path.display());
                    return Ok(LogSink::new(path.display().to_string(), Box::new(file)));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(DatalogError::ResourceUnavailable(format!(
                        "{}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }

        Err(DatalogError::ResourceUnavailable(format!(
            "{}: no free log file name",
            dir.display()
        )))
    }
}
