use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};

use crate::types::HarvestError;

/// Append-only line log. Appends are serialized through one mutex since
/// interleaved partial writes would corrupt the log; a missing file is the
/// empty-log case, not an error.
struct AppendLog {
    path: PathBuf,
    writer: Mutex<Option<File>>,
}

impl AppendLog {
    fn new(path: &Path) -> Self {
        AppendLog {
            path: path.to_path_buf(),
            writer: Mutex::new(None),
        }
    }

    async fn load(&self) -> anyhow::Result<Vec<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content
                .lines()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(vec![]),
            Err(e) => Err(e).context(format!("could not read log at {:?}", self.path)),
        }
    }

    async fn append(&self, line: &str) -> anyhow::Result<()> {
        let mut guard = self.writer.lock().await;
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| {
                    HarvestError::DurableWrite(format!("open {:?}: {}", self.path, e))
                })?;
            *guard = Some(file);
        }
        if let Some(file) = guard.as_mut() {
            file.write_all(format!("{}\n", line).as_bytes())
                .await
                .map_err(|e| {
                    HarvestError::DurableWrite(format!("append {:?}: {}", self.path, e))
                })?;
            file.flush().await.map_err(|e| {
                HarvestError::DurableWrite(format!("flush {:?}: {}", self.path, e))
            })?;
        }
        Ok(())
    }
}

/// Durable record of every url the crawler has visited, one canonical url per
/// line. Loaded at start-up to seed the in-memory visited-set; appended to at
/// the durability point of each crawl step.
pub struct FrontierStore {
    log: AppendLog,
}

impl FrontierStore {
    pub fn new(path: &Path) -> Self {
        FrontierStore {
            log: AppendLog::new(path),
        }
    }

    pub async fn load(&self) -> anyhow::Result<Vec<String>> {
        self.log.load().await
    }

    pub async fn append(&self, url: &str) -> anyhow::Result<()> {
        self.log.append(url).await
    }
}

/// Where discovered external urls land: a durable flat file plus an in-memory
/// accumulator. Duplicates across pages are expected; de-duplication belongs
/// to the normalization pass.
pub struct OutlinkSink {
    log: AppendLog,
    collected: Mutex<Vec<String>>,
}

impl OutlinkSink {
    pub fn new(path: &Path) -> Self {
        OutlinkSink {
            log: AppendLog::new(path),
            collected: Mutex::new(Vec::new()),
        }
    }

    pub async fn record(&self, url: &str) -> anyhow::Result<()> {
        self.log.append(url).await?;
        self.collected.lock().await.push(url.to_string());
        Ok(())
    }

    pub async fn collected(&self) -> Vec<String> {
        self.collected.lock().await.clone()
    }
}
