//! Report persistence

use super::Report;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Persists a finished report and returns where it went
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn save(&self, report: &Report) -> Result<String>;
}

/// Writes `report-<id>.json` into a directory
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
    pretty: bool,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pretty: true,
        }
    }

    pub fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }

    pub fn path_for(&self, report: &Report) -> PathBuf {
        self.dir.join(format!("report-{}.json", report.id()))
    }

    async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        let temp_path = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;
        file.write_all(data)
            .await
            .context("Failed to write report data")?;
        file.sync_all().await.context("Failed to sync report file")?;

        tokio::fs::rename(&temp_path, path)
            .await
            .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;
        Ok(())
    }
}

#[async_trait]
impl ReportSink for JsonFileSink {
    async fn save(&self, report: &Report) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create directory {:?}", self.dir))?;

        let json = if self.pretty {
            serde_json::to_vec_pretty(report)
        } else {
            serde_json::to_vec(report)
        }
        .context("Failed to serialize report")?;

        let path = self.path_for(report);
        Self::write_atomic(&path, &json).await?;

        info!(report_id = %report.id(), path = %path.display(), bytes = json.len(), "Report saved");
        Ok(path.display().to_string())
    }
}
