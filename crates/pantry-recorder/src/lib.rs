//! Filesystem archival of job results, grounded on the teacher's dated
//! content archive (`rootsignal-archive`) generalized from a Postgres-backed
//! store to a plain JSON-on-disk layout: one `<job_id>.json` per result, a
//! `latest` symlink to the newest daily directory, and a running
//! `summary.json` of counts per scraper/outcome.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use pantry_domain::{JobResult, JobStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize job result: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RecordError>;

/// One daily archive's running tally, serialized to `summary.json` inside
/// that day's directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub date: String,
    pub scrapers: HashMap<String, ScraperCounts>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScraperCounts {
    pub succeeded: u64,
    pub failed: u64,
    pub rejected: u64,
}

impl ScraperCounts {
    fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Succeeded => self.succeeded += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Rejected => self.rejected += 1,
            JobStatus::Pending | JobStatus::InProgress => {}
        }
    }
}

/// Archives `JobResult`s under `archive_root/daily/YYYY-MM-DD/<job_id>.json`,
/// maintaining a `latest` symlink and a per-day `summary.json`. A single
/// `Recorder` serializes its own writes; two `Recorder`s sharing an
/// `archive_root` across processes last-writer-win on `summary.json`, which
/// is consistent with the pipeline's eventual-consistency model elsewhere.
pub struct Recorder {
    archive_root: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl Recorder {
    pub fn new(archive_root: impl Into<PathBuf>) -> Self {
        Self {
            archive_root: archive_root.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Write `result` to today's daily directory, update the `latest`
    /// symlink and the daily summary. Returns the path the result was
    /// written to.
    pub async fn record(&self, result: &JobResult, scraper_id: &str) -> Result<PathBuf> {
        let _guard = self.lock.lock().await;

        let date = result.produced_at.format("%Y-%m-%d").to_string();
        let daily_dir = self.archive_root.join("daily").join(&date);
        std::fs::create_dir_all(&daily_dir)?;

        let result_path = daily_dir.join(format!("{}.json", result.job_id));
        write_atomic(&daily_dir, &result_path, result)?;
        tracing::debug!(job_id = %result.job_id, scraper_id, path = %result_path.display(), "recorded job result");

        update_latest_symlink(&self.archive_root, &daily_dir)?;
        update_summary(&daily_dir, &date, scraper_id, result.status)?;

        Ok(result_path)
    }
}

/// Write `value` as pretty JSON to `path` atomically: serialize to a temp
/// file in the same directory (so the rename stays on one filesystem), then
/// rename over the destination. A reader never observes a partially
/// written file.
fn write_atomic<T: Serialize>(dir: &Path, path: &Path, value: &T) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    let bytes = serde_json::to_vec_pretty(value)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn update_latest_symlink(archive_root: &Path, daily_dir: &Path) -> Result<()> {
    let latest = archive_root.join("latest");
    let tmp = archive_root.join(".latest.tmp");
    let _ = std::fs::remove_file(&tmp);
    std::os::unix::fs::symlink(daily_dir, &tmp)?;
    std::fs::rename(&tmp, &latest)?;
    Ok(())
}

#[cfg(not(unix))]
fn update_latest_symlink(archive_root: &Path, daily_dir: &Path) -> Result<()> {
    let marker = archive_root.join("latest.txt");
    std::fs::write(marker, daily_dir.display().to_string())?;
    Ok(())
}

fn update_summary(daily_dir: &Path, date: &str, scraper_id: &str, status: JobStatus) -> Result<()> {
    let summary_path = daily_dir.join("summary.json");
    let mut summary = std::fs::read(&summary_path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_else(|| Summary { date: date.to_string(), scrapers: HashMap::new() });

    summary.scrapers.entry(scraper_id.to_string()).or_default().record(status);
    write_atomic(daily_dir, &summary_path, &summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn result(status: JobStatus) -> JobResult {
        JobResult {
            job_id: Uuid::new_v4(),
            status,
            output: json!({"ok": true}),
            error: None,
            produced_at: Utc::now(),
            latency_ms: 120,
            provider: Some("anthropic".to_string()),
            confidence: Some(0.9),
        }
    }

    #[tokio::test]
    async fn record_writes_a_json_file_and_latest_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path());
        let res = result(JobStatus::Succeeded);

        let path = recorder.record(&res, "scraper_a").await.unwrap();
        assert!(path.exists());
        assert!(dir.path().join("latest").exists());
    }

    #[tokio::test]
    async fn summary_accumulates_counts_across_multiple_records() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path());

        recorder.record(&result(JobStatus::Succeeded), "scraper_a").await.unwrap();
        recorder.record(&result(JobStatus::Failed), "scraper_a").await.unwrap();
        recorder.record(&result(JobStatus::Succeeded), "scraper_b").await.unwrap();

        let date = Utc::now().format("%Y-%m-%d").to_string();
        let summary_path = dir.path().join("daily").join(&date).join("summary.json");
        let summary: Summary = serde_json::from_slice(&std::fs::read(summary_path).unwrap()).unwrap();

        assert_eq!(summary.scrapers["scraper_a"].succeeded, 1);
        assert_eq!(summary.scrapers["scraper_a"].failed, 1);
        assert_eq!(summary.scrapers["scraper_b"].succeeded, 1);
    }

    #[tokio::test]
    async fn rejected_jobs_are_still_archived_non_destructively() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path());

        let path = recorder.record(&result(JobStatus::Rejected), "scraper_a").await.unwrap();
        let written: JobResult = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written.status, JobStatus::Rejected);
    }
}
