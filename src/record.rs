//! Completion records and the two plain-text output logs.
//!
//! Both logs are truncated when created and then only appended to. Each
//! line is flushed as it is written so a crash or interrupt never leaves a
//! half-written record behind.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Durable marker that a unit finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRecord {
    /// Unit (ENI) number, starting at 1.
    pub unit: u32,
    /// Wall-clock time from the unit's start until both thresholds were met.
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    /// Sum of harvested sample durations attributed to this unit.
    pub sample_secs: f64,
}

impl fmt::Display for CompletionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ENI {} COMPLETED {:.2} {:.3}",
            self.unit,
            self.elapsed.as_secs_f64(),
            self.sample_secs
        )
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// An append-only text file, truncated on creation.
#[derive(Debug)]
struct AppendLog {
    path: PathBuf,
    file: File,
}

impl AppendLog {
    async fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    async fn append_line(&mut self, line: &str) -> io::Result<()> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        self.file.write_all(buf.as_bytes()).await?;
        self.file.flush().await
    }
}

/// One line per completed unit.
#[derive(Debug)]
pub struct SummaryLog {
    log: AppendLog,
}

impl SummaryLog {
    /// Create (or truncate) the summary log.
    pub async fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self {
            log: AppendLog::create(path.as_ref()).await?,
        })
    }

    /// Append a completion record and sync it to disk.
    pub async fn record(&mut self, record: &CompletionRecord) -> io::Result<()> {
        self.log.append_line(&record.to_string()).await?;
        self.log.file.sync_data().await
    }

    pub fn path(&self) -> &Path {
        &self.log.path
    }
}

/// Tagged copy of every log line the harvester matched.
#[derive(Debug)]
pub struct DetailLog {
    log: AppendLog,
}

impl DetailLog {
    /// Create (or truncate) the detail log.
    pub async fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self {
            log: AppendLog::create(path.as_ref()).await?,
        })
    }

    /// Append `line` tagged with the unit it belongs to.
    pub async fn append(&mut self, unit: u32, line: &str) -> io::Result<()> {
        self.log.append_line(&tag_line(unit, line)).await
    }

    pub fn path(&self) -> &Path {
        &self.log.path
    }
}

/// Format a matched log line for the detail log.
pub fn tag_line(unit: u32, line: &str) -> String {
    format!("[ENI {}] {}", unit, line.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_completion_record_format() {
        let record = CompletionRecord {
            unit: 3,
            elapsed: Duration::from_millis(12_346),
            sample_secs: 1.25,
        };
        assert_eq!(record.to_string(), "ENI 3 COMPLETED 12.35 1.250");

        let record = CompletionRecord {
            unit: 1,
            elapsed: Duration::ZERO,
            sample_secs: 0.0,
        };
        assert_eq!(record.to_string(), "ENI 1 COMPLETED 0.00 0.000");
    }

    #[test]
    fn test_completion_record_json() {
        let record = CompletionRecord {
            unit: 2,
            elapsed: Duration::from_millis(1500),
            sample_secs: 0.75,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"unit": 2, "elapsed_secs": 1.5, "sample_secs": 0.75})
        );
    }

    #[test]
    fn test_tag_line_trims() {
        assert_eq!(
            tag_line(2, "  Ram Test: batch done  \n"),
            "[ENI 2] Ram Test: batch done"
        );
    }

    #[tokio::test]
    async fn test_summary_log_truncates_and_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("eni_summary.log");
        std::fs::write(&path, "stale line from a previous run\n").unwrap();

        let mut log = SummaryLog::create(&path).await.unwrap();
        assert_eq!(log.path(), path.as_path());
        for unit in 1..=2 {
            log.record(&CompletionRecord {
                unit,
                elapsed: Duration::from_secs(unit as u64),
                sample_secs: 0.5,
            })
            .await
            .unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "ENI 1 COMPLETED 1.00 0.500\nENI 2 COMPLETED 2.00 0.500\n"
        );
    }

    #[tokio::test]
    async fn test_detail_log_tags_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ram_test.log");

        let mut log = DetailLog::create(&path).await.unwrap();
        log.append(4, "Ram Test progress 50%").await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "[ENI 4] Ram Test progress 50%\n");
    }
}
