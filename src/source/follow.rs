//! File-following line source.
//!
//! Attaches to an appended-to log file by running `tail -F -n 0`, so only
//! lines written after attachment are seen. `-F` keeps following across
//! log rotation; if the follower itself exits, the source can simply be
//! attached again.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{LineSource, LineStream};
use crate::error::SourceError;

const TAIL: &str = "tail";

/// A line source that follows a file from its current end.
#[derive(Debug, Clone)]
pub struct FollowSource {
    path: PathBuf,
    program: String,
    description: String,
}

impl FollowSource {
    /// Create a new follow source for the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let description = format!("follow: {}", path.display());
        Self {
            path,
            program: TAIL.to_string(),
            description,
        }
    }

    /// Use a different `tail`-compatible program.
    pub fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    /// Returns the path being followed.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LineSource for FollowSource {
    async fn attach(&self) -> Result<LineStream, SourceError> {
        let mut child = Command::new(&self.program)
            .arg("-F")
            .arg("-n")
            .arg("0")
            .arg(&self.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SourceError::Spawn {
                path: self.path.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| SourceError::Spawn {
            path: self.path.clone(),
            source: std::io::Error::other("follower stdout not captured"),
        })?;

        debug!(pid = ?child.id(), "attached to {}", self.path.display());
        Ok(LineStream::from_reader(stdout).with_child(child))
    }

    fn description(&self) -> &str {
        &self.description
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_follow_source_new() {
        let source = FollowSource::new("/var/log/syslog");
        assert_eq!(source.path(), Path::new("/var/log/syslog"));
        assert_eq!(source.description(), "follow: /var/log/syslog");
    }

    #[tokio::test]
    async fn test_follow_source_missing_program() {
        let source = FollowSource::new("/tmp/whatever.log").with_program("/nonexistent/tail");

        let err = source.attach().await.unwrap_err();
        assert!(matches!(err, SourceError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_follow_source_sees_only_new_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "historical line").unwrap();
        file.flush().unwrap();

        let source = FollowSource::new(file.path());
        let mut stream = source.attach().await.unwrap();

        // Give tail time to open the file and seek to the end.
        tokio::time::sleep(Duration::from_millis(500)).await;
        writeln!(file, "fresh line").unwrap();
        file.flush().unwrap();

        let line = tokio::time::timeout(Duration::from_secs(5), stream.next_line())
            .await
            .expect("tail produced no output")
            .unwrap();
        assert_eq!(line.as_deref(), Some("fresh line"));

        stream.stop().await;
    }
}
