//! Background harvesting of timing samples from the live log.
//!
//! The harvester attaches to a [`LineSource`], keeps every line containing
//! the marker, tags it with the current unit in the detail log, and adds any
//! trailing `took <n> seconds` duration to the shared sample sum.
//!
//! When the stream ends it waits briefly and attaches again, so a log
//! follower that dies (or a log that is rotated away) does not silently end
//! sample collection. Sources that cannot be reopened stop the harvester;
//! the monitor carries on with counters alone.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::HarvestSettings;
use crate::error::{SettingsError, SourceError};
use crate::progress::SharedProgress;
use crate::record::DetailLog;
use crate::source::{LineSource, LineStream};

/// Result of inspecting a marked line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineMatch {
    /// Duration in seconds, if the line carried a parsable one.
    pub sample: Option<f64>,
}

/// Decides which lines matter and extracts their durations.
#[derive(Debug, Clone)]
pub struct SampleMatcher {
    marker: String,
    pattern: Regex,
}

impl SampleMatcher {
    /// Create a matcher.
    ///
    /// `pattern`'s first capture group must hold the duration.
    pub fn new(marker: &str, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            marker: marker.to_string(),
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn from_settings(settings: &HarvestSettings) -> Result<Self, SettingsError> {
        Self::new(&settings.marker, &settings.duration_pattern).map_err(|e| {
            SettingsError::Invalid {
                key: "harvest.duration_pattern",
                reason: e.to_string(),
            }
        })
    }

    /// Inspect a line. Returns `None` if it does not carry the marker.
    ///
    /// A captured value that is not a finite number is dropped: the line
    /// still matches, it just contributes no sample.
    pub fn match_line(&self, line: &str) -> Option<LineMatch> {
        if !line.contains(&self.marker) {
            return None;
        }

        let sample = self
            .pattern
            .captures(line.trim_end())
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .filter(|v| v.is_finite());

        Some(LineMatch { sample })
    }
}

/// Counters describing what the harvester saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HarvestStats {
    pub lines_read: u64,
    pub lines_matched: u64,
    pub samples: u64,
    pub attachments: u32,
}

/// Background task feeding [`SharedProgress`] from a log stream.
#[derive(Debug)]
pub struct Harvester {
    source: Arc<dyn LineSource>,
    matcher: SampleMatcher,
    progress: Arc<SharedProgress>,
    detail: DetailLog,
    reattach_delay: Duration,
    stats: HarvestStats,
}

impl Harvester {
    pub fn new(
        source: Arc<dyn LineSource>,
        matcher: SampleMatcher,
        progress: Arc<SharedProgress>,
        detail: DetailLog,
        reattach_delay: Duration,
    ) -> Self {
        Self {
            source,
            matcher,
            progress,
            detail,
            reattach_delay,
            stats: HarvestStats::default(),
        }
    }

    /// Run the harvester on its own task until `cancel` fires or the
    /// source closes for good.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<HarvestStats> {
        tokio::spawn(self.run(cancel))
    }

    /// Harvest until cancelled or the source is closed.
    ///
    /// On cancellation the attached stream is stopped before returning, so
    /// no follower process outlives the harvester.
    pub async fn run(mut self, cancel: CancellationToken) -> HarvestStats {
        info!("Background log monitor started on {}", self.source.description());

        loop {
            let attached = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                attached = self.source.attach() => attached,
            };

            match attached {
                Ok(mut stream) => {
                    self.stats.attachments += 1;
                    if self.stats.attachments > 1 {
                        info!("Reattached to {}", self.source.description());
                    }
                    let cancelled = self.drain_stream(&mut stream, &cancel).await;
                    stream.stop().await;
                    if cancelled {
                        break;
                    }
                }
                Err(SourceError::Closed(reason)) => {
                    warn!(
                        "Log source closed ({}), no further samples will be harvested",
                        reason
                    );
                    break;
                }
                Err(e) => {
                    warn!("Failed to attach to {}: {}", self.source.description(), e);
                }
            }

            let resumed = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = tokio::time::sleep(self.reattach_delay) => true,
            };
            if !resumed {
                break;
            }
        }

        debug!(stats = ?self.stats, "log harvester stopped");
        self.stats
    }

    /// Consume lines until the stream ends. Returns `true` if cancelled.
    async fn drain_stream(&mut self, stream: &mut LineStream, cancel: &CancellationToken) -> bool {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return true,
                next = stream.next_line() => next,
            };

            match next {
                Ok(Some(line)) => self.handle_line(&line).await,
                Ok(None) => {
                    warn!(
                        "{} ended, reattaching in {:?}",
                        self.source.description(),
                        self.reattach_delay
                    );
                    return false;
                }
                Err(e) => {
                    warn!("Read error on {}: {}", self.source.description(), e);
                    return false;
                }
            }
        }
    }

    async fn handle_line(&mut self, line: &str) {
        self.stats.lines_read += 1;

        let Some(matched) = self.matcher.match_line(line) else {
            return;
        };
        self.stats.lines_matched += 1;
        if matched.sample.is_some() {
            self.stats.samples += 1;
        }

        let unit = self.progress.observe(matched.sample);
        trace!(unit, sample = ?matched.sample, "harvested line");

        if let Err(e) = self.detail.append(unit, line).await {
            warn!("Failed to write {}: {}", self.detail.path().display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ChannelSource, ReaderSource};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::io::Cursor;
    use tempfile::tempdir;

    /// Hands out one prepared attach result per call, then reports closed.
    #[derive(Debug)]
    struct ReopenableSource {
        attaches: Mutex<VecDeque<Result<&'static str, SourceError>>>,
    }

    impl ReopenableSource {
        fn new(attaches: Vec<Result<&'static str, SourceError>>) -> Self {
            Self {
                attaches: Mutex::new(attaches.into()),
            }
        }
    }

    #[async_trait]
    impl LineSource for ReopenableSource {
        async fn attach(&self) -> Result<LineStream, SourceError> {
            let next = self.attaches.lock().pop_front();
            match next {
                Some(Ok(text)) => Ok(LineStream::from_reader(Cursor::new(text))),
                Some(Err(e)) => Err(e),
                None => Err(SourceError::Closed("reopenable".to_string())),
            }
        }

        fn description(&self) -> &str {
            "reopenable"
        }
    }

    fn spawn_failure() -> SourceError {
        SourceError::Spawn {
            path: "/var/log/syslog".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "tail not found"),
        }
    }

    const PATTERN: &str = r"took ([0-9.]+) seconds$";

    fn matcher() -> SampleMatcher {
        SampleMatcher::new("Ram Test", PATTERN).unwrap()
    }

    #[test]
    fn test_match_line_with_duration() {
        let m = matcher()
            .match_line("Oct 18 10:00:01 dpu0 syncd: Ram Test bulk create took 1.250 seconds")
            .unwrap();
        assert_eq!(m.sample, Some(1.25));
    }

    #[test]
    fn test_match_line_tolerates_trailing_whitespace() {
        let m = matcher().match_line("Ram Test took 2.5 seconds \r").unwrap();
        assert_eq!(m.sample, Some(2.5));
    }

    #[test]
    fn test_match_line_without_duration() {
        let m = matcher().match_line("Ram Test progress 40%").unwrap();
        assert_eq!(m.sample, None);
    }

    #[test]
    fn test_match_line_duration_not_at_end() {
        let m = matcher()
            .match_line("Ram Test took 3.0 seconds to start")
            .unwrap();
        assert_eq!(m.sample, None);
    }

    #[test]
    fn test_match_line_unparsable_duration_is_dropped() {
        let m = matcher().match_line("Ram Test took 1.2.3 seconds").unwrap();
        assert_eq!(m.sample, None);

        let m = matcher().match_line("Ram Test took . seconds").unwrap();
        assert_eq!(m.sample, None);
    }

    #[test]
    fn test_unmarked_line_is_ignored() {
        assert!(matcher()
            .match_line("kernel: something took 9.0 seconds")
            .is_none());
    }

    #[tokio::test]
    async fn test_harvester_tags_with_current_unit() {
        let dir = tempdir().unwrap();
        let detail_path = dir.path().join("ram_test.log");
        let detail = DetailLog::create(&detail_path).await.unwrap();

        let progress = Arc::new(SharedProgress::new());
        progress.drain_and_advance(2);

        let (tx, source) = ChannelSource::create("test");
        let cancel = CancellationToken::new();
        let handle = Harvester::new(
            Arc::new(source),
            matcher(),
            Arc::clone(&progress),
            detail,
            Duration::from_millis(10),
        )
        .spawn(cancel.clone());

        tx.send("noise line".to_string()).await.unwrap();
        tx.send("Ram Test bulk create took 1.250 seconds".to_string())
            .await
            .unwrap();
        tx.send("Ram Test progress".to_string()).await.unwrap();
        drop(tx);

        // Channel sources cannot be reopened, so the harvester stops on its own.
        let stats = handle.await.unwrap();
        assert_eq!(stats.lines_read, 3);
        assert_eq!(stats.lines_matched, 2);
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.attachments, 1);

        assert_eq!(progress.drain(), 1.25);
        assert_eq!(progress.drain(), 0.0);

        let content = std::fs::read_to_string(&detail_path).unwrap();
        assert_eq!(
            content,
            "[ENI 2] Ram Test bulk create took 1.250 seconds\n[ENI 2] Ram Test progress\n"
        );
    }

    #[tokio::test]
    async fn test_harvester_stops_on_cancel() {
        let dir = tempdir().unwrap();
        let detail = DetailLog::create(dir.path().join("detail.log"))
            .await
            .unwrap();

        let (tx, source) = ChannelSource::create("test");
        let cancel = CancellationToken::new();
        let handle = Harvester::new(
            Arc::new(source),
            matcher(),
            Arc::new(SharedProgress::new()),
            detail,
            Duration::from_secs(60),
        )
        .spawn(cancel.clone());

        tx.send("Ram Test took 0.5 seconds".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("harvester did not stop")
            .unwrap();
        assert_eq!(stats.samples, 1);

        // The stream was stopped, so the sender sees a closed channel.
        assert!(tx.send("late".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_harvester_reattaches_after_stream_ends() {
        let dir = tempdir().unwrap();
        let detail_path = dir.path().join("detail.log");
        let detail = DetailLog::create(&detail_path).await.unwrap();
        let progress = Arc::new(SharedProgress::new());

        let source = ReopenableSource::new(vec![
            Ok("Ram Test first took 0.5 seconds\n"),
            Ok("Ram Test second took 0.25 seconds\n"),
        ]);

        let stats = tokio::time::timeout(
            Duration::from_secs(5),
            Harvester::new(
                Arc::new(source),
                matcher(),
                Arc::clone(&progress),
                detail,
                Duration::from_millis(10),
            )
            .run(CancellationToken::new()),
        )
        .await
        .expect("harvester did not stop");

        assert_eq!(stats.attachments, 2);
        assert_eq!(stats.samples, 2);
        assert_eq!(progress.drain(), 0.75);

        let content = std::fs::read_to_string(&detail_path).unwrap();
        assert_eq!(
            content,
            "[ENI 1] Ram Test first took 0.5 seconds\n[ENI 1] Ram Test second took 0.25 seconds\n"
        );
    }

    #[tokio::test]
    async fn test_harvester_retries_failed_attach() {
        let dir = tempdir().unwrap();
        let detail = DetailLog::create(dir.path().join("detail.log"))
            .await
            .unwrap();
        let progress = Arc::new(SharedProgress::new());

        let source = ReopenableSource::new(vec![
            Err(spawn_failure()),
            Err(spawn_failure()),
            Ok("Ram Test late took 2.0 seconds\n"),
        ]);

        let stats = tokio::time::timeout(
            Duration::from_secs(5),
            Harvester::new(
                Arc::new(source),
                matcher(),
                Arc::clone(&progress),
                detail,
                Duration::from_millis(10),
            )
            .run(CancellationToken::new()),
        )
        .await
        .expect("harvester did not stop");

        assert_eq!(stats.attachments, 1);
        assert_eq!(stats.samples, 1);
        assert_eq!(progress.drain(), 2.0);
    }

    #[tokio::test]
    async fn test_harvester_reads_reader_source_to_end() {
        let dir = tempdir().unwrap();
        let detail_path = dir.path().join("detail.log");
        let detail = DetailLog::create(&detail_path).await.unwrap();
        let progress = Arc::new(SharedProgress::new());

        let excerpt = "Ram Test a took 0.5 seconds\nRam Test b took 0.25 seconds\n";
        let source = ReaderSource::new(Cursor::new(excerpt), "excerpt");

        let stats = Harvester::new(
            Arc::new(source),
            matcher(),
            Arc::clone(&progress),
            detail,
            Duration::from_millis(1),
        )
        .run(CancellationToken::new())
        .await;

        assert_eq!(stats.samples, 2);
        assert_eq!(progress.drain(), 0.75);
        let content = std::fs::read_to_string(&detail_path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.lines().all(|l| l.starts_with("[ENI 1] ")));
    }
}
