//! Wires the harvester and the completion monitor into one run.
//!
//! A run truncates both output logs, starts the harvester on its own task,
//! and drives the monitor in the foreground. Whatever ends the run
//! (completion, a shutdown signal, or a fatal error) the harvester is
//! cancelled and awaited before the result is returned, so no follower
//! process is left behind.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Settings;
use crate::counters::{CounterSource, DbCliCounterSource};
use crate::error::MonitorError;
use crate::harvest::{HarvestStats, Harvester, SampleMatcher};
use crate::monitor::{CompletionMonitor, MonitorOutcome};
use crate::progress::SharedProgress;
use crate::record::{DetailLog, SummaryLog};
use crate::source::{FollowSource, LineSource};

/// What a finished run reports, and what `--export` writes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    #[serde(flatten)]
    pub outcome: MonitorOutcome,
    pub harvest: HarvestStats,
}

/// A configured monitoring run.
#[derive(Debug)]
pub struct Runner {
    settings: Settings,
    counters: Arc<dyn CounterSource>,
    lines: Arc<dyn LineSource>,
}

impl Runner {
    pub fn new(
        settings: Settings,
        counters: Arc<dyn CounterSource>,
        lines: Arc<dyn LineSource>,
    ) -> Self {
        Self {
            settings,
            counters,
            lines,
        }
    }

    /// Query counters through the database CLI and follow the configured log.
    pub fn from_settings(settings: Settings) -> Self {
        let counters = Arc::new(DbCliCounterSource::from_settings(&settings.counters));
        let lines = Arc::new(FollowSource::new(&settings.harvest.log_path));
        Self::new(settings, counters, lines)
    }

    /// Run until every unit completes, `shutdown` resolves, or a fatal error.
    pub async fn run_until<F>(self, shutdown: F) -> Result<RunReport, MonitorError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Settings {
            session,
            logs,
            harvest,
            counters: _,
        } = self.settings;

        let matcher = SampleMatcher::from_settings(&harvest)?;
        let detail = DetailLog::create(&logs.detail)
            .await
            .map_err(|source| create_failed(&logs.detail, source))?;
        let summary = SummaryLog::create(&logs.summary)
            .await
            .map_err(|source| create_failed(&logs.summary, source))?;

        info!(
            "Monitoring {} ENIs: {} routes and {} mappings each, polling every {:.1}s",
            session.total_units,
            session.routes_per_unit,
            session.mappings_per_unit,
            session.poll_interval_secs
        );
        info!(
            "Logging '{}' lines to {}, completions to {}",
            harvest.marker,
            logs.detail.display(),
            logs.summary.display()
        );
        info!("Counters from {}", self.counters.description());

        let progress = Arc::new(SharedProgress::new());
        let cancel = CancellationToken::new();

        let harvester = Harvester::new(
            self.lines,
            matcher,
            Arc::clone(&progress),
            detail,
            harvest.reattach_delay(),
        )
        .spawn(cancel.child_token());

        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown => {
                        info!("Interrupt received, stopping");
                        cancel.cancel();
                    }
                    _ = cancel.cancelled() => {}
                }
            })
        };

        let monitor = CompletionMonitor::new(session, self.counters, progress, summary);
        let result = monitor.run(&cancel).await;

        cancel.cancel();
        let harvest = match harvester.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Log harvester task failed: {}", e);
                HarvestStats::default()
            }
        };
        if let Err(e) = watcher.await {
            warn!("Shutdown listener task failed: {}", e);
        }
        info!("Background log monitor stopped");

        result.map(|outcome| RunReport { outcome, harvest })
    }
}

fn create_failed(path: &Path, source: std::io::Error) -> MonitorError {
    MonitorError::CreateLog {
        path: path.to_path_buf(),
        source,
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
///
/// If no handler can be installed the future never resolves, so the run is
/// not cut short.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
