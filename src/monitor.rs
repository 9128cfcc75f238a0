//! The completion monitor state machine.
//!
//! ```text
//! AwaitingBaseline ──▶ AwaitingUnit(1) ──▶ Draining(1) ──▶ AwaitingUnit(2) ──▶ … ──▶ Done
//!                        ▲          │
//!                        └──────────┘  poll failed / thresholds not met
//! ```
//!
//! The device counters only ever grow over the run, so the target for unit
//! `n` is cumulative: `n` times the per-unit expectation, measured from the
//! baseline taken once at startup.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MonitorSession;
use crate::counters::{CounterReading, CounterSource};
use crate::error::{CounterError, MonitorError};
use crate::progress::SharedProgress;
use crate::record::{CompletionRecord, SummaryLog};

/// Where the monitor is in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    AwaitingBaseline,
    AwaitingUnit { cursor: u32 },
    Draining { cursor: u32 },
    Done,
}

/// Counter values captured before the first unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Baseline {
    pub routes: u64,
    pub mappings: u64,
}

impl Baseline {
    /// Progress since the baseline.
    ///
    /// A counter that dropped below its baseline (device reset) counts as
    /// zero progress.
    pub fn delta(&self, reading: &CounterReading) -> CounterDelta {
        CounterDelta {
            routes: reading.routes.saturating_sub(self.routes),
            mappings: reading.mappings.saturating_sub(self.mappings),
        }
    }
}

impl From<CounterReading> for Baseline {
    fn from(reading: CounterReading) -> Self {
        Self {
            routes: reading.routes,
            mappings: reading.mappings,
        }
    }
}

/// Counter growth since the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterDelta {
    pub routes: u64,
    pub mappings: u64,
}

/// Cumulative counter growth required for a unit to count as complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitTarget {
    pub unit: u32,
    pub routes: u64,
    pub mappings: u64,
}

impl UnitTarget {
    pub fn for_unit(session: &MonitorSession, unit: u32) -> Self {
        Self {
            unit,
            routes: session.routes_per_unit.saturating_mul(u64::from(unit)),
            mappings: session.mappings_per_unit.saturating_mul(u64::from(unit)),
        }
    }

    /// Both counters must have reached their target.
    pub fn is_met(&self, delta: &CounterDelta) -> bool {
        delta.routes >= self.routes && delta.mappings >= self.mappings
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every unit completed.
    Completed,
    /// Shutdown was requested while `unit` was in flight.
    Interrupted { unit: u32 },
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorOutcome {
    #[serde(flatten)]
    pub status: RunStatus,
    pub baseline: Option<Baseline>,
    pub records: Vec<CompletionRecord>,
}

/// Foreground loop that decides when each unit is done.
#[derive(Debug)]
pub struct CompletionMonitor {
    session: MonitorSession,
    counters: Arc<dyn CounterSource>,
    progress: Arc<SharedProgress>,
    summary: SummaryLog,
    state: MonitorState,
    baseline: Option<Baseline>,
    unit_started: Instant,
    consecutive_failures: u32,
    records: Vec<CompletionRecord>,
}

impl CompletionMonitor {
    pub fn new(
        session: MonitorSession,
        counters: Arc<dyn CounterSource>,
        progress: Arc<SharedProgress>,
        summary: SummaryLog,
    ) -> Self {
        Self {
            session,
            counters,
            progress,
            summary,
            state: MonitorState::AwaitingBaseline,
            baseline: None,
            unit_started: Instant::now(),
            consecutive_failures: 0,
            records: Vec::new(),
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Drive the state machine until every unit completes or `cancel` fires.
    ///
    /// Cancellation never writes a record for the unit in flight.
    pub async fn run(mut self, cancel: &CancellationToken) -> Result<MonitorOutcome, MonitorError> {
        loop {
            match self.state {
                MonitorState::AwaitingBaseline => {
                    let reading = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(self.interrupted(1)),
                        reading = self.counters.read_counters() => reading,
                    };
                    let baseline = Baseline::from(reading.map_err(MonitorError::Baseline)?);
                    info!(
                        "Initial baseline counts read: Routes={}, Mappings={}",
                        baseline.routes, baseline.mappings
                    );

                    self.baseline = Some(baseline);
                    self.unit_started = Instant::now();
                    self.state = if self.session.total_units == 0 {
                        MonitorState::Done
                    } else {
                        MonitorState::AwaitingUnit { cursor: 1 }
                    };
                }
                MonitorState::AwaitingUnit { cursor } => {
                    let polled = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(self.interrupted(cursor)),
                        polled = self.counters.read_counters() => polled,
                    };

                    if self.evaluate(cursor, polled)? {
                        self.state = MonitorState::Draining { cursor };
                        continue;
                    }
                    if !self.wait_tick(cancel).await {
                        return Ok(self.interrupted(cursor));
                    }
                }
                MonitorState::Draining { cursor } => {
                    self.complete_unit(cursor).await?;

                    if cursor >= self.session.total_units {
                        self.state = MonitorState::Done;
                        continue;
                    }

                    let next = cursor + 1;
                    self.state = MonitorState::AwaitingUnit { cursor: next };
                    info!("Now monitoring for ENI {}...", next);

                    if !self.wait_tick(cancel).await {
                        return Ok(self.interrupted(next));
                    }
                }
                MonitorState::Done => {
                    info!("All ENIs processed");
                    return Ok(MonitorOutcome {
                        status: RunStatus::Completed,
                        baseline: self.baseline,
                        records: self.records,
                    });
                }
            }
        }
    }

    /// Judge one poll result. Returns `true` if the unit's target is met.
    fn evaluate(
        &mut self,
        cursor: u32,
        polled: Result<CounterReading, CounterError>,
    ) -> Result<bool, MonitorError> {
        let reading = match polled {
            Ok(reading) => {
                self.consecutive_failures = 0;
                reading
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                debug!(
                    failures = self.consecutive_failures,
                    "Counter poll failed, retrying: {}", e
                );
                if let Some(max) = self.session.max_poll_failures {
                    if self.consecutive_failures >= max {
                        warn!("Counter poll failed {} times in a row", max);
                        return Err(MonitorError::PollFailures {
                            unit: cursor,
                            attempts: self.consecutive_failures,
                            last: e,
                        });
                    }
                }
                return Ok(false);
            }
        };

        // The baseline is always set once we are past AwaitingBaseline.
        let Some(baseline) = self.baseline else {
            return Ok(false);
        };
        let delta = baseline.delta(&reading);
        let target = UnitTarget::for_unit(&self.session, cursor);
        debug!(
            unit = cursor,
            routes = delta.routes,
            mappings = delta.mappings,
            expected_routes = target.routes,
            expected_mappings = target.mappings,
            "polled counters"
        );

        Ok(target.is_met(&delta))
    }

    /// Drain the samples for `cursor`, persist its record, and start the next unit's clock.
    async fn complete_unit(&mut self, cursor: u32) -> Result<(), MonitorError> {
        let elapsed = self.unit_started.elapsed();
        let sample_secs = if cursor >= self.session.total_units {
            self.progress.drain()
        } else {
            self.progress.drain_and_advance(cursor + 1)
        };

        let record = CompletionRecord {
            unit: cursor,
            elapsed,
            sample_secs,
        };
        self.summary.record(&record).await?;
        info!(
            "ENI {} completed. Processing Time: {:.2}s | Bulk 'took' Time: {:.3}s",
            cursor,
            elapsed.as_secs_f64(),
            sample_secs
        );

        self.records.push(record);
        self.unit_started = Instant::now();
        Ok(())
    }

    /// Sleep one poll interval. Returns `false` if cancelled meanwhile.
    async fn wait_tick(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.session.poll_interval()) => true,
        }
    }

    fn interrupted(self, unit: u32) -> MonitorOutcome {
        info!("Stopped while waiting for ENI {}, no record written for it", unit);
        MonitorOutcome {
            status: RunStatus::Interrupted { unit },
            baseline: self.baseline,
            records: self.records,
        }
    }
}
