//! # eni-watch
//!
//! Watches a DPU while ENIs are pushed to it and records how long each one
//! took to be fully processed.
//!
//! Completion is judged from two cumulative CRM counters (outbound routes
//! and CA-to-PA mappings) measured against a baseline captured at startup.
//! Alongside the counters, a background task follows the system log, keeps
//! every line carrying the test marker, and sums the `took <n> seconds`
//! durations reported while each ENI is in flight.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           runner                             │
//! │  ┌───────────┐   observe   ┌──────────┐  drain   ┌─────────┐ │
//! │  │ harvest   │────────────▶│ progress │◀─────────│ monitor │ │
//! │  │ (task)    │◀── cursor ──│ (shared) │─advance─▶│ (loop)  │ │
//! │  └─────┬─────┘             └──────────┘          └────┬────┘ │
//! │        │                                              │      │
//! │        ▼                                              ▼      │
//! │  ┌───────────┐                                 ┌──────────┐  │
//! │  │ source    │◀── FollowSource | ReaderSource  │ counters │  │
//! │  │ (lines)   │    | ChannelSource              │ (db cli) │  │
//! │  └───────────┘                                 └──────────┘  │
//! │        detail log                              summary log   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`monitor`]**: the completion state machine, thresholds, and records
//! - **[`harvest`]**: marker matching, duration extraction, and the
//!   reattaching background harvester
//! - **[`progress`]**: the sample sum and unit cursor shared by both tasks
//! - **[`counters`]**: the [`CounterSource`] trait and its implementations
//! - **[`source`]**: the [`LineSource`] trait for log lines
//! - **[`config`]**: layered settings (defaults, file, environment, CLI)
//!
//! ## Usage
//!
//! ### As a CLI tool
//!
//! ```bash
//! # 64 ENIs with the default per-ENI counts
//! eni-watch
//!
//! # 8 ENIs, 5000 routes and 6000 mappings each, polling twice a second
//! eni-watch -t 8 -r 5000 -m 6000 --poll-interval 0.5
//! ```
//!
//! ### As a library
//!
//! ```no_run
//! use std::sync::Arc;
//! use eni_watch::{
//!     ChannelSource, CounterReading, Overrides, Runner, ScriptedCounterSource, Settings,
//! };
//!
//! # tokio_test::block_on(async {
//! let overrides = Overrides {
//!     total_units: Some(1),
//!     ..Overrides::default()
//! };
//! let settings = Settings::load(None, &overrides).unwrap();
//! let counters = ScriptedCounterSource::new(vec![Ok(CounterReading::new(0, 0))]);
//! let (_tx, lines) = ChannelSource::create("test");
//!
//! let report = Runner::new(settings, Arc::new(counters), Arc::new(lines))
//!     .run_until(std::future::pending())
//!     .await;
//! # });
//! ```

pub mod config;
pub mod counters;
pub mod error;
pub mod harvest;
pub mod logging;
pub mod monitor;
pub mod progress;
pub mod record;
pub mod runner;
pub mod source;

// Re-export main types for convenience
pub use config::{MonitorSession, Overrides, Settings};
pub use counters::{CounterReading, CounterSource, DbCliCounterSource, ScriptedCounterSource};
pub use error::{CounterError, MonitorError, SettingsError, SourceError};
pub use harvest::{HarvestStats, Harvester, SampleMatcher};
pub use monitor::{CompletionMonitor, MonitorOutcome, RunStatus};
pub use progress::SharedProgress;
pub use record::{CompletionRecord, DetailLog, SummaryLog};
pub use runner::{shutdown_signal, RunReport, Runner};
pub use source::{ChannelSource, FollowSource, LineSource, LineStream, ReaderSource};
