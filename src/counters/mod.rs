//! Counter source abstraction for reading the device's resource counters.
//!
//! The monitor only needs two cumulative counters: programmed routes and
//! programmed CA-to-PA mappings. This module hides how they are fetched
//! behind the [`CounterSource`] trait.

mod db_cli;
mod scripted;

pub use db_cli::{DbCliCounterSource, DbCliCounterSourceBuilder};
pub use scripted::ScriptedCounterSource;

use std::fmt::Debug;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::CounterError;

/// A single reading of both counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterReading {
    pub routes: u64,
    pub mappings: u64,
}

impl CounterReading {
    pub fn new(routes: u64, mappings: u64) -> Self {
        Self { routes, mappings }
    }
}

/// Trait for querying the device counters.
///
/// Every call is an independent query. Failures are expected to be common
/// and transient; callers decide whether a failure is fatal.
///
/// # Example
///
/// ```
/// use eni_watch::{CounterReading, CounterSource, ScriptedCounterSource};
///
/// # tokio_test::block_on(async {
/// let source = ScriptedCounterSource::new(vec![Ok(CounterReading::new(10, 5))]);
/// let reading = source.read_counters().await.unwrap();
/// assert_eq!(reading.routes, 10);
/// # });
/// ```
#[async_trait]
pub trait CounterSource: Send + Sync + Debug {
    /// Query the current value of both counters.
    async fn read_counters(&self) -> Result<CounterReading, CounterError>;

    /// Returns a human-readable description of the source.
    fn description(&self) -> &str;
}
