//! Scripted counter source.
//!
//! Replays a fixed sequence of readings and failures, for exercising the
//! monitor without a device.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CounterReading, CounterSource};
use crate::error::CounterError;

/// A counter source that answers from a prepared script.
///
/// Each call pops the next entry. Once the script is exhausted every call
/// fails with [`CounterError::Unavailable`].
#[derive(Debug)]
pub struct ScriptedCounterSource {
    script: Mutex<VecDeque<Result<CounterReading, CounterError>>>,
    calls: Mutex<usize>,
}

impl ScriptedCounterSource {
    /// Create a source that will answer with `script`, in order.
    pub fn new(script: Vec<Result<CounterReading, CounterError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(0),
        }
    }

    /// Number of queries answered so far, including failures.
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }

    /// Number of entries not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl CounterSource for ScriptedCounterSource {
    async fn read_counters(&self) -> Result<CounterReading, CounterError> {
        *self.calls.lock() += 1;
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(CounterError::Unavailable("script exhausted".to_string())))
    }

    fn description(&self) -> &str {
        "scripted"
    }
}
