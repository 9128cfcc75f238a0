//! Error types for counter queries, line sources, and the monitor loop.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when querying the device counters.
///
/// All variants are treated as transient by the monitor once a baseline
/// has been captured.
#[derive(Debug, Error)]
pub enum CounterError {
    /// The query command could not be started.
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The query command exited unsuccessfully.
    #[error("`{command}` exited with {status}")]
    ExitStatus { command: String, status: String },

    /// The query returned something that is not a counter value.
    #[error("Failed to parse counter `{field}` from {output:?}")]
    Parse { field: String, output: String },

    /// The query did not answer within the configured timeout.
    #[error("Counter query for `{field}` timed out")]
    Timeout { field: String },

    /// No reading is available right now.
    #[error("Counters unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur when attaching to a line source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The follower process could not be started.
    #[error("Failed to spawn log follower for {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The source has been consumed and cannot be reopened.
    #[error("Line source closed: {0}")]
    Closed(String),
}

/// Errors that end a monitoring run early.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The baseline counters could not be read, so there is no reference point.
    #[error("Could not read baseline counters: {0}")]
    Baseline(#[source] CounterError),

    /// Too many consecutive polls failed while waiting for a unit.
    #[error("Giving up on ENI {unit} after {attempts} consecutive counter failures: {last}")]
    PollFailures {
        unit: u32,
        attempts: u32,
        #[source]
        last: CounterError,
    },

    /// Writing the summary log failed.
    #[error("Failed to write summary log: {0}")]
    SummaryLog(#[from] io::Error),

    /// An output log could not be created at startup.
    #[error("Failed to create {path}: {source}")]
    CreateLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The harvest settings could not be turned into a matcher.
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Errors raised while validating loaded settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The layered configuration could not be built or deserialized.
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    /// A value was loaded but is not usable.
    #[error("Invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}
