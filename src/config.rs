//! Monitor settings.
//!
//! Settings are layered: built-in defaults, then an optional TOML file,
//! then `ENI_WATCH_*` environment variables, then command-line overrides.
//!
//! ```toml
//! [session]
//! total_units = 64
//! routes_per_unit = 100000
//! mappings_per_unit = 125000
//! poll_interval_secs = 1.0
//!
//! [harvest]
//! log_path = "/var/log/syslog"
//! marker = "Ram Test"
//! ```
//!
//! Environment variables use `__` between section and key, e.g.
//! `ENI_WATCH_SESSION__TOTAL_UNITS=8`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use regex::Regex;
use serde::Deserialize;

use crate::error::SettingsError;

const ENV_PREFIX: &str = "ENI_WATCH";

/// Immutable parameters of one monitoring run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MonitorSession {
    /// Number of units (ENIs) to wait for.
    pub total_units: u32,
    /// Route counter increase expected per unit.
    pub routes_per_unit: u64,
    /// Mapping counter increase expected per unit.
    pub mappings_per_unit: u64,
    /// Seconds between counter polls.
    pub poll_interval_secs: f64,
    /// Consecutive failed polls that end the run. Unbounded if unset; 0 is rejected.
    #[serde(default)]
    pub max_poll_failures: Option<u32>,
}

impl MonitorSession {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }
}

impl Default for MonitorSession {
    fn default() -> Self {
        Self {
            total_units: 64,
            routes_per_unit: 100_000,
            mappings_per_unit: 125_000,
            poll_interval_secs: 1.0,
            max_poll_failures: None,
        }
    }
}

/// Output file locations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogPaths {
    /// Tagged copy of every matching log line.
    pub detail: PathBuf,
    /// One completion line per unit.
    pub summary: PathBuf,
}

/// Log harvesting parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HarvestSettings {
    /// The live log to follow.
    pub log_path: PathBuf,
    /// Substring that selects lines of interest.
    pub marker: String,
    /// Pattern whose first capture group is a duration in seconds.
    pub duration_pattern: String,
    /// Pause before reattaching after the stream ends.
    pub reattach_delay_secs: f64,
}

impl HarvestSettings {
    pub fn reattach_delay(&self) -> Duration {
        Duration::from_secs_f64(self.reattach_delay_secs)
    }
}

/// Counter query parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CounterSettings {
    pub command: String,
    pub database: String,
    pub table: String,
    pub routes_field: String,
    pub mappings_field: String,
    pub timeout_secs: f64,
}

impl CounterSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }
}

/// All settings for a run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub session: MonitorSession,
    pub logs: LogPaths,
    pub harvest: HarvestSettings,
    pub counters: CounterSettings,
}

/// Values given on the command line. `None` leaves lower layers in place.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub total_units: Option<u32>,
    pub routes_per_unit: Option<u64>,
    pub mappings_per_unit: Option<u64>,
    pub poll_interval_secs: Option<f64>,
    pub max_poll_failures: Option<u32>,
    pub log_path: Option<PathBuf>,
    pub marker: Option<String>,
    pub detail_log: Option<PathBuf>,
    pub summary_log: Option<PathBuf>,
}

impl Settings {
    /// Load settings from all layers.
    pub fn load(file: Option<&Path>, overrides: &Overrides) -> Result<Self, SettingsError> {
        Self::load_with_env(file, overrides, true)
    }

    /// Load settings, optionally skipping the environment layer.
    pub fn load_with_env(
        file: Option<&Path>,
        overrides: &Overrides,
        use_env: bool,
    ) -> Result<Self, SettingsError> {
        let session = MonitorSession::default();

        let mut builder = Config::builder()
            .set_default("session.total_units", i64::from(session.total_units))?
            .set_default("session.routes_per_unit", session.routes_per_unit as i64)?
            .set_default("session.mappings_per_unit", session.mappings_per_unit as i64)?
            .set_default("session.poll_interval_secs", session.poll_interval_secs)?
            .set_default("logs.detail", "ram_test.log")?
            .set_default("logs.summary", "eni_summary.log")?
            .set_default("harvest.log_path", "/var/log/syslog")?
            .set_default("harvest.marker", "Ram Test")?
            .set_default("harvest.duration_pattern", r"took ([0-9.]+) seconds$")?
            .set_default("harvest.reattach_delay_secs", 1.0)?
            .set_default("counters.command", "sonic-db-cli")?
            .set_default("counters.database", "COUNTERS_DB")?
            .set_default("counters.table", "CRM:STATS")?
            .set_default(
                "counters.routes_field",
                "crm_stats_dash_ipv4_outbound_routing_used",
            )?
            .set_default(
                "counters.mappings_field",
                "crm_stats_dash_ipv4_outbound_ca_to_pa_used",
            )?
            .set_default("counters.timeout_secs", 5.0)?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path));
        }
        if use_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let settings: Settings = builder
            .set_override_option("session.total_units", overrides.total_units.map(i64::from))?
            .set_override_option(
                "session.routes_per_unit",
                overrides.routes_per_unit.map(|v| v as i64),
            )?
            .set_override_option(
                "session.mappings_per_unit",
                overrides.mappings_per_unit.map(|v| v as i64),
            )?
            .set_override_option("session.poll_interval_secs", overrides.poll_interval_secs)?
            .set_override_option(
                "session.max_poll_failures",
                overrides.max_poll_failures.map(i64::from),
            )?
            .set_override_option("harvest.log_path", path_override(&overrides.log_path))?
            .set_override_option("harvest.marker", overrides.marker.clone())?
            .set_override_option("logs.detail", path_override(&overrides.detail_log))?
            .set_override_option("logs.summary", path_override(&overrides.summary_log))?
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check values that deserialize fine but cannot be used.
    pub fn validate(&self) -> Result<(), SettingsError> {
        positive_secs("session.poll_interval_secs", self.session.poll_interval_secs)?;
        positive_secs("harvest.reattach_delay_secs", self.harvest.reattach_delay_secs)?;
        positive_secs("counters.timeout_secs", self.counters.timeout_secs)?;

        if self.session.max_poll_failures == Some(0) {
            return Err(SettingsError::Invalid {
                key: "session.max_poll_failures",
                reason: "must be at least 1, or unset for no limit".to_string(),
            });
        }

        if self.harvest.marker.is_empty() {
            return Err(SettingsError::Invalid {
                key: "harvest.marker",
                reason: "must not be empty".to_string(),
            });
        }

        let pattern =
            Regex::new(&self.harvest.duration_pattern).map_err(|e| SettingsError::Invalid {
                key: "harvest.duration_pattern",
                reason: e.to_string(),
            })?;
        if pattern.captures_len() < 2 {
            return Err(SettingsError::Invalid {
                key: "harvest.duration_pattern",
                reason: "needs a capture group for the duration".to_string(),
            });
        }

        Ok(())
    }
}

fn path_override(path: &Option<PathBuf>) -> Option<String> {
    path.as_ref().map(|p| p.to_string_lossy().into_owned())
}

fn positive_secs(key: &'static str, secs: f64) -> Result<(), SettingsError> {
    let invalid = |reason: String| SettingsError::Invalid { key, reason };

    if secs.is_nan() || secs <= 0.0 {
        return Err(invalid(format!(
            "expected a positive number of seconds, got {}",
            secs
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map(|_| ())
        .map_err(|e| invalid(format!("{} seconds is out of range: {}", secs, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn load(file: Option<&Path>, overrides: &Overrides) -> Result<Settings, SettingsError> {
        Settings::load_with_env(file, overrides, false)
    }

    #[test]
    fn test_defaults() {
        let settings = load(None, &Overrides::default()).unwrap();

        assert_eq!(settings.session, MonitorSession::default());
        assert_eq!(settings.logs.detail, PathBuf::from("ram_test.log"));
        assert_eq!(settings.logs.summary, PathBuf::from("eni_summary.log"));
        assert_eq!(settings.harvest.log_path, PathBuf::from("/var/log/syslog"));
        assert_eq!(settings.harvest.marker, "Ram Test");
        assert_eq!(settings.counters.command, "sonic-db-cli");
        assert_eq!(settings.session.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_file_layer_then_overrides() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[session]
total_units = 8
routes_per_unit = 10
poll_interval_secs = 0.25
max_poll_failures = 30

[harvest]
marker = "Bulk Sync"
"#
        )
        .unwrap();

        let overrides = Overrides {
            total_units: Some(2),
            summary_log: Some(PathBuf::from("/tmp/summary.log")),
            ..Overrides::default()
        };
        let settings = load(Some(file.path()), &overrides).unwrap();

        assert_eq!(settings.session.total_units, 2);
        assert_eq!(settings.session.routes_per_unit, 10);
        assert_eq!(settings.session.mappings_per_unit, 125_000);
        assert_eq!(settings.session.poll_interval(), Duration::from_millis(250));
        assert_eq!(settings.session.max_poll_failures, Some(30));
        assert_eq!(settings.harvest.marker, "Bulk Sync");
        assert_eq!(settings.logs.summary, PathBuf::from("/tmp/summary.log"));
    }

    #[test]
    fn test_rejects_non_positive_interval() {
        let overrides = Overrides {
            poll_interval_secs: Some(0.0),
            ..Overrides::default()
        };
        let err = load(None, &overrides).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Invalid {
                key: "session.poll_interval_secs",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_out_of_range_interval() {
        for secs in [1e20, f64::INFINITY, f64::NAN] {
            let overrides = Overrides {
                poll_interval_secs: Some(secs),
                ..Overrides::default()
            };
            let err = load(None, &overrides).unwrap_err();
            assert!(
                matches!(
                    err,
                    SettingsError::Invalid {
                        key: "session.poll_interval_secs",
                        ..
                    }
                ),
                "{} was accepted",
                secs
            );
        }
    }

    #[test]
    fn test_rejects_out_of_range_timeout() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "[counters]\ntimeout_secs = 1e30").unwrap();

        let err = load(Some(file.path()), &Overrides::default()).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Invalid {
                key: "counters.timeout_secs",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_zero_poll_failures() {
        let overrides = Overrides {
            max_poll_failures: Some(0),
            ..Overrides::default()
        };
        assert!(matches!(
            load(None, &overrides),
            Err(SettingsError::Invalid {
                key: "session.max_poll_failures",
                ..
            })
        ));

        let overrides = Overrides {
            max_poll_failures: Some(1),
            ..Overrides::default()
        };
        assert_eq!(
            load(None, &overrides).unwrap().session.max_poll_failures,
            Some(1)
        );
    }

    #[test]
    fn test_rejects_empty_marker() {
        let overrides = Overrides {
            marker: Some(String::new()),
            ..Overrides::default()
        };
        assert!(matches!(
            load(None, &overrides),
            Err(SettingsError::Invalid {
                key: "harvest.marker",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_pattern_without_capture() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "[harvest]\nduration_pattern = \"took seconds\"").unwrap();

        let err = load(Some(file.path()), &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("capture group"));
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let err = load(
            Some(Path::new("/nonexistent/eni-watch.toml")),
            &Overrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SettingsError::Load(_)));
    }
}
