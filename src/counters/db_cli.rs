//! Counter source backed by a database CLI.
//!
//! Runs `<command> <database> HGET <table> <field>` once per counter, the
//! way `sonic-db-cli COUNTERS_DB HGET CRM:STATS <field>` is queried by hand.
//! The command is executed directly, not through a shell.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::trace;

use super::{CounterReading, CounterSource};
use crate::config::CounterSettings;
use crate::error::CounterError;

const DEFAULT_COMMAND: &str = "sonic-db-cli";
const DEFAULT_DATABASE: &str = "COUNTERS_DB";
const DEFAULT_TABLE: &str = "CRM:STATS";
const DEFAULT_ROUTES_FIELD: &str = "crm_stats_dash_ipv4_outbound_routing_used";
const DEFAULT_MAPPINGS_FIELD: &str = "crm_stats_dash_ipv4_outbound_ca_to_pa_used";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Counter source that shells out to a key-value database CLI.
#[derive(Debug, Clone)]
pub struct DbCliCounterSource {
    command: String,
    database: String,
    table: String,
    routes_field: String,
    mappings_field: String,
    timeout: Duration,
    description: String,
}

impl DbCliCounterSource {
    /// Create a new builder for configuring the source.
    pub fn builder() -> DbCliCounterSourceBuilder {
        DbCliCounterSourceBuilder::default()
    }

    /// Build a source from loaded settings.
    pub fn from_settings(settings: &CounterSettings) -> Self {
        Self::builder()
            .command(&settings.command)
            .database(&settings.database)
            .table(&settings.table)
            .routes_field(&settings.routes_field)
            .mappings_field(&settings.mappings_field)
            .timeout(settings.timeout())
            .build()
    }

    async fn query(&self, field: &str) -> Result<u64, CounterError> {
        let mut command = Command::new(&self.command);
        command
            .args([self.database.as_str(), "HGET", self.table.as_str(), field])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| CounterError::Timeout {
                field: field.to_string(),
            })?
            .map_err(|source| CounterError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CounterError::ExitStatus {
                command: self.command.clone(),
                status: output.status.to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        trace!(field = %field, output = %stdout.trim(), "counter query answered");
        parse_counter(field, &stdout)
    }
}

#[async_trait]
impl CounterSource for DbCliCounterSource {
    async fn read_counters(&self) -> Result<CounterReading, CounterError> {
        let routes = self.query(&self.routes_field).await?;
        let mappings = self.query(&self.mappings_field).await?;
        Ok(CounterReading { routes, mappings })
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Parse the CLI's answer for a single field.
///
/// The CLI prints the bare value followed by a newline. An absent key comes
/// back as an empty line, which is a parse failure like any other.
fn parse_counter(field: &str, output: &str) -> Result<u64, CounterError> {
    output.trim().parse().map_err(|_| CounterError::Parse {
        field: field.to_string(),
        output: output.trim().to_string(),
    })
}

/// Builder for [`DbCliCounterSource`].
#[derive(Debug, Clone)]
pub struct DbCliCounterSourceBuilder {
    command: String,
    database: String,
    table: String,
    routes_field: String,
    mappings_field: String,
    timeout: Duration,
}

impl Default for DbCliCounterSourceBuilder {
    fn default() -> Self {
        Self {
            command: DEFAULT_COMMAND.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            table: DEFAULT_TABLE.to_string(),
            routes_field: DEFAULT_ROUTES_FIELD.to_string(),
            mappings_field: DEFAULT_MAPPINGS_FIELD.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl DbCliCounterSourceBuilder {
    /// Set the CLI binary to run.
    pub fn command(mut self, command: &str) -> Self {
        self.command = command.to_string();
        self
    }

    /// Set the database name passed as the first argument.
    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    /// Set the hash key holding the counters.
    pub fn table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    /// Set the field read for the routes counter.
    pub fn routes_field(mut self, field: &str) -> Self {
        self.routes_field = field.to_string();
        self
    }

    /// Set the field read for the mappings counter.
    pub fn mappings_field(mut self, field: &str) -> Self {
        self.mappings_field = field.to_string();
        self
    }

    /// Set the per-query timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the source.
    pub fn build(self) -> DbCliCounterSource {
        let description = format!("{} {} HGET {}", self.command, self.database, self.table);
        DbCliCounterSource {
            command: self.command,
            database: self.database,
            table: self.table,
            routes_field: self.routes_field,
            mappings_field: self.mappings_field,
            timeout: self.timeout,
            description,
        }
    }
}
