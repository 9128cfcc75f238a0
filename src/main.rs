use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use eni_watch::{logging, shutdown_signal, Overrides, RunReport, RunStatus, Runner, Settings};

#[derive(Parser, Debug)]
#[command(name = "eni-watch")]
#[command(about = "Polls CRM counters to time ENI processing on a DPU")]
struct Args {
    /// Total number of ENIs to monitor [default: 64]
    #[arg(short = 't', long)]
    total_enis: Option<u32>,

    /// Routes expected per ENI [default: 100000]
    #[arg(short, long)]
    routes: Option<u64>,

    /// Mappings expected per ENI [default: 125000]
    #[arg(short, long)]
    mappings: Option<u64>,

    /// Seconds between counter checks [default: 1.0]
    #[arg(long)]
    poll_interval: Option<f64>,

    /// Give up after this many consecutive failed counter polls
    #[arg(long)]
    max_poll_failures: Option<u32>,

    /// Settings file (TOML, YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log to follow for timing samples [default: /var/log/syslog]
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Substring selecting the log lines of interest [default: "Ram Test"]
    #[arg(long)]
    marker: Option<String>,

    /// Where tagged log lines are written [default: ram_test.log]
    #[arg(long)]
    detail_log: Option<PathBuf>,

    /// Where completion lines are written [default: eni_summary.log]
    #[arg(long)]
    summary_log: Option<PathBuf>,

    /// Write the run outcome as JSON to this file when the run ends
    #[arg(short, long)]
    export: Option<PathBuf>,

    /// Diagnostic log level, used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            total_units: self.total_enis,
            routes_per_unit: self.routes,
            mappings_per_unit: self.mappings,
            poll_interval_secs: self.poll_interval,
            max_poll_failures: self.max_poll_failures,
            log_path: self.log_file.clone(),
            marker: self.marker.clone(),
            detail_log: self.detail_log.clone(),
            summary_log: self.summary_log.clone(),
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = logging::init(&args.log_level) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let settings = Settings::load(args.config.as_deref(), &args.overrides())
        .context("Failed to load settings")?;

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(Runner::from_settings(settings).run_until(shutdown_signal()))?;

    match report.outcome.status {
        RunStatus::Completed => info!("Script finished"),
        RunStatus::Interrupted { unit } => {
            info!("Interrupted while monitoring ENI {}, exiting", unit)
        }
    }

    if let Some(path) = &args.export {
        export_to_file(&report, path)?;
    }
    Ok(())
}

fn export_to_file(report: &RunReport, export_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    let mut file = std::fs::File::create(export_path)
        .with_context(|| format!("Failed to create {}", export_path.display()))?;
    file.write_all(json.as_bytes())?;

    println!("Exported run outcome to: {}", export_path.display());
    Ok(())
}
