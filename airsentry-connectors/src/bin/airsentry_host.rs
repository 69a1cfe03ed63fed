//! Run AirSentry duty cycles on a host machine
//!
//! ```bash
//! # Cycle forever, sleeping between cycles
//! airsentry-host host.json
//!
//! # One cycle; exit status tells whether telemetry was delivered
//! airsentry-host host.json --once
//! ```
//!
//! Logging follows `RUST_LOG` (default `info`). A `udp_log` section in the
//! configuration also sends every record over UDP.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use airsentry_connectors::{udp_log, HostConfig, RumqttConnector, SleepController};
use airsentry_core::{CycleOutcome, DutyCycleScheduler};

#[derive(Parser, Debug)]
#[command(name = "airsentry-host")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run AirSentry duty cycles against a real broker with bench sensors")]
struct Cli {
    /// Host configuration file (JSON)
    config: PathBuf,

    /// Run a single cycle and exit with its outcome
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = HostConfig::from_json_file(&cli.config);
    let udp = loaded.as_ref().ok().and_then(|host| host.udp_log.as_ref());
    if let Err(e) = udp_log::init(udp) {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }

    let host = match loaded {
        Ok(host) => host,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let base = cli.config.parent().unwrap_or_else(|| Path::new("."));

    let mut power = SleepController::default();
    loop {
        // Every cycle starts from scratch, as after a real resume
        let credentials = match host.credentials.load(base) {
            Ok(credentials) => credentials,
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        };
        let scheduler = match DutyCycleScheduler::new(host.device.clone(), credentials, RumqttConnector::new()) {
            Ok(scheduler) => scheduler,
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        };

        let sensors = host.bench.sensor_suite();
        if cli.once {
            let report = scheduler.run(sensors).await;
            info!("single cycle done in {:?}", report.elapsed);
            return match report.outcome {
                CycleOutcome::Published { .. } => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }

        let report = scheduler.run_and_suspend(sensors, &mut power).await;
        info!("cycle {} ended: {:?}", power.suspensions(), report.outcome);
    }
}
