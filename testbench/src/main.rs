//! 5G NR Uplink PHY Testbench
//!
//! Synthesizes PUSCH slots through a configurable channel, runs the
//! multi-port channel estimator and the channel equalizer on them, and
//! reports the estimated metrics as JSON.

mod config;
mod scenario;

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use config::ScenarioConfig;
use scenario::{RunReport, Scenario};

/// Uplink PHY channel estimation and equalization testbench
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML or TOML scenario file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Number of slots to simulate
    #[arg(long)]
    slots: Option<u32>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Signal to noise ratio in dB
    #[arg(long)]
    snr_db: Option<f64>,

    /// Frequency-domain smoothing (none, mean, filter)
    #[arg(long)]
    smoothing: Option<String>,

    /// Time-domain filling (average, interpolate)
    #[arg(long)]
    td_interpolation: Option<String>,

    /// Number of transmit layers
    #[arg(long)]
    layers: Option<usize>,

    /// Equalization criterion (ZF, MMSE)
    #[arg(long)]
    criterion: Option<String>,

    /// Write the JSON report to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl Args {
    fn apply_overrides(&self, config: &mut ScenarioConfig) {
        if let Some(slots) = self.slots {
            config.slots = slots;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(snr_db) = self.snr_db {
            config.channel.snr_db = snr_db;
        }
        if let Some(smoothing) = &self.smoothing {
            config.receiver.smoothing = smoothing.clone();
        }
        if let Some(td_interpolation) = &self.td_interpolation {
            config.receiver.td_interpolation = td_interpolation.clone();
        }
        if let Some(layers) = self.layers {
            config.pusch.nof_layers = layers;
        }
        if let Some(criterion) = &self.criterion {
            config.receiver.criterion = criterion.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting uplink PHY testbench");

    let mut config = match &args.config {
        Some(path) => {
            info!("Scenario file: {}", path.display());
            ScenarioConfig::from_file(path)?
        }
        None => ScenarioConfig::default(),
    };
    args.apply_overrides(&mut config);

    let scenario = Arc::new(Scenario::new(config)?);
    let nof_slots = scenario.config().slots;

    // Slots are independent; process them on the blocking pool
    let handles: Vec<_> = (0..nof_slots)
        .map(|slot| {
            let scenario = scenario.clone();
            tokio::task::spawn_blocking(move || scenario.run_slot(slot))
        })
        .collect();

    let mut slots = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await? {
            Ok(report) => {
                info!(
                    "Slot {}: EVM {:.2}%, noise var {:.3e}, TA {:.3e}s, CFO {:?}Hz",
                    report.slot,
                    report.evm_percent,
                    report.global.noise_var,
                    report.global.time_alignment,
                    report.global.cfo_hz
                );
                slots.push(report);
            }
            Err(e) => {
                error!("Slot processing failed: {}", e);
                return Err(e);
            }
        }
    }

    let mean_evm_percent = slots.iter().map(|s| s.evm_percent).sum::<f64>() / slots.len() as f64;
    let report = RunReport {
        scenario: scenario.config().clone(),
        truth: scenario.truth(),
        slots,
        mean_evm_percent,
    };

    let json = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json).map_err(|e| anyhow!("Cannot write {}: {}", path.display(), e))?;
            info!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }

    info!("Testbench complete: mean EVM {:.2}%", mean_evm_percent);
    Ok(())
}
