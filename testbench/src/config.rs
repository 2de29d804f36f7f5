//! Scenario configuration
//!
//! A scenario describes the allocation, the DM-RS configuration, the
//! synthetic channel and the receiver settings of a testbench run. It is
//! read from a YAML or TOML file; every field has a default, so an empty
//! file is a valid scenario.

use anyhow::{anyhow, Context, Result};
use common::types::SubcarrierSpacing;
use phy::dmrs::MAX_DMRS_PORTS;
use phy::{EqualizerCriterion, FdSmoothing, TdInterpolation};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Testbench scenario
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    /// Resource grid width in PRBs
    #[serde(default = "default_grid_prb")]
    pub grid_prb: usize,
    /// Subcarrier spacing in kHz (15 or 30)
    #[serde(default = "default_scs_khz")]
    pub scs_khz: u32,
    /// Number of receive ports
    #[serde(default = "default_nof_rx_ports")]
    pub nof_rx_ports: usize,
    /// Number of slots to simulate
    #[serde(default = "default_slots")]
    pub slots: u32,
    /// Seed of the channel and data generator
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Allocation
    #[serde(default)]
    pub pusch: PuschConfig,
    /// Synthetic channel
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Receiver settings
    #[serde(default)]
    pub receiver: ReceiverConfig,
}

fn default_grid_prb() -> usize {
    52
}

fn default_scs_khz() -> u32 {
    15
}

fn default_nof_rx_ports() -> usize {
    2
}

fn default_slots() -> u32 {
    4
}

fn default_seed() -> u64 {
    1
}

/// PUSCH allocation and DM-RS configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PuschConfig {
    /// First allocated PRB
    pub start_prb: usize,
    /// Number of allocated PRBs (per hop)
    pub nof_prb: usize,
    /// First PRB of the second hop; no hopping if absent
    pub second_hop_prb: Option<usize>,
    /// DM-RS symbols within the slot
    pub dmrs_symbols: Vec<usize>,
    /// Number of transmit layers, up to four
    pub nof_layers: usize,
    /// DM-RS configuration type (1 or 2)
    pub dmrs_type: u8,
    /// CDM group carrying the DM-RS of layers 0 and 1; layers 2 and 3 use
    /// the next one
    pub cdm_group: u8,
    /// DM-RS scrambling identity
    pub n_id: u16,
    /// DM-RS amplitude relative to data
    pub beta_dmrs: f64,
    /// Data amplitude, removed again by the equalizer
    pub tx_scaling: f64,
}

impl Default for PuschConfig {
    fn default() -> Self {
        Self {
            start_prb: 0,
            nof_prb: 52,
            second_hop_prb: None,
            dmrs_symbols: vec![2, 11],
            nof_layers: 1,
            dmrs_type: 1,
            cdm_group: 0,
            n_id: 1,
            beta_dmrs: std::f64::consts::SQRT_2,
            tx_scaling: 1.0,
        }
    }
}

/// Per-port channel applied to the transmitted grid
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Signal to noise ratio per RE, in dB
    pub snr_db: f64,
    /// Propagation delay in nanoseconds
    pub delay_ns: f64,
    /// Carrier frequency offset in Hz
    pub cfo_hz: f64,
    /// Random phase per port and slot
    pub random_phase: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            snr_db: 20.0,
            delay_ns: 0.0,
            cfo_hz: 0.0,
            random_phase: true,
        }
    }
}

/// Channel estimator and equalizer settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Frequency-domain smoothing: none, mean or filter
    pub smoothing: String,
    /// Time-domain filling: average or interpolate
    pub td_interpolation: String,
    /// Equalization criterion: ZF or MMSE
    pub criterion: String,
    /// Compensate the estimated CFO
    pub compensate_cfo: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            smoothing: "filter".to_string(),
            td_interpolation: "average".to_string(),
            criterion: "MMSE".to_string(),
            compensate_cfo: true,
        }
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            grid_prb: default_grid_prb(),
            scs_khz: default_scs_khz(),
            nof_rx_ports: default_nof_rx_ports(),
            slots: default_slots(),
            seed: default_seed(),
            pusch: PuschConfig::default(),
            channel: ChannelConfig::default(),
            receiver: ReceiverConfig::default(),
        }
    }
}

impl ScenarioConfig {
    /// Load a scenario from a `.yml`, `.yaml` or `.toml` file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read scenario file {}", path.display()))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yml") | Some("yaml") => Self::from_yaml_str(&contents),
            Some("toml") => Self::from_toml_str(&contents),
            _ => Err(anyhow!("Unknown scenario file format: {}", path.display())),
        }
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn subcarrier_spacing(&self) -> Result<SubcarrierSpacing> {
        SubcarrierSpacing::from_khz(self.scs_khz).ok_or_else(|| anyhow!("Invalid subcarrier spacing: {} kHz", self.scs_khz))
    }

    pub fn smoothing(&self) -> Result<FdSmoothing> {
        Ok(self.receiver.smoothing.parse()?)
    }

    pub fn td_interpolation(&self) -> Result<TdInterpolation> {
        Ok(self.receiver.td_interpolation.parse()?)
    }

    pub fn criterion(&self) -> Result<EqualizerCriterion> {
        Ok(self.receiver.criterion.parse()?)
    }

    /// Check the scenario before any slot is simulated
    pub fn validate(&self) -> Result<()> {
        if self.grid_prb == 0 || self.nof_rx_ports == 0 || self.slots == 0 {
            return Err(anyhow!("Grid PRBs, Rx ports and slots must be non-zero"));
        }
        self.subcarrier_spacing()?;
        self.smoothing()?;
        self.td_interpolation()?;
        self.criterion()?;

        let pusch = &self.pusch;
        if pusch.nof_layers == 0 || pusch.nof_layers > MAX_DMRS_PORTS {
            return Err(anyhow!("{} layers, between 1 and {} supported", pusch.nof_layers, MAX_DMRS_PORTS));
        }
        if pusch.nof_layers > self.nof_rx_ports {
            return Err(anyhow!(
                "{} layers cannot be separated with {} Rx ports",
                pusch.nof_layers,
                self.nof_rx_ports
            ));
        }
        if pusch.nof_prb == 0 {
            return Err(anyhow!("Empty PUSCH allocation"));
        }
        for start in std::iter::once(pusch.start_prb).chain(pusch.second_hop_prb) {
            if start + pusch.nof_prb > self.grid_prb {
                return Err(anyhow!(
                    "Allocation {}+{} exceeds the {} PRB grid",
                    start,
                    pusch.nof_prb,
                    self.grid_prb
                ));
            }
        }
        if pusch.dmrs_symbols.is_empty() {
            return Err(anyhow!("No DM-RS symbols"));
        }
        if pusch.beta_dmrs <= 0.0 || pusch.tx_scaling <= 0.0 {
            return Err(anyhow!("DM-RS and data amplitudes must be positive"));
        }
        Ok(())
    }
}
