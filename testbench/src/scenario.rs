//! Slot synthesis and processing
//!
//! Every slot carries up to four PUSCH layers: DM-RS on the configured
//! symbols and QPSK data on the remaining allocated symbols. The transmitted
//! layers go through a channel per receive port (complex gain per port and
//! layer, delay, CFO and AWGN). The receiver runs the multi-port channel
//! estimator on the DM-RS and equalizes the data with the estimated channel.

use crate::config::ScenarioConfig;
use anyhow::{anyhow, Result};
use common::utils::{db_to_linear, linear_to_db};
use ndarray::{Array2, Array3};
use num_complex::Complex64;
use phy::dmrs::{DmrsType, PuschDmrsGenerator};
use phy::resource_grid::{NRE, NSYMB_PER_SLOT};
use phy::{
    ChannelEqualizer, EstimatorConfig, HopConfig, MultiPortChannelEstimator, PortMetrics, ReMask, ResourceGrid,
    SlotTiming, SymbolMask,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::Serialize;
use std::f64::consts::{FRAC_1_SQRT_2, PI};
use tracing::{debug, info};

/// Symbol where the second hop starts
const HOP_BOUNDARY_SYMBOL: usize = NSYMB_PER_SLOT / 2;

/// Results of one slot
#[derive(Debug, Clone, Serialize)]
pub struct SlotReport {
    pub slot: u32,
    pub ports: Vec<PortMetrics>,
    pub global: PortMetrics,
    /// Error vector magnitude of the equalized data, in percent
    pub evm_percent: f64,
    /// Mean post-equalization noise variance, in dB
    pub eq_noise_var_db: f64,
}

/// Channel parameters actually applied, for comparison with the estimates
#[derive(Debug, Clone, Serialize)]
pub struct ChannelTruth {
    pub noise_var: f64,
    pub time_alignment: f64,
    pub cfo_hz: f64,
}

/// Report of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub scenario: ScenarioConfig,
    pub truth: ChannelTruth,
    pub slots: Vec<SlotReport>,
    pub mean_evm_percent: f64,
}

/// Received grid and the reference data of one slot
struct SlotData {
    grid: ResourceGrid,
    /// [pilot RE, DM-RS symbol, layer]
    pilots: Array3<Complex64>,
    data_res: Vec<(usize, usize)>,
    /// [RE, layer]
    data: Array2<Complex64>,
}

/// Prepared scenario, shared by all slots of a run
pub struct Scenario {
    config: ScenarioConfig,
    hop1: HopConfig,
    hop2: Option<HopConfig>,
    /// RE mask of layers 2 and 3
    second_re_mask: Option<ReMask>,
    timing: SlotTiming,
    dmrs: PuschDmrsGenerator,
    estimator: MultiPortChannelEstimator,
    equalizer: ChannelEqualizer,
}

impl Scenario {
    pub fn new(config: ScenarioConfig) -> Result<Self> {
        config.validate()?;
        let pusch = &config.pusch;

        let dmrs_type = match pusch.dmrs_type {
            1 => DmrsType::Type1,
            2 => DmrsType::Type2,
            other => return Err(anyhow!("Invalid DM-RS type: {}", other)),
        };
        let re_mask: ReMask = dmrs_type.re_mask(pusch.cdm_group)?;
        let second_re_mask = if pusch.nof_layers > 2 {
            Some(dmrs_type.re_mask((pusch.cdm_group + 1) % dmrs_type.nof_cdm_groups())?)
        } else {
            None
        };
        let dmrs_symbols = SymbolMask::from_symbols(&pusch.dmrs_symbols)?;
        let timing = SlotTiming::for_scs(config.subcarrier_spacing()?)?;

        let (hop1, hop2) = match pusch.second_hop_prb {
            None => (
                HopConfig::contiguous(config.grid_prb, pusch.start_prb, pusch.nof_prb, re_mask, dmrs_symbols, 0..NSYMB_PER_SLOT)?,
                None,
            ),
            Some(second) => {
                let first_half: Vec<usize> = dmrs_symbols.iter().filter(|&l| l < HOP_BOUNDARY_SYMBOL).collect();
                let second_half: Vec<usize> = dmrs_symbols.iter().filter(|&l| l >= HOP_BOUNDARY_SYMBOL).collect();
                if first_half.is_empty() || second_half.is_empty() {
                    return Err(anyhow!(
                        "Both hops need DM-RS, symbols {:?} split at symbol {}",
                        pusch.dmrs_symbols,
                        HOP_BOUNDARY_SYMBOL
                    ));
                }
                let hop1 = HopConfig::contiguous(
                    config.grid_prb,
                    pusch.start_prb,
                    pusch.nof_prb,
                    re_mask,
                    SymbolMask::from_symbols(&first_half)?,
                    0..HOP_BOUNDARY_SYMBOL,
                )?;
                let hop2 = HopConfig::contiguous(
                    config.grid_prb,
                    second,
                    pusch.nof_prb,
                    re_mask,
                    SymbolMask::from_symbols(&second_half)?,
                    HOP_BOUNDARY_SYMBOL..NSYMB_PER_SLOT,
                )?;
                (hop1, Some(hop2))
            }
        };

        let estimator = MultiPortChannelEstimator::new(EstimatorConfig {
            re_mask,
            second_cdm_re_mask: second_re_mask,
            dmrs_symbols,
            timing: timing.clone(),
            smoothing: config.smoothing()?,
            td_interpolation: config.td_interpolation()?,
            compensate_cfo: config.receiver.compensate_cfo,
        });
        let equalizer = ChannelEqualizer::new(config.criterion()?);

        info!(
            "Scenario: {} PRBs at {} kHz, {} layers, {} Rx ports, hopping {}, smoothing {}, {} in time, {}",
            pusch.nof_prb,
            config.scs_khz,
            pusch.nof_layers,
            config.nof_rx_ports,
            hop2.is_some(),
            config.receiver.smoothing,
            config.receiver.td_interpolation,
            equalizer.criterion()
        );

        Ok(Self {
            dmrs: PuschDmrsGenerator::new(pusch.n_id, false, dmrs_type),
            config,
            hop1,
            hop2,
            second_re_mask,
            timing,
            estimator,
            equalizer,
        })
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Parameters of the synthetic channel
    pub fn truth(&self) -> ChannelTruth {
        ChannelTruth {
            noise_var: db_to_linear(-self.config.channel.snr_db),
            time_alignment: self.config.channel.delay_ns * 1e-9,
            cfo_hz: self.config.channel.cfo_hz,
        }
    }

    fn hops(&self) -> Vec<&HopConfig> {
        std::iter::once(&self.hop1).chain(self.hop2.as_ref()).collect()
    }

    /// Synthesize and process one slot
    pub fn run_slot(&self, slot: u32) -> Result<SlotReport> {
        let slot_data = self.synthesize(slot)?;

        let estimate = self.estimator.estimate(
            &slot_data.grid,
            slot_data.pilots.view(),
            self.config.pusch.beta_dmrs,
            &self.hop1,
            self.hop2.as_ref(),
        )?;

        let rx = slot_data.grid.gather(&slot_data.data_res)?;
        let channel = estimate.re_channel(&slot_data.data_res);
        let equalized = self.equalizer.equalize(
            rx.view(),
            channel.view(),
            estimate.global.noise_var,
            self.config.pusch.tx_scaling,
        )?;

        let error: f64 = equalized
            .symbols
            .iter()
            .zip(slot_data.data.iter())
            .map(|(x, d)| (x - d).norm_sqr())
            .sum();
        let evm_percent = 100.0 * (error / slot_data.data.len() as f64).sqrt();
        let eq_noise_var_db = linear_to_db(equalized.noise_vars.mean().unwrap_or(0.0));

        debug!("Slot {}: EVM {:.2}%, equalized noise {:.1} dB", slot, evm_percent, eq_noise_var_db);

        Ok(SlotReport {
            slot,
            ports: estimate.ports,
            global: estimate.global,
            evm_percent,
            eq_noise_var_db,
        })
    }

    fn synthesize(&self, slot: u32) -> Result<SlotData> {
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(slot as u64));
        let hops = self.hops();
        let pusch = &self.config.pusch;
        let nof_subcarriers = self.config.grid_prb * NRE;

        let nof_layers = pusch.nof_layers;

        // Transmitted grid, [subcarrier, symbol, layer]
        let pilots = self.dmrs.generate_layers(slot, &hops, nof_layers)?;
        let mut tx: Array3<Complex64> = Array3::zeros((nof_subcarriers, NSYMB_PER_SLOT, nof_layers));
        let mut data_res = Vec::new();
        let mut data = Vec::new();
        let mut column = 0;
        for hop in &hops {
            for l in hop.dmrs_symbols.iter() {
                for layer in 0..nof_layers {
                    let subcarriers = match self.second_re_mask {
                        Some(re_mask) if layer >= 2 => hop.with_re_mask(re_mask).pilot_subcarriers(),
                        _ => hop.pilot_subcarriers(),
                    };
                    for (row, k) in subcarriers.into_iter().enumerate() {
                        tx[(k, l, layer)] = pilots[(row, column, layer)] * pusch.beta_dmrs;
                    }
                }
                column += 1;
            }
            for l in hop.symbols().filter(|&l| !hop.dmrs_symbols.contains(l)) {
                for k in hop.allocated_subcarriers() {
                    data_res.push((k, l));
                    for layer in 0..nof_layers {
                        let symbol = Complex64::new(qpsk_level(&mut rng), qpsk_level(&mut rng));
                        tx[(k, l, layer)] = symbol * pusch.tx_scaling;
                        data.push(symbol);
                    }
                }
            }
        }
        let data = Array2::from_shape_vec((data_res.len(), nof_layers), data)?;

        let channel = &self.config.channel;
        let truth = self.truth();
        let noise = Normal::new(0.0, (truth.noise_var / 2.0).sqrt())?;
        let scs = self.timing.scs_hz();
        let cfo = channel.cfo_hz / scs;
        let start_times = self.timing.symbol_start_times();
        let nof_ports = self.config.nof_rx_ports;

        let mut grid = ResourceGrid::new(self.config.grid_prb, nof_ports)?;
        for port in 0..nof_ports {
            let phase = if channel.random_phase { rng.gen_range(0.0..2.0 * PI) } else { 0.0 };
            // Columns of a DFT matrix, orthogonal over the ports
            let layer_gains: Vec<Complex64> = (0..nof_layers)
                .map(|layer| Complex64::from_polar(1.0, phase + 2.0 * PI * (port * layer) as f64 / nof_ports as f64))
                .collect();
            let mut port_grid = grid
                .port_mut(port)
                .ok_or_else(|| anyhow!("Missing port {} in the resource grid", port))?;
            for ((k, l), value) in port_grid.indexed_iter_mut() {
                let common = Complex64::from_polar(
                    1.0,
                    -2.0 * PI * k as f64 * scs * truth.time_alignment + 2.0 * PI * cfo * start_times[l],
                );
                let signal: Complex64 = layer_gains
                    .iter()
                    .enumerate()
                    .map(|(layer, gain)| gain * tx[(k, l, layer)])
                    .sum();
                *value = common * signal + Complex64::new(noise.sample(&mut rng), noise.sample(&mut rng));
            }
        }

        Ok(SlotData {
            grid,
            pilots,
            data_res,
            data,
        })
    }
}

fn qpsk_level(rng: &mut StdRng) -> f64 {
    if rng.gen::<bool>() {
        FRAC_1_SQRT_2
    } else {
        -FRAC_1_SQRT_2
    }
}
