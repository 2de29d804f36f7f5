//! DM-RS based port channel estimator
//!
//! Estimates the channel seen by one receive port from each of up to four
//! transmit layers over the allocation of a PUSCH transmission with up to
//! two intra-slot hops. Each hop is observed and processed independently
//! ([`hop_processor::observe_hop`], [`hop_processor::process_hop`]); only
//! the slot CFO is shared between them. The per-hop partial grids and
//! metrics are then reduced into one [`PortChannelEstimate`].

pub mod cfo;
pub mod hop_processor;
pub mod interpolation;
pub mod smoothing;
pub mod timing;

use crate::hop::{HopConfig, ReMask, SymbolMask};
use crate::resource_grid::{NRE, NSYMB_PER_SLOT};
use crate::slot_timing::SlotTiming;
use crate::PhyError;
use common::utils::next_power_of_2;
use hop_processor::{observe_hop, process_hop, CdmGroup, HopGrid, HopResult};
use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use timing::{TimeAlignmentEstimator, TIMING_IFFT_SIZE};
use tracing::{debug, warn};

/// Frequency-domain smoothing applied to the LS estimates of one hop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FdSmoothing {
    /// Raw LS estimates
    None,
    /// Every pilot subcarrier replaced by the mean over the hop
    Mean,
    /// Raised-cosine low-pass filter with virtual pilots at the band edges
    Filter,
}

impl FromStr for FdSmoothing {
    type Err = PhyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(FdSmoothing::None),
            "mean" => Ok(FdSmoothing::Mean),
            "filter" => Ok(FdSmoothing::Filter),
            other => Err(PhyError::UnknownSmoothingStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for FdSmoothing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FdSmoothing::None => "none",
            FdSmoothing::Mean => "mean",
            FdSmoothing::Filter => "filter",
        };
        f.write_str(name)
    }
}

/// Maximum number of transmit layers
pub const MAX_LAYERS: usize = 4;

/// Layers sharing one CDM group
const LAYERS_PER_CDM_GROUP: usize = 2;

/// Time-domain filling of the non-DM-RS symbols of a hop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TdInterpolation {
    /// One estimate averaged over the hop's DM-RS symbols, held over the hop
    #[default]
    Average,
    /// One estimate per DM-RS symbol, linearly interpolated in between
    Interpolate,
}

impl FromStr for TdInterpolation {
    type Err = PhyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "average" => Ok(TdInterpolation::Average),
            "interpolate" => Ok(TdInterpolation::Interpolate),
            other => Err(PhyError::UnknownInterpolationStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for TdInterpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TdInterpolation::Average => f.write_str("average"),
            TdInterpolation::Interpolate => f.write_str("interpolate"),
        }
    }
}

/// Port channel estimator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Subcarriers carrying the DM-RS of layers 0 and 1 within a pilot PRB
    pub re_mask: ReMask,
    /// Subcarriers carrying the DM-RS of layers 2 and 3, if any
    pub second_cdm_re_mask: Option<ReMask>,
    /// DM-RS symbols of both hops
    pub dmrs_symbols: SymbolMask,
    /// Subcarrier spacing and cyclic-prefix durations
    pub timing: SlotTiming,
    /// Frequency-domain smoothing strategy
    pub smoothing: FdSmoothing,
    /// Time-domain filling strategy
    pub td_interpolation: TdInterpolation,
    /// Compensate the estimated CFO in the channel estimate
    pub compensate_cfo: bool,
}

/// Channel estimate and metrics of one receive port
#[derive(Debug, Clone, PartialEq)]
pub struct PortChannelEstimate {
    /// Channel estimate, [subcarrier, symbol, layer]
    pub channel: Array3<Complex64>,
    /// Noise variance per RE
    pub noise_var: f64,
    /// Reference signal received power
    pub rsrp: f64,
    /// Energy per pilot RE
    pub epre: f64,
    /// RSRP over noise variance
    pub sinr: f64,
    /// Time alignment in seconds (positive: late arrival)
    pub time_alignment: f64,
    /// Carrier frequency offset in Hz, if any hop could estimate it
    pub cfo_hz: Option<f64>,
}

impl PortChannelEstimate {
    pub fn nof_layers(&self) -> usize {
        self.channel.dim().2
    }
}

/// Port channel estimator
pub struct PortChannelEstimator {
    config: EstimatorConfig,
    time_alignment: TimeAlignmentEstimator,
}

impl PortChannelEstimator {
    /// Create a new estimator
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            time_alignment: TimeAlignmentEstimator::new(),
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Estimate the channel of one receive port
    ///
    /// `grid` is the received [subcarrier, symbol] grid of the port, `pilots`
    /// the known DM-RS as [pilot RE, DM-RS symbol (hop 1 first), layer] and
    /// `beta` the DM-RS to data amplitude ratio. A `hop2` without DM-RS
    /// symbols is the same as no hopping.
    pub fn estimate(
        &self,
        grid: ArrayView2<Complex64>,
        pilots: ArrayView3<Complex64>,
        beta: f64,
        hop1: &HopConfig,
        hop2: Option<&HopConfig>,
    ) -> Result<PortChannelEstimate, PhyError> {
        let hops = self.check_inputs(&grid, &pilots, beta, hop1, hop2)?;
        let groups = self.cdm_groups(pilots.dim().2)?;

        // Pilot observations per hop, over its own pilot columns
        let mut first_column = 0;
        let mut observations = Vec::with_capacity(hops.len());
        for hop in &hops {
            let nof_columns = hop.dmrs_symbols.count();
            let hop_pilots = pilots.slice_move(s![.., first_column..first_column + nof_columns, ..]);
            first_column += nof_columns;
            observations.push(observe_hop(grid, hop_pilots, hop, &groups, &self.config));
        }

        // Unweighted mean over the hops that could estimate a CFO
        let cfos: Vec<f64> = observations.iter().filter_map(|o| o.cfo).collect();
        let cfo = (!cfos.is_empty()).then(|| cfos.iter().sum::<f64>() / cfos.len() as f64);

        let mut results = Vec::with_capacity(hops.len());
        for (observation, hop) in observations.into_iter().zip(&hops) {
            let result = process_hop(observation, beta, hop, &self.config, cfo, &self.time_alignment);
            debug!(
                "Hop PRBs {}+{}: noise={:.3e}, rsrp={:.3e}, ta={:.3e}s, cfo={:?}",
                hop.start_prb, hop.nof_prb, result.noise, result.rsrp, result.time_alignment, result.cfo
            );
            results.push(result);
        }

        let estimate = self.reduce(grid.nrows(), results, cfo)?;
        debug!(
            "Port estimate: noise_var={:.3e}, rsrp={:.3e}, epre={:.3e}, ta={:.3e}s, cfo={:?}Hz",
            estimate.noise_var, estimate.rsrp, estimate.epre, estimate.time_alignment, estimate.cfo_hz
        );
        Ok(estimate)
    }

    /// Validate the call against the configuration and return the hops to process
    fn check_inputs<'a>(
        &self,
        grid: &ArrayView2<Complex64>,
        pilots: &ArrayView3<Complex64>,
        beta: f64,
        hop1: &'a HopConfig,
        hop2: Option<&'a HopConfig>,
    ) -> Result<Vec<&'a HopConfig>, PhyError> {
        let (nof_subcarriers, nof_symbols) = grid.dim();
        if nof_symbols != NSYMB_PER_SLOT {
            return Err(PhyError::mismatch("grid symbols", NSYMB_PER_SLOT, nof_symbols));
        }
        if nof_subcarriers % NRE != 0 {
            return Err(PhyError::InvalidConfiguration(format!(
                "Grid with {} subcarriers is not a whole number of PRBs",
                nof_subcarriers
            )));
        }
        if next_power_of_2(nof_subcarriers as u32) as usize > TIMING_IFFT_SIZE {
            return Err(PhyError::InvalidConfiguration(format!(
                "Grid with {} subcarriers exceeds the {}-point timing IFFT",
                nof_subcarriers, TIMING_IFFT_SIZE
            )));
        }
        if !beta.is_finite() || beta <= 0.0 {
            return Err(PhyError::InvalidConfiguration(format!("DM-RS beta must be positive, got {}", beta)));
        }
        if hop1.is_empty() {
            return Err(PhyError::InvalidConfiguration("First hop carries no DM-RS".to_string()));
        }

        let hops: Vec<&HopConfig> = std::iter::once(hop1)
            .chain(hop2.filter(|hop| !hop.is_empty()))
            .collect();

        let mut dmrs_symbols = SymbolMask::default();
        for hop in &hops {
            hop.validate()?;
            if hop.prb_mask.len() * NRE != nof_subcarriers {
                return Err(PhyError::mismatch("hop PRB mask length", nof_subcarriers / NRE, hop.prb_mask.len()));
            }
            if hop.re_mask != self.config.re_mask {
                return Err(PhyError::InvalidConfiguration(format!(
                    "Hop RE mask {:#05x} differs from configured {:#05x}",
                    hop.re_mask.bits(),
                    self.config.re_mask.bits()
                )));
            }
            if hop.dmrs_symbols.intersects(&dmrs_symbols) {
                return Err(PhyError::InvalidConfiguration("Hops share DM-RS symbols".to_string()));
            }
            if hop.nof_pilot_res() != pilots.dim().0 {
                return Err(PhyError::mismatch("pilot rows", hop.nof_pilot_res(), pilots.dim().0));
            }
            dmrs_symbols = dmrs_symbols.union(&hop.dmrs_symbols);
        }

        if dmrs_symbols != self.config.dmrs_symbols {
            return Err(PhyError::InvalidConfiguration(format!(
                "Hop DM-RS symbols {:#06x} differ from configured {:#06x}",
                dmrs_symbols.bits(),
                self.config.dmrs_symbols.bits()
            )));
        }
        if pilots.dim().1 != dmrs_symbols.count() {
            return Err(PhyError::mismatch("pilot columns", dmrs_symbols.count(), pilots.dim().1));
        }

        Ok(hops)
    }

    /// Split the layers into CDM groups: layers 0 and 1 on the first RE
    /// mask, layers 2 and 3 on the second one
    fn cdm_groups(&self, nof_layers: usize) -> Result<Vec<CdmGroup>, PhyError> {
        if nof_layers == 0 || nof_layers > MAX_LAYERS {
            return Err(PhyError::InvalidConfiguration(format!(
                "{} layers, between 1 and {} supported",
                nof_layers, MAX_LAYERS
            )));
        }

        let first = self.config.re_mask;
        let mut groups = vec![CdmGroup {
            re_mask: first,
            layers: 0..nof_layers.min(LAYERS_PER_CDM_GROUP),
        }];
        if nof_layers > LAYERS_PER_CDM_GROUP {
            let second = self.config.second_cdm_re_mask.ok_or_else(|| {
                PhyError::InvalidConfiguration(format!("{} layers need a second CDM group RE mask", nof_layers))
            })?;
            if second.count() != first.count() {
                return Err(PhyError::mismatch("pilots per PRB of the second CDM group", first.count(), second.count()));
            }
            if second.intersects(&first) {
                return Err(PhyError::InvalidConfiguration(format!(
                    "CDM group RE masks {:#05x} and {:#05x} overlap",
                    first.bits(),
                    second.bits()
                )));
            }
            groups.push(CdmGroup {
                re_mask: second,
                layers: LAYERS_PER_CDM_GROUP..nof_layers,
            });
        }

        if let Some(group) = groups.iter().find(|g| g.layers.len() > 1 && g.re_mask.count() % 2 != 0) {
            return Err(PhyError::InvalidConfiguration(format!(
                "RE mask {:#05x} cannot carry two orthogonal layers",
                group.re_mask.bits()
            )));
        }
        Ok(groups)
    }

    /// Combine the per-hop results into the port estimate
    fn reduce(
        &self,
        nof_subcarriers: usize,
        results: Vec<HopResult>,
        cfo: Option<f64>,
    ) -> Result<PortChannelEstimate, PhyError> {
        let nof_hops = results.len() as f64;
        let nof_pilots: usize = results.iter().map(|r| r.nof_pilots).sum();
        let nof_layer_pilots: usize = results.iter().map(|r| r.nof_layer_pilots).sum();
        let noise: f64 = results.iter().map(|r| r.noise).sum();
        let rsrp: f64 = results.iter().map(|r| r.rsrp).sum();
        let epre: f64 = results.iter().map(|r| r.epre).sum();
        let time_alignment = results.iter().map(|r| r.time_alignment).sum::<f64>() / nof_hops;

        // Hop grids regrouped per layer
        let nof_layers = results.first().map_or(0, |r| r.grids.len());
        let mut layer_grids: Vec<Vec<HopGrid>> = (0..nof_layers).map(|_| Vec::with_capacity(results.len())).collect();
        for result in results {
            for (layer, grid) in result.grids.into_iter().enumerate() {
                layer_grids[layer].push(grid);
            }
        }

        let mut channel = Array3::zeros((nof_subcarriers, NSYMB_PER_SLOT, nof_layers));
        for (layer, grids) in layer_grids.iter().enumerate() {
            channel
                .index_axis_mut(Axis(2), layer)
                .assign(&merge_hop_grids(nof_subcarriers, grids)?);
        }

        if let (true, Some(cfo)) = (self.config.compensate_cfo, cfo) {
            let start_times = self.config.timing.symbol_start_times();
            for (l, mut symbol) in channel.axis_iter_mut(Axis(1)).enumerate() {
                let rotation = cfo::phase_rotation(cfo, start_times[l]);
                symbol.mapv_inplace(|h| h * rotation);
            }
        }

        let noise_var = if nof_pilots > 1 {
            noise / (nof_pilots - 1) as f64
        } else {
            warn!("Single pilot RE, noise variance cannot be estimated");
            0.0
        };
        let rsrp = rsrp / nof_layer_pilots as f64;
        let epre = epre / nof_pilots as f64;
        let sinr = if noise_var > 0.0 { rsrp / noise_var } else { f64::INFINITY };

        Ok(PortChannelEstimate {
            channel,
            noise_var,
            rsrp,
            epre,
            sinr,
            time_alignment,
            cfo_hz: cfo.map(|cfo| cfo * self.config.timing.scs_hz()),
        })
    }
}

/// Scatter the partial hop grids of one layer into one [subcarrier, symbol] grid
///
/// Hops must write disjoint REs.
pub fn merge_hop_grids(nof_subcarriers: usize, grids: &[HopGrid]) -> Result<Array2<Complex64>, PhyError> {
    let mut channel = Array2::zeros((nof_subcarriers, NSYMB_PER_SLOT));
    let mut written = Array2::from_elem((nof_subcarriers, NSYMB_PER_SLOT), false);

    for hop_grid in grids {
        for (column, symbol) in hop_grid.symbols.clone().enumerate() {
            for (row, &subcarrier) in hop_grid.subcarriers.iter().enumerate() {
                if written[(subcarrier, symbol)] {
                    return Err(PhyError::OverlappingHops { subcarrier, symbol });
                }
                written[(subcarrier, symbol)] = true;
                channel[(subcarrier, symbol)] = hop_grid.values[(row, column)];
            }
        }
    }

    Ok(channel)
}

#[cfg(test)]
mod tests;
