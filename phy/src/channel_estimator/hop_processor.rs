//! Per-hop channel estimation
//!
//! Pilot extraction, LS estimation, CFO estimation and compensation,
//! frequency-domain smoothing, time alignment and noise/power statistics of
//! one intra-slot hop, for every layer.

use super::timing::TimeAlignmentEstimator;
use super::{cfo, interpolation, smoothing, EstimatorConfig, TdInterpolation};
use crate::hop::{HopConfig, ReMask};
use ndarray::{s, Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};
use num_complex::Complex64;
use std::ops::Range;
use tracing::trace;

/// Layers whose DM-RS share the REs of one CDM group
#[derive(Debug, Clone, PartialEq)]
pub struct CdmGroup {
    /// Subcarriers of the group within a pilot PRB
    pub re_mask: ReMask,
    /// Layers of the group, at most two
    pub layers: Range<usize>,
}

/// Channel estimate of one hop and layer, before merging into the port grid
#[derive(Debug, Clone, PartialEq)]
pub struct HopGrid {
    /// Allocated grid subcarriers, increasing
    pub subcarriers: Vec<usize>,
    /// [allocated subcarrier, symbol], one column per symbol of `symbols`
    pub values: Array2<Complex64>,
    /// OFDM symbols the values are valid for
    pub symbols: Range<usize>,
}

/// Contribution of one hop to the port estimate
#[derive(Debug, Clone, PartialEq)]
pub struct HopResult {
    /// Filled channel estimate, one per layer
    pub grids: Vec<HopGrid>,
    /// Normalized CFO (units of the subcarrier spacing), if estimable
    pub cfo: Option<f64>,
    /// Squared residual between observations and the pilot model
    pub noise: f64,
    /// Received pilot power over all layers, before normalization
    pub rsrp: f64,
    /// Received pilot energy, before normalization
    pub epre: f64,
    /// Time alignment in seconds, averaged over layers
    pub time_alignment: f64,
    /// Number of received pilot REs
    pub nof_pilots: usize,
    /// Number of pilot REs summed over layers
    pub nof_layer_pilots: usize,
}

/// Observations and cross-products of one CDM group
struct GroupPilots<'a> {
    subcarriers: Vec<usize>,
    /// [pilot RE, DM-RS symbol]
    observations: Array2<Complex64>,
    /// [pilot RE, DM-RS symbol, layer of the group]
    pilots: ArrayView3<'a, Complex64>,
    /// Despread y * conj(x), same shape as `pilots`
    products: Array3<Complex64>,
}

/// Pilot observations of one hop and its own CFO estimate
pub struct HopObservation<'a> {
    groups: Vec<GroupPilots<'a>>,
    dmrs_symbols: Vec<usize>,
    /// Normalized CFO (units of the subcarrier spacing), if the hop has two DM-RS symbols
    pub cfo: Option<f64>,
}

/// Extract the pilot observations of one hop and estimate its CFO
///
/// `pilots` holds the known DM-RS of this hop only, [pilot RE, DM-RS
/// symbol, layer]. The inputs are expected to be validated by the caller.
pub fn observe_hop<'a>(
    grid: ArrayView2<Complex64>,
    pilots: ArrayView3<'a, Complex64>,
    hop: &HopConfig,
    groups: &[CdmGroup],
    config: &EstimatorConfig,
) -> HopObservation<'a> {
    let dmrs_symbols: Vec<usize> = hop.dmrs_symbols.iter().collect();
    let nof_dmrs = dmrs_symbols.len();

    let groups: Vec<GroupPilots<'a>> = groups
        .iter()
        .map(|group| {
            let subcarriers = hop.with_re_mask(group.re_mask).pilot_subcarriers();
            let observations = Array2::from_shape_fn((subcarriers.len(), nof_dmrs), |(k, i)| {
                grid[(subcarriers[k], dmrs_symbols[i])]
            });
            let pilots = pilots.slice_move(s![.., .., group.layers.clone()]);
            let products = despread(observations.view(), pilots);
            GroupPilots {
                subcarriers,
                observations,
                pilots,
                products,
            }
        })
        .collect();

    let cfo = (nof_dmrs >= 2).then(|| {
        let correlation: Complex64 = groups
            .iter()
            .map(|group| cfo::correlation(group.products.view(), 0, 1))
            .sum();
        cfo::estimate_cfo(correlation, config.timing.elapsed(dmrs_symbols[0], dmrs_symbols[1]))
    });

    HopObservation {
        groups,
        dmrs_symbols,
        cfo,
    }
}

/// Estimate the channel over one hop from its observations
///
/// With compensation enabled the pilots are derotated with the hop's own
/// CFO or, if it has none, with `slot_cfo`.
pub fn process_hop(
    observation: HopObservation,
    beta: f64,
    hop: &HopConfig,
    config: &EstimatorConfig,
    slot_cfo: Option<f64>,
    time_alignment: &TimeAlignmentEstimator,
) -> HopResult {
    let HopObservation {
        groups: mut observed,
        dmrs_symbols,
        cfo: hop_cfo,
    } = observation;
    let nof_dmrs = dmrs_symbols.len();
    let start_times = config.timing.symbol_start_times();

    let epre = observed
        .iter()
        .flat_map(|group| group.observations.iter())
        .map(|y| y.norm_sqr())
        .sum::<f64>();

    // Rotations that bring every DM-RS symbol back to the slot start
    let rotations: Vec<Complex64> = match (config.compensate_cfo, hop_cfo.or(slot_cfo)) {
        (true, Some(cfo)) => dmrs_symbols
            .iter()
            .map(|&l| cfo::phase_rotation(cfo, start_times[l]))
            .collect(),
        _ => vec![Complex64::new(1.0, 0.0); nof_dmrs],
    };
    for group in observed.iter_mut() {
        for (mut symbol, rotation) in group.products.axis_iter_mut(Axis(1)).zip(&rotations) {
            symbol.mapv_inplace(|p| p * rotation.conj());
        }
    }

    let stride = hop.re_mask.stride();
    let allocated = hop.allocated_subcarriers();
    let norm = beta * nof_dmrs as f64;

    let mut grids = Vec::new();
    let mut noise = 0.0;
    let mut rsrp = 0.0;
    let mut delay = 0.0;
    let mut nof_pilots = 0;
    let mut nof_layer_pilots = 0;

    for group in &observed {
        let mut layer_estimates = Vec::with_capacity(group.pilots.dim().2);

        for products in group.products.axis_iter(Axis(2)) {
            let ls: Vec<Complex64> = products.sum_axis(Axis(1)).iter().map(|&p| p / norm).collect();
            let averaged = smoothing::smooth(config.smoothing, &ls, &group.subcarriers, stride, hop.nof_prb);
            delay += time_alignment.estimate(&group.subcarriers, &averaged, &config.timing);

            // Estimates on the DM-RS symbols, [pilot RE, DM-RS symbol], and the filled grid
            let (estimates, values) = match config.td_interpolation {
                TdInterpolation::Average => {
                    let averaged = Array1::from(averaged);
                    let values = interpolation::fill_grid(
                        &group.subcarriers,
                        &dmrs_symbols[..1],
                        averaged.view().insert_axis(Axis(1)),
                        &allocated,
                        hop.symbols(),
                    );
                    let estimates = Array2::from_shape_fn((averaged.len(), nof_dmrs), |(k, _)| averaged[k]);
                    (estimates, values)
                }
                TdInterpolation::Interpolate => {
                    let mut estimates = Array2::zeros((group.subcarriers.len(), nof_dmrs));
                    for (column, mut estimate) in products.columns().into_iter().zip(estimates.columns_mut()) {
                        let ls: Vec<Complex64> = column.iter().map(|&p| p / beta).collect();
                        let smoothed =
                            smoothing::smooth(config.smoothing, &ls, &group.subcarriers, stride, hop.nof_prb);
                        estimate.assign(&Array1::from(smoothed));
                    }
                    let values = interpolation::fill_grid(
                        &group.subcarriers,
                        &dmrs_symbols,
                        estimates.view(),
                        &allocated,
                        hop.symbols(),
                    );
                    (estimates, values)
                }
            };
            grids.push(HopGrid {
                subcarriers: allocated.clone(),
                values,
                symbols: hop.symbols(),
            });

            rsrp += beta * beta * estimates.iter().map(|h| h.norm_sqr()).sum::<f64>();
            nof_layer_pilots += estimates.len();
            layer_estimates.push(estimates);
        }

        // Residual against the pilot model of all layers, with the CFO phase reapplied
        noise += group
            .observations
            .indexed_iter()
            .map(|((k, i), &y)| {
                let model: Complex64 = layer_estimates
                    .iter()
                    .enumerate()
                    .map(|(layer, h)| h[(k, i)] * group.pilots[(k, i, layer)])
                    .sum();
                (y - model * beta * rotations[i]).norm_sqr()
            })
            .sum::<f64>();
        nof_pilots += group.observations.len();
    }

    let nof_layers = grids.len();
    trace!(
        "Hop with {} pilots x {} symbols, {} layers: epre={:.3e}, noise={:.3e}",
        nof_pilots / nof_dmrs,
        nof_dmrs,
        nof_layers,
        epre,
        noise
    );

    HopResult {
        grids,
        cfo: hop_cfo,
        noise,
        rsrp,
        epre,
        time_alignment: delay / nof_layers as f64,
        nof_pilots,
        nof_layer_pilots,
    }
}

/// Pilot cross-products y * conj(x) per layer
///
/// Two layers of one CDM group are separated by their orthogonal cover
/// over pairs of adjacent pilot REs: both REs of a pair get the pair mean.
fn despread(observations: ArrayView2<Complex64>, pilots: ArrayView3<Complex64>) -> Array3<Complex64> {
    let (nof_res, nof_dmrs, nof_layers) = pilots.dim();
    let mut products = Array3::from_shape_fn(pilots.raw_dim(), |(k, i, layer)| {
        observations[(k, i)] * pilots[(k, i, layer)].conj()
    });

    if nof_layers > 1 {
        debug_assert_eq!(nof_res % 2, 0, "Odd number of pilot REs under an orthogonal cover");
        for mut pair in products.exact_chunks_mut((2, nof_dmrs, nof_layers)) {
            let mean = pair.sum_axis(Axis(0)).mapv(|p| p / 2.0);
            for mut re in pair.outer_iter_mut() {
                re.assign(&mean);
            }
        }
    }
    products
}
