//! Frequency-domain smoothing of LS channel estimates
//!
//! The `filter` strategy low-pass filters the pilot estimates with a
//! raised-cosine response whose bandwidth corresponds to one tenth of the
//! OFDM symbol time. Before filtering, the pilot sequence is extended on
//! both band edges with virtual pilots extrapolated in log-magnitude and
//! phase, so that the convolution does not pull the edge estimates toward
//! zero.

use super::FdSmoothing;
use crate::resource_grid::NRE;
use num_complex::Complex64;
use std::f64::consts::PI;
use tracing::trace;

/// Raised-cosine roll-off factor
const RC_ROLLOFF: f64 = 0.2;

/// Filter bandwidth as a fraction of the subcarrier sampling rate
const RC_BANDWIDTH: f64 = 0.1;

/// Maximum filter span in PRBs
const MAX_FILTER_PRB: usize = 3;

/// Maximum number of virtual pilots on each edge
const MAX_VIRTUAL_PILOTS: usize = 12;

/// Smallest magnitude considered in the log domain
const MIN_MAGNITUDE: f64 = 1e-12;

/// Apply the smoothing strategy to the LS estimates of one hop
///
/// `positions` are the grid subcarriers of the estimates, `stride` the
/// pilot spacing in subcarriers.
pub fn smooth(
    strategy: FdSmoothing,
    ls: &[Complex64],
    positions: &[usize],
    stride: usize,
    nof_prb: usize,
) -> Vec<Complex64> {
    match strategy {
        FdSmoothing::None => ls.to_vec(),
        FdSmoothing::Mean => {
            if ls.is_empty() {
                return Vec::new();
            }
            let mean = ls.iter().sum::<Complex64>() / ls.len() as f64;
            vec![mean; ls.len()]
        }
        FdSmoothing::Filter => {
            let taps = design_fd_filter(stride, nof_prb);
            let nof_virtual = MAX_VIRTUAL_PILOTS.min(taps.len() / 2);
            let padded = add_virtual_pilots(ls, positions, stride, nof_virtual);
            let filtered = convolve_same(&padded, &taps);
            trace!(
                "FD filter: {} taps, {} virtual pilots per edge, {} pilots",
                taps.len(),
                nof_virtual,
                ls.len()
            );
            filtered[nof_virtual..nof_virtual + ls.len()].to_vec()
        }
    }
}

/// Normalized sinc: sin(pi x) / (pi x)
fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-10 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Raised-cosine impulse response at `t` (in samples) for a normalized bandwidth
pub fn raised_cosine(t: f64, bandwidth: f64, rolloff: f64) -> f64 {
    let x = t * bandwidth;
    if rolloff > 0.0 && (1.0 - (2.0 * rolloff * x).abs()).abs() < 1e-10 {
        // t = +-1/(2 alpha B)
        (PI / 4.0) * sinc(1.0 / (2.0 * rolloff))
    } else {
        sinc(x) * (PI * rolloff * x).cos() / (1.0 - (2.0 * rolloff * x).powi(2))
    }
}

/// Design the decimated smoothing filter for a pilot stride and allocation size
///
/// The prototype spans min(3, nof_prb) PRBs at subcarrier resolution and is
/// sampled once per pilot spacing. Taps are normalized to unit sum.
pub fn design_fd_filter(stride: usize, nof_prb: usize) -> Vec<f64> {
    let stride = stride.max(1);
    let half_span = MAX_FILTER_PRB.min(nof_prb.max(1)) * NRE / 2;
    let half_taps = (half_span / stride) as i64;

    let mut taps: Vec<f64> = (-half_taps..=half_taps)
        .map(|m| raised_cosine((m * stride as i64) as f64, RC_BANDWIDTH, RC_ROLLOFF))
        .collect();

    let sum: f64 = taps.iter().sum();
    for tap in &mut taps {
        *tap /= sum;
    }
    taps
}

/// Unwrap a phase sequence so that successive differences never exceed pi
fn unwrap_phase(phases: &[f64]) -> Vec<f64> {
    let mut out: Vec<f64> = Vec::with_capacity(phases.len());
    for (i, &phase) in phases.iter().enumerate() {
        if i == 0 {
            out.push(phase);
            continue;
        }
        let mut d = phase - phases[i - 1];
        // Bring d into (-pi, pi]
        while d > PI {
            d -= 2.0 * PI;
        }
        while d <= -PI {
            d += 2.0 * PI;
        }
        out.push(out[i - 1] + d);
    }
    out
}

/// Least-squares line through (x, y): returns (intercept, slope)
fn linear_fit(x: &[f64], y: &[f64]) -> (f64, f64) {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let sxx: f64 = x.iter().map(|xi| (xi - mean_x).powi(2)).sum();
    if sxx == 0.0 {
        return (mean_y, 0.0);
    }
    let sxy: f64 = x.iter().zip(y).map(|(xi, yi)| (xi - mean_x) * (yi - mean_y)).sum();
    let slope = sxy / sxx;
    (mean_y - slope * mean_x, slope)
}

/// Extrapolate pilots at `targets` from a window of real pilots
fn extrapolate(window_positions: &[f64], window_values: &[Complex64], targets: &[f64]) -> Vec<Complex64> {
    let log_magnitude: Vec<f64> = window_values
        .iter()
        .map(|v| v.norm().max(MIN_MAGNITUDE).ln())
        .collect();
    let phase = unwrap_phase(&window_values.iter().map(|v| v.arg()).collect::<Vec<_>>());

    let (mag0, mag_slope) = linear_fit(window_positions, &log_magnitude);
    let (phase0, phase_slope) = linear_fit(window_positions, &phase);

    targets
        .iter()
        .map(|&x| Complex64::from_polar((mag0 + mag_slope * x).exp(), phase0 + phase_slope * x))
        .collect()
}

/// Pad the pilot sequence with `nof_virtual` extrapolated pilots on each edge
///
/// Each edge is fitted over its `max(nof_virtual, 2)` nearest real pilots.
pub fn add_virtual_pilots(
    values: &[Complex64],
    positions: &[usize],
    stride: usize,
    nof_virtual: usize,
) -> Vec<Complex64> {
    let n = values.len();
    if nof_virtual == 0 || n == 0 {
        return values.to_vec();
    }

    let nof_fit = nof_virtual.max(2).min(n);
    let step = stride as f64;
    let x: Vec<f64> = positions.iter().map(|&p| p as f64).collect();

    let left_targets: Vec<f64> = (1..=nof_virtual).rev().map(|i| x[0] - i as f64 * step).collect();
    let left = extrapolate(&x[..nof_fit], &values[..nof_fit], &left_targets);

    let right_targets: Vec<f64> = (1..=nof_virtual).map(|i| x[n - 1] + i as f64 * step).collect();
    let right = extrapolate(&x[n - nof_fit..], &values[n - nof_fit..], &right_targets);

    let mut padded = Vec::with_capacity(n + 2 * nof_virtual);
    padded.extend(left);
    padded.extend_from_slice(values);
    padded.extend(right);
    padded
}

/// Convolution keeping the central part, as long as the input
fn convolve_same(input: &[Complex64], taps: &[f64]) -> Vec<Complex64> {
    let center = (taps.len() - 1) / 2;
    (0..input.len())
        .map(|i| {
            taps.iter()
                .enumerate()
                .filter_map(|(j, &tap)| {
                    (i + center)
                        .checked_sub(j)
                        .and_then(|idx| input.get(idx))
                        .map(|&x| x * tap)
                })
                .sum()
        })
        .collect()
}
