//! Time alignment estimation
//!
//! The smoothed pilot estimates are placed on their subcarriers in a
//! 4096-point frequency grid and transformed to the delay domain. The
//! strongest tap within half a cyclic prefix around zero delay gives the
//! time alignment.

use crate::slot_timing::SlotTiming;
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::trace;

/// Size of the delay-domain transform
pub const TIMING_IFFT_SIZE: usize = 4096;

/// Delay-domain peak search over pilot estimates
pub struct TimeAlignmentEstimator {
    idft: Arc<dyn Fft<f64>>,
}

impl Default for TimeAlignmentEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeAlignmentEstimator {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            idft: planner.plan_fft_inverse(TIMING_IFFT_SIZE),
        }
    }

    /// Half-CP search window in delay bins, at least one bin
    fn search_window(timing: &SlotTiming) -> usize {
        let bins = timing.normal_cp_duration() * timing.scs_hz() * TIMING_IFFT_SIZE as f64 / 2.0;
        (bins.floor() as usize).clamp(1, TIMING_IFFT_SIZE / 2)
    }

    /// Estimate the time alignment in seconds
    ///
    /// `subcarriers` are the grid subcarriers of `estimates` and must lie
    /// below [`TIMING_IFFT_SIZE`]. A positive value means the signal arrives
    /// late.
    pub fn estimate(&self, subcarriers: &[usize], estimates: &[Complex64], timing: &SlotTiming) -> f64 {
        let mut buffer = vec![Complex64::new(0.0, 0.0); TIMING_IFFT_SIZE];
        for (&k, &h) in subcarriers.iter().zip(estimates) {
            buffer[k] = h;
        }
        self.idft.process(&mut buffer);

        let window = Self::search_window(timing);
        let peak = |range: std::ops::Range<usize>| {
            range
                .map(|idx| (idx, buffer[idx].norm_sqr()))
                .fold((0, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best })
        };

        let (late_idx, late_power) = peak(0..window);
        let (early_idx, early_power) = peak(TIMING_IFFT_SIZE - window..TIMING_IFFT_SIZE);

        let bin_duration = 1.0 / (TIMING_IFFT_SIZE as f64 * timing.scs_hz());
        let delay_bins = if late_power >= early_power {
            late_idx as f64
        } else {
            -((TIMING_IFFT_SIZE - early_idx) as f64)
        };

        trace!(
            "Delay peak at {} bins (window {}, late {:.3e}, early {:.3e})",
            delay_bins,
            window,
            late_power,
            early_power
        );
        delay_bins * bin_duration
    }
}
