//! Common Utilities
//!
//! Provides power conversions and slot timing helpers

use tracing::trace;

/// Convert a linear power ratio to dB
pub fn linear_to_db(value: f64) -> f64 {
    10.0 * value.log10()
}

/// Convert a power ratio in dB to linear scale
pub fn db_to_linear(db: f64) -> f64 {
    10.0_f64.powf(db / 10.0)
}

/// Round up to next power of 2
pub fn next_power_of_2(n: u32) -> u32 {
    if n == 0 {
        return 1;
    }

    let mut v = n;
    v -= 1;
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v + 1
}

/// Number of subcarriers covered by `nof_prb` resource blocks
pub fn prb_to_subcarriers(nof_prb: usize) -> usize {
    // Each RB has 12 subcarriers
    const SUBCARRIERS_PER_RB: usize = 12;

    let nof_subcarriers = nof_prb * SUBCARRIERS_PER_RB;
    trace!("{} PRBs span {} subcarriers", nof_prb, nof_subcarriers);
    nof_subcarriers
}

/// Time utilities for slot calculations
pub mod time {
    /// Slot duration in microseconds for different SCS
    pub fn slot_duration_us(scs_khz: u32) -> Option<f64> {
        match scs_khz {
            15 => Some(1000.0),
            30 => Some(500.0),
            60 => Some(250.0),
            120 => Some(125.0),
            240 => Some(62.5),
            _ => None,
        }
    }
}
