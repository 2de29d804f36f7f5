//! 5G NR slot timing
//!
//! Cyclic-prefix durations and OFDM symbol start times within one slot,
//! according to 3GPP TS 38.211 Section 5.3.1

use crate::resource_grid::NSYMB_PER_SLOT;
use crate::PhyError;
use common::types::SubcarrierSpacing;
use serde::{Deserialize, Serialize};

/// Reference DFT size the CP tables are expressed in
const CP_REFERENCE_DFT_SIZE: f64 = 2048.0;

/// Long CP (first symbol of every half subframe) at the reference DFT size
const LONG_CP_SAMPLES: f64 = 160.0;

/// Normal CP at the reference DFT size
const NORMAL_CP_SAMPLES: f64 = 144.0;

/// Timing of the 14 OFDM symbols of one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotTiming {
    /// Subcarrier spacing
    pub scs: SubcarrierSpacing,
    /// Cyclic prefix duration of every symbol, in seconds
    pub cp_durations: [f64; NSYMB_PER_SLOT],
}

impl SlotTiming {
    /// Build the CP table for the given subcarrier spacing
    ///
    /// At 15 kHz the first symbol of each half slot carries the long CP; at
    /// 30 kHz every slot starts a half subframe, so only symbol 0 does.
    pub fn for_scs(scs: SubcarrierSpacing) -> Result<Self, PhyError> {
        let cp_samples: [f64; NSYMB_PER_SLOT] = match scs {
            SubcarrierSpacing::Scs15 => std::array::from_fn(|l| {
                if l % 7 == 0 {
                    LONG_CP_SAMPLES
                } else {
                    NORMAL_CP_SAMPLES
                }
            }),
            SubcarrierSpacing::Scs30 => std::array::from_fn(|l| {
                if l == 0 {
                    LONG_CP_SAMPLES
                } else {
                    NORMAL_CP_SAMPLES
                }
            }),
            other => return Err(PhyError::UnsupportedSubcarrierSpacing(other.khz())),
        };

        let sample_duration = 1.0 / (CP_REFERENCE_DFT_SIZE * scs.hz());
        Ok(Self {
            scs,
            cp_durations: cp_samples.map(|samples| samples * sample_duration),
        })
    }

    /// Build from an explicit CP table (seconds)
    pub fn with_cp_durations(scs: SubcarrierSpacing, cp_durations: [f64; NSYMB_PER_SLOT]) -> Result<Self, PhyError> {
        if cp_durations.iter().any(|&cp| !cp.is_finite() || cp <= 0.0) {
            return Err(PhyError::InvalidConfiguration(format!(
                "CP durations must be positive, got {:?}",
                cp_durations
            )));
        }
        Ok(Self { scs, cp_durations })
    }

    /// Subcarrier spacing in Hz
    pub fn scs_hz(&self) -> f64 {
        self.scs.hz()
    }

    /// CP durations in units of the useful OFDM symbol time (1/SCS)
    pub fn normalized_cp_durations(&self) -> [f64; NSYMB_PER_SLOT] {
        let scs_hz = self.scs_hz();
        self.cp_durations.map(|cp| cp * scs_hz)
    }

    /// Start time of the useful part of every symbol, in units of 1/SCS
    ///
    /// Symbol l starts after all previous symbols (CP plus one useful part
    /// each) and its own CP.
    pub fn symbol_start_times(&self) -> [f64; NSYMB_PER_SLOT] {
        let cp = self.normalized_cp_durations();
        let mut start = [0.0; NSYMB_PER_SLOT];
        let mut elapsed = 0.0;
        for (l, cp_l) in cp.iter().enumerate() {
            elapsed += cp_l;
            start[l] = elapsed;
            elapsed += 1.0;
        }
        start
    }

    /// Elapsed time between the useful parts of two symbols, in units of 1/SCS
    pub fn elapsed(&self, from: usize, to: usize) -> f64 {
        let start = self.symbol_start_times();
        start[to] - start[from]
    }

    /// Duration of a normal (non-extended) CP, in seconds
    pub fn normal_cp_duration(&self) -> f64 {
        self.cp_durations
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min)
    }

    /// Slot duration in seconds
    pub fn slot_duration(&self) -> f64 {
        self.cp_durations.iter().sum::<f64>() + NSYMB_PER_SLOT as f64 / self.scs_hz()
    }
}
