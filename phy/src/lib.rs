//! Uplink Physical Layer Reference Library
//!
//! This crate implements the receive side of the 5G NR PUSCH chain according
//! to 3GPP TS 38.211 and TS 38.214: DM-RS based channel estimation (with
//! frequency-domain smoothing, time alignment and CFO estimation) and the
//! ZF/MMSE MIMO channel equalizer.

pub mod channel_estimator;
pub mod dmrs;
pub mod equalizer;
pub mod hop;
pub mod linalg;
pub mod multiport;
pub mod resource_grid;
pub mod slot_timing;

// Re-export commonly used types
pub use channel_estimator::{EstimatorConfig, FdSmoothing, PortChannelEstimate, PortChannelEstimator, TdInterpolation};
pub use equalizer::{ChannelEqualizer, EqualizerCriterion, EqualizerOutput};
pub use hop::{HopConfig, ReMask, SymbolMask};
pub use multiport::{MultiPortChannelEstimator, MultiPortEstimate, PortMetrics};
pub use resource_grid::ResourceGrid;
pub use slot_timing::SlotTiming;

use thiserror::Error;

/// Common errors for the uplink PHY
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhyError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unknown FD smoothing strategy {0}")]
    UnknownSmoothingStrategy(String),

    #[error("Unknown TD interpolation strategy {0}")]
    UnknownInterpolationStrategy(String),

    #[error("Unknown equalization criterion {0}")]
    UnknownCriterion(String),

    #[error("Dimension mismatch in {what}: {expected} vs. {actual}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("Unsupported subcarrier spacing: {0} kHz")]
    UnsupportedSubcarrierSpacing(u32),

    #[error("Hops overlap at subcarrier {subcarrier}, symbol {symbol}")]
    OverlappingHops { subcarrier: usize, symbol: usize },

    #[error("Singular channel matrix at RE {re}")]
    SingularMatrix { re: usize },
}

impl PhyError {
    /// Shorthand for a size check failure
    pub(crate) fn mismatch(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        PhyError::DimensionMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }
}
