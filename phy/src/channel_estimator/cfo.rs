//! Carrier frequency offset estimation from DM-RS pairs
//!
//! CFO values are normalized to the subcarrier spacing and times are in
//! units of the useful OFDM symbol duration, so the phase accumulated at
//! time `t` is simply `2 * pi * cfo * t`.

use ndarray::{ArrayView3, Axis};
use num_complex::Complex64;
use std::f64::consts::PI;
use tracing::trace;

/// Correlation between the pilot cross-products of two DM-RS symbols
///
/// `products` is [pilot RE, DM-RS symbol, layer]; all layers contribute.
pub fn correlation(products: ArrayView3<Complex64>, first: usize, second: usize) -> Complex64 {
    products
        .index_axis(Axis(1), first)
        .iter()
        .zip(products.index_axis(Axis(1), second).iter())
        .map(|(a, b)| a.conj() * b)
        .sum()
}

/// Normalized CFO from the correlation of two DM-RS symbols
///
/// `elapsed` is the time between the two symbols in units of 1/SCS. The
/// estimate is unambiguous for |cfo * elapsed| < 1/2.
pub fn estimate_cfo(correlation: Complex64, elapsed: f64) -> f64 {
    let cfo = correlation.arg() / (2.0 * PI * elapsed);
    trace!("CFO correlation {:.3e}, elapsed {:.4} -> {:.6}", correlation, elapsed, cfo);
    cfo
}

/// Phase rotation accumulated by a normalized CFO at time `start_time`
pub fn phase_rotation(cfo: f64, start_time: f64) -> Complex64 {
    Complex64::from_polar(1.0, 2.0 * PI * cfo * start_time)
}
