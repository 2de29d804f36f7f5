//! MIMO channel equalizer
//!
//! Linear ZF and MMSE equalization of the received symbols across transmit
//! layers, one resource element at a time, together with the equivalent
//! post-equalization noise variance of every layer as needed by the soft
//! demodulator.

use crate::linalg::{add_diagonal, gram, hermitian, invert, real_diagonal};
use crate::PhyError;
use ndarray::{s, Array1, Array2, ArrayView2, ArrayView3, Axis};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace};

/// Maximum relative error between the two ZF noise variance computations
const ZF_NOISE_CHECK_TOLERANCE: f64 = 1e-6;

/// Equalization criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EqualizerCriterion {
    /// Zero forcing
    Zf,
    /// Minimum mean square error, bias corrected
    Mmse,
}

impl FromStr for EqualizerCriterion {
    type Err = PhyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ZF" | "zf" => Ok(EqualizerCriterion::Zf),
            "MMSE" | "mmse" => Ok(EqualizerCriterion::Mmse),
            other => Err(PhyError::UnknownCriterion(other.to_string())),
        }
    }
}

impl fmt::Display for EqualizerCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EqualizerCriterion::Zf => f.write_str("ZF"),
            EqualizerCriterion::Mmse => f.write_str("MMSE"),
        }
    }
}

/// Equalized symbols and their noise variances, both [RE, layer]
#[derive(Debug, Clone, PartialEq)]
pub struct EqualizerOutput {
    pub symbols: Array2<Complex64>,
    pub noise_vars: Array2<f64>,
}

/// Per-RE linear MIMO equalizer
#[derive(Debug, Clone)]
pub struct ChannelEqualizer {
    criterion: EqualizerCriterion,
}

impl ChannelEqualizer {
    pub fn new(criterion: EqualizerCriterion) -> Self {
        Self { criterion }
    }

    pub fn criterion(&self) -> EqualizerCriterion {
        self.criterion
    }

    /// Equalize the received symbols
    ///
    /// `rx_symbols` is [RE, Rx port] and `channel` is [RE, Rx port, Tx layer].
    /// The channel is multiplied by `tx_scaling` before equalization so that
    /// a reference signal to data power offset is removed from the output.
    pub fn equalize(
        &self,
        rx_symbols: ArrayView2<Complex64>,
        channel: ArrayView3<Complex64>,
        noise_var: f64,
        tx_scaling: f64,
    ) -> Result<EqualizerOutput, PhyError> {
        let (nof_re, nof_rx_ports) = rx_symbols.dim();
        let (ch_re, ch_rx_ports, nof_layers) = channel.dim();
        if ch_re != nof_re {
            return Err(PhyError::mismatch("number of REs", ch_re, nof_re));
        }
        if ch_rx_ports != nof_rx_ports {
            return Err(PhyError::mismatch("number of Rx ports", ch_rx_ports, nof_rx_ports));
        }
        if nof_layers == 0 {
            return Err(PhyError::InvalidConfiguration("Channel without Tx layers".to_string()));
        }
        if !tx_scaling.is_finite() || tx_scaling <= 0.0 {
            return Err(PhyError::InvalidConfiguration(format!(
                "Tx scaling must be positive, got {}",
                tx_scaling
            )));
        }
        let noise_ok = match self.criterion {
            EqualizerCriterion::Zf => noise_var >= 0.0,
            EqualizerCriterion::Mmse => noise_var > 0.0,
        };
        if !noise_ok || !noise_var.is_finite() {
            return Err(PhyError::InvalidConfiguration(format!(
                "Noise variance {} not valid for {}",
                noise_var, self.criterion
            )));
        }

        let mut symbols = Array2::zeros((nof_re, nof_layers));
        let mut noise_vars = Array2::zeros((nof_re, nof_layers));

        for re in 0..nof_re {
            let h = channel.index_axis(Axis(0), re).mapv(|z| z * tx_scaling);
            let y = rx_symbols.row(re);

            let (x, nv) = match self.criterion {
                EqualizerCriterion::Zf => zf(h.view(), y.to_owned(), noise_var),
                EqualizerCriterion::Mmse => mmse(h.view(), y.to_owned(), noise_var),
            }
            .ok_or(PhyError::SingularMatrix { re })?;

            symbols.row_mut(re).assign(&x);
            noise_vars.row_mut(re).assign(&Array1::from(nv));
        }

        debug!(
            "{} equalized {} REs, {} Rx ports x {} layers, mean noise var {:.3e}",
            self.criterion,
            nof_re,
            nof_rx_ports,
            nof_layers,
            noise_vars.mean().unwrap_or(0.0)
        );

        Ok(EqualizerOutput { symbols, noise_vars })
    }
}

/// Zero-forcing solution of one RE
///
/// With W = G^-1 H^H and G = H^H H, W W^H = G^-1, so the noise variance of
/// layer l, noise_var * sum_r |W_lr|^2, equals noise_var * Re G^-1_ll. Debug
/// builds check this identity; the MMSE noise uses its own formula.
fn zf(h: ArrayView2<Complex64>, y: Array1<Complex64>, noise_var: f64) -> Option<(Array1<Complex64>, Vec<f64>)> {
    let gram_inv = invert(gram(h).view())?;
    let weights = gram_inv.dot(&hermitian(h));
    let x = weights.dot(&y);

    let diag = real_diagonal(&gram_inv);
    if cfg!(debug_assertions) {
        // W W^H = G^-1
        for (l, &d) in diag.iter().enumerate() {
            let energy: f64 = weights.slice(s![l, ..]).iter().map(|w| w.norm_sqr()).sum();
            let error = (energy - d).abs() / d.abs();
            debug_assert!(
                error < ZF_NOISE_CHECK_TOLERANCE,
                "ZF noise variance mismatch on layer {}: {} vs. {}",
                l,
                energy,
                d
            );
        }
    }

    let noise_vars = diag.iter().map(|d| noise_var * d).collect();
    Some((x, noise_vars))
}

/// Bias-corrected MMSE solution of one RE
fn mmse(h: ArrayView2<Complex64>, y: Array1<Complex64>, noise_var: f64) -> Option<(Array1<Complex64>, Vec<f64>)> {
    let regularized_inv = invert(add_diagonal(&gram(h), noise_var).view())?;
    let x = regularized_inv.dot(&hermitian(h)).dot(&y);

    // m = diag((I + G / noise_var)^-1), so that the bias correction
    // diag((I + G / noise_var)^-1 G) is noise_var * (1 - m)
    let m: Vec<f64> = real_diagonal(&regularized_inv).iter().map(|d| noise_var * d).collect();
    let correction: Vec<f64> = m.iter().map(|m| noise_var * (1.0 - m)).collect();

    let x = Array1::from_iter(x.iter().zip(&correction).map(|(&x, &c)| x * noise_var / c));
    // noise_var / correction - 1
    let noise_vars: Vec<f64> = m.iter().map(|m| m / (1.0 - m)).collect();
    trace!("MMSE correction {:?}, noise {:?}", correction, noise_vars);
    assert!(
        noise_vars.iter().all(|&nv| nv > 0.0),
        "Non-positive MMSE noise variance {:?}",
        noise_vars
    );

    Some((x, noise_vars))
}
