//! Multi-port channel estimation
//!
//! Runs the port channel estimator on every receive port of a resource grid
//! and combines the per-port metrics into global ones.

use crate::channel_estimator::{EstimatorConfig, PortChannelEstimate, PortChannelEstimator};
use crate::hop::HopConfig;
use crate::resource_grid::ResourceGrid;
use crate::PhyError;
use ndarray::{Array3, Array4, ArrayView3, Axis};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Channel metrics of one port, or of all of them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortMetrics {
    pub noise_var: f64,
    pub rsrp: f64,
    pub epre: f64,
    /// Not defined globally, since it depends on how ports are combined
    pub sinr: Option<f64>,
    /// Seconds
    pub time_alignment: f64,
    pub cfo_hz: Option<f64>,
}

impl From<&PortChannelEstimate> for PortMetrics {
    fn from(estimate: &PortChannelEstimate) -> Self {
        Self {
            noise_var: estimate.noise_var,
            rsrp: estimate.rsrp,
            epre: estimate.epre,
            sinr: Some(estimate.sinr),
            time_alignment: estimate.time_alignment,
            cfo_hz: estimate.cfo_hz,
        }
    }
}

impl PortMetrics {
    /// Average over ports; the CFO only if every port has one
    fn global(ports: &[PortMetrics]) -> Self {
        let n = ports.len() as f64;
        let mean = |f: fn(&PortMetrics) -> f64| ports.iter().map(f).sum::<f64>() / n;
        let cfos: Option<Vec<f64>> = ports.iter().map(|p| p.cfo_hz).collect();

        Self {
            noise_var: mean(|p| p.noise_var),
            rsrp: mean(|p| p.rsrp),
            epre: mean(|p| p.epre),
            sinr: None,
            time_alignment: mean(|p| p.time_alignment),
            cfo_hz: cfos.map(|cfos| cfos.iter().sum::<f64>() / n),
        }
    }
}

/// Channel estimate of all receive ports
#[derive(Debug, Clone, PartialEq)]
pub struct MultiPortEstimate {
    /// [subcarrier, symbol, port, layer]
    pub channel: Array4<Complex64>,
    pub ports: Vec<PortMetrics>,
    pub global: PortMetrics,
}

impl MultiPortEstimate {
    pub fn nof_ports(&self) -> usize {
        self.ports.len()
    }

    pub fn nof_layers(&self) -> usize {
        self.channel.dim().3
    }

    /// Channel on the given (subcarrier, symbol) REs as [RE, port, layer]
    pub fn re_channel(&self, res: &[(usize, usize)]) -> Array3<Complex64> {
        Array3::from_shape_fn((res.len(), self.nof_ports(), self.nof_layers()), |(i, port, layer)| {
            let (subcarrier, symbol) = res[i];
            self.channel[(subcarrier, symbol, port, layer)]
        })
    }
}

/// Port channel estimator applied to every receive port
pub struct MultiPortChannelEstimator {
    estimator: PortChannelEstimator,
}

impl MultiPortChannelEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            estimator: PortChannelEstimator::new(config),
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        self.estimator.config()
    }

    /// Estimate the channel of every port of `grid`
    ///
    /// Ports share the pilots, [pilot RE, DM-RS symbol, layer], and the hop
    /// configuration and are estimated independently of each other.
    pub fn estimate(
        &self,
        grid: &ResourceGrid,
        pilots: ArrayView3<Complex64>,
        beta: f64,
        hop1: &HopConfig,
        hop2: Option<&HopConfig>,
    ) -> Result<MultiPortEstimate, PhyError> {
        let (nof_subcarriers, nof_symbols, nof_ports) = grid.as_array().dim();
        let mut channel = Array4::zeros((nof_subcarriers, nof_symbols, nof_ports, pilots.dim().2));
        let mut ports = Vec::with_capacity(grid.nof_ports());

        for (port, port_grid) in grid.as_array().axis_iter(Axis(2)).enumerate() {
            let estimate = self.estimator.estimate(port_grid, pilots, beta, hop1, hop2)?;
            debug!(
                "Port {}: noise_var={:.3e}, rsrp={:.3e}, sinr={:.1}dB",
                port,
                estimate.noise_var,
                estimate.rsrp,
                common::linear_to_db(estimate.sinr)
            );
            channel.index_axis_mut(Axis(2), port).assign(&estimate.channel);
            ports.push(PortMetrics::from(&estimate));
        }

        let global = PortMetrics::global(&ports);
        info!(
            "{} ports: noise_var={:.3e}, rsrp={:.3e}, epre={:.3e}, ta={:.3e}s, cfo={:?}Hz",
            ports.len(),
            global.noise_var,
            global.rsrp,
            global.epre,
            global.time_alignment,
            global.cfo_hz
        );

        Ok(MultiPortEstimate { channel, ports, global })
    }
}
