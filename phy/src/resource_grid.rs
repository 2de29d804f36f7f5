//! Resource Grid for 5G NR uplink slots
//!
//! Holds one slot of received resource elements for every receive port,
//! indexed as [subcarrier, OFDM symbol, port] according to 3GPP TS 38.211

use crate::PhyError;
use common::utils::prb_to_subcarriers;
use ndarray::{Array2, Array3, ArrayView2, ArrayViewMut2, Axis};
use num_complex::Complex64;
use tracing::debug;

/// Number of subcarriers per resource block
pub const NRE: usize = 12;

/// Number of OFDM symbols per slot (normal cyclic prefix)
pub const NSYMB_PER_SLOT: usize = 14;

/// Resource grid for one slot
#[derive(Debug, Clone)]
pub struct ResourceGrid {
    /// 3D grid: [subcarriers, symbols, ports]
    grid: Array3<Complex64>,
    /// Number of resource blocks
    nof_prb: usize,
}

impl ResourceGrid {
    /// Create a zeroed grid spanning `nof_prb` resource blocks and `nof_ports` receive ports
    pub fn new(nof_prb: usize, nof_ports: usize) -> Result<Self, PhyError> {
        if nof_prb == 0 || nof_ports == 0 {
            return Err(PhyError::InvalidConfiguration(format!(
                "Resource grid needs at least one PRB and one port, got {} PRBs and {} ports",
                nof_prb, nof_ports
            )));
        }

        let nof_subcarriers = prb_to_subcarriers(nof_prb);
        debug!(
            "Creating resource grid with dimensions: ({}, {}, {})",
            nof_subcarriers, NSYMB_PER_SLOT, nof_ports
        );

        Ok(Self {
            grid: Array3::zeros((nof_subcarriers, NSYMB_PER_SLOT, nof_ports)),
            nof_prb,
        })
    }

    /// Wrap an existing [subcarrier, symbol, port] array
    pub fn from_array(grid: Array3<Complex64>) -> Result<Self, PhyError> {
        let (nof_subcarriers, nof_symbols, nof_ports) = grid.dim();
        if nof_ports == 0 {
            return Err(PhyError::InvalidConfiguration("Resource grid without ports".to_string()));
        }
        if nof_symbols != NSYMB_PER_SLOT {
            return Err(PhyError::mismatch("grid symbols", NSYMB_PER_SLOT, nof_symbols));
        }
        if nof_subcarriers == 0 || nof_subcarriers % NRE != 0 {
            return Err(PhyError::InvalidConfiguration(format!(
                "Grid with {} subcarriers is not a whole number of PRBs",
                nof_subcarriers
            )));
        }

        Ok(Self {
            nof_prb: nof_subcarriers / NRE,
            grid,
        })
    }

    /// Number of resource blocks
    pub fn nof_prb(&self) -> usize {
        self.nof_prb
    }

    /// Number of subcarriers
    pub fn nof_subcarriers(&self) -> usize {
        self.grid.dim().0
    }

    /// Number of receive ports
    pub fn nof_ports(&self) -> usize {
        self.grid.dim().2
    }

    /// Clear the entire grid
    pub fn clear(&mut self) {
        self.grid.fill(Complex64::new(0.0, 0.0));
    }

    /// Write a resource element
    pub fn put(&mut self, port: usize, subcarrier: usize, symbol: usize, value: Complex64) -> Result<(), PhyError> {
        let elem = self.grid.get_mut((subcarrier, symbol, port)).ok_or_else(|| {
            PhyError::InvalidConfiguration(format!(
                "RE out of bounds: port={}, subcarrier={}, symbol={}",
                port, subcarrier, symbol
            ))
        })?;
        *elem = value;
        Ok(())
    }

    /// Read a resource element
    pub fn get(&self, port: usize, subcarrier: usize, symbol: usize) -> Option<Complex64> {
        self.grid.get((subcarrier, symbol, port)).copied()
    }

    /// [subcarrier, symbol] view of one port
    pub fn port(&self, port: usize) -> Option<ArrayView2<'_, Complex64>> {
        if port >= self.nof_ports() {
            return None;
        }
        Some(self.grid.index_axis(Axis(2), port))
    }

    /// Mutable [subcarrier, symbol] view of one port
    pub fn port_mut(&mut self, port: usize) -> Option<ArrayViewMut2<'_, Complex64>> {
        if port >= self.nof_ports() {
            return None;
        }
        Some(self.grid.index_axis_mut(Axis(2), port))
    }

    /// The whole [subcarrier, symbol, port] array
    pub fn as_array(&self) -> &Array3<Complex64> {
        &self.grid
    }

    /// Collect the given (subcarrier, symbol) REs of every port into an [RE, port] matrix
    pub fn gather(&self, res: &[(usize, usize)]) -> Result<Array2<Complex64>, PhyError> {
        let mut out = Array2::zeros((res.len(), self.nof_ports()));
        for (i, &(subcarrier, symbol)) in res.iter().enumerate() {
            if subcarrier >= self.nof_subcarriers() || symbol >= NSYMB_PER_SLOT {
                return Err(PhyError::InvalidConfiguration(format!(
                    "RE out of bounds: subcarrier={}, symbol={}",
                    subcarrier, symbol
                )));
            }
            out.row_mut(i).assign(&self.grid.slice(ndarray::s![subcarrier, symbol, ..]));
        }
        Ok(out)
    }
}
