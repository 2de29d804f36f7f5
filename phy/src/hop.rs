//! Intra-slot hop allocation
//!
//! Describes which PRBs, subcarriers and OFDM symbols of a slot one hop of a
//! PUSCH transmission occupies, according to 3GPP TS 38.214 Section 6.3

use crate::resource_grid::{NRE, NSYMB_PER_SLOT};
use crate::PhyError;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Set of OFDM symbols within a slot (bit l = symbol l)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SymbolMask(u16);

impl SymbolMask {
    const VALID: u16 = (1 << NSYMB_PER_SLOT) - 1;

    /// Mask from raw bits; bits above symbol 13 are rejected
    pub fn from_bits(bits: u16) -> Result<Self, PhyError> {
        if bits & !Self::VALID != 0 {
            return Err(PhyError::InvalidConfiguration(format!(
                "Symbol mask {:#06x} exceeds {} symbols",
                bits, NSYMB_PER_SLOT
            )));
        }
        Ok(Self(bits))
    }

    /// Mask with the given symbols set
    pub fn from_symbols(symbols: &[usize]) -> Result<Self, PhyError> {
        let mut bits = 0u16;
        for &l in symbols {
            if l >= NSYMB_PER_SLOT {
                return Err(PhyError::InvalidConfiguration(format!("Symbol index {} out of range", l)));
            }
            bits |= 1 << l;
        }
        Ok(Self(bits))
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, symbol: usize) -> bool {
        symbol < NSYMB_PER_SLOT && self.0 & (1 << symbol) != 0
    }

    /// Set symbols in increasing order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..NSYMB_PER_SLOT).filter(move |&l| self.contains(l))
    }

    pub fn union(&self, other: &SymbolMask) -> SymbolMask {
        SymbolMask(self.0 | other.0)
    }

    pub fn intersects(&self, other: &SymbolMask) -> bool {
        self.0 & other.0 != 0
    }
}

/// Set of subcarriers within one PRB (bit k = subcarrier k)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReMask(u16);

impl ReMask {
    const VALID: u16 = (1 << NRE) - 1;

    /// Every subcarrier of the PRB
    pub const ALL: ReMask = ReMask(Self::VALID);

    pub fn from_bits(bits: u16) -> Result<Self, PhyError> {
        if bits & !Self::VALID != 0 {
            return Err(PhyError::InvalidConfiguration(format!(
                "RE mask {:#06x} exceeds {} subcarriers",
                bits, NRE
            )));
        }
        Ok(Self(bits))
    }

    /// Mask with the given subcarriers set
    pub fn from_subcarriers(subcarriers: &[usize]) -> Result<Self, PhyError> {
        let mut bits = 0u16;
        for &k in subcarriers {
            if k >= NRE {
                return Err(PhyError::InvalidConfiguration(format!("Subcarrier index {} out of range", k)));
            }
            bits |= 1 << k;
        }
        Ok(Self(bits))
    }

    /// Every `stride`-th subcarrier starting at `offset`
    pub fn comb(stride: usize, offset: usize) -> Result<Self, PhyError> {
        if stride == 0 || offset >= stride {
            return Err(PhyError::InvalidConfiguration(format!(
                "Invalid comb: stride {}, offset {}",
                stride, offset
            )));
        }
        let subcarriers: Vec<usize> = (offset..NRE).step_by(stride).collect();
        Self::from_subcarriers(&subcarriers)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn contains(&self, subcarrier: usize) -> bool {
        subcarrier < NRE && self.0 & (1 << subcarrier) != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..NRE).filter(move |&k| self.contains(k))
    }

    pub fn intersects(&self, other: &ReMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Average distance between pilots, in subcarriers
    pub fn stride(&self) -> usize {
        match self.count() {
            0 => NRE,
            n => (NRE as f64 / n as f64).round().max(1.0) as usize,
        }
    }
}

/// Allocation of one intra-slot hop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopConfig {
    /// OFDM symbols of this hop carrying DM-RS
    pub dmrs_symbols: SymbolMask,
    /// Subcarriers carrying DM-RS within each pilot PRB
    pub re_mask: ReMask,
    /// First allocated PRB
    pub start_prb: usize,
    /// Number of allocated PRBs
    pub nof_prb: usize,
    /// Allocated PRBs over the whole grid
    pub prb_mask: Vec<bool>,
    /// First allocated OFDM symbol
    pub first_symbol: usize,
    /// Number of allocated OFDM symbols
    pub nof_symbols: usize,
}

impl HopConfig {
    /// Hop over `nof_prb` contiguous PRBs of a `grid_prb` wide grid
    pub fn contiguous(
        grid_prb: usize,
        start_prb: usize,
        nof_prb: usize,
        re_mask: ReMask,
        dmrs_symbols: SymbolMask,
        symbols: Range<usize>,
    ) -> Result<Self, PhyError> {
        let prb_mask = (0..grid_prb)
            .map(|prb| prb >= start_prb && prb < start_prb + nof_prb)
            .collect();
        let hop = Self {
            dmrs_symbols,
            re_mask,
            start_prb,
            nof_prb,
            prb_mask,
            first_symbol: symbols.start,
            nof_symbols: symbols.len(),
        };
        hop.validate()?;
        Ok(hop)
    }

    /// Check the allocation invariants
    pub fn validate(&self) -> Result<(), PhyError> {
        let popcount = self.prb_mask.iter().filter(|&&used| used).count();
        if popcount != self.nof_prb {
            return Err(PhyError::mismatch("hop PRB mask popcount", self.nof_prb, popcount));
        }
        if self.nof_prb == 0 {
            return Err(PhyError::InvalidConfiguration("Hop without PRBs".to_string()));
        }
        if self.prb_mask.iter().position(|&used| used) != Some(self.start_prb) {
            return Err(PhyError::InvalidConfiguration(format!(
                "Hop start PRB {} is not the first PRB of its mask",
                self.start_prb
            )));
        }
        if self.re_mask.count() == 0 {
            return Err(PhyError::InvalidConfiguration("Hop RE mask is empty".to_string()));
        }
        if self.first_symbol + self.nof_symbols > NSYMB_PER_SLOT {
            return Err(PhyError::InvalidConfiguration(format!(
                "Symbol allocation {}+{} exceeds the slot",
                self.first_symbol, self.nof_symbols
            )));
        }
        if let Some(l) = self.dmrs_symbols.iter().find(|l| !self.symbols().contains(l)) {
            return Err(PhyError::InvalidConfiguration(format!(
                "DM-RS symbol {} outside allocation {:?}",
                l,
                self.symbols()
            )));
        }
        Ok(())
    }

    /// Same allocation with the pilots on the subcarriers of another CDM group
    pub fn with_re_mask(&self, re_mask: ReMask) -> HopConfig {
        HopConfig {
            re_mask,
            ..self.clone()
        }
    }

    /// Allocated OFDM symbols
    pub fn symbols(&self) -> Range<usize> {
        self.first_symbol..self.first_symbol + self.nof_symbols
    }

    /// Allocated PRB indices in increasing order
    pub fn prbs(&self) -> impl Iterator<Item = usize> + '_ {
        self.prb_mask
            .iter()
            .enumerate()
            .filter_map(|(prb, &used)| used.then_some(prb))
    }

    /// Grid subcarriers carrying DM-RS: the RE mask replicated over the PRB mask
    pub fn pilot_subcarriers(&self) -> Vec<usize> {
        self.prbs()
            .flat_map(|prb| self.re_mask.iter().map(move |k| prb * NRE + k))
            .collect()
    }

    /// Every grid subcarrier of the allocated PRBs
    pub fn allocated_subcarriers(&self) -> Vec<usize> {
        self.prbs().flat_map(|prb| prb * NRE..(prb + 1) * NRE).collect()
    }

    /// Number of pilot REs per DM-RS symbol
    pub fn nof_pilot_res(&self) -> usize {
        self.nof_prb * self.re_mask.count()
    }

    /// A hop without DM-RS takes no part in the estimation
    pub fn is_empty(&self) -> bool {
        self.dmrs_symbols.is_empty()
    }
}
