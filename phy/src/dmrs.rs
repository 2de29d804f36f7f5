/// DM-RS (Demodulation Reference Signal) generation for PUSCH
/// Based on 3GPP TS 38.211 Section 6.4.1.1 (transform precoding disabled)

use crate::hop::{HopConfig, ReMask};
use crate::PhyError;
use ndarray::{Array2, Array3};
use num_complex::Complex64;
use std::f64::consts::FRAC_1_SQRT_2;
use tracing::trace;

/// DMRS Type configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DmrsType {
    Type1,
    Type2,
}

impl DmrsType {
    /// Get number of DMRS per resource block
    pub fn nof_dmrs_per_rb(&self) -> usize {
        match self {
            DmrsType::Type1 => 6,  // Every other subcarrier
            DmrsType::Type2 => 4,  // Two groups of 2 consecutive subcarriers
        }
    }

    /// Number of CDM groups
    pub fn nof_cdm_groups(&self) -> u8 {
        match self {
            DmrsType::Type1 => 2,
            DmrsType::Type2 => 3,
        }
    }

    /// Subcarriers occupied by a CDM group within one resource block
    pub fn re_mask(&self, cdm_group: u8) -> Result<ReMask, PhyError> {
        match (self, cdm_group) {
            (DmrsType::Type1, 0) => ReMask::comb(2, 0),
            (DmrsType::Type1, 1) => ReMask::comb(2, 1),
            (DmrsType::Type2, 0) => ReMask::from_subcarriers(&[0, 1, 6, 7]),
            (DmrsType::Type2, 1) => ReMask::from_subcarriers(&[2, 3, 8, 9]),
            (DmrsType::Type2, 2) => ReMask::from_subcarriers(&[4, 5, 10, 11]),
            _ => Err(PhyError::InvalidConfiguration(format!(
                "Invalid CDM group {} for {:?}",
                cdm_group, self
            ))),
        }
    }
}

/// Maximum number of DM-RS ports of one transmission
pub const MAX_DMRS_PORTS: usize = 4;

/// DMRS sequence generator
pub struct DmrsSequenceGenerator {
    /// Gold sequence LFSR state
    x1: u32,
    x2: u32,
}

impl DmrsSequenceGenerator {
    /// Create new DMRS sequence generator with initialization value
    pub fn new(c_init: u32) -> Self {
        // x1(0) = 1, x1(n) = 0 for n = 1..30
        let x1 = 1;
        // Initialize x2 with c_init
        let x2 = c_init & 0x7FFFFFFF;

        let mut generator = Self { x1, x2 };
        // Advance LFSR by Nc=1600 iterations (TS 38.211 5.2.1)
        for _ in 0..1600 {
            generator.advance();
        }
        generator
    }

    /// Advance LFSR state
    fn advance(&mut self) {
        // x1 sequence: x1(n+31) = (x1(n+3) + x1(n)) mod 2
        let x1_new = ((self.x1 >> 3) ^ self.x1) & 1;
        self.x1 = ((self.x1 >> 1) | (x1_new << 30)) & 0x7FFFFFFF;

        // x2 sequence: x2(n+31) = (x2(n+3) + x2(n+2) + x2(n+1) + x2(n)) mod 2
        let x2_new = ((self.x2 >> 3) ^ (self.x2 >> 2) ^ (self.x2 >> 1) ^ self.x2) & 1;
        self.x2 = ((self.x2 >> 1) | (x2_new << 30)) & 0x7FFFFFFF;
    }

    /// Generate next bit from the sequence
    pub fn next_bit(&mut self) -> u8 {
        let c = (self.x1 ^ self.x2) & 1;
        self.advance();
        c as u8
    }

    /// Generate QPSK symbol from sequence
    pub fn next_qpsk_symbol(&mut self, amplitude: f64) -> Complex64 {
        let c0 = self.next_bit();
        let c1 = self.next_bit();

        Complex64::new(
            amplitude * (1.0 - 2.0 * c0 as f64),
            amplitude * (1.0 - 2.0 * c1 as f64),
        )
    }

    /// Skip n symbols (2 bits per symbol for QPSK)
    pub fn skip(&mut self, n_symbols: usize) {
        for _ in 0..(n_symbols * 2) {
            self.advance();
        }
    }
}

/// Calculate PUSCH DMRS initialization value
/// c_init = (2^17 * (14 * n_slot + l + 1) * (2 * N_ID + 1) + 2 * N_ID + n_SCID) mod 2^31
pub fn calculate_pusch_dmrs_cinit(slot: u32, symbol: u8, n_id: u16, n_scid: bool) -> u32 {
    let l = symbol as u64;
    let n_symb_slot = 14u64; // Normal CP
    let scid = if n_scid { 1 } else { 0 };
    let n_id = n_id as u64;
    (((1u64 << 17) * (n_symb_slot * slot as u64 + l + 1) * (2 * n_id + 1) + 2 * n_id + scid) & 0x7FFFFFFF) as u32
}

/// Generate DMRS sequence for given resource blocks
pub fn generate_dmrs_sequence(
    rb_mask: &[bool],
    nof_dmrs_per_rb: usize,
    generator: &mut DmrsSequenceGenerator,
    amplitude: f64,
) -> Vec<Complex64> {
    let mut sequence = Vec::with_capacity(rb_mask.len() * nof_dmrs_per_rb);
    let mut current_rb = 0;

    for (rb, &is_allocated) in rb_mask.iter().enumerate() {
        if is_allocated {
            // Skip symbols between current position and this RB
            if rb > current_rb {
                generator.skip((rb - current_rb) * nof_dmrs_per_rb);
            }

            // Generate symbols for this RB
            for _ in 0..nof_dmrs_per_rb {
                sequence.push(generator.next_qpsk_symbol(amplitude));
            }

            current_rb = rb + 1;
        }
    }

    sequence
}

/// PUSCH DM-RS pilot generator
#[derive(Debug, Clone)]
pub struct PuschDmrsGenerator {
    /// DM-RS scrambling identity
    pub n_id: u16,
    /// Scrambling selector
    pub n_scid: bool,
    /// DM-RS configuration type
    pub dmrs_type: DmrsType,
}

impl PuschDmrsGenerator {
    pub fn new(n_id: u16, n_scid: bool, dmrs_type: DmrsType) -> Self {
        Self { n_id, n_scid, dmrs_type }
    }

    /// Pilot matrix for the given hops: one row per pilot RE, one column per
    /// DM-RS symbol, hop 1 columns first
    pub fn generate(&self, slot: u32, hops: &[&HopConfig]) -> Result<Array2<Complex64>, PhyError> {
        let active: Vec<&HopConfig> = hops.iter().copied().filter(|hop| !hop.is_empty()).collect();
        let first = active
            .first()
            .ok_or_else(|| PhyError::InvalidConfiguration("No hop carries DM-RS".to_string()))?;
        let nof_pilot_res = first.nof_pilot_res();
        let nof_columns: usize = active.iter().map(|hop| hop.dmrs_symbols.count()).sum();

        let mut pilots = Array2::zeros((nof_pilot_res, nof_columns));
        let mut column = 0;
        for hop in &active {
            if hop.nof_pilot_res() != nof_pilot_res {
                return Err(PhyError::mismatch("pilot REs per hop", nof_pilot_res, hop.nof_pilot_res()));
            }
            if hop.re_mask.count() != self.dmrs_type.nof_dmrs_per_rb() {
                return Err(PhyError::mismatch(
                    format!("{:?} DM-RS per PRB", self.dmrs_type),
                    self.dmrs_type.nof_dmrs_per_rb(),
                    hop.re_mask.count(),
                ));
            }
            for symbol in hop.dmrs_symbols.iter() {
                let c_init = calculate_pusch_dmrs_cinit(slot, symbol as u8, self.n_id, self.n_scid);
                let sequence = self.symbol_sequence(hop, c_init);
                trace!("DM-RS symbol {}: c_init={:#x}, {} pilots", symbol, c_init, sequence.len());
                for (row, value) in sequence.into_iter().enumerate() {
                    pilots[(row, column)] = value;
                }
                column += 1;
            }
        }

        Ok(pilots)
    }

    /// Pilots of `nof_layers` layers as [pilot RE, DM-RS symbol, layer]
    ///
    /// All layers use the same sequence. Layers 0 and 1 share a CDM group,
    /// as do layers 2 and 3, and the odd layer of each pair carries the
    /// frequency cover w_f = [+1, -1] over adjacent pilot REs.
    pub fn generate_layers(
        &self,
        slot: u32,
        hops: &[&HopConfig],
        nof_layers: usize,
    ) -> Result<Array3<Complex64>, PhyError> {
        if nof_layers == 0 || nof_layers > MAX_DMRS_PORTS {
            return Err(PhyError::InvalidConfiguration(format!(
                "{} DM-RS ports, between 1 and {} supported",
                nof_layers, MAX_DMRS_PORTS
            )));
        }
        let base = self.generate(slot, hops)?;
        let (nof_res, nof_columns) = base.dim();
        Ok(Array3::from_shape_fn((nof_res, nof_columns, nof_layers), |(row, column, layer)| {
            if layer % 2 == 1 && row % 2 == 1 {
                -base[(row, column)]
            } else {
                base[(row, column)]
            }
        }))
    }

    /// Sequence values on the hop's pilot REs of one symbol
    fn symbol_sequence(&self, hop: &HopConfig, c_init: u32) -> Vec<Complex64> {
        let mut generator = DmrsSequenceGenerator::new(c_init);
        generate_dmrs_sequence(&hop.prb_mask, hop.re_mask.count(), &mut generator, FRAC_1_SQRT_2)
    }
}
