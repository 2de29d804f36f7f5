//! Interpolation of pilot estimates
//!
//! Fills the non-pilot subcarriers of an allocation by complex linear
//! interpolation between neighbouring pilots, then the non-DM-RS symbols
//! between DM-RS symbols the same way. Positions outside the first and last
//! known one hold the nearest known value.

use ndarray::{Array2, ArrayView2};
use num_complex::Complex64;
use std::ops::Range;

/// Interpolate `values` known at increasing `positions` onto increasing `targets`
pub fn interpolate(positions: &[usize], values: &[Complex64], targets: &[usize]) -> Vec<Complex64> {
    debug_assert_eq!(positions.len(), values.len());
    let (Some(&first), Some(&last)) = (values.first(), values.last()) else {
        return vec![Complex64::new(0.0, 0.0); targets.len()];
    };

    let mut segment = 0;
    targets
        .iter()
        .map(|&target| {
            if target <= positions[0] {
                return first;
            }
            if target >= positions[positions.len() - 1] {
                return last;
            }
            while positions[segment + 1] <= target {
                segment += 1;
            }
            let (left, right) = (positions[segment], positions[segment + 1]);
            let fraction = (target - left) as f64 / (right - left) as f64;
            values[segment] + (values[segment + 1] - values[segment]) * fraction
        })
        .collect()
}

/// Fill a hop's allocation from estimates on its pilot REs
///
/// `estimates` is [pilot subcarrier, known symbol]; the result is
/// [allocated subcarrier, symbol of `symbols`].
pub fn fill_grid(
    pilot_subcarriers: &[usize],
    known_symbols: &[usize],
    estimates: ArrayView2<Complex64>,
    subcarriers: &[usize],
    symbols: Range<usize>,
) -> Array2<Complex64> {
    // Frequency first, on the known symbols only
    let columns: Vec<Vec<Complex64>> = estimates
        .columns()
        .into_iter()
        .map(|column| interpolate(pilot_subcarriers, &column.to_vec(), subcarriers))
        .collect();

    let targets: Vec<usize> = symbols.collect();
    let mut grid = Array2::zeros((subcarriers.len(), targets.len()));
    for (row, mut out) in grid.rows_mut().into_iter().enumerate() {
        let known: Vec<Complex64> = columns.iter().map(|column| column[row]).collect();
        for (value, filled) in out.iter_mut().zip(interpolate(known_symbols, &known, &targets)) {
            *value = filled;
        }
    }
    grid
}
