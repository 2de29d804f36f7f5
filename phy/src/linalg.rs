//! Small dense complex linear algebra
//!
//! Per-RE MIMO equalization works on matrices of at most a few rows and
//! columns, so plain Gauss-Jordan elimination is used instead of a full
//! LAPACK binding.

use ndarray::{Array2, ArrayView2};
use num_complex::Complex64;

/// Pivots below this fraction of the largest matrix entry are treated as zero
const SINGULAR_TOLERANCE: f64 = 1e-12;

/// Conjugate transpose
pub fn hermitian(m: ArrayView2<Complex64>) -> Array2<Complex64> {
    m.t().mapv(|z| z.conj())
}

/// Gram matrix H^H H
pub fn gram(h: ArrayView2<Complex64>) -> Array2<Complex64> {
    hermitian(h).dot(&h)
}

/// Identity matrix scaled by `value`, added to `m`
pub fn add_diagonal(m: &Array2<Complex64>, value: f64) -> Array2<Complex64> {
    let mut out = m.clone();
    for z in out.diag_mut() {
        *z += value;
    }
    out
}

/// Real part of the main diagonal
pub fn real_diagonal(m: &Array2<Complex64>) -> Vec<f64> {
    m.diag().iter().map(|z| z.re).collect()
}

/// Invert a square matrix by Gauss-Jordan elimination with partial pivoting
///
/// Returns `None` if the matrix is not square or is numerically singular.
pub fn invert(m: ArrayView2<Complex64>) -> Option<Array2<Complex64>> {
    let (n, cols) = m.dim();
    if n != cols {
        return None;
    }

    let scale = m.iter().map(|z| z.norm()).fold(0.0, f64::max);
    if scale == 0.0 {
        return None;
    }

    // Augmented [A | I]
    let mut aug = Array2::zeros((n, 2 * n));
    aug.slice_mut(ndarray::s![.., ..n]).assign(&m);
    for i in 0..n {
        aug[(i, n + i)] = Complex64::new(1.0, 0.0);
    }

    for col in 0..n {
        let (pivot_row, pivot_mag) = (col..n)
            .map(|row| (row, aug[(row, col)].norm()))
            .fold((col, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });
        if pivot_mag < SINGULAR_TOLERANCE * scale {
            return None;
        }
        if pivot_row != col {
            for j in 0..2 * n {
                aug.swap((col, j), (pivot_row, j));
            }
        }

        let inv_pivot = aug[(col, col)].inv();
        aug.row_mut(col).mapv_inplace(|z| z * inv_pivot);

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[(row, col)];
            if factor == Complex64::new(0.0, 0.0) {
                continue;
            }
            for j in 0..2 * n {
                let delta = factor * aug[(col, j)];
                aug[(row, j)] -= delta;
            }
        }
    }

    Some(aug.slice(ndarray::s![.., n..]).to_owned())
}
