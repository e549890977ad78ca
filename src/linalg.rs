// poisson_sph - A distributed spectral solver for the Poisson equation on spherical grids
// Copyright (C) 2023 Julian Jeggle, Raphael Wittkowski

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Dense numerical primitives: the SPD tridiagonal solver and the
//! generalized symmetric eigensolver the angular setup is built on

use nalgebra::DMatrix;

/// A non-positive pivot encountered while factorizing a tridiagonal system
/// that must be symmetric positive definite
#[derive(Debug, Clone, Copy)]
pub(crate) struct PivotFailure {
    pub index: usize,
    pub pivot: f64,
}

/// LDLᵀ factorization of a symmetric positive definite tridiagonal matrix.
/// No pivoting: losing positive definiteness is a fatal input error, not
/// something to work around.
#[derive(Debug)]
pub(crate) struct SpdTridiagonal {
    /// Pivots of D
    d: Vec<f64>,
    /// Subdiagonal of the unit lower bidiagonal L
    l: Vec<f64>,
}

impl SpdTridiagonal {
    pub(crate) fn factor(diag: &[f64], offdiag: &[f64]) -> Result<SpdTridiagonal, PivotFailure> {
        let n = diag.len();
        debug_assert_eq!(offdiag.len(), n - 1);
        let mut d = vec![0.0; n];
        let mut l = vec![0.0; n - 1];
        d[0] = diag[0];
        for i in 1..n {
            let prev = d[i - 1];
            if prev <= 0.0 {
                return Err(PivotFailure {
                    index: i - 1,
                    pivot: prev,
                });
            }
            l[i - 1] = offdiag[i - 1] / prev;
            d[i] = diag[i] - l[i - 1] * offdiag[i - 1];
        }
        if d[n - 1] <= 0.0 {
            return Err(PivotFailure {
                index: n - 1,
                pivot: d[n - 1],
            });
        }
        Ok(SpdTridiagonal { d, l })
    }

    /// Solve in place for any number of right-hand sides, each stored as a
    /// contiguous column of length n in `rhs`
    pub(crate) fn solve(&self, rhs: &mut [f64]) {
        let n = self.d.len();
        debug_assert_eq!(rhs.len() % n, 0);
        for col in rhs.chunks_exact_mut(n) {
            // Forward substitution with L
            for i in 1..n {
                col[i] -= self.l[i - 1] * col[i - 1];
            }
            // Diagonal scaling
            for (x, d) in col.iter_mut().zip(&self.d) {
                *x /= d;
            }
            // Back substitution with Lᵀ
            for i in (0..n - 1).rev() {
                col[i] -= self.l[i] * col[i + 1];
            }
        }
    }
}

/// Eigenpairs of the generalized problem A·v = ω·B·v with A symmetric
/// tridiagonal and B diagonal positive. Vectors are the columns of
/// `vectors`, B-orthonormal (vᵀ·B·v' = δ), sorted by descending eigenvalue.
pub(crate) struct GeneralizedEigen {
    pub values: Vec<f64>,
    pub vectors: DMatrix<f64>,
}

/// Solve A·v = ω·B·v by the congruence C = B^(−1/2)·A·B^(−1/2), handing the
/// dense symmetric problem to nalgebra. Returns `None` if the underlying
/// eigensolver fails to converge.
pub(crate) fn generalized_symmetric_tridiagonal(
    diag: &[f64],
    offdiag: &[f64],
    weight: &[f64],
) -> Option<GeneralizedEigen> {
    let m = diag.len();
    debug_assert_eq!(offdiag.len(), m - 1);
    debug_assert!(weight.iter().all(|&w| w > 0.0));
    let isqrt: Vec<f64> = weight.iter().map(|w| 1.0 / w.sqrt()).collect();
    let c = DMatrix::from_fn(m, m, |i, j| {
        if i == j {
            diag[i] * isqrt[i] * isqrt[i]
        } else if i + 1 == j || j + 1 == i {
            offdiag[i.min(j)] * isqrt[i] * isqrt[j]
        } else {
            0.0
        }
    });
    let eigen = c.try_symmetric_eigen(1.0e-13, 5000)?;
    // Sort by descending eigenvalue so the ordering is deterministic across
    // ranks and the near-zero mode of wavenumber 0 comes first
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[b]
            .partial_cmp(&eigen.eigenvalues[a])
            .unwrap()
    });
    let values = order.iter().map(|&j| eigen.eigenvalues[j]).collect();
    // Undo the congruence: v = B^(−1/2)·u keeps the columns B-orthonormal
    let vectors = DMatrix::from_fn(m, m, |i, j| eigen.eigenvectors[(i, order[j])] * isqrt[i]);
    Some(GeneralizedEigen { values, vectors })
}
