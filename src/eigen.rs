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

//! Diagonalization of the discrete θ-Laplacian, one pair of half-sized
//! eigenproblems per φ-wavenumber
//!
//! The discrete angular operator commutes with the equatorial reflection
//! θ → π − θ, so its Nθ-sized eigenproblem separates into two Nθ/2-sized
//! sectors: even modes satisfy a Neumann condition at the equator, odd modes
//! a Dirichlet condition. Both sectors are generalized symmetric problems
//! A·v = ω·B·v with B the diagonal of polar volume weights; their
//! eigenvalues are the discrete analog of −l(l+1) and index the radial
//! systems solved per mode.

use log::debug;
use nalgebra::DMatrix;

use crate::error::{Result, SolverError};
use crate::grid::{SphericalGrid, Window};
use crate::linalg;

/// Eigenpairs of the discrete θ-Laplacian for one local φ-slot.
///
/// `lambda` concatenates the two sectors: even eigenvalues in the first
/// Nθ/2 entries, odd eigenvalues in the second. Eigenvectors are the
/// columns of `even`/`odd`, B-orthonormal against the volume weights of the
/// lower θ half.
pub(crate) struct AngularBasis {
    pub lambda: Vec<f64>,
    pub even: DMatrix<f64>,
    pub odd: DMatrix<f64>,
}

/// Solve the even and odd sector eigenproblems for every φ-wavenumber owned
/// by this rank. `index` is the bit-reversal table: the spectral slot kk of
/// the FFT output stores global wavenumber `index[phi0 + kk]`, and the
/// operator is assembled for that wavenumber.
pub(crate) fn build_bases(
    grid: &SphericalGrid,
    window: &Window,
    index: &[usize],
) -> Result<Vec<AngularBasis>> {
    let m = grid.ntheta / 2;
    let dtheta = grid.dtheta;
    let dphi = grid.dphi;
    let mut bases = Vec::with_capacity(window.nphi);
    for kk in 0..window.nphi {
        let k = index[window.phi0 + kk];
        // Spectral multiplier of the periodic φ second difference, scaled
        // like the θ coefficients below
        let lambda_phi = {
            let s = 2.0 * (0.5 * k as f64 * dphi).sin() / dphi;
            s * s * dtheta
        };
        let b: Vec<f64> = (0..m)
            .map(|j| {
                -(grid.theta_if[j].sin() + grid.theta_if[j + 1].sin()) / (dtheta * dtheta)
                    - lambda_phi / (grid.theta[j].sin() * dtheta)
            })
            .collect();
        let c: Vec<f64> = (0..m)
            .map(|j| grid.theta_if[j + 1].sin() / (dtheta * dtheta))
            .collect();
        let weight = &grid.vol_th[..m];

        let mut diag = b.clone();
        diag[m - 1] = b[m - 1] + c[m - 1]; // Neumann at the equator
        let even = sector(&diag, &c[..m - 1], weight, k, "even")?;
        diag[m - 1] = b[m - 1] - c[m - 1]; // Dirichlet at the equator
        let odd = sector(&diag, &c[..m - 1], weight, k, "odd")?;

        let mut lambda = even.values;
        lambda.extend(odd.values);
        for &l in &lambda {
            // The falloff boundary exponent √(1 − 4λ) must stay real; the
            // discrete spectrum is non-positive up to roundoff
            if l > 0.25 {
                return Err(SolverError::EigenvalueOutOfRange {
                    lambda: l,
                    wavenumber: k,
                });
            }
        }
        bases.push(AngularBasis {
            lambda,
            even: even.vectors,
            odd: odd.vectors,
        });
    }
    debug!(
        "diagonalized {} φ-wavenumbers into {}×{} parity sectors",
        window.nphi, m, m
    );
    Ok(bases)
}

fn sector(
    diag: &[f64],
    offdiag: &[f64],
    weight: &[f64],
    wavenumber: usize,
    parity: &'static str,
) -> Result<linalg::GeneralizedEigen> {
    linalg::generalized_symmetric_tridiagonal(diag, offdiag, weight).ok_or(
        SolverError::EigenSolve { wavenumber, parity },
    )
}
