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

//! Constant part of the radial flux operator and its per-mode assembly

use itertools::izip;

use crate::grid::SphericalGrid;

/// The mode-independent part of the radial tridiagonal operator, in flux
/// form: row i of the tridiagonal matrix (offdiag0, diag0, offdiag0) is the
/// negative divergence of the face fluxes `da·ΔΦ/Δr` through cell i. The
/// inner boundary carries no flux (diag0[0] = −offdiag0[0]); the outer flux
/// is replaced per mode by the falloff correction in [mode_diagonal].
///
/// Assembling a mode then reduces to one diagonal update with the spectral
/// eigenvalue λ.
pub(crate) struct RadialOperator {
    nr: usize,
    diag0: Vec<f64>,
    offdiag0: Vec<f64>,
    /// dv_r[i]/r[i]², the weight of the λ diagonal update
    lam_weight: Vec<f64>,
    /// Radial volume elements, the right-hand-side scaling
    dv: Vec<f64>,
    /// Outer face area r_if[Nr]²
    area_out: f64,
    /// Outer face radius r_if[Nr]
    r_out: f64,
    /// Outermost cell center r[Nr−1]
    r_last: f64,
}

impl RadialOperator {
    pub(crate) fn new(grid: &SphericalGrid) -> RadialOperator {
        let nr = grid.nr;
        let offdiag0: Vec<f64> = (0..nr - 1)
            .map(|i| -grid.da_r[i + 1] / (grid.r[i + 1] - grid.r[i]))
            .collect();
        let mut diag0 = vec![0.0; nr];
        diag0[0] = -offdiag0[0];
        for i in 1..nr - 1 {
            diag0[i] = -offdiag0[i] - offdiag0[i - 1];
        }
        diag0[nr - 1] = -offdiag0[nr - 2];
        let lam_weight = izip!(&grid.dv_r, &grid.r)
            .map(|(dv, r)| dv / (r * r))
            .collect();
        RadialOperator {
            nr,
            diag0,
            offdiag0,
            lam_weight,
            dv: grid.dv_r.clone(),
            area_out: grid.da_r[nr],
            r_out: grid.r_if[nr],
            r_last: grid.r[nr - 1],
        }
    }

    pub(crate) fn offdiag0(&self) -> &[f64] {
        &self.offdiag0
    }

    /// Radial volume elements dv_r
    pub(crate) fn dv(&self) -> &[f64] {
        &self.dv
    }

    /// Fill `diag` with the diagonal of the radial system for spectral
    /// eigenvalue λ: the constant part, the λ update and the falloff
    /// boundary closure. The closure imposes the analytic decay Φ ∝ r^−(1+s)/2
    /// of the mode beyond the outer face, with s = √(1 − 4λ); setup has
    /// already rejected any λ > 1/4.
    pub(crate) fn mode_diagonal(&self, lambda: f64, diag: &mut Vec<f64>) {
        debug_assert!(lambda <= 0.25);
        diag.clear();
        diag.extend(
            izip!(&self.diag0, &self.lam_weight).map(|(d0, w)| d0 - lambda * w),
        );
        let s = (1.0 - 4.0 * lambda).sqrt();
        diag[self.nr - 1] +=
            self.area_out * (1.0 + s) / (2.0 * self.r_out) * (self.r_last / self.r_out).powf(s);
    }
}
