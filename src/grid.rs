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

//! Spherical mesh geometry, the rank-local (θ, φ) window and scalar fields

use std::f64::consts::PI;

use crate::comm::CartComm;
use crate::error::{Result, SolverError};

/// Relative tolerance for the θ-grid uniformity check
const THETA_TOL: f64 = 1.0e-12;

/// Geometry of a logically structured spherical mesh: Nr radial zones with
/// arbitrary (monotone) spacing, Nθ uniform polar zones over (0, π) and Nφ
/// uniform azimuthal zones over (0, 2π).
///
/// All derived quantities (cell centers, face areas, cell volumes, the polar
/// volume weights) are precomputed here and immutable afterwards. Volumes
/// are kept per unit solid-angle factor: `dv_r` is (r³₊ − r³₋)/3 and
/// `vol_th` is (cos θ₋ − cos θ₊)/dθ, so a cell volume is
/// `dv_r[i]·vol_th[j]·dθ·dφ`.
#[derive(Clone, Debug)]
pub struct SphericalGrid {
    pub(crate) nr: usize,
    pub(crate) ntheta: usize,
    pub(crate) nphi: usize,
    /// Radial interfaces, `nr + 1` values
    pub(crate) r_if: Vec<f64>,
    /// Radial cell centers
    pub(crate) r: Vec<f64>,
    /// Face areas r², on interfaces
    pub(crate) da_r: Vec<f64>,
    /// Radial volume elements (r³₊ − r³₋)/3
    pub(crate) dv_r: Vec<f64>,
    /// Polar interfaces, `ntheta + 1` values
    pub(crate) theta_if: Vec<f64>,
    /// Polar cell centers
    pub(crate) theta: Vec<f64>,
    /// Polar volume weights (cos θ₋ − cos θ₊)/dθ
    pub(crate) vol_th: Vec<f64>,
    pub(crate) dtheta: f64,
    pub(crate) dphi: f64,
}

impl SphericalGrid {
    /// Build a grid from radial interfaces and prebuilt polar arrays.
    ///
    /// Preconditions (all violations are fatal): Nθ and Nφ are powers of
    /// two, `r_if` is strictly increasing with `r_if[0] ≥ 0`, and the polar
    /// grid is uniform over (0, π) with `theta` on the midpoints.
    pub fn new(
        r_if: Vec<f64>,
        theta_if: Vec<f64>,
        theta: Vec<f64>,
        nphi: usize,
    ) -> Result<SphericalGrid> {
        if r_if.len() < 3 {
            return Err(SolverError::InvalidRadialGrid(format!(
                "need at least 2 radial zones, got {}",
                r_if.len().saturating_sub(1)
            )));
        }
        if r_if[0] < 0.0 {
            return Err(SolverError::InvalidRadialGrid(format!(
                "innermost interface {} is negative",
                r_if[0]
            )));
        }
        for i in 1..r_if.len() {
            if r_if[i] <= r_if[i - 1] {
                return Err(SolverError::InvalidRadialGrid(format!(
                    "interfaces not increasing at index {} ({} ≤ {})",
                    i,
                    r_if[i],
                    r_if[i - 1]
                )));
            }
        }
        let ntheta = theta.len();
        if ntheta < 2 || !ntheta.is_power_of_two() {
            return Err(SolverError::NotPowerOfTwo {
                name: "ntheta",
                value: ntheta,
            });
        }
        if !nphi.is_power_of_two() {
            return Err(SolverError::NotPowerOfTwo {
                name: "nphi",
                value: nphi,
            });
        }
        if theta_if.len() != ntheta + 1 {
            return Err(SolverError::NonUniformTheta(format!(
                "{} interfaces for {} zones",
                theta_if.len(),
                ntheta
            )));
        }
        let dtheta = PI / ntheta as f64;
        for (j, &th) in theta_if.iter().enumerate() {
            if (th - j as f64 * dtheta).abs() > THETA_TOL * PI {
                return Err(SolverError::NonUniformTheta(format!(
                    "interface {} at {} (expected {})",
                    j,
                    th,
                    j as f64 * dtheta
                )));
            }
        }
        for (j, &th) in theta.iter().enumerate() {
            if (th - (j as f64 + 0.5) * dtheta).abs() > THETA_TOL * PI {
                return Err(SolverError::NonUniformTheta(format!(
                    "center {} at {} (expected {})",
                    j,
                    th,
                    (j as f64 + 0.5) * dtheta
                )));
            }
        }

        let nr = r_if.len() - 1;
        let r: Vec<f64> = (0..nr).map(|i| 0.5 * (r_if[i] + r_if[i + 1])).collect();
        let da_r: Vec<f64> = r_if.iter().map(|&rf| rf * rf).collect();
        let dv_r: Vec<f64> = (0..nr)
            .map(|i| (r_if[i + 1].powi(3) - r_if[i].powi(3)) / 3.0)
            .collect();
        let vol_th: Vec<f64> = (0..ntheta)
            .map(|j| (theta_if[j].cos() - theta_if[j + 1].cos()) / dtheta)
            .collect();
        Ok(SphericalGrid {
            nr,
            ntheta,
            nphi,
            r_if,
            r,
            da_r,
            dv_r,
            theta_if,
            theta,
            vol_th,
            dtheta,
            dphi: 2.0 * PI / nphi as f64,
        })
    }

    /// Build a grid generating the uniform polar arrays internally
    pub fn with_uniform_theta(r_if: Vec<f64>, ntheta: usize, nphi: usize) -> Result<SphericalGrid> {
        if ntheta == 0 {
            return Err(SolverError::NotPowerOfTwo {
                name: "ntheta",
                value: ntheta,
            });
        }
        let dtheta = PI / ntheta as f64;
        let theta_if = (0..=ntheta).map(|j| j as f64 * dtheta).collect();
        let theta = (0..ntheta).map(|j| (j as f64 + 0.5) * dtheta).collect();
        SphericalGrid::new(r_if, theta_if, theta, nphi)
    }

    pub fn nr(&self) -> usize {
        self.nr
    }

    pub fn ntheta(&self) -> usize {
        self.ntheta
    }

    pub fn nphi(&self) -> usize {
        self.nphi
    }

    pub fn dtheta(&self) -> f64 {
        self.dtheta
    }

    pub fn dphi(&self) -> f64 {
        self.dphi
    }

    /// Radial interfaces (length `nr + 1`)
    pub fn r_if(&self) -> &[f64] {
        &self.r_if
    }

    /// Radial cell centers
    pub fn r(&self) -> &[f64] {
        &self.r
    }

    /// Radial volume elements (r³₊ − r³₋)/3
    pub fn dv_r(&self) -> &[f64] {
        &self.dv_r
    }

    /// Polar cell centers
    pub fn theta(&self) -> &[f64] {
        &self.theta
    }

    /// Polar interfaces (length `ntheta + 1`)
    pub fn theta_if(&self) -> &[f64] {
        &self.theta_if
    }

    /// Polar volume weights (cos θ₋ − cos θ₊)/dθ
    pub fn vol_th(&self) -> &[f64] {
        &self.vol_th
    }

    /// Volume of cell (i, j) at any φ (the mesh is azimuthally uniform)
    pub fn cell_volume(&self, i: usize, j: usize) -> f64 {
        self.dv_r[i] * self.vol_th[j] * self.dtheta * self.dphi
    }
}

/// The contiguous (θ, φ) block owned by one rank, in global 0-based zone
/// indices. Radial columns are never split.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    /// First global θ zone
    pub(crate) theta0: usize,
    /// Number of local θ zones (n_loc)
    pub(crate) ntheta: usize,
    /// First global φ zone
    pub(crate) phi0: usize,
    /// Number of local φ zones (o_loc)
    pub(crate) nphi: usize,
}

impl Window {
    pub fn new(theta0: usize, ntheta: usize, phi0: usize, nphi: usize) -> Window {
        Window {
            theta0,
            ntheta,
            phi0,
            nphi,
        }
    }

    /// Compute the window of the calling rank from the process grid shape:
    /// Nθ/P consecutive θ zones and Nφ/Q consecutive φ zones.
    pub fn for_rank<C: CartComm>(grid: &SphericalGrid, comm: &C) -> Result<Window> {
        let (pd, qd) = comm.dims();
        let (p, q) = comm.coords();
        if pd == 0 || grid.ntheta % pd != 0 || qd == 0 || grid.nphi % qd != 0 {
            return Err(SolverError::WindowMismatch(format!(
                "process grid ({}, {}) does not divide mesh ({}, {})",
                pd, qd, grid.ntheta, grid.nphi
            )));
        }
        let n_loc = grid.ntheta / pd;
        let o_loc = grid.nphi / qd;
        let window = Window::new(p * n_loc, n_loc, q * o_loc, o_loc);
        window.validate(grid, comm)?;
        Ok(window)
    }

    /// Check this window against the mesh and the communicator: block sizes
    /// are powers of two dividing the mesh, and the offsets are exactly the
    /// blocks selected by the rank coordinates.
    pub(crate) fn validate<C: CartComm>(&self, grid: &SphericalGrid, comm: &C) -> Result<()> {
        let (pd, qd) = comm.dims();
        let (p, q) = comm.coords();
        if !self.ntheta.is_power_of_two() || !self.nphi.is_power_of_two() {
            return Err(SolverError::WindowMismatch(format!(
                "block sizes ({}, {}) must be powers of two",
                self.ntheta, self.nphi
            )));
        }
        if self.ntheta * pd != grid.ntheta || self.nphi * qd != grid.nphi {
            return Err(SolverError::WindowMismatch(format!(
                "blocks ({}, {}) on a ({}, {}) grid do not tile the ({}, {}) mesh",
                self.ntheta, self.nphi, pd, qd, grid.ntheta, grid.nphi
            )));
        }
        if self.theta0 != p * self.ntheta || self.phi0 != q * self.nphi {
            return Err(SolverError::WindowMismatch(format!(
                "offsets ({}, {}) do not match rank coordinates ({}, {})",
                self.theta0, self.phi0, p, q
            )));
        }
        Ok(())
    }

    pub fn theta0(&self) -> usize {
        self.theta0
    }

    pub fn ntheta(&self) -> usize {
        self.ntheta
    }

    pub fn phi0(&self) -> usize {
        self.phi0
    }

    pub fn nphi(&self) -> usize {
        self.nphi
    }
}

/// A rank-local real scalar field on the (r, θ, φ) window, stored flat with
/// the radial index fastest. No ghost zones are stored: values outside the
/// window do not exist on this rank.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    nr: usize,
    ntheta: usize,
    nphi: usize,
    data: Vec<f64>,
}

impl Field {
    pub fn zeros(nr: usize, ntheta: usize, nphi: usize) -> Field {
        Field {
            nr,
            ntheta,
            nphi,
            data: vec![0.0; nr * ntheta * nphi],
        }
    }

    /// Allocate a zero field matching a rank's window
    pub fn for_window(grid: &SphericalGrid, window: &Window) -> Field {
        Field::zeros(grid.nr, window.ntheta, window.nphi)
    }

    /// Build a field by evaluating `f(i, j, k)` at every local zone index
    pub fn from_fn<F>(nr: usize, ntheta: usize, nphi: usize, mut f: F) -> Field
    where
        F: FnMut(usize, usize, usize) -> f64,
    {
        let mut field = Field::zeros(nr, ntheta, nphi);
        for k in 0..nphi {
            for j in 0..ntheta {
                for i in 0..nr {
                    let idx = field.idx(i, j, k);
                    field.data[idx] = f(i, j, k);
                }
            }
        }
        field
    }

    /// (Nr, n_loc, o_loc)
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.nr, self.ntheta, self.nphi)
    }

    #[inline(always)]
    pub(crate) fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        (k * self.ntheta + j) * self.nr + i
    }

    #[inline(always)]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[self.idx(i, j, k)]
    }

    #[inline(always)]
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: f64) {
        let idx = self.idx(i, j, k);
        self.data[idx] = value;
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalComm;
    use approx::assert_relative_eq;

    fn uniform_radii(nr: usize, rmax: f64) -> Vec<f64> {
        (0..=nr).map(|i| rmax * i as f64 / nr as f64).collect()
    }

    #[test]
    fn geometry_identities() {
        let grid = SphericalGrid::with_uniform_theta(uniform_radii(16, 16.0), 8, 8).unwrap();
        // Cell centers are interface midpoints
        for i in 0..16 {
            assert_relative_eq!(grid.r()[i], i as f64 + 0.5);
        }
        // Radial volumes telescope to R³/3
        let vr: f64 = grid.dv_r().iter().sum();
        assert_relative_eq!(vr, 16.0_f64.powi(3) / 3.0, max_relative = 1e-14);
        // Polar weights telescope to 2/dθ
        let vt: f64 = grid.vol_th().iter().sum();
        assert_relative_eq!(vt * grid.dtheta(), 2.0, max_relative = 1e-14);
        // Mirror symmetry of the polar weights
        for j in 0..4 {
            assert_relative_eq!(grid.vol_th()[j], grid.vol_th()[7 - j], max_relative = 1e-13);
        }
    }

    #[test]
    fn total_volume_is_sphere_volume() {
        let grid = SphericalGrid::with_uniform_theta(uniform_radii(8, 2.0), 4, 4).unwrap();
        let mut total = 0.0;
        for i in 0..8 {
            for j in 0..4 {
                total += grid.cell_volume(i, j) * 4.0; // nphi = 4 identical wedges
            }
        }
        assert_relative_eq!(
            total,
            4.0 / 3.0 * PI * 8.0,
            max_relative = 1e-13
        );
    }

    #[test]
    fn single_cell_quadrature() {
        // Midpoint quadrature of a unit-density single cell is exactly the
        // cell volume
        let grid = SphericalGrid::with_uniform_theta(uniform_radii(16, 16.0), 8, 8).unwrap();
        let (i, j) = (7, 3);
        let mut rho = Field::zeros(16, 8, 8);
        rho.set(i, j, 2, 1.0);
        let mut mass = 0.0;
        for k in 0..8 {
            for jj in 0..8 {
                for ii in 0..16 {
                    mass += rho.get(ii, jj, k) * grid.cell_volume(ii, jj);
                }
            }
        }
        assert_relative_eq!(
            mass,
            grid.dv_r()[i] * grid.vol_th()[j] * grid.dtheta() * grid.dphi(),
            max_relative = 1e-15
        );
    }

    #[test]
    fn rejects_bad_meshes() {
        assert!(SphericalGrid::with_uniform_theta(uniform_radii(8, 1.0), 6, 8).is_err());
        assert!(SphericalGrid::with_uniform_theta(uniform_radii(8, 1.0), 8, 12).is_err());
        assert!(SphericalGrid::with_uniform_theta(vec![0.0, 1.0, 0.5], 8, 8).is_err());
        assert!(SphericalGrid::with_uniform_theta(vec![-1.0, 0.0, 1.0], 8, 8).is_err());
        // Non-uniform θ interfaces
        let mut theta_if: Vec<f64> = (0..=4).map(|j| j as f64 * PI / 4.0).collect();
        let theta: Vec<f64> = (0..4).map(|j| (j as f64 + 0.5) * PI / 4.0).collect();
        theta_if[2] += 1e-3;
        assert!(SphericalGrid::new(uniform_radii(8, 1.0), theta_if, theta, 8).is_err());
    }

    #[test]
    fn window_for_single_rank() {
        let grid = SphericalGrid::with_uniform_theta(uniform_radii(8, 1.0), 8, 8).unwrap();
        let window = Window::for_rank(&grid, &LocalComm).unwrap();
        assert_eq!(window, Window::new(0, 8, 0, 8));
    }

    #[test]
    fn window_validation_rejects_mismatches() {
        let grid = SphericalGrid::with_uniform_theta(uniform_radii(8, 1.0), 8, 8).unwrap();
        // Wrong block size for a 1×1 grid
        assert!(Window::new(0, 4, 0, 8).validate(&grid, &LocalComm).is_err());
        // Offset not matching the rank coordinate
        assert!(Window::new(4, 8, 0, 8).validate(&grid, &LocalComm).is_err());
    }
}
