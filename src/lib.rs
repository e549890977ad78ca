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

//! This crate solves the Poisson equation ∇²Φ = ρ in spherical polar
//! coordinates on logically structured meshes, distributed over a 2-D
//! Cartesian process grid along the (θ, φ) axes. The density is transformed
//! to spectral space by a distributed complex FFT in φ and a distributed
//! Legendre-style transform in θ (split into equatorial parity sectors),
//! every angular mode is then a small symmetric positive definite
//! tridiagonal solve in r with a falloff outer boundary, and the inverse
//! transforms return the potential. Setup diagonalizes the discrete
//! θ-Laplacian once per φ-wavenumber; solves are stateless.
//!
//! Usage
//! -----
//! On a single rank the trivial communicator is enough:
//!
//! ```
//! use poisson_sph::{comm::LocalComm, Field, PoissonSolver, SphericalGrid, Window};
//!
//! // 16 radial zones out to r = 16 and an 8×8 angular mesh
//! let r_if = (0..=16).map(|i| i as f64).collect();
//! let grid = SphericalGrid::with_uniform_theta(r_if, 8, 8).unwrap();
//! let comm = LocalComm;
//! let window = Window::for_rank(&grid, &comm).unwrap();
//! let solver = PoissonSolver::new(grid, window, comm).unwrap();
//! // A point mass just outside the mesh center
//! let mut rho = Field::zeros(16, 8, 8);
//! rho.set(8, 3, 0, 1.0);
//! let phi = solver.solve(&rho).unwrap();
//! assert!(phi.get(8, 3, 0) < 0.0);
//! ```
//!
//! Distributed runs look identical: every rank constructs its own solver
//! over its block of the mesh, with a [comm::CartComm] implementation
//! connecting the ranks (see [comm::RankGrid] for the in-process one used
//! by the test suite).

pub mod comm;

mod eigen;
mod error;
mod fft;
mod grid;
mod linalg;
mod parity;
mod radial;
mod solver;
mod transform;

pub use error::{Result, SolverError};
pub use fft::bit_reversal_table;
pub use grid::{Field, SphericalGrid, Window};
pub use solver::PoissonSolver;
