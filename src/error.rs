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

//! Error types shared across the solver

use thiserror::Error;

use crate::comm::CommError;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, SolverError>;

/// All failure modes of setup and solve. None of these are recoverable:
/// a failed solve produces no potential field at all.
#[derive(Debug, Error)]
pub enum SolverError {
    /// A grid or decomposition size that must be a power of two is not
    #[error("{name} = {value} must be a power of two")]
    NotPowerOfTwo { name: &'static str, value: usize },
    /// Radial interfaces are not monotonically increasing from a
    /// non-negative origin, or too few of them were given
    #[error("invalid radial grid: {0}")]
    InvalidRadialGrid(String),
    /// The θ grid is not uniform over (0, π)
    #[error("θ grid is not uniform over (0, π): {0}")]
    NonUniformTheta(String),
    /// The local (θ, φ) window does not match the process grid
    #[error("window mismatch: {0}")]
    WindowMismatch(String),
    /// A field passed to solve has the wrong local shape
    #[error("field shape ({nr}, {ntheta}, {nphi}) does not match the solver window ({wnr}, {wntheta}, {wnphi})")]
    FieldShapeMismatch {
        nr: usize,
        ntheta: usize,
        nphi: usize,
        wnr: usize,
        wntheta: usize,
        wnphi: usize,
    },
    /// The dense eigensolver did not converge for an angular operator
    #[error("eigensolver failed for φ-wavenumber {wavenumber} ({parity} parity)")]
    EigenSolve {
        wavenumber: usize,
        parity: &'static str,
    },
    /// An angular eigenvalue outside the supported range λ ≤ 1/4 was
    /// produced; the falloff boundary exponent √(1 − 4λ) would be complex
    #[error("angular eigenvalue {lambda} exceeds 1/4 for φ-wavenumber {wavenumber}; falloff boundary undefined")]
    EigenvalueOutOfRange { lambda: f64, wavenumber: usize },
    /// The per-mode radial system lost positive definiteness
    #[error(
        "radial system not positive definite for θ-mode {theta_mode}, φ-mode {phi_mode}: \
         pivot {pivot} at row {pivot_index} (λ = {lambda})"
    )]
    NotPositiveDefinite {
        theta_mode: usize,
        phi_mode: usize,
        pivot_index: usize,
        pivot: f64,
        lambda: f64,
    },
    /// A pairwise exchange failed; always fatal
    #[error("transport failure: {0}")]
    Comm(#[from] CommError),
}
