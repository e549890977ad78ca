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

//! The solver handle: one setup, any number of stateless solves

use log::{debug, trace};
use num_complex::Complex64;
use num_traits::Zero;

use crate::comm::CartComm;
use crate::eigen::{self, AngularBasis};
use crate::error::{Result, SolverError};
use crate::fft::{bit_reversal_table, DistributedFft};
use crate::grid::{Field, SphericalGrid, Window};
use crate::parity::ParityProjector;
use crate::radial::RadialOperator;
use crate::transform::ThetaTransform;

/// A Poisson solver instance for one rank of the process grid.
///
/// Construction runs the whole setup phase: geometry and the radial
/// operator, the bit-reversal table, and the per-wavenumber angular
/// eigenbases. Everything is immutable afterwards, so a rank may hold any
/// number of independent handles. [solve](PoissonSolver::solve) keeps no
/// state between calls; its working buffers live on the stack of the call.
pub struct PoissonSolver<C: CartComm> {
    grid: SphericalGrid,
    window: Window,
    comm: C,
    radial: RadialOperator,
    bases: Vec<AngularBasis>,
    fft: DistributedFft,
    parity: ParityProjector,
    transform: ThetaTransform,
}

impl<C: CartComm> PoissonSolver<C> {
    /// Set up a solver for the mesh block this rank owns.
    ///
    /// The window must tile the mesh exactly as prescribed by the
    /// communicator's shape and this rank's coordinates; every violation of
    /// the documented preconditions is reported here and is fatal.
    pub fn new(grid: SphericalGrid, window: Window, comm: C) -> Result<PoissonSolver<C>> {
        window.validate(&grid, &comm)?;
        let index = bit_reversal_table(grid.nphi());
        let radial = RadialOperator::new(&grid);
        let bases = eigen::build_bases(&grid, &window, &index)?;
        let partitions = grid.ntheta() / window.ntheta();
        let block = window.theta0() / window.ntheta();
        let fft = DistributedFft::new(
            grid.nphi(),
            window.nphi(),
            window.phi0(),
            grid.nr() * window.ntheta(),
        );
        let parity = ParityProjector::new(
            partitions,
            block,
            window.ntheta(),
            grid.nr(),
            window.nphi(),
        );
        let transform = ThetaTransform::new(
            partitions,
            block,
            window.ntheta(),
            grid.nr(),
            window.nphi(),
            window.phi0(),
        );
        debug!(
            "solver ready: mesh {}×{}×{}, θ-block {}/{}, φ-slots [{}, {})",
            grid.nr(),
            grid.ntheta(),
            grid.nphi(),
            block,
            partitions,
            window.phi0(),
            window.phi0() + window.nphi(),
        );
        Ok(PoissonSolver {
            grid,
            window,
            comm,
            radial,
            bases,
            fft,
            parity,
            transform,
        })
    }

    pub fn grid(&self) -> &SphericalGrid {
        &self.grid
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// Solve ∇²Φ = ρ on the local window.
    ///
    /// `rho` must have the window's shape; the returned potential has the
    /// same shape and indexing. Values outside the window are not computed.
    /// On any error the potential is not produced at all.
    pub fn solve(&self, rho: &Field) -> Result<Field> {
        let (nr, n_loc, o_loc) = rho.shape();
        if (nr, n_loc, o_loc) != (self.grid.nr(), self.window.ntheta(), self.window.nphi()) {
            return Err(SolverError::FieldShapeMismatch {
                nr,
                ntheta: n_loc,
                nphi: o_loc,
                wnr: self.grid.nr(),
                wntheta: self.window.ntheta(),
                wnphi: self.window.nphi(),
            });
        }
        // The field layout (radial index fastest, φ-slot outermost) is the
        // butterfly layout, so packing is a plain complex widening
        let mut buf: Vec<Complex64> = rho
            .as_slice()
            .iter()
            .map(|&v| Complex64::new(v, 0.0))
            .collect();
        let mut scratch = vec![Complex64::zero(); buf.len()];

        trace!("forward FFT along φ");
        self.fft.forward(&self.comm, &mut buf, &mut scratch)?;
        trace!("parity split across the equator");
        self.parity.split(&self.comm, &mut buf, &mut scratch)?;
        trace!("θ-transform and per-mode radial solves");
        self.transform.apply(
            &self.comm,
            &self.bases,
            &self.radial,
            self.grid.vol_th(),
            &mut buf,
        )?;
        trace!("parity recombine");
        self.parity.recombine(&self.comm, &mut buf, &mut scratch)?;
        trace!("inverse FFT along φ");
        self.fft.inverse(&self.comm, &mut buf, &mut scratch)?;

        let mut phi = Field::zeros(nr, n_loc, o_loc);
        for (out, z) in phi.as_mut_slice().iter_mut().zip(&buf) {
            *out = z.re;
        }
        Ok(phi)
    }
}
