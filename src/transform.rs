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

//! Distributed Legendre transform and the per-mode radial solves
//!
//! The forward transform contracts the parity-projected field against the
//! eigenvector basis of its sector: every rank multiplies its θ-rows into
//! partial coefficient slabs for all Nθ/(2·n_loc) mode blocks of the sector,
//! then a recursive-halving exchange sums the partials so that each rank is
//! left with exactly the mode block matching its sector position. The
//! backward transform is the mirror image: each rank multiplies its solved
//! mode block into partial θ-row slabs for every sector peer and the
//! identical reduction routes the sums home. Between the two transforms each
//! (θ-mode, φ-mode) pair is a symmetric positive definite tridiagonal solve
//! in r with the real and imaginary parts as two right-hand sides.
//!
//! Ranks in the upper θ half store the odd component at reflected θ rows
//! (see the parity module), so they address basis *rows* in mirrored order;
//! mode and eigenvalue selection always uses the global θ row index.

use nalgebra::DMatrix;
use num_complex::Complex64;

use crate::comm::{Axis, CartComm, Tag};
use crate::eigen::AngularBasis;
use crate::error::{Result, SolverError};
use crate::linalg::SpdTridiagonal;
use crate::radial::RadialOperator;

const TAG_REDUCE_FORWARD: Tag = 0x50;
const TAG_REDUCE_BACKWARD: Tag = 0x60;

pub(crate) struct ThetaTransform {
    /// Number of θ-partitions P
    partitions: usize,
    /// This rank's θ-block index l0
    block: usize,
    n_loc: usize,
    nr: usize,
    o_loc: usize,
    /// First global θ row of this rank
    theta0: usize,
    /// First global φ slot of this rank
    phi0: usize,
}

impl ThetaTransform {
    pub(crate) fn new(
        partitions: usize,
        block: usize,
        n_loc: usize,
        nr: usize,
        o_loc: usize,
        phi0: usize,
    ) -> ThetaTransform {
        ThetaTransform {
            partitions,
            block,
            n_loc,
            nr,
            o_loc,
            theta0: block * n_loc,
            phi0,
        }
    }

    /// Full spectral sweep on the parity-projected field: forward
    /// θ-transform, one radial solve per local (θ-mode, φ-mode), backward
    /// θ-transform. `buf` holds o_loc slots of n_loc×nr complex values and
    /// is overwritten with the transformed result.
    pub(crate) fn apply<C: CartComm>(
        &self,
        comm: &C,
        bases: &[AngularBasis],
        radial: &RadialOperator,
        vol_th: &[f64],
        buf: &mut [Complex64],
    ) -> Result<()> {
        let mut coeff = if self.partitions == 1 {
            self.forward_local(bases, vol_th, buf)
        } else {
            self.forward_distributed(comm, bases, vol_th, buf)?
        };
        self.solve_modes(bases, radial, &mut coeff)?;
        if self.partitions == 1 {
            self.backward_local(bases, &coeff, buf);
        } else {
            self.backward_distributed(comm, bases, &coeff, buf)?;
        }
        Ok(())
    }

    #[inline(always)]
    fn idx(&self, kk: usize, j: usize) -> usize {
        (kk * self.n_loc + j) * self.nr
    }

    /// Sector-internal position of this rank's mode block
    fn position(&self) -> usize {
        self.block % (self.partitions / 2)
    }

    /// Whether this rank belongs to the odd sector (upper θ half)
    fn odd_sector(&self) -> bool {
        self.block >= self.partitions / 2
    }

    /// Basis row block holding the θ-rows of the sector peer at `position`;
    /// odd-sector slabs store reflected rows, so their blocks count from the
    /// equator down and are traversed in reverse
    fn sector_row_block(&self, position: usize) -> usize {
        if self.odd_sector() {
            self.partitions / 2 - 1 - position
        } else {
            position
        }
    }

    /// Extract basis rows [block·n, (block+1)·n) over all columns,
    /// optionally in reversed row order
    fn row_block(basis: &DMatrix<f64>, block: usize, n: usize, reversed: bool) -> DMatrix<f64> {
        let m = basis.ncols();
        DMatrix::from_fn(n, m, |i, j| {
            let row = if reversed { n - 1 - i } else { i };
            basis[(block * n + row, j)]
        })
    }

    /// Volume-weighted local source block for slot kk: row j holds
    /// (Re, Im) interleaved over the radial columns
    fn weighted_source(&self, vol_th: &[f64], buf: &[Complex64], kk: usize) -> DMatrix<f64> {
        let nr = self.nr;
        DMatrix::from_fn(self.n_loc, 2 * nr, |j, col| {
            let z = buf[self.idx(kk, j) + col / 2];
            let w = vol_th[self.theta0 + j];
            if col % 2 == 0 {
                z.re * w
            } else {
                z.im * w
            }
        })
    }

    fn write_back(&self, buf: &mut [Complex64], kk: usize, rows: &DMatrix<f64>, offset: usize) {
        for j in 0..rows.nrows() {
            let base = self.idx(kk, offset + j);
            for i in 0..self.nr {
                buf[base + i] = Complex64::new(rows[(j, 2 * i)], rows[(j, 2 * i + 1)]);
            }
        }
    }

    /// Single θ-rank: both parity sectors live here, stacked as the lower
    /// (even) and upper (odd, reflected) halves of the slab. Returns one
    /// Nθ×2Nr coefficient matrix per φ-slot, even modes on top.
    fn forward_local(
        &self,
        bases: &[AngularBasis],
        vol_th: &[f64],
        buf: &[Complex64],
    ) -> Vec<DMatrix<f64>> {
        let m = self.n_loc / 2;
        let nr = self.nr;
        (0..self.o_loc)
            .map(|kk| {
                let x_even = DMatrix::from_fn(m, 2 * nr, |j, col| {
                    let z = buf[self.idx(kk, j) + col / 2];
                    let w = vol_th[j];
                    if col % 2 == 0 {
                        z.re * w
                    } else {
                        z.im * w
                    }
                });
                // The odd component of global row m+jj belongs to sector row
                // m−1−jj
                let x_odd = DMatrix::from_fn(m, 2 * nr, |j, col| {
                    let z = buf[self.idx(kk, 2 * m - 1 - j) + col / 2];
                    let w = vol_th[2 * m - 1 - j];
                    if col % 2 == 0 {
                        z.re * w
                    } else {
                        z.im * w
                    }
                });
                let c_even = bases[kk].even.tr_mul(&x_even);
                let c_odd = bases[kk].odd.tr_mul(&x_odd);
                let mut coeff = DMatrix::zeros(2 * m, 2 * nr);
                coeff.rows_mut(0, m).copy_from(&c_even);
                coeff.rows_mut(m, m).copy_from(&c_odd);
                coeff
            })
            .collect()
    }

    fn backward_local(&self, bases: &[AngularBasis], coeff: &[DMatrix<f64>], buf: &mut [Complex64]) {
        let m = self.n_loc / 2;
        for kk in 0..self.o_loc {
            let y_even = &bases[kk].even * coeff[kk].rows(0, m);
            let y_odd = &bases[kk].odd * coeff[kk].rows(m, m);
            self.write_back(buf, kk, &y_even, 0);
            // Undo the reflection of the odd sector rows
            let y_odd_reflected = DMatrix::from_fn(m, 2 * self.nr, |j, col| y_odd[(m - 1 - j, col)]);
            self.write_back(buf, kk, &y_odd_reflected, m);
        }
    }

    /// Forward transform over P ≥ 2 partitions: local partial products per
    /// mode block, then the reduce-scatter. Returns this rank's fully summed
    /// mode block per φ-slot.
    fn forward_distributed<C: CartComm>(
        &self,
        comm: &C,
        bases: &[AngularBasis],
        vol_th: &[f64],
        buf: &[Complex64],
    ) -> Result<Vec<DMatrix<f64>>> {
        let nblocks = self.partitions / 2;
        let n = self.n_loc;
        let odd = self.odd_sector();
        let mut slabs = vec![DMatrix::<f64>::zeros(n, 2 * self.nr); nblocks * self.o_loc];
        for kk in 0..self.o_loc {
            let basis = if odd { &bases[kk].odd } else { &bases[kk].even };
            let rows = Self::row_block(basis, self.sector_row_block(self.position()), n, odd);
            let x = self.weighted_source(vol_th, buf, kk);
            for l in 0..nblocks {
                let sub = rows.columns(l * n, n);
                slabs[l * self.o_loc + kk] = sub.tr_mul(&x);
            }
        }
        self.halving_reduce(comm, &mut slabs, TAG_REDUCE_FORWARD)?;
        slabs.truncate(self.o_loc);
        Ok(slabs)
    }

    /// Backward transform over P ≥ 2 partitions: this rank's solved mode
    /// block contributes to the θ-rows of every sector peer; the same
    /// reduction as in the forward pass routes the summed slabs home.
    fn backward_distributed<C: CartComm>(
        &self,
        comm: &C,
        bases: &[AngularBasis],
        coeff: &[DMatrix<f64>],
        buf: &mut [Complex64],
    ) -> Result<()> {
        let nblocks = self.partitions / 2;
        let n = self.n_loc;
        let odd = self.odd_sector();
        let mut slabs = vec![DMatrix::<f64>::zeros(n, 2 * self.nr); nblocks * self.o_loc];
        for kk in 0..self.o_loc {
            let basis = if odd { &bases[kk].odd } else { &bases[kk].even };
            for l in 0..nblocks {
                let sub = Self::row_block(basis, self.sector_row_block(l), n, odd);
                let sub = sub.columns(self.position() * n, n);
                slabs[l * self.o_loc + kk] = &sub * &coeff[kk];
            }
        }
        self.halving_reduce(comm, &mut slabs, TAG_REDUCE_BACKWARD)?;
        for kk in 0..self.o_loc {
            self.write_back(buf, kk, &slabs[kk], 0);
        }
        Ok(())
    }

    /// Recursive-halving reduce-scatter along the θ-axis, shared by the
    /// forward and backward transforms. `slabs` holds nb·o_loc partial
    /// blocks (block-major); on return the fully summed block owned by this
    /// rank sits in the first o_loc entries.
    ///
    /// At each level a rank keeps the slab indices matching the parity of
    /// (l0 / inc) and ships the others to the partner inc blocks away; the
    /// kept and received partials are then combined pairwise. The combine
    /// must run in ascending l: it compacts the slab list in place.
    fn halving_reduce<C: CartComm>(
        &self,
        comm: &C,
        slabs: &mut Vec<DMatrix<f64>>,
        tag_base: Tag,
    ) -> Result<()> {
        let elems = self.n_loc * 2 * self.nr;
        let mut nb = self.partitions / 2;
        let mut inc = 1;
        let mut level: Tag = 0;
        while nb > 1 {
            let par = (self.block / inc) % 2;
            let partner = if par == 0 {
                self.block + inc
            } else {
                self.block - inc
            };
            let ship_parity = 1 - par;
            let mut send = Vec::with_capacity(nb / 2 * self.o_loc * elems);
            for l in (0..nb).filter(|l| l % 2 == ship_parity) {
                for kk in 0..self.o_loc {
                    send.extend_from_slice(slabs[l * self.o_loc + kk].as_slice());
                }
            }
            let mut recv = vec![0.0; send.len()];
            let tag = tag_base + level;
            if par == 0 {
                comm.send_real(Axis::Theta, partner, tag, &send)?;
                comm.recv_real(Axis::Theta, partner, tag, &mut recv)?;
            } else {
                comm.recv_real(Axis::Theta, partner, tag, &mut recv)?;
                comm.send_real(Axis::Theta, partner, tag, &send)?;
            }
            let mut offset = 0;
            for l in (0..nb).filter(|l| l % 2 == ship_parity) {
                for kk in 0..self.o_loc {
                    slabs[l * self.o_loc + kk]
                        .as_mut_slice()
                        .copy_from_slice(&recv[offset..offset + elems]);
                    offset += elems;
                }
            }
            // Sequential pairwise combine; later iterations read slots this
            // loop has already passed, so it must not run out of order
            for l in 0..nb / 2 {
                for kk in 0..self.o_loc {
                    let sum =
                        &slabs[2 * l * self.o_loc + kk] + &slabs[(2 * l + 1) * self.o_loc + kk];
                    slabs[l * self.o_loc + kk] = sum;
                }
            }
            nb /= 2;
            inc *= 2;
            level += 1;
        }
        Ok(())
    }

    /// Assemble and solve the radial system of every local (θ-mode, φ-mode).
    /// Real and imaginary coefficients are the two right-hand-side columns;
    /// the solution overwrites the coefficients in place.
    fn solve_modes(
        &self,
        bases: &[AngularBasis],
        radial: &RadialOperator,
        coeff: &mut [DMatrix<f64>],
    ) -> Result<()> {
        let nr = self.nr;
        let dv = radial.dv();
        let mut diag = Vec::with_capacity(nr);
        let mut rhs = vec![0.0; 2 * nr];
        for (kk, c) in coeff.iter_mut().enumerate() {
            for jj in 0..c.nrows() {
                let theta_mode = self.theta0 + jj;
                let lambda = bases[kk].lambda[theta_mode];
                radial.mode_diagonal(lambda, &mut diag);
                let factor = SpdTridiagonal::factor(&diag, radial.offdiag0()).map_err(|f| {
                    SolverError::NotPositiveDefinite {
                        theta_mode,
                        phi_mode: self.phi0 + kk,
                        pivot_index: f.index,
                        pivot: f.pivot,
                        lambda,
                    }
                })?;
                for i in 0..nr {
                    rhs[i] = -c[(jj, 2 * i)] * dv[i];
                    rhs[nr + i] = -c[(jj, 2 * i + 1)] * dv[i];
                }
                factor.solve(&mut rhs);
                for i in 0..nr {
                    c[(jj, 2 * i)] = rhs[i];
                    c[(jj, 2 * i + 1)] = rhs[nr + i];
                }
            }
        }
        Ok(())
    }
}
