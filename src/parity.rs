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

//! Equatorial parity projection across mirrored θ-slabs
//!
//! After the forward FFT each rank exchanges its slab with the mirror
//! partner (θ-block P−1−l0) and keeps only one parity component: blocks in
//! the lower θ half hold the even part, blocks in the upper half the odd
//! part, evaluated at the reflected θ row. Before the inverse FFT the same
//! exchange recombines the two components. Split and recombine are the same
//! update up to the ½ factor: on each pair of reflected rows (j, m) the new
//! values are scale·(old_j + old_m) below the equator and
//! scale·(old_j − old_m) above it, with scale = ½ for the split and 1 for
//! the recombine.

use num_complex::Complex64;
use num_traits::Zero;

use crate::comm::{Axis, CartComm, Tag};
use crate::error::Result;

const TAG_SPLIT: Tag = 0x30;
const TAG_RECOMBINE: Tag = 0x40;

pub(crate) struct ParityProjector {
    /// Number of θ-partitions P
    partitions: usize,
    /// This rank's θ-block index l0
    block: usize,
    n_loc: usize,
    nr: usize,
    o_loc: usize,
}

impl ParityProjector {
    pub(crate) fn new(
        partitions: usize,
        block: usize,
        n_loc: usize,
        nr: usize,
        o_loc: usize,
    ) -> ParityProjector {
        ParityProjector {
            partitions,
            block,
            n_loc,
            nr,
            o_loc,
        }
    }

    #[inline(always)]
    fn idx(&self, kk: usize, j: usize) -> usize {
        (kk * self.n_loc + j) * self.nr
    }

    /// Project the spectral field into parity components (applied after the
    /// forward FFT). Lower-half blocks keep ½(own + mirrored), upper-half
    /// blocks ½(mirrored − own).
    pub(crate) fn split<C: CartComm>(
        &self,
        comm: &C,
        buf: &mut [Complex64],
        scratch: &mut [Complex64],
    ) -> Result<()> {
        self.apply(comm, TAG_SPLIT, 0.5, buf, scratch)
    }

    /// Recombine parity components into the full field (applied before the
    /// inverse FFT); exact inverse of [split] up to roundoff.
    pub(crate) fn recombine<C: CartComm>(
        &self,
        comm: &C,
        buf: &mut [Complex64],
        scratch: &mut [Complex64],
    ) -> Result<()> {
        self.apply(comm, TAG_RECOMBINE, 1.0, buf, scratch)
    }

    fn apply<C: CartComm>(
        &self,
        comm: &C,
        tag: Tag,
        scale: f64,
        buf: &mut [Complex64],
        scratch: &mut [Complex64],
    ) -> Result<()> {
        debug_assert_eq!(buf.len(), self.o_loc * self.n_loc * self.nr);
        if self.partitions == 1 {
            self.apply_local(scale, buf);
            return Ok(());
        }
        let partner = self.partitions - 1 - self.block;
        let lower = self.block < self.partitions / 2;
        // Matched posting order: the lower half sends first
        if lower {
            comm.send_complex(Axis::Theta, partner, tag, buf)?;
            comm.recv_complex(Axis::Theta, partner, tag, scratch)?;
        } else {
            comm.recv_complex(Axis::Theta, partner, tag, scratch)?;
            comm.send_complex(Axis::Theta, partner, tag, buf)?;
        }
        for kk in 0..self.o_loc {
            for j in 0..self.n_loc {
                // The mirror of local row j lives at the partner's reversed
                // local row
                let own = self.idx(kk, j);
                let mirrored = self.idx(kk, self.n_loc - 1 - j);
                for i in 0..self.nr {
                    let mine = buf[own + i];
                    let theirs = scratch[mirrored + i];
                    buf[own + i] = if lower {
                        scale * (mine + theirs)
                    } else {
                        scale * (theirs - mine)
                    };
                }
            }
        }
        Ok(())
    }

    /// Single θ-rank: the mirror exchange degenerates to an in-place pairing
    /// of rows j and n_loc−1−j. Both rows are read into separate scratch
    /// rows before either is written, keeping the data dependency explicit.
    fn apply_local(&self, scale: f64, buf: &mut [Complex64]) {
        let mut row_lo = vec![Complex64::zero(); self.nr];
        let mut row_hi = vec![Complex64::zero(); self.nr];
        for kk in 0..self.o_loc {
            for j in 0..self.n_loc / 2 {
                let lo = self.idx(kk, j);
                let hi = self.idx(kk, self.n_loc - 1 - j);
                row_lo.copy_from_slice(&buf[lo..lo + self.nr]);
                row_hi.copy_from_slice(&buf[hi..hi + self.nr]);
                for i in 0..self.nr {
                    buf[lo + i] = scale * (row_lo[i] + row_hi[i]);
                    buf[hi + i] = scale * (row_lo[i] - row_hi[i]);
                }
            }
        }
    }
}
