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

//! Distributed radix-2 complex FFT along the φ-axis of the process grid
//!
//! The forward transform is decimation-in-frequency: stages run from stride
//! Nφ/2 down to 1 and leave the spectrum in bit-reversed slot order, which
//! is kept that way end to end — slot kk of a rank stores global wavenumber
//! `index[phi0 + kk]`, and both the angular eigensolver and the mode solves
//! look eigenvalues up through the same table. Reversing in place would cost
//! an extra communication pass for nothing.
//!
//! A stage whose butterfly stride fits inside the local φ-block is pure
//! arithmetic; once the stride crosses the block size, each rank exchanges
//! its entire slab with the partner rank a Cartesian shift of di/o_loc away
//! and applies only its half of the butterfly. The rank owning the lower
//! half of every pair sends first and adds; the upper half receives first
//! and subtracts with the twiddle, which keeps the blocking pairs matched.

use std::f64::consts::PI;

use itertools::izip;
use num_complex::Complex64;

use crate::comm::{Axis, CartComm, Tag};
use crate::error::Result;

const TAG_FORWARD: Tag = 0x10;
const TAG_INVERSE: Tag = 0x20;

/// Bit-reversal permutation of [0, n): reverses the log₂(n) binary digits
/// of each index. An involution: `index[index[i]] == i`.
pub fn bit_reversal_table(n: usize) -> Vec<usize> {
    debug_assert!(n.is_power_of_two());
    let bits = n.trailing_zeros();
    if bits == 0 {
        return vec![0];
    }
    (0..n)
        .map(|i| i.reverse_bits() >> (usize::BITS - bits))
        .collect()
}

/// Butterfly engine for one rank. `slot` is the number of complex values
/// per φ-slot (Nr·n_loc); the working buffer holds `o_loc` consecutive
/// slots and every butterfly update acts on whole slots at once.
pub(crate) struct DistributedFft {
    nphi: usize,
    o_loc: usize,
    phi0: usize,
    slot: usize,
}

impl DistributedFft {
    pub(crate) fn new(nphi: usize, o_loc: usize, phi0: usize, slot: usize) -> DistributedFft {
        DistributedFft {
            nphi,
            o_loc,
            phi0,
            slot,
        }
    }

    pub(crate) fn buffer_len(&self) -> usize {
        self.o_loc * self.slot
    }

    /// Forward transform, in place. `scratch` must match `buf` in length;
    /// it only holds partner slabs during cross-rank stages.
    pub(crate) fn forward<C: CartComm>(
        &self,
        comm: &C,
        buf: &mut [Complex64],
        scratch: &mut [Complex64],
    ) -> Result<()> {
        debug_assert_eq!(buf.len(), self.buffer_len());
        let stages = self.nphi.trailing_zeros();
        for stage in 0..stages {
            let di = self.nphi >> (stage + 1);
            if 2 * di <= self.o_loc {
                self.local_forward(di, buf);
            } else {
                self.exchange_forward(comm, di, TAG_FORWARD + stage as Tag, buf, scratch)?;
            }
        }
        Ok(())
    }

    /// Inverse transform, in place: conjugate twiddles on the partner
    /// addend, stages in reverse stride order, scaled by 1/Nφ once up front.
    pub(crate) fn inverse<C: CartComm>(
        &self,
        comm: &C,
        buf: &mut [Complex64],
        scratch: &mut [Complex64],
    ) -> Result<()> {
        debug_assert_eq!(buf.len(), self.buffer_len());
        let norm = 1.0 / self.nphi as f64;
        for x in buf.iter_mut() {
            *x *= norm;
        }
        let stages = self.nphi.trailing_zeros();
        for stage in (0..stages).rev() {
            let di = self.nphi >> (stage + 1);
            if 2 * di <= self.o_loc {
                self.local_inverse(di, buf);
            } else {
                self.exchange_inverse(comm, di, TAG_INVERSE + stage as Tag, buf, scratch)?;
            }
        }
        Ok(())
    }

    fn local_forward(&self, di: usize, buf: &mut [Complex64]) {
        let slot = self.slot;
        for base in (0..self.o_loc).step_by(2 * di) {
            for off in 0..di {
                let lo = base + off;
                let w = Complex64::from_polar(1.0, -PI * off as f64 / di as f64);
                let (head, tail) = buf.split_at_mut((lo + di) * slot);
                let lo_slot = &mut head[lo * slot..(lo + 1) * slot];
                let hi_slot = &mut tail[..slot];
                for (x, y) in izip!(lo_slot.iter_mut(), hi_slot.iter_mut()) {
                    let u = *x;
                    let v = *y;
                    *x = u + v;
                    *y = (u - v) * w;
                }
            }
        }
    }

    fn local_inverse(&self, di: usize, buf: &mut [Complex64]) {
        let slot = self.slot;
        for base in (0..self.o_loc).step_by(2 * di) {
            for off in 0..di {
                let lo = base + off;
                let w = Complex64::from_polar(1.0, PI * off as f64 / di as f64);
                let (head, tail) = buf.split_at_mut((lo + di) * slot);
                let lo_slot = &mut head[lo * slot..(lo + 1) * slot];
                let hi_slot = &mut tail[..slot];
                for (x, y) in izip!(lo_slot.iter_mut(), hi_slot.iter_mut()) {
                    let u = *x;
                    let wv = w * *y;
                    *x = u + wv;
                    *y = u - wv;
                }
            }
        }
    }

    /// Twiddle of the pair whose lower member sits in local slot kk of a
    /// cross-rank stage with stride di
    #[inline(always)]
    fn pair_twiddle(&self, di: usize, kk: usize, sign: f64) -> Complex64 {
        let exponent = (self.phi0 % di + kk) as f64;
        Complex64::from_polar(1.0, sign * PI * exponent / di as f64)
    }

    fn exchange_forward<C: CartComm>(
        &self,
        comm: &C,
        di: usize,
        tag: Tag,
        buf: &mut [Complex64],
        scratch: &mut [Complex64],
    ) -> Result<()> {
        let (_, q) = comm.coords();
        let shift = di / self.o_loc;
        let lower = (self.phi0 / di) % 2 == 0;
        if lower {
            comm.send_complex(Axis::Phi, q + shift, tag, buf)?;
            comm.recv_complex(Axis::Phi, q + shift, tag, scratch)?;
            for (x, y) in izip!(buf.iter_mut(), scratch.iter()) {
                *x += *y;
            }
        } else {
            comm.recv_complex(Axis::Phi, q - shift, tag, scratch)?;
            comm.send_complex(Axis::Phi, q - shift, tag, buf)?;
            for kk in 0..self.o_loc {
                let w = self.pair_twiddle(di, kk, -1.0);
                let range = kk * self.slot..(kk + 1) * self.slot;
                for (x, y) in izip!(buf[range.clone()].iter_mut(), scratch[range].iter()) {
                    *x = (*y - *x) * w;
                }
            }
        }
        Ok(())
    }

    fn exchange_inverse<C: CartComm>(
        &self,
        comm: &C,
        di: usize,
        tag: Tag,
        buf: &mut [Complex64],
        scratch: &mut [Complex64],
    ) -> Result<()> {
        let (_, q) = comm.coords();
        let shift = di / self.o_loc;
        let lower = (self.phi0 / di) % 2 == 0;
        if lower {
            comm.send_complex(Axis::Phi, q + shift, tag, buf)?;
            comm.recv_complex(Axis::Phi, q + shift, tag, scratch)?;
            for kk in 0..self.o_loc {
                let w = self.pair_twiddle(di, kk, 1.0);
                let range = kk * self.slot..(kk + 1) * self.slot;
                for (x, y) in izip!(buf[range.clone()].iter_mut(), scratch[range].iter()) {
                    *x += w * *y;
                }
            }
        } else {
            comm.recv_complex(Axis::Phi, q - shift, tag, scratch)?;
            comm.send_complex(Axis::Phi, q - shift, tag, buf)?;
            for kk in 0..self.o_loc {
                let w = self.pair_twiddle(di, kk, 1.0);
                let range = kk * self.slot..(kk + 1) * self.slot;
                for (x, y) in izip!(buf[range.clone()].iter_mut(), scratch[range].iter()) {
                    *x = *y - w * *x;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{LocalComm, RankGrid};
    use approx::assert_relative_eq;
    use num_traits::Zero;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn bit_reversal_involution() {
        for &n in &[1usize, 2, 8, 64, 256] {
            let index = bit_reversal_table(n);
            for i in 0..n {
                assert_eq!(index[index[i]], i);
            }
        }
    }

    #[test]
    fn bit_reversal_known_table() {
        assert_eq!(bit_reversal_table(8), vec![0, 4, 2, 6, 1, 5, 3, 7]);
    }

    fn random_buf(rng: &mut StdRng, len: usize) -> Vec<Complex64> {
        (0..len)
            .map(|_| Complex64::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
            .collect()
    }

    /// Reference spectrum through rustfft, permuted into the bit-reversed
    /// slot order the distributed butterfly stores
    fn reference_spectrum(input: &[Complex64]) -> Vec<Complex64> {
        let n = input.len();
        let mut planner = rustfft::FftPlanner::new();
        let fft = planner.plan_fft_forward(n);
        let mut natural = input.to_vec();
        fft.process(&mut natural);
        let index = bit_reversal_table(n);
        (0..n).map(|kk| natural[index[kk]]).collect()
    }

    #[test]
    fn impulse_spectrum_is_flat() {
        let fft = DistributedFft::new(8, 8, 0, 1);
        let mut buf = vec![Complex64::zero(); 8];
        buf[0] = Complex64::new(1.0, 0.0);
        let mut scratch = vec![Complex64::zero(); 8];
        fft.forward(&LocalComm, &mut buf, &mut scratch).unwrap();
        for x in &buf {
            assert_relative_eq!(x.re, 1.0, epsilon = 1e-14);
            assert_relative_eq!(x.im, 0.0, epsilon = 1e-14);
        }
        fft.inverse(&LocalComm, &mut buf, &mut scratch).unwrap();
        assert_relative_eq!(buf[0].re, 1.0, epsilon = 1e-13);
        for x in &buf[1..] {
            assert_relative_eq!(x.norm(), 0.0, epsilon = 1e-13);
        }
    }

    #[test]
    fn matches_rustfft_on_a_single_rank() {
        let mut rng = StdRng::seed_from_u64(7);
        let input = random_buf(&mut rng, 16);
        let fft = DistributedFft::new(16, 16, 0, 1);
        let mut buf = input.clone();
        let mut scratch = vec![Complex64::zero(); 16];
        fft.forward(&LocalComm, &mut buf, &mut scratch).unwrap();
        for (mine, reference) in buf.iter().zip(reference_spectrum(&input)) {
            assert_relative_eq!(mine.re, reference.re, epsilon = 1e-12);
            assert_relative_eq!(mine.im, reference.im, epsilon = 1e-12);
        }
    }

    #[test]
    fn round_trip_with_wide_slots() {
        let mut rng = StdRng::seed_from_u64(8);
        let input = random_buf(&mut rng, 32 * 3);
        let fft = DistributedFft::new(32, 32, 0, 3);
        let mut buf = input.clone();
        let mut scratch = vec![Complex64::zero(); buf.len()];
        fft.forward(&LocalComm, &mut buf, &mut scratch).unwrap();
        fft.inverse(&LocalComm, &mut buf, &mut scratch).unwrap();
        for (x, x0) in buf.iter().zip(&input) {
            assert_relative_eq!(x.re, x0.re, epsilon = 1e-12);
            assert_relative_eq!(x.im, x0.im, epsilon = 1e-12);
        }
    }

    #[test]
    fn distributed_matches_single_rank() {
        let nphi = 16;
        let ranks = 4;
        let o_loc = nphi / ranks;
        let mut rng = StdRng::seed_from_u64(9);
        let input = random_buf(&mut rng, nphi);

        let mut handles = Vec::new();
        for (q, comm) in RankGrid::new(1, ranks).into_iter().enumerate() {
            let slab = input[q * o_loc..(q + 1) * o_loc].to_vec();
            handles.push(std::thread::spawn(move || {
                let fft = DistributedFft::new(nphi, o_loc, q * o_loc, 1);
                let mut buf = slab;
                let mut scratch = vec![Complex64::zero(); o_loc];
                fft.forward(&comm, &mut buf, &mut scratch).unwrap();
                let spectrum = buf.clone();
                fft.inverse(&comm, &mut buf, &mut scratch).unwrap();
                (spectrum, buf)
            }));
        }
        let reference = reference_spectrum(&input);
        for (q, handle) in handles.into_iter().enumerate() {
            let (spectrum, restored) = handle.join().unwrap();
            for kk in 0..o_loc {
                let g = q * o_loc + kk;
                assert_relative_eq!(spectrum[kk].re, reference[g].re, epsilon = 1e-12);
                assert_relative_eq!(spectrum[kk].im, reference[g].im, epsilon = 1e-12);
                assert_relative_eq!(restored[kk].re, input[g].re, epsilon = 1e-12);
                assert_relative_eq!(restored[kk].im, input[g].im, epsilon = 1e-12);
            }
        }
    }
}
