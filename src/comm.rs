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

//! Pairwise messaging over a 2-D Cartesian process grid
//!
//! The solver is SPMD: every rank runs the same code and all collective
//! progress happens through matched blocking send/receive pairs. This module
//! defines the transport seam ([CartComm]) plus two implementations:
//! [RankGrid] connects the ranks of one process through per-pair FIFO
//! channels (one handle per rank, each typically driven by its own thread),
//! and [LocalComm] is the trivial 1×1 grid for single-rank runs, where every
//! exchange in the solver is guarded by a locality condition and no message
//! is ever posted.

use std::sync::mpsc::{channel, Receiver, Sender};

use num_complex::Complex64;
use thiserror::Error;

/// The two axes of the process grid: `Theta` distributes the polar slabs,
/// `Phi` the azimuthal slabs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Theta,
    Phi,
}

/// Message tag distinguishing the exchange legs of one solve
pub type Tag = u16;

/// Transport failures. These are never recovered from; the solver wraps
/// them into its fatal error type.
#[derive(Debug, Clone, Error)]
pub enum CommError {
    #[error("no rank at coordinate {coord} along {axis:?}")]
    NoSuchPeer { axis: Axis, coord: usize },
    #[error("peer hung up")]
    Disconnected,
    #[error("tag mismatch: expected {expected}, received {received}")]
    TagMismatch { expected: Tag, received: Tag },
    #[error("message length mismatch: expected {expected}, received {received}")]
    LengthMismatch { expected: usize, received: usize },
}

/// A rank's view of a 2-D Cartesian communicator of shape (P, Q) over the
/// (θ, φ) axes.
///
/// Peers are addressed by axis and target coordinate along that axis (the
/// coordinate on the other axis is shared). Sends and receives block until
/// the transfer completes; deadlock freedom is the caller's responsibility
/// and is obtained by the parity-selected posting order used at every
/// exchange site of the solver.
pub trait CartComm {
    /// Process grid shape (P, Q) = (θ-partitions, φ-partitions)
    fn dims(&self) -> (usize, usize);
    /// This rank's coordinates (p, q) with p ∈ [0, P), q ∈ [0, Q)
    fn coords(&self) -> (usize, usize);
    /// Send a real buffer to the rank at `coord` along `axis`
    fn send_real(&self, axis: Axis, coord: usize, tag: Tag, buf: &[f64]) -> Result<(), CommError>;
    /// Receive a real buffer from the rank at `coord` along `axis`;
    /// the message must match `buf` in length and carry `tag`
    fn recv_real(
        &self,
        axis: Axis,
        coord: usize,
        tag: Tag,
        buf: &mut [f64],
    ) -> Result<(), CommError>;
    /// Send a complex buffer to the rank at `coord` along `axis`
    fn send_complex(
        &self,
        axis: Axis,
        coord: usize,
        tag: Tag,
        buf: &[Complex64],
    ) -> Result<(), CommError>;
    /// Receive a complex buffer from the rank at `coord` along `axis`
    fn recv_complex(
        &self,
        axis: Axis,
        coord: usize,
        tag: Tag,
        buf: &mut [Complex64],
    ) -> Result<(), CommError>;
}

struct Message {
    tag: Tag,
    data: Vec<f64>,
}

/// In-process Cartesian communicator: all ranks live in one process and
/// exchange buffers over per-pair FIFO channels.
///
/// [RankGrid::new] builds every handle of a (P, Q) grid at once; each handle
/// is then moved into the thread that plays its rank. Message order between
/// any pair of ranks is preserved, so a per-site tag is enough to keep the
/// exchange legs of a solve apart.
pub struct RankGrid {
    p_dims: usize,
    q_dims: usize,
    p: usize,
    q: usize,
    /// Senders to every rank, indexed by flat rank id
    senders: Vec<Sender<Message>>,
    /// Receivers from every rank, indexed by flat rank id
    receivers: Vec<Receiver<Message>>,
}

impl RankGrid {
    /// Create all rank handles of a (P, Q) process grid.
    ///
    /// The handle at index `p·Q + q` belongs to the rank with coordinates
    /// (p, q).
    pub fn new(p_dims: usize, q_dims: usize) -> Vec<RankGrid> {
        let n = p_dims * q_dims;
        let mut senders_by_src: Vec<Vec<Sender<Message>>> = (0..n).map(|_| Vec::new()).collect();
        let mut receivers_by_dst: Vec<Vec<Receiver<Message>>> =
            (0..n).map(|_| Vec::new()).collect();
        for src in 0..n {
            for dst in 0..n {
                let (tx, rx) = channel();
                senders_by_src[src].push(tx);
                receivers_by_dst[dst].push(rx);
            }
        }
        // senders_by_src[src][dst] pairs with receivers_by_dst[dst][src]
        senders_by_src
            .into_iter()
            .zip(receivers_by_dst)
            .enumerate()
            .map(|(rank, (senders, receivers))| RankGrid {
                p_dims,
                q_dims,
                p: rank / q_dims,
                q: rank % q_dims,
                senders,
                receivers,
            })
            .collect()
    }

    fn peer(&self, axis: Axis, coord: usize) -> Result<usize, CommError> {
        let (tp, tq) = match axis {
            Axis::Theta => (coord, self.q),
            Axis::Phi => (self.p, coord),
        };
        if tp >= self.p_dims || tq >= self.q_dims {
            return Err(CommError::NoSuchPeer { axis, coord });
        }
        Ok(tp * self.q_dims + tq)
    }

    fn send(&self, axis: Axis, coord: usize, tag: Tag, data: Vec<f64>) -> Result<(), CommError> {
        let peer = self.peer(axis, coord)?;
        self.senders[peer]
            .send(Message { tag, data })
            .map_err(|_| CommError::Disconnected)
    }

    fn recv(&self, axis: Axis, coord: usize, tag: Tag, len: usize) -> Result<Vec<f64>, CommError> {
        let peer = self.peer(axis, coord)?;
        let msg = self.receivers[peer]
            .recv()
            .map_err(|_| CommError::Disconnected)?;
        if msg.tag != tag {
            return Err(CommError::TagMismatch {
                expected: tag,
                received: msg.tag,
            });
        }
        if msg.data.len() != len {
            return Err(CommError::LengthMismatch {
                expected: len,
                received: msg.data.len(),
            });
        }
        Ok(msg.data)
    }
}

impl CartComm for RankGrid {
    fn dims(&self) -> (usize, usize) {
        (self.p_dims, self.q_dims)
    }

    fn coords(&self) -> (usize, usize) {
        (self.p, self.q)
    }

    fn send_real(&self, axis: Axis, coord: usize, tag: Tag, buf: &[f64]) -> Result<(), CommError> {
        self.send(axis, coord, tag, buf.to_vec())
    }

    fn recv_real(
        &self,
        axis: Axis,
        coord: usize,
        tag: Tag,
        buf: &mut [f64],
    ) -> Result<(), CommError> {
        let data = self.recv(axis, coord, tag, buf.len())?;
        buf.copy_from_slice(&data);
        Ok(())
    }

    fn send_complex(
        &self,
        axis: Axis,
        coord: usize,
        tag: Tag,
        buf: &[Complex64],
    ) -> Result<(), CommError> {
        // Interleave re/im on the wire
        let mut data = Vec::with_capacity(2 * buf.len());
        for z in buf {
            data.push(z.re);
            data.push(z.im);
        }
        self.send(axis, coord, tag, data)
    }

    fn recv_complex(
        &self,
        axis: Axis,
        coord: usize,
        tag: Tag,
        buf: &mut [Complex64],
    ) -> Result<(), CommError> {
        let data = self.recv(axis, coord, tag, 2 * buf.len())?;
        for (z, pair) in buf.iter_mut().zip(data.chunks_exact(2)) {
            *z = Complex64::new(pair[0], pair[1]);
        }
        Ok(())
    }
}

/// The 1×1 process grid. All exchanges in the solver are guarded by
/// locality conditions, so on a single rank no message is ever posted and
/// every transport method is unreachable.
pub struct LocalComm;

impl CartComm for LocalComm {
    fn dims(&self) -> (usize, usize) {
        (1, 1)
    }

    fn coords(&self) -> (usize, usize) {
        (0, 0)
    }

    fn send_real(&self, axis: Axis, coord: usize, _: Tag, _: &[f64]) -> Result<(), CommError> {
        Err(CommError::NoSuchPeer { axis, coord })
    }

    fn recv_real(&self, axis: Axis, coord: usize, _: Tag, _: &mut [f64]) -> Result<(), CommError> {
        Err(CommError::NoSuchPeer { axis, coord })
    }

    fn send_complex(
        &self,
        axis: Axis,
        coord: usize,
        _: Tag,
        _: &[Complex64],
    ) -> Result<(), CommError> {
        Err(CommError::NoSuchPeer { axis, coord })
    }

    fn recv_complex(
        &self,
        axis: Axis,
        coord: usize,
        _: Tag,
        _: &mut [Complex64],
    ) -> Result<(), CommError> {
        Err(CommError::NoSuchPeer { axis, coord })
    }
}
