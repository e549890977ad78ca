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

//! Single-rank end-to-end behavior of the solver

use poisson_sph::{comm::LocalComm, Field, PoissonSolver, SphericalGrid, Window};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn uniform_grid(nr: usize, rmax: f64, ntheta: usize, nphi: usize) -> SphericalGrid {
    let r_if = (0..=nr).map(|i| rmax * i as f64 / nr as f64).collect();
    SphericalGrid::with_uniform_theta(r_if, ntheta, nphi).unwrap()
}

fn single_rank_solver(grid: SphericalGrid) -> PoissonSolver<LocalComm> {
    let window = Window::for_rank(&grid, &LocalComm).unwrap();
    PoissonSolver::new(grid, window, LocalComm).unwrap()
}

/// Independent oracle: the 7-point finite-volume Laplacian the spectral
/// pipeline diagonalizes, applied directly in real space. Rows touching the
/// outer boundary are only exact for fields that vanish on the two
/// outermost radial zones, which is what the manufactured test uses.
fn discrete_laplacian(grid: &SphericalGrid, phi: &Field) -> Field {
    let (nr, ntheta, nphi) = phi.shape();
    let r = grid.r();
    let r_if = grid.r_if();
    let dv = grid.dv_r();
    let theta_if = grid.theta_if();
    let theta = grid.theta();
    let vol_th = grid.vol_th();
    let dth2 = grid.dtheta() * grid.dtheta();
    let dphi2 = grid.dphi() * grid.dphi();
    // Flux coefficients of the radial operator
    let offdiag: Vec<f64> = (0..nr - 1)
        .map(|i| -r_if[i + 1] * r_if[i + 1] / (r[i + 1] - r[i]))
        .collect();
    Field::from_fn(nr, ntheta, nphi, |i, j, k| {
        let p = |ii: usize, jj: usize, kk: usize| phi.get(ii, jj, kk);
        // Radial part in flux form (no-flux inner boundary)
        let mut t = 0.0;
        if i > 0 {
            t += offdiag[i - 1] * (p(i - 1, j, k) - p(i, j, k));
        }
        if i < nr - 1 {
            t += offdiag[i] * (p(i + 1, j, k) - p(i, j, k));
        }
        // Polar part: a Φ₋ − (a+c) Φ + c Φ₊ with coefficients vanishing at
        // the poles
        let a = theta_if[j].sin() / dth2;
        let c = theta_if[j + 1].sin() / dth2;
        let mut ang = -(a + c) * p(i, j, k);
        if j > 0 {
            ang += a * p(i, j - 1, k);
        }
        if j < ntheta - 1 {
            ang += c * p(i, j + 1, k);
        }
        // Azimuthal part, periodic
        let kp = (k + 1) % nphi;
        let km = (k + nphi - 1) % nphi;
        let d2phi = (p(i, j, kp) - 2.0 * p(i, j, k) + p(i, j, km)) / dphi2;
        ang += d2phi / theta[j].sin();
        -t / dv[i] + ang / (r[i] * r[i] * vol_th[j])
    })
}

fn max_abs(field: &Field) -> f64 {
    field.as_slice().iter().fold(0.0, |m, &v| m.max(v.abs()))
}

#[test]
fn zero_density_gives_zero_potential() {
    let solver = single_rank_solver(uniform_grid(16, 16.0, 8, 8));
    let rho = Field::zeros(16, 8, 8);
    let phi = solver.solve(&rho).unwrap();
    assert!(max_abs(&phi) <= f64::EPSILON);
}

#[test]
fn recovers_a_manufactured_discrete_solution() {
    // Apply the discrete Laplacian to a field supported away from the outer
    // boundary and solve the result: the potential must come back to near
    // machine precision, since solve inverts exactly this operator
    let grid = uniform_grid(16, 16.0, 8, 8);
    let rc = grid.r_if()[14];
    let phi_star = Field::from_fn(16, 8, 8, |i, j, k| {
        let r = grid.r()[i];
        if r >= rc {
            return 0.0;
        }
        let shape = (1.0 - (r / rc) * (r / rc)).powi(2);
        let th = grid.theta()[j];
        let ph = (k as f64 + 0.5) * grid.dphi();
        let angular = 1.0
            + 0.4 * th.cos()
            + 0.3 * th.sin() * ph.cos()
            + 0.2 * th.sin() * ph.sin()
            + 0.1 * (3.0 * th.cos() * th.cos() - 1.0);
        shape * angular
    });
    let rho = discrete_laplacian(&grid, &phi_star);
    let solver = single_rank_solver(grid);
    let phi = solver.solve(&rho).unwrap();
    let scale = max_abs(&phi_star);
    for (x, x0) in phi.as_slice().iter().zip(phi_star.as_slice()) {
        assert!(
            (x - x0).abs() <= 1e-9 * scale,
            "potential mismatch: {} vs {}",
            x,
            x0
        );
    }
}

/// Potential of a homogeneous unit-density sphere of radius a (for
/// ∇²Φ = ρ without the 4πG convention)
fn homogeneous_sphere_potential(r: f64, a: f64) -> f64 {
    if r < a {
        r * r / 6.0 - a * a / 2.0
    } else {
        -a * a * a / (3.0 * r)
    }
}

fn monopole_error(nr: usize) -> f64 {
    // Unit density inside r < 1 on a mesh reaching to r = 2; the sphere
    // surface falls on a cell face so the density is constant per cell
    let grid = uniform_grid(nr, 2.0, 4, 4);
    let rho = Field::from_fn(nr, 4, 4, |i, _, _| {
        if grid.r()[i] < 1.0 {
            1.0
        } else {
            0.0
        }
    });
    let r = grid.r().to_vec();
    let solver = single_rank_solver(grid);
    let phi = solver.solve(&rho).unwrap();
    let mut err: f64 = 0.0;
    for i in 0..nr {
        let exact = homogeneous_sphere_potential(r[i], 1.0);
        err = err.max((phi.get(i, 0, 0) - exact).abs());
    }
    err
}

#[test]
fn homogeneous_sphere_converges_at_second_order() {
    let coarse = monopole_error(16);
    let fine = monopole_error(64);
    assert!(coarse < 1e-2, "coarse error too large: {}", coarse);
    // Quadrupling the resolution should shrink the error ~16×; require at
    // least 8× to leave room for the error constant drifting
    assert!(
        fine < coarse / 8.0,
        "no second-order convergence: {} vs {}",
        coarse,
        fine
    );
}

#[test]
fn solve_is_linear() {
    let grid = uniform_grid(16, 8.0, 8, 8);
    let mut rng = StdRng::seed_from_u64(51);
    let rho1 = Field::from_fn(16, 8, 8, |_, _, _| rng.gen_range(-1.0..1.0));
    let rho2 = Field::from_fn(16, 8, 8, |_, _, _| rng.gen_range(-1.0..1.0));
    let (alpha, beta) = (1.75, -0.4);
    let combined = Field::from_fn(16, 8, 8, |i, j, k| {
        alpha * rho1.get(i, j, k) + beta * rho2.get(i, j, k)
    });
    let solver = single_rank_solver(grid);
    let phi1 = solver.solve(&rho1).unwrap();
    let phi2 = solver.solve(&rho2).unwrap();
    let phi = solver.solve(&combined).unwrap();
    let scale = max_abs(&phi);
    for ((x, x1), x2) in phi
        .as_slice()
        .iter()
        .zip(phi1.as_slice())
        .zip(phi2.as_slice())
    {
        assert!((x - (alpha * x1 + beta * x2)).abs() <= 1e-12 * scale);
    }
}

#[test]
fn preserves_equatorial_parity() {
    let grid = uniform_grid(16, 8.0, 8, 8);
    let mut rng = StdRng::seed_from_u64(52);
    let half = Field::from_fn(16, 4, 8, |_, _, _| rng.gen_range(-1.0..1.0));
    let solver = single_rank_solver(grid);
    for &odd in &[false, true] {
        let sign = if odd { -1.0 } else { 1.0 };
        let rho = Field::from_fn(16, 8, 8, |i, j, k| {
            if j < 4 {
                half.get(i, j, k)
            } else {
                sign * half.get(i, 7 - j, k)
            }
        });
        let phi = solver.solve(&rho).unwrap();
        let scale = max_abs(&phi);
        for k in 0..8 {
            for j in 0..4 {
                for i in 0..16 {
                    let mirror = sign * phi.get(i, 7 - j, k);
                    assert!(
                        (phi.get(i, j, k) - mirror).abs() <= 1e-12 * scale,
                        "parity broken at ({}, {}, {})",
                        i,
                        j,
                        k
                    );
                }
            }
        }
    }
}

#[test]
fn axisymmetric_density_gives_axisymmetric_potential() {
    let grid = uniform_grid(16, 8.0, 8, 8);
    let mut rng = StdRng::seed_from_u64(53);
    let profile = Field::from_fn(16, 8, 1, |_, _, _| rng.gen_range(-1.0..1.0));
    let rho = Field::from_fn(16, 8, 8, |i, j, _| profile.get(i, j, 0));
    let solver = single_rank_solver(grid);
    let phi = solver.solve(&rho).unwrap();
    let scale = max_abs(&phi);
    for k in 1..8 {
        for j in 0..8 {
            for i in 0..16 {
                assert!((phi.get(i, j, k) - phi.get(i, j, 0)).abs() <= 1e-12 * scale);
            }
        }
    }
}

#[test]
fn handles_are_independent() {
    // A rank may hold several solver instances at once
    let solver_a = single_rank_solver(uniform_grid(16, 8.0, 8, 8));
    let solver_b = single_rank_solver(uniform_grid(16, 8.0, 8, 8));
    let mut rho = Field::zeros(16, 8, 8);
    rho.set(4, 2, 3, 1.0);
    let phi_a = solver_a.solve(&rho).unwrap();
    let phi_b = solver_b.solve(&rho).unwrap();
    assert_eq!(phi_a, phi_b);
}

#[test]
fn rejects_mismatched_fields() {
    let solver = single_rank_solver(uniform_grid(16, 8.0, 8, 8));
    let rho = Field::zeros(16, 8, 4);
    assert!(solver.solve(&rho).is_err());
}
