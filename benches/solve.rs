/// Single-rank solve benchmark

use criterion::{criterion_group, criterion_main, Criterion};

use poisson_sph::{comm::LocalComm, Field, PoissonSolver, SphericalGrid, Window};

fn my_benchmark(c: &mut Criterion) {
    const NR: usize = 64;
    const NTHETA: usize = 32;
    const NPHI: usize = 32;
    let r_if = (0..=NR).map(|i| i as f64).collect();
    let grid = SphericalGrid::with_uniform_theta(r_if, NTHETA, NPHI).unwrap();
    let window = Window::for_rank(&grid, &LocalComm).unwrap();
    let solver = PoissonSolver::new(grid, window, LocalComm).unwrap();
    let rho = Field::from_fn(NR, NTHETA, NPHI, |i, j, k| {
        (-((i as f64 - 20.0).powi(2) + (j as f64 - 16.0).powi(2) + (k as f64 - 16.0).powi(2))
            / 50.0)
            .exp()
    });

    c.bench_function("solve_64x32x32", |b| {
        b.iter(|| solver.solve(&rho).unwrap())
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = my_benchmark
}
criterion_main!(benches);
