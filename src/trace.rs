//! Hutchinson stochastic estimate of tr M^-1 from Z2 noise sources.

use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::comm::Communicator;
use crate::config::TraceParams;
use crate::lattice::field::{Field, FERMION_ELEMS};
use crate::lattice::layout::Layout;
use crate::solver::SystemSolver;
use crate::types::{Complex64, NC, NS};

#[derive(Clone, Copy, Debug, Serialize)]
pub struct TraceEstimate {
    pub num_samples: usize,
    /// Mean of the per-sample estimates eta^dag M^-1 eta.
    pub mean: Complex64,
    pub variance: Complex64,
    /// Mean normalized per diagonal entry.
    pub per_entry: Complex64,
}

/// A Z2 noise fermion: every (site, spin, color) component is +1 or -1 on
/// the real axis. Seeding is per global timeslice, so the field does not
/// depend on the rank count.
pub fn z2_fermion(layout: Layout, seed: u64) -> Field {
    let mut field = Field::zeros(layout, FERMION_ELEMS);
    for t in layout.local_t_range() {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_mul(0x9e37_79b9).wrapping_add(t as u64));
        for z in field.timeslice_mut(t).unwrap().iter_mut() {
            let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            *z = Complex64::new(sign, 0.0);
        }
    }
    field
}

/// Global inner product <a, b> = sum over sites of conj(a) . b.
pub fn inner_product<C: Communicator + ?Sized>(comm: &C, a: &Field, b: &Field) -> Complex64 {
    let local: Complex64 = a
        .local_data()
        .iter()
        .zip(b.local_data())
        .map(|(x, y)| x.conj() * y)
        .sum();
    Complex64::new(
        comm.all_reduce_sum(local.re),
        comm.all_reduce_sum(local.im),
    )
}

/// Estimates tr M^-1 from `num_samples` Z2 noise vectors, reporting mean,
/// variance and the per-diagonal-entry expectation.
pub fn hutchinson_trace<C: Communicator + ?Sized>(
    comm: &C,
    layout: Layout,
    solver: &dyn SystemSolver,
    params: &TraceParams,
) -> TraceEstimate {
    let mut samples = Vec::with_capacity(params.num_samples);
    for i in 0..params.num_samples {
        let noise = z2_fermion(layout, params.seed.wrapping_add(i as u64));
        let mut solution = Field::zeros(layout, FERMION_ELEMS);
        solver.solve(&mut solution, &noise);
        let sample = inner_product(comm, &noise, &solution);
        info!(sample_index = i, re = sample.re, im = sample.im; "trace sample");
        samples.push(sample);
    }

    let n = samples.len() as f64;
    let mean: Complex64 = samples.iter().sum::<Complex64>() / n;
    let variance: Complex64 = samples
        .iter()
        .map(|s| {
            let d = s - mean;
            d * d
        })
        .sum::<Complex64>()
        / n;

    let diagonal_entries = (layout.lattice.volume() * NC * NS) as f64;
    TraceEstimate {
        num_samples: params.num_samples,
        mean,
        variance,
        per_entry: mean / diagonal_entries,
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use float_cmp::approx_eq;

    use super::*;
    use crate::comm::local::LocalUniverse;
    use crate::lattice::layout::Lattice;
    use crate::solver::{create_solver, SolverParams};

    fn lattice() -> Lattice {
        Lattice {
            extent: [2, 2, 2, 4],
            decay_dir: 3,
        }
    }

    #[test]
    fn test_z2_entries_are_signs() {
        let layout = Layout::new(lattice(), 0, 1).unwrap();
        let noise = z2_fermion(layout, 3);
        assert!(noise
            .local_data()
            .iter()
            .all(|z| (z.re == 1.0 || z.re == -1.0) && z.im == 0.0));
    }

    #[test]
    fn test_diagonal_solver_trace_is_exact() {
        // On the diagonal action every sample is exactly
        // eta^dag eta / (m + Nd), so the variance vanishes and the
        // per-entry estimate equals 1 / (m + Nd).
        let params = SolverParams {
            fermact: "diagonal".to_string(),
            mass: 1.0,
            rsd_target: 1.0e-8,
            max_iterations: 10,
        };
        let comms = LocalUniverse::new(2);
        thread::scope(|s| {
            for comm in comms {
                let params = params.clone();
                s.spawn(move || {
                    let layout = Layout::new(lattice(), comm.rank(), 2).unwrap();
                    let solver = create_solver(&params, &[]).unwrap();
                    let estimate = hutchinson_trace(
                        &comm,
                        layout,
                        solver.as_ref(),
                        &TraceParams {
                            num_samples: 4,
                            seed: 17,
                        },
                    );
                    let entries = (lattice().volume() * NC * NS) as f64;
                    assert!(approx_eq!(f64, estimate.mean.re, entries / 5.0, epsilon = 1e-9));
                    assert!(approx_eq!(f64, estimate.variance.re, 0.0, epsilon = 1e-9));
                    assert!(approx_eq!(f64, estimate.per_entry.re, 0.2, epsilon = 1e-12));
                });
            }
        });
    }
}
