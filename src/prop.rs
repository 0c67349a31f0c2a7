use std::time::Instant;

use log::{info, warn};

use crate::error::{Error, Result};
use crate::lattice::colorvec::VectorSourceStore;
use crate::lattice::field::{
    fermion_from_colorvec, store_spin_column, Field, FERMION_ELEMS, SPINMAT_ELEMS,
};
use crate::solver::{create_solver, SolverParams, SystemSolver};
use crate::types::NS;

/// Maximum acceptable relative residual of an inversion. Anything worse is
/// an error, not a retry.
const RESID_BOUND: f64 = 1.0e-3;

/// Builds spin-diluted propagator solutions from the stored color-vector
/// basis: one reusable solver instance, one spin-matrix solution per
/// (source time, color-vector index) request.
pub struct SourcePropFactory<'a> {
    sources: &'a dyn VectorSourceStore,
    solver: Box<dyn SystemSolver>,
    num_tries: usize,
}

impl<'a> SourcePropFactory<'a> {
    pub fn new(
        gauge: &[Field],
        params: &SolverParams,
        sources: &'a dyn VectorSourceStore,
        num_tries: usize,
    ) -> Result<Self> {
        let start = Instant::now();
        let solver = create_solver(params, gauge)?;
        info!(
            fermact = params.fermact.as_str(),
            seconds = start.elapsed().as_secs_f64();
            "initialized the prop solver"
        );
        Ok(Self {
            sources,
            solver,
            num_tries: num_tries.max(1),
        })
    }

    /// The spin-matrix solution for one (source time, color vector) key.
    /// Either all four spin components succeed or an error is returned; no
    /// partial solutions escape.
    pub fn get_solution(&self, t_source: i32, colorvec: usize) -> Result<Field> {
        let start = Instant::now();
        let vec_srce = self.sources.get(t_source, colorvec)?;

        let mut soln = Field::zeros(vec_srce.layout(), SPINMAT_ELEMS);
        for spin in 0..NS {
            let component = self.invert(&vec_srce, spin)?;
            store_spin_column(&mut soln, &component, spin);
        }
        info!(
            t_source,
            colorvec,
            seconds = start.elapsed().as_secs_f64();
            "computed source solution"
        );
        Ok(soln)
    }

    /// One spin component: solve from a zeroed guess, retrying on a
    /// non-finite result up to the retry bound. The guess is re-zeroed for
    /// every attempt.
    fn invert(&self, vec_srce: &Field, spin: usize) -> Result<Field> {
        let chi = fermion_from_colorvec(vec_srce, spin);
        let mut quark_soln = Field::zeros(chi.layout(), FERMION_ELEMS);
        for attempt in 1..=self.num_tries {
            quark_soln.set_zero();
            let stats = self.solver.solve(&mut quark_soln, &chi);
            if stats.residual > RESID_BOUND {
                return Err(Error::ResidualTooLarge {
                    residual: stats.residual,
                });
            }
            if quark_soln.is_finite() {
                return Ok(quark_soln);
            }
            warn!(spin, attempt; "found something not finite, may retry");
        }
        Err(Error::NonFiniteSolution {
            tries: self.num_tries,
        })
    }
}
