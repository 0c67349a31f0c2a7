//! Contract with the node-group tensor engine. The physics inside the
//! generate calls is opaque to the orchestrator; only the call sequence and
//! the buffer hand-off are fixed here.

pub mod naive;

use crate::config::ContractParams;
use crate::error::Result;
use crate::lattice::layout::Lattice;
use crate::types::{Complex64, Momentum};

/// Node-local contraction engine owned by the primary rank of each node
/// group.
///
/// Call discipline (enforced by the orchestrator): `init` once before any
/// data lands; buffers are filled by the timeslice collector between `init`
/// and the generate calls; each `generate_*` call is issued on primaries
/// only and followed by a barrier before any non-primary proceeds; `done`
/// finalizes.
pub trait GenpropEngine {
    fn init(
        &mut self,
        lattice: &Lattice,
        t_start_local: i32,
        ts_per_node: usize,
        contract: &ContractParams,
    ) -> Result<()>;

    /// Destination buffers for the smeared gauge field, one per local
    /// timeslice slot. The collector writes timeslice data straight into
    /// these.
    fn gauge_buffers(&mut self, dir: usize) -> &mut [Vec<Complex64>];

    /// Destination buffers for the streamed solution field of one
    /// (source time, color vector) key, one per local timeslice slot.
    fn solution_buffers(&mut self, t_source: i32, colorvec: usize) -> &mut [Vec<Complex64>];

    fn generate_sink_tensors(&mut self);

    fn generate_source_tensors(&mut self, t_source: i32, mom: &Momentum, disp: &[i32]);

    /// Contracts the genprop tensors of every local slot for one
    /// (sink time, gamma) pair into `out` (one flat
    /// num_vecs x num_vecs x Ns x Ns tensor per slot).
    fn generate_genprops(&mut self, t_sink: i32, gamma: usize, out: &mut [Vec<Complex64>]);

    fn done(&mut self);
}
