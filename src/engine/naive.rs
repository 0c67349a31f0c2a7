use std::f64::consts::TAU;

use log::debug;
use rustc_hash::FxHashMap;

use crate::config::ContractParams;
use crate::engine::GenpropEngine;
use crate::error::{Error, Result};
use crate::lattice::field::{GAUGE_ELEMS, SPINMAT_ELEMS};
use crate::lattice::layout::Lattice;
use crate::types::{Complex64, Momentum, NC, ND, NS};

/// Reference contraction kernel, node-local and deterministic.
///
/// Genprop elements are spin-projected momentum sums of the streamed
/// solution slices: gamma index `g` selects the spin-basis matrix
/// E_(g%4, g/4) at the insertion, the displacement acts as a circular
/// spatial shift on the right-hand solution, and the momentum enters as a
/// per-site phase. The sink basis is the streamed solutions themselves, so
/// the sink time enters only the record key. Production kernels implement
/// [`GenpropEngine`] with the real physics.
#[derive(Default)]
pub struct NaiveEngine {
    dims: [usize; 3],
    vol3: usize,
    ts_per_node: usize,
    t_start_local: i32,
    num_vecs: usize,
    disp_length: usize,
    gauge: Vec<Vec<Vec<Complex64>>>,
    solutions: FxHashMap<(i32, usize), Vec<Vec<Complex64>>>,
    sink_ready: bool,
    source: Option<SourceSelection>,
    initialized: bool,
}

struct SourceSelection {
    t_source: i32,
    phases: Vec<Complex64>,
    shift: Vec<usize>,
}

impl NaiveEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn site_index(&self, coords: [usize; 3]) -> usize {
        coords[0] + self.dims[0] * (coords[1] + self.dims[1] * coords[2])
    }

    fn site_coords(&self, site: usize) -> [usize; 3] {
        [
            site % self.dims[0],
            (site / self.dims[0]) % self.dims[1],
            site / (self.dims[0] * self.dims[1]),
        ]
    }
}

impl GenpropEngine for NaiveEngine {
    fn init(
        &mut self,
        lattice: &Lattice,
        t_start_local: i32,
        ts_per_node: usize,
        contract: &ContractParams,
    ) -> Result<()> {
        if lattice.decay_dir != ND - 1 {
            return Err(Error::Config(format!(
                "reference kernel requires decay_dir {}, got {}",
                ND - 1,
                lattice.decay_dir
            )));
        }
        self.dims = [lattice.extent[0], lattice.extent[1], lattice.extent[2]];
        self.vol3 = lattice.spatial_volume();
        self.ts_per_node = ts_per_node;
        self.t_start_local = t_start_local;
        self.num_vecs = contract.num_vecs;
        self.disp_length = contract.displacement_length.max(1) as usize;
        self.gauge = (0..3)
            .map(|_| vec![vec![Complex64::new(0.0, 0.0); self.vol3 * GAUGE_ELEMS]; ts_per_node])
            .collect();
        self.solutions.clear();
        self.sink_ready = false;
        self.source = None;
        self.initialized = true;
        debug!(t_start_local, ts_per_node; "initialized reference kernel");
        Ok(())
    }

    fn gauge_buffers(&mut self, dir: usize) -> &mut [Vec<Complex64>] {
        assert!(self.initialized, "engine not initialized");
        &mut self.gauge[dir]
    }

    fn solution_buffers(&mut self, t_source: i32, colorvec: usize) -> &mut [Vec<Complex64>] {
        assert!(self.initialized, "engine not initialized");
        let vol3 = self.vol3;
        let ts_per_node = self.ts_per_node;
        self.solutions
            .entry((t_source, colorvec))
            .or_insert_with(|| {
                vec![vec![Complex64::new(0.0, 0.0); vol3 * SPINMAT_ELEMS]; ts_per_node]
            })
    }

    fn generate_sink_tensors(&mut self) {
        assert!(self.initialized, "engine not initialized");
        self.sink_ready = true;
    }

    fn generate_source_tensors(&mut self, t_source: i32, mom: &Momentum, disp: &[i32]) {
        assert!(self.initialized, "engine not initialized");
        let mut phases = Vec::with_capacity(self.vol3);
        for site in 0..self.vol3 {
            let x = self.site_coords(site);
            let arg: f64 = (0..3)
                .map(|d| -TAU * mom[d] as f64 * x[d] as f64 / self.dims[d] as f64)
                .sum();
            phases.push(Complex64::new(arg.cos(), arg.sin()));
        }

        let mut shift = Vec::with_capacity(self.vol3);
        for site in 0..self.vol3 {
            let mut x = self.site_coords(site);
            for &d in disp {
                assert!(d != 0 && d.unsigned_abs() as usize <= 3, "bad displacement dir {d}");
                let axis = (d.unsigned_abs() - 1) as usize;
                let l = self.dims[axis];
                let step = self.disp_length % l;
                x[axis] = if d > 0 {
                    (x[axis] + step) % l
                } else {
                    (x[axis] + l - step) % l
                };
            }
            shift.push(self.site_index(x));
        }

        self.source = Some(SourceSelection {
            t_source,
            phases,
            shift,
        });
    }

    fn generate_genprops(&mut self, t_sink: i32, gamma: usize, out: &mut [Vec<Complex64>]) {
        assert!(self.sink_ready, "sink tensors not generated");
        let source = self.source.as_ref().expect("source tensors not generated");
        let nv = self.num_vecs;
        let (g_row, g_col) = (gamma % NS, gamma / NS);
        debug!(t_sink, gamma; "contracting genprops");

        for (slot, out_slot) in out.iter_mut().enumerate().take(self.ts_per_node) {
            out_slot.resize(nv * nv * NS * NS, Complex64::new(0.0, 0.0));
            for v1 in 0..nv {
                let left = &self.solutions[&(source.t_source, v1)][slot];
                for v2 in 0..nv {
                    let right = &self.solutions[&(source.t_source, v2)][slot];
                    for s1 in 0..NS {
                        for s2 in 0..NS {
                            let mut acc = Complex64::new(0.0, 0.0);
                            for x in 0..self.vol3 {
                                let xr = source.shift[x];
                                for c in 0..NC {
                                    let l = left[x * SPINMAT_ELEMS + (c * NS + g_row) * NS + s1];
                                    let r = right[xr * SPINMAT_ELEMS + (c * NS + g_col) * NS + s2];
                                    acc += l.conj() * source.phases[x] * r;
                                }
                            }
                            out_slot[((v1 * nv + v2) * NS + s1) * NS + s2] = acc;
                        }
                    }
                }
            }
        }
    }

    fn done(&mut self) {
        self.gauge.clear();
        self.solutions.clear();
        self.sink_ready = false;
        self.source = None;
        self.initialized = false;
    }
}
