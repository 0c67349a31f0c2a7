//! The measurement orchestrator: validates the configuration, streams gauge
//! and solution timeslices to the node-group engines, drives the
//! displacement x momentum x sink-time x gamma contraction loop, gathers the
//! tensors to rank 0 and commits them to the store.

pub mod schedule;

use std::time::Instant;

use log::info;

use crate::comm::collect::TsCollect;
use crate::comm::{
    broadcast_serializing, consensus_ok, fatal, pack_complex, unpack_complex, Communicator,
};
use crate::config::Params;
use crate::engine::GenpropEngine;
use crate::error::{Error, Result};
use crate::lattice::colorvec::VectorSourceStore;
use crate::lattice::field::Field;
use crate::lattice::layout::{Lattice, Layout};
use crate::lattice::registry::NamedObjectMap;
use crate::lattice::smear::create_smearing;
use crate::pipeline::schedule::{in_store_range, validate_store_range, NodeGroupSchedule};
use crate::prop::SourcePropFactory;
use crate::report::Report;
use crate::store::{DbMeta, GenPropKey, GenPropValue, GenpropDb};
use crate::types::{normalize_displacement, Complex64, ND, NS};

/// Escalates a local error to a job-wide abort, but only after collective
/// agreement, so that no rank aborts while others sit in a later barrier.
fn ensure<C: Communicator + ?Sized, T>(comm: &C, result: Result<T>) -> T {
    if !consensus_ok(comm, result.is_ok()) {
        let msg = match &result {
            Err(e) => format!("fatal: {e}"),
            Ok(_) => "fatal error on another rank".to_string(),
        };
        fatal(comm, &msg);
    }
    result.unwrap()
}

fn open_store(path: &str, meta: DbMeta) -> Result<GenpropDb> {
    if GenpropDb::exists(path) {
        GenpropDb::open(path)
    } else {
        GenpropDb::create(path, meta)
    }
}

fn validate(params: &Params, lattice: &Lattice) -> Result<()> {
    if lattice.decay_dir != ND - 1 {
        return Err(Error::Config(format!(
            "timeslice collection only supports decay_dir = {}",
            ND - 1
        )));
    }
    if params.displacements.is_empty() {
        return Err(Error::Config(
            "displacement list is empty; an individual displacement may be empty, \
             the list may not"
                .to_string(),
        ));
    }
    if params.moms.is_empty() {
        return Err(Error::Config("momentum list is empty".to_string()));
    }
    validate_store_range(lattice.lt(), &params.contractions)
}

/// The unsmeared-hadron-node measurement over one gauge configuration.
pub struct HadronNodePipeline {
    params: Params,
}

impl HadronNodePipeline {
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    /// Runs the full measurement. SPMD: every rank calls this with the same
    /// parameters, and every rank issues the same sequence of collective
    /// operations. Errors terminate the whole job.
    pub fn run<C: Communicator + ?Sized>(
        &self,
        comm: &C,
        registry: &NamedObjectMap,
        sources: &dyn VectorSourceStore,
        engine: &mut dyn GenpropEngine,
        report: &mut Report,
    ) {
        let total = Instant::now();
        info!("construct unsmeared hadron nodes via distillation");

        let p = &self.params;
        let c = &p.contractions;
        let lattice = Lattice {
            extent: p.lattice,
            decay_dir: c.decay_dir,
        };
        let lt = lattice.lt();

        // Validate.
        let sched = ensure(
            comm,
            validate(p, &lattice)
                .and_then(|()| NodeGroupSchedule::new(comm.rank(), comm.size(), lt, c)),
        );
        let layout = ensure(comm, Layout::new(lattice, comm.rank(), comm.size()));

        {
            let t_last_compute = sched.t_slice(c.nt_forward - 1);
            let t_last_store = (c.store_t_start() as i64 + c.store_nt_forward() as i64 - 1)
                .rem_euclid(lt as i64);
            info!(t_start = c.t_start, t_last = t_last_compute; "computing genprops");
            info!(t_start = c.store_t_start(), t_last = t_last_store; "storing genprops");
        }

        report.push("UnsmearedHadronNode");
        report.write("input", p);

        // InitEngine.
        let init = if sched.is_primary() {
            engine.init(&lattice, sched.t_start_local(), c.ts_per_node, c)
        } else {
            Ok(())
        };
        ensure(comm, init);
        comm.barrier();
        info!("genprop engine init successful");

        // LoadGauge.
        let gauge = ensure(
            comm,
            registry
                .get::<Vec<Field>>(&p.named_object.gauge_id)
                .map(Clone::clone),
        );
        let config_info = ensure(
            comm,
            registry
                .record_info(&p.named_object.gauge_id)
                .map(String::from),
        );
        report.write("config_info", &config_info);
        report.push("output_version");
        report.write("out_version", &1);
        report.pop();

        // Open the store on rank 0, creating it with the metadata header if
        // absent.
        let db_open = if comm.rank() == 0 {
            open_store(
                &p.named_object.dist_op_file,
                DbMeta {
                    id: "genprop4ElemOp".to_string(),
                    lattice: p.lattice,
                    decay_dir: c.decay_dir,
                    config_info: config_info.clone(),
                },
            )
            .map(Some)
        } else {
            Ok(None)
        };
        let mut db = ensure(comm, db_open);
        info!("finished opening distillation store");

        // Smear.
        let smearing = ensure(comm, create_smearing(&p.link_smearing));
        let mut u_smr = gauge.clone();
        smearing.smear(&mut u_smr);
        info!(smearing = p.link_smearing.id.as_str(); "finished link smearing");

        report.push("observables");
        for (dir, u) in u_smr.iter().enumerate() {
            let norm = comm.all_reduce_sum(u.norm2());
            report.write(&format!("link_norm2_{dir}"), &norm);
        }
        report.pop();

        // BroadcastGauge: the three spatial link directions go to the
        // engines, one collection pass amortized over all of them.
        let mut ts_collect_u = TsCollect::new();
        ts_collect_u.prepare(c.ts_per_node, c.t_start, c.nt_forward, c.nodes_per_cn, layout);
        for q in 0..3 {
            let norm = comm.all_reduce_sum(u_smr[q].norm2());
            info!(dir = q, norm; "sending gauge field");
            let dest: &mut [Vec<Complex64>] = if sched.is_primary() {
                engine.gauge_buffers(q)
            } else {
                &mut []
            };
            ts_collect_u.collect(comm, &u_smr[q], dest);
        }

        // BuildSources: all solutions are generated and streamed before any
        // contraction starts.
        let factory = ensure(
            comm,
            SourcePropFactory::new(&gauge, &p.propagator, sources, c.retry_bound()),
        );
        let mut ts_collect_soln = TsCollect::new();
        ts_collect_soln.prepare(c.ts_per_node, c.t_start, c.nt_forward, c.nodes_per_cn, layout);

        let build = Instant::now();
        for &t_source in &p.prop_sources {
            info!(t_source; "start new set of source solution vectors");
            let sw = Instant::now();
            for colorvec_src in 0..c.num_vecs {
                let soln = ensure(comm, factory.get_solution(t_source, colorvec_src));
                info!(t_source, colorvec = colorvec_src; "sending solution to the engine");
                let dest: &mut [Vec<Complex64>] = if sched.is_primary() {
                    engine.solution_buffers(t_source, colorvec_src)
                } else {
                    &mut []
                };
                ts_collect_soln.collect(comm, &soln, dest);
            }
            info!(
                t_source,
                seconds = sw.elapsed().as_secs_f64();
                "finished set of source solution vectors"
            );
        }
        report.write("source_build_seconds", &build.elapsed().as_secs_f64());

        // Sink tensors.
        let clock = Instant::now();
        if sched.is_primary() {
            engine.generate_sink_tensors();
        }
        comm.barrier();
        info!(seconds = clock.elapsed().as_secs_f64(); "sink tensors generated");

        // InitContractSchedule.
        let disps: Vec<Vec<i32>> = p
            .displacements
            .iter()
            .map(|d| normalize_displacement(d))
            .collect();
        let genprop_elems = GenPropValue::num_elems(c.num_vecs);
        let mut genprop_mem: Vec<Vec<Complex64>> = if sched.is_primary() {
            vec![vec![Complex64::new(0.0, 0.0); genprop_elems]; c.ts_per_node]
        } else {
            Vec::new()
        };

        // ContractLoop.
        let mut records_stored = 0usize;
        for pair in &p.sink_source_pairs {
            let t_source = pair.t_source;
            info!(t_source; "start insertions for source");
            let sw = Instant::now();

            for disp in &disps {
                for mom in &p.moms {
                    let clock = Instant::now();
                    if sched.is_primary() {
                        engine.generate_source_tensors(t_source, mom, disp);
                    }
                    comm.barrier();
                    info!(
                        disp:serde,
                        mom:serde,
                        seconds = clock.elapsed().as_secs_f64();
                        "source tensors generated"
                    );

                    for &t_sink in &pair.t_sinks {
                        info!(t_sink; "contracting sink time");
                        for g in 0..NS * NS {
                            if sched.is_primary() {
                                engine.generate_genprops(t_sink, g, &mut genprop_mem);
                            }
                            comm.barrier();

                            // Gather each forward timeslice's tensor to
                            // rank 0; remote tensors move point-to-point.
                            let mut vals: Vec<Option<GenPropValue>> =
                                (0..c.nt_forward).map(|_| None).collect();
                            for (tcorr, val) in vals.iter_mut().enumerate() {
                                let owner = sched.owner_rank(tcorr);
                                if owner != 0 {
                                    if comm.rank() == owner {
                                        let slot = sched.local_slot(tcorr);
                                        let mut flat = vec![0.0; 2 * genprop_elems];
                                        pack_complex(&genprop_mem[slot], &mut flat);
                                        comm.send_f64(0, &flat);
                                    }
                                    if comm.rank() == 0 {
                                        let mut flat = vec![0.0; 2 * genprop_elems];
                                        comm.recv_f64_into(owner, &mut flat);
                                        let mut data =
                                            vec![Complex64::new(0.0, 0.0); genprop_elems];
                                        unpack_complex(&flat, &mut data);
                                        *val = Some(GenPropValue::from_flat(c.num_vecs, data));
                                    }
                                } else if comm.rank() == 0 {
                                    let slot = sched.local_slot(tcorr);
                                    *val = Some(GenPropValue::from_flat(
                                        c.num_vecs,
                                        genprop_mem[slot].clone(),
                                    ));
                                }
                            }
                            comm.barrier();

                            // Commit. The store decision is made on rank 0
                            // and broadcast so every rank's control flow
                            // stays aligned.
                            for (tcorr, val) in vals.into_iter().enumerate() {
                                let t_slice = sched.t_slice(tcorr);
                                let store =
                                    broadcast_serializing(comm, 0, in_store_range(lt, c, t_slice));
                                if store {
                                    if let Some(db) = db.as_mut() {
                                        let key = GenPropKey {
                                            t_sink,
                                            t_slice,
                                            t_source,
                                            gamma: g as i32,
                                            displacement: disp.clone(),
                                            mom: *mom,
                                            mass: c.mass_label.clone(),
                                        };
                                        let val = val.as_ref().expect("gathered tensor");
                                        if let Err(e) = db.insert(&key, val) {
                                            fatal(comm, &format!("store insert failed: {e}"));
                                        }
                                        records_stored += 1;
                                    }
                                }
                            }
                        } // g
                    } // t_sink
                } // mom
            } // disp

            info!(
                t_source,
                seconds = sw.elapsed().as_secs_f64();
                "source insertions generated"
            );
        }

        // Drain and close.
        if let Some(db) = db.take() {
            info!(records_stored; "closing distillation store");
            if let Err(e) = db.close() {
                fatal(comm, &format!("store close failed: {e}"));
            }
        }
        report.write("records_stored", &records_stored);
        report.write("total_seconds", &total.elapsed().as_secs_f64());
        report.pop(); // UnsmearedHadronNode

        if sched.is_primary() {
            engine.done();
        }
        comm.barrier();
        info!(seconds = total.elapsed().as_secs_f64(); "ran successfully");
    }
}
