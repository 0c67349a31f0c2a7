use clap::Parser;
use flexi_logger::{detailed_format, Duplicate, FileSpec, Logger, LoggerHandle};
use log::info;

use distillation::comm::{broadcast_serializing, consensus_ok, fatal, Communicator};
use distillation::config::{GaugeStart, Params};
use distillation::engine::naive::NaiveEngine;
use distillation::lattice::colorvec::MemoryVectorStore;
use distillation::lattice::field::{disordered_gauge, unit_gauge};
use distillation::lattice::layout::{Lattice, Layout};
use distillation::lattice::registry::NamedObjectMap;
use distillation::pipeline::HadronNodePipeline;
use distillation::report::Report;
use distillation::solver::create_solver;
use distillation::trace::hutchinson_trace;

#[derive(Debug, Parser)]
#[command(version, about = "Unsmeared hadron nodes via distillation", long_about = None)]
struct Cli {
    /// Measurement parameter file (JSON).
    config: String,
    /// Where rank 0 writes the structured run report.
    #[arg(short, long)]
    report: Option<String>,
    /// Ranks to run as threads of this process (ignored under MPI).
    #[arg(long, default_value_t = 1)]
    ranks: usize,
}

/// One log file per rank, duplicated to stdout at info level. The returned
/// handle must stay alive for the duration of the run.
fn setup_logging(rank: usize) -> LoggerHandle {
    Logger::try_with_env_or_str("info")
        .unwrap()
        .format(detailed_format)
        .log_to_file(
            FileSpec::default()
                .discriminant(format!("rank{rank}"))
                .suppress_timestamp(),
        )
        .duplicate_to_stdout(if rank == 0 {
            Duplicate::Info
        } else {
            Duplicate::Error
        })
        .start()
        .unwrap()
}

fn run_rank<C: Communicator>(comm: &C, args: &Cli) {
    // Rank 0 reads the parameter file; everyone gets the same copy.
    let loaded = if comm.rank() == 0 {
        Some(Params::from_file(&args.config))
    } else {
        None
    };
    let ok = loaded.as_ref().map_or(true, |r| r.is_ok());
    if !consensus_ok(comm, ok) {
        let msg = match &loaded {
            Some(Err(e)) => format!("cannot read parameter file: {e}"),
            _ => "parameter file rejected on rank 0".to_string(),
        };
        fatal(comm, &msg);
    }
    let params = broadcast_serializing(comm, 0, loaded.map(|r| r.unwrap()))
        .expect("parameter broadcast");

    info!(rank = comm.rank(), size = comm.size(); "parameters distributed");

    let lattice = Lattice {
        extent: params.lattice,
        decay_dir: params.contractions.decay_dir,
    };
    let layout = match Layout::new(lattice, comm.rank(), comm.size()) {
        Ok(layout) => layout,
        Err(e) => fatal(comm, &e.to_string()),
    };

    // Place the gauge field in the registry under its configured id.
    let mut registry = NamedObjectMap::default();
    let gauge = match params.gauge_start {
        GaugeStart::Unit => unit_gauge(layout),
        GaugeStart::Disordered { seed } => disordered_gauge(layout, seed),
    };
    let provenance = serde_json::to_string(&params.gauge_start).unwrap();
    registry.insert(&params.named_object.gauge_id, gauge, provenance);

    // Color-vector basis: from files when given, else a seeded synthetic
    // basis.
    let sources = if params.named_object.colorvec_files.is_empty() {
        info!("no colorvec files configured, using a seeded synthetic basis");
        MemoryVectorStore::seeded(layout, params.contractions.num_vecs, 0)
    } else {
        match MemoryVectorStore::load(layout, &params.named_object.colorvec_files) {
            Ok(store) => store,
            Err(e) => fatal(comm, &format!("cannot load colorvec files: {e}")),
        }
    };

    let mut engine = NaiveEngine::new();
    let mut report = Report::new();
    let pipeline = HadronNodePipeline::new(params.clone());
    pipeline.run(comm, &registry, &sources, &mut engine, &mut report);

    if let Some(trace_params) = &params.trace {
        let gauge = registry
            .get::<Vec<distillation::lattice::field::Field>>(&params.named_object.gauge_id)
            .expect("gauge field vanished from the registry");
        let solver = match create_solver(&params.propagator, gauge) {
            Ok(solver) => solver,
            Err(e) => fatal(comm, &e.to_string()),
        };
        let estimate = hutchinson_trace(comm, layout, solver.as_ref(), trace_params);
        info!(
            mean_re = estimate.mean.re,
            variance_re = estimate.variance.re;
            "hutchinson trace estimate"
        );
        report.push("HutchinsonTrace");
        report.write("estimate", &estimate);
        report.pop();
    }

    if comm.rank() == 0 {
        if let Some(path) = &args.report {
            if let Err(e) = report.save(path) {
                fatal(comm, &format!("cannot write report: {e}"));
            }
        }
    }
}

#[cfg(feature = "mpi")]
fn main() {
    let args = Cli::parse();
    let comm = distillation::comm::mpi::MpiComm::new();
    let _logger = setup_logging(comm.rank());
    run_rank(&comm, &args);
}

#[cfg(not(feature = "mpi"))]
fn main() {
    let args = Cli::parse();
    let _logger = setup_logging(0);
    let comms = distillation::comm::local::LocalUniverse::new(args.ranks);
    std::thread::scope(|s| {
        for comm in comms {
            let args = &args;
            s.spawn(move || run_rank(&comm, args));
        }
    });
}
