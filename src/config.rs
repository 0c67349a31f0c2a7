use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::solver::SolverParams;
use crate::types::{Displacement, Momentum, ND};

/// Top-level measurement parameters, read from a JSON parameter file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Params {
    /// Global lattice extent.
    pub lattice: [usize; ND],
    pub named_object: NamedObjectParams,
    /// How the gauge field placed under `gauge_id` is produced.
    pub gauge_start: GaugeStart,
    /// Fermion action and solver configuration.
    pub propagator: SolverParams,
    /// Source times for which solution vectors are generated.
    pub prop_sources: Vec<i32>,
    pub contractions: ContractParams,
    /// Displacements to apply at the insertion. The list must be non-empty;
    /// an individual entry may be the empty no-displacement marker.
    pub displacements: Vec<Displacement>,
    /// Momenta to project onto at the insertion.
    pub moms: Vec<Momentum>,
    /// For each source time, the sink times to contract against.
    pub sink_source_pairs: Vec<SinkSourcePair>,
    pub link_smearing: SmearingParams,
    /// Optional Hutchinson trace-estimator run after the main measurement.
    #[serde(default)]
    pub trace: Option<TraceParams>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamedObjectParams {
    /// Registry id of the gauge field.
    pub gauge_id: String,
    /// Files holding the distillation color-vector basis. Empty means a
    /// seeded synthetic basis.
    #[serde(default)]
    pub colorvec_files: Vec<String>,
    /// Output store for the generalized-propagator tensors.
    pub dist_op_file: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GaugeStart {
    /// Unit links on every site.
    Unit,
    /// Seeded random start near unit links.
    Disordered { seed: u64 },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContractParams {
    pub num_vecs: usize,
    pub t_start: i32,
    #[serde(rename = "Nt_forward")]
    pub nt_forward: usize,
    pub decay_dir: usize,
    pub displacement_length: i32,
    pub mass_label: String,
    pub num_tries: i32,
    /// First stored timeslice; defaults to `t_start`.
    #[serde(default)]
    pub t_start_store: Option<i32>,
    /// Number of stored timeslices; defaults to `Nt_forward`.
    #[serde(default, rename = "Nt_forward_store")]
    pub nt_forward_store: Option<usize>,
    /// Timeslices handled by each node group.
    pub ts_per_node: usize,
    /// Processes per node group; rank 0 of each group is the primary.
    pub nodes_per_cn: usize,
}

impl ContractParams {
    pub fn store_t_start(&self) -> i32 {
        self.t_start_store.unwrap_or(self.t_start)
    }

    pub fn store_nt_forward(&self) -> usize {
        self.nt_forward_store.unwrap_or(self.nt_forward)
    }

    /// Retry bound for the inversions; a configured value <= 0 means one try.
    pub fn retry_bound(&self) -> usize {
        if self.num_tries <= 0 {
            1
        } else {
            self.num_tries as usize
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SinkSourcePair {
    pub t_source: i32,
    pub t_sinks: Vec<i32>,
}

/// Link-smearing descriptor group. The parameter payload stays opaque here
/// and is interpreted by the smearing factory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SmearingParams {
    pub id: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceParams {
    pub num_samples: usize,
    pub seed: u64,
}

impl Params {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&text).map_err(|e| {
            Error::Config(format!(
                "failed to parse {}: {e}",
                path.as_ref().display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "lattice": [4, 4, 4, 8],
            "named_object": {
                "gauge_id": "default_gauge_field",
                "dist_op_file": "genprop.sdb"
            },
            "gauge_start": { "kind": "unit" },
            "propagator": { "fermact": "diagonal", "mass": 0.1 },
            "prop_sources": [0, 4],
            "contractions": {
                "num_vecs": 2,
                "t_start": 0,
                "Nt_forward": 4,
                "decay_dir": 3,
                "displacement_length": 1,
                "mass_label": "U-0.1",
                "num_tries": -1,
                "ts_per_node": 2,
                "nodes_per_cn": 1
            },
            "displacements": [[0], [1, 2]],
            "moms": [[0, 0, 0]],
            "sink_source_pairs": [{ "t_source": 0, "t_sinks": [2] }],
            "link_smearing": { "id": "none" }
        }"#
    }

    #[test]
    fn test_parse_sample() {
        let params: Params = serde_json::from_str(sample_json()).unwrap();
        assert_eq!(params.lattice, [4, 4, 4, 8]);
        assert_eq!(params.contractions.num_vecs, 2);
        assert_eq!(params.moms, vec![[0, 0, 0]]);
        assert_eq!(params.displacements, vec![vec![0], vec![1, 2]]);
        assert!(params.trace.is_none());
    }

    #[test]
    fn test_store_range_defaults_to_compute_range() {
        let params: Params = serde_json::from_str(sample_json()).unwrap();
        let c = &params.contractions;
        assert_eq!(c.store_t_start(), c.t_start);
        assert_eq!(c.store_nt_forward(), c.nt_forward);
    }

    #[test]
    fn test_retry_bound_floor() {
        let params: Params = serde_json::from_str(sample_json()).unwrap();
        assert_eq!(params.contractions.retry_bound(), 1);
        let mut c = params.contractions.clone();
        c.num_tries = 3;
        assert_eq!(c.retry_bound(), 3);
    }
}
