use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Complex64, Displacement, Momentum, NS};

/// Key of one generalized-propagator elemental operator. Two records match
/// only on exact equality of every field; key uniqueness within a run is
/// the store's primary invariant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenPropKey {
    /// Sink time slice.
    pub t_sink: i32,
    /// Propagator time slice.
    pub t_slice: i32,
    /// Source time slice.
    pub t_source: i32,
    /// Spin-structure index, 0..16.
    pub gamma: i32,
    /// Displacement dirs of the right color vector; empty means none.
    pub displacement: Displacement,
    /// Insertion momentum.
    pub mom: Momentum,
    /// Mass label.
    pub mass: String,
}

impl fmt::Display for GenPropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GenProp4: t_sink= {} t_slice= {} t_source= {} g= {} displacement= {:?} mom= {:?} mass= {}",
            self.t_sink, self.t_slice, self.t_source, self.gamma, self.displacement, self.mom, self.mass
        )
    }
}

/// The 4-index tensor of one elemental operator, flat in
/// (num_vecs, num_vecs, Ns, Ns) with the last index fastest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenPropValue {
    num_vecs: usize,
    data: Vec<Complex64>,
}

impl GenPropValue {
    pub fn num_elems(num_vecs: usize) -> usize {
        num_vecs * num_vecs * NS * NS
    }

    pub fn zeros(num_vecs: usize) -> Self {
        Self {
            num_vecs,
            data: vec![Complex64::new(0.0, 0.0); Self::num_elems(num_vecs)],
        }
    }

    pub fn from_flat(num_vecs: usize, data: Vec<Complex64>) -> Self {
        assert_eq!(data.len(), Self::num_elems(num_vecs));
        Self { num_vecs, data }
    }

    pub fn num_vecs(&self) -> usize {
        self.num_vecs
    }

    pub fn data(&self) -> &[Complex64] {
        &self.data
    }

    pub fn at(&self, v1: usize, v2: usize, s1: usize, s2: usize) -> Complex64 {
        self.data[((v1 * self.num_vecs + v2) * NS + s1) * NS + s2]
    }
}
