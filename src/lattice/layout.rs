use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::ND;

/// Global lattice geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lattice {
    pub extent: [usize; ND],
    /// The decay (time) direction.
    pub decay_dir: usize,
}

impl Lattice {
    /// Extent along the decay direction.
    pub fn lt(&self) -> usize {
        self.extent[self.decay_dir]
    }

    /// Number of sites in one timeslice.
    pub fn spatial_volume(&self) -> usize {
        self.extent
            .iter()
            .enumerate()
            .filter(|&(d, _)| d != self.decay_dir)
            .map(|(_, &l)| l)
            .product()
    }

    /// Total number of sites.
    pub fn volume(&self) -> usize {
        self.extent.iter().product()
    }

    /// Wraps a (possibly negative) time coordinate onto `0..Lt`.
    pub fn wrap_t(&self, t: i64) -> i32 {
        let lt = self.lt() as i64;
        (((t % lt) + lt) % lt) as i32
    }
}

/// The distribution of timeslices over ranks: contiguous blocks of
/// `Lt / size` slices per rank. Pure rank arithmetic, no communication.
#[derive(Clone, Copy, Debug)]
pub struct Layout {
    pub lattice: Lattice,
    pub rank: usize,
    pub size: usize,
}

impl Layout {
    pub fn new(lattice: Lattice, rank: usize, size: usize) -> Result<Self> {
        if size == 0 || lattice.lt() % size != 0 {
            return Err(Error::Config(format!(
                "lattice time extent {} not divisible into {} ranks",
                lattice.lt(),
                size
            )));
        }
        Ok(Self {
            lattice,
            rank,
            size,
        })
    }

    /// Timeslices held by each rank.
    pub fn ts_per_rank(&self) -> usize {
        self.lattice.lt() / self.size
    }

    /// The rank holding global timeslice `t`.
    pub fn t_owner(&self, t: usize) -> usize {
        debug_assert!(t < self.lattice.lt());
        t / self.ts_per_rank()
    }

    /// The global timeslices local to this rank.
    pub fn local_t_range(&self) -> std::ops::Range<usize> {
        let block = self.ts_per_rank();
        self.rank * block..(self.rank + 1) * block
    }

    pub fn is_local(&self, t: usize) -> bool {
        self.local_t_range().contains(&t)
    }
}
