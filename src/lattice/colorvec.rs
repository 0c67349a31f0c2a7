use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::lattice::field::{Field, COLORVEC_ELEMS};
use crate::lattice::layout::Layout;
use crate::types::Complex64;

/// Keyed store of distillation color vectors: (timeslice, color-vector
/// index) maps to the color-vector data of that timeslice. Read-only for
/// the pipeline.
pub trait VectorSourceStore {
    /// A full-lattice color-vector field that is zero everywhere except on
    /// `t_slice`, where it carries the stored vector.
    fn get(&self, t_slice: i32, colorvec: usize) -> Result<Field>;
}

/// In-memory store holding the global timeslice data for every key. Every
/// rank holds the same map, so lookups stay communication-free.
pub struct MemoryVectorStore {
    layout: Layout,
    map: FxHashMap<(i32, usize), Vec<Complex64>>,
}

impl MemoryVectorStore {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            map: FxHashMap::default(),
        }
    }

    pub fn insert(&mut self, t_slice: i32, colorvec: usize, data: Vec<Complex64>) {
        assert_eq!(
            data.len(),
            self.layout.lattice.spatial_volume() * COLORVEC_ELEMS
        );
        self.map.insert((t_slice, colorvec), data);
    }

    /// A synthetic basis of `num_vecs` vectors on every timeslice, seeded
    /// per (timeslice, vector) so the data is rank-count independent.
    pub fn seeded(layout: Layout, num_vecs: usize, seed: u64) -> Self {
        let lt = layout.lattice.lt();
        let len = layout.lattice.spatial_volume() * COLORVEC_ELEMS;
        let mut store = Self::new(layout);
        for t in 0..lt {
            for v in 0..num_vecs {
                let mut rng = StdRng::seed_from_u64(seed ^ ((t * num_vecs + v) as u64 + 1));
                let data = (0..len)
                    .map(|_| Complex64::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
                    .collect();
                store.insert(t as i32, v, data);
            }
        }
        store
    }

    /// Writes the store as a bincode file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut entries: Vec<(&(i32, usize), &Vec<Complex64>)> = self.map.iter().collect();
        entries.sort_by_key(|(k, _)| **k);
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, &entries)?;
        Ok(())
    }

    /// Reads and merges one or more bincode files written by [`save`].
    ///
    /// [`save`]: MemoryVectorStore::save
    pub fn load<P: AsRef<Path>>(layout: Layout, paths: &[P]) -> Result<Self> {
        let mut store = Self::new(layout);
        for path in paths {
            let reader = BufReader::new(File::open(path)?);
            let entries: Vec<((i32, usize), Vec<Complex64>)> = bincode::deserialize_from(reader)?;
            for ((t, v), data) in entries {
                store.insert(t, v, data);
            }
        }
        Ok(store)
    }
}

impl VectorSourceStore for MemoryVectorStore {
    fn get(&self, t_slice: i32, colorvec: usize) -> Result<Field> {
        let data = self
            .map
            .get(&(t_slice, colorvec))
            .ok_or(Error::SourceLookup { t_slice, colorvec })?;
        let mut field = Field::zeros(self.layout, COLORVEC_ELEMS);
        if t_slice >= 0 && self.layout.is_local(t_slice as usize) {
            field
                .timeslice_mut(t_slice as usize)
                .unwrap()
                .copy_from_slice(data);
        }
        Ok(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::layout::Lattice;

    fn layout(rank: usize, size: usize) -> Layout {
        let lattice = Lattice {
            extent: [2, 2, 2, 4],
            decay_dir: 3,
        };
        Layout::new(lattice, rank, size).unwrap()
    }

    #[test]
    fn test_get_populates_only_owned_slice() {
        let store = MemoryVectorStore::seeded(layout(0, 2), 2, 11);
        // Rank 0 owns timeslices 0..2; timeslice 3 is remote.
        let local = store.get(1, 0).unwrap();
        assert!(local.timeslice(1).unwrap().iter().any(|z| z.re != 0.0));
        assert!(local.timeslice(0).unwrap().iter().all(|z| z.re == 0.0));
        let remote = store.get(3, 1).unwrap();
        assert!(remote.local_data().iter().all(|z| z.re == 0.0));
    }

    #[test]
    fn test_missing_key() {
        let store = MemoryVectorStore::new(layout(0, 1));
        assert!(matches!(
            store.get(0, 0),
            Err(Error::SourceLookup { .. })
        ));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let store = MemoryVectorStore::seeded(layout(0, 1), 1, 3);
        let path = std::env::temp_dir().join(format!("colorvec-{}.bin", std::process::id()));
        store.save(&path).unwrap();
        let loaded = MemoryVectorStore::load(layout(0, 1), &[&path]).unwrap();
        std::fs::remove_file(&path).unwrap();
        let a = store.get(2, 0).unwrap();
        let b = loaded.get(2, 0).unwrap();
        assert_eq!(a.local_data(), b.local_data());
    }
}
