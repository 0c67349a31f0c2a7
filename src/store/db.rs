use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::key::{GenPropKey, GenPropValue};
use crate::types::ND;

const MAGIC: &[u8; 8] = b"GPROPDB\0";
const VERSION: u32 = 1;

/// File-level metadata written once at creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbMeta {
    pub id: String,
    pub lattice: [usize; ND],
    pub decay_dir: usize,
    /// Provenance of the gauge configuration the run used.
    pub config_info: String,
}

#[derive(Serialize, Deserialize)]
struct Record {
    key: GenPropKey,
    value: GenPropValue,
}

/// Binary keyed store of genprop tensors: a header followed by appended
/// bincode records. Reopening rebuilds the key index by a sequential scan.
///
/// Inserting an existing key appends a fresh record and repoints the index:
/// last write wins.
pub struct GenpropDb {
    file: File,
    meta: DbMeta,
    index: FxHashMap<GenPropKey, u64>,
    end: u64,
}

impl GenpropDb {
    pub fn exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists()
    }

    /// Creates a new store and writes the metadata header.
    pub fn create<P: AsRef<Path>>(path: P, meta: DbMeta) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path.as_ref())
            .map_err(|e| Error::Store(format!("cannot create {}: {e}", path.as_ref().display())))?;
        file.write_all(MAGIC)?;
        file.write_all(&VERSION.to_le_bytes())?;
        bincode::serialize_into(&mut file, &meta)?;
        let end = file.stream_position()?;
        Ok(Self {
            file,
            meta,
            index: FxHashMap::default(),
            end,
        })
    }

    /// Opens an existing store read-write, scanning the records to rebuild
    /// the key index.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map_err(|e| Error::Store(format!("cannot open {}: {e}", path.as_ref().display())))?;
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(&file);

        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::Store(format!(
                "{} is not a genprop store",
                path.as_ref().display()
            )));
        }
        let mut version = [0u8; 4];
        reader.read_exact(&mut version)?;
        let version = u32::from_le_bytes(version);
        if version != VERSION {
            return Err(Error::Store(format!("unsupported store version {version}")));
        }
        let meta: DbMeta = bincode::deserialize_from(&mut reader)?;

        let mut index = FxHashMap::default();
        loop {
            let pos = reader.stream_position()?;
            if pos >= len {
                break;
            }
            let record: Record = bincode::deserialize_from(&mut reader)?;
            index.insert(record.key, pos);
        }
        drop(reader);

        let mut file = file;
        file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file,
            meta,
            index,
            end: len,
        })
    }

    pub fn meta(&self) -> &DbMeta {
        &self.meta
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &GenPropKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &GenPropKey> {
        self.index.keys()
    }

    /// Appends one key/tensor record. Re-inserting a key overwrites the
    /// previous record in the index (last write wins).
    pub fn insert(&mut self, key: &GenPropKey, value: &GenPropValue) -> Result<()> {
        let pos = self.file.seek(SeekFrom::Start(self.end))?;
        bincode::serialize_into(
            &mut self.file,
            &Record {
                key: key.clone(),
                value: value.clone(),
            },
        )?;
        self.end = self.file.stream_position()?;
        if let Some(old) = self.index.insert(key.clone(), pos) {
            debug!(old_offset = old; "overwriting existing record for {key}");
        }
        Ok(())
    }

    /// Reads back the tensor stored under `key`, if any.
    pub fn get(&mut self, key: &GenPropKey) -> Result<Option<GenPropValue>> {
        let Some(&pos) = self.index.get(key) else {
            return Ok(None);
        };
        self.file.seek(SeekFrom::Start(pos))?;
        let record: Record = bincode::deserialize_from(&mut self.file)?;
        self.file.seek(SeekFrom::Start(self.end))?;
        Ok(Some(record.value))
    }

    /// Flushes and releases the file.
    pub fn close(mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}
