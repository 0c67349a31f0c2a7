use std::any::Any;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

struct Entry {
    data: Box<dyn Any + Send>,
    record_info: String,
}

/// String-keyed registry of named objects shared between measurements.
/// A missing id and a type mismatch are distinct errors, since they point at
/// different configuration mistakes.
#[derive(Default)]
pub struct NamedObjectMap {
    map: FxHashMap<String, Entry>,
}

impl NamedObjectMap {
    pub fn insert<T: Any + Send>(&mut self, id: &str, value: T, record_info: String) {
        self.map.insert(
            id.to_string(),
            Entry {
                data: Box::new(value),
                record_info,
            },
        );
    }

    pub fn get<T: Any>(&self, id: &str) -> Result<&T> {
        let entry = self
            .map
            .get(id)
            .ok_or_else(|| Error::ObjectLookup(id.to_string()))?;
        entry
            .data
            .downcast_ref::<T>()
            .ok_or_else(|| Error::ObjectCast(id.to_string()))
    }

    /// Provenance recorded when the object was inserted.
    pub fn record_info(&self, id: &str) -> Result<&str> {
        self.map
            .get(id)
            .map(|e| e.record_info.as_str())
            .ok_or_else(|| Error::ObjectLookup(id.to_string()))
    }
}
