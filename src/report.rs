use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Structured diagnostic sink: nested sections accumulated into one JSON
/// tree, written by rank 0 at the end of a run. Purely observational; the
/// algorithmic contract never depends on it.
#[derive(Default)]
pub struct Report {
    root: Map<String, Value>,
    stack: Vec<(String, Map<String, Value>)>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a nested section; must be balanced by `pop`.
    pub fn push(&mut self, name: &str) {
        self.stack.push((name.to_string(), Map::new()));
    }

    /// Closes the innermost open section.
    pub fn pop(&mut self) {
        let (name, map) = self.stack.pop().expect("pop without open section");
        match self.stack.last_mut() {
            Some((_, parent)) => parent.insert(name, Value::Object(map)),
            None => self.root.insert(name, Value::Object(map)),
        };
    }

    /// Writes one entry into the innermost open section (or the root).
    pub fn write<T: Serialize>(&mut self, key: &str, value: &T) {
        let value = serde_json::to_value(value).expect("unserializable report entry");
        match self.stack.last_mut() {
            Some((_, map)) => map.insert(key.to_string(), value),
            None => self.root.insert(key.to_string(), value),
        };
    }

    pub fn to_value(&self) -> Value {
        assert!(self.stack.is_empty(), "unbalanced report sections");
        Value::Object(self.root.clone())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &self.to_value())
            .map_err(|e| Error::Store(format!("cannot write report: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_sections() {
        let mut report = Report::new();
        report.push("UnsmearedHadronNode");
        report.write("update_no", &1u64);
        report.push("Observables");
        report.write("w_plaq", &0.5f64);
        report.pop();
        report.pop();
        let value = report.to_value();
        assert_eq!(value["UnsmearedHadronNode"]["update_no"], 1);
        assert_eq!(value["UnsmearedHadronNode"]["Observables"]["w_plaq"], 0.5);
    }

    #[test]
    #[should_panic(expected = "unbalanced")]
    fn test_unbalanced_sections_panic() {
        let mut report = Report::new();
        report.push("open");
        let _ = report.to_value();
    }
}
