use std::collections::BTreeMap;

use td_core::{Error, Result};
use td_hist::{DistortionMap, ResidualHistogram};

use super::Persistence;
use crate::records::{Record, Schema};

/// In-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: BTreeMap<Schema, Vec<Record>>,
    histograms: BTreeMap<String, ResidualHistogram>,
    maps: BTreeMap<String, DistortionMap>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records of `schema`.
    pub fn record_count(&self, schema: Schema) -> usize {
        self.records.get(&schema).map_or(0, Vec::len)
    }

    /// Names of the stored accumulators.
    pub fn histogram_names(&self) -> impl Iterator<Item = &str> {
        self.histograms.keys().map(String::as_str)
    }
}

impl Persistence for MemoryStore {
    fn append_records(&mut self, records: &[Record]) -> Result<()> {
        for record in records {
            self.records.entry(record.schema()).or_default().push(record.clone());
        }
        Ok(())
    }

    fn read_records(&self, schema: Schema) -> Result<Vec<Record>> {
        Ok(self.records.get(&schema).cloned().unwrap_or_default())
    }

    fn write_histogram(&mut self, histogram: &ResidualHistogram) -> Result<()> {
        self.histograms.insert(histogram.name().to_string(), histogram.clone());
        Ok(())
    }

    fn read_histogram(&self, name: &str) -> Result<ResidualHistogram> {
        self.histograms
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("histogram '{name}'")))
    }

    fn write_map(&mut self, map: &DistortionMap) -> Result<()> {
        self.maps.insert(map.name.clone(), map.clone());
        Ok(())
    }

    fn read_map(&self, name: &str) -> Result<DistortionMap> {
        self.maps.get(name).cloned().ok_or_else(|| Error::NotFound(format!("map '{name}'")))
    }
}
