//! Persistence of records, accumulators and maps.
//!
//! The calibration pass only talks to [`Persistence`]; [`MemoryStore`] keeps
//! everything in memory and [`JsonStore`] writes a directory of JSON files.

mod json;
mod memory;

pub use json::JsonStore;
pub use memory::MemoryStore;

use td_core::Result;
use td_hist::{DistortionMap, ResidualHistogram};

use crate::records::{Record, Schema};

/// Record-oriented store for one calibration pass.
pub trait Persistence {
    /// Append a batch of records, each to the relation of its schema.
    fn append_records(&mut self, records: &[Record]) -> Result<()>;

    /// Append one record.
    fn append_record(&mut self, record: &Record) -> Result<()> {
        self.append_records(std::slice::from_ref(record))
    }

    /// All records of `schema` in append order; empty if none were written.
    fn read_records(&self, schema: Schema) -> Result<Vec<Record>>;

    /// Store an accumulator under its name, replacing any previous one.
    fn write_histogram(&mut self, histogram: &ResidualHistogram) -> Result<()>;

    /// Accumulator stored under `name`; [`td_core::Error::NotFound`] if absent.
    fn read_histogram(&self, name: &str) -> Result<ResidualHistogram>;

    /// Store a map under its name, replacing any previous one.
    fn write_map(&mut self, map: &DistortionMap) -> Result<()>;

    /// Map stored under `name`; [`td_core::Error::NotFound`] if absent.
    fn read_map(&self, name: &str) -> Result<DistortionMap>;
}
