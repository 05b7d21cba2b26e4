use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use td_core::{Error, Result};
use td_hist::{DistortionMap, ResidualHistogram};

use super::Persistence;
use crate::records::{Record, Schema};

/// Directory-backed store.
///
/// Records go to `<schema>.jsonl` (one JSON document per line), accumulators
/// to `<name>.hist.json` and maps to `<name>.map.json`.
#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    /// Store rooted at `root`; the directory is created if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn records_path(&self, schema: Schema) -> PathBuf {
        self.root.join(format!("{}.jsonl", schema.name()))
    }

    fn object_path(&self, name: &str, suffix: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(Error::Validation(format!("invalid object name '{name}'")));
        }
        Ok(self.root.join(format!("{name}.{suffix}.json")))
    }

    fn read_object<T: serde::de::DeserializeOwned>(&self, name: &str, suffix: &str) -> Result<T> {
        let path = self.object_path(name, suffix)?;
        if !path.exists() {
            return Err(Error::NotFound(format!("{suffix} '{name}' in {}", self.root.display())));
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl Persistence for JsonStore {
    fn append_records(&mut self, records: &[Record]) -> Result<()> {
        for schema in Schema::ALL {
            let mut batch = records.iter().filter(|r| r.schema() == schema).peekable();
            if batch.peek().is_none() {
                continue;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.records_path(schema))?;
            let mut out = BufWriter::new(file);
            for record in batch {
                serde_json::to_writer(&mut out, record)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }
        Ok(())
    }

    fn read_records(&self, schema: Schema) -> Result<Vec<Record>> {
        let path = self.records_path(schema);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(std::fs::File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }

    fn write_histogram(&mut self, histogram: &ResidualHistogram) -> Result<()> {
        let path = self.object_path(histogram.name(), "hist")?;
        std::fs::write(path, serde_json::to_string(histogram)?)?;
        Ok(())
    }

    fn read_histogram(&self, name: &str) -> Result<ResidualHistogram> {
        let histogram: ResidualHistogram = self.read_object(name, "hist")?;
        histogram.validate()?;
        Ok(histogram)
    }

    fn write_map(&mut self, map: &DistortionMap) -> Result<()> {
        let path = self.object_path(&map.name, "map")?;
        std::fs::write(path, serde_json::to_string(map)?)?;
        Ok(())
    }

    fn read_map(&self, name: &str) -> Result<DistortionMap> {
        self.read_object(name, "map")
    }
}
