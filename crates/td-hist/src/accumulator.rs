//! Five-dimensional sparse residual histogram.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use td_core::{Error, Result};

use crate::axis::Axis;

/// Number of histogram dimensions.
pub const N_DIM: usize = 5;

/// Names of the five axes, in storage order.
pub const AXIS_NAMES: [&str; N_DIM] = ["qpt", "sector", "R", "kZ", "delta"];

/// Index of the residual axis.
pub const RESIDUAL_AXIS: usize = 4;

/// One residual datum: the coordinates of a fill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResidualSample {
    /// Charge over transverse momentum (c/GeV).
    pub curvature: f64,
    /// Azimuthal sector coordinate in `[0, 18)`.
    pub sector: f64,
    /// Radius in the sector frame (cm).
    pub radius: f64,
    /// Dip proxy `z / r`.
    pub dip: f64,
    /// Residual (cm).
    pub residual: f64,
}

impl ResidualSample {
    /// Coordinates in axis order.
    pub fn coords(&self) -> [f64; N_DIM] {
        [self.curvature, self.sector, self.radius, self.dip, self.residual]
    }
}

/// Additive 5-D counter with fixed binning.
///
/// Only filled bins are stored; the key is the row-major linear bin index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualHistogram {
    name: String,
    axes: [Axis; N_DIM],
    bins: BTreeMap<u64, u64>,
    entries: u64,
    dropped: u64,
}

impl ResidualHistogram {
    /// Empty histogram named `name`.
    pub fn new(name: impl Into<String>, axes: [Axis; N_DIM]) -> Result<Self> {
        bin_count(&axes)?;
        Ok(Self { name: name.into(), axes, bins: BTreeMap::new(), entries: 0, dropped: 0 })
    }

    /// Check binning and contents, e.g. of a deserialized histogram.
    pub fn validate(&self) -> Result<()> {
        let total = bin_count(&self.axes)
            .map_err(|e| Error::Validation(format!("histogram '{}': {e}", self.name)))?;
        if let Some((&lin, _)) = self.bins.last_key_value()
            && lin >= total
        {
            return Err(Error::Validation(format!(
                "histogram '{}': bin {lin} beyond {total} bins",
                self.name
            )));
        }
        let counted: u64 = self.bins.values().sum();
        if counted != self.entries {
            return Err(Error::Validation(format!(
                "histogram '{}': {counted} binned counts but {} entries",
                self.name, self.entries
            )));
        }
        Ok(())
    }

    /// Histogram name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Axes in storage order.
    pub fn axes(&self) -> &[Axis; N_DIM] {
        &self.axes
    }

    /// Number of accepted fills.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Number of fills dropped because a coordinate was out of range.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Number of non-empty bins.
    pub fn filled_bins(&self) -> usize {
        self.bins.len()
    }

    /// No accepted fills.
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Bin indices of a point, `None` if any coordinate is out of range.
    pub fn find_bins(&self, coords: &[f64; N_DIM]) -> Option<[usize; N_DIM]> {
        let mut idx = [0usize; N_DIM];
        for (d, axis) in self.axes.iter().enumerate() {
            idx[d] = axis.find_bin(coords[d])?;
        }
        Some(idx)
    }

    fn linear(&self, idx: &[usize; N_DIM]) -> u64 {
        idx.iter()
            .zip(&self.axes)
            .fold(0u64, |acc, (&i, a)| acc * a.n_bins as u64 + i as u64)
    }

    fn unravel(&self, mut lin: u64) -> [usize; N_DIM] {
        let mut idx = [0usize; N_DIM];
        for d in (0..N_DIM).rev() {
            let n = self.axes[d].n_bins as u64;
            idx[d] = (lin % n) as usize;
            lin /= n;
        }
        idx
    }

    /// Add one count at `coords`. Out-of-range points are dropped; returns whether the fill was accepted.
    pub fn fill(&mut self, coords: &[f64; N_DIM]) -> bool {
        match self.find_bins(coords) {
            Some(idx) => {
                let lin = self.linear(&idx);
                *self.bins.entry(lin).or_insert(0) += 1;
                self.entries += 1;
                true
            }
            None => {
                self.dropped += 1;
                false
            }
        }
    }

    /// Fill with a residual sample.
    pub fn fill_sample(&mut self, sample: &ResidualSample) -> bool {
        self.fill(&sample.coords())
    }

    /// Content of the bin at `idx`.
    pub fn bin_content(&self, idx: &[usize; N_DIM]) -> u64 {
        if idx.iter().zip(&self.axes).any(|(&i, a)| i >= a.n_bins) {
            return 0;
        }
        self.bins.get(&self.linear(idx)).copied().unwrap_or(0)
    }

    /// Non-empty bins with their counts, in linear-index order.
    pub fn iter(&self) -> impl Iterator<Item = ([usize; N_DIM], u64)> + '_ {
        self.bins.iter().map(|(&lin, &n)| (self.unravel(lin), n))
    }

    /// Add the contents of `other` bin by bin.
    ///
    /// Both histograms must share the same binning.
    pub fn merge(&mut self, other: &ResidualHistogram) -> Result<()> {
        if self.axes != other.axes {
            return Err(Error::Validation(format!(
                "cannot merge '{}' into '{}': binning differs",
                other.name, self.name
            )));
        }
        for (&lin, &n) in &other.bins {
            *self.bins.entry(lin).or_insert(0) += n;
        }
        self.entries += other.entries;
        self.dropped += other.dropped;
        Ok(())
    }
}

fn bin_count(axes: &[Axis; N_DIM]) -> Result<u64> {
    for axis in axes {
        axis.validate()?;
    }
    axes.iter()
        .try_fold(1u64, |acc, a| acc.checked_mul(a.n_bins as u64))
        .ok_or_else(|| Error::Validation("histogram bin count overflows u64".into()))
}
