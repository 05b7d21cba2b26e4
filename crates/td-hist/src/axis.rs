//! Uniformly binned axes.

use serde::{Deserialize, Serialize};
use td_core::{Error, Result};

/// Uniform binning of `[low, high)` into `n_bins` bins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    /// Number of bins.
    pub n_bins: usize,
    /// Lower edge of the first bin (inclusive).
    pub low: f64,
    /// Upper edge of the last bin (exclusive).
    pub high: f64,
}

impl Axis {
    /// Create an axis, rejecting empty or degenerate ranges.
    pub fn new(n_bins: usize, low: f64, high: f64) -> Result<Self> {
        let axis = Self { n_bins, low, high };
        axis.validate()?;
        Ok(axis)
    }

    /// Check the binning is usable.
    pub fn validate(&self) -> Result<()> {
        if self.n_bins == 0 {
            return Err(Error::Validation("axis needs at least one bin".into()));
        }
        if !(self.low.is_finite() && self.high.is_finite() && self.low < self.high) {
            return Err(Error::Validation(format!(
                "invalid axis range [{}, {})",
                self.low, self.high
            )));
        }
        Ok(())
    }

    /// Bin width.
    pub fn bin_width(&self) -> f64 {
        (self.high - self.low) / self.n_bins as f64
    }

    /// Lower edge of bin `i`; `i == n_bins` gives the upper edge of the axis.
    pub fn lower_edge(&self, i: usize) -> f64 {
        if i >= self.n_bins {
            return self.high;
        }
        self.low + i as f64 * self.bin_width()
    }

    /// Centre of bin `i`.
    pub fn bin_center(&self, i: usize) -> f64 {
        self.low + (i as f64 + 0.5) * self.bin_width()
    }

    /// Bin containing `v`, or `None` outside `[low, high)` (NaN included).
    ///
    /// A value equal to [`Axis::lower_edge`] of a bin belongs to that bin.
    pub fn find_bin(&self, v: f64) -> Option<usize> {
        if !(v >= self.low && v < self.high) {
            return None;
        }
        let guess = ((v - self.low) / self.bin_width()).floor() as usize;
        let mut i = guess.min(self.n_bins - 1);
        // The division can land one bin off near an edge.
        if v < self.lower_edge(i) {
            i = i.saturating_sub(1);
        } else if i + 1 < self.n_bins && v >= self.lower_edge(i + 1) {
            i += 1;
        }
        Some(i)
    }
}
