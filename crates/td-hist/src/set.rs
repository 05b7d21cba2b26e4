//! The accumulator set of one processing pass.

use std::collections::BTreeMap;

use td_core::{Error, Result};

use crate::accumulator::{ResidualHistogram, ResidualSample};
use crate::config::{HistogramKind, HistogramSetConfig};

/// Up to six residual accumulators keyed by [`HistogramKind`].
/// Persisted per accumulator through [`HistogramSet::iter`] and
/// [`HistogramSet::from_histograms`].
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSet {
    histograms: BTreeMap<HistogramKind, ResidualHistogram>,
}

impl HistogramSet {
    /// Empty accumulators for every kind enabled in `config`.
    pub fn new(config: &HistogramSetConfig) -> Result<Self> {
        config.validate()?;
        let mut histograms = BTreeMap::new();
        for &kind in &config.enabled {
            histograms.insert(kind, ResidualHistogram::new(kind.name(), config.axes_for(kind))?);
        }
        Ok(Self { histograms })
    }

    /// Set built from already accumulated histograms.
    pub fn from_histograms(histograms: impl IntoIterator<Item = ResidualHistogram>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for h in histograms {
            h.validate()?;
            let kind = HistogramKind::from_name(h.name())
                .ok_or_else(|| Error::Validation(format!("unknown accumulator '{}'", h.name())))?;
            map.insert(kind, h);
        }
        Ok(Self { histograms: map })
    }

    /// Fill accumulator `kind`; returns `false` when it is disabled or the sample is out of range.
    pub fn fill(&mut self, kind: HistogramKind, sample: &ResidualSample) -> bool {
        self.histograms.get_mut(&kind).is_some_and(|h| h.fill_sample(sample))
    }

    /// Accumulator `kind`, if enabled.
    pub fn get(&self, kind: HistogramKind) -> Option<&ResidualHistogram> {
        self.histograms.get(&kind)
    }

    /// Whether accumulator `kind` exists.
    pub fn contains(&self, kind: HistogramKind) -> bool {
        self.histograms.contains_key(&kind)
    }

    /// Enabled kinds in canonical order.
    pub fn kinds(&self) -> impl Iterator<Item = HistogramKind> + '_ {
        self.histograms.keys().copied()
    }

    /// Accumulators in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (HistogramKind, &ResidualHistogram)> {
        self.histograms.iter().map(|(k, h)| (*k, h))
    }

    /// Total accepted fills over all accumulators.
    pub fn total_entries(&self) -> u64 {
        self.histograms.values().map(ResidualHistogram::entries).sum()
    }

    /// Add `other` bin by bin. Kinds missing here are adopted.
    pub fn merge(&mut self, other: &HistogramSet) -> Result<()> {
        for (kind, h) in &other.histograms {
            match self.histograms.get_mut(kind) {
                Some(mine) => mine.merge(h)?,
                None => {
                    self.histograms.insert(*kind, h.clone());
                }
            }
        }
        Ok(())
    }

    /// Consume the set.
    pub fn into_histograms(self) -> impl Iterator<Item = (HistogramKind, ResidualHistogram)> {
        self.histograms.into_iter()
    }
}
