//! Driver-facing entry points: sequential and parallel calibration passes and
//! distortion-map building.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use td_core::{Error, EventInput, EventSource, Result};
use td_hist::{DistortionMap, DistortionMapBuilder, HistogramKind, HistogramSet};

use crate::engine::{EventOutput, InterpolationEngine};
use crate::store::Persistence;

/// Counters of one calibration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassStats {
    /// Events seen.
    pub events: u64,
    /// Events skipped as a whole.
    pub skipped_events: u64,
    /// Tracks emitted.
    pub tracks_accepted: u64,
    /// Tracks rejected.
    pub tracks_rejected: u64,
    /// Accepted accumulator fills.
    pub samples: u64,
}

impl PassStats {
    fn add(&mut self, out: &EventOutput) {
        self.events += 1;
        if out.is_skipped() {
            self.skipped_events += 1;
        }
        self.tracks_accepted += out.accepted as u64;
        self.tracks_rejected += out.rejected as u64;
        self.samples += out.samples as u64;
    }
}

/// Sequential calibration pass writing to a store.
///
/// Records are appended after every event; accumulators are written by
/// [`CalibrationPass::finish`].
#[derive(Debug)]
pub struct CalibrationPass<S: Persistence> {
    engine: InterpolationEngine,
    store: S,
    histograms: HistogramSet,
    stats: PassStats,
}

impl<S: Persistence> CalibrationPass<S> {
    /// Pass over `engine` persisting into `store`.
    pub fn new(engine: InterpolationEngine, store: S) -> Result<Self> {
        let histograms = engine.new_histogram_set()?;
        Ok(Self { engine, store, histograms, stats: PassStats::default() })
    }

    /// Process one event and persist its records.
    pub fn process_event(&mut self, event: &EventInput) -> Result<EventOutput> {
        let out = self.engine.process_event(event, Some(&mut self.histograms))?;
        if !out.records.is_empty() {
            self.store.append_records(&out.records)?;
        }
        self.stats.add(&out);
        Ok(out)
    }

    /// Process every event of `source`.
    pub fn run(&mut self, source: &mut dyn EventSource) -> Result<PassStats> {
        while let Some(event) = source.next_event()? {
            self.process_event(&event)?;
        }
        Ok(self.stats)
    }

    /// Counters so far.
    pub fn stats(&self) -> PassStats {
        self.stats
    }

    /// Accumulators so far.
    pub fn histograms(&self) -> &HistogramSet {
        &self.histograms
    }

    /// Store in use.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Write the accumulators and hand back the store with the final counters.
    pub fn finish(mut self) -> Result<(S, HistogramSet, PassStats)> {
        for (_, histogram) in self.histograms.iter() {
            self.store.write_histogram(histogram)?;
        }
        let s = self.stats;
        log::info!(
            "calibration pass: {} events ({} skipped), {} tracks accepted, {} rejected, {} samples",
            s.events,
            s.skipped_events,
            s.tracks_accepted,
            s.tracks_rejected,
            s.samples
        );
        Ok((self.store, self.histograms, s))
    }
}

/// Process `events` in parallel.
///
/// Every event is processed with its own accumulators; the partial sets are
/// merged afterwards. Outputs keep the order of `events`.
pub fn process_events_parallel(
    engine: &InterpolationEngine,
    events: &[EventInput],
) -> Result<(Vec<EventOutput>, HistogramSet)> {
    let partials = events
        .par_iter()
        .map(|event| -> Result<(EventOutput, HistogramSet)> {
            let mut set = engine.new_histogram_set()?;
            let out = engine.process_event(event, Some(&mut set))?;
            Ok((out, set))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut merged = engine.new_histogram_set()?;
    let mut outputs = Vec::with_capacity(partials.len());
    for (out, set) in partials {
        merged.merge(&set)?;
        outputs.push(out);
    }
    Ok((outputs, merged))
}

/// Fill accumulators from `events` in parallel without keeping records.
///
/// Each worker folds into its own set; worker sets are merged bin by bin.
pub fn fill_parallel(engine: &InterpolationEngine, events: &[EventInput]) -> Result<HistogramSet> {
    let empty = engine.new_histogram_set()?;
    events
        .par_iter()
        .try_fold(
            || empty.clone(),
            |mut set, event| -> Result<HistogramSet> {
                engine.process_event(event, Some(&mut set))?;
                Ok(set)
            },
        )
        .try_reduce(
            || empty.clone(),
            |mut a, b| {
                a.merge(&b)?;
                Ok(a)
            },
        )
}

/// Merge `sets` and build one map per accumulator.
///
/// No sets, or sets without accumulators, give an empty result.
pub fn build_maps(
    builder: &DistortionMapBuilder,
    sets: &[HistogramSet],
) -> Result<BTreeMap<HistogramKind, DistortionMap>> {
    let Some((first, rest)) = sets.split_first() else {
        return Ok(BTreeMap::new());
    };
    let mut merged = first.clone();
    for set in rest {
        merged.merge(set)?;
    }
    Ok(merged.iter().map(|(kind, h)| (kind, builder.build(h))).collect())
}

/// Build maps for `kinds` from accumulators stored in `store` and store them.
///
/// Accumulators missing from the store are skipped with a warning; corrupt
/// ones fail with [`Error::Validation`].
pub fn build_distortion_maps(
    store: &mut dyn Persistence,
    builder: &DistortionMapBuilder,
    kinds: &[HistogramKind],
) -> Result<Vec<DistortionMap>> {
    let mut maps = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let histogram = match store.read_histogram(kind.name()) {
            Ok(h) => h,
            Err(Error::NotFound(what)) => {
                log::warn!("no accumulator to build a map from: {what}");
                continue;
            }
            Err(e) => return Err(e),
        };
        histogram.validate()?;
        let map = builder.build(&histogram);
        log::info!("map '{}': {} of {} keys filled", map.name, map.filled(), map.entries.len());
        store.write_map(&map)?;
        maps.push(map);
    }
    Ok(maps)
}
