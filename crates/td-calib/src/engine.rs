//! Per-track interpolation of refitted subsystem tracks to the reference detector.
//!
//! A track goes through
//!
//! ```text
//! Seeded -> InnerFit -> {TransitionFit, TimingFit} -> PerLayerInterpolate -> Emitted
//! ```
//!
//! and leaves either as [`TrackOutcome::Emitted`] or [`TrackOutcome::Rejected`].
//! Rejection is a normal filtering outcome, not an error; only failures of the
//! collaborating services are returned as [`Error`]s.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use td_core::{
    ClusterTransform, Error, EventInput, FieldGeometry, ReferenceCluster, Result, TrackInput,
    TrackState,
};
use td_hist::HistogramSet;
use td_refit::{RefitResult, SubsystemRefitter, sort_by_radius};

use crate::config::EngineConfig;
use crate::layer::{Estimate, LayerRecord};
use crate::records::{EventSummary, InterpolationDebugRecord, Record, TrackResidualRecord};
use crate::residual::fill_track;

/// Why a track was excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Fewer inner-subsystem clusters than required.
    TooFewInnerClusters(usize),
    /// No inner-subsystem seed state.
    MissingInnerSeed,
    /// No reference-detector cluster array.
    MissingClusters,
    /// Cluster array longer than the configured layer count.
    OversizedClusterArray(usize),
    /// Track carries no space points.
    NoSpacePoints,
    /// Inner refit used fewer points than required.
    TooFewInnerPoints(usize),
    /// All refits together used fewer points than required.
    TooFewPoints(usize),
}

/// The three subsystem refits of one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackFits {
    /// Inner-subsystem refit.
    pub inner: RefitResult,
    /// Transition-subsystem refit.
    pub transition: RefitResult,
    /// Timing-subsystem refit.
    pub timing: RefitResult,
}

impl TrackFits {
    /// Points used by all three refits.
    pub fn total_points(&self) -> usize {
        self.inner.n_points + self.transition.n_points + self.timing.n_points
    }
}

/// Result of interpolating one accepted track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInterpolation {
    /// Subsystem refits.
    pub fits: TrackFits,
    /// q/pT used for binning.
    pub curvature: f64,
    /// One record per layer carrying a cluster, inner to outer.
    pub layers: Vec<LayerRecord>,
}

/// Terminal state of one track.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    /// Excluded from all downstream aggregation.
    Rejected(RejectReason),
    /// Interpolated.
    Emitted(Box<TrackInterpolation>),
}

/// What processing one event produced.
#[derive(Debug, Clone, Default)]
pub struct EventOutput {
    /// Event summary; `None` for skipped events.
    pub summary: Option<EventSummary>,
    /// Records to persist.
    pub records: Vec<Record>,
    /// Tracks emitted.
    pub accepted: usize,
    /// Tracks rejected.
    pub rejected: usize,
    /// Accepted accumulator fills.
    pub samples: usize,
}

impl EventOutput {
    /// Whether the event was skipped as a whole.
    pub fn is_skipped(&self) -> bool {
        self.summary.is_none()
    }
}

/// Builder for [`InterpolationEngine`].
///
/// The field and cluster-transform services are mandatory.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    field: Option<Arc<dyn FieldGeometry>>,
    transform: Option<Arc<dyn ClusterTransform>>,
}

impl EngineBuilder {
    /// Builder with the default configuration and no services.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config`.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Field and geometry service.
    pub fn field(mut self, field: Arc<dyn FieldGeometry>) -> Self {
        self.field = Some(field);
        self
    }

    /// Cluster calibration transform.
    pub fn transform(mut self, transform: Arc<dyn ClusterTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Validate the configuration and build the engine.
    pub fn build(self) -> Result<InterpolationEngine> {
        let field = self
            .field
            .ok_or_else(|| Error::ConfigurationMissing("field/geometry service".into()))?;
        let transform = self
            .transform
            .ok_or_else(|| Error::ConfigurationMissing("cluster transformation".into()))?;
        self.config.validate()?;
        let refit = &self.config.refit;
        Ok(InterpolationEngine {
            inner: SubsystemRefitter::new(refit.inner.clone()),
            transition: SubsystemRefitter::new(refit.transition.clone()),
            timing: SubsystemRefitter::new(refit.timing.clone()),
            config: self.config,
            field,
            transform,
        })
    }
}

/// Refits tracks through the three subsystems and interpolates them to every
/// reference-detector layer.
///
/// The engine holds no per-track state; it can be shared between threads.
pub struct InterpolationEngine {
    config: EngineConfig,
    field: Arc<dyn FieldGeometry>,
    transform: Arc<dyn ClusterTransform>,
    inner: SubsystemRefitter,
    transition: SubsystemRefitter,
    timing: SubsystemRefitter,
}

impl std::fmt::Debug for InterpolationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpolationEngine").field("config", &self.config).finish_non_exhaustive()
    }
}

type Preselected<'t> =
    std::result::Result<(&'t TrackState, &'t [Option<ReferenceCluster>]), RejectReason>;

/// Running state carried from layer to layer.
///
/// Once a propagation fails, every further layer fails as well.
struct LayerCarrier<'a> {
    field: &'a dyn FieldGeometry,
    config: &'a EngineConfig,
    mass: f64,
    state: Option<TrackState>,
    ok: bool,
}

impl<'a> LayerCarrier<'a> {
    fn new(engine: &'a InterpolationEngine, mass: f64, seed: Option<&TrackState>) -> Self {
        Self {
            field: engine.field.as_ref(),
            config: &engine.config,
            mass,
            state: seed.cloned(),
            ok: true,
        }
    }

    fn advance(&mut self, cluster_xyz: &[f64; 3]) -> Estimate {
        let Some(current) = self.state.as_ref() else {
            return Estimate::Unattempted;
        };
        if !self.ok {
            return Estimate::Failed;
        }
        let frame = self.field.local_frame(cluster_xyz);
        let x = frame.to_local(cluster_xyz)[0];
        let mut rotated = current.clone();
        let next = if rotated.rotate(frame.alpha) {
            self.field.propagate_to(&rotated, x, self.mass, &self.config.layer_propagation)
        } else {
            None
        };
        match next {
            Some(state) => {
                self.state = Some(state.clone());
                Estimate::Valid { state, gate_chi2: None }
            }
            None => {
                log::debug!("interpolation to x={x:.2} failed, dropping further layers");
                self.ok = false;
                Estimate::Failed
            }
        }
    }
}

impl InterpolationEngine {
    /// Start building an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Configuration in use.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Empty accumulators matching the configuration.
    pub fn new_histogram_set(&self) -> Result<HistogramSet> {
        HistogramSet::new(&self.config.histograms)
    }

    fn preselect<'t>(&self, track: &'t TrackInput) -> Preselected<'t> {
        if track.inner_cluster_count < self.config.min_inner_clusters {
            return Err(RejectReason::TooFewInnerClusters(track.inner_cluster_count));
        }
        let seed = track.inner_outer_state.as_ref().ok_or(RejectReason::MissingInnerSeed)?;
        let clusters = track.clusters.as_deref().ok_or(RejectReason::MissingClusters)?;
        if clusters.len() > self.config.n_layers {
            log::warn!(
                "cluster array with {} layers exceeds the configured {}",
                clusters.len(),
                self.config.n_layers
            );
            return Err(RejectReason::OversizedClusterArray(clusters.len()));
        }
        Ok((seed, clusters))
    }

    /// Refit and interpolate one track.
    ///
    /// Errors only when the cluster transformation fails.
    pub fn process_track(&self, track: &TrackInput) -> Result<TrackOutcome> {
        let (seed, clusters) = match self.preselect(track) {
            Ok(v) => v,
            Err(reason) => return Ok(TrackOutcome::Rejected(reason)),
        };
        let order = match sort_by_radius(&track.points) {
            Ok(order) => order,
            Err(Error::EmptyInput(_)) => {
                return Ok(TrackOutcome::Rejected(RejectReason::NoSpacePoints));
            }
            Err(e) => return Err(e),
        };

        let field = self.field.as_ref();
        let mass = track.mass;
        let inner = self.inner.refit(Some(seed), &track.points, &order, mass, field);
        if !inner.valid || inner.n_points < self.config.min_inner_points {
            return Ok(TrackOutcome::Rejected(RejectReason::TooFewInnerPoints(inner.n_points)));
        }
        let transition = self.transition.refit(
            track.transition_inner_state.as_ref(),
            &track.points,
            &order,
            mass,
            field,
        );
        let timing = self.timing.refit(inner.state.as_ref(), &track.points, &order, mass, field);
        let fits = TrackFits { inner, transition, timing };
        if fits.total_points() < self.config.min_total_points {
            return Ok(TrackOutcome::Rejected(RejectReason::TooFewPoints(fits.total_points())));
        }

        let mut layers = Vec::new();
        for (row, cluster) in clusters.iter().enumerate() {
            if let Some(cluster) = cluster {
                let xyz = self.transform.transform(cluster, &self.config.transform)?;
                layers.push(LayerRecord::new(row, *cluster, xyz));
            }
        }

        let mut carrier = LayerCarrier::new(self, mass, fits.inner.valid_state());
        for layer in layers.iter_mut() {
            layer.inner = carrier.advance(&layer.cluster_xyz);
        }
        let mut carrier = LayerCarrier::new(self, mass, fits.transition.valid_state());
        for layer in layers.iter_mut().rev() {
            layer.transition = carrier.advance(&layer.cluster_xyz);
            layer.inner_transition = layer.transition.fuse_with(&layer.inner, &self.config.gate);
        }
        let mut carrier = LayerCarrier::new(self, mass, fits.timing.valid_state());
        for layer in layers.iter_mut().rev() {
            layer.timing = carrier.advance(&layer.cluster_xyz);
            layer.inner_timing = layer.timing.fuse_with(&layer.inner, &self.config.gate);
        }

        let curvature = track
            .reference_inner_state
            .as_ref()
            .or(fits.inner.state.as_ref())
            .map_or(0.0, TrackState::signed_1pt);

        Ok(TrackOutcome::Emitted(Box::new(TrackInterpolation { fits, curvature, layers })))
    }

    /// Process every track of `event`.
    ///
    /// Residuals go into `histograms` when given and on-the-fly filling is
    /// enabled; records are collected when record output is enabled.
    pub fn process_event(
        &self,
        event: &EventInput,
        mut histograms: Option<&mut HistogramSet>,
    ) -> Result<EventOutput> {
        if event.skip || event.tracks.is_empty() {
            log::debug!("skipping event {} ({} tracks)", event.id, event.tracks.len());
            return Ok(EventOutput::default());
        }
        let out_cfg = self.config.output;
        let summary = EventSummary::from_event(event);
        let mut output = EventOutput { summary: Some(summary.clone()), ..Default::default() };
        if out_cfg.records {
            output.records.push(Record::Event(summary));
        }

        for (index, track) in event.tracks.iter().enumerate() {
            let interpolation = match self.process_track(track)? {
                TrackOutcome::Rejected(reason) => {
                    log::debug!("event {} track {index} rejected: {reason:?}", event.id);
                    output.rejected += 1;
                    continue;
                }
                TrackOutcome::Emitted(interpolation) => interpolation,
            };
            output.accepted += 1;

            let record =
                TrackResidualRecord::new(event, index, &interpolation, self.config.residual_quantum);
            if out_cfg.on_the_fly
                && let Some(set) = histograms.as_deref_mut()
            {
                output.samples += fill_track(set, &record);
            }
            if !out_cfg.records {
                continue;
            }
            output.records.push(Record::Track(record));
            if self.config.debug_every.is_some_and(|n| index as u64 % n == 0) {
                output.records.push(Record::Interpolation(InterpolationDebugRecord {
                    event_id: event.id,
                    track_index: index,
                    layers: interpolation.layers,
                }));
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use td_core::IdentityTransform;
    use td_refit::UniformField;

    #[test]
    fn test_builder_requires_services() {
        let err = InterpolationEngine::builder()
            .transform(Arc::new(IdentityTransform))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::ConfigurationMissing(_)));

        let err = InterpolationEngine::builder()
            .field(Arc::new(UniformField::new(5.0)))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::ConfigurationMissing(_)));

        let bad = EngineConfig { n_layers: 0, ..Default::default() };
        let err = InterpolationEngine::builder()
            .config(bad)
            .field(Arc::new(UniformField::new(5.0)))
            .transform(Arc::new(IdentityTransform))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_preselection_reasons() {
        let engine = InterpolationEngine::builder()
            .config(EngineConfig { n_layers: 4, ..Default::default() })
            .field(Arc::new(UniformField::new(5.0)))
            .transform(Arc::new(IdentityTransform))
            .build()
            .unwrap();
        let seed = TrackState::new(
            45.0,
            0.0,
            td_core::Vector5::new(0.0, 0.0, 0.0, 0.1, 1.0),
            td_core::Matrix5::identity(),
        );

        let mut track = TrackInput { inner_cluster_count: 3, ..Default::default() };
        let outcome = engine.process_track(&track).unwrap();
        assert_eq!(outcome, TrackOutcome::Rejected(RejectReason::TooFewInnerClusters(3)));

        track.inner_cluster_count = 6;
        let outcome = engine.process_track(&track).unwrap();
        assert_eq!(outcome, TrackOutcome::Rejected(RejectReason::MissingInnerSeed));

        track.inner_outer_state = Some(seed);
        let outcome = engine.process_track(&track).unwrap();
        assert_eq!(outcome, TrackOutcome::Rejected(RejectReason::MissingClusters));

        track.clusters = Some(vec![None; 5]);
        let outcome = engine.process_track(&track).unwrap();
        assert_eq!(outcome, TrackOutcome::Rejected(RejectReason::OversizedClusterArray(5)));

        track.clusters = Some(vec![None; 4]);
        let outcome = engine.process_track(&track).unwrap();
        assert_eq!(outcome, TrackOutcome::Rejected(RejectReason::NoSpacePoints));
    }

    #[test]
    fn test_skipped_event_produces_nothing() {
        let engine = InterpolationEngine::builder()
            .field(Arc::new(UniformField::new(5.0)))
            .transform(Arc::new(IdentityTransform))
            .build()
            .unwrap();
        let event = EventInput {
            id: 7,
            skip: true,
            tracks: vec![TrackInput::default()],
            ..Default::default()
        };
        let out = engine.process_event(&event, None).unwrap();
        assert!(out.is_skipped());
        assert!(out.records.is_empty());

        let empty = EventInput { id: 8, ..Default::default() };
        assert!(engine.process_event(&empty, None).unwrap().is_skipped());
    }
}
