//! Records handed to persistence.
//!
//! Three schemas exist: one summary row per processed event (`eventInfo`),
//! one residual row per accepted track (`delta`) and optional full per-layer
//! dumps for debugging (`interpolation`).

use serde::{Deserialize, Serialize};
use td_core::EventInput;
use td_hist::{HistogramKind, ReferenceCombination, ResidualComponent};
use td_refit::RefitResult;

use crate::engine::TrackInterpolation;
use crate::layer::LayerRecord;

/// Record schema, i.e. the relation a record is appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Schema {
    /// Per-event summary.
    EventInfo,
    /// Per-track residuals.
    Delta,
    /// Per-track debug dump.
    Interpolation,
}

impl Schema {
    /// All schemas.
    pub const ALL: [Schema; 3] = [Schema::EventInfo, Schema::Delta, Schema::Interpolation];

    /// Relation name.
    pub fn name(self) -> &'static str {
        match self {
            Schema::EventInfo => "eventInfo",
            Schema::Delta => "delta",
            Schema::Interpolation => "interpolation",
        }
    }
}

/// Summary row of one processed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    /// Global event identifier.
    pub event_id: u64,
    /// Event time stamp.
    pub timestamp: u32,
    /// Inner-subsystem cluster multiplicity: pixel, drift, strip.
    pub inner_multiplicity: [u32; 3],
    /// Primary-vertex contributors.
    pub n_primary_contributors: usize,
    /// Pixel-only primary-vertex contributors.
    pub n_primary_contributors_pixel: usize,
    /// Tracks in the event.
    pub n_tracks: usize,
    /// Reference-detector clusters per readout chamber.
    pub clusters_per_roc: Vec<u32>,
    /// Reference-detector clusters per readout chamber attached to tracks.
    pub clusters_used_per_roc: Vec<u32>,
}

impl EventSummary {
    /// Summary of `event`.
    pub fn from_event(event: &EventInput) -> Self {
        Self {
            event_id: event.id,
            timestamp: event.timestamp,
            inner_multiplicity: event.inner_multiplicity,
            n_primary_contributors: event.n_primary_contributors,
            n_primary_contributors_pixel: event.n_primary_contributors_pixel,
            n_tracks: event.tracks.len(),
            clusters_per_roc: event.clusters_per_roc.clone(),
            clusters_used_per_roc: event.clusters_used_per_roc.clone(),
        }
    }
}

/// Quality of one subsystem refit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubsystemFit {
    /// Accumulated predicted chi².
    pub chi2: f64,
    /// Points used.
    pub n_points: usize,
    /// Refit valid.
    pub ok: bool,
}

impl From<&RefitResult> for SubsystemFit {
    fn from(r: &RefitResult) -> Self {
        Self { chi2: r.chi2, n_points: r.n_points, ok: r.valid }
    }
}

/// Residuals of one track at one layer.
///
/// Residual pairs are `(dy, dz)` quantised to the configured step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerResidual {
    /// Layer (pad row).
    pub row: usize,
    /// Readout chamber of the cluster.
    pub roc: u16,
    /// Local x of the inner-only estimate.
    pub r: f64,
    /// Frame angle of the inner-only estimate.
    pub phi: f64,
    /// z of the inner-only estimate.
    pub z: f64,
    /// Inner-only residuals.
    pub inner: Option<[f64; 2]>,
    /// Inner+transition residuals.
    pub inner_transition: Option<[f64; 2]>,
    /// Inner+timing residuals.
    pub inner_timing: Option<[f64; 2]>,
}

impl LayerResidual {
    /// Residuals of `layer`, or `None` without a valid inner-only estimate.
    pub fn from_layer(layer: &LayerRecord, quantum: f64) -> Option<Self> {
        let inner = layer.inner.valid_state()?;
        let pair = |c: ReferenceCombination| {
            let dy = layer.residual(c, ResidualComponent::Y)?;
            let dz = layer.residual(c, ResidualComponent::Z)?;
            Some([quantize(dy, quantum), quantize(dz, quantum)])
        };
        Some(Self {
            row: layer.layer,
            roc: layer.cluster.roc,
            r: inner.x,
            phi: inner.alpha,
            z: inner.z(),
            inner: pair(ReferenceCombination::Inner),
            inner_transition: pair(ReferenceCombination::InnerTransition),
            inner_timing: pair(ReferenceCombination::InnerTiming),
        })
    }

    /// Residual feeding accumulator `kind`.
    pub fn residual(&self, kind: HistogramKind) -> Option<f64> {
        let pair = match kind.combination {
            ReferenceCombination::Inner => self.inner,
            ReferenceCombination::InnerTransition => self.inner_transition,
            ReferenceCombination::InnerTiming => self.inner_timing,
        }?;
        Some(match kind.component {
            ResidualComponent::Y => pair[0],
            ResidualComponent::Z => pair[1],
        })
    }
}

/// Round `v` to a multiple of `quantum`, ties to even.
pub fn quantize(v: f64, quantum: f64) -> f64 {
    let scale = 1.0 / quantum;
    (v * scale).round_ties_even() / scale
}

/// Residual row of one accepted track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackResidualRecord {
    /// Global event identifier.
    pub event_id: u64,
    /// Event time stamp.
    pub timestamp: u32,
    /// Tracks in the event.
    pub n_tracks: usize,
    /// Primary-vertex contributors.
    pub n_primary_contributors: usize,
    /// Index of the track inside its event.
    pub track_index: usize,
    /// Inner refit quality.
    pub inner: SubsystemFit,
    /// Transition refit quality.
    pub transition: SubsystemFit,
    /// Timing refit quality.
    pub timing: SubsystemFit,
    /// Measured minus expected arrival time.
    pub timing_difference: Option<f64>,
    /// q/pT at the inner wall of the reference detector.
    pub curvature: f64,
    /// Layers with a valid inner-only estimate, inner to outer.
    pub layers: Vec<LayerResidual>,
}

impl TrackResidualRecord {
    /// Residual row of track `track_index` of `event`.
    pub fn new(
        event: &EventInput,
        track_index: usize,
        interpolation: &TrackInterpolation,
        quantum: f64,
    ) -> Self {
        let fits = &interpolation.fits;
        Self {
            event_id: event.id,
            timestamp: event.timestamp,
            n_tracks: event.tracks.len(),
            n_primary_contributors: event.n_primary_contributors,
            track_index,
            inner: SubsystemFit::from(&fits.inner),
            transition: SubsystemFit::from(&fits.transition),
            timing: SubsystemFit::from(&fits.timing),
            timing_difference: event.tracks.get(track_index).and_then(|t| t.timing_difference),
            curvature: interpolation.curvature,
            layers: interpolation
                .layers
                .iter()
                .filter_map(|l| LayerResidual::from_layer(l, quantum))
                .collect(),
        }
    }
}

/// Full per-layer estimates of one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolationDebugRecord {
    /// Global event identifier.
    pub event_id: u64,
    /// Index of the track inside its event.
    pub track_index: usize,
    /// Every layer carrying a cluster.
    pub layers: Vec<LayerRecord>,
}

/// Any persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    /// `eventInfo` row.
    Event(EventSummary),
    /// `delta` row.
    Track(TrackResidualRecord),
    /// `interpolation` row.
    Interpolation(InterpolationDebugRecord),
}

impl Record {
    /// Schema the record belongs to.
    pub fn schema(&self) -> Schema {
        match self {
            Record::Event(_) => Schema::EventInfo,
            Record::Track(_) => Schema::Delta,
            Record::Interpolation(_) => Schema::Interpolation,
        }
    }

    /// The residual row, if this is one.
    pub fn as_track(&self) -> Option<&TrackResidualRecord> {
        match self {
            Record::Track(t) => Some(t),
            _ => None,
        }
    }
}
