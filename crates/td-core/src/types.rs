//! Detector data model shared by the refit and interpolation stages.

use serde::{Deserialize, Serialize};

use crate::track::TrackState;

/// Number of readout chambers of the reference detector.
pub const ROC_COUNT: usize = 72;

/// Geometric layer a space point belongs to.
///
/// Discriminants follow the global layer numbering used in volume identifiers
/// (`volume_id = layer << 11 | module`), so the derived ordering is inner to outer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum DetectorLayer {
    /// Inner subsystem, first pixel layer.
    Pixel1 = 1,
    /// Inner subsystem, second pixel layer.
    Pixel2 = 2,
    /// Inner subsystem, first drift layer.
    Drift1 = 3,
    /// Inner subsystem, second drift layer.
    Drift2 = 4,
    /// Inner subsystem, first strip layer.
    Strip1 = 5,
    /// Inner subsystem, second strip layer.
    Strip2 = 6,
    /// Reference detector, inner chambers.
    Reference1 = 7,
    /// Reference detector, outer chambers.
    Reference2 = 8,
    /// Transition subsystem layer 1.
    Transition1 = 9,
    /// Transition subsystem layer 2.
    Transition2 = 10,
    /// Transition subsystem layer 3.
    Transition3 = 11,
    /// Transition subsystem layer 4.
    Transition4 = 12,
    /// Transition subsystem layer 5.
    Transition5 = 13,
    /// Transition subsystem layer 6.
    Transition6 = 14,
    /// Timing subsystem.
    Timing = 15,
    /// Anything outside the tracking layers (calorimeters, muon arms, ...).
    Other = 16,
}

/// Intrinsic resolution class of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionClass {
    /// Nominal resolution.
    Fine,
    /// Intrinsically worse resolution; measurement variance gets inflated.
    Coarse,
}

impl DetectorLayer {
    const ALL: [DetectorLayer; 16] = [
        DetectorLayer::Pixel1,
        DetectorLayer::Pixel2,
        DetectorLayer::Drift1,
        DetectorLayer::Drift2,
        DetectorLayer::Strip1,
        DetectorLayer::Strip2,
        DetectorLayer::Reference1,
        DetectorLayer::Reference2,
        DetectorLayer::Transition1,
        DetectorLayer::Transition2,
        DetectorLayer::Transition3,
        DetectorLayer::Transition4,
        DetectorLayer::Transition5,
        DetectorLayer::Transition6,
        DetectorLayer::Timing,
        DetectorLayer::Other,
    ];

    /// Global layer index.
    pub fn index(self) -> u16 {
        self as u16
    }

    /// Layer from its global index; unknown indices map to [`DetectorLayer::Other`].
    pub fn from_index(index: u16) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|l| l.index() == index)
            .unwrap_or(DetectorLayer::Other)
    }

    /// Decode the layer part of a volume identifier.
    pub fn from_volume_id(volume_id: u16) -> Self {
        Self::from_index(volume_id >> 11)
    }

    /// Encode a volume identifier for `module` on this layer.
    pub fn volume_id(self, module: u16) -> u16 {
        (self.index() << 11) | (module & 0x7ff)
    }

    /// Layer of the inner subsystem.
    pub fn is_inner(self) -> bool {
        self <= DetectorLayer::Strip2
    }

    /// Layer of the transition subsystem.
    pub fn is_transition(self) -> bool {
        (DetectorLayer::Transition1..=DetectorLayer::Transition6).contains(&self)
    }

    /// The timing layer.
    pub fn is_timing(self) -> bool {
        self == DetectorLayer::Timing
    }

    /// Resolution class; the two drift layers are coarse.
    pub fn resolution_class(self) -> ResolutionClass {
        match self {
            DetectorLayer::Drift1 | DetectorLayer::Drift2 => ResolutionClass::Coarse,
            _ => ResolutionClass::Fine,
        }
    }
}

/// A measured space point of one of the outer subsystems (global coordinates, cm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpacePoint {
    /// Global position `(x, y, z)`.
    pub xyz: [f64; 3],
    /// Volume identifier (layer and module).
    pub volume_id: u16,
}

impl SpacePoint {
    /// Create a point on module `module` of `layer`.
    pub fn new(xyz: [f64; 3], layer: DetectorLayer, module: u16) -> Self {
        Self { xyz, volume_id: layer.volume_id(module) }
    }

    /// Layer decoded from the volume identifier.
    pub fn layer(&self) -> DetectorLayer {
        DetectorLayer::from_volume_id(self.volume_id)
    }

    /// Transverse radius.
    pub fn radius(&self) -> f64 {
        self.xyz[0].hypot(self.xyz[1])
    }

    /// Azimuth of the point, i.e. the rotation angle of its local frame.
    pub fn azimuth(&self) -> f64 {
        self.xyz[1].atan2(self.xyz[0])
    }
}

/// A cluster of the reference detector, one per measurement layer (pad row).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceCluster {
    /// Readout chamber, `0..ROC_COUNT`.
    pub roc: u16,
    /// Global position before any calibration transform.
    pub xyz: [f64; 3],
}

/// One reconstructed track as delivered by the event source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackInput {
    /// Particle mass hypothesis (GeV).
    pub mass: f64,
    /// Number of inner-subsystem clusters attached by the reconstruction.
    pub inner_cluster_count: usize,
    /// Track state at the outer boundary of the inner subsystem.
    pub inner_outer_state: Option<TrackState>,
    /// Track state at the inner boundary of the transition subsystem.
    pub transition_inner_state: Option<TrackState>,
    /// Track state at the inner wall of the reference detector.
    pub reference_inner_state: Option<TrackState>,
    /// Measured minus expected arrival time for the pion hypothesis.
    pub timing_difference: Option<f64>,
    /// Space points of all outer subsystems, in arbitrary order.
    pub points: Vec<SpacePoint>,
    /// Reference-detector clusters indexed by layer; `None` when the layer has no cluster.
    ///
    /// The whole array is `None` when the track carries no reference-detector seed.
    pub clusters: Option<Vec<Option<ReferenceCluster>>>,
}

/// One event as delivered by the event source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventInput {
    /// Global event identifier.
    pub id: u64,
    /// Event time stamp.
    pub timestamp: u32,
    /// Event carries no usable friend information and must be skipped.
    pub skip: bool,
    /// Contributors to the primary vertex.
    pub n_primary_contributors: usize,
    /// Contributors to the pixel-only primary vertex.
    pub n_primary_contributors_pixel: usize,
    /// Inner-subsystem cluster multiplicity per sub-detector: pixel, drift, strip.
    pub inner_multiplicity: [u32; 3],
    /// Reference-detector cluster counts per readout chamber.
    pub clusters_per_roc: Vec<u32>,
    /// Reference-detector cluster counts per readout chamber attached to tracks.
    pub clusters_used_per_roc: Vec<u32>,
    /// Tracks of the event.
    pub tracks: Vec<TrackInput>,
}
