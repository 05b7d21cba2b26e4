//! Synthetic straight tracks in a field-free detector, with clusters displaced
//! from the tracks by a fixed distortion.
#![allow(dead_code)]

use std::sync::Arc;

use td_calib::{EngineConfig, InterpolationEngine};
use td_core::{
    DetectorLayer, EventInput, IdentityTransform, Matrix5, ReferenceCluster, SpacePoint,
    TrackInput, TrackState, Vector5,
};
use td_hist::{Axis, HistogramSetConfig};
use td_refit::UniformField;

pub const PHI: f64 = 0.3;
pub const TGL: f64 = 0.2;
pub const MASS: f64 = 0.13957;
pub const N_CLUSTERS: usize = 16;
/// Azimuthal displacement of every reference cluster.
pub const CLUSTER_DPHI: f64 = 1e-3;
/// Longitudinal displacement of every reference cluster.
pub const CLUSTER_DZ: f64 = 0.05;

pub const INNER: [(f64, DetectorLayer); 6] = [
    (3.9, DetectorLayer::Pixel1),
    (7.6, DetectorLayer::Pixel2),
    (15.0, DetectorLayer::Drift1),
    (23.9, DetectorLayer::Drift2),
    (38.0, DetectorLayer::Strip1),
    (43.0, DetectorLayer::Strip2),
];

pub const TRANSITION: [(f64, DetectorLayer); 6] = [
    (290.0, DetectorLayer::Transition1),
    (306.0, DetectorLayer::Transition2),
    (322.0, DetectorLayer::Transition3),
    (338.0, DetectorLayer::Transition4),
    (354.0, DetectorLayer::Transition5),
    (370.0, DetectorLayer::Transition6),
];

pub fn point(r: f64, phi: f64, layer: DetectorLayer) -> SpacePoint {
    SpacePoint::new([r * phi.cos(), r * phi.sin(), r * TGL], layer, 0)
}

/// State on the straight line through the origin at azimuth `phi`.
pub fn state_at(x: f64, phi: f64) -> TrackState {
    TrackState::new(
        x,
        phi,
        Vector5::new(0.0, x * TGL, 0.0, TGL, 0.5),
        Matrix5::from_diagonal(&Vector5::new(0.01, 0.01, 1e-4, 1e-4, 0.01)),
    )
}

/// Clusters on layers `0..N_CLUSTERS` at r = 90, 100, ..., 240; four empty layers follow.
pub fn clusters() -> Vec<Option<ReferenceCluster>> {
    let phi = PHI + CLUSTER_DPHI;
    (0..N_CLUSTERS + 4)
        .map(|i| {
            (i < N_CLUSTERS).then(|| {
                let r = cluster_radius(i);
                ReferenceCluster {
                    roc: 5,
                    xyz: [r * phi.cos(), r * phi.sin(), r * TGL + CLUSTER_DZ],
                }
            })
        })
        .collect()
}

pub fn cluster_radius(layer: usize) -> f64 {
    90.0 + 10.0 * layer as f64
}

/// Local y of a track at azimuth `PHI` in the frame of the cluster on `layer`.
pub fn expected_dy(layer: usize) -> f64 {
    -cluster_radius(layer) * CLUSTER_DPHI.tan()
}

/// Track z minus cluster z on `layer`.
pub fn expected_dz(layer: usize) -> f64 {
    cluster_radius(layer) * TGL / CLUSTER_DPHI.cos() - cluster_radius(layer) * TGL - CLUSTER_DZ
}

pub fn inner_only_track() -> TrackInput {
    TrackInput {
        mass: MASS,
        inner_cluster_count: INNER.len(),
        inner_outer_state: Some(state_at(45.0, PHI)),
        points: INNER.iter().map(|&(r, l)| point(r, PHI, l)).collect(),
        clusters: Some(clusters()),
        ..Default::default()
    }
}

/// Track whose transition points lie on a line at azimuth `PHI + tilt`.
pub fn track_with_transition(tilt: f64) -> TrackInput {
    let mut track = inner_only_track();
    track.transition_inner_state = Some(state_at(290.0, PHI + tilt));
    track.points.extend(TRANSITION.iter().map(|&(r, l)| point(r, PHI + tilt, l)));
    track.timing_difference = Some(0.25);
    track
}

pub fn event(id: u64, tracks: Vec<TrackInput>) -> EventInput {
    EventInput {
        id,
        timestamp: 1_000 + id as u32,
        n_primary_contributors: 12,
        n_primary_contributors_pixel: 10,
        inner_multiplicity: [40, 30, 20],
        clusters_per_roc: vec![3; 72],
        clusters_used_per_roc: vec![1; 72],
        tracks,
        ..Default::default()
    }
}

/// Binning coarse enough to keep full distortion maps small.
pub fn coarse_histograms() -> HistogramSetConfig {
    HistogramSetConfig {
        sector: Axis { n_bins: 18, low: 0.0, high: 18.0 },
        radius: Axis { n_bins: 16, low: 85.0, high: 245.0 },
        dip: Axis { n_bins: 4, low: -1.0, high: 1.0 },
        dip_inner: Axis { n_bins: 4, low: -1.8, high: 1.8 },
        ..Default::default()
    }
}

pub fn engine(config: EngineConfig) -> InterpolationEngine {
    InterpolationEngine::builder()
        .config(config)
        .field(Arc::new(UniformField::new(0.0)))
        .transform(Arc::new(IdentityTransform))
        .build()
        .unwrap()
}
