//! Sequential refit of a track through the points of one subsystem.
//!
//! A [`SubsystemRefitter`] is a small extended Kalman filter: starting from a
//! seed state it visits the radius-ordered points of its subsystem, propagates
//! to each point's local frame and updates with the point's `(y, z)`
//! measurement. One refitter is configured per subsystem through
//! [`RefitConfig`]; the calibrated presets are [`RefitConfig::inner`],
//! [`RefitConfig::transition`] and [`RefitConfig::timing`].

use serde::{Deserialize, Serialize};
use td_core::{
    DetectorLayer, FieldGeometry, PropagationOptions, ResolutionClass, SpacePoint, TrackState,
};

use crate::sort::SortedIndex;

/// Direction in which points are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefitDirection {
    /// Increasing radius.
    Outward,
    /// Decreasing radius.
    Inward,
}

/// Measurement variances of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerSigma {
    /// Layer the variances apply to.
    pub layer: DetectorLayer,
    /// `(sigma_y^2, sigma_z^2)` in cm².
    pub sigma2: [f64; 2],
}

/// Full parametrisation of one subsystem refit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefitConfig {
    /// Traversal direction.
    pub direction: RefitDirection,
    /// Local x the seed is transported to before the first point.
    pub seed_x: Option<f64>,
    /// Options for the seed transport.
    pub seed_propagation: PropagationOptions,
    /// Covariance inflation applied to the transported seed.
    pub reset_covariance: Option<f64>,
    /// Inner edge of the radius window (cm).
    pub r_min: f64,
    /// Outer edge of the radius window (cm).
    pub r_max: f64,
    /// Accepted layers with their measurement variances; other layers are skipped.
    pub layers: Vec<LayerSigma>,
    /// Variance factor for layers of [`ResolutionClass::Coarse`].
    pub coarse_inflation: f64,
    /// Minimum number of used points for a valid result.
    pub min_points: usize,
    /// Options for the point-to-point transport.
    pub propagation: PropagationOptions,
}

impl Default for RefitConfig {
    fn default() -> Self {
        Self::inner()
    }
}

impl RefitConfig {
    /// Inner subsystem: outward from the beam line up to 50 cm.
    pub fn inner() -> Self {
        let sigma2 = [0.003 * 0.003, 0.01 * 0.01];
        let layers = [
            DetectorLayer::Pixel1,
            DetectorLayer::Pixel2,
            DetectorLayer::Drift1,
            DetectorLayer::Drift2,
            DetectorLayer::Strip1,
            DetectorLayer::Strip2,
        ]
        .into_iter()
        .map(|layer| LayerSigma { layer, sigma2 })
        .collect();
        Self {
            direction: RefitDirection::Outward,
            seed_x: Some(0.0),
            seed_propagation: PropagationOptions::default(),
            reset_covariance: Some(1000.0),
            r_min: 0.0,
            r_max: 50.0,
            layers,
            coarse_inflation: 16.0,
            min_points: 4,
            propagation: PropagationOptions::default(),
        }
    }

    /// Transition subsystem: inward from 390 cm down to 280 cm, timing point included.
    pub fn transition() -> Self {
        let mut layers: Vec<LayerSigma> = [
            DetectorLayer::Transition1,
            DetectorLayer::Transition2,
            DetectorLayer::Transition3,
            DetectorLayer::Transition4,
            DetectorLayer::Transition5,
            DetectorLayer::Transition6,
        ]
        .into_iter()
        .map(|layer| LayerSigma { layer, sigma2: [0.04 * 0.04, 5.0 * 5.0] })
        .collect();
        layers.push(LayerSigma { layer: DetectorLayer::Timing, sigma2: [1.0, 1.0] });
        Self {
            direction: RefitDirection::Inward,
            seed_x: Some(390.0),
            seed_propagation: PropagationOptions::default(),
            reset_covariance: Some(1000.0),
            r_min: 280.0,
            r_max: 390.0,
            layers,
            coarse_inflation: 16.0,
            min_points: 1,
            propagation: PropagationOptions::default(),
        }
    }

    /// Timing subsystem: the inner refit carried out to 370 cm and updated with timing points.
    pub fn timing() -> Self {
        Self {
            direction: RefitDirection::Inward,
            seed_x: Some(370.0),
            seed_propagation: PropagationOptions {
                max_step: 10.0,
                rotate_to_direction: true,
                ..PropagationOptions::default()
            },
            reset_covariance: None,
            r_min: 0.0,
            r_max: f64::MAX,
            layers: vec![LayerSigma { layer: DetectorLayer::Timing, sigma2: [1.0, 1.0] }],
            coarse_inflation: 16.0,
            min_points: 1,
            propagation: PropagationOptions::default(),
        }
    }

    fn sigma2(&self, layer: DetectorLayer) -> Option<[f64; 2]> {
        let entry = self.layers.iter().find(|l| l.layer == layer)?;
        let f = match layer.resolution_class() {
            ResolutionClass::Coarse => self.coarse_inflation,
            ResolutionClass::Fine => 1.0,
        };
        Some([entry.sigma2[0] * f, entry.sigma2[1] * f])
    }

    /// Radius past which traversal stops.
    fn beyond_far_edge(&self, r: f64) -> bool {
        match self.direction {
            RefitDirection::Outward => r > self.r_max,
            RefitDirection::Inward => r < self.r_min,
        }
    }

    fn beyond_near_edge(&self, r: f64) -> bool {
        match self.direction {
            RefitDirection::Outward => r < self.r_min,
            RefitDirection::Inward => r > self.r_max,
        }
    }
}

/// Outcome of one subsystem refit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefitResult {
    /// State after the last used point; `None` without a seed.
    pub state: Option<TrackState>,
    /// Sum of predicted chi² of the used points.
    pub chi2: f64,
    /// Number of points used.
    pub n_points: usize,
    /// Seed present and at least the configured minimum of points used.
    pub valid: bool,
}

impl RefitResult {
    /// Result for a refit that could not start.
    pub fn unseeded() -> Self {
        Self { state: None, chi2: 0.0, n_points: 0, valid: false }
    }

    /// Exit state of a valid refit.
    pub fn valid_state(&self) -> Option<&TrackState> {
        if self.valid { self.state.as_ref() } else { None }
    }
}

/// Point-by-point refitter for one subsystem.
#[derive(Debug, Clone)]
pub struct SubsystemRefitter {
    config: RefitConfig,
}

impl SubsystemRefitter {
    /// Refitter with the given configuration.
    pub fn new(config: RefitConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &RefitConfig {
        &self.config
    }

    /// Refit `seed` through `points` visited in the order given by `order`.
    ///
    /// Points failing propagation are skipped. The seed is never modified.
    pub fn refit(
        &self,
        seed: Option<&TrackState>,
        points: &[SpacePoint],
        order: &SortedIndex,
        mass: f64,
        field: &dyn FieldGeometry,
    ) -> RefitResult {
        let Some(seed) = seed else {
            return RefitResult::unseeded();
        };
        let cfg = &self.config;

        let mut track = match cfg.seed_x {
            Some(x) => field.propagate_to(seed, x, mass, &cfg.seed_propagation).unwrap_or_else(|| {
                log::debug!("seed transport to x={x} failed, refitting from the untransported seed");
                seed.clone()
            }),
            None => seed.clone(),
        };
        if let Some(s2) = cfg.reset_covariance {
            track.reset_covariance(s2);
        }

        let ordered: Box<dyn Iterator<Item = &SpacePoint> + '_> = match cfg.direction {
            RefitDirection::Outward => Box::new(order.outward(points)),
            RefitDirection::Inward => Box::new(order.inward(points)),
        };

        let mut chi2 = 0.0;
        let mut n_points = 0;
        for point in ordered {
            let frame = field.local_frame(&point.xyz);
            let local = frame.to_local(&point.xyz);
            if cfg.beyond_far_edge(local[0]) {
                break;
            }
            if cfg.beyond_near_edge(local[0]) {
                continue;
            }
            let Some(sigma2) = cfg.sigma2(point.layer()) else {
                continue;
            };

            let mut rotated = track.clone();
            if !rotated.rotate(frame.alpha) {
                log::debug!("skipping point at r={:.2}: rotation failed", local[0]);
                continue;
            }
            let Some(mut next) = field.propagate_to(&rotated, local[0], mass, &cfg.propagation)
            else {
                log::debug!("skipping point at r={:.2}: propagation failed", local[0]);
                continue;
            };

            let meas = [local[1], local[2]];
            let cov = [sigma2[0], 0.0, sigma2[1]];
            chi2 += next.predicted_chi2(meas, cov);
            n_points += 1;
            if !next.update(meas, cov) {
                log::debug!("update at r={:.2} rejected, keeping prediction", local[0]);
            }
            track = next;
        }

        RefitResult { state: Some(track), chi2, n_points, valid: n_points >= cfg.min_points }
    }
}
