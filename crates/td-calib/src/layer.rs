//! Per-layer track estimates.

use serde::{Deserialize, Serialize};
use td_core::{ReferenceCluster, TrackState};
use td_hist::{ReferenceCombination, ResidualComponent};

use crate::config::GateConfig;

/// One interpolated track estimate at a reference-detector layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Estimate {
    /// The subsystem produced no usable refit for this track.
    Unattempted,
    /// Propagation to this layer (or an earlier one) failed, or fusion was impossible.
    Failed,
    /// Fused estimate that failed the consistency gate.
    Rejected {
        /// Fused state.
        state: TrackState,
        /// Gate chi².
        chi2: f64,
    },
    /// Usable estimate.
    Valid {
        /// Interpolated (or fused) state.
        state: TrackState,
        /// Gate chi² for fused estimates.
        gate_chi2: Option<f64>,
    },
}

impl Estimate {
    /// State of a valid estimate.
    pub fn valid_state(&self) -> Option<&TrackState> {
        match self {
            Estimate::Valid { state, .. } => Some(state),
            _ => None,
        }
    }

    /// Whether the estimate may be used.
    pub fn is_valid(&self) -> bool {
        matches!(self, Estimate::Valid { .. })
    }

    /// Fuse this outer-subsystem estimate with the inner-only estimate of the
    /// same layer and gate the result.
    ///
    /// Failed or unattempted estimates stay as they are; an invalid inner
    /// estimate or a singular combination gives [`Estimate::Failed`].
    pub fn fuse_with(&self, inner: &Estimate, gate: &GateConfig) -> Estimate {
        let outer = match self {
            Estimate::Valid { state, .. } => state,
            Estimate::Unattempted => return Estimate::Unattempted,
            Estimate::Failed | Estimate::Rejected { .. } => return Estimate::Failed,
        };
        let Some(inner) = inner.valid_state() else {
            return Estimate::Failed;
        };
        let mut fused = outer.clone();
        if !fused.fuse(inner) {
            return Estimate::Failed;
        }
        let chi2 = gate.chi2(&fused, inner);
        if gate.accepts(chi2) {
            Estimate::Valid { state: fused, gate_chi2: Some(chi2) }
        } else {
            Estimate::Rejected { state: fused, chi2 }
        }
    }
}

/// Everything known about one track at one reference-detector layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    /// Layer (pad row) index.
    pub layer: usize,
    /// Cluster as delivered.
    pub cluster: ReferenceCluster,
    /// Transformed global cluster position.
    pub cluster_xyz: [f64; 3],
    /// Inner refit carried outward.
    pub inner: Estimate,
    /// Transition refit carried inward.
    pub transition: Estimate,
    /// Timing refit carried inward.
    pub timing: Estimate,
    /// Transition estimate fused with the inner one and gated.
    pub inner_transition: Estimate,
    /// Timing estimate fused with the inner one and gated.
    pub inner_timing: Estimate,
}

impl LayerRecord {
    /// Record with all estimates unattempted.
    pub fn new(layer: usize, cluster: ReferenceCluster, cluster_xyz: [f64; 3]) -> Self {
        Self {
            layer,
            cluster,
            cluster_xyz,
            inner: Estimate::Unattempted,
            transition: Estimate::Unattempted,
            timing: Estimate::Unattempted,
            inner_transition: Estimate::Unattempted,
            inner_timing: Estimate::Unattempted,
        }
    }

    /// Estimate used for `combination`.
    pub fn estimate(&self, combination: ReferenceCombination) -> &Estimate {
        match combination {
            ReferenceCombination::Inner => &self.inner,
            ReferenceCombination::InnerTransition => &self.inner_transition,
            ReferenceCombination::InnerTiming => &self.inner_timing,
        }
    }

    /// Unquantised residual of `combination` in `component`.
    ///
    /// The track sits in the cluster's own frame, so the y residual is the
    /// track's local y; the z residual is track minus cluster.
    pub fn residual(
        &self,
        combination: ReferenceCombination,
        component: ResidualComponent,
    ) -> Option<f64> {
        let state = self.estimate(combination).valid_state()?;
        Some(match component {
            ResidualComponent::Y => state.y(),
            ResidualComponent::Z => state.z() - self.cluster_xyz[2],
        })
    }
}
