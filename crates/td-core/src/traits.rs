//! Collaborator traits for the calibration core.
//!
//! The refit and interpolation stages never talk to a concrete field map,
//! calibration database or event reader; they go through these traits.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::track::{TrackState, global_to_local};
use crate::types::{EventInput, ReferenceCluster};

/// Local measurement frame of a point: rotated so that the point has local y = 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    /// Rotation angle of the frame.
    pub alpha: f64,
}

impl LocalFrame {
    /// Frame whose x axis passes through `xyz`.
    pub fn from_position(xyz: &[f64; 3]) -> Self {
        Self { alpha: xyz[1].atan2(xyz[0]) }
    }

    /// Coordinates of a global position in this frame.
    pub fn to_local(&self, xyz: &[f64; 3]) -> [f64; 3] {
        global_to_local(xyz, self.alpha)
    }
}

/// Options of a single propagation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationOptions {
    /// Maximum step in local x (cm).
    pub max_step: f64,
    /// Rotate the frame after every step so it follows the track position.
    pub rotate_to_direction: bool,
    /// Fail if `|sin(phi)|` would reach this value; non-positive disables the guard.
    pub max_snp: f64,
    /// Add multiple-scattering noise for the traversed material.
    pub correct_material: bool,
}

impl Default for PropagationOptions {
    fn default() -> Self {
        Self { max_step: 1.0, rotate_to_direction: false, max_snp: 0.8, correct_material: false }
    }
}

/// Magnetic field and geometry service.
pub trait FieldGeometry: Send + Sync {
    /// Solenoidal field component (kG) at a global position.
    fn bz(&self, xyz: &[f64; 3]) -> f64;

    /// Propagate `state` to local `x` for a particle of `mass`.
    ///
    /// Returns `None` on a numerical failure (e.g. a tangential trajectory);
    /// the input state is never modified.
    fn propagate_to(
        &self,
        state: &TrackState,
        x: f64,
        mass: f64,
        opts: &PropagationOptions,
    ) -> Option<TrackState>;

    /// Local frame of a measured point.
    fn local_frame(&self, xyz: &[f64; 3]) -> LocalFrame {
        LocalFrame::from_position(xyz)
    }
}

/// Reconstruction toggles of the cluster transformation.
///
/// Passed explicitly to every call instead of living in shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransformParams {
    /// Apply the composed (all-in-one) distortion correction.
    pub use_composed_correction: bool,
}

/// Calibration transform of reference-detector clusters to global coordinates.
pub trait ClusterTransform: Send + Sync {
    /// Global position of `cluster` under `params`.
    fn transform(&self, cluster: &ReferenceCluster, params: &TransformParams) -> Result<[f64; 3]>;
}

/// Transform that trusts the cluster positions as delivered.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl ClusterTransform for IdentityTransform {
    fn transform(&self, cluster: &ReferenceCluster, _params: &TransformParams) -> Result<[f64; 3]> {
        Ok(cluster.xyz)
    }
}

/// Source of events.
pub trait EventSource {
    /// Next event, or `None` when exhausted.
    fn next_event(&mut self) -> Result<Option<EventInput>>;
}

/// Event source over an in-memory list.
#[derive(Debug, Default)]
pub struct VecSource {
    events: std::vec::IntoIter<EventInput>,
}

impl VecSource {
    /// Wrap a list of events.
    pub fn new(events: Vec<EventInput>) -> Self {
        Self { events: events.into_iter() }
    }
}

impl EventSource for VecSource {
    fn next_event(&mut self) -> Result<Option<EventInput>> {
        Ok(self.events.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_local_frame_puts_point_on_x_axis() {
        let xyz = [30.0, -40.0, 7.0];
        let frame = LocalFrame::from_position(&xyz);
        let local = frame.to_local(&xyz);
        assert_relative_eq!(local[0], 50.0, epsilon = 1e-12);
        assert_relative_eq!(local[1], 0.0, epsilon = 1e-12);
        assert_eq!(local[2], 7.0);
    }

    #[test]
    fn test_vec_source_drains() {
        let mut src = VecSource::new(vec![EventInput::default(), EventInput::default()]);
        assert!(src.next_event().unwrap().is_some());
        assert!(src.next_event().unwrap().is_some());
        assert!(src.next_event().unwrap().is_none());
    }
}
