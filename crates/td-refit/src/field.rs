//! Uniform solenoidal field propagation service.

use td_core::{FieldGeometry, PropagationOptions, TrackState};

/// Step guard: a propagation that has not converged after this many steps fails.
const MAX_STEPS: usize = 10_000;
/// Residual distance in local x treated as arrival.
const ARRIVAL_TOLERANCE: f64 = 1e-4;

/// Uniform field along the beam axis, optionally filled with homogeneous material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformField {
    /// Field strength (kG).
    pub bz: f64,
    /// Radiation length of the traversed medium (cm); `None` for vacuum.
    pub radiation_length: Option<f64>,
}

impl UniformField {
    /// Field of strength `bz` in vacuum.
    pub fn new(bz: f64) -> Self {
        Self { bz, radiation_length: None }
    }

    /// Same field filled with a medium of radiation length `x0` (cm).
    pub fn with_radiation_length(mut self, x0: f64) -> Self {
        self.radiation_length = Some(x0);
        self
    }
}

impl FieldGeometry for UniformField {
    fn bz(&self, _xyz: &[f64; 3]) -> f64 {
        self.bz
    }

    fn propagate_to(
        &self,
        state: &TrackState,
        x: f64,
        mass: f64,
        opts: &PropagationOptions,
    ) -> Option<TrackState> {
        let mut s = state.clone();
        if opts.max_snp > 0.0 && s.snp().abs() >= opts.max_snp {
            return None;
        }

        for _ in 0..MAX_STEPS {
            let dx = x - s.x;
            if dx.abs() <= ARRIVAL_TOLERANCE {
                return Some(s);
            }
            let step = if opts.max_step > 0.0 { dx.clamp(-opts.max_step, opts.max_step) } else { dx };
            let xk = s.x + step;
            if opts.max_snp > 0.0 && s.snp_at(xk, self.bz).abs() >= opts.max_snp {
                return None;
            }

            let (snp0, tgl) = (s.snp(), s.tgl());
            if !s.propagate_to(xk, self.bz) {
                return None;
            }

            if opts.correct_material
                && let Some(x0) = self.radiation_length
            {
                // Path length from the mean direction over the step.
                let snp = 0.5 * (snp0 + s.snp());
                let csp = ((1.0 - snp) * (1.0 + snp)).sqrt();
                let path = step.abs() / csp * (1.0 + tgl * tgl).sqrt();
                if !s.add_multiple_scattering(path / x0, mass) {
                    return None;
                }
            }

            if opts.rotate_to_direction {
                let g = s.global_position();
                if !s.rotate(g[1].atan2(g[0])) {
                    return None;
                }
            }
        }
        log::debug!("propagation to x={x} did not converge in {MAX_STEPS} steps");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use td_core::{Matrix5, Vector5};

    fn seed(snp: f64) -> TrackState {
        TrackState::new(
            50.0,
            0.2,
            Vector5::new(0.0, 1.0, snp, 0.2, 0.7),
            Matrix5::from_diagonal(&Vector5::new(1e-4, 1e-4, 1e-6, 1e-6, 1e-4)),
        )
    }

    #[test]
    fn test_stepping_matches_single_helix_step() {
        let field = UniformField::new(5.0);
        let opts = PropagationOptions { max_snp: 0.0, ..Default::default() };
        let stepped = field.propagate_to(&seed(0.1), 250.0, 0.14, &opts).unwrap();

        let mut direct = seed(0.1);
        assert!(direct.propagate_to(250.0, 5.0));
        assert_relative_eq!(stepped.x, 250.0, epsilon = 1e-12);
        assert_relative_eq!(stepped.y(), direct.y(), epsilon = 1e-8);
        assert_relative_eq!(stepped.snp(), direct.snp(), epsilon = 1e-10);
        // Short steps use the small-angle arc length.
        assert_relative_eq!(stepped.z(), direct.z(), epsilon = 1e-4);
    }

    #[test]
    fn test_snp_guard_rejects_steep_tracks() {
        let field = UniformField::new(5.0);
        let opts = PropagationOptions::default();
        assert!(field.propagate_to(&seed(0.85), 60.0, 0.14, &opts).is_none());
        assert!(field.propagate_to(&seed(0.1), 60.0, 0.14, &opts).is_some());
    }

    #[test]
    fn test_rotate_to_direction_keeps_frame_on_track() {
        let field = UniformField::new(5.0);
        let opts = PropagationOptions {
            max_step: 10.0,
            rotate_to_direction: true,
            ..Default::default()
        };
        let s = field.propagate_to(&seed(0.3), 370.0, 0.14, &opts).unwrap();
        assert_relative_eq!(s.x, 370.0, epsilon = 1e-3);
        // The frame follows the track, so the local y offset stays small.
        assert!(s.y().abs() < 1.0);
    }

    #[test]
    fn test_material_inflates_angular_variance() {
        let opts = PropagationOptions { correct_material: true, ..Default::default() };
        let vacuum = UniformField::new(5.0).propagate_to(&seed(0.1), 150.0, 0.14, &opts).unwrap();
        let dense = UniformField::new(5.0)
            .with_radiation_length(30.0)
            .propagate_to(&seed(0.1), 150.0, 0.14, &opts)
            .unwrap();
        assert!(dense.cov[(2, 2)] > vacuum.cov[(2, 2)]);
        assert_relative_eq!(dense.params[0], vacuum.params[0], epsilon = 1e-12);
    }
}
