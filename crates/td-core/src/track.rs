//! Local helix track parametrisation.
//!
//! A [`TrackState`] lives in a local frame rotated by `alpha` around the beam
//! axis. Its parameters at local `x` are
//!
//! `(y, z, sin(phi), tan(lambda), q/pT)`
//!
//! with `phi` the azimuth of the momentum relative to the local x axis.
//! Units are cm, kG and GeV throughout.

use std::f64::consts::PI;

use nalgebra::{Matrix2, SMatrix, SVector, Vector2};
use serde::{Deserialize, Serialize};

/// 5-component parameter vector.
pub type Vector5 = SVector<f64, 5>;
/// 5×5 parameter covariance.
pub type Matrix5 = SMatrix<f64, 5, 5>;

type Projection = SMatrix<f64, 2, 5>;

/// Curvature per unit `q/pT` and field: `C = q/pT * Bz * B2C` (1/cm for Bz in kG).
pub const B2C: f64 = -0.299_792_458e-3;

const ALMOST1: f64 = 1.0 - f32::EPSILON as f64;
const ALMOST0: f64 = f32::MIN_POSITIVE as f64;
const ALMOST0_FIELD: f64 = 1e-13;
const VERY_BIG: f64 = 1.0 / ALMOST0;

/// Upper bounds on the diagonal after a covariance reset.
const COV_DIAG_MAX: [f64; 5] = [100.0, 100.0, 1.0, 1.0, 100.0];

/// Track parameters with covariance in a rotated local frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackState {
    /// Local x (radius-like coordinate of the reference plane).
    pub x: f64,
    /// Rotation of the local frame, normalised to `[-pi, pi)`.
    pub alpha: f64,
    /// `(y, z, snp, tgl, q/pT)`.
    pub params: Vector5,
    /// Parameter covariance.
    pub cov: Matrix5,
}

#[inline]
fn symmetrize(p: &Matrix5) -> Matrix5 {
    0.5 * (p + p.transpose())
}

#[inline]
fn normalize_alpha(alpha: f64) -> f64 {
    if alpha < -PI {
        alpha + 2.0 * PI
    } else if alpha >= PI {
        alpha - 2.0 * PI
    } else {
        alpha
    }
}

/// Rotate a global position into the frame with angle `alpha`.
pub fn global_to_local(xyz: &[f64; 3], alpha: f64) -> [f64; 3] {
    let (sa, ca) = alpha.sin_cos();
    [xyz[0] * ca + xyz[1] * sa, -xyz[0] * sa + xyz[1] * ca, xyz[2]]
}

impl TrackState {
    /// Create a state from its components.
    pub fn new(x: f64, alpha: f64, params: Vector5, cov: Matrix5) -> Self {
        Self { x, alpha: normalize_alpha(alpha), params, cov }
    }

    /// Local y.
    pub fn y(&self) -> f64 {
        self.params[0]
    }

    /// z.
    pub fn z(&self) -> f64 {
        self.params[1]
    }

    /// Sine of the local azimuth of the momentum.
    pub fn snp(&self) -> f64 {
        self.params[2]
    }

    /// Tangent of the dip angle.
    pub fn tgl(&self) -> f64 {
        self.params[3]
    }

    /// Charge over transverse momentum.
    pub fn signed_1pt(&self) -> f64 {
        self.params[4]
    }

    /// Variance of local y.
    pub fn sigma_y2(&self) -> f64 {
        self.cov[(0, 0)]
    }

    /// Variance of z.
    pub fn sigma_z2(&self) -> f64 {
        self.cov[(1, 1)]
    }

    /// Track curvature (1/cm) in field `bz` (kG).
    pub fn curvature(&self, bz: f64) -> f64 {
        self.params[4] * bz * B2C
    }

    /// `sin(phi)` the track would have at local `x`.
    pub fn snp_at(&self, x: f64, bz: f64) -> f64 {
        let crv = if bz.abs() < ALMOST0_FIELD { 0.0 } else { self.curvature(bz) };
        self.params[2] + crv * (x - self.x)
    }

    /// Global `(x, y, z)` of the reference point.
    pub fn global_position(&self) -> [f64; 3] {
        let (sa, ca) = self.alpha.sin_cos();
        let y = self.params[0];
        [self.x * ca - y * sa, self.x * sa + y * ca, self.params[1]]
    }

    /// Rotate the local frame to `alpha`.
    ///
    /// Fails without modifying the state when the momentum would point backwards
    /// in the new frame or become parallel to the local y axis.
    pub fn rotate(&mut self, alpha: f64) -> bool {
        if self.params[2].abs() >= ALMOST1 {
            return false;
        }
        let alpha = normalize_alpha(alpha);
        let (sa, ca) = (alpha - self.alpha).sin_cos();
        let sf = self.params[2];
        let cf = ((1.0 - sf) * (1.0 + sf)).sqrt();
        if cf * ca + sf * sa < 0.0 {
            return false;
        }
        let snp = sf * ca - cf * sa;
        if snp.abs() >= ALMOST1 {
            return false;
        }

        let (x, y) = (self.x, self.params[0]);
        self.alpha = alpha;
        self.x = x * ca + y * sa;
        self.params[0] = -x * sa + y * ca;
        self.params[2] = snp;

        let rr = ca + sf / cf.max(ALMOST0) * sa;
        let j = Matrix5::from_diagonal(&Vector5::new(ca, 1.0, rr, 1.0, 1.0));
        self.cov = symmetrize(&(j * self.cov * j.transpose()));
        true
    }

    /// Transport the state to local `xk` along a helix in a uniform field `bz`.
    ///
    /// Straight-line transport is used when `|bz|` is negligible. Fails without
    /// modifying the state if the track becomes tangential to the target plane.
    pub fn propagate_to(&mut self, xk: f64, bz: f64) -> bool {
        let dx = xk - self.x;
        if dx.abs() <= ALMOST0 {
            return true;
        }
        let crv = if bz.abs() < ALMOST0_FIELD { 0.0 } else { self.curvature(bz) };
        let x2r = crv * dx;
        let f1 = self.params[2];
        let f2 = f1 + x2r;
        if f1.abs() >= ALMOST1 || f2.abs() >= ALMOST1 {
            return false;
        }
        if self.params[4].abs() < ALMOST0 {
            return false;
        }
        let r1 = ((1.0 - f1) * (1.0 + f1)).sqrt();
        let r2 = ((1.0 - f2) * (1.0 + f2)).sqrt();
        if r1 < ALMOST0 || r2 < ALMOST0 {
            return false;
        }

        let tgl = self.params[3];
        let dy2dx = (f1 + f2) / (r1 + r2);
        let mut p = self.params;
        p[0] += dx * dy2dx;
        p[2] += x2r;
        if x2r.abs() < 0.05 {
            p[1] += dx * (r2 + f2 * dy2dx) * tgl;
        } else {
            // Exact arc length for large turning angles.
            let mut rot = (r1 * f2 - r2 * f1).asin();
            if f1 * f1 + f2 * f2 > 1.0 && f1 * f2 < 0.0 {
                rot = if f2 > 0.0 { PI - rot } else { -PI - rot };
            }
            p[1] += tgl / crv * rot;
        }

        // Transport Jacobian F = I + dF.
        let r1_3 = r1 * r1 * r1;
        let cc = crv / self.params[4];
        let mut f = Matrix5::identity();
        f[(0, 2)] = dx / r1_3;
        f[(0, 4)] = 0.5 * dx * dx / r1_3 * cc;
        f[(1, 2)] = dx * tgl * f1 / r1_3;
        f[(1, 3)] = dx / r1;
        f[(1, 4)] = 0.5 * dx * dx * tgl * f1 / r1_3 * cc;
        f[(2, 4)] = dx * cc;

        self.cov = symmetrize(&(f * self.cov * f.transpose()));
        self.params = p;
        self.x = xk;
        true
    }

    /// Chi² of a 2-D `(y, z)` measurement with covariance `(syy, syz, szz)`
    /// against the current (predicted) state.
    pub fn predicted_chi2(&self, meas: [f64; 2], cov: [f64; 3]) -> f64 {
        let sdd = self.cov[(0, 0)] + cov[0];
        let sdz = self.cov[(0, 1)] + cov[1];
        let szz = self.cov[(1, 1)] + cov[2];
        let det = sdd * szz - sdz * sdz;
        if det.abs() < ALMOST0 {
            return VERY_BIG;
        }
        let d = self.params[0] - meas[0];
        let z = self.params[1] - meas[1];
        (d * szz * d - 2.0 * d * sdz * z + z * sdd * z) / det
    }

    /// Kalman update with a 2-D `(y, z)` measurement.
    ///
    /// Uses the Joseph form for the covariance. Returns `false` and leaves the
    /// state untouched if the innovation covariance is singular or the updated
    /// direction is unphysical.
    pub fn update(&mut self, meas: [f64; 2], cov: [f64; 3]) -> bool {
        let h = Projection::new(1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0);
        let r = Matrix2::new(cov[0], cov[1], cov[1], cov[2]);

        // Innovation covariance: S = H P H^T + R
        let s = h * self.cov * h.transpose() + r;
        let Some(chol) = s.cholesky() else {
            return false;
        };

        // Kalman gain: K = P H^T S^{-1}
        let k = chol.solve(&(h * self.cov)).transpose();

        let v = Vector2::new(meas[0] - self.params[0], meas[1] - self.params[1]);
        let params = self.params + k * v;
        if params[2].abs() >= ALMOST1 {
            return false;
        }

        let i_minus_kh = Matrix5::identity() - k * h;
        let cov = i_minus_kh * self.cov * i_minus_kh.transpose() + k * r * k.transpose();
        self.params = params;
        self.cov = symmetrize(&cov);
        true
    }

    /// Combine with an independent estimate at the same reference plane.
    ///
    /// Full 5-D weighted mean: the other state acts as a measurement of all
    /// parameters. Fails if the frames differ or the summed covariance is singular.
    pub fn fuse(&mut self, other: &TrackState) -> bool {
        if (self.x - other.x).abs() > 1e-6 || (self.alpha - other.alpha).abs() > 1e-9 {
            return false;
        }
        let s = self.cov + other.cov;
        let Some(chol) = s.cholesky() else {
            return false;
        };
        let k = chol.solve(&self.cov).transpose();
        let params = self.params + k * (other.params - self.params);
        if params[2].abs() >= ALMOST1 {
            return false;
        }
        let i_minus_k = Matrix5::identity() - k;
        let cov = i_minus_k * self.cov * i_minus_k.transpose() + k * other.cov * k.transpose();
        self.params = params;
        self.cov = symmetrize(&cov);
        true
    }

    /// Inflate the diagonal by `s2`, drop correlations and cap the variances.
    pub fn reset_covariance(&mut self, s2: f64) {
        let mut cov = Matrix5::zeros();
        for (i, max) in COV_DIAG_MAX.iter().enumerate() {
            let v = if s2 > 0.0 { self.cov[(i, i)] * s2 } else { *max };
            cov[(i, i)] = v.min(*max);
        }
        self.cov = cov;
    }

    /// Add the multiple-scattering noise of a layer with thickness `x_over_x0`.
    ///
    /// Returns `false` if the momentum is undefined.
    pub fn add_multiple_scattering(&mut self, x_over_x0: f64, mass: f64) -> bool {
        let (snp, tgl, q_pt) = (self.params[2], self.params[3], self.params[4]);
        if q_pt.abs() < ALMOST0 {
            return false;
        }
        let p2 = (1.0 + tgl * tgl) / (q_pt * q_pt);
        let beta2 = p2 / (p2 + mass * mass);
        let theta2 = 0.0136 * 0.0136 / (beta2 * p2) * x_over_x0.abs();
        let one_tgl2 = 1.0 + tgl * tgl;

        self.cov[(2, 2)] += theta2 * (1.0 - snp) * (1.0 + snp) * one_tgl2;
        self.cov[(3, 3)] += theta2 * one_tgl2 * one_tgl2;
        let c43 = theta2 * tgl * q_pt * one_tgl2;
        self.cov[(4, 3)] += c43;
        self.cov[(3, 4)] += c43;
        self.cov[(4, 4)] += theta2 * tgl * q_pt * tgl * q_pt;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn state(snp: f64, tgl: f64, q_pt: f64) -> TrackState {
        TrackState::new(
            10.0,
            0.3,
            Vector5::new(0.5, 2.0, snp, tgl, q_pt),
            Matrix5::from_diagonal(&Vector5::new(1e-2, 1e-2, 1e-4, 1e-4, 1e-3)),
        )
    }

    #[test]
    fn test_rotation_preserves_global_position() {
        let mut s = state(0.1, 0.4, 0.8);
        let before = s.global_position();
        assert!(s.rotate(0.45));
        let after = s.global_position();
        for i in 0..3 {
            assert_relative_eq!(before[i], after[i], epsilon = 1e-12);
        }
        assert!(s.rotate(0.3));
        assert_relative_eq!(s.x, 10.0, epsilon = 1e-12);
        assert_relative_eq!(s.y(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(s.snp(), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_rejects_backward_frame() {
        let mut s = state(0.0, 0.0, 1.0);
        assert!(!s.rotate(0.3 + 2.0));
        assert_eq!(s.alpha, 0.3);
    }

    #[test]
    fn test_straight_line_propagation() {
        let mut s = state(0.6, 0.5, 1.0);
        assert!(s.propagate_to(30.0, 0.0));
        // tan(phi) = 0.6 / 0.8
        assert_relative_eq!(s.y(), 0.5 + 20.0 * 0.75, epsilon = 1e-12);
        // path length in xy = 20 / cos(phi) = 25
        assert_relative_eq!(s.z(), 2.0 + 25.0 * 0.5, epsilon = 1e-12);
        assert_relative_eq!(s.snp(), 0.6, epsilon = 1e-15);
    }

    #[test]
    fn test_helix_propagation_is_reversible() {
        let orig = state(0.05, 0.3, 1.5);
        let mut s = orig.clone();
        assert!(s.propagate_to(120.0, 5.0));
        assert!(s.snp() != orig.snp());
        assert!(s.propagate_to(10.0, 5.0));
        for i in 0..5 {
            assert_relative_eq!(s.params[i], orig.params[i], epsilon = 1e-9);
        }
        assert!(s.cov.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_propagation_fails_for_tangential_track() {
        let mut s = state(0.95, 0.0, 2.0);
        let before = s.clone();
        // Curvature drives |snp| past one.
        assert!(!s.propagate_to(400.0, -5.0));
        assert_eq!(s, before);
    }

    #[test]
    fn test_update_pulls_towards_measurement_and_shrinks_variance() {
        let mut s = state(0.0, 0.0, 1.0);
        let chi2 = s.predicted_chi2([0.7, 2.0], [1e-2, 0.0, 1e-2]);
        // d = -0.2, variance 0.02
        assert_relative_eq!(chi2, 0.04 / 0.02, epsilon = 1e-12);
        assert!(s.update([0.7, 2.0], [1e-2, 0.0, 1e-2]));
        assert_relative_eq!(s.y(), 0.6, epsilon = 1e-12);
        assert_relative_eq!(s.sigma_y2(), 5e-3, epsilon = 1e-12);
        assert_relative_eq!(s.sigma_z2(), 5e-3, epsilon = 1e-12);
    }

    #[test]
    fn test_fuse_identical_covariances_averages() {
        let mut a = state(0.0, 0.1, 1.0);
        let mut b = a.clone();
        b.params[0] = 1.5;
        assert!(a.fuse(&b));
        assert_relative_eq!(a.y(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(a.sigma_y2(), 5e-3, epsilon = 1e-12);
    }

    #[test]
    fn test_fuse_requires_same_plane() {
        let mut a = state(0.0, 0.1, 1.0);
        let mut b = a.clone();
        b.x += 1.0;
        assert!(!a.fuse(&b));
    }

    #[test]
    fn test_reset_covariance_caps_diagonal() {
        let mut s = state(0.0, 0.0, 1.0);
        s.cov[(0, 1)] = 1e-3;
        s.cov[(1, 0)] = 1e-3;
        s.reset_covariance(1000.0);
        assert_relative_eq!(s.cov[(0, 0)], 10.0);
        assert_relative_eq!(s.cov[(2, 2)], 0.1);
        assert_eq!(s.cov[(0, 1)], 0.0);
        s.reset_covariance(1e6);
        assert_eq!(s.cov[(0, 0)], 100.0);
        assert_eq!(s.cov[(3, 3)], 1.0);
    }

    #[test]
    fn test_global_to_local_inverse_of_global_position() {
        let s = state(0.0, 0.0, 1.0);
        let g = s.global_position();
        let l = global_to_local(&g, s.alpha);
        assert_relative_eq!(l[0], s.x, epsilon = 1e-12);
        assert_relative_eq!(l[1], s.y(), epsilon = 1e-12);
    }
}
