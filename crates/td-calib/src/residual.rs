//! Turning residual rows into accumulator samples.

use std::f64::consts::PI;

use td_hist::{HistogramSet, ResidualSample};

use crate::records::{LayerResidual, TrackResidualRecord};

/// Sector coordinate of azimuth `phi`, in `[0, 18)`.
pub fn sector_coordinate(phi: f64) -> f64 {
    let s = 9.0 * phi / PI;
    if s < 0.0 { s + 18.0 } else { s }
}

/// Radius of `(r, phi)` projected on the centre line of its sector.
pub fn sector_local_x(r: f64, phi: f64) -> f64 {
    let centre = PI * (sector_coordinate(phi).floor() + 0.5) / 9.0;
    (phi - centre).cos() * r
}

/// Sample of one residual at `layer` for a track with `curvature`.
///
/// The radius axis holds the sector-frame local X, which also scales the dip.
pub fn sample_at(curvature: f64, layer: &LayerResidual, residual: f64) -> ResidualSample {
    let local_x = sector_local_x(layer.r, layer.phi);
    ResidualSample {
        curvature,
        sector: sector_coordinate(layer.phi),
        radius: local_x,
        dip: layer.z / local_x,
        residual,
    }
}

/// Fill every accumulator of `set` from `record`; returns the accepted fills.
///
/// Missing residuals and residuals quantised to exactly zero are not filled.
pub fn fill_track(set: &mut HistogramSet, record: &TrackResidualRecord) -> usize {
    let kinds: Vec<_> = set.kinds().collect();
    let mut filled = 0;
    for layer in &record.layers {
        for &kind in &kinds {
            let Some(residual) = layer.residual(kind) else {
                continue;
            };
            if residual == 0.0 {
                continue;
            }
            if set.fill(kind, &sample_at(record.curvature, layer, residual)) {
                filled += 1;
            }
        }
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use td_hist::{HistogramKind, HistogramSetConfig};

    use crate::records::SubsystemFit;

    fn layer(phi: f64, inner: Option<[f64; 2]>, timing: Option<[f64; 2]>) -> LayerResidual {
        LayerResidual {
            row: 5,
            roc: 1,
            r: 120.0,
            phi,
            z: 24.0,
            inner,
            inner_transition: None,
            inner_timing: timing,
        }
    }

    #[test]
    fn test_sector_coordinate_wraps_negative_azimuth() {
        assert_relative_eq!(sector_coordinate(PI / 18.0), 0.5, epsilon = 1e-12);
        assert_relative_eq!(sector_coordinate(-PI / 18.0), 17.5, epsilon = 1e-12);
        assert_eq!(sector_coordinate(0.0), 0.0);
    }

    #[test]
    fn test_local_x_uses_sector_centre() {
        // On the sector centre the projection is the radius itself.
        assert_relative_eq!(sector_local_x(100.0, PI / 18.0), 100.0, epsilon = 1e-12);
        assert_relative_eq!(sector_local_x(100.0, -PI / 18.0), 100.0, epsilon = 1e-12);
        assert_relative_eq!(sector_local_x(100.0, 0.0), 100.0 * (PI / 18.0).cos(), epsilon = 1e-12);
    }

    fn record(layers: Vec<LayerResidual>) -> TrackResidualRecord {
        TrackResidualRecord {
            event_id: 1,
            timestamp: 0,
            n_tracks: 1,
            n_primary_contributors: 3,
            track_index: 0,
            inner: SubsystemFit { chi2: 1.0, n_points: 6, ok: true },
            transition: SubsystemFit { chi2: 0.0, n_points: 0, ok: false },
            timing: SubsystemFit { chi2: 0.2, n_points: 1, ok: true },
            timing_difference: None,
            curvature: 0.4,
            layers,
        }
    }

    #[test]
    fn test_sample_uses_sector_frame_radius() {
        let l = layer(0.0, Some([0.01, 0.02]), None);
        let s = sample_at(0.4, &l, 0.01);
        let local_x = 120.0 * (PI / 18.0).cos();
        assert_relative_eq!(s.radius, local_x, epsilon = 1e-12);
        assert_relative_eq!(s.dip, 24.0 / local_x, epsilon = 1e-12);
        assert_eq!(s.sector, 0.0);
    }

    #[test]
    fn test_fill_track_skips_missing_combinations() {
        let mut set = HistogramSet::new(&HistogramSetConfig::default()).unwrap();
        let record = record(vec![
            layer(0.2, Some([0.01, -0.02]), Some([0.015, 0.0])),
            layer(0.2, Some([0.01, 5.0]), None),
        ]);
        // Two layers x two inner kinds + one timing dy, minus one dz out of range.
        assert_eq!(fill_track(&mut set, &record), 4);
        assert_eq!(set.get(HistogramKind::ALL[0]).unwrap().entries(), 2);
        assert_eq!(set.get(HistogramKind::ALL[3]).unwrap().entries(), 1);
        assert_eq!(set.get(HistogramKind::ALL[3]).unwrap().dropped(), 1);
        assert!(set.get(HistogramKind::ALL[1]).unwrap().is_empty());
        assert_eq!(set.get(HistogramKind::ALL[2]).unwrap().entries(), 1);
        assert!(set.get(HistogramKind::ALL[5]).unwrap().is_empty());
    }

    #[test]
    fn test_zero_residuals_are_not_filled() {
        let mut set = HistogramSet::new(&HistogramSetConfig::default()).unwrap();
        let record = record(vec![
            layer(0.2, Some([0.0, 0.0]), None),
            layer(0.2, Some([-0.0, 0.005]), None),
        ]);
        assert_eq!(fill_track(&mut set, &record), 1);
        assert!(set.get(HistogramKind::ALL[0]).unwrap().is_empty());
        assert_eq!(set.get(HistogramKind::ALL[3]).unwrap().entries(), 1);
        assert_eq!(set.get(HistogramKind::ALL[3]).unwrap().dropped(), 0);
    }
}
