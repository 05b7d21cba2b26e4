//! Per-bin residual summaries: the distortion map.
//!
//! For every spatial key the residual axis of an accumulated histogram is
//! projected out and summarised by its moments, its median and a binned
//! Gaussian fit. Keys without entries carry `None`.

use std::collections::BTreeMap;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use td_core::{Error, Result};

use crate::accumulator::{AXIS_NAMES, N_DIM, RESIDUAL_AXIS, ResidualHistogram};
use crate::axis::Axis;

/// Treatment of one non-residual axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionDim {
    /// Histogram axis.
    pub axis: usize,
    /// Neighbouring bins merged on each side of a key bin.
    pub group: usize,
    /// Key sampling step in bins; `0` integrates the axis.
    pub step: usize,
}

/// Which axis is projected and how the others form the output key.
///
/// Axes not listed are integrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionPlan {
    /// Axis summarised per key.
    pub residual_axis: usize,
    /// Per-axis treatment; keyed dimensions appear in the key in this order.
    pub dims: Vec<ProjectionDim>,
}

impl Default for ProjectionPlan {
    fn default() -> Self {
        Self {
            residual_axis: RESIDUAL_AXIS,
            dims: vec![
                ProjectionDim { axis: 0, group: 0, step: 0 },
                ProjectionDim { axis: 1, group: 0, step: 1 },
                ProjectionDim { axis: 2, group: 0, step: 1 },
                ProjectionDim { axis: 3, group: 0, step: 1 },
            ],
        }
    }
}

impl ProjectionPlan {
    /// Reject out-of-range or repeated axes.
    pub fn validate(&self) -> Result<()> {
        if self.residual_axis >= N_DIM {
            return Err(Error::Validation(format!("residual axis {} out of range", self.residual_axis)));
        }
        let mut seen = [false; N_DIM];
        seen[self.residual_axis] = true;
        for d in &self.dims {
            if d.axis >= N_DIM {
                return Err(Error::Validation(format!("projection axis {} out of range", d.axis)));
            }
            if seen[d.axis] {
                return Err(Error::Validation(format!("axis {} used twice in projection", d.axis)));
            }
            seen[d.axis] = true;
        }
        Ok(())
    }

    fn key_dims(&self) -> Vec<ProjectionDim> {
        self.dims.iter().copied().filter(|d| d.step > 0).collect()
    }
}

/// Binned Gaussian fit of a residual projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussFit {
    /// Peak height (counts).
    pub amplitude: f64,
    /// Fitted mean.
    pub mean: f64,
    /// Fitted width.
    pub sigma: f64,
    /// Chi² per degree of freedom.
    pub chi2_ndf: f64,
    /// Degrees of freedom.
    pub ndf: usize,
    /// Chi² probability of the fit.
    pub probability: f64,
}

/// Residual statistics of one key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinSummary {
    /// Entries in the projection.
    pub entries: u64,
    /// Mean.
    pub mean: f64,
    /// Root mean square about the mean.
    pub rms: f64,
    /// Median, interpolated inside the median bin.
    pub median: f64,
    /// Gaussian fit, when the projection supports one.
    pub gauss: Option<GaussFit>,
    /// Fit and moments agree well enough to use the bin.
    pub ok: bool,
}

/// One key of a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEntry {
    /// Bin index per keyed axis.
    pub bins: Vec<usize>,
    /// Bin centre per keyed axis.
    pub centers: Vec<f64>,
    /// Statistics; `None` when the key has no entries.
    pub summary: Option<BinSummary>,
}

/// Distortion map derived from one accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistortionMap {
    /// Name of the source histogram.
    pub name: String,
    /// Names of the keyed axes.
    pub key_axes: Vec<String>,
    /// Name of the summarised axis.
    pub residual_axis: String,
    /// One entry per key, in row-major key order.
    pub entries: Vec<MapEntry>,
}

impl DistortionMap {
    /// Entry at the given key bins.
    pub fn get(&self, bins: &[usize]) -> Option<&MapEntry> {
        self.entries.iter().find(|e| e.bins == bins)
    }

    /// Number of keys carrying data.
    pub fn filled(&self) -> usize {
        self.entries.iter().filter(|e| e.summary.is_some()).count()
    }
}

/// Builds [`DistortionMap`]s from residual histograms.
#[derive(Debug, Clone)]
pub struct DistortionMapBuilder {
    plan: ProjectionPlan,
    /// Minimum projection entries before a Gaussian fit is attempted.
    pub min_fit_entries: u64,
    /// Levenberg–Marquardt iteration limit.
    pub max_iterations: usize,
}

impl Default for DistortionMapBuilder {
    fn default() -> Self {
        Self { plan: ProjectionPlan::default(), min_fit_entries: 10, max_iterations: 100 }
    }
}

impl DistortionMapBuilder {
    /// Builder with a validated plan.
    pub fn new(plan: ProjectionPlan) -> Result<Self> {
        plan.validate()?;
        Ok(Self { plan, ..Self::default() })
    }

    /// Projection plan in use.
    pub fn plan(&self) -> &ProjectionPlan {
        &self.plan
    }

    /// Summarise every key of `hist`.
    pub fn build(&self, hist: &ResidualHistogram) -> DistortionMap {
        let axes = hist.axes();
        let key_dims = self.plan.key_dims();
        let raxis = axes[self.plan.residual_axis];

        let mut projections: BTreeMap<Vec<usize>, Vec<u64>> = BTreeMap::new();
        for (idx, n) in hist.iter() {
            let choices: Vec<Vec<usize>> = key_dims
                .iter()
                .map(|d| {
                    let last = axes[d.axis].n_bins - 1;
                    let i = idx[d.axis];
                    let lo = i.saturating_sub(d.group);
                    let hi = (i + d.group).min(last);
                    (lo..=hi).filter(|c| c % d.step == 0).collect()
                })
                .collect();
            for key in cartesian(&choices) {
                projections.entry(key).or_insert_with(|| vec![0; raxis.n_bins])
                    [idx[self.plan.residual_axis]] += n;
            }
        }

        let grids: Vec<Vec<usize>> = key_dims
            .iter()
            .map(|d| (0..axes[d.axis].n_bins).step_by(d.step).collect())
            .collect();
        let entries = cartesian(&grids)
            .into_iter()
            .map(|bins| {
                let centers =
                    bins.iter().zip(&key_dims).map(|(&b, d)| axes[d.axis].bin_center(b)).collect();
                let summary = projections.get(&bins).and_then(|c| self.summarize(&raxis, c));
                MapEntry { bins, centers, summary }
            })
            .collect();

        DistortionMap {
            name: hist.name().to_string(),
            key_axes: key_dims.iter().map(|d| AXIS_NAMES[d.axis].to_string()).collect(),
            residual_axis: AXIS_NAMES[self.plan.residual_axis].to_string(),
            entries,
        }
    }

    /// Statistics of a 1-D projection; `None` when it is empty.
    pub fn summarize(&self, axis: &Axis, counts: &[u64]) -> Option<BinSummary> {
        let entries: u64 = counts.iter().sum();
        if entries == 0 {
            return None;
        }
        let n = entries as f64;
        let mean = counts
            .iter()
            .enumerate()
            .map(|(i, &c)| c as f64 * axis.bin_center(i))
            .sum::<f64>()
            / n;
        let var = counts
            .iter()
            .enumerate()
            .map(|(i, &c)| c as f64 * (axis.bin_center(i) - mean).powi(2))
            .sum::<f64>()
            / n;
        let rms = var.max(0.0).sqrt();
        let median = median(axis, counts, n);

        let gauss = if entries >= self.min_fit_entries {
            self.fit_gauss(axis, counts, mean, rms)
        } else {
            None
        };
        let ok = rms > 0.0
            && gauss.is_some_and(|g| {
                (mean - g.mean).abs() < 2.0
                    && g.chi2_ndf > 0.0
                    && g.sigma < 2.0
                    && g.sigma / rms < 2.0
            });
        Some(BinSummary { entries, mean, rms, median, gauss, ok })
    }

    /// Levenberg–Marquardt fit of `A exp(-(x-mu)²/2s²)` with Neyman weights.
    fn fit_gauss(&self, axis: &Axis, counts: &[u64], mean: f64, rms: f64) -> Option<GaussFit> {
        if counts.iter().filter(|&&c| c > 0).count() < 3 || counts.len() <= 3 {
            return None;
        }
        let xs: Vec<f64> = (0..counts.len()).map(|i| axis.bin_center(i)).collect();
        let ys: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
        let ws: Vec<f64> = ys.iter().map(|&y| 1.0 / y.max(1.0)).collect();

        let chi2_of = |p: &Vector3<f64>| -> f64 {
            xs.iter()
                .zip(&ys)
                .zip(&ws)
                .map(|((&x, &y), &w)| {
                    let r = y - gauss(p, x);
                    w * r * r
                })
                .sum()
        };

        let amp0 = ys.iter().copied().fold(0.0, f64::max);
        let mut p = Vector3::new(amp0, mean, rms.max(0.5 * axis.bin_width()));
        let mut chi2 = chi2_of(&p);
        let mut lambda = 1e-3;

        for _ in 0..self.max_iterations {
            let mut h = Matrix3::<f64>::zeros();
            let mut g = Vector3::<f64>::zeros();
            for ((&x, &y), &w) in xs.iter().zip(&ys).zip(&ws) {
                let (a, mu, s) = (p[0], p[1], p[2]);
                let e = (-0.5 * ((x - mu) / s).powi(2)).exp();
                let j = Vector3::new(e, a * e * (x - mu) / (s * s), a * e * (x - mu).powi(2) / (s * s * s));
                let r = y - a * e;
                h += w * j * j.transpose();
                g += w * r * j;
            }

            let mut improved = false;
            while lambda < 1e10 {
                let mut damped = h;
                for k in 0..3 {
                    damped[(k, k)] *= 1.0 + lambda;
                }
                let Some(step) = damped.cholesky().map(|c| c.solve(&g)) else {
                    lambda *= 10.0;
                    continue;
                };
                let mut trial = p + step;
                trial[2] = trial[2].abs();
                let trial_chi2 = chi2_of(&trial);
                if trial_chi2.is_finite() && trial[2] > 0.0 && trial_chi2 <= chi2 {
                    let converged = chi2 - trial_chi2 <= 1e-10 * chi2.max(1e-300);
                    p = trial;
                    chi2 = trial_chi2;
                    lambda = (lambda * 0.1).max(1e-12);
                    improved = !converged;
                    break;
                }
                lambda *= 10.0;
            }
            if !improved {
                break;
            }
        }

        if !(p.iter().all(|v| v.is_finite()) && p[2] > 0.0) {
            return None;
        }
        let ndf = counts.len() - 3;
        let probability = ChiSquared::new(ndf as f64).map(|d| d.sf(chi2)).unwrap_or(0.0);
        Some(GaussFit {
            amplitude: p[0],
            mean: p[1],
            sigma: p[2],
            chi2_ndf: chi2 / ndf as f64,
            ndf,
            probability,
        })
    }
}

#[inline]
fn gauss(p: &Vector3<f64>, x: f64) -> f64 {
    p[0] * (-0.5 * ((x - p[1]) / p[2]).powi(2)).exp()
}

fn median(axis: &Axis, counts: &[u64], n: f64) -> f64 {
    let half = 0.5 * n;
    let mut cum = 0.0;
    for (i, &c) in counts.iter().enumerate() {
        let c = c as f64;
        if c > 0.0 && cum + c >= half {
            return axis.lower_edge(i) + axis.bin_width() * (half - cum) / c;
        }
        cum += c;
    }
    axis.high
}

/// All index tuples picking one value from each list.
fn cartesian(lists: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut out: Vec<Vec<usize>> = vec![Vec::with_capacity(lists.len())];
    for list in lists {
        out = out
            .into_iter()
            .flat_map(|prefix| {
                list.iter().map(move |&v| {
                    let mut next = prefix.clone();
                    next.push(v);
                    next
                })
            })
            .collect();
    }
    out
}
