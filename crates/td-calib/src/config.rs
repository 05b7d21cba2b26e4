//! Engine configuration.
//!
//! Every calibrated constant of the interpolation pass lives here with its
//! default. Configurations load from (partial) JSON documents.

use std::path::Path;

use serde::{Deserialize, Serialize};
use td_core::{Error, PropagationOptions, Result, TrackState, TransformParams};
use td_hist::HistogramSetConfig;
use td_refit::RefitConfig;

/// Consistency gate between a fused estimate and the inner-only estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Largest accepted chi²; equality passes.
    pub max_chi2: f64,
    /// Variance added to the denominator for unmodelled misalignment (cm²).
    pub align_tolerance: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { max_chi2: 10.0, align_tolerance: 0.1 }
    }
}

impl GateConfig {
    /// Local-y disagreement chi² of `fused` against `inner`.
    pub fn chi2(&self, fused: &TrackState, inner: &TrackState) -> f64 {
        let d = fused.y() - inner.y();
        d * d / (fused.sigma_y2() + inner.sigma_y2() + self.align_tolerance)
    }

    /// Whether `chi2` passes the gate.
    pub fn accepts(&self, chi2: f64) -> bool {
        chi2 <= self.max_chi2
    }
}

/// Where results go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputMode {
    /// Emit per-event and per-track records for persistence.
    pub records: bool,
    /// Fill the residual accumulators directly.
    pub on_the_fly: bool,
}

impl Default for OutputMode {
    fn default() -> Self {
        Self { records: true, on_the_fly: true }
    }
}

/// The three subsystem refits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefitPresets {
    /// Inner-subsystem refit.
    pub inner: RefitConfig,
    /// Transition-subsystem refit.
    pub transition: RefitConfig,
    /// Timing-subsystem refit.
    pub timing: RefitConfig,
}

impl Default for RefitPresets {
    fn default() -> Self {
        Self {
            inner: RefitConfig::inner(),
            transition: RefitConfig::transition(),
            timing: RefitConfig::timing(),
        }
    }
}

/// Configuration of the interpolation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reference-detector layers (pad rows) a track may carry clusters on.
    pub n_layers: usize,
    /// Inner-subsystem clusters required by the track pre-selection.
    pub min_inner_clusters: usize,
    /// Points the inner refit must use.
    pub min_inner_points: usize,
    /// Points all three refits must use together.
    pub min_total_points: usize,
    /// Fused-estimate consistency gate.
    pub gate: GateConfig,
    /// Residual quantisation step (cm).
    pub residual_quantum: f64,
    /// Cluster transformation toggles.
    pub transform: TransformParams,
    /// Outputs to produce.
    pub output: OutputMode,
    /// Emit full per-layer debug records for every n-th track of an event.
    ///
    /// Only effective with [`OutputMode::records`].
    pub debug_every: Option<u64>,
    /// Propagation options for the per-layer interpolation.
    pub layer_propagation: PropagationOptions,
    /// Subsystem refits.
    pub refit: RefitPresets,
    /// Residual accumulators.
    pub histograms: HistogramSetConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            n_layers: 159,
            min_inner_clusters: 4,
            min_inner_points: 4,
            min_total_points: 5,
            gate: GateConfig::default(),
            residual_quantum: 1.0 / 200.0,
            transform: TransformParams { use_composed_correction: false },
            output: OutputMode::default(),
            debug_every: None,
            layer_propagation: PropagationOptions::default(),
            refit: RefitPresets::default(),
            histograms: HistogramSetConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if self.n_layers == 0 {
            return Err(Error::Validation("n_layers must be positive".into()));
        }
        if !(self.residual_quantum.is_finite() && self.residual_quantum > 0.0) {
            return Err(Error::Validation(format!(
                "residual_quantum must be positive, got {}",
                self.residual_quantum
            )));
        }
        if !(self.gate.max_chi2 >= 0.0 && self.gate.align_tolerance >= 0.0) {
            return Err(Error::Validation("gate thresholds must be non-negative".into()));
        }
        if self.debug_every == Some(0) {
            return Err(Error::Validation("debug_every must be at least 1".into()));
        }
        if self.refit.inner.min_points < self.min_inner_points {
            log::warn!(
                "inner refit accepts {} points but the engine requires {}",
                self.refit.inner.min_points,
                self.min_inner_points
            );
        }
        self.histograms.validate()
    }
}
