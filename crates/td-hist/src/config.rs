//! Binning configuration of the six residual accumulators.

use serde::{Deserialize, Serialize};
use td_core::{Error, Result};

use crate::accumulator::N_DIM;
use crate::axis::Axis;

/// Local coordinate a residual is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResidualComponent {
    /// Local y (r·φ direction).
    Y,
    /// z.
    Z,
}

/// Track estimate the reference-detector cluster is compared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReferenceCombination {
    /// Inner-subsystem refit alone.
    Inner,
    /// Inner refit fused with the transition refit.
    InnerTransition,
    /// Inner refit fused with the timing refit.
    InnerTiming,
}

impl ReferenceCombination {
    /// All combinations.
    pub const ALL: [ReferenceCombination; 3] = [
        ReferenceCombination::Inner,
        ReferenceCombination::InnerTransition,
        ReferenceCombination::InnerTiming,
    ];
}

/// Identity of one accumulator: residual component × reference combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HistogramKind {
    /// Residual component.
    pub component: ResidualComponent,
    /// Reference combination.
    pub combination: ReferenceCombination,
}

impl HistogramKind {
    /// The six accumulators in canonical order (y first).
    pub const ALL: [HistogramKind; 6] = [
        HistogramKind::new(ResidualComponent::Y, ReferenceCombination::Inner),
        HistogramKind::new(ResidualComponent::Y, ReferenceCombination::InnerTransition),
        HistogramKind::new(ResidualComponent::Y, ReferenceCombination::InnerTiming),
        HistogramKind::new(ResidualComponent::Z, ReferenceCombination::Inner),
        HistogramKind::new(ResidualComponent::Z, ReferenceCombination::InnerTransition),
        HistogramKind::new(ResidualComponent::Z, ReferenceCombination::InnerTiming),
    ];

    /// Kind from its parts.
    pub const fn new(component: ResidualComponent, combination: ReferenceCombination) -> Self {
        Self { component, combination }
    }

    /// Storage name, e.g. `delta_z_inner_transition`.
    pub fn name(&self) -> &'static str {
        use ReferenceCombination::*;
        use ResidualComponent::*;
        match (self.component, self.combination) {
            (Y, Inner) => "delta_y_inner",
            (Y, InnerTransition) => "delta_y_inner_transition",
            (Y, InnerTiming) => "delta_y_inner_timing",
            (Z, Inner) => "delta_z_inner",
            (Z, InnerTransition) => "delta_z_inner_transition",
            (Z, InnerTiming) => "delta_z_inner_timing",
        }
    }

    /// Kind from its storage name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

/// Residual-axis override for one accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResidualOverride {
    /// Accumulator the override applies to.
    pub kind: HistogramKind,
    /// Residual axis to use instead of the derived one.
    pub axis: Axis,
}

/// Binning of the accumulator set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramSetConfig {
    /// q/pT axis.
    pub curvature: Axis,
    /// Sector axis.
    pub sector: Axis,
    /// Radius axis.
    pub radius: Axis,
    /// Dip axis of the fused combinations.
    pub dip: Axis,
    /// Dip axis of the inner-only accumulators.
    pub dip_inner: Axis,
    /// Half-range of the y residual axis (cm).
    pub dy: f64,
    /// Half-range of the z residual axis (cm).
    pub dz: f64,
    /// Residual bins of the inner-only accumulators.
    pub inner_residual_bins: usize,
    /// Upper bound on the residual bins of the fused accumulators.
    pub max_residual_bins: usize,
    /// Explicit residual axes replacing the derived ones.
    pub residual_overrides: Vec<ResidualOverride>,
    /// Accumulators to create.
    pub enabled: Vec<HistogramKind>,
}

impl Default for HistogramSetConfig {
    fn default() -> Self {
        Self {
            curvature: Axis { n_bins: 5, low: -2.5, high: 2.5 },
            sector: Axis { n_bins: 180, low: 0.0, high: 18.0 },
            radius: Axis { n_bins: 53, low: 85.0, high: 245.0 },
            dip: Axis { n_bins: 20, low: -1.0, high: 1.0 },
            dip_inner: Axis { n_bins: 20, low: -1.8, high: 1.8 },
            dy: 1.0,
            dz: 1.0,
            inner_residual_bins: 100,
            max_residual_bins: 120,
            residual_overrides: Vec::new(),
            enabled: HistogramKind::ALL.to_vec(),
        }
    }
}

impl HistogramSetConfig {
    /// Configuration with residual half-ranges `dy`, `dz`, restricted to `enabled`.
    pub fn with_ranges(dy: f64, dz: f64, enabled: &[HistogramKind]) -> Self {
        Self { dy, dz, enabled: enabled.to_vec(), ..Self::default() }
    }

    /// Residual bins of a fused accumulator with half-range `d`.
    pub fn fused_residual_bins(&self, d: f64) -> usize {
        ((20.0 + 2.0 * d / 0.05) as usize).min(self.max_residual_bins)
    }

    /// The five axes of accumulator `kind`.
    pub fn axes_for(&self, kind: HistogramKind) -> [Axis; N_DIM] {
        let inner = kind.combination == ReferenceCombination::Inner;
        let d = match kind.component {
            ResidualComponent::Y => self.dy,
            ResidualComponent::Z => self.dz,
        };
        let derived = Axis {
            n_bins: if inner { self.inner_residual_bins } else { self.fused_residual_bins(d) },
            low: -d,
            high: d,
        };
        let residual = self
            .residual_overrides
            .iter()
            .rev()
            .find(|o| o.kind == kind)
            .map_or(derived, |o| o.axis);
        let dip = if inner { self.dip_inner } else { self.dip };
        [self.curvature, self.sector, self.radius, dip, residual]
    }

    /// Check every enabled accumulator has a usable binning.
    pub fn validate(&self) -> Result<()> {
        if !(self.dy > 0.0 && self.dz > 0.0) {
            return Err(Error::Validation(format!(
                "residual half-ranges must be positive (dy={}, dz={})",
                self.dy, self.dz
            )));
        }
        for kind in &self.enabled {
            for axis in self.axes_for(*kind) {
                axis.validate().map_err(|e| {
                    Error::Validation(format!("accumulator '{}': {e}", kind.name()))
                })?;
            }
        }
        Ok(())
    }
}
