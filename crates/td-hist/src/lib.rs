//! # td-hist
//!
//! Residual accumulation and distortion-map extraction.
//!
//! - [`Axis`]: uniform binning with lower-edge-inclusive lookup
//! - [`ResidualHistogram`]: sparse 5-D counter over (q/pT, sector, R, kZ, residual)
//! - [`HistogramSet`]: the six accumulators of a pass, keyed by [`HistogramKind`]
//! - [`DistortionMapBuilder`]: per-bin residual statistics and Gaussian fits

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accumulator;
pub mod axis;
pub mod config;
pub mod distortion;
pub mod set;

pub use accumulator::{AXIS_NAMES, N_DIM, RESIDUAL_AXIS, ResidualHistogram, ResidualSample};
pub use axis::Axis;
pub use config::{
    HistogramKind, HistogramSetConfig, ReferenceCombination, ResidualComponent, ResidualOverride,
};
pub use distortion::{
    BinSummary, DistortionMap, DistortionMapBuilder, GaussFit, MapEntry, ProjectionDim,
    ProjectionPlan,
};
pub use set::HistogramSet;
