//! # td-calib
//!
//! Interpolation of refitted outer-subsystem tracks to the reference detector
//! and accumulation of the resulting residuals into distortion maps.
//!
//! ## Flow
//!
//! ```text
//! EventSource -> InterpolationEngine -> records -> Persistence
//!                                    -> HistogramSet -> DistortionMapBuilder -> maps
//! ```
//!
//! - [`InterpolationEngine`] refits each track through the inner, transition
//!   and timing subsystems and carries the fits to every reference-detector layer
//! - [`records`] holds the persisted `eventInfo`, `delta` and `interpolation` rows
//! - [`store`] provides the [`Persistence`] trait with in-memory and JSON stores
//! - [`pipeline`] drives sequential and rayon-parallel passes and builds maps
//! - [`replay`] rebuilds accumulators from persisted residual rows

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod layer;
pub mod pipeline;
pub mod records;
pub mod replay;
pub mod residual;
pub mod store;

pub use config::{EngineConfig, GateConfig, OutputMode, RefitPresets};
pub use engine::{
    EngineBuilder, EventOutput, InterpolationEngine, RejectReason, TrackFits, TrackInterpolation,
    TrackOutcome,
};
pub use layer::{Estimate, LayerRecord};
pub use pipeline::{
    CalibrationPass, PassStats, build_distortion_maps, build_maps, fill_parallel,
    process_events_parallel,
};
pub use records::{
    EventSummary, InterpolationDebugRecord, LayerResidual, Record, Schema, SubsystemFit,
    TrackResidualRecord, quantize,
};
pub use replay::fill_histograms_from_records;
pub use residual::{fill_track, sample_at, sector_coordinate, sector_local_x};
pub use store::{JsonStore, MemoryStore, Persistence};
