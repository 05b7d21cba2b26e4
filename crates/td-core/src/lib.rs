//! # td-core
//!
//! Core types for space-point distortion calibration.
//!
//! This crate provides:
//! - the shared [`Error`] type and [`Result`] alias
//! - the detector data model (layers, space points, reference-detector clusters,
//!   event and track inputs)
//! - [`TrackState`], the local helix parametrisation with its rotation,
//!   propagation and Kalman-update math
//! - collaborator traits consumed by the refit and interpolation stages
//!
//! ## Architecture
//!
//! Higher crates (`td-refit`, `td-calib`) talk to field maps, cluster
//! transformations and event readers only through the traits in [`traits`],
//! so the calibration core never depends on a concrete conditions source.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod track;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use track::{Matrix5, TrackState, Vector5, global_to_local};
pub use traits::{
    ClusterTransform, EventSource, FieldGeometry, IdentityTransform, LocalFrame,
    PropagationOptions, TransformParams, VecSource,
};
pub use types::{
    DetectorLayer, EventInput, ROC_COUNT, ReferenceCluster, ResolutionClass, SpacePoint,
    TrackInput,
};
