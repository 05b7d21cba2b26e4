//! # td-refit
//!
//! Track refits through the calibrated outer subsystems.
//!
//! - [`sort_by_radius`] orders a track's space points radially
//! - [`UniformField`] propagates track states through a uniform solenoidal field
//! - [`SubsystemRefitter`] refits a seed through one subsystem's points

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod field;
pub mod refit;
pub mod sort;

pub use field::UniformField;
pub use refit::{LayerSigma, RefitConfig, RefitDirection, RefitResult, SubsystemRefitter};
pub use sort::{SortedIndex, sort_by_radius};
