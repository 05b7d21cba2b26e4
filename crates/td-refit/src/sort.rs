//! Radial ordering of a track's space points.

use td_core::{Error, Result, SpacePoint};

/// Permutation of point indices with non-decreasing radius.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedIndex(Vec<usize>);

impl SortedIndex {
    /// Indices, innermost first.
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false` for an index produced by [`sort_by_radius`].
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Points in increasing radius.
    pub fn outward<'a>(&'a self, points: &'a [SpacePoint]) -> impl Iterator<Item = &'a SpacePoint> {
        self.0.iter().map(move |&i| &points[i])
    }

    /// Points in decreasing radius.
    pub fn inward<'a>(&'a self, points: &'a [SpacePoint]) -> impl Iterator<Item = &'a SpacePoint> {
        self.0.iter().rev().map(move |&i| &points[i])
    }
}

/// Order `points` by transverse radius.
///
/// Stable: points at equal radius keep their input order. Fails only on an
/// empty input.
pub fn sort_by_radius(points: &[SpacePoint]) -> Result<SortedIndex> {
    if points.is_empty() {
        return Err(Error::EmptyInput("no space points to sort".into()));
    }
    let radii: Vec<f64> = points.iter().map(SpacePoint::radius).collect();
    let mut idx: Vec<usize> = (0..points.len()).collect();
    idx.sort_by(|&a, &b| radii[a].total_cmp(&radii[b]));
    Ok(SortedIndex(idx))
}
