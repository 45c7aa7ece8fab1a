//! Grid layout: world-space placements for an R×C grid of objects.
//!
//! # Invariants
//! - Exactly `rows * columns` placements, ordered by (row, column).
//! - The centroid of every placement's (x, y) is the origin.
//! - Pure: the same spec always yields the same placements.

mod grid;

pub use grid::{GridSpec, LayoutError, Placement, compute_grid};

pub fn crate_info() -> &'static str {
    "gridlight-layout v0.1.0"
}
