//! Shared types used across every gridlight crate.
//!
//! # Invariants
//! - Handles and ids are plain indices; they never own the data they name.
//! - Colors are stored linear; sRGB only appears at parse and display time.

mod types;

pub use types::{Color, ColorParseError, GeometryHandle, InstanceId, Transform};

pub fn crate_info() -> &'static str {
    "gridlight-common v0.1.0"
}
