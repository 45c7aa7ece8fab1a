//! Instancing: one shared geometry definition, many per-instance transforms.
//!
//! Geometry lives in a table indexed by [`GeometryHandle`]; each instance is a
//! small record pointing into it. Instances are grouped per handle into draw
//! batches so the renderer submits one draw per geometry.
//!
//! # Invariants
//! - Instance ids are never reused or renumbered within a session.
//! - Mutating one instance never touches another.
//! - Every mutation is recorded as an [`InstanceEvent`].
//!
//! [`GeometryHandle`]: gridlight_common::GeometryHandle

mod interaction;
mod registry;

pub use interaction::Interaction;
pub use registry::{DrawBatch, InstanceDraw, InstanceEvent, InstanceRegistry, RegistryError};

pub fn crate_info() -> &'static str {
    "gridlight-instances v0.1.0"
}
