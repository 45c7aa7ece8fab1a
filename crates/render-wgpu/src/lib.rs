//! wgpu render backend for gridlight.
//!
//! Renders the instanced grid over a reflective floor lit by a hemisphere
//! light and a shadow-casting spot light, then runs bloom and depth of field
//! and tone maps onto the window surface.
//!
//! # Invariants
//! - Renderer never mutates the scene.
//! - Offscreen targets are created at setup and on resize only.
//! - A failing offscreen pass degrades the frame, never aborts it.

mod context;
mod gpu;
mod mesh;
mod shaders;
mod targets;
mod uniforms;

pub use context::GpuContext;
pub use gpu::{GpuFrame, WgpuRenderer};
pub use targets::{bloom_mip_sizes, dof_size, internal_size, reflection_size};
