//! Input collaborator: normalized pointer, viewport size, desktop actions.
//!
//! # Invariants
//! - Pointer coordinates handed to the core are always clamped to [-1, 1].
//! - The core polls; nothing here pushes into the render loop.

pub mod action;
mod pointer;

pub use action::Action;
pub use pointer::{InputFrame, InputSource, PointerState, PointerTracker, ScriptedInput, Viewport};

pub fn crate_info() -> &'static str {
    "gridlight-input v0.1.0"
}
