//! Rendering core: everything between "the scene exists" and "pixels".
//!
//! # Invariants
//! - Renderers never mutate the scene; the camera is moved only by the rig.
//! - Post-processing runs bloom before depth of field, always.
//! - A failing pass costs at most one stale layer; it never ends the loop.
//! - Baked shadows stay frozen until a caster or light moves.
//!
//! The [`Renderer`] trait is implemented here by [`DebugTextRenderer`] and the
//! software [`PreviewRenderer`]; the GPU backend lives in
//! `gridlight-render-wgpu`.

mod camera;
mod config;
mod frame;
mod postfx;
mod preview;
mod reflection;
mod renderer;
mod scheduler;

pub use camera::{CameraConfig, CameraRig, CameraState, DAMP_EPSILON, RigState, damp, damp3};
pub use config::{ConfigError, DprRange, SessionConfig};
pub use frame::{Frame, aces_filmic, luminance, smoothstep};
pub use postfx::{
    Bloom, BloomConfig, DepthOfField, DepthOfFieldConfig, EffectConfigError, EffectContext,
    PassError, PostEffect, PostOutput, PostProcessChain, SkippedPass,
};
pub use preview::PreviewRenderer;
pub use reflection::{ReflectionConfig, ReflectionConfigError, ReflectionPass, reflection_matrix};
pub use renderer::{DebugTextRenderer, FrameError, RenderedFrame, Renderer, SetupError};
pub use scheduler::{FrameOutcome, FramePlan, FrameScheduler, SchedulerStats, ShadowState};

pub fn crate_info() -> &'static str {
    "gridlight-render v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("render"));
    }
}
