use std::fmt::Write as _;

use gridlight_scene::Scene;

use crate::camera::CameraState;
use crate::postfx::EffectConfigError;
use crate::reflection::ReflectionConfigError;
use crate::scheduler::{FrameOutcome, FramePlan};

/// A whole frame could not be produced. The host skips presenting it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("surface lost or outdated")]
    SurfaceLost,
    #[error("timed out acquiring the next surface texture")]
    Timeout,
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("{0}")]
    Other(String),
}

/// Renderer construction failed. Fatal, like scene construction.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("reflection: {0}")]
    Reflection(#[from] ReflectionConfigError),
    #[error("post-processing: {0}")]
    Effect(#[from] EffectConfigError),
    #[error("device: {0}")]
    Device(String),
}

/// Output of one frame and a record of which passes ran.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFrame<T> {
    pub output: T,
    pub outcome: FrameOutcome,
}

/// Renderer-agnostic interface. All renderers implement this trait.
///
/// A renderer reads the scene and camera and follows the plan: primary pass,
/// reflection pass, then post-processing. It never mutates the scene.
/// Reflection and post resources are created from their configs at setup.
pub trait Renderer {
    type Output;

    fn render_frame(
        &mut self,
        scene: &Scene,
        camera: &CameraState,
        plan: &FramePlan,
    ) -> Result<RenderedFrame<Self::Output>, FrameError>;
}

/// Human-readable frame dump for the CLI, logs, and tests.
#[derive(Debug, Default)]
pub struct DebugTextRenderer {
    /// Also list every instance.
    pub verbose: bool,
}

impl DebugTextRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verbose() -> Self {
        Self { verbose: true }
    }
}

impl Renderer for DebugTextRenderer {
    type Output = String;

    fn render_frame(
        &mut self,
        scene: &Scene,
        camera: &CameraState,
        plan: &FramePlan,
    ) -> Result<RenderedFrame<String>, FrameError> {
        let mut out = String::new();
        let registry = scene.registry();
        let batches = registry.batches();

        // writing into a String cannot fail
        let _ = writeln!(
            out,
            "=== Frame {} (dt={:.4}, rig={:?}) ===",
            plan.frame, plan.dt, plan.rig
        );
        let _ = writeln!(
            out,
            "Camera: pos=({:.3}, {:.3}, {:.3}) look_at=({:.1}, {:.1}, {:.1}) fov={:.0}",
            camera.position.x,
            camera.position.y,
            camera.position.z,
            camera.look_at.x,
            camera.look_at.y,
            camera.look_at.z,
            camera.fov.to_degrees()
        );
        let _ = writeln!(
            out,
            "Instances: {} in {} batch(es)",
            registry.len(),
            batches.len()
        );
        let _ = writeln!(
            out,
            "Passes: shadows={} reflection={} post=[bloom, depth_of_field]",
            if plan.render_shadows { "render" } else { "cached" },
            if plan.render_reflection { "render" } else { "cached" },
        );

        if self.verbose {
            for batch in &batches {
                let _ = writeln!(
                    out,
                    "  batch {:?} '{}': {} instance(s)",
                    batch.handle,
                    batch.geometry.name,
                    batch.instances.len()
                );
                for draw in &batch.instances {
                    let p = draw.model.w_axis;
                    let _ = writeln!(
                        out,
                        "    [{}] pos=({:.2}, {:.2}, {:.2}){}",
                        draw.id,
                        p.x,
                        p.y,
                        p.z,
                        draw.tint
                            .map(|c| format!(" tint={}", c.to_hex()))
                            .unwrap_or_default()
                    );
                }
            }
        }

        Ok(RenderedFrame {
            output: out,
            outcome: FrameOutcome::complete(plan),
        })
    }
}
