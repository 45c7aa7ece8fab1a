//! Post-processing: bloom, then depth of field.
//!
//! The chain order is fixed. Bloom must see the unblurred HDR image so its
//! threshold picks out the actual highlights; depth of field then softens the
//! glow together with the geometry.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::camera::CameraState;
use crate::frame::{Frame, luminance, smoothstep};

/// A pass failed for one frame. Never fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PassError {
    #[error("{0}: depth buffer missing")]
    MissingDepth(&'static str),
    #[error("buffer size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("{0}: render target unavailable")]
    Unavailable(String),
}

/// Rejected effect parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{effect}: {reason}")]
pub struct EffectConfigError {
    pub effect: &'static str,
    pub reason: String,
}

impl EffectConfigError {
    fn new(effect: &'static str, reason: impl Into<String>) -> Self {
        Self {
            effect,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomConfig {
    pub luminance_threshold: f32,
    /// Width of the soft knee above the threshold; 0 is a hard cut.
    pub luminance_smoothing: f32,
    pub intensity: f32,
    pub mipmap_blur: bool,
    /// Maximum mip levels in the blur chain.
    pub levels: u32,
    /// Upsample blend toward the coarser level, 0..=1.
    pub radius: f32,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            luminance_threshold: 0.0,
            luminance_smoothing: 0.0,
            intensity: 3.0,
            mipmap_blur: true,
            levels: 8,
            radius: 0.85,
        }
    }
}

impl BloomConfig {
    pub fn validate(&self) -> Result<(), EffectConfigError> {
        if !self.luminance_threshold.is_finite() {
            return Err(EffectConfigError::new("bloom", "threshold must be finite"));
        }
        if !(self.luminance_smoothing >= 0.0) {
            return Err(EffectConfigError::new("bloom", "smoothing must be non-negative"));
        }
        if !(self.intensity >= 0.0) {
            return Err(EffectConfigError::new("bloom", "intensity must be non-negative"));
        }
        if self.levels == 0 {
            return Err(EffectConfigError::new("bloom", "at least one mip level"));
        }
        if !(0.0..=1.0).contains(&self.radius) {
            return Err(EffectConfigError::new("bloom", "radius must be within [0, 1]"));
        }
        Ok(())
    }

    /// Fraction of a pixel that feeds the glow.
    pub fn mask(&self, luma: f32) -> f32 {
        smoothstep(
            self.luminance_threshold,
            self.luminance_threshold + self.luminance_smoothing,
            luma,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthOfFieldConfig {
    /// World point whose depth is in focus.
    pub focus_target: Vec3,
    /// Width of the in-focus band, in normalized depth.
    pub focal_length: f32,
    /// Blur disc radius in pixels of the internal blur image. Zero disables
    /// the blur.
    pub bokeh_scale: f32,
    /// Internal blur resolution height, capped at the frame height.
    pub render_height: u32,
}

impl Default for DepthOfFieldConfig {
    fn default() -> Self {
        Self {
            focus_target: Vec3::new(0.0, 0.0, 16.0),
            focal_length: 0.3,
            bokeh_scale: 5.0,
            render_height: 700,
        }
    }
}

impl DepthOfFieldConfig {
    pub fn validate(&self) -> Result<(), EffectConfigError> {
        if !(self.focal_length > 0.0) {
            return Err(EffectConfigError::new("depth_of_field", "focal_length must be positive"));
        }
        if !(self.bokeh_scale >= 0.0) {
            return Err(EffectConfigError::new("depth_of_field", "bokeh_scale must be non-negative"));
        }
        if self.render_height == 0 {
            return Err(EffectConfigError::new("depth_of_field", "render_height must be positive"));
        }
        if !self.focus_target.is_finite() {
            return Err(EffectConfigError::new("depth_of_field", "focus_target must be finite"));
        }
        Ok(())
    }

    /// Circle of confusion in [0, 1] for a pixel at `depth`.
    pub fn circle_of_confusion(&self, depth: f32, focus: f32) -> f32 {
        smoothstep(0.0, self.focal_length, (depth - focus).abs())
    }

    /// Downscale factor for a `height`-pixel frame and the blur radius in
    /// pixels of the downscaled image.
    pub fn blur_scale(&self, height: usize) -> (f32, usize) {
        let scale = (self.render_height as f32 / height.max(1) as f32).min(1.0);
        (scale, self.bokeh_scale.round() as usize)
    }
}

/// Per-frame inputs shared by all effects.
#[derive(Debug, Clone, Copy)]
pub struct EffectContext<'a> {
    pub camera: &'a CameraState,
}

/// One screen-space effect.
pub trait PostEffect {
    fn name(&self) -> &'static str;

    fn apply(&self, input: &Frame, ctx: &EffectContext<'_>) -> Result<Frame, PassError>;
}

#[derive(Debug, Clone)]
pub struct Bloom {
    config: BloomConfig,
}

impl Bloom {
    pub fn new(config: BloomConfig) -> Result<Self, EffectConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BloomConfig {
        &self.config
    }

    fn glow(&self, bright: &Frame) -> Frame {
        if !self.config.mipmap_blur {
            let r = self.config.levels as usize;
            return bright.box_blur(r, r);
        }

        let mut chain = vec![bright.downsample()];
        while chain.len() < self.config.levels as usize {
            let last = &chain[chain.len() - 1];
            if last.width() == 1 && last.height() == 1 {
                break;
            }
            let next = last.downsample();
            chain.push(next);
        }

        let mut acc = chain.pop().unwrap_or_else(|| bright.clone());
        while let Some(level) = chain.pop() {
            let up = acc.resize(level.width(), level.height());
            let mixed = level
                .pixels()
                .iter()
                .zip(up.pixels())
                .map(|(fine, coarse)| fine.lerp(*coarse, self.config.radius))
                .collect();
            acc = level.with_pixels(mixed);
        }
        acc.resize(bright.width(), bright.height())
    }
}

impl PostEffect for Bloom {
    fn name(&self) -> &'static str {
        "bloom"
    }

    fn apply(&self, input: &Frame, _ctx: &EffectContext<'_>) -> Result<Frame, PassError> {
        if input.pixels().is_empty() {
            return Ok(input.clone());
        }
        let bright = input.with_pixels(
            input
                .pixels()
                .iter()
                .map(|c| *c * self.config.mask(luminance(*c)))
                .collect(),
        );
        let glow = self.glow(&bright);
        let color = input
            .pixels()
            .iter()
            .zip(glow.pixels())
            .map(|(c, g)| *c + *g * self.config.intensity)
            .collect();
        Ok(input.with_pixels(color))
    }
}

#[derive(Debug, Clone)]
pub struct DepthOfField {
    config: DepthOfFieldConfig,
}

impl DepthOfField {
    pub fn new(config: DepthOfFieldConfig) -> Result<Self, EffectConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DepthOfFieldConfig {
        &self.config
    }
}

impl PostEffect for DepthOfField {
    fn name(&self) -> &'static str {
        "depth_of_field"
    }

    fn apply(&self, input: &Frame, ctx: &EffectContext<'_>) -> Result<Frame, PassError> {
        let depth = input.depth().ok_or(PassError::MissingDepth("depth_of_field"))?;
        if input.pixels().is_empty() {
            return Ok(input.clone());
        }
        let focus = ctx.camera.normalized_depth(self.config.focus_target);

        let (w, h) = (input.width(), input.height());
        let (scale, radius) = self.config.blur_scale(h);
        if radius == 0 {
            return Ok(input.clone());
        }
        let low_w = ((w as f32 * scale).round() as usize).max(1);
        let low_h = ((h as f32 * scale).round() as usize).max(1);
        let blurred = input
            .resize(low_w, low_h)
            .box_blur(radius, radius)
            .resize(w, h);

        let color = input
            .pixels()
            .iter()
            .zip(blurred.pixels())
            .zip(depth)
            .map(|((sharp, soft), d)| {
                sharp.lerp(*soft, self.config.circle_of_confusion(*d, focus))
            })
            .collect();
        Ok(input.with_pixels(color))
    }
}

/// A pass that failed this frame and what stood in for it.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedPass {
    pub pass: &'static str,
    pub error: PassError,
    /// The previous frame's output was reused rather than passing through.
    pub reused_previous: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostOutput {
    pub frame: Frame,
    pub skipped: Vec<SkippedPass>,
}

/// Ordered effects with last-good-output recovery per stage.
pub struct PostProcessChain {
    stages: Vec<Box<dyn PostEffect>>,
    previous: Vec<Option<Frame>>,
}

impl std::fmt::Debug for PostProcessChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostProcessChain")
            .field("order", &self.order())
            .finish()
    }
}

impl PostProcessChain {
    /// Bloom, then depth of field.
    pub fn standard(
        bloom: BloomConfig,
        dof: DepthOfFieldConfig,
    ) -> Result<Self, EffectConfigError> {
        Ok(Self::from_effects(vec![
            Box::new(Bloom::new(bloom)?),
            Box::new(DepthOfField::new(dof)?),
        ]))
    }

    pub fn from_effects(stages: Vec<Box<dyn PostEffect>>) -> Self {
        let previous = vec![None; stages.len()];
        Self { stages, previous }
    }

    pub fn order(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order. A failing stage is replaced by its previous
    /// output when sizes still match, otherwise by its input.
    pub fn run(&mut self, input: &Frame, ctx: &EffectContext<'_>) -> PostOutput {
        let mut current = input.clone();
        let mut skipped = Vec::new();

        for (stage, previous) in self.stages.iter().zip(self.previous.iter_mut()) {
            match stage.apply(&current, ctx) {
                Ok(frame) => {
                    *previous = Some(frame.clone());
                    current = frame;
                }
                Err(error) => {
                    let reuse = previous.as_ref().filter(|p| p.same_size(&current));
                    let reused_previous = reuse.is_some();
                    tracing::warn!(pass = stage.name(), %error, reused_previous, "post pass skipped");
                    if let Some(frame) = reuse {
                        current = frame.clone();
                    }
                    skipped.push(SkippedPass {
                        pass: stage.name(),
                        error,
                        reused_previous,
                    });
                }
            }
        }

        PostOutput {
            frame: current,
            skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraConfig;

    fn camera() -> CameraState {
        CameraState::from_config(&CameraConfig::default(), 1.0)
    }

    /// Dark 16×16 frame with one hot pixel, everything at the far plane.
    fn highlight_frame() -> Frame {
        let mut f = Frame::new(16, 16).with_depth(vec![1.0; 256]).unwrap();
        f.set(8, 8, Vec3::splat(10.0));
        f
    }

    fn bloom_half() -> BloomConfig {
        BloomConfig {
            luminance_threshold: 0.5,
            ..BloomConfig::default()
        }
    }

    #[test]
    fn standard_order_is_bloom_then_dof() {
        let chain =
            PostProcessChain::standard(BloomConfig::default(), DepthOfFieldConfig::default())
                .unwrap();
        assert_eq!(chain.order(), vec!["bloom", "depth_of_field"]);
    }

    #[test]
    fn reversing_order_changes_output() {
        let cam = camera();
        let ctx = EffectContext { camera: &cam };
        let input = highlight_frame();

        let mut forward =
            PostProcessChain::standard(bloom_half(), DepthOfFieldConfig::default()).unwrap();
        let mut reversed = PostProcessChain::from_effects(vec![
            Box::new(DepthOfField::new(DepthOfFieldConfig::default()).unwrap()),
            Box::new(Bloom::new(bloom_half()).unwrap()),
        ]);

        let a = forward.run(&input, &ctx);
        let b = reversed.run(&input, &ctx);
        assert!(a.skipped.is_empty() && b.skipped.is_empty());
        assert!(a.frame.max_abs_diff(&b.frame) > 1e-3);
    }

    #[test]
    fn dim_pixels_get_no_glow() {
        let cam = camera();
        let ctx = EffectContext { camera: &cam };
        let input = Frame::filled(8, 8, Vec3::splat(0.2));
        let out = Bloom::new(bloom_half()).unwrap().apply(&input, &ctx).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn bloom_spreads_highlight() {
        let cam = camera();
        let ctx = EffectContext { camera: &cam };
        let input = highlight_frame();
        let out = Bloom::new(bloom_half()).unwrap().apply(&input, &ctx).unwrap();
        assert!(out.get(8, 8).x > 10.0);
        assert!(out.get(9, 8).x > 0.0);
        assert!(out.depth().is_some());
    }

    #[test]
    fn soft_knee_is_partial() {
        let cfg = BloomConfig {
            luminance_threshold: 0.5,
            luminance_smoothing: 0.5,
            ..BloomConfig::default()
        };
        assert_eq!(cfg.mask(0.4), 0.0);
        assert!(cfg.mask(0.75) > 0.0 && cfg.mask(0.75) < 1.0);
        assert_eq!(cfg.mask(1.2), 1.0);
    }

    #[test]
    fn in_focus_pixels_stay_sharp() {
        let cam = camera();
        let ctx = EffectContext { camera: &cam };
        let dof = DepthOfField::new(DepthOfFieldConfig::default()).unwrap();
        let focus = cam.normalized_depth(dof.config().focus_target);

        let mut input = Frame::new(8, 8).with_depth(vec![focus; 64]).unwrap();
        input.set(3, 3, Vec3::ONE);
        let out = dof.apply(&input, &ctx).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn out_of_focus_pixels_blur() {
        let cam = camera();
        let ctx = EffectContext { camera: &cam };
        let dof = DepthOfField::new(DepthOfFieldConfig::default()).unwrap();
        let out = dof.apply(&highlight_frame(), &ctx).unwrap();
        assert!(out.get(8, 8).x < 10.0);
        assert!(out.get(10, 8).x > 0.0);
    }

    #[test]
    fn dof_blurs_at_reduced_height() {
        let cfg = DepthOfFieldConfig {
            render_height: 4,
            ..DepthOfFieldConfig::default()
        };
        assert_eq!(cfg.blur_scale(8), (0.5, 5));
        assert_eq!(cfg.blur_scale(2), (1.0, 5));

        let cam = camera();
        let ctx = EffectContext { camera: &cam };
        let out = DepthOfField::new(cfg).unwrap().apply(&highlight_frame(), &ctx).unwrap();
        assert_eq!((out.width(), out.height()), (16, 16));
    }

    #[test]
    fn zero_bokeh_leaves_frame_sharp() {
        let cfg = DepthOfFieldConfig {
            bokeh_scale: 0.0,
            render_height: 4,
            ..DepthOfFieldConfig::default()
        };
        cfg.validate().unwrap();
        assert_eq!(cfg.blur_scale(16), (0.25, 0));

        let cam = camera();
        let ctx = EffectContext { camera: &cam };
        let input = highlight_frame();
        let out = DepthOfField::new(cfg).unwrap().apply(&input, &ctx).unwrap();
        assert_eq!(out.max_abs_diff(&input), 0.0);
    }

    #[test]
    fn missing_depth_skips_dof_only() {
        let cam = camera();
        let ctx = EffectContext { camera: &cam };
        let mut chain = PostProcessChain::standard(bloom_half(), DepthOfFieldConfig::default())
            .unwrap();

        let mut no_depth = Frame::new(16, 16);
        no_depth.set(8, 8, Vec3::splat(10.0));
        let out = chain.run(&no_depth, &ctx);

        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].pass, "depth_of_field");
        assert!(!out.skipped[0].reused_previous);
        let bloom_only = Bloom::new(bloom_half()).unwrap().apply(&no_depth, &ctx).unwrap();
        assert_eq!(out.frame, bloom_only);
    }

    #[test]
    fn failed_stage_reuses_previous_output() {
        let cam = camera();
        let ctx = EffectContext { camera: &cam };
        let mut chain = PostProcessChain::standard(bloom_half(), DepthOfFieldConfig::default())
            .unwrap();

        let good = chain.run(&highlight_frame(), &ctx);
        assert!(good.skipped.is_empty());

        let out = chain.run(&Frame::new(16, 16), &ctx);
        assert_eq!(out.skipped.len(), 1);
        assert!(out.skipped[0].reused_previous);
        assert_eq!(out.frame, good.frame);
    }

    #[test]
    fn invalid_configs_rejected() {
        let bloom = BloomConfig {
            levels: 0,
            ..BloomConfig::default()
        };
        assert!(Bloom::new(bloom).is_err());
        let dof = DepthOfFieldConfig {
            focal_length: 0.0,
            ..DepthOfFieldConfig::default()
        };
        let err = DepthOfField::new(dof).unwrap_err();
        assert_eq!(err.effect, "depth_of_field");
    }
}
