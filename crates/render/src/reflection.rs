//! Planar reflection on the floor.
//!
//! The scene is rendered a second time through the camera mirrored across the
//! floor plane, blurred, and blended into the floor's base color. How much of
//! the reflection shows is attenuated by the reflected geometry's depth below
//! the plane and shaped by roughness (sharp vs blurred) and metalness
//! (reflectance).

use glam::{Mat4, Vec3};
use gridlight_common::Color;
use serde::{Deserialize, Serialize};

use crate::frame::{Frame, smoothstep};
use crate::postfx::PassError;

/// Dielectric reflectance at normal incidence.
const F0_DIELECTRIC: f32 = 0.04;

/// Below this `depth_scale` the band cuts off immediately.
const MIN_DEPTH_SCALE: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionConfig {
    /// Blur radii in pixels of a `resolution`-sized target, (horizontal, vertical).
    pub blur: [f32; 2],
    /// Edge length of the square reflection target.
    pub resolution: u32,
    pub mix_blur: f32,
    pub mix_strength: f32,
    pub roughness: f32,
    pub metalness: f32,
    /// Shape of the fade inside the depth band: above 1 the reflection holds
    /// full strength deeper, below 1 it falls off sooner. The band edges
    /// stay at full and zero whatever the value.
    pub depth_scale: f32,
    pub min_depth_threshold: f32,
    pub max_depth_threshold: f32,
    pub color: Color,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            blur: [300.0, 30.0],
            resolution: 2048,
            mix_blur: 1.0,
            mix_strength: 180.0,
            roughness: 1.0,
            metalness: 0.8,
            depth_scale: 1.2,
            min_depth_threshold: 0.4,
            max_depth_threshold: 1.4,
            color: Color::from_srgb8(0x20, 0x20, 0x20),
        }
    }
}

/// Errors from validating a [`ReflectionConfig`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReflectionConfigError {
    #[error("min_depth_threshold {min} exceeds max_depth_threshold {max}")]
    ThresholdOrder { min: f32, max: f32 },
    #[error("{0} must be within [0, 1]")]
    OutOfUnitRange(&'static str),
    #[error("{0} must be finite and non-negative")]
    Negative(&'static str),
    #[error("resolution must be positive")]
    ZeroResolution,
}

impl ReflectionConfig {
    pub fn validate(&self) -> Result<(), ReflectionConfigError> {
        let (min, max) = (self.min_depth_threshold, self.max_depth_threshold);
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(ReflectionConfigError::ThresholdOrder { min, max });
        }
        for (name, v) in [("roughness", self.roughness), ("metalness", self.metalness)] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ReflectionConfigError::OutOfUnitRange(name));
            }
        }
        for (name, v) in [
            ("blur.x", self.blur[0]),
            ("blur.y", self.blur[1]),
            ("mix_blur", self.mix_blur),
            ("mix_strength", self.mix_strength),
            ("depth_scale", self.depth_scale),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(ReflectionConfigError::Negative(name));
            }
        }
        if self.resolution == 0 {
            return Err(ReflectionConfigError::ZeroResolution);
        }
        Ok(())
    }

    /// 1 at or above the surface band, 0 past `max_depth_threshold`,
    /// smoothstep in between.
    pub fn depth_fade(&self, depth: f32) -> f32 {
        1.0 - smoothstep(self.min_depth_threshold, self.max_depth_threshold, depth)
    }

    /// Exponent applied to [`depth_fade`](Self::depth_fade).
    pub fn fade_exponent(&self) -> f32 {
        1.0 / self.depth_scale.max(MIN_DEPTH_SCALE)
    }

    /// Share of `mix_strength` applied at `depth`, in [0, 1]. Exactly 1 at
    /// or above `min_depth_threshold` and 0 at or past `max_depth_threshold`.
    pub fn contribution(&self, depth: f32) -> f32 {
        self.depth_fade(depth).powf(self.fade_exponent()).clamp(0.0, 1.0)
    }

    /// How much of the blurred reflection replaces the sharp one.
    pub fn blur_mix(&self) -> f32 {
        (self.mix_blur * self.roughness).clamp(0.0, 1.0)
    }

    /// Schlick F0: 0.04 for dielectrics up to 1.0 for metals.
    pub fn reflectance(&self) -> f32 {
        F0_DIELECTRIC + (1.0 - F0_DIELECTRIC) * self.metalness
    }

    /// Floor color for one texel given the sharp and blurred reflection and
    /// the reflected geometry's depth below the plane.
    pub fn shade(&self, sharp: Vec3, blurred: Vec3, depth: f32) -> Vec3 {
        let merged = sharp.lerp(blurred, self.blur_mix());
        let weight = self.mix_strength * self.contribution(depth) * self.reflectance();
        let base = self.color.to_vec3();
        base + base * merged * weight
    }

    /// Blur radii scaled to a target `width × height` texels.
    pub fn blur_radii(&self, width: usize, height: usize) -> (usize, usize) {
        let res = self.resolution.max(1) as f32;
        (
            (self.blur[0] * width as f32 / res).round() as usize,
            (self.blur[1] * height as f32 / res).round() as usize,
        )
    }
}

/// Reflection across the horizontal plane `y = height`.
pub fn reflection_matrix(height: f32) -> Mat4 {
    Mat4::from_translation(Vec3::new(0.0, height, 0.0))
        * Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0))
        * Mat4::from_translation(Vec3::new(0.0, -height, 0.0))
}

/// CPU reference of the reflection pass.
#[derive(Debug, Clone)]
pub struct ReflectionPass {
    config: ReflectionConfig,
    previous: Option<Frame>,
}

impl ReflectionPass {
    pub fn new(config: ReflectionConfig) -> Result<Self, ReflectionConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            previous: None,
        })
    }

    pub fn config(&self) -> &ReflectionConfig {
        &self.config
    }

    /// Last successfully composed floor, if any.
    pub fn previous(&self) -> Option<&Frame> {
        self.previous.as_ref()
    }

    /// Blend a mirrored render into floor texels.
    ///
    /// `mirrored` carries the mirrored scene color and, as depth, each texel's
    /// reflected-geometry depth below the plane in world units.
    pub fn compose(&mut self, mirrored: &Frame) -> Result<Frame, PassError> {
        let depth = mirrored.depth().ok_or(PassError::MissingDepth("reflection"))?;
        let (rx, ry) = self
            .config
            .blur_radii(mirrored.width(), mirrored.height());
        let blurred = mirrored.box_blur(rx, ry);

        let color = mirrored
            .pixels()
            .iter()
            .zip(blurred.pixels())
            .zip(depth)
            .map(|((sharp, soft), d)| self.config.shade(*sharp, *soft, *d))
            .collect();
        let floor = mirrored.with_pixels(color);
        self.previous = Some(floor.clone());
        Ok(floor)
    }

    /// Reuse the last composed floor without re-rendering.
    pub fn cached(&self) -> Option<Frame> {
        self.previous.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ReflectionConfig::default().validate().is_ok());
    }

    #[test]
    fn threshold_order_enforced() {
        let cfg = ReflectionConfig {
            min_depth_threshold: 2.0,
            max_depth_threshold: 1.0,
            ..ReflectionConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ReflectionConfigError::ThresholdOrder { .. })
        ));
        assert!(ReflectionPass::new(cfg).is_err());
    }

    #[test]
    fn unit_range_enforced() {
        let cfg = ReflectionConfig {
            metalness: 1.5,
            ..ReflectionConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ReflectionConfigError::OutOfUnitRange("metalness"))
        );
    }

    #[test]
    fn depth_fade_endpoints_and_monotonic() {
        let cfg = ReflectionConfig::default();
        let full = cfg.mix_strength * cfg.contribution(0.0);
        assert_eq!(full, cfg.mix_strength);
        assert_eq!(cfg.contribution(cfg.min_depth_threshold), 1.0);
        assert_eq!(cfg.contribution(cfg.max_depth_threshold), 0.0);
        assert_eq!(cfg.contribution(10.0), 0.0);

        let mut prev = f32::INFINITY;
        for i in 0..=100 {
            let d = i as f32 * 0.02;
            let c = cfg.contribution(d);
            assert!(c <= prev + 1e-7, "fade rose at depth {d}");
            prev = c;
        }
    }

    #[test]
    fn depth_scale_only_shapes_the_band() {
        for depth_scale in [0.5, 1.0, 1.2] {
            let cfg = ReflectionConfig {
                depth_scale,
                ..ReflectionConfig::default()
            };
            assert!(cfg.validate().is_ok());
            assert_eq!(cfg.contribution(0.0), 1.0, "scale {depth_scale}");
            assert_eq!(cfg.contribution(cfg.min_depth_threshold), 1.0, "scale {depth_scale}");
            assert_eq!(cfg.contribution(cfg.max_depth_threshold), 0.0, "scale {depth_scale}");

            let mut prev = f32::INFINITY;
            for i in 0..=100 {
                let c = cfg.contribution(i as f32 * 0.02);
                assert!((0.0..=1.0).contains(&c));
                assert!(c <= prev + 1e-7, "scale {depth_scale} rose at step {i}");
                prev = c;
            }
        }

        let mid = 0.9;
        let shallow = ReflectionConfig {
            depth_scale: 0.5,
            ..ReflectionConfig::default()
        };
        let deep = ReflectionConfig {
            depth_scale: 1.2,
            ..ReflectionConfig::default()
        };
        assert!(shallow.contribution(mid) < deep.contribution(mid));
    }

    #[test]
    fn zero_depth_scale_keeps_the_surface_band() {
        let cfg = ReflectionConfig {
            depth_scale: 0.0,
            ..ReflectionConfig::default()
        };
        assert_eq!(cfg.contribution(0.0), 1.0);
        assert_eq!(cfg.contribution(0.4), 1.0);
        assert!(cfg.contribution(0.9) < 1e-3);
    }

    #[test]
    fn equal_thresholds_are_a_step() {
        let cfg = ReflectionConfig {
            min_depth_threshold: 1.0,
            max_depth_threshold: 1.0,
            depth_scale: 1.0,
            ..ReflectionConfig::default()
        };
        assert_eq!(cfg.contribution(0.99), 1.0);
        assert_eq!(cfg.contribution(1.0), 0.0);
    }

    #[test]
    fn roughness_selects_blurred() {
        let cfg = ReflectionConfig {
            roughness: 0.0,
            ..ReflectionConfig::default()
        };
        let sharp = cfg.shade(Vec3::ONE, Vec3::ZERO, 0.0);
        let rough = ReflectionConfig::default().shade(Vec3::ONE, Vec3::ZERO, 0.0);
        let base = cfg.color.to_vec3();
        assert!(sharp.x > base.x);
        assert!((rough - base).length() < 1e-6);
    }

    #[test]
    fn deep_reflections_leave_base_color() {
        let cfg = ReflectionConfig::default();
        let c = cfg.shade(Vec3::ONE, Vec3::ONE, 5.0);
        assert!((c - cfg.color.to_vec3()).length() < 1e-6);
    }

    #[test]
    fn reflection_matrix_mirrors_about_plane() {
        let m = reflection_matrix(-2.5);
        let p = m.transform_point3(Vec3::new(1.0, 0.0, 3.0));
        assert!((p - Vec3::new(1.0, -5.0, 3.0)).length() < 1e-6);
        let on_plane = m.transform_point3(Vec3::new(4.0, -2.5, 0.0));
        assert!((on_plane - Vec3::new(4.0, -2.5, 0.0)).length() < 1e-6);
    }

    #[test]
    fn compose_requires_depth_and_caches() {
        let mut pass = ReflectionPass::new(ReflectionConfig::default()).unwrap();
        let no_depth = Frame::filled(4, 4, Vec3::ONE);
        assert_eq!(
            pass.compose(&no_depth),
            Err(PassError::MissingDepth("reflection"))
        );
        assert!(pass.cached().is_none());

        let mirrored = Frame::filled(4, 4, Vec3::ONE)
            .with_depth(vec![0.0; 16])
            .unwrap();
        let floor = pass.compose(&mirrored).unwrap();
        assert!(floor.get(0, 0).x > pass.config().color.r);
        assert_eq!(pass.cached(), Some(floor));
    }
}
