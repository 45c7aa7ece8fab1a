use glam::Vec3;
use gridlight_common::Color;
use gridlight_layout::GridSpec;
use serde::{Deserialize, Serialize};

/// Sky/ground ambient light.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HemisphereLight {
    pub intensity: f32,
    pub sky_color: Color,
    pub ground_color: Color,
}

impl Default for HemisphereLight {
    fn default() -> Self {
        Self {
            intensity: 0.15,
            sky_color: Color::WHITE,
            ground_color: Color::BLACK,
        }
    }
}

/// Shadow-casting spot light aimed at the origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotLight {
    pub position: Vec3,
    pub target: Vec3,
    /// Half-angle of the cone, radians.
    pub angle: f32,
    /// Fraction of the cone that fades out, 0..=1.
    pub penumbra: f32,
    pub intensity: f32,
    pub cast_shadow: bool,
    pub shadow_map_size: u32,
}

impl Default for SpotLight {
    fn default() -> Self {
        Self {
            position: Vec3::new(10.0, 20.0, 10.0),
            target: Vec3::ZERO,
            angle: 0.12,
            penumbra: 1.0,
            intensity: 1.0,
            cast_shadow: true,
            shadow_map_size: 1024,
        }
    }
}

/// Reflective ground plane, horizontal, centered under the group offset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloorConfig {
    pub size: f32,
}

impl Default for FloorConfig {
    fn default() -> Self {
        Self { size: 50.0 }
    }
}

/// Everything needed to build a [`Scene`](crate::Scene).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Model identifier handed to the asset loader.
    pub model: String,
    pub grid: GridSpec,
    pub instance_scale: f32,
    /// Instances react to hover/click when set.
    pub interactive: bool,
    /// Offset of the floor group; the floor sits at `group_offset.y`.
    pub group_offset: Vec3,
    pub floor: FloorConfig,
    pub background: Color,
    pub hemisphere: HemisphereLight,
    pub spot: SpotLight,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            model: "builtin:cube".into(),
            grid: GridSpec::default(),
            instance_scale: 0.7,
            interactive: false,
            group_offset: Vec3::new(0.0, -2.5, 0.0),
            floor: FloorConfig::default(),
            background: Color::BLACK,
            hemisphere: HemisphereLight::default(),
            spot: SpotLight::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_showcase_scene() {
        let c = SceneConfig::default();
        assert_eq!(c.grid, GridSpec::new(6, 15, 1.5, -5.0));
        assert_eq!(c.instance_scale, 0.7);
        assert_eq!(c.group_offset.y, -2.5);
        assert_eq!(c.spot.shadow_map_size, 1024);
        assert_eq!(c.background, Color::BLACK);
    }
}
