use std::path::Path;

use gridlight_scene::SceneConfig;
use serde::{Deserialize, Serialize};

use crate::camera::CameraConfig;
use crate::postfx::{BloomConfig, DepthOfFieldConfig};
use crate::reflection::ReflectionConfig;

/// Errors loading or validating a [`SessionConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Device pixel ratio range for the render surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DprRange {
    pub min: f32,
    pub max: f32,
}

impl Default for DprRange {
    fn default() -> Self {
        Self { min: 1.0, max: 1.5 }
    }
}

impl DprRange {
    pub fn clamp(&self, scale_factor: f64) -> f32 {
        (scale_factor as f32).clamp(self.min, self.max)
    }
}

/// Everything read once at startup. Immutable for the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub scene: SceneConfig,
    pub camera: CameraConfig,
    pub reflection: ReflectionConfig,
    pub bloom: BloomConfig,
    pub dof: DepthOfFieldConfig,
    pub dpr: DprRange,
}

impl SessionConfig {
    /// Read a YAML file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&text)?;
        tracing::info!(path = %path.display(), "session config loaded");
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |e: &dyn std::fmt::Display| ConfigError::Invalid(e.to_string());

        self.scene.grid.validate().map_err(|e| invalid(&e))?;
        self.reflection.validate().map_err(|e| invalid(&e))?;
        self.bloom.validate().map_err(|e| invalid(&e))?;
        self.dof.validate().map_err(|e| invalid(&e))?;

        let cam = &self.camera;
        if !(cam.near > 0.0 && cam.far > cam.near) {
            return Err(ConfigError::Invalid(format!(
                "camera clip range {}..{} is empty",
                cam.near, cam.far
            )));
        }
        if !(cam.fov_degrees > 0.0 && cam.fov_degrees < 180.0) {
            return Err(ConfigError::Invalid(format!(
                "camera fov {} out of range",
                cam.fov_degrees
            )));
        }
        if !(cam.smooth_time > 0.0) {
            return Err(ConfigError::Invalid("camera smooth_time must be positive".into()));
        }
        if !(self.dpr.min > 0.0 && self.dpr.min <= self.dpr.max) {
            return Err(ConfigError::Invalid(format!(
                "dpr range [{}, {}] is invalid",
                self.dpr.min, self.dpr.max
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reflection.resolution, 2048);
        assert_eq!(config.bloom.intensity, 3.0);
        assert_eq!(config.dof.render_height, 700);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "scene:\n  grid:\n    rows: 2\n    columns: 3\nbloom:\n  intensity: 1.5\n";
        let config = SessionConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.scene.grid.rows, 2);
        assert_eq!(config.scene.grid.columns, 3);
        assert_eq!(config.scene.grid.spacing, 1.5);
        assert_eq!(config.bloom.intensity, 1.5);
        assert_eq!(config.camera, CameraConfig::default());
    }

    #[test]
    fn reversed_thresholds_rejected() {
        let yaml = "reflection:\n  min_depth_threshold: 2.0\n  max_depth_threshold: 1.0\n";
        assert!(matches!(
            SessionConfig::from_yaml(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn yaml_round_trip_preserves_config() {
        let mut config = SessionConfig::default();
        config.scene.interactive = true;
        config.reflection.color = gridlight_common::Color::from_srgb8(0x10, 0x20, 0x30);
        let text = config.to_yaml().unwrap();
        let back = SessionConfig::from_yaml(&text).unwrap();
        assert!(back.scene.interactive);
        assert_eq!(back.reflection.color.to_hex(), "#102030");
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "camera:\n  smooth_time: 0.25").unwrap();
        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.camera.smooth_time, 0.25);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SessionConfig::load(dir.path().join("nope.yaml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn dpr_clamps() {
        let dpr = DprRange::default();
        assert_eq!(dpr.clamp(3.0), 1.5);
        assert_eq!(dpr.clamp(0.5), 1.0);
        assert_eq!(dpr.clamp(1.25), 1.25);
    }
}
