use glam::{Mat4, Vec3};
use gridlight_assets::{AssetError, ModelLoader};
use gridlight_common::{GeometryHandle, Transform};
use gridlight_instances::{InstanceRegistry, RegistryError};
use gridlight_layout::{LayoutError, compute_grid};

use crate::config::{SceneConfig, SpotLight};

/// Errors that abort scene construction before the first frame.
#[derive(Debug, thiserror::Error)]
pub enum ConstructionError {
    #[error("layout: {0}")]
    Layout(#[from] LayoutError),
    #[error("asset: {0}")]
    Asset(#[from] AssetError),
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Scene-level mutations outside the instance registry.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneEvent {
    SpotLightMoved { old: Vec3, new: Vec3 },
}

/// Summary of what changed since the previous frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneChanges {
    /// Anything visible changed.
    pub any: bool,
    /// A shadow caster or light changed.
    pub shadows: bool,
}

/// The live scene: instances, floor, and lights.
#[derive(Debug, Clone)]
pub struct Scene {
    config: SceneConfig,
    registry: InstanceRegistry,
    model: GeometryHandle,
    events: Vec<SceneEvent>,
}

impl Scene {
    /// Load the model, lay out the grid, and place one instance per cell.
    pub fn build(
        config: SceneConfig,
        loader: &mut dyn ModelLoader,
    ) -> Result<Self, ConstructionError> {
        let _span = tracing::info_span!("scene_build", model = %config.model).entered();

        if !config.instance_scale.is_finite() || config.instance_scale <= 0.0 {
            return Err(ConstructionError::Config(format!(
                "instance_scale must be positive, got {}",
                config.instance_scale
            )));
        }
        if !config.floor.size.is_finite() || config.floor.size <= 0.0 {
            return Err(ConstructionError::Config("floor size must be positive".into()));
        }

        let placements = compute_grid(&config.grid)?;
        let bundle = loader.load_model(&config.model)?;

        let mut registry = InstanceRegistry::new();
        let model = registry.register(bundle.geometry, bundle.material);
        for placement in &placements {
            let transform =
                Transform::from_position(placement.position).with_uniform_scale(config.instance_scale);
            if config.interactive {
                registry.add_interactive_instance(model, transform)?;
            } else {
                registry.add_instance(model, transform)?;
            }
        }
        // construction itself is not a change the scheduler should react to
        registry.drain_events();

        tracing::info!(
            instances = registry.len(),
            geometries = registry.geometry_count(),
            "scene constructed"
        );

        Ok(Self {
            config,
            registry,
            model,
            events: Vec::new(),
        })
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut InstanceRegistry {
        &mut self.registry
    }

    /// Geometry handle of the grid model.
    pub fn model(&self) -> GeometryHandle {
        self.model
    }

    pub fn spot_light(&self) -> &SpotLight {
        &self.config.spot
    }

    /// Height of the reflective floor plane.
    pub fn floor_height(&self) -> f32 {
        self.config.group_offset.y
    }

    /// Model matrix of the floor quad (unit quad in XZ scaled to size).
    pub fn floor_matrix(&self) -> Mat4 {
        let size = self.config.floor.size;
        Mat4::from_translation(self.config.group_offset)
            * Mat4::from_scale(Vec3::new(size, 1.0, size))
    }

    /// Move the spot light. Invalidates baked shadows.
    pub fn move_spot_light(&mut self, position: Vec3) {
        let old = self.config.spot.position;
        if old == position {
            return;
        }
        self.config.spot.position = position;
        self.events.push(SceneEvent::SpotLightMoved { old, new: position });
        tracing::debug!(?old, new = ?position, "spot light moved");
    }

    /// View-projection matrix of the spot light, for the shadow map.
    pub fn spot_view_projection(&self) -> Mat4 {
        let spot = &self.config.spot;
        let up = if (spot.target - spot.position).normalize_or_zero().abs_diff_eq(Vec3::NEG_Y, 1e-3) {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let view = Mat4::look_at_rh(spot.position, spot.target, up);
        let reach = spot.position.distance(spot.target);
        // cover the floor: widen the cone to at least the floor's half diagonal
        let floor_half = self.config.floor.size * std::f32::consts::FRAC_1_SQRT_2;
        let fov = (2.0 * spot.angle).max(2.0 * (floor_half / reach.max(1e-3)).atan());
        Mat4::perspective_rh(fov.min(3.0), 1.0, 0.5, reach * 2.0)
            * view
    }

    /// Drain registry and scene events and summarize them.
    pub fn take_changes(&mut self) -> SceneChanges {
        let instance_events = self.registry.drain_events();
        let scene_events = std::mem::take(&mut self.events);
        SceneChanges {
            any: !instance_events.is_empty() || !scene_events.is_empty(),
            shadows: !scene_events.is_empty()
                || instance_events.iter().any(|e| e.affects_shadows()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridlight_assets::AssetStore;
    use gridlight_layout::GridSpec;

    fn build_default() -> Scene {
        let mut store = AssetStore::new();
        Scene::build(SceneConfig::default(), &mut store).unwrap()
    }

    #[test]
    fn default_scene_has_ninety_instances() {
        let scene = build_default();
        assert_eq!(scene.registry().len(), 90);
        assert_eq!(scene.registry().geometry_count(), 1);
        assert_eq!(scene.floor_height(), -2.5);
    }

    #[test]
    fn instances_follow_grid_and_scale() {
        let scene = build_default();
        let first = scene.registry().ids().next().unwrap();
        let t = scene.registry().transform(first).unwrap();
        assert_eq!(t.position, Vec3::new(-10.5, -3.75, -5.0));
        assert_eq!(t.scale, Vec3::splat(0.7));
    }

    #[test]
    fn construction_leaves_no_pending_changes() {
        let mut scene = build_default();
        assert_eq!(scene.take_changes(), SceneChanges::default());
    }

    #[test]
    fn invalid_grid_aborts() {
        let mut store = AssetStore::new();
        let config = SceneConfig {
            grid: GridSpec::new(0, 4, 1.0, 0.0),
            ..SceneConfig::default()
        };
        assert!(matches!(
            Scene::build(config, &mut store),
            Err(ConstructionError::Layout(_))
        ));
    }

    #[test]
    fn missing_asset_aborts() {
        let mut store = AssetStore::new();
        let config = SceneConfig {
            model: "builtin:nothing".into(),
            ..SceneConfig::default()
        };
        assert!(matches!(
            Scene::build(config, &mut store),
            Err(ConstructionError::Asset(_))
        ));
    }

    #[test]
    fn bad_scale_aborts() {
        let mut store = AssetStore::new();
        let config = SceneConfig {
            instance_scale: 0.0,
            ..SceneConfig::default()
        };
        assert!(matches!(
            Scene::build(config, &mut store),
            Err(ConstructionError::Config(_))
        ));
    }

    #[test]
    fn light_move_flags_shadows() {
        let mut scene = build_default();
        scene.move_spot_light(Vec3::new(0.0, 20.0, 0.0));
        let changes = scene.take_changes();
        assert!(changes.any && changes.shadows);
        assert_eq!(scene.take_changes(), SceneChanges::default());
    }

    #[test]
    fn hover_changes_are_not_shadow_changes() {
        let mut store = AssetStore::new();
        let mut scene = Scene::build(
            SceneConfig {
                interactive: true,
                ..SceneConfig::default()
            },
            &mut store,
        )
        .unwrap();
        let id = scene.registry().ids().next().unwrap();
        scene.registry_mut().set_hovered(Some(id));
        let changes = scene.take_changes();
        assert!(changes.any);
        assert!(!changes.shadows);
    }

    #[test]
    fn spot_matrix_is_finite() {
        let scene = build_default();
        let m = scene.spot_view_projection();
        assert!(m.is_finite());
        let clip = m * scene.spot_light().target.extend(1.0);
        assert!(clip.w > 0.0);
    }
}
