use std::collections::BTreeMap;
use std::sync::Arc;

use glam::{Mat4, Vec3};
use gridlight_assets::{Geometry, Material};
use gridlight_common::{Color, GeometryHandle, InstanceId, Transform};

use crate::interaction::Interaction;

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("geometry handle {0:?} was never registered")]
    UnknownGeometry(GeometryHandle),
    #[error("instance {0} not found")]
    UnknownInstance(InstanceId),
}

/// Events produced by registry mutations.
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceEvent {
    Added {
        id: InstanceId,
        geometry: GeometryHandle,
    },
    Removed {
        id: InstanceId,
    },
    Moved {
        id: InstanceId,
        old: Transform,
        new: Transform,
    },
    InteractionChanged {
        id: InstanceId,
        old: Interaction,
        new: Interaction,
    },
}

impl InstanceEvent {
    /// Whether this change alters the silhouette of a shadow caster.
    pub fn affects_shadows(&self) -> bool {
        match self {
            Self::Added { .. } | Self::Removed { .. } | Self::Moved { .. } => true,
            // hover only tints; a click changes the render scale
            Self::InteractionChanged { old, new, .. } => old.clicked != new.clicked,
        }
    }
}

#[derive(Debug, Clone)]
struct GeometryEntry {
    geometry: Arc<Geometry>,
    material: Arc<Material>,
}

#[derive(Debug, Clone)]
struct InstanceRecord {
    geometry: GeometryHandle,
    transform: Transform,
    interaction: Option<Interaction>,
}

impl InstanceRecord {
    fn render_transform(&self) -> Transform {
        match self.interaction {
            Some(i) => Transform {
                scale: self.transform.scale * i.scale_factor(),
                ..self.transform
            },
            None => self.transform,
        }
    }
}

/// One instance as the renderer sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceDraw {
    pub id: InstanceId,
    pub model: Mat4,
    /// Overrides the material color when set.
    pub tint: Option<Color>,
}

/// Every instance of one geometry: drawn with a single instanced submission.
#[derive(Debug, Clone)]
pub struct DrawBatch<'a> {
    pub handle: GeometryHandle,
    pub geometry: &'a Arc<Geometry>,
    pub material: &'a Arc<Material>,
    pub instances: Vec<InstanceDraw>,
}

/// Geometry table plus stable-id instance records.
///
/// Uses BTreeMap so iteration (and therefore draw order) follows id order.
#[derive(Debug, Clone, Default)]
pub struct InstanceRegistry {
    geometries: Vec<GeometryEntry>,
    instances: BTreeMap<InstanceId, InstanceRecord>,
    next_id: u64,
    events: Vec<InstanceEvent>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a geometry to the table. Registering the same `Arc` twice returns
    /// the original handle.
    pub fn register(&mut self, geometry: Arc<Geometry>, material: Arc<Material>) -> GeometryHandle {
        if let Some(index) = self
            .geometries
            .iter()
            .position(|e| Arc::ptr_eq(&e.geometry, &geometry) && Arc::ptr_eq(&e.material, &material))
        {
            return GeometryHandle(index as u32);
        }
        let handle = GeometryHandle(self.geometries.len() as u32);
        tracing::debug!(
            ?handle,
            name = %geometry.name,
            vertices = geometry.vertex_count(),
            "registered geometry"
        );
        self.geometries.push(GeometryEntry { geometry, material });
        handle
    }

    pub fn geometry(&self, handle: GeometryHandle) -> Option<&Arc<Geometry>> {
        self.geometries.get(handle.0 as usize).map(|e| &e.geometry)
    }

    pub fn material(&self, handle: GeometryHandle) -> Option<&Arc<Material>> {
        self.geometries.get(handle.0 as usize).map(|e| &e.material)
    }

    pub fn geometry_count(&self) -> usize {
        self.geometries.len()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Place a new instance of `handle`.
    pub fn add_instance(
        &mut self,
        handle: GeometryHandle,
        transform: Transform,
    ) -> Result<InstanceId, RegistryError> {
        self.insert(handle, transform, None)
    }

    /// Place an instance that reacts to hover and click.
    pub fn add_interactive_instance(
        &mut self,
        handle: GeometryHandle,
        transform: Transform,
    ) -> Result<InstanceId, RegistryError> {
        self.insert(handle, transform, Some(Interaction::default()))
    }

    fn insert(
        &mut self,
        handle: GeometryHandle,
        transform: Transform,
        interaction: Option<Interaction>,
    ) -> Result<InstanceId, RegistryError> {
        if handle.0 as usize >= self.geometries.len() {
            return Err(RegistryError::UnknownGeometry(handle));
        }
        let id = InstanceId(self.next_id);
        self.next_id += 1;
        self.instances.insert(
            id,
            InstanceRecord {
                geometry: handle,
                transform,
                interaction,
            },
        );
        self.events.push(InstanceEvent::Added {
            id,
            geometry: handle,
        });
        Ok(id)
    }

    /// Remove an instance. Surviving ids are untouched.
    pub fn remove_instance(&mut self, id: InstanceId) -> Result<Transform, RegistryError> {
        let record = self
            .instances
            .remove(&id)
            .ok_or(RegistryError::UnknownInstance(id))?;
        self.events.push(InstanceEvent::Removed { id });
        Ok(record.transform)
    }

    pub fn transform(&self, id: InstanceId) -> Option<&Transform> {
        self.instances.get(&id).map(|r| &r.transform)
    }

    pub fn geometry_of(&self, id: InstanceId) -> Option<GeometryHandle> {
        self.instances.get(&id).map(|r| r.geometry)
    }

    /// Replace an instance's transform, returning the previous one.
    pub fn set_transform(
        &mut self,
        id: InstanceId,
        transform: Transform,
    ) -> Result<Transform, RegistryError> {
        let record = self
            .instances
            .get_mut(&id)
            .ok_or(RegistryError::UnknownInstance(id))?;
        let old = std::mem::replace(&mut record.transform, transform);
        if old != transform {
            self.events.push(InstanceEvent::Moved {
                id,
                old,
                new: transform,
            });
        }
        Ok(old)
    }

    /// Edit an instance's transform in place.
    pub fn update_transform(
        &mut self,
        id: InstanceId,
        edit: impl FnOnce(&mut Transform),
    ) -> Result<(), RegistryError> {
        let mut t = *self
            .transform(id)
            .ok_or(RegistryError::UnknownInstance(id))?;
        edit(&mut t);
        self.set_transform(id, t).map(|_| ())
    }

    pub fn interaction(&self, id: InstanceId) -> Option<Interaction> {
        self.instances.get(&id).and_then(|r| r.interaction)
    }

    /// Mark `hovered` (or nothing) as the hovered instance; clears the flag
    /// on every other interactive instance.
    pub fn set_hovered(&mut self, hovered: Option<InstanceId>) {
        let mut changed = Vec::new();
        for (id, record) in self.instances.iter_mut() {
            if let Some(interaction) = record.interaction.as_mut() {
                let want = hovered == Some(*id);
                if interaction.hovered != want {
                    let old = *interaction;
                    interaction.hovered = want;
                    changed.push(InstanceEvent::InteractionChanged {
                        id: *id,
                        old,
                        new: *interaction,
                    });
                }
            }
        }
        self.events.extend(changed);
    }

    /// Flip the clicked flag. Returns the new state, or `None` if the instance
    /// is not interactive.
    pub fn toggle_clicked(&mut self, id: InstanceId) -> Result<Option<bool>, RegistryError> {
        let record = self
            .instances
            .get_mut(&id)
            .ok_or(RegistryError::UnknownInstance(id))?;
        let Some(interaction) = record.interaction.as_mut() else {
            return Ok(None);
        };
        let old = *interaction;
        interaction.clicked = !interaction.clicked;
        let new = *interaction;
        self.events.push(InstanceEvent::InteractionChanged { id, old, new });
        Ok(Some(new.clicked))
    }

    /// Visit every instance's transform in id order.
    pub fn for_each(&self, mut visit: impl FnMut(InstanceId, &Transform)) {
        for (id, record) in &self.instances {
            visit(*id, &record.transform);
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.instances.keys().copied()
    }

    /// Group instances by geometry for instanced submission.
    pub fn batches(&self) -> Vec<DrawBatch<'_>> {
        let mut by_handle: BTreeMap<GeometryHandle, Vec<InstanceDraw>> = BTreeMap::new();
        for (id, record) in &self.instances {
            by_handle.entry(record.geometry).or_default().push(InstanceDraw {
                id: *id,
                model: record.render_transform().matrix(),
                tint: record.interaction.map(|i| i.tint()),
            });
        }
        by_handle
            .into_iter()
            .map(|(handle, instances)| {
                let entry = &self.geometries[handle.0 as usize];
                DrawBatch {
                    handle,
                    geometry: &entry.geometry,
                    material: &entry.material,
                    instances,
                }
            })
            .collect()
    }

    /// Closest interactive-or-not instance hit by a ray, using bounding
    /// spheres.
    pub fn pick(&self, origin: Vec3, direction: Vec3) -> Option<InstanceId> {
        let dir = direction.normalize_or_zero();
        if dir == Vec3::ZERO {
            return None;
        }
        let mut best: Option<(f32, InstanceId)> = None;
        for (id, record) in &self.instances {
            let t = record.render_transform();
            let radius = self.geometries[record.geometry.0 as usize]
                .geometry
                .bounding_radius()
                * t.scale.max_element();
            let Some(dist) = ray_sphere(origin, dir, t.position, radius) else {
                continue;
            };
            if best.is_none_or(|(d, _)| dist < d) {
                best = Some((dist, *id));
            }
        }
        best.map(|(_, id)| id)
    }

    /// Drain and return all pending events.
    pub fn drain_events(&mut self) -> Vec<InstanceEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[InstanceEvent] {
        &self.events
    }
}

fn ray_sphere(origin: Vec3, dir: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let oc = origin - center;
    let b = oc.dot(dir);
    let c = oc.length_squared() - radius * radius;
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let sqrt = disc.sqrt();
    let near = -b - sqrt;
    let far = -b + sqrt;
    if near >= 0.0 {
        Some(near)
    } else if far >= 0.0 {
        Some(0.0)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube_registry() -> (InstanceRegistry, GeometryHandle) {
        let mut reg = InstanceRegistry::new();
        let handle = reg.register(
            Arc::new(Geometry::unit_cube()),
            Arc::new(Material::default()),
        );
        (reg, handle)
    }

    #[test]
    fn instances_share_one_geometry() {
        let (mut reg, handle) = cube_registry();
        for i in 0..10 {
            reg.add_instance(handle, Transform::from_position(Vec3::X * i as f32))
                .unwrap();
        }
        assert_eq!(reg.len(), 10);
        assert_eq!(reg.geometry_count(), 1);

        let batches = reg.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].instances.len(), 10);
        assert!(Arc::ptr_eq(batches[0].geometry, reg.geometry(handle).unwrap()));
    }

    #[test]
    fn register_same_arc_reuses_handle() {
        let (mut reg, handle) = cube_registry();
        let geometry = reg.geometry(handle).unwrap().clone();
        let material = reg.material(handle).unwrap().clone();
        assert_eq!(reg.register(geometry, material), handle);
        assert_eq!(reg.geometry_count(), 1);
    }

    #[test]
    fn mutating_one_leaves_others() {
        let (mut reg, handle) = cube_registry();
        let ids: Vec<_> = (0..5)
            .map(|i| {
                reg.add_instance(handle, Transform::from_position(Vec3::Y * i as f32))
                    .unwrap()
            })
            .collect();

        reg.update_transform(ids[2], |t| t.position = Vec3::splat(9.0))
            .unwrap();

        for (i, id) in ids.iter().enumerate() {
            let p = reg.transform(*id).unwrap().position;
            if i == 2 {
                assert_eq!(p, Vec3::splat(9.0));
            } else {
                assert_eq!(p, Vec3::Y * i as f32);
            }
        }
    }

    #[test]
    fn removal_keeps_ids_stable() {
        let (mut reg, handle) = cube_registry();
        let a = reg.add_instance(handle, Transform::default()).unwrap();
        let b = reg.add_instance(handle, Transform::default()).unwrap();
        let c = reg.add_instance(handle, Transform::default()).unwrap();

        reg.remove_instance(b).unwrap();
        let d = reg.add_instance(handle, Transform::default()).unwrap();

        let ids: Vec<_> = reg.ids().collect();
        assert_eq!(ids, vec![a, c, d]);
        assert_ne!(d, b);
        assert!(reg.transform(c).is_some());
        assert_eq!(
            reg.remove_instance(b),
            Err(RegistryError::UnknownInstance(b))
        );
    }

    #[test]
    fn unknown_geometry_rejected() {
        let mut reg = InstanceRegistry::new();
        assert_eq!(
            reg.add_instance(GeometryHandle(3), Transform::default()),
            Err(RegistryError::UnknownGeometry(GeometryHandle(3)))
        );
    }

    #[test]
    fn for_each_visits_in_id_order() {
        let (mut reg, handle) = cube_registry();
        for i in 0..4 {
            reg.add_instance(handle, Transform::from_position(Vec3::Z * i as f32))
                .unwrap();
        }
        let mut seen = Vec::new();
        reg.for_each(|id, t| seen.push((id, t.position.z)));
        assert_eq!(seen.len(), 4);
        assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(seen[3].1, 3.0);
    }

    #[test]
    fn events_track_mutations() {
        let (mut reg, handle) = cube_registry();
        let id = reg.add_instance(handle, Transform::default()).unwrap();
        reg.set_transform(id, Transform::default()).unwrap();
        reg.set_transform(id, Transform::from_position(Vec3::X)).unwrap();
        reg.remove_instance(id).unwrap();

        let events = reg.drain_events();
        assert_eq!(events.len(), 3, "no-op set_transform must not emit");
        assert!(matches!(events[0], InstanceEvent::Added { .. }));
        assert!(matches!(events[1], InstanceEvent::Moved { .. }));
        assert!(matches!(events[2], InstanceEvent::Removed { .. }));
        assert!(reg.events().is_empty());
    }

    #[test]
    fn hover_and_click_drive_draws() {
        let (mut reg, handle) = cube_registry();
        let plain = reg.add_instance(handle, Transform::default()).unwrap();
        let live = reg
            .add_interactive_instance(handle, Transform::from_position(Vec3::X * 3.0))
            .unwrap();
        reg.drain_events();

        reg.set_hovered(Some(live));
        assert_eq!(reg.toggle_clicked(live).unwrap(), Some(true));
        assert_eq!(reg.toggle_clicked(plain).unwrap(), None);

        let events = reg.drain_events();
        assert!(!events[0].affects_shadows());
        assert!(events[1].affects_shadows());

        let batch = &reg.batches()[0];
        let draw = batch.instances.iter().find(|d| d.id == live).unwrap();
        assert_eq!(draw.tint, Some(Color::red()));
        let scale = draw.model.to_scale_rotation_translation().0;
        assert!((scale.x - 0.5).abs() < 1e-6);

        let plain_draw = batch.instances.iter().find(|d| d.id == plain).unwrap();
        assert_eq!(plain_draw.tint, None);
    }

    #[test]
    fn pick_nearest_along_ray() {
        let (mut reg, handle) = cube_registry();
        let near = reg
            .add_instance(handle, Transform::from_position(Vec3::new(0.0, 0.0, -3.0)))
            .unwrap();
        reg.add_instance(handle, Transform::from_position(Vec3::new(0.0, 0.0, -6.0)))
            .unwrap();
        reg.add_instance(handle, Transform::from_position(Vec3::new(5.0, 0.0, -3.0)))
            .unwrap();

        assert_eq!(reg.pick(Vec3::ZERO, Vec3::NEG_Z), Some(near));
        assert_eq!(reg.pick(Vec3::ZERO, Vec3::Y), None);
    }
}
