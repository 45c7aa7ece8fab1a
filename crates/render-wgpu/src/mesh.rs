use bytemuck::{Pod, Zeroable};
use gridlight_assets::{Geometry, Material};
use gridlight_instances::InstanceDraw;
use wgpu::util::DeviceExt;

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl Vertex {
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &wgpu::vertex_attr_array![
            0 => Float32x3,
            1 => Float32x3,
        ],
    };

    /// Positions only, for the floor.
    pub const POSITION_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &wgpu::vertex_attr_array![0 => Float32x3],
    };
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    pub model_0: [f32; 4],
    pub model_1: [f32; 4],
    pub model_2: [f32; 4],
    pub model_3: [f32; 4],
    pub color: [f32; 4],
}

impl InstanceData {
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<InstanceData>() as u64,
        step_mode: wgpu::VertexStepMode::Instance,
        attributes: &wgpu::vertex_attr_array![
            2 => Float32x4,
            3 => Float32x4,
            4 => Float32x4,
            5 => Float32x4,
            6 => Float32x4,
        ],
    };

    /// Per-instance data; the hover/click tint overrides the material color.
    pub fn new(draw: &InstanceDraw, material: &Material) -> Self {
        let cols = draw.model.to_cols_array_2d();
        let color = draw.tint.unwrap_or(material.base_color);
        Self {
            model_0: cols[0],
            model_1: cols[1],
            model_2: cols[2],
            model_3: cols[3],
            color: color.to_vec3().extend(1.0).to_array(),
        }
    }
}

/// Vertices and u32 indices of a geometry, interleaved for upload.
pub fn vertices(geometry: &Geometry) -> Vec<Vertex> {
    geometry
        .positions
        .iter()
        .zip(&geometry.normals)
        .map(|(p, n)| Vertex {
            position: p.to_array(),
            normal: n.to_array(),
        })
        .collect()
}

/// Unit quad in the XZ plane facing +Y, centered on the origin.
pub fn floor_quad() -> (Vec<Vertex>, Vec<u32>) {
    let p = 0.5_f32;
    let n = [0.0, 1.0, 0.0];
    let vertices = vec![
        Vertex { position: [-p, 0.0, -p], normal: n },
        Vertex { position: [-p, 0.0, p], normal: n },
        Vertex { position: [p, 0.0, p], normal: n },
        Vertex { position: [p, 0.0, -p], normal: n },
    ];
    (vertices, vec![0, 1, 2, 2, 3, 0])
}

/// Geometry resident on the GPU.
#[derive(Debug)]
pub struct GpuMesh {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
}

impl GpuMesh {
    pub fn upload(device: &wgpu::Device, label: &str, vertices: &[Vertex], indices: &[u32]) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label}_vertices")),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label}_indices")),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        }
    }

    pub fn from_geometry(device: &wgpu::Device, geometry: &Geometry) -> Self {
        Self::upload(device, &geometry.name, &vertices(geometry), &geometry.indices)
    }
}

/// Instance buffer that grows to the next power of two when outgrown.
#[derive(Debug)]
pub struct InstanceBuffer {
    pub buffer: wgpu::Buffer,
    capacity: usize,
}

impl InstanceBuffer {
    pub fn new(device: &wgpu::Device, capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        Self {
            buffer: Self::allocate(device, capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Upload `instances`, reallocating first if they do not fit.
    pub fn write(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, instances: &[InstanceData]) {
        if instances.len() > self.capacity {
            self.capacity = instances.len().next_power_of_two();
            self.buffer = Self::allocate(device, self.capacity);
            tracing::debug!(capacity = self.capacity, "instance buffer grown");
        }
        if !instances.is_empty() {
            queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(instances));
        }
    }

    fn allocate(device: &wgpu::Device, capacity: usize) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("instance_buffer"),
            size: (capacity * std::mem::size_of::<InstanceData>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec3};
    use gridlight_common::{Color, InstanceId};

    #[test]
    fn instance_data_matches_layout() {
        assert_eq!(std::mem::size_of::<InstanceData>(), 80);
        assert_eq!(InstanceData::LAYOUT.array_stride, 80);
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
    }

    #[test]
    fn tint_overrides_material() {
        let material = Material::default();
        let mut draw = InstanceDraw {
            id: InstanceId(1),
            model: Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)),
            tint: None,
        };
        let plain = InstanceData::new(&draw, &material);
        assert_eq!(plain.color, material.base_color.to_vec3().extend(1.0).to_array());
        assert_eq!(plain.model_3, [1.0, 2.0, 3.0, 1.0]);

        draw.tint = Some(Color::red());
        let tinted = InstanceData::new(&draw, &material);
        assert_eq!(tinted.color, Color::red().to_vec3().extend(1.0).to_array());
        assert_ne!(tinted.color, plain.color);
    }

    #[test]
    fn cube_vertices_interleave() {
        let cube = Geometry::unit_cube();
        let verts = vertices(&cube);
        assert_eq!(verts.len(), cube.vertex_count());
        assert_eq!(verts[0].position, cube.positions[0].to_array());
        assert_eq!(verts[0].normal, cube.normals[0].to_array());
    }

    #[test]
    fn floor_quad_faces_up() {
        let (verts, indices) = floor_quad();
        assert_eq!(indices.len(), 6);
        assert!(verts.iter().all(|v| v.position[1] == 0.0 && v.normal == [0.0, 1.0, 0.0]));
        // counter-clockwise seen from above
        let a = Vec3::from(verts[0].position);
        let b = Vec3::from(verts[1].position);
        let c = Vec3::from(verts[2].position);
        assert!((b - a).cross(c - a).y > 0.0);
    }
}
