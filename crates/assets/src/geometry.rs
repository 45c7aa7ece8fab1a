use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Indexed triangle mesh in model space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub name: String,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl Geometry {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Radius of the smallest origin-centered sphere containing every vertex.
    pub fn bounding_radius(&self) -> f32 {
        self.positions
            .iter()
            .map(|p| p.length())
            .fold(0.0_f32, f32::max)
    }

    /// Unit cube centered on the origin, one quad per face.
    pub fn unit_cube() -> Self {
        Self::cuboid("unit_cube", Vec3::splat(-0.5), Vec3::splat(0.5))
    }

    /// Axis-aligned box spanning `min..max`.
    pub fn cuboid(name: &str, min: Vec3, max: Vec3) -> Self {
        let (a, b) = (min, max);
        #[rustfmt::skip]
        let faces: [([Vec3; 4], Vec3); 6] = [
            ([Vec3::new(a.x, a.y, b.z), Vec3::new(b.x, a.y, b.z), Vec3::new(b.x, b.y, b.z), Vec3::new(a.x, b.y, b.z)], Vec3::Z),
            ([Vec3::new(b.x, a.y, a.z), Vec3::new(a.x, a.y, a.z), Vec3::new(a.x, b.y, a.z), Vec3::new(b.x, b.y, a.z)], Vec3::NEG_Z),
            ([Vec3::new(b.x, a.y, b.z), Vec3::new(b.x, a.y, a.z), Vec3::new(b.x, b.y, a.z), Vec3::new(b.x, b.y, b.z)], Vec3::X),
            ([Vec3::new(a.x, a.y, a.z), Vec3::new(a.x, a.y, b.z), Vec3::new(a.x, b.y, b.z), Vec3::new(a.x, b.y, a.z)], Vec3::NEG_X),
            ([Vec3::new(a.x, b.y, b.z), Vec3::new(b.x, b.y, b.z), Vec3::new(b.x, b.y, a.z), Vec3::new(a.x, b.y, a.z)], Vec3::Y),
            ([Vec3::new(a.x, a.y, a.z), Vec3::new(b.x, a.y, a.z), Vec3::new(b.x, a.y, b.z), Vec3::new(a.x, a.y, b.z)], Vec3::NEG_Y),
        ];

        let mut positions = Vec::with_capacity(24);
        let mut normals = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (corners, normal) in faces {
            let base = positions.len() as u32;
            positions.extend_from_slice(&corners);
            normals.extend_from_slice(&[normal; 4]);
            indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }

        Self {
            name: name.to_string(),
            positions,
            normals,
            indices,
        }
    }

    /// UV sphere of radius 1.
    pub fn uv_sphere(segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);
        let mut positions = Vec::new();
        let mut normals = Vec::new();

        for ring in 0..=rings {
            let theta = ring as f32 / rings as f32 * std::f32::consts::PI;
            for seg in 0..=segments {
                let phi = seg as f32 / segments as f32 * std::f32::consts::TAU;
                let n = Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
                positions.push(n);
                normals.push(n);
            }
        }

        let stride = segments + 1;
        let mut indices = Vec::new();
        for ring in 0..rings {
            for seg in 0..segments {
                let i0 = ring * stride + seg;
                let i1 = i0 + stride;
                indices.extend_from_slice(&[i0, i0 + 1, i1, i1, i0 + 1, i1 + 1]);
            }
        }

        Self {
            name: "uv_sphere".into(),
            positions,
            normals,
            indices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_counts() {
        let cube = Geometry::unit_cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.index_count(), 36);
        assert!((cube.bounding_radius() - 0.75_f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn sphere_indices_in_range() {
        let s = Geometry::uv_sphere(16, 8);
        let n = s.vertex_count() as u32;
        assert!(s.indices.iter().all(|&i| i < n));
        assert_eq!(s.index_count() % 3, 0);
        assert!((s.bounding_radius() - 1.0).abs() < 1e-5);
    }
}
