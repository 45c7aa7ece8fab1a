//! Model loading for scene construction.
//!
//! Models are identified by a string: `builtin:cube`, `builtin:sphere`, or a
//! path to a `.gltf`/`.glb` file. Loaded bundles are cached by content hash, so
//! loading the same model twice hands back the same shared geometry.
//!
//! Loading happens once at startup; any failure here aborts the scene.

mod geometry;

pub use geometry::Geometry;

use glam::Vec3;
use gltf::mesh::util::ReadIndices;
use gridlight_common::Color;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Content-addressed asset ID computed from the identifier and the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(pub u64);

/// Surface parameters for a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub base_color: Color,
    pub roughness: f32,
    pub metalness: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".into(),
            base_color: Color::rgb(0.8, 0.8, 0.8),
            roughness: 0.5,
            metalness: 0.0,
        }
    }
}

/// Geometry plus material, shared read-only by every instance that uses it.
#[derive(Debug, Clone)]
pub struct ModelBundle {
    pub id: AssetId,
    pub geometry: Arc<Geometry>,
    pub material: Arc<Material>,
}

/// Errors from asset operations.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("model not found: {0}")]
    NotFound(String),
    #[error("glTF parse error: {0}")]
    GltfParse(String),
    #[error("unsupported model format: {0}")]
    Unsupported(String),
}

/// Source of model bundles for scene construction.
pub trait ModelLoader {
    fn load_model(&mut self, identifier: &str) -> Result<ModelBundle, AssetError>;
}

/// Caching model loader backed by built-in primitives and glTF files.
#[derive(Debug, Default)]
pub struct AssetStore {
    by_identifier: BTreeMap<String, AssetId>,
    bundles: BTreeMap<AssetId, ModelBundle>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct bundles held.
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn get(&self, id: AssetId) -> Option<&ModelBundle> {
        self.bundles.get(&id)
    }

    /// Insert a bundle built elsewhere, deduplicated by content.
    pub fn insert(&mut self, identifier: &str, geometry: Geometry, material: Material) -> ModelBundle {
        let id = content_hash(&geometry, &material);
        let bundle = self
            .bundles
            .entry(id)
            .or_insert_with(|| ModelBundle {
                id,
                geometry: Arc::new(geometry),
                material: Arc::new(material),
            })
            .clone();
        self.by_identifier.insert(identifier.to_string(), id);
        bundle
    }

    /// Import a `.gltf`/`.glb` file as one model.
    ///
    /// Every triangle primitive of every mesh is merged into a single
    /// geometry in model space. The material comes from the first material's
    /// PBR factors.
    pub fn import_gltf(&mut self, path: impl AsRef<Path>) -> Result<ModelBundle, AssetError> {
        let path = path.as_ref();
        let (doc, buffers, _images) = gltf::import(path).map_err(|e| match e {
            gltf::Error::Io(io) => AssetError::Io(io),
            other => AssetError::GltfParse(other.to_string()),
        })?;

        let mesh_name = doc
            .meshes()
            .next()
            .and_then(|m| m.name())
            .unwrap_or("gltf_mesh")
            .to_string();
        let geometry = read_geometry(&doc, &buffers, mesh_name)?;
        let material = doc
            .materials()
            .next()
            .map(|m| material_from_gltf(&m))
            .unwrap_or_default();

        tracing::info!(
            path = %path.display(),
            mesh = %geometry.name,
            vertices = geometry.vertex_count(),
            material = %material.name,
            "imported glTF model"
        );
        Ok(self.insert(&path.to_string_lossy(), geometry, material))
    }
}

impl ModelLoader for AssetStore {
    fn load_model(&mut self, identifier: &str) -> Result<ModelBundle, AssetError> {
        if let Some(bundle) = self
            .by_identifier
            .get(identifier)
            .and_then(|id| self.bundles.get(id))
        {
            tracing::debug!(identifier, "model cache hit");
            return Ok(bundle.clone());
        }

        match identifier.strip_prefix("builtin:") {
            Some("cube") => Ok(self.insert(identifier, Geometry::unit_cube(), Material::default())),
            Some("sphere") => Ok(self.insert(
                identifier,
                Geometry::uv_sphere(32, 16),
                Material {
                    name: "indianred".into(),
                    base_color: Color::indian_red(),
                    ..Material::default()
                },
            )),
            Some(_) => Err(AssetError::NotFound(identifier.to_string())),
            None => {
                let path = Path::new(identifier);
                match path.extension().and_then(|e| e.to_str()) {
                    Some("gltf" | "glb") => self.import_gltf(path),
                    _ => Err(AssetError::Unsupported(identifier.to_string())),
                }
            }
        }
    }
}

/// Merge every triangle primitive into one indexed mesh.
fn read_geometry(
    doc: &gltf::Document,
    buffers: &[gltf::buffer::Data],
    name: String,
) -> Result<Geometry, AssetError> {
    let mut positions: Vec<Vec3> = Vec::new();
    let mut normals: Vec<Vec3> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();
    let mut missing_normals = false;

    for mesh in doc.meshes() {
        for prim in mesh.primitives() {
            if prim.mode() != gltf::mesh::Mode::Triangles {
                tracing::debug!(mesh = ?mesh.name(), mode = ?prim.mode(), "skipping non-triangle primitive");
                continue;
            }
            let reader = prim.reader(|b| buffers.get(b.index()).map(|bb| bb.0.as_slice()));
            let Some(prim_positions) = reader.read_positions() else {
                continue;
            };
            let start = positions.len() as u32;
            positions.extend(prim_positions.map(Vec3::from_array));
            let count = positions.len() as u32 - start;

            let prim_normals: Vec<Vec3> = reader
                .read_normals()
                .map(|n| n.map(Vec3::from_array).collect())
                .unwrap_or_default();
            if prim_normals.len() == count as usize {
                normals.extend(prim_normals);
            } else {
                missing_normals = true;
                normals.extend(std::iter::repeat_n(Vec3::ZERO, count as usize));
            }

            let local: Vec<u32> = match reader.read_indices() {
                Some(ReadIndices::U8(i)) => i.map(u32::from).collect(),
                Some(ReadIndices::U16(i)) => i.map(u32::from).collect(),
                Some(ReadIndices::U32(i)) => i.collect(),
                None => (0..count).collect(),
            };
            if let Some(bad) = local.iter().find(|&&i| i >= count) {
                return Err(AssetError::GltfParse(format!(
                    "index {bad} out of range for {count} vertices"
                )));
            }
            indices.extend(local.into_iter().map(|i| i + start));
        }
    }

    if positions.is_empty() || indices.is_empty() {
        return Err(AssetError::GltfParse("no triangle geometry".into()));
    }
    let mut geometry = Geometry {
        name,
        positions,
        normals,
        indices,
    };
    if missing_normals {
        fill_missing_normals(&mut geometry);
    }
    Ok(geometry)
}

/// Area-weighted vertex normals for vertices the file left without one.
fn fill_missing_normals(geometry: &mut Geometry) {
    let mut accumulated = vec![Vec3::ZERO; geometry.positions.len()];
    for tri in geometry.indices.chunks_exact(3) {
        let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| i as usize);
        let p = &geometry.positions;
        let face = (p[b] - p[a]).cross(p[c] - p[a]);
        for i in [a, b, c] {
            accumulated[i] += face;
        }
    }
    for (normal, sum) in geometry.normals.iter_mut().zip(accumulated) {
        if *normal == Vec3::ZERO {
            *normal = sum.try_normalize().unwrap_or(Vec3::Y);
        }
    }
}

fn material_from_gltf(material: &gltf::Material<'_>) -> Material {
    let pbr = material.pbr_metallic_roughness();
    let [r, g, b, _] = pbr.base_color_factor();
    Material {
        name: material.name().unwrap_or("unnamed").to_string(),
        base_color: Color::rgb(r, g, b),
        roughness: pbr.roughness_factor(),
        metalness: pbr.metallic_factor(),
    }
}

fn content_hash(geometry: &Geometry, material: &Material) -> AssetId {
    let mut hasher = Sha256::new();
    hasher.update(geometry.name.as_bytes());
    for p in &geometry.positions {
        for c in p.to_array() {
            hasher.update(c.to_le_bytes());
        }
    }
    for i in &geometry.indices {
        hasher.update(i.to_le_bytes());
    }
    hasher.update(material.name.as_bytes());
    for c in material.base_color.to_array() {
        hasher.update(c.to_le_bytes());
    }
    hasher.update(material.roughness.to_le_bytes());
    hasher.update(material.metalness.to_le_bytes());
    let result = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&result[..8]);
    AssetId(u64::from_le_bytes(bytes))
}

pub fn crate_info() -> &'static str {
    "gridlight-assets v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TRIANGLE_GLTF: &str = r#"{
        "asset": { "version": "2.0" },
        "buffers": [ { "uri": "triangle.bin", "byteLength": 44 } ],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
            { "buffer": 0, "byteOffset": 36, "byteLength": 6 }
        ],
        "accessors": [
            { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
              "min": [-1.0, 0.0, -0.5], "max": [1.0, 2.0, 0.5] },
            { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }
        ],
        "meshes": [ { "name": "computer", "primitives": [
            { "attributes": { "POSITION": 0 }, "indices": 1, "material": 0 } ] } ],
        "materials": [ { "name": "screen", "pbrMetallicRoughness": {
            "baseColorFactor": [0.1, 0.2, 0.3, 1.0], "roughnessFactor": 0.25 } } ]
    }"#;

    const TRIANGLE: [[f32; 3]; 3] = [[-1.0, 0.0, -0.5], [1.0, 0.0, 0.5], [0.0, 2.0, 0.0]];

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".gltf").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    /// Writes `triangle.gltf` and, when `with_buffer` is set, its `triangle.bin`.
    fn triangle_dir(with_buffer: bool) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("triangle.gltf"), TRIANGLE_GLTF).unwrap();
        if with_buffer {
            let mut bin: Vec<u8> = TRIANGLE
                .iter()
                .flatten()
                .flat_map(|c| c.to_le_bytes())
                .collect();
            for i in [0u16, 1, 2] {
                bin.extend(i.to_le_bytes());
            }
            bin.extend([0, 0]);
            std::fs::write(dir.path().join("triangle.bin"), bin).unwrap();
        }
        dir
    }

    #[test]
    fn builtin_cube_loads() {
        let mut store = AssetStore::new();
        let bundle = store.load_model("builtin:cube").unwrap();
        assert_eq!(bundle.geometry.index_count(), 36);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn repeated_loads_share_geometry() {
        let mut store = AssetStore::new();
        let a = store.load_model("builtin:sphere").unwrap();
        let b = store.load_model("builtin:sphere").unwrap();
        assert!(Arc::ptr_eq(&a.geometry, &b.geometry));
        assert_eq!(a.id, b.id);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unknown_builtin_is_not_found() {
        let mut store = AssetStore::new();
        assert!(matches!(
            store.load_model("builtin:teapot"),
            Err(AssetError::NotFound(_))
        ));
    }

    #[test]
    fn unsupported_extension() {
        let mut store = AssetStore::new();
        assert!(matches!(
            store.load_model("model.fbx"),
            Err(AssetError::Unsupported(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let mut store = AssetStore::new();
        assert!(matches!(
            store.load_model("/definitely/not/here.gltf"),
            Err(AssetError::Io(_))
        ));
    }

    #[test]
    fn gltf_mesh_reads_vertex_buffers() {
        let dir = triangle_dir(true);
        let path = dir.path().join("triangle.gltf");
        let mut store = AssetStore::new();
        let bundle = store.load_model(path.to_str().unwrap()).unwrap();

        let geometry = &bundle.geometry;
        assert_eq!(geometry.name, "computer");
        assert_eq!(geometry.vertex_count(), 3);
        assert_eq!(geometry.indices, vec![0, 1, 2]);
        let expected: Vec<Vec3> = TRIANGLE.iter().copied().map(Vec3::from_array).collect();
        assert_eq!(geometry.positions, expected);

        // No NORMAL attribute: every vertex gets the face normal.
        let face = Vec3::new(-2.0, 0.0, 4.0).normalize();
        assert_eq!(geometry.normals.len(), 3);
        for n in &geometry.normals {
            assert!((*n - face).length() < 1e-5, "{n:?}");
        }

        assert_eq!(bundle.material.name, "screen");
        assert!((bundle.material.base_color.to_array()[2] - 0.3).abs() < 1e-6);
        assert_eq!(bundle.material.roughness, 0.25);
        // metallicFactor defaults to 1.0 in glTF
        assert_eq!(bundle.material.metalness, 1.0);

        let again = store.load_model(path.to_str().unwrap()).unwrap();
        assert!(Arc::ptr_eq(&bundle.geometry, &again.geometry));
    }

    #[test]
    fn missing_buffer_is_io_error() {
        let dir = triangle_dir(false);
        let mut store = AssetStore::new();
        assert!(matches!(
            store.import_gltf(dir.path().join("triangle.gltf")),
            Err(AssetError::Io(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn corrupt_gltf_is_parse_error() {
        let file = write_temp("{ not json");
        let mut store = AssetStore::new();
        assert!(matches!(
            store.import_gltf(file.path()),
            Err(AssetError::GltfParse(_))
        ));

        let file = write_temp(r#"{ "asset": {"version": "2.0"}, "meshes": [] }"#);
        assert!(matches!(
            store.import_gltf(file.path()),
            Err(AssetError::GltfParse(_))
        ));
    }
}
