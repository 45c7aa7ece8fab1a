use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use gridlight_render::{BloomConfig, CameraState, DepthOfFieldConfig, ReflectionConfig, reflection_matrix};
use gridlight_scene::Scene;

/// Longest tap run a single blur invocation makes on either side of a texel.
pub const MAX_BLUR_TAPS: u32 = 32;

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Globals {
    pub view_proj: [[f32; 4]; 4],
    pub light_view_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 4],
    pub light_pos: [f32; 4],
    pub light_dir: [f32; 4],
    pub sky: [f32; 4],
    pub ground: [f32; 4],
    pub clip_plane: [f32; 4],
    pub params: [f32; 4],
}

impl Globals {
    /// Uniforms for the primary pass. Nothing is clipped.
    pub fn primary(scene: &Scene, camera: &CameraState, shadows_ready: bool) -> Self {
        Self::build(
            scene,
            camera,
            camera.view_projection(),
            Vec4::new(0.0, 0.0, 0.0, 1.0),
            shadows_ready,
            false,
        )
    }

    /// Uniforms for the mirrored pass: the camera is reflected across the
    /// floor and everything below the floor is discarded.
    pub fn mirrored(scene: &Scene, camera: &CameraState, shadows_ready: bool) -> Self {
        let h = scene.floor_height();
        Self::build(
            scene,
            camera,
            camera.view_projection() * reflection_matrix(h),
            Vec4::new(0.0, 1.0, 0.0, -h),
            shadows_ready,
            true,
        )
    }

    fn build(
        scene: &Scene,
        camera: &CameraState,
        view_proj: Mat4,
        clip_plane: Vec4,
        shadows_ready: bool,
        mirror: bool,
    ) -> Self {
        let spot = scene.spot_light();
        let hemi = &scene.config().hemisphere;
        let dir = (spot.target - spot.position).normalize_or(Vec3::NEG_Y);
        let cos_outer = spot.angle.cos();
        let cos_inner = (spot.angle * (1.0 - spot.penumbra.clamp(0.0, 1.0)))
            .cos()
            .max(cos_outer + 1e-4);

        Self {
            view_proj: view_proj.to_cols_array_2d(),
            light_view_proj: scene.spot_view_projection().to_cols_array_2d(),
            camera_pos: camera.position.extend(1.0).to_array(),
            light_pos: spot.position.extend(spot.intensity).to_array(),
            light_dir: dir.extend(cos_outer).to_array(),
            sky: hemi.sky_color.to_vec3().extend(hemi.intensity).to_array(),
            ground: hemi.ground_color.to_vec3().extend(cos_inner).to_array(),
            clip_plane: clip_plane.to_array(),
            params: [
                camera.near,
                camera.far,
                if shadows_ready { 1.0 } else { 0.0 },
                if mirror { 1.0 } else { 0.0 },
            ],
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct FloorUniforms {
    pub model: [[f32; 4]; 4],
    pub base: [f32; 4],
    pub mix_params: [f32; 4],
    pub fade: [f32; 4],
}

impl FloorUniforms {
    /// `viewport` is the size of the target the floor is drawn into;
    /// `available` is false until a reflection has been rendered.
    pub fn new(
        scene: &Scene,
        reflection: &ReflectionConfig,
        viewport: (u32, u32),
        available: bool,
    ) -> Self {
        let min = reflection.min_depth_threshold;
        // smoothstep needs a non-empty band
        let max = reflection.max_depth_threshold.max(min + 1e-4);
        Self {
            model: scene.floor_matrix().to_cols_array_2d(),
            base: reflection
                .color
                .to_vec3()
                .extend(reflection.mix_strength)
                .to_array(),
            mix_params: [
                reflection.blur_mix(),
                reflection.reflectance(),
                reflection.fade_exponent(),
                if available { 1.0 } else { 0.0 },
            ],
            fade: [min, max, viewport.0.max(1) as f32, viewport.1.max(1) as f32],
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct BlurUniforms {
    pub direction: [f32; 2],
    pub taps: f32,
    pub _pad: f32,
}

impl BlurUniforms {
    /// Box blur of `radius` pixels along one axis of a target `extent`
    /// pixels long. Wide radii are covered with strided taps.
    pub fn along(horizontal: bool, radius: u32, extent: u32) -> Self {
        let stride = radius.div_ceil(MAX_BLUR_TAPS).max(1);
        let taps = radius.div_ceil(stride);
        let step = stride as f32 / extent.max(1) as f32;
        Self {
            direction: if horizontal { [step, 0.0] } else { [0.0, step] },
            taps: taps as f32,
            _pad: 0.0,
        }
    }

    /// Single tap; a resampling copy.
    pub fn copy() -> Self {
        Self {
            direction: [0.0, 0.0],
            taps: 0.0,
            _pad: 0.0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct BloomUniforms {
    pub threshold: f32,
    pub smoothing: f32,
    pub intensity: f32,
    pub radius: f32,
}

impl From<&BloomConfig> for BloomUniforms {
    fn from(config: &BloomConfig) -> Self {
        Self {
            threshold: config.luminance_threshold,
            smoothing: config.luminance_smoothing,
            intensity: config.intensity,
            radius: config.radius,
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct DofUniforms {
    pub focus: f32,
    pub focal_length: f32,
    pub near: f32,
    pub far: f32,
}

impl DofUniforms {
    pub fn new(config: &DepthOfFieldConfig, camera: &CameraState) -> Self {
        Self {
            focus: camera.normalized_depth(config.focus_target),
            focal_length: config.focal_length,
            near: camera.near,
            far: camera.far,
        }
    }
}
