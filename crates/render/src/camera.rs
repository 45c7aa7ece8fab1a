use glam::{Mat4, Quat, Vec3};
use gridlight_input::{InputFrame, PointerState, Viewport};
use serde::{Deserialize, Serialize};

/// Differences smaller than this snap straight to the target.
pub const DAMP_EPSILON: f32 = 0.001;

/// Exponentially approach `target` from `current`.
///
/// `alpha = 1 - e^(-omega * dt)` with `omega = 2 / smooth_time`, so the step
/// is always a fraction in [0, 1) of the remaining error: the value never
/// overshoots and never jumps, whatever `dt` is.
pub fn damp(current: f32, target: f32, smooth_time: f32, dt: f32) -> f32 {
    if (current - target).abs() <= DAMP_EPSILON {
        return target;
    }
    if dt.is_nan() || dt <= 0.0 {
        return current;
    }
    let omega = 2.0 / smooth_time.max(1e-4);
    let alpha = 1.0 - (-omega * dt).exp();
    current + (target - current) * alpha
}

/// Per-axis [`damp`].
pub fn damp3(current: Vec3, target: Vec3, smooth_time: f32, dt: f32) -> Vec3 {
    Vec3::new(
        damp(current.x, target.x, smooth_time, dt),
        damp(current.y, target.y, smooth_time, dt),
        damp(current.z, target.z, smooth_time, dt),
    )
}

/// Session camera parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub position: Vec3,
    pub look_at: Vec3,
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    /// Z of the rig's target position.
    pub rig_distance: f32,
    pub smooth_time: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: Vec3::new(-1.5, 1.0, 5.5),
            look_at: Vec3::ZERO,
            fov_degrees: 45.0,
            near: 1.0,
            far: 20.0,
            rig_distance: 5.5,
            smooth_time: 0.5,
        }
    }
}

/// Live camera. Only the rig moves it once the session starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub position: Vec3,
    pub look_at: Vec3,
    pub orientation: Quat,
    /// Vertical field of view, radians.
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl CameraState {
    pub fn from_config(config: &CameraConfig, aspect: f32) -> Self {
        let mut camera = Self {
            position: config.position,
            look_at: config.look_at,
            orientation: Quat::IDENTITY,
            fov: config.fov_degrees.to_radians(),
            aspect,
            near: config.near,
            far: config.far,
        };
        camera.aim();
        camera
    }

    /// Turn to face `look_at` from the current position.
    pub fn aim(&mut self) {
        let forward = (self.look_at - self.position).normalize_or_zero();
        if forward == Vec3::ZERO {
            return;
        }
        // inverse of a right-handed view matrix is the camera's world rotation
        let view = Mat4::look_to_rh(Vec3::ZERO, forward, Vec3::Y);
        self.orientation = Quat::from_mat4(&view.inverse());
    }

    pub fn forward(&self) -> Vec3 {
        self.orientation * Vec3::NEG_Z
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.look_at, Vec3::Y)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Visible world-space extent at the look-at distance.
    pub fn viewport(&self) -> Viewport {
        Viewport::at_distance(self.fov, self.aspect, self.position.distance(self.look_at))
    }

    /// Depth of a world point mapped to [0, 1] between near and far.
    pub fn normalized_depth(&self, point: Vec3) -> f32 {
        let view_z = -self.view_matrix().transform_point3(point).z;
        ((view_z - self.near) / (self.far - self.near)).clamp(0.0, 1.0)
    }

    /// World-space ray through a pointer position.
    pub fn ray(&self, pointer: PointerState) -> (Vec3, Vec3) {
        let inv = self.view_projection().inverse();
        let near = inv.project_point3(Vec3::new(pointer.x, pointer.y, 0.0));
        let far = inv.project_point3(Vec3::new(pointer.x, pointer.y, 1.0));
        (near, (far - near).normalize_or_zero())
    }
}

/// Logical rig state after an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigState {
    /// Position already sat on the target; nothing moved.
    Idle,
    Tracking,
}

/// Moves the camera toward a pointer-driven target every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraRig {
    pub distance: f32,
    pub smooth_time: f32,
}

impl Default for CameraRig {
    fn default() -> Self {
        Self::from_config(&CameraConfig::default())
    }
}

impl CameraRig {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            distance: config.rig_distance,
            smooth_time: config.smooth_time,
        }
    }

    /// Where the camera wants to be for this input.
    pub fn target(&self, input: &InputFrame) -> Vec3 {
        Vec3::new(
            input.pointer.x * input.viewport.width / 3.0,
            (1.0 + input.pointer.y) / 2.0,
            self.distance,
        )
    }

    /// Damp the camera toward the target, then re-aim it.
    pub fn update(&self, camera: &mut CameraState, input: &InputFrame, dt: f32) -> RigState {
        let target = self.target(input);
        let before = camera.position;
        camera.position = damp3(before, target, self.smooth_time, dt);
        camera.aim();

        if camera.position == before {
            RigState::Idle
        } else {
            tracing::trace!(
                x = camera.position.x,
                y = camera.position.y,
                z = camera.position.z,
                error = camera.position.distance(target),
                "camera rig step"
            );
            RigState::Tracking
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(x: f32, y: f32) -> InputFrame {
        InputFrame {
            pointer: PointerState::new(x, y),
            viewport: Viewport {
                width: 6.0,
                height: 4.0,
            },
        }
    }

    #[test]
    fn target_formula() {
        let rig = CameraRig::default();
        let t = rig.target(&frame(0.5, -1.0));
        assert!((t.x - 1.0).abs() < 1e-6);
        assert_eq!(t.y, 0.0);
        assert_eq!(t.z, 5.5);

        let centered = rig.target(&frame(0.0, 0.0));
        assert_eq!(centered, Vec3::new(0.0, 0.5, 5.5));
    }

    #[test]
    fn fixed_point_is_idempotent() {
        let rig = CameraRig::default();
        let input = frame(0.3, 0.2);
        let mut cam = CameraState::from_config(&CameraConfig::default(), 1.5);
        cam.position = rig.target(&input);

        let before = cam.position;
        let state = rig.update(&mut cam, &input, 1.0 / 60.0);
        assert_eq!(state, RigState::Idle);
        assert!((cam.position - before).length() < 1e-6);
    }

    #[test]
    fn never_overshoots_constant_target() {
        let rig = CameraRig::default();
        let input = frame(-1.0, 1.0);
        let target = rig.target(&input);
        let mut cam = CameraState::from_config(&CameraConfig::default(), 1.5);

        let mut prev = (cam.position - target).abs();
        for dt in [0.001, 0.016, 0.016, 0.1, 0.5, 2.0, 0.016, 10.0] {
            rig.update(&mut cam, &input, dt);
            let err = (cam.position - target).abs();
            assert!(err.x <= prev.x && err.y <= prev.y && err.z <= prev.z);
            prev = err;
        }
        assert!((cam.position - target).length() < 1e-3);
    }

    #[test]
    fn large_jump_is_continuous() {
        let rig = CameraRig::default();
        let mut cam = CameraState::from_config(&CameraConfig::default(), 1.5);
        rig.update(&mut cam, &frame(-1.0, -1.0), 1.0);
        let start = cam.position;

        rig.update(&mut cam, &frame(1.0, 1.0), 1.0 / 60.0);
        let step = (cam.position - start).length();
        let span = (rig.target(&frame(1.0, 1.0)) - start).length();
        assert!(step < span * 0.1, "step {step} vs span {span}");
    }

    #[test]
    fn zero_dt_does_not_move() {
        let rig = CameraRig::default();
        let mut cam = CameraState::from_config(&CameraConfig::default(), 1.5);
        let before = cam.position;
        assert_eq!(rig.update(&mut cam, &frame(1.0, 1.0), 0.0), RigState::Idle);
        assert_eq!(cam.position, before);
    }

    #[test]
    fn camera_faces_look_at_after_update() {
        let rig = CameraRig::default();
        let mut cam = CameraState::from_config(&CameraConfig::default(), 1.5);
        rig.update(&mut cam, &frame(0.8, -0.4), 0.25);
        let expected = (cam.look_at - cam.position).normalize();
        assert!(cam.forward().dot(expected) > 0.9999);
    }

    #[test]
    fn damp_snaps_inside_epsilon() {
        assert_eq!(damp(1.0005, 1.0, 0.5, 0.016), 1.0);
        assert_eq!(damp(1.0, 1.0, 0.5, 0.0), 1.0);
    }

    #[test]
    fn normalized_depth_spans_clip_range() {
        let cam = CameraState::from_config(&CameraConfig::default(), 1.5);
        let near_point = cam.position + cam.forward() * cam.near;
        let far_point = cam.position + cam.forward() * cam.far;
        assert!(cam.normalized_depth(near_point) < 1e-4);
        assert!((cam.normalized_depth(far_point) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn center_ray_points_at_look_at() {
        let cam = CameraState::from_config(&CameraConfig::default(), 1.5);
        let (_, dir) = cam.ray(PointerState::default());
        let expected = (cam.look_at - cam.position).normalize();
        assert!(dir.dot(expected) > 0.9999);
    }
}
