use gridlight_input::{InputFrame, InputSource};
use gridlight_scene::Scene;

use crate::camera::{CameraRig, CameraState, RigState};
use crate::postfx::SkippedPass;

/// Whether the shadow map is recomputed every frame or frozen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShadowState {
    #[default]
    Live,
    /// Frozen; reused until a caster or light moves.
    Baked,
}

/// What the renderer should do this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePlan {
    pub frame: u64,
    pub dt: f32,
    pub input: InputFrame,
    pub rig: RigState,
    pub render_shadows: bool,
    pub render_reflection: bool,
    pub scene_changed: bool,
}

/// What the renderer actually did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameOutcome {
    pub shadows_rendered: bool,
    pub reflection_rendered: bool,
    pub skipped: Vec<SkippedPass>,
}

impl FrameOutcome {
    /// Everything the plan asked for ran.
    pub fn complete(plan: &FramePlan) -> Self {
        Self {
            shadows_rendered: plan.render_shadows,
            reflection_rendered: plan.render_reflection,
            skipped: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub frames: u64,
    pub shadow_renders: u64,
    pub reflection_renders: u64,
    pub skipped_passes: u64,
    pub bakes: u64,
    pub invalidations: u64,
}

/// Drives one frame at a time: polls input, steps the camera rig, decides
/// which cached layers must be re-rendered.
///
/// Call [`tick`](Self::tick) once per displayed frame, render according to the
/// returned plan, then hand the result to [`report`](Self::report).
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    rig: CameraRig,
    camera: CameraState,
    shadows: ShadowState,
    shadow_map_valid: bool,
    reflection_valid: bool,
    /// Bake after this many consecutive frames without shadow changes.
    auto_bake: Option<u32>,
    stable_frames: u32,
    last_shadow_change: bool,
    frame: u64,
    stats: SchedulerStats,
}

impl FrameScheduler {
    pub fn new(rig: CameraRig, camera: CameraState) -> Self {
        Self {
            rig,
            camera,
            shadows: ShadowState::Live,
            shadow_map_valid: false,
            reflection_valid: false,
            auto_bake: None,
            stable_frames: 0,
            last_shadow_change: false,
            frame: 0,
            stats: SchedulerStats::default(),
        }
    }

    /// Bake shadows automatically once the scene has been still for `frames`
    /// rendered frames.
    pub fn with_auto_bake(mut self, frames: u32) -> Self {
        self.auto_bake = Some(frames.max(1));
        self
    }

    pub fn camera(&self) -> &CameraState {
        &self.camera
    }

    pub fn rig(&self) -> &CameraRig {
        &self.rig
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.camera.aspect = aspect;
            self.reflection_valid = false;
        }
    }

    pub fn shadow_state(&self) -> ShadowState {
        self.shadows
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Freeze the shadow map. The next frame still renders it if no valid map
    /// exists yet. Returns false if already baked.
    pub fn bake_shadows(&mut self) -> bool {
        if self.shadows == ShadowState::Baked {
            return false;
        }
        self.shadows = ShadowState::Baked;
        self.stats.bakes += 1;
        tracing::info!(frame = self.frame, valid = self.shadow_map_valid, "shadows baked");
        true
    }

    /// Return to per-frame shadow rendering. Returns false if already live.
    pub fn invalidate_shadows(&mut self) -> bool {
        if self.shadows == ShadowState::Live {
            return false;
        }
        self.shadows = ShadowState::Live;
        self.shadow_map_valid = false;
        self.stable_frames = 0;
        self.stats.invalidations += 1;
        tracing::info!(frame = self.frame, "shadow bake invalidated");
        true
    }

    /// Advance one frame.
    pub fn tick(&mut self, dt: f32, input: &mut dyn InputSource, scene: &mut Scene) -> FramePlan {
        self.frame += 1;
        let _span = tracing::debug_span!("frame", frame = self.frame).entered();

        let input = input.poll();
        let rig = self.rig.update(&mut self.camera, &input, dt);

        let changes = scene.take_changes();
        if changes.shadows {
            self.invalidate_shadows();
            self.shadow_map_valid = false;
        }
        self.last_shadow_change = changes.shadows;

        let casts = scene.spot_light().cast_shadow;
        let render_shadows = casts && (self.shadows == ShadowState::Live || !self.shadow_map_valid);
        let render_reflection =
            !self.reflection_valid || rig == RigState::Tracking || changes.any || render_shadows;

        tracing::trace!(?rig, render_shadows, render_reflection, changed = changes.any, "frame plan");

        FramePlan {
            frame: self.frame,
            dt,
            input,
            rig,
            render_shadows,
            render_reflection,
            scene_changed: changes.any,
        }
    }

    /// Record what the renderer did for `plan`.
    pub fn report(&mut self, plan: &FramePlan, outcome: &FrameOutcome) {
        self.stats.frames += 1;
        self.stats.skipped_passes += outcome.skipped.len() as u64;

        if outcome.shadows_rendered {
            self.stats.shadow_renders += 1;
            self.shadow_map_valid = true;
        } else if plan.render_shadows {
            self.shadow_map_valid = false;
        }

        if outcome.reflection_rendered {
            self.stats.reflection_renders += 1;
            self.reflection_valid = true;
        } else if plan.render_reflection {
            self.reflection_valid = false;
        }

        if self.last_shadow_change || !self.shadow_map_valid {
            self.stable_frames = 0;
        } else {
            self.stable_frames = self.stable_frames.saturating_add(1);
        }
        let settled = self.auto_bake.is_some_and(|after| self.stable_frames >= after);
        if settled && self.shadows == ShadowState::Live {
            self.bake_shadows();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraConfig;
    use glam::Vec3;
    use gridlight_assets::AssetStore;
    use gridlight_input::{PointerState, ScriptedInput, Viewport};
    use gridlight_scene::SceneConfig;

    fn setup() -> (FrameScheduler, Scene) {
        let config = CameraConfig::default();
        let scheduler = FrameScheduler::new(
            CameraRig::from_config(&config),
            CameraState::from_config(&config, 16.0 / 9.0),
        );
        let scene = Scene::build(SceneConfig::default(), &mut AssetStore::new()).unwrap();
        (scheduler, scene)
    }

    fn still() -> ScriptedInput {
        ScriptedInput::still(PointerState::default(), Viewport::default())
    }

    fn run(
        scheduler: &mut FrameScheduler,
        scene: &mut Scene,
        input: &mut dyn InputSource,
    ) -> FramePlan {
        let plan = scheduler.tick(1.0 / 60.0, input, scene);
        scheduler.report(&plan, &FrameOutcome::complete(&plan));
        plan
    }

    #[test]
    fn live_shadows_render_every_frame() {
        let (mut s, mut scene) = setup();
        let mut input = still();
        for _ in 0..3 {
            assert!(run(&mut s, &mut scene, &mut input).render_shadows);
        }
        assert_eq!(s.stats().shadow_renders, 3);
    }

    #[test]
    fn baked_shadows_render_once() {
        let (mut s, mut scene) = setup();
        let mut input = still();
        assert!(s.bake_shadows());
        assert!(!s.bake_shadows());

        assert!(run(&mut s, &mut scene, &mut input).render_shadows);
        for _ in 0..5 {
            assert!(!run(&mut s, &mut scene, &mut input).render_shadows);
        }
        assert_eq!(s.stats().shadow_renders, 1);
        assert_eq!(s.shadow_state(), ShadowState::Baked);
    }

    #[test]
    fn moving_a_caster_invalidates_bake() {
        let (mut s, mut scene) = setup();
        let mut input = still();
        run(&mut s, &mut scene, &mut input);
        s.bake_shadows();
        assert!(!run(&mut s, &mut scene, &mut input).render_shadows);

        let id = scene.registry().ids().next().unwrap();
        scene
            .registry_mut()
            .update_transform(id, |t| t.position.y += 1.0)
            .unwrap();
        let plan = run(&mut s, &mut scene, &mut input);
        assert!(plan.render_shadows && plan.scene_changed);
        assert_eq!(s.shadow_state(), ShadowState::Live);
        assert_eq!(s.stats().invalidations, 1);
    }

    #[test]
    fn moving_the_light_invalidates_bake() {
        let (mut s, mut scene) = setup();
        let mut input = still();
        s.bake_shadows();
        run(&mut s, &mut scene, &mut input);
        scene.move_spot_light(Vec3::new(-10.0, 20.0, 10.0));
        assert!(run(&mut s, &mut scene, &mut input).render_shadows);
        assert_eq!(s.shadow_state(), ShadowState::Live);
    }

    #[test]
    fn auto_bake_after_stable_frames() {
        let (s, mut scene) = setup();
        let mut s = s.with_auto_bake(2);
        let mut input = still();
        run(&mut s, &mut scene, &mut input);
        assert_eq!(s.shadow_state(), ShadowState::Live);
        run(&mut s, &mut scene, &mut input);
        assert_eq!(s.shadow_state(), ShadowState::Baked);
        assert!(!run(&mut s, &mut scene, &mut input).render_shadows);
    }

    #[test]
    fn reflection_skipped_once_everything_settles() {
        let (mut s, mut scene) = setup();
        let mut input = still();
        s.bake_shadows();

        let mut settled = None;
        for i in 0..2000 {
            let plan = run(&mut s, &mut scene, &mut input);
            if plan.rig == RigState::Idle && !plan.render_reflection {
                settled = Some(i);
                break;
            }
        }
        assert!(settled.is_some(), "camera never converged");
    }

    #[test]
    fn failed_reflection_is_retried() {
        let (mut s, mut scene) = setup();
        let mut input = still();
        s.bake_shadows();
        let plan = s.tick(0.016, &mut input, &mut scene);
        let outcome = FrameOutcome {
            reflection_rendered: false,
            ..FrameOutcome::complete(&plan)
        };
        s.report(&plan, &outcome);
        // force an idle rig so only the failure drives the next plan
        let target = s.rig().target(&plan.input);
        s.camera.position = target;
        let next = s.tick(0.016, &mut input, &mut scene);
        assert_eq!(next.rig, RigState::Idle);
        assert!(next.render_reflection);
    }

    #[test]
    fn tick_moves_camera_toward_pointer() {
        let (mut s, mut scene) = setup();
        let mut input = ScriptedInput::still(PointerState::new(1.0, 1.0), Viewport::default());
        let start = s.camera().position;
        let plan = run(&mut s, &mut scene, &mut input);
        assert_eq!(plan.rig, RigState::Tracking);
        assert!(s.camera().position.x > start.x);
        assert_eq!(plan.frame, 1);
    }
}
