use anyhow::{Context as _, Result};
use clap::Parser;
use egui::Context as EguiContext;
use glam::Vec3;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};
use gridlight_assets::AssetStore;
use gridlight_common::InstanceId;
use gridlight_input::{Action, PointerTracker};
use gridlight_render::{
    CameraRig, CameraState, FrameOutcome, FrameScheduler, Renderer, SessionConfig, ShadowState,
};
use gridlight_render_wgpu::{GpuContext, WgpuRenderer};
use gridlight_scene::Scene;

/// World units the spot light moves per nudge.
const LIGHT_NUDGE: f32 = 1.0;

#[derive(Parser)]
#[command(name = "gridlight-desktop", about = "Reflective instanced grid viewer")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Session configuration (YAML). Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Make instances react to hover and click
    #[arg(long)]
    interactive: bool,
}

/// Everything that lives for the whole session, independent of the window.
struct Session {
    config: SessionConfig,
    scene: Scene,
    scheduler: FrameScheduler,
    pointer: PointerTracker,
    hovered: Option<InstanceId>,
    show_overlay: bool,
    last_frame: Instant,
    last_dt: f32,
    last_outcome: FrameOutcome,
}

impl Session {
    fn new(config: SessionConfig) -> Result<Self> {
        let scene = Scene::build(config.scene.clone(), &mut AssetStore::new())
            .context("building scene")?;
        let scheduler = FrameScheduler::new(
            CameraRig::from_config(&config.camera),
            CameraState::from_config(&config.camera, 16.0 / 9.0),
        )
        .with_auto_bake(1);

        Ok(Self {
            config,
            scene,
            scheduler,
            pointer: PointerTracker::default(),
            hovered: None,
            show_overlay: true,
            last_frame: Instant::now(),
            last_dt: 0.0,
            last_outcome: FrameOutcome::default(),
        })
    }

    fn apply(&mut self, action: Action) {
        match action {
            Action::Select(pointer) => {
                let (origin, dir) = self.scheduler.camera().ray(pointer);
                let Some(id) = self.scene.registry().pick(origin, dir) else {
                    return;
                };
                match self.scene.registry_mut().toggle_clicked(id) {
                    Ok(Some(clicked)) => tracing::info!(%id, clicked, "instance toggled"),
                    Ok(None) => {}
                    Err(e) => tracing::warn!("select failed: {e}"),
                }
            }
            Action::BakeShadows => {
                self.scheduler.bake_shadows();
            }
            Action::InvalidateShadows => {
                self.scheduler.invalidate_shadows();
            }
            Action::NudgeLight(delta) => {
                let position = self.scene.spot_light().position + delta;
                self.scene.move_spot_light(position);
            }
            Action::ToggleOverlay => {
                self.show_overlay = !self.show_overlay;
            }
            Action::Noop => {}
        }
    }

    /// Hover follows the pointer ray. Only interactive instances react.
    fn update_hover(&mut self) {
        if !self.config.scene.interactive {
            return;
        }
        let (origin, dir) = self.scheduler.camera().ray(self.pointer.pointer());
        let hit = self.scene.registry().pick(origin, dir);
        if hit != self.hovered {
            self.hovered = hit;
            self.scene.registry_mut().set_hovered(hit);
        }
    }

    fn draw_ui(&self, ctx: &EguiContext, internal: (u32, u32)) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.show_overlay {
            return actions;
        }

        let camera = self.scheduler.camera();
        let stats = self.scheduler.stats();

        egui::Window::new("gridlight")
            .default_width(260.0)
            .show(ctx, |ui| {
                ui.label(format!(
                    "Frame: {}  ({:.1} ms)",
                    self.scheduler.frame(),
                    self.last_dt * 1000.0
                ));
                ui.label(format!("Internal: {}×{}", internal.0, internal.1));
                ui.label(format!(
                    "Camera: ({:.2}, {:.2}, {:.2})",
                    camera.position.x, camera.position.y, camera.position.z
                ));
                ui.label(format!("Instances: {}", self.scene.registry().len()));
                if let Some(id) = self.hovered {
                    ui.label(format!("Hovered: {id}"));
                }
                ui.separator();

                ui.heading("Shadows");
                let state = match self.scheduler.shadow_state() {
                    ShadowState::Live => "live",
                    ShadowState::Baked => "baked",
                };
                ui.label(format!("State: {state}"));
                ui.horizontal(|ui| {
                    if ui.button("Bake (B)").clicked() {
                        actions.push(Action::BakeShadows);
                    }
                    if ui.button("Invalidate (I)").clicked() {
                        actions.push(Action::InvalidateShadows);
                    }
                });
                if ui.button("Nudge light (L)").clicked() {
                    actions.push(Action::NudgeLight(Vec3::X * LIGHT_NUDGE));
                }
                ui.separator();

                ui.heading("Passes");
                ui.label(format!(
                    "Shadow renders: {}  Reflection renders: {}",
                    stats.shadow_renders, stats.reflection_renders
                ));
                ui.label(format!(
                    "Bakes: {}  Invalidations: {}  Skipped: {}",
                    stats.bakes, stats.invalidations, stats.skipped_passes
                ));
                for skipped in &self.last_outcome.skipped {
                    ui.colored_label(
                        egui::Color32::YELLOW,
                        format!("{} skipped: {}", skipped.pass, skipped.error),
                    );
                }

                ui.separator();
                ui.small("F1: Toggle overlay | B/I: Bake/Invalidate | L/K: Move light");
            });

        actions
    }
}

fn action_for_key(key: KeyCode) -> Action {
    match key {
        KeyCode::KeyB => Action::BakeShadows,
        KeyCode::KeyI => Action::InvalidateShadows,
        KeyCode::KeyL => Action::NudgeLight(Vec3::X * LIGHT_NUDGE),
        KeyCode::KeyK => Action::NudgeLight(Vec3::NEG_X * LIGHT_NUDGE),
        KeyCode::F1 => Action::ToggleOverlay,
        _ => Action::Noop,
    }
}

struct GpuApp {
    session: Session,
    window: Option<Arc<Window>>,
    renderer: Option<WgpuRenderer>,
    egui_ctx: EguiContext,
    egui_winit: Option<egui_winit::State>,
    egui_renderer: Option<egui_wgpu::Renderer>,
    failure: Option<anyhow::Error>,
}

impl GpuApp {
    fn new(session: Session) -> Self {
        Self {
            session,
            window: None,
            renderer: None,
            egui_ctx: EguiContext::default(),
            egui_winit: None,
            egui_renderer: None,
            failure: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title("gridlight")
            .with_inner_size(PhysicalSize::new(1280u32, 720));
        let window = Arc::new(event_loop.create_window(attrs).context("creating window")?);

        let size = window.inner_size();
        let context = GpuContext::new(window.clone(), size.width, size.height)?;
        let format = context.format();
        let renderer = WgpuRenderer::new(context, &self.session.config, window.scale_factor())?;

        let egui_winit = egui_winit::State::new(
            self.egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );
        let egui_renderer =
            egui_wgpu::Renderer::new(&renderer.context().device, format, None, 1, false);

        self.session.pointer.resize(size.width, size.height);
        self.session
            .scheduler
            .set_aspect(size.width as f32 / size.height.max(1) as f32);

        self.window = Some(window);
        self.renderer = Some(renderer);
        self.egui_winit = Some(egui_winit);
        self.egui_renderer = Some(egui_renderer);
        Ok(())
    }

    fn redraw(&mut self) {
        let (Some(window), Some(renderer)) = (&self.window, &mut self.renderer) else {
            return;
        };
        let session = &mut self.session;

        let now = Instant::now();
        let dt = (now - session.last_frame).as_secs_f32().min(0.1);
        session.last_frame = now;
        session.last_dt = dt;

        for click in session.pointer.take_clicks() {
            session.apply(Action::Select(click));
        }
        session.update_hover();
        session.pointer.set_viewport(session.scheduler.camera().viewport());

        let plan = session
            .scheduler
            .tick(dt, &mut session.pointer, &mut session.scene);
        let frame = match renderer.render_frame(&session.scene, session.scheduler.camera(), &plan) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("frame {} dropped: {e}", plan.frame);
                session.scheduler.report(&plan, &FrameOutcome::default());
                window.request_redraw();
                return;
            }
        };
        session.scheduler.report(&plan, &frame.outcome);
        session.last_outcome = frame.outcome.clone();

        let (Some(egui_winit), Some(egui_renderer)) = (&mut self.egui_winit, &mut self.egui_renderer)
        else {
            return;
        };

        let internal = renderer.internal_size();
        let raw_input = egui_winit.take_egui_input(window);
        let mut actions = Vec::new();
        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            actions = session.draw_ui(ctx, internal);
        });
        egui_winit.handle_platform_output(window, full_output.platform_output);

        let paint_jobs = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);
        let ctx = renderer.context();
        let (width, height) = ctx.size();
        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [width, height],
            pixels_per_point: full_output.pixels_per_point,
        };

        for (id, image_delta) in &full_output.textures_delta.set {
            egui_renderer.update_texture(&ctx.device, &ctx.queue, *id, image_delta);
        }
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("egui_encoder"),
            });
        egui_renderer.update_buffers(
            &ctx.device,
            &ctx.queue,
            &mut encoder,
            &paint_jobs,
            &screen_descriptor,
        );
        {
            let mut pass = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("egui_pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &frame.output.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    ..Default::default()
                })
                .forget_lifetime();
            egui_renderer.render(&mut pass, &paint_jobs, &screen_descriptor);
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));
        for id in &full_output.textures_delta.free {
            egui_renderer.free_texture(id);
        }

        frame.output.present();
        for action in actions {
            session.apply(action);
        }
        window.request_redraw();
    }
}

impl ApplicationHandler for GpuApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            tracing::error!("setup failed: {e:#}");
            self.failure = Some(e);
            event_loop.exit();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        if let (Some(egui_winit), Some(window)) = (&mut self.egui_winit, &self.window) {
            let response = egui_winit.on_window_event(window, &event);
            if response.consumed {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                let (width, height) = (new_size.width, new_size.height);
                if width == 0 || height == 0 {
                    return;
                }
                let scale = self.window.as_ref().map_or(1.0, |w| w.scale_factor());
                if let Some(renderer) = &mut self.renderer {
                    renderer.resize(width, height, scale);
                }
                self.session.pointer.resize(width, height);
                self.session
                    .scheduler
                    .set_aspect(width as f32 / height as f32);
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.session.pointer.cursor_moved(position.x, position.y);
            }
            WindowEvent::CursorLeft { .. } => {
                self.session.pointer.cursor_left();
            }
            WindowEvent::MouseInput {
                button: MouseButton::Left,
                state: ElementState::Pressed,
                ..
            } => {
                if self.session.config.scene.interactive {
                    self.session.pointer.clicked();
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                self.session.apply(action_for_key(key));
            }
            WindowEvent::RedrawRequested => {
                self.redraw();
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    tracing::info!("gridlight-desktop starting");

    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if cli.interactive {
        config.scene.interactive = true;
    }
    let session = Session::new(config)?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = GpuApp::new(session);
    event_loop.run_app(&mut app)?;

    match app.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_map_to_actions() {
        assert_eq!(action_for_key(KeyCode::KeyB), Action::BakeShadows);
        assert_eq!(action_for_key(KeyCode::KeyI), Action::InvalidateShadows);
        assert_eq!(action_for_key(KeyCode::F1), Action::ToggleOverlay);
        assert_eq!(action_for_key(KeyCode::KeyQ), Action::Noop);
    }

    #[test]
    fn session_actions_drive_scheduler_and_scene() {
        let mut session = Session::new(SessionConfig::default()).unwrap();
        session.apply(Action::BakeShadows);
        assert_eq!(session.scheduler.shadow_state(), ShadowState::Baked);

        let before = session.scene.spot_light().position;
        session.apply(action_for_key(KeyCode::KeyL));
        assert_eq!(session.scene.spot_light().position, before + Vec3::X);
        assert!(session.scene.take_changes().shadows);

        session.apply(Action::ToggleOverlay);
        assert!(!session.show_overlay);
    }
}
