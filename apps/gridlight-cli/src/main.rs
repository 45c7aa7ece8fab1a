use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use glam::Vec3;
use gridlight_assets::AssetStore;
use gridlight_input::{PointerState, ScriptedInput};
use gridlight_layout::compute_grid;
use gridlight_render::{
    CameraRig, CameraState, DebugTextRenderer, EffectContext, Frame, FrameScheduler,
    PostProcessChain, PreviewRenderer, Renderer, RigState, SessionConfig,
};
use gridlight_scene::Scene;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gridlight-cli", about = "CLI tool for gridlight scenes")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Session configuration (YAML). Defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Print the effective session configuration as YAML
    Config,
    /// Dump grid placements
    Layout {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Simulate the camera rig following a fixed pointer
    Camera {
        /// Pointer x in [-1, 1]
        #[arg(long, default_value = "1.0", allow_hyphen_values = true)]
        x: f32,
        /// Pointer y in [-1, 1]
        #[arg(long, default_value = "1.0", allow_hyphen_values = true)]
        y: f32,
        /// Frames to simulate
        #[arg(short, long, default_value = "120")]
        frames: u64,
        /// Seconds per frame
        #[arg(long, default_value = "0.016666668")]
        dt: f32,
    },
    /// Run the frame scheduler and dump what each frame renders
    Frames {
        /// Frames to run
        #[arg(short, long, default_value = "3")]
        frames: u64,
        /// Bake shadows once the scene has been still this many frames
        #[arg(long)]
        auto_bake: Option<u32>,
        /// List every instance
        #[arg(long)]
        instances: bool,
        /// Also render the last frame in software and write it as PPM
        #[arg(long)]
        preview: Option<PathBuf>,
        /// Preview width in pixels
        #[arg(long, default_value = "320")]
        width: usize,
        /// Preview height in pixels
        #[arg(long, default_value = "180")]
        height: usize,
    },
    /// Run the post-processing chain on a synthetic frame
    Postfx,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = match &cli.config {
        Some(path) => {
            SessionConfig::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => SessionConfig::default(),
    };

    match cli.command {
        Commands::Info => {
            println!("gridlight-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", gridlight_common::crate_info());
            println!("layout: {}", gridlight_layout::crate_info());
            println!("assets: {}", gridlight_assets::crate_info());
            println!("instances: {}", gridlight_instances::crate_info());
            println!("input: {}", gridlight_input::crate_info());
            println!("scene: {}", gridlight_scene::crate_info());
            println!("render: {}", gridlight_render::crate_info());
        }
        Commands::Config => {
            print!("{}", config.to_yaml()?);
        }
        Commands::Layout { json } => {
            let placements = compute_grid(&config.scene.grid)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&placements)?);
            } else {
                println!(
                    "Grid {}x{} spacing={} depth={}: {} placement(s)",
                    config.scene.grid.rows,
                    config.scene.grid.columns,
                    config.scene.grid.spacing,
                    config.scene.grid.base_depth,
                    placements.len()
                );
                for p in &placements {
                    println!(
                        "  [{:>2},{:>2}] ({:7.3}, {:7.3}, {:7.3})",
                        p.row, p.column, p.position.x, p.position.y, p.position.z
                    );
                }
            }
        }
        Commands::Camera { x, y, frames, dt } => simulate_camera(&config, x, y, frames, dt),
        Commands::Frames {
            frames,
            auto_bake,
            instances,
            preview,
            width,
            height,
        } => {
            run_frames(&config, frames, auto_bake, instances, preview.as_deref(), (width, height))?;
        }
        Commands::Postfx => run_postfx(&config)?,
    }

    Ok(())
}

fn scheduler_for(config: &SessionConfig, aspect: f32) -> FrameScheduler {
    FrameScheduler::new(
        CameraRig::from_config(&config.camera),
        CameraState::from_config(&config.camera, aspect),
    )
}

fn simulate_camera(config: &SessionConfig, x: f32, y: f32, frames: u64, dt: f32) {
    let rig = CameraRig::from_config(&config.camera);
    let mut camera = CameraState::from_config(&config.camera, 16.0 / 9.0);
    let pointer = PointerState::new(x, y);
    let input = gridlight_input::InputFrame {
        pointer,
        viewport: camera.viewport(),
    };
    let target = rig.target(&input);
    println!(
        "Pointer ({:.2}, {:.2}) -> target ({:.3}, {:.3}, {:.3})",
        pointer.x, pointer.y, target.x, target.y, target.z
    );

    for frame in 1..=frames {
        let state = rig.update(&mut camera, &input, dt);
        let p = camera.position;
        if frame <= 5 || frame % 10 == 0 || state == RigState::Idle {
            println!(
                "frame {frame:>4}: ({:.4}, {:.4}, {:.4}) error={:.5} {state:?}",
                p.x,
                p.y,
                p.z,
                p.distance(target)
            );
        }
        if state == RigState::Idle {
            println!("settled after {frame} frame(s)");
            return;
        }
    }
    println!("still tracking after {frames} frame(s)");
}

fn run_frames(
    config: &SessionConfig,
    frames: u64,
    auto_bake: Option<u32>,
    verbose: bool,
    preview: Option<&Path>,
    size: (usize, usize),
) -> anyhow::Result<()> {
    let mut scene = Scene::build(config.scene.clone(), &mut AssetStore::new())?;
    let aspect = size.0 as f32 / size.1.max(1) as f32;
    let mut scheduler = scheduler_for(config, aspect);
    if let Some(after) = auto_bake {
        scheduler = scheduler.with_auto_bake(after);
    }
    let mut input = ScriptedInput::still(PointerState::default(), scheduler.camera().viewport());
    let mut text = DebugTextRenderer { verbose };
    let mut software = match preview {
        Some(_) => Some(PreviewRenderer::new(size.0, size.1, config)?),
        None => None,
    };

    tracing::info!(frames, instances = scene.registry().len(), "running scheduler");
    let mut last = None;
    for _ in 0..frames {
        let plan = scheduler.tick(1.0 / 60.0, &mut input, &mut scene);
        let rendered = text.render_frame(&scene, scheduler.camera(), &plan)?;
        print!("{}", rendered.output);

        let outcome = match software.as_mut() {
            Some(renderer) => {
                let frame = renderer.render_frame(&scene, scheduler.camera(), &plan)?;
                for skipped in &frame.outcome.skipped {
                    println!("  skipped {}: {}", skipped.pass, skipped.error);
                }
                let outcome = frame.outcome.clone();
                last = Some(frame.output);
                outcome
            }
            None => rendered.outcome,
        };
        scheduler.report(&plan, &outcome);
    }

    let stats = scheduler.stats();
    println!(
        "Stats: frames={} shadow_renders={} reflection_renders={} bakes={} invalidations={} skipped={}",
        stats.frames,
        stats.shadow_renders,
        stats.reflection_renders,
        stats.bakes,
        stats.invalidations,
        stats.skipped_passes
    );

    if let (Some(path), Some(frame)) = (preview, last) {
        write_ppm(path, &frame).with_context(|| format!("writing {}", path.display()))?;
        println!("Preview written to {}", path.display());
    }
    Ok(())
}

/// Bright spot on a dark background with a depth ramp, run through the
/// standard chain.
fn run_postfx(config: &SessionConfig) -> anyhow::Result<()> {
    let (w, h) = (32, 32);
    let mut frame = Frame::filled(w, h, Vec3::splat(0.02));
    frame.set(w / 2, h / 2, Vec3::splat(4.0));
    let depth = (0..w * h).map(|i| (i % w) as f32 / (w - 1) as f32).collect();
    let frame = frame.with_depth(depth)?;

    let camera = CameraState::from_config(&config.camera, 1.0);
    let mut chain = PostProcessChain::standard(config.bloom, config.dof)?;
    println!("Order: {}", chain.order().join(" -> "));

    let output = chain.run(&frame, &EffectContext { camera: &camera });
    for skipped in &output.skipped {
        println!("  skipped {}: {}", skipped.pass, skipped.error);
    }
    let center = output.frame.get(w / 2, h / 2);
    let neighbour = output.frame.get(w / 2 + 2, h / 2);
    let corner = output.frame.get(0, 0);
    println!("center    {:.4} {:.4} {:.4}", center.x, center.y, center.z);
    println!("neighbour {:.4} {:.4} {:.4}", neighbour.x, neighbour.y, neighbour.z);
    println!("corner    {:.4} {:.4} {:.4}", corner.x, corner.y, corner.z);
    println!("max change {:.4}", output.frame.max_abs_diff(&frame));
    Ok(())
}

/// Binary PPM of an already tone-mapped frame.
fn write_ppm(path: &Path, frame: &Frame) -> std::io::Result<()> {
    let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
    write!(out, "P6\n{} {}\n255\n", frame.width(), frame.height())?;
    for c in frame.pixels() {
        let c = c.clamp(Vec3::ZERO, Vec3::ONE);
        let srgb = [c.x, c.y, c.z].map(|v| (linear_to_srgb(v) * 255.0).round() as u8);
        out.write_all(&srgb)?;
    }
    out.flush()
}

fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}
