//! Software preview renderer.
//!
//! Draws every instance as a depth-tested splat over a ray-cast floor, with a
//! point-sampled spot shadow map, the planar reflection and the post chain.
//! Low fidelity, but it runs the same pass sequence and caching rules as the
//! GPU backend, so headless tools and tests can exercise the whole pipeline.

use glam::{Mat4, Vec2, Vec3};
use gridlight_scene::Scene;

use crate::camera::CameraState;
use crate::config::SessionConfig;
use crate::frame::{Frame, aces_filmic};
use crate::postfx::{EffectContext, PostProcessChain, SkippedPass};
use crate::reflection::{ReflectionPass, reflection_matrix};
use crate::renderer::{FrameError, RenderedFrame, Renderer, SetupError};
use crate::scheduler::{FrameOutcome, FramePlan};

const SHADOW_MAP_SIZE: usize = 128;
const SHADOW_BIAS: f32 = 0.002;

#[derive(Debug, Clone, Copy)]
struct Splat {
    center: Vec3,
    radius: f32,
    albedo: Vec3,
}

#[derive(Debug, Clone)]
struct ShadowMap {
    view_projection: Mat4,
    depth: Vec<f32>,
}

impl ShadowMap {
    fn render(view_projection: Mat4, splats: &[Splat]) -> Self {
        let mut depth = vec![f32::INFINITY; SHADOW_MAP_SIZE * SHADOW_MAP_SIZE];
        for splat in splats {
            let Some((px, r, z)) = project_splat(view_projection, splat, SHADOW_MAP_SIZE, SHADOW_MAP_SIZE)
            else {
                continue;
            };
            for_each_texel(px, r, SHADOW_MAP_SIZE, SHADOW_MAP_SIZE, |i| {
                depth[i] = depth[i].min(z);
            });
        }
        Self {
            view_projection,
            depth,
        }
    }

    /// 1 when lit, 0 when occluded or outside the light's frustum.
    fn visibility(&self, point: Vec3) -> f32 {
        let clip = self.view_projection * point.extend(1.0);
        if clip.w <= 0.0 {
            return 0.0;
        }
        let ndc = clip.truncate() / clip.w;
        if ndc.x.abs() > 1.0 || ndc.y.abs() > 1.0 {
            return 0.0;
        }
        let (x, y) = to_pixel(Vec2::new(ndc.x, ndc.y), SHADOW_MAP_SIZE, SHADOW_MAP_SIZE);
        let stored = self.depth[y * SHADOW_MAP_SIZE + x];
        if ndc.z > stored + SHADOW_BIAS { 0.0 } else { 1.0 }
    }
}

/// CPU renderer producing a tone-mapped [`Frame`].
#[derive(Debug)]
pub struct PreviewRenderer {
    width: usize,
    height: usize,
    reflection: ReflectionPass,
    post: PostProcessChain,
    shadow_map: Option<ShadowMap>,
}

impl PreviewRenderer {
    pub fn new(width: usize, height: usize, config: &SessionConfig) -> Result<Self, SetupError> {
        if width == 0 || height == 0 {
            return Err(SetupError::Device(format!("empty target {width}x{height}")));
        }
        Ok(Self {
            width,
            height,
            reflection: ReflectionPass::new(config.reflection)?,
            post: PostProcessChain::standard(config.bloom, config.dof)?,
            shadow_map: None,
        })
    }

    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn post_order(&self) -> Vec<&'static str> {
        self.post.order()
    }

    fn splats(scene: &Scene) -> Vec<Splat> {
        let mut splats = Vec::new();
        for batch in scene.registry().batches() {
            let radius = batch.geometry.bounding_radius();
            for draw in &batch.instances {
                let (scale, _, center) = draw.model.to_scale_rotation_translation();
                splats.push(Splat {
                    center,
                    radius: radius * scale.max_element(),
                    albedo: draw.tint.unwrap_or(batch.material.base_color).to_vec3(),
                });
            }
        }
        splats
    }

    fn light(&self, scene: &Scene, point: Vec3) -> f32 {
        let config = scene.config();
        let visibility = self.shadow_map.as_ref().map_or(1.0, |m| m.visibility(point));
        config.hemisphere.intensity + config.spot.intensity * visibility
    }

    /// Mirrored splats; depth channel is height above the floor.
    fn mirrored(&self, scene: &Scene, camera: &CameraState, splats: &[Splat]) -> Frame {
        let floor = scene.floor_height();
        let mirror = reflection_matrix(floor);
        let vp = camera.view_projection();
        let n = self.width * self.height;
        let mut frame = Frame::new(self.width, self.height);
        let mut height = vec![f32::INFINITY; n];
        let mut nearest = vec![f32::INFINITY; n];

        for splat in splats {
            let mirrored = Splat {
                center: mirror.transform_point3(splat.center),
                ..*splat
            };
            let Some((px, r, z)) = project_splat(vp, &mirrored, self.width, self.height) else {
                continue;
            };
            let color = splat.albedo * self.light(scene, splat.center);
            let above = (splat.center.y - floor).max(0.0);
            for_each_texel(px, r, self.width, self.height, |i| {
                if z < nearest[i] {
                    nearest[i] = z;
                    height[i] = above;
                    frame.set(i % self.width, i / self.width, color);
                }
            });
        }
        for (i, h) in height.into_iter().enumerate() {
            frame.set_depth(i % self.width, i / self.width, h);
        }
        frame
    }
}

impl Renderer for PreviewRenderer {
    type Output = Frame;

    fn render_frame(
        &mut self,
        scene: &Scene,
        camera: &CameraState,
        plan: &FramePlan,
    ) -> Result<RenderedFrame<Frame>, FrameError> {
        let _span = tracing::debug_span!("preview_frame", frame = plan.frame).entered();
        let splats = Self::splats(scene);
        let mut skipped: Vec<SkippedPass> = Vec::new();

        let shadows_rendered = plan.render_shadows && scene.spot_light().cast_shadow;
        if shadows_rendered {
            self.shadow_map = Some(ShadowMap::render(scene.spot_view_projection(), &splats));
        } else if !scene.spot_light().cast_shadow {
            self.shadow_map = None;
        }

        let mut reflection_rendered = false;
        let floor_texels = if plan.render_reflection {
            let mirrored = self.mirrored(scene, camera, &splats);
            match self.reflection.compose(&mirrored) {
                Ok(frame) => {
                    reflection_rendered = true;
                    Some(frame)
                }
                Err(error) => {
                    tracing::warn!(%error, "reflection pass skipped");
                    let cached = self.reflection.cached();
                    skipped.push(SkippedPass {
                        pass: "reflection",
                        error,
                        reused_previous: cached.is_some(),
                    });
                    cached
                }
            }
        } else {
            self.reflection.cached()
        };
        let floor_texels = floor_texels.filter(|f| f.width() == self.width && f.height() == self.height);

        // primary pass: floor, then instances on top
        let (w, h) = (self.width, self.height);
        let vp = camera.view_projection();
        let inv = vp.inverse();
        let view = camera.view_matrix();
        let linear_depth = |p: Vec3| {
            let z = -view.transform_point3(p).z;
            ((z - camera.near) / (camera.far - camera.near)).clamp(0.0, 1.0)
        };

        let config = scene.config();
        let background = config.background.to_vec3();
        let floor_base = self.reflection.config().color.to_vec3();
        let half = config.floor.size / 2.0;
        let offset = config.group_offset;

        let mut color = vec![background; w * h];
        let mut depth = vec![1.0_f32; w * h];

        for y in 0..h {
            for x in 0..w {
                let ndc = Vec2::new(
                    (x as f32 + 0.5) / w as f32 * 2.0 - 1.0,
                    1.0 - (y as f32 + 0.5) / h as f32 * 2.0,
                );
                let near = inv.project_point3(ndc.extend(0.0));
                let far = inv.project_point3(ndc.extend(1.0));
                let dir = far - near;
                if dir.y >= 0.0 {
                    continue;
                }
                let t = (offset.y - near.y) / dir.y;
                let hit = near + dir * t;
                if (hit.x - offset.x).abs() > half || (hit.z - offset.z).abs() > half {
                    continue;
                }
                let i = y * w + x;
                let d = linear_depth(hit);
                if d < depth[i] {
                    let texel = floor_texels.as_ref().map_or(floor_base, |f| f.pixels()[i]);
                    color[i] = texel * self.light(scene, hit);
                    depth[i] = d;
                }
            }
        }

        for splat in &splats {
            let Some((px, r, _)) = project_splat(vp, splat, w, h) else {
                continue;
            };
            let d = linear_depth(splat.center);
            let shaded = splat.albedo * self.light(scene, splat.center);
            for_each_texel(px, r, w, h, |i| {
                if d < depth[i] {
                    depth[i] = d;
                    color[i] = shaded;
                }
            });
        }

        let mut primary = Frame::new(w, h);
        for (i, c) in color.into_iter().enumerate() {
            primary.set(i % w, i / w, c);
        }
        let primary = primary
            .with_depth(depth)
            .map_err(|e| FrameError::Other(e.to_string()))?;

        let post = self.post.run(&primary, &EffectContext { camera });
        skipped.extend(post.skipped);
        let output = post.frame.map_pixels(aces_filmic);

        Ok(RenderedFrame {
            output,
            outcome: FrameOutcome {
                shadows_rendered,
                reflection_rendered,
                skipped,
            },
        })
    }
}

fn to_pixel(ndc: Vec2, width: usize, height: usize) -> (usize, usize) {
    let x = ((ndc.x + 1.0) * 0.5 * width as f32) as usize;
    let y = ((1.0 - ndc.y) * 0.5 * height as f32) as usize;
    (x.min(width - 1), y.min(height - 1))
}

/// Pixel center, pixel radius and NDC depth of a splat, if its center is on
/// screen.
fn project_splat(
    view_projection: Mat4,
    splat: &Splat,
    width: usize,
    height: usize,
) -> Option<((usize, usize), usize, f32)> {
    let clip = view_projection * splat.center.extend(1.0);
    if clip.w <= 0.0 {
        return None;
    }
    let ndc = clip.truncate() / clip.w;
    if ndc.x.abs() > 1.0 || ndc.y.abs() > 1.0 {
        return None;
    }
    let edge = view_projection.project_point3(splat.center + Vec3::Y * splat.radius);
    // Splats grazing the camera plane project to huge or non-finite radii.
    let cover = width.max(height) as f32;
    let r = (edge.y - ndc.y).abs() * 0.5 * height as f32;
    let r = if r.is_finite() { r.min(cover) } else { cover };
    Some((
        to_pixel(Vec2::new(ndc.x, ndc.y), width, height),
        r.round() as usize,
        ndc.z,
    ))
}

fn for_each_texel(
    (cx, cy): (usize, usize),
    radius: usize,
    width: usize,
    height: usize,
    mut visit: impl FnMut(usize),
) {
    let x0 = cx.saturating_sub(radius);
    let y0 = cy.saturating_sub(radius);
    let x1 = cx.saturating_add(radius).min(width - 1);
    let y1 = cy.saturating_add(radius).min(height - 1);
    for y in y0..=y1 {
        for x in x0..=x1 {
            visit(y * width + x);
        }
    }
}
