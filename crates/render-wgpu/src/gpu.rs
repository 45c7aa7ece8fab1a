use std::collections::BTreeMap;
use std::ops::Range;

use gridlight_common::GeometryHandle;
use gridlight_render::{
    Bloom, CameraState, DepthOfField, FrameError, FrameOutcome, FramePlan, PassError,
    RenderedFrame, Renderer, SessionConfig, SetupError, SkippedPass,
};
use gridlight_scene::Scene;

use crate::context::GpuContext;
use crate::mesh::{GpuMesh, InstanceBuffer, InstanceData, Vertex, floor_quad};
use crate::shaders;
use crate::targets::{DEPTH_FORMAT, HDR_FORMAT, RenderTargets, Target, TargetSizes, internal_size};
use crate::uniforms::{BloomUniforms, BlurUniforms, DofUniforms, FloorUniforms, Globals};

/// Alpha of reflection texels that no geometry covered: far past any fade
/// threshold.
const REFLECTION_CLEAR_DEPTH: f64 = 1000.0;

const BLUR_REFLECTION_H: usize = 0;
const BLUR_REFLECTION_V: usize = 1;
const BLUR_BLOOM_H: usize = 2;
const BLUR_BLOOM_V: usize = 3;
const BLUR_DOF_COPY: usize = 4;
const BLUR_DOF_H: usize = 5;
const BLUR_DOF_V: usize = 6;
const BLUR_SLOTS: usize = 7;

/// A presented-to-be surface texture.
pub struct GpuFrame {
    pub texture: wgpu::SurfaceTexture,
    pub view: wgpu::TextureView,
}

impl GpuFrame {
    pub fn present(self) {
        self.texture.present();
    }
}

impl std::fmt::Debug for GpuFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuFrame").finish_non_exhaustive()
    }
}

struct Layouts {
    globals: wgpu::BindGroupLayout,
    shadow: wgpu::BindGroupLayout,
    floor: wgpu::BindGroupLayout,
    blur: wgpu::BindGroupLayout,
    bloom: wgpu::BindGroupLayout,
    dof: wgpu::BindGroupLayout,
    tonemap: wgpu::BindGroupLayout,
}

struct Pipelines {
    scene: wgpu::RenderPipeline,
    scene_mirrored: wgpu::RenderPipeline,
    shadow: wgpu::RenderPipeline,
    floor: wgpu::RenderPipeline,
    blur: wgpu::RenderPipeline,
    bloom_bright: wgpu::RenderPipeline,
    bloom_down: wgpu::RenderPipeline,
    bloom_up: wgpu::RenderPipeline,
    bloom_composite: wgpu::RenderPipeline,
    dof: wgpu::RenderPipeline,
    tonemap: wgpu::RenderPipeline,
}

struct Uniforms {
    globals: wgpu::Buffer,
    globals_mirrored: wgpu::Buffer,
    floor: wgpu::Buffer,
    bloom: wgpu::Buffer,
    dof: wgpu::Buffer,
    blur: Vec<wgpu::Buffer>,
    globals_group: wgpu::BindGroup,
    globals_mirrored_group: wgpu::BindGroup,
}

/// Instances of one geometry inside the shared instance buffer.
struct DrawRange {
    handle: GeometryHandle,
    instances: Range<u32>,
}

/// wgpu renderer: shadow map, planar reflection, primary pass, bloom, depth
/// of field and tone mapping onto the window surface.
///
/// Every offscreen pass is submitted inside its own validation error scope.
/// A failing pass leaves its target holding the previous frame and is
/// reported in the outcome; only acquiring or tone mapping onto the surface
/// fails the whole frame.
pub struct WgpuRenderer {
    context: GpuContext,
    config: SessionConfig,
    scale_factor: f64,
    layouts: Layouts,
    pipelines: Pipelines,
    uniforms: Uniforms,
    linear_sampler: wgpu::Sampler,
    shadow_map: Target,
    shadow_group: wgpu::BindGroup,
    targets: RenderTargets,
    floor_mesh: GpuMesh,
    meshes: BTreeMap<GeometryHandle, GpuMesh>,
    instances: InstanceBuffer,
    shadows_ready: bool,
    reflection_ready: bool,
    bloom_ready: bool,
    dof_ready: bool,
}

impl std::fmt::Debug for WgpuRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuRenderer")
            .field("context", &self.context)
            .field("internal", &self.targets.internal)
            .field("meshes", &self.meshes.len())
            .finish_non_exhaustive()
    }
}

impl WgpuRenderer {
    /// Build every pipeline and target. Effect and reflection parameters are
    /// validated here and never change afterwards.
    pub fn new(
        context: GpuContext,
        config: &SessionConfig,
        scale_factor: f64,
    ) -> Result<Self, SetupError> {
        config.reflection.validate()?;
        Bloom::new(config.bloom)?;
        DepthOfField::new(config.dof)?;

        let device = &context.device;
        let layouts = Layouts::new(device);
        let pipelines = Pipelines::new(device, &layouts, context.format());
        let uniforms = Uniforms::new(device, &layouts);

        let linear_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("linear_sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let shadow_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("shadow_sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });

        let shadow_size = config.scene.spot.shadow_map_size.max(1);
        let shadow_map = Target::new(device, "shadow_map", (shadow_size, shadow_size), DEPTH_FORMAT);
        let shadow_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("shadow_group"),
            layout: &layouts.shadow,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&shadow_map.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&shadow_sampler),
                },
            ],
        });

        let internal = internal_size(context.size(), scale_factor, &config.dpr);
        let targets = RenderTargets::new(device, &target_sizes(config, internal));

        let (quad_vertices, quad_indices) = floor_quad();
        let floor_mesh = GpuMesh::upload(device, "floor", &quad_vertices, &quad_indices);
        let instances = InstanceBuffer::new(device, config.scene.grid.len());

        tracing::info!(?internal, "wgpu renderer ready");

        Ok(Self {
            config: config.clone(),
            scale_factor,
            layouts,
            pipelines,
            uniforms,
            linear_sampler,
            shadow_map,
            shadow_group,
            targets,
            floor_mesh,
            meshes: BTreeMap::new(),
            instances,
            shadows_ready: false,
            reflection_ready: false,
            bloom_ready: false,
            dof_ready: false,
            context,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// Internal render resolution after the pixel-ratio clamp.
    pub fn internal_size(&self) -> (u32, u32) {
        self.targets.internal
    }

    /// Order the post-processing stages run in.
    pub fn post_order(&self) -> [&'static str; 2] {
        ["bloom", "depth_of_field"]
    }

    /// Reconfigure the surface and recreate every size-dependent target.
    /// Cached layers are dropped; the next frame must re-render them.
    pub fn resize(&mut self, width: u32, height: u32, scale_factor: f64) {
        if width == 0 || height == 0 {
            return;
        }
        self.context.resize(width, height);
        self.scale_factor = scale_factor;
        let internal = internal_size((width, height), scale_factor, &self.config.dpr);
        self.targets = RenderTargets::new(&self.context.device, &target_sizes(&self.config, internal));
        self.reflection_ready = false;
        self.bloom_ready = false;
        self.dof_ready = false;
        tracing::debug!(width, height, ?internal, "renderer resized");
    }

    /// Record `record` into a fresh encoder and submit it inside a
    /// validation error scope.
    fn encode(
        &self,
        label: &'static str,
        record: impl FnOnce(&mut wgpu::CommandEncoder),
    ) -> Result<(), PassError> {
        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(label),
        });
        record(&mut encoder);
        self.context.queue.submit(std::iter::once(encoder.finish()));
        match pollster::block_on(device.pop_error_scope()) {
            None => Ok(()),
            Some(error) => {
                tracing::warn!(pass = label, %error, "pass failed");
                Err(PassError::Unavailable(error.to_string()))
            }
        }
    }

    fn write<T: bytemuck::Pod>(&self, buffer: &wgpu::Buffer, value: &T) {
        self.context.queue.write_buffer(buffer, 0, bytemuck::bytes_of(value));
    }

    /// Upload instance data for every batch and any geometry seen for the
    /// first time.
    fn upload_instances(&mut self, scene: &Scene) -> Vec<DrawRange> {
        let mut data = Vec::with_capacity(scene.registry().len());
        let mut ranges = Vec::new();
        for batch in scene.registry().batches() {
            self.meshes.entry(batch.handle).or_insert_with(|| {
                tracing::debug!(geometry = %batch.geometry.name, "uploading mesh");
                GpuMesh::from_geometry(&self.context.device, batch.geometry)
            });
            let start = data.len() as u32;
            data.extend(batch.instances.iter().map(|d| InstanceData::new(d, batch.material)));
            ranges.push(DrawRange {
                handle: batch.handle,
                instances: start..data.len() as u32,
            });
        }
        self.instances.write(&self.context.device, &self.context.queue, &data);
        ranges
    }

    fn draw_instances(&self, pass: &mut wgpu::RenderPass<'_>, ranges: &[DrawRange]) {
        pass.set_vertex_buffer(1, self.instances.buffer.slice(..));
        for range in ranges {
            let Some(mesh) = self.meshes.get(&range.handle) else {
                continue;
            };
            pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
            pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..mesh.index_count, 0, range.instances.clone());
        }
    }

    fn shadow_pass(&self, ranges: &[DrawRange]) -> Result<(), PassError> {
        self.encode("shadow_pass", |encoder| {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("shadow_pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(depth_attachment(&self.shadow_map.view)),
                ..Default::default()
            });
            pass.set_pipeline(&self.pipelines.shadow);
            pass.set_bind_group(0, &self.uniforms.globals_group, &[]);
            self.draw_instances(&mut pass, ranges);
        })
    }

    /// Mirrored scene into the sharp reflection target, then its blurred copy.
    fn reflection_pass(&self, scene: &Scene, ranges: &[DrawRange]) -> Result<(), PassError> {
        let bg = scene.config().background;
        let t = &self.targets;
        let (rx, ry) = self
            .config
            .reflection
            .blur_radii(t.reflection.size.0 as usize, t.reflection.size.1 as usize);
        self.write(
            &self.uniforms.blur[BLUR_REFLECTION_H],
            &BlurUniforms::along(true, rx as u32, t.reflection.size.0),
        );
        self.write(
            &self.uniforms.blur[BLUR_REFLECTION_V],
            &BlurUniforms::along(false, ry as u32, t.reflection.size.1),
        );

        self.encode("reflection_pass", |encoder| {
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("mirrored_scene"),
                    color_attachments: &[Some(color_attachment(
                        &t.reflection.view,
                        wgpu::LoadOp::Clear(wgpu::Color {
                            r: f64::from(bg.r),
                            g: f64::from(bg.g),
                            b: f64::from(bg.b),
                            a: REFLECTION_CLEAR_DEPTH,
                        }),
                    ))],
                    depth_stencil_attachment: Some(depth_attachment(&t.reflection_depth.view)),
                    ..Default::default()
                });
                pass.set_pipeline(&self.pipelines.scene_mirrored);
                pass.set_bind_group(0, &self.uniforms.globals_mirrored_group, &[]);
                pass.set_bind_group(1, &self.shadow_group, &[]);
                self.draw_instances(&mut pass, ranges);
            }
            let h = self.blur_group(&t.reflection.view, BLUR_REFLECTION_H);
            fullscreen(encoder, "reflection_blur_h", &self.pipelines.blur, &h, &t.reflection_tmp.view, None);
            let v = self.blur_group(&t.reflection_tmp.view, BLUR_REFLECTION_V);
            fullscreen(encoder, "reflection_blur_v", &self.pipelines.blur, &v, &t.reflection_blur.view, None);
        })
    }

    fn primary_pass(&self, scene: &Scene, ranges: &[DrawRange]) -> Result<(), PassError> {
        let bg = scene.config().background;
        let t = &self.targets;
        let floor_group = self.context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("floor_group"),
            layout: &self.layouts.floor,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniforms.floor.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&t.reflection.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&t.reflection_blur.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.linear_sampler),
                },
            ],
        });

        self.encode("primary_pass", |encoder| {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("primary_pass"),
                color_attachments: &[Some(color_attachment(
                    &t.hdr.view,
                    wgpu::LoadOp::Clear(wgpu::Color {
                        r: f64::from(bg.r),
                        g: f64::from(bg.g),
                        b: f64::from(bg.b),
                        a: 1.0,
                    }),
                ))],
                depth_stencil_attachment: Some(depth_attachment(&t.depth.view)),
                ..Default::default()
            });

            pass.set_pipeline(&self.pipelines.floor);
            pass.set_bind_group(0, &self.uniforms.globals_group, &[]);
            pass.set_bind_group(1, &self.shadow_group, &[]);
            pass.set_bind_group(2, &floor_group, &[]);
            pass.set_vertex_buffer(0, self.floor_mesh.vertex_buffer.slice(..));
            pass.set_index_buffer(self.floor_mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..self.floor_mesh.index_count, 0, 0..1);

            pass.set_pipeline(&self.pipelines.scene);
            self.draw_instances(&mut pass, ranges);
        })
    }

    /// Bright pass, mip chain (or a flat blur), composite into `post_a`.
    fn bloom_pass(&self) -> Result<(), PassError> {
        let t = &self.targets;
        let bloom = &self.config.bloom;
        let mips = &t.bloom_mips;
        let Some(first) = mips.first() else {
            return Err(PassError::Unavailable("bloom mip chain is empty".into()));
        };
        if !bloom.mipmap_blur {
            self.write(
                &self.uniforms.blur[BLUR_BLOOM_H],
                &BlurUniforms::along(true, bloom.levels, first.size.0),
            );
            self.write(
                &self.uniforms.blur[BLUR_BLOOM_V],
                &BlurUniforms::along(false, bloom.levels, first.size.1),
            );
        }

        self.encode("bloom", |encoder| {
            let bright = self.bloom_group(&t.hdr.view, &t.hdr.view);
            fullscreen(encoder, "bloom_bright", &self.pipelines.bloom_bright, &bright, &first.view, None);

            if bloom.mipmap_blur {
                for pair in mips.windows(2) {
                    let group = self.bloom_group(&pair[0].view, &pair[0].view);
                    fullscreen(encoder, "bloom_down", &self.pipelines.bloom_down, &group, &pair[1].view, None);
                }
                for pair in mips.windows(2).rev() {
                    let group = self.bloom_group(&pair[1].view, &pair[1].view);
                    fullscreen(
                        encoder,
                        "bloom_up",
                        &self.pipelines.bloom_up,
                        &group,
                        &pair[0].view,
                        Some(f64::from(bloom.radius)),
                    );
                }
            } else {
                let h = self.blur_group(&first.view, BLUR_BLOOM_H);
                fullscreen(encoder, "bloom_blur_h", &self.pipelines.blur, &h, &t.bloom_tmp.view, None);
                let v = self.blur_group(&t.bloom_tmp.view, BLUR_BLOOM_V);
                fullscreen(encoder, "bloom_blur_v", &self.pipelines.blur, &v, &first.view, None);
            }

            let composite = self.bloom_group(&t.hdr.view, &first.view);
            fullscreen(encoder, "bloom_composite", &self.pipelines.bloom_composite, &composite, &t.post_a.view, None);
        })
    }

    /// Low-resolution blur of `post_a`, blended by circle of confusion into
    /// `post_b`. A zero blur radius copies `post_a` through.
    fn dof_pass(&self) -> Result<(), PassError> {
        let t = &self.targets;
        let (_, radius) = self.config.dof.blur_scale(t.internal.1 as usize);
        if radius == 0 {
            return self.encode("dof_sharp", |encoder| {
                encoder.copy_texture_to_texture(
                    t.post_a.texture.as_image_copy(),
                    t.post_b.texture.as_image_copy(),
                    t.post_b.extent(),
                );
            });
        }
        self.write(&self.uniforms.blur[BLUR_DOF_COPY], &BlurUniforms::copy());
        self.write(
            &self.uniforms.blur[BLUR_DOF_H],
            &BlurUniforms::along(true, radius as u32, t.dof_low_a.size.0),
        );
        self.write(
            &self.uniforms.blur[BLUR_DOF_V],
            &BlurUniforms::along(false, radius as u32, t.dof_low_a.size.1),
        );

        let composite = self.context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("dof_group"),
            layout: &self.layouts.dof,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniforms.dof.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&t.post_a.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&t.dof_low_a.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.linear_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(&t.depth.view),
                },
            ],
        });

        self.encode("depth_of_field", |encoder| {
            let copy = self.blur_group(&t.post_a.view, BLUR_DOF_COPY);
            fullscreen(encoder, "dof_downsample", &self.pipelines.blur, &copy, &t.dof_low_a.view, None);
            let h = self.blur_group(&t.dof_low_a.view, BLUR_DOF_H);
            fullscreen(encoder, "dof_blur_h", &self.pipelines.blur, &h, &t.dof_low_b.view, None);
            let v = self.blur_group(&t.dof_low_b.view, BLUR_DOF_V);
            fullscreen(encoder, "dof_blur_v", &self.pipelines.blur, &v, &t.dof_low_a.view, None);
            fullscreen(encoder, "dof_composite", &self.pipelines.dof, &composite, &t.post_b.view, None);
        })
    }

    /// Stand in for a failed post stage: keep the previous output when there
    /// is one, otherwise pass the stage's input through.
    fn recover(
        &self,
        pass: &'static str,
        error: PassError,
        ready: bool,
        input: &Target,
        output: &Target,
    ) -> SkippedPass {
        if !ready {
            let copied = self.encode("post_passthrough", |encoder| {
                encoder.copy_texture_to_texture(
                    input.texture.as_image_copy(),
                    output.texture.as_image_copy(),
                    output.extent(),
                );
            });
            if let Err(e) = copied {
                tracing::error!(pass, error = %e, "pass-through copy failed");
            }
        }
        SkippedPass {
            pass,
            error,
            reused_previous: ready,
        }
    }

    fn tonemap(&self, view: &wgpu::TextureView) -> Result<(), PassError> {
        let group = self.context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("tonemap_group"),
            layout: &self.layouts.tonemap,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&self.targets.post_b.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.linear_sampler),
                },
            ],
        });
        self.encode("tonemap", |encoder| {
            fullscreen(encoder, "tonemap", &self.pipelines.tonemap, &group, view, None);
        })
    }

    fn blur_group(&self, src: &wgpu::TextureView, slot: usize) -> wgpu::BindGroup {
        self.context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blur_group"),
            layout: &self.layouts.blur,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniforms.blur[slot].as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(src),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.linear_sampler),
                },
            ],
        })
    }

    fn bloom_group(&self, src: &wgpu::TextureView, glow: &wgpu::TextureView) -> wgpu::BindGroup {
        self.context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("bloom_group"),
            layout: &self.layouts.bloom,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniforms.bloom.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(src),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.linear_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(glow),
                },
            ],
        })
    }
}

impl Renderer for WgpuRenderer {
    type Output = GpuFrame;

    fn render_frame(
        &mut self,
        scene: &Scene,
        camera: &CameraState,
        plan: &FramePlan,
    ) -> Result<RenderedFrame<GpuFrame>, FrameError> {
        let texture = self.context.acquire()?;
        let view = texture.texture.create_view(&Default::default());

        let ranges = self.upload_instances(scene);
        let casts = scene.spot_light().cast_shadow;
        let mut outcome = FrameOutcome::default();

        let shadows_ready = casts && (self.shadows_ready || plan.render_shadows);
        self.write(&self.uniforms.globals, &Globals::primary(scene, camera, shadows_ready));
        self.write(
            &self.uniforms.globals_mirrored,
            &Globals::mirrored(scene, camera, shadows_ready),
        );
        self.write(&self.uniforms.bloom, &BloomUniforms::from(&self.config.bloom));
        self.write(&self.uniforms.dof, &DofUniforms::new(&self.config.dof, camera));

        if plan.render_shadows {
            match self.shadow_pass(&ranges) {
                Ok(()) => {
                    self.shadows_ready = true;
                    outcome.shadows_rendered = true;
                }
                Err(error) => {
                    outcome.skipped.push(SkippedPass {
                        pass: "shadows",
                        error,
                        reused_previous: self.shadows_ready,
                    });
                    if !self.shadows_ready {
                        self.write(&self.uniforms.globals, &Globals::primary(scene, camera, false));
                        self.write(
                            &self.uniforms.globals_mirrored,
                            &Globals::mirrored(scene, camera, false),
                        );
                    }
                }
            }
        }

        if plan.render_reflection {
            match self.reflection_pass(scene, &ranges) {
                Ok(()) => {
                    self.reflection_ready = true;
                    outcome.reflection_rendered = true;
                }
                Err(error) => outcome.skipped.push(SkippedPass {
                    pass: "reflection",
                    error,
                    reused_previous: self.reflection_ready,
                }),
            }
        }
        self.write(
            &self.uniforms.floor,
            &FloorUniforms::new(scene, &self.config.reflection, self.targets.internal, self.reflection_ready),
        );

        if let Err(error) = self.primary_pass(scene, &ranges) {
            // the previous primary frame stays in the HDR target
            outcome.skipped.push(SkippedPass {
                pass: "primary",
                error,
                reused_previous: true,
            });
        }

        match self.bloom_pass() {
            Ok(()) => self.bloom_ready = true,
            Err(error) => {
                let t = &self.targets;
                let skipped = self.recover("bloom", error, self.bloom_ready, &t.hdr, &t.post_a);
                outcome.skipped.push(skipped);
            }
        }
        match self.dof_pass() {
            Ok(()) => self.dof_ready = true,
            Err(error) => {
                let t = &self.targets;
                let skipped = self.recover("depth_of_field", error, self.dof_ready, &t.post_a, &t.post_b);
                outcome.skipped.push(skipped);
            }
        }

        self.tonemap(&view)
            .map_err(|e| FrameError::Other(format!("tone mapping: {e}")))?;

        if !outcome.skipped.is_empty() {
            tracing::debug!(frame = plan.frame, skipped = outcome.skipped.len(), "frame degraded");
        }

        Ok(RenderedFrame {
            output: GpuFrame { texture, view },
            outcome,
        })
    }
}

fn target_sizes(config: &SessionConfig, internal: (u32, u32)) -> TargetSizes {
    TargetSizes {
        internal,
        reflection_resolution: config.reflection.resolution,
        bloom_levels: config.bloom.levels,
        dof_render_height: config.dof.render_height,
    }
}

fn color_attachment(
    view: &wgpu::TextureView,
    load: wgpu::LoadOp<wgpu::Color>,
) -> wgpu::RenderPassColorAttachment<'_> {
    wgpu::RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: wgpu::Operations {
            load,
            store: wgpu::StoreOp::Store,
        },
    }
}

fn depth_attachment(view: &wgpu::TextureView) -> wgpu::RenderPassDepthStencilAttachment<'_> {
    wgpu::RenderPassDepthStencilAttachment {
        view,
        depth_ops: Some(wgpu::Operations {
            load: wgpu::LoadOp::Clear(1.0),
            store: wgpu::StoreOp::Store,
        }),
        stencil_ops: None,
    }
}

/// One fullscreen triangle into `target`. With a blend constant the target
/// is loaded and blended into; otherwise it is cleared.
fn fullscreen(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::RenderPipeline,
    group: &wgpu::BindGroup,
    target: &wgpu::TextureView,
    blend_constant: Option<f64>,
) {
    let load = match blend_constant {
        Some(_) => wgpu::LoadOp::Load,
        None => wgpu::LoadOp::Clear(wgpu::Color::BLACK),
    };
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(color_attachment(target, load))],
        ..Default::default()
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, group, &[]);
    if let Some(c) = blend_constant {
        pass.set_blend_constant(wgpu::Color { r: c, g: c, b: c, a: c });
    }
    pass.draw(0..3, 0..1);
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn texture_entry(binding: u32, sample_type: wgpu::TextureSampleType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32, kind: wgpu::SamplerBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(kind),
        count: None,
    }
}

const FLOAT: wgpu::TextureSampleType = wgpu::TextureSampleType::Float { filterable: true };

impl Layouts {
    fn new(device: &wgpu::Device) -> Self {
        let layout = |label: &str, entries: &[wgpu::BindGroupLayoutEntry]| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries,
            })
        };
        let fragment = wgpu::ShaderStages::FRAGMENT;
        let both = wgpu::ShaderStages::VERTEX_FRAGMENT;
        let filtering = wgpu::SamplerBindingType::Filtering;

        Self {
            globals: layout("globals_layout", &[uniform_entry(0, both)]),
            shadow: layout(
                "shadow_layout",
                &[
                    texture_entry(0, wgpu::TextureSampleType::Depth),
                    sampler_entry(1, wgpu::SamplerBindingType::Comparison),
                ],
            ),
            floor: layout(
                "floor_layout",
                &[
                    uniform_entry(0, both),
                    texture_entry(1, FLOAT),
                    texture_entry(2, FLOAT),
                    sampler_entry(3, filtering),
                ],
            ),
            blur: layout(
                "blur_layout",
                &[uniform_entry(0, fragment), texture_entry(1, FLOAT), sampler_entry(2, filtering)],
            ),
            bloom: layout(
                "bloom_layout",
                &[
                    uniform_entry(0, fragment),
                    texture_entry(1, FLOAT),
                    sampler_entry(2, filtering),
                    texture_entry(3, FLOAT),
                ],
            ),
            dof: layout(
                "dof_layout",
                &[
                    uniform_entry(0, fragment),
                    texture_entry(1, FLOAT),
                    texture_entry(2, FLOAT),
                    sampler_entry(3, filtering),
                    texture_entry(4, wgpu::TextureSampleType::Depth),
                ],
            ),
            tonemap: layout(
                "tonemap_layout",
                &[texture_entry(0, FLOAT), sampler_entry(1, filtering)],
            ),
        }
    }
}

impl Uniforms {
    fn new(device: &wgpu::Device, layouts: &Layouts) -> Self {
        let buffer = |label: &str, size: usize| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: size as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let globals = buffer("globals", std::mem::size_of::<Globals>());
        let globals_mirrored = buffer("globals_mirrored", std::mem::size_of::<Globals>());
        let globals_group = |label: &str, buf: &wgpu::Buffer| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &layouts.globals,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buf.as_entire_binding(),
                }],
            })
        };

        Self {
            globals_group: globals_group("globals_group", &globals),
            globals_mirrored_group: globals_group("globals_mirrored_group", &globals_mirrored),
            globals,
            globals_mirrored,
            floor: buffer("floor_uniforms", std::mem::size_of::<FloorUniforms>()),
            bloom: buffer("bloom_uniforms", std::mem::size_of::<BloomUniforms>()),
            dof: buffer("dof_uniforms", std::mem::size_of::<DofUniforms>()),
            blur: (0..BLUR_SLOTS)
                .map(|i| buffer(&format!("blur_uniforms_{i}"), std::mem::size_of::<BlurUniforms>()))
                .collect(),
        }
    }
}

impl Pipelines {
    fn new(device: &wgpu::Device, layouts: &Layouts, surface_format: wgpu::TextureFormat) -> Self {
        let module = |label: &str, parts: &[&str]| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(shaders::with_prelude(parts).into()),
            })
        };
        let pipeline_layout = |label: &str, groups: &[&wgpu::BindGroupLayout]| {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: groups,
                push_constant_ranges: &[],
            })
        };

        let scene_module = module(
            "scene_shader",
            &[shaders::GLOBALS, shaders::LIGHTING, shaders::SCENE],
        );
        let shadow_module = module("shadow_shader", &[shaders::GLOBALS, shaders::SHADOW]);
        let floor_module = module(
            "floor_shader",
            &[shaders::GLOBALS, shaders::LIGHTING, shaders::FLOOR],
        );
        let blur_module = module("blur_shader", &[shaders::FULLSCREEN, shaders::BLUR]);
        let bloom_module = module("bloom_shader", &[shaders::FULLSCREEN, shaders::BLOOM]);
        let dof_module = module("dof_shader", &[shaders::FULLSCREEN, shaders::DOF]);
        let tonemap_module = module("tonemap_shader", &[shaders::FULLSCREEN, shaders::TONEMAP]);

        let lit_layout = pipeline_layout("lit_layout", &[&layouts.globals, &layouts.shadow]);
        let shadow_layout = pipeline_layout("shadow_layout", &[&layouts.globals]);
        let floor_layout = pipeline_layout(
            "floor_layout",
            &[&layouts.globals, &layouts.shadow, &layouts.floor],
        );
        let blur_layout = pipeline_layout("blur_layout", &[&layouts.blur]);
        let bloom_layout = pipeline_layout("bloom_layout", &[&layouts.bloom]);
        let dof_layout = pipeline_layout("dof_layout", &[&layouts.dof]);
        let tonemap_layout = pipeline_layout("tonemap_layout", &[&layouts.tonemap]);

        let scene = |label: &str, front_face: wgpu::FrontFace| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&lit_layout),
                vertex: wgpu::VertexState {
                    module: &scene_module,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[Vertex::LAYOUT, InstanceData::LAYOUT],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &scene_module,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: HDR_FORMAT,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face,
                    cull_mode: Some(wgpu::Face::Back),
                    ..Default::default()
                },
                depth_stencil: Some(depth_state(Default::default())),
                multisample: Default::default(),
                multiview: None,
                cache: None,
            })
        };

        let shadow = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("shadow_pipeline"),
            layout: Some(&shadow_layout),
            vertex: wgpu::VertexState {
                module: &shadow_module,
                entry_point: Some("vs_shadow"),
                compilation_options: Default::default(),
                buffers: &[Vertex::LAYOUT, InstanceData::LAYOUT],
            },
            fragment: None,
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: Some(depth_state(wgpu::DepthBiasState {
                constant: 2,
                slope_scale: 2.0,
                clamp: 0.0,
            })),
            multisample: Default::default(),
            multiview: None,
            cache: None,
        });

        let floor = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("floor_pipeline"),
            layout: Some(&floor_layout),
            vertex: wgpu::VertexState {
                module: &floor_module,
                entry_point: Some("vs_floor"),
                compilation_options: Default::default(),
                buffers: &[Vertex::POSITION_LAYOUT],
            },
            fragment: Some(wgpu::FragmentState {
                module: &floor_module,
                entry_point: Some("fs_floor"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: HDR_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: Some(depth_state(Default::default())),
            multisample: Default::default(),
            multiview: None,
            cache: None,
        });

        let screen = |label: &str,
                      layout: &wgpu::PipelineLayout,
                      module: &wgpu::ShaderModule,
                      entry: &str,
                      format: wgpu::TextureFormat,
                      blend: wgpu::BlendState| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some("vs_fullscreen"),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: Some(entry),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: Default::default(),
                depth_stencil: None,
                multisample: Default::default(),
                multiview: None,
                cache: None,
            })
        };

        // lerp(fine, coarse, radius) with the coarse level as the source
        let upsample_blend = wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::Constant,
                dst_factor: wgpu::BlendFactor::OneMinusConstant,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent::REPLACE,
        };
        let replace = wgpu::BlendState::REPLACE;

        Self {
            scene: scene("scene_pipeline", wgpu::FrontFace::Ccw),
            // the mirror flips winding
            scene_mirrored: scene("scene_mirrored_pipeline", wgpu::FrontFace::Cw),
            shadow,
            floor,
            blur: screen("blur_pipeline", &blur_layout, &blur_module, "fs_blur", HDR_FORMAT, replace),
            bloom_bright: screen("bloom_bright", &bloom_layout, &bloom_module, "fs_bright", HDR_FORMAT, replace),
            bloom_down: screen("bloom_down", &bloom_layout, &bloom_module, "fs_downsample", HDR_FORMAT, replace),
            bloom_up: screen("bloom_up", &bloom_layout, &bloom_module, "fs_upsample", HDR_FORMAT, upsample_blend),
            bloom_composite: screen(
                "bloom_composite",
                &bloom_layout,
                &bloom_module,
                "fs_composite",
                HDR_FORMAT,
                replace,
            ),
            dof: screen("dof_pipeline", &dof_layout, &dof_module, "fs_dof", HDR_FORMAT, replace),
            tonemap: screen(
                "tonemap_pipeline",
                &tonemap_layout,
                &tonemap_module,
                "fs_tonemap",
                surface_format,
                replace,
            ),
        }
    }
}

fn depth_state(bias: wgpu::DepthBiasState) -> wgpu::DepthStencilState {
    wgpu::DepthStencilState {
        format: DEPTH_FORMAT,
        depth_write_enabled: true,
        depth_compare: wgpu::CompareFunction::Less,
        stencil: Default::default(),
        bias,
    }
}
