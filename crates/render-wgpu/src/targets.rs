//! Offscreen render targets. Sizes are derived here and textures are only
//! (re)created at setup and on resize. The shadow map is sized by the light
//! and outlives resizes.

use gridlight_render::DprRange;

pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Internal render size for a surface of `size` physical pixels at the
/// window's `scale_factor`, with the device pixel ratio clamped to `dpr`.
pub fn internal_size(size: (u32, u32), scale_factor: f64, dpr: &DprRange) -> (u32, u32) {
    let sf = if scale_factor > 0.0 { scale_factor as f32 } else { 1.0 };
    let factor = dpr.clamp(f64::from(sf)) / sf;
    scaled(size, factor)
}

/// Reflection target: the internal size shrunk so its long edge does not
/// exceed `resolution`.
pub fn reflection_size(internal: (u32, u32), resolution: u32) -> (u32, u32) {
    let long = internal.0.max(internal.1).max(1) as f32;
    scaled(internal, (resolution as f32 / long).min(1.0))
}

/// Low-resolution depth-of-field blur target.
pub fn dof_size(internal: (u32, u32), render_height: u32) -> (u32, u32) {
    let h = internal.1.max(1) as f32;
    scaled(internal, (render_height as f32 / h).min(1.0))
}

/// Bloom mip chain starting at half resolution, halving down to 1×1 or
/// until `levels` sizes exist.
pub fn bloom_mip_sizes(internal: (u32, u32), levels: u32) -> Vec<(u32, u32)> {
    let mut size = ((internal.0 / 2).max(1), (internal.1 / 2).max(1));
    let mut sizes = vec![size];
    while (sizes.len() as u32) < levels && size != (1, 1) {
        size = ((size.0 / 2).max(1), (size.1 / 2).max(1));
        sizes.push(size);
    }
    sizes
}

fn scaled(size: (u32, u32), factor: f32) -> (u32, u32) {
    (
        ((size.0 as f32 * factor).round() as u32).max(1),
        ((size.1 as f32 * factor).round() as u32).max(1),
    )
}

/// A texture with its default view.
#[derive(Debug)]
pub struct Target {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub size: (u32, u32),
}

impl Target {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        size: (u32, u32),
        format: wgpu::TextureFormat,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size.0.max(1),
                height: size.1.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&Default::default());
        Self { texture, view, size }
    }

    pub fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.size.0.max(1),
            height: self.size.1.max(1),
            depth_or_array_layers: 1,
        }
    }
}

/// Every offscreen target of one frame.
#[derive(Debug)]
pub struct RenderTargets {
    pub internal: (u32, u32),
    pub hdr: Target,
    pub depth: Target,
    pub reflection: Target,
    pub reflection_depth: Target,
    pub reflection_tmp: Target,
    pub reflection_blur: Target,
    pub bloom_mips: Vec<Target>,
    pub bloom_tmp: Target,
    /// Bloom output.
    pub post_a: Target,
    /// Depth-of-field output.
    pub post_b: Target,
    pub dof_low_a: Target,
    pub dof_low_b: Target,
}

/// Sizing inputs for [`RenderTargets`].
#[derive(Debug, Clone, Copy)]
pub struct TargetSizes {
    pub internal: (u32, u32),
    pub reflection_resolution: u32,
    pub bloom_levels: u32,
    pub dof_render_height: u32,
}

impl RenderTargets {
    pub fn new(device: &wgpu::Device, sizes: &TargetSizes) -> Self {
        let internal = sizes.internal;
        let reflection = reflection_size(internal, sizes.reflection_resolution);
        let dof = dof_size(internal, sizes.dof_render_height);
        let mips = bloom_mip_sizes(internal, sizes.bloom_levels);

        tracing::debug!(?internal, ?reflection, ?dof, mips = mips.len(), "render targets created");

        Self {
            internal,
            hdr: Target::new(device, "hdr", internal, HDR_FORMAT),
            depth: Target::new(device, "depth", internal, DEPTH_FORMAT),
            reflection: Target::new(device, "reflection", reflection, HDR_FORMAT),
            reflection_depth: Target::new(device, "reflection_depth", reflection, DEPTH_FORMAT),
            reflection_tmp: Target::new(device, "reflection_tmp", reflection, HDR_FORMAT),
            reflection_blur: Target::new(device, "reflection_blur", reflection, HDR_FORMAT),
            bloom_tmp: Target::new(device, "bloom_tmp", mips[0], HDR_FORMAT),
            bloom_mips: mips
                .iter()
                .enumerate()
                .map(|(i, &size)| Target::new(device, &format!("bloom_mip_{i}"), size, HDR_FORMAT))
                .collect(),
            post_a: Target::new(device, "post_a", internal, HDR_FORMAT),
            post_b: Target::new(device, "post_b", internal, HDR_FORMAT),
            dof_low_a: Target::new(device, "dof_low_a", dof, HDR_FORMAT),
            dof_low_b: Target::new(device, "dof_low_b", dof, HDR_FORMAT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_size_clamps_pixel_ratio() {
        let dpr = DprRange::default();
        // 2x display renders at 1.5x
        assert_eq!(internal_size((2000, 1000), 2.0, &dpr), (1500, 750));
        // 1x display stays native
        assert_eq!(internal_size((800, 600), 1.0, &dpr), (800, 600));
        // 1.25x sits inside the range
        assert_eq!(internal_size((1250, 500), 1.25, &dpr), (1250, 500));
    }

    #[test]
    fn internal_size_handles_degenerate_input() {
        let dpr = DprRange::default();
        assert_eq!(internal_size((0, 0), 1.0, &dpr), (1, 1));
        assert_eq!(internal_size((640, 480), 0.0, &dpr), (640, 480));
    }

    #[test]
    fn reflection_size_caps_long_edge() {
        assert_eq!(reflection_size((1920, 1080), 2048), (1920, 1080));
        assert_eq!(reflection_size((4096, 2048), 2048), (2048, 1024));
        assert_eq!(reflection_size((1000, 500), 256), (256, 128));
    }

    #[test]
    fn dof_size_follows_render_height() {
        assert_eq!(dof_size((1400, 1400), 700), (700, 700));
        assert_eq!(dof_size((640, 480), 700), (640, 480));
    }

    #[test]
    fn bloom_chain_stops_at_levels_or_one_pixel() {
        let sizes = bloom_mip_sizes((1024, 512), 8);
        assert_eq!(sizes.len(), 8);
        assert_eq!(sizes[0], (512, 256));
        assert_eq!(sizes[7], (4, 2));

        let tiny = bloom_mip_sizes((8, 4), 8);
        assert_eq!(tiny, vec![(4, 2), (2, 1), (1, 1)]);

        assert_eq!(bloom_mip_sizes((1, 1), 3), vec![(1, 1)]);
    }
}
