//! WGSL sources. Modules that share declarations are assembled with
//! [`with_prelude`].

/// Scene-wide uniforms shared by the scene, shadow and floor shaders.
pub const GLOBALS: &str = r#"
struct Globals {
    view_proj: mat4x4<f32>,
    light_view_proj: mat4x4<f32>,
    camera_pos: vec4<f32>,
    // w: spot intensity
    light_pos: vec4<f32>,
    // xyz: spot direction, w: cos of the outer cone angle
    light_dir: vec4<f32>,
    // rgb: sky color, w: hemisphere intensity
    sky: vec4<f32>,
    // rgb: ground color, w: cos of the inner cone angle
    ground: vec4<f32>,
    // fragments with dot(p, xyz) + w < 0 are discarded
    clip_plane: vec4<f32>,
    // x: near, y: far, z: shadow map valid, w: mirror pass
    params: vec4<f32>,
};

@group(0) @binding(0)
var<uniform> globals: Globals;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
};

struct InstanceInput {
    @location(2) model_0: vec4<f32>,
    @location(3) model_1: vec4<f32>,
    @location(4) model_2: vec4<f32>,
    @location(5) model_3: vec4<f32>,
    @location(6) color: vec4<f32>,
};

fn instance_model(instance: InstanceInput) -> mat4x4<f32> {
    return mat4x4<f32>(
        instance.model_0,
        instance.model_1,
        instance.model_2,
        instance.model_3,
    );
}
"#;

/// Hemisphere plus shadowed spot lighting.
pub const LIGHTING: &str = r#"
@group(1) @binding(0)
var shadow_map: texture_depth_2d;
@group(1) @binding(1)
var shadow_sampler: sampler_comparison;

fn shadow_factor(world_pos: vec3<f32>) -> f32 {
    if (globals.params.z < 0.5) {
        return 1.0;
    }
    let clip = globals.light_view_proj * vec4<f32>(world_pos, 1.0);
    if (clip.w <= 0.0) {
        return 1.0;
    }
    let ndc = clip.xyz / clip.w;
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    if (any(uv < vec2<f32>(0.0)) || any(uv > vec2<f32>(1.0)) || ndc.z > 1.0) {
        return 1.0;
    }
    return textureSampleCompareLevel(shadow_map, shadow_sampler, uv, ndc.z - 0.002);
}

fn lighting(world_pos: vec3<f32>, normal: vec3<f32>) -> vec3<f32> {
    let hemi = mix(globals.ground.rgb, globals.sky.rgb, normal.y * 0.5 + 0.5) * globals.sky.w;
    let l = normalize(globals.light_pos.xyz - world_pos);
    let cone = smoothstep(globals.light_dir.w, globals.ground.w, dot(-l, globals.light_dir.xyz));
    let ndotl = max(dot(normal, l), 0.0);
    let spot = globals.light_pos.w * cone * ndotl * shadow_factor(world_pos);
    return hemi + vec3<f32>(spot);
}
"#;

/// Instanced models, used for both the primary and the mirrored pass.
pub const SCENE: &str = r#"
struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_pos: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) color: vec4<f32>,
};

@vertex
fn vs_main(vertex: VertexInput, instance: InstanceInput) -> VertexOutput {
    let model = instance_model(instance);
    let world = model * vec4<f32>(vertex.position, 1.0);

    var out: VertexOutput;
    out.clip_position = globals.view_proj * world;
    out.world_pos = world.xyz;
    out.world_normal = normalize((model * vec4<f32>(vertex.normal, 0.0)).xyz);
    out.color = instance.color;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let side = dot(in.world_pos, globals.clip_plane.xyz) + globals.clip_plane.w;
    if (side < 0.0) {
        discard;
    }
    let color = in.color.rgb * lighting(in.world_pos, normalize(in.world_normal));
    // mirrored pass: alpha carries the height above the floor
    let alpha = select(1.0, side, globals.params.w > 0.5);
    return vec4<f32>(color, alpha);
}
"#;

/// Depth-only pass from the spot light.
pub const SHADOW: &str = r#"
@vertex
fn vs_shadow(vertex: VertexInput, instance: InstanceInput) -> @builtin(position) vec4<f32> {
    return globals.light_view_proj * instance_model(instance) * vec4<f32>(vertex.position, 1.0);
}
"#;

/// Reflective floor.
pub const FLOOR: &str = r#"
struct Plane {
    model: mat4x4<f32>,
    // rgb: base color, w: mix strength
    base: vec4<f32>,
    // x: blur mix, y: reflectance, z: fade exponent, w: reflection available
    mix_params: vec4<f32>,
    // x: min depth, y: max depth, zw: viewport size
    fade: vec4<f32>,
};

@group(2) @binding(0)
var<uniform> plane: Plane;
@group(2) @binding(1)
var reflection_sharp: texture_2d<f32>;
@group(2) @binding(2)
var reflection_blurred: texture_2d<f32>;
@group(2) @binding(3)
var reflection_sampler: sampler;

struct FloorOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_pos: vec3<f32>,
};

@vertex
fn vs_floor(@location(0) position: vec3<f32>) -> FloorOutput {
    let world = plane.model * vec4<f32>(position, 1.0);
    var out: FloorOutput;
    out.clip_position = globals.view_proj * world;
    out.world_pos = world.xyz;
    return out;
}

@fragment
fn fs_floor(in: FloorOutput) -> @location(0) vec4<f32> {
    let base = plane.base.rgb;
    let lit = base * lighting(in.world_pos, vec3<f32>(0.0, 1.0, 0.0));

    let uv = in.clip_position.xy / plane.fade.zw;
    let sharp = textureSampleLevel(reflection_sharp, reflection_sampler, uv, 0.0);
    let blurred = textureSampleLevel(reflection_blurred, reflection_sampler, uv, 0.0);
    let fade = 1.0 - smoothstep(plane.fade.x, plane.fade.y, sharp.a);
    let contribution = clamp(pow(max(fade, 0.0), plane.mix_params.z), 0.0, 1.0);
    let merged = mix(sharp.rgb, blurred.rgb, plane.mix_params.x);
    let weight = plane.base.w * contribution * plane.mix_params.y * plane.mix_params.w;
    return vec4<f32>(lit + base * merged * weight, 1.0);
}
"#;

/// Fullscreen triangle shared by every screen-space pass.
pub const FULLSCREEN: &str = r#"
struct ScreenOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_fullscreen(@builtin(vertex_index) index: u32) -> ScreenOutput {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: ScreenOutput;
    out.position = vec4<f32>(uv * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0), 0.0, 1.0);
    out.uv = uv;
    return out;
}
"#;

/// Separable box blur with strided taps.
pub const BLUR: &str = r#"
struct Blur {
    // uv step between taps
    direction: vec2<f32>,
    taps: f32,
    _pad: f32,
};

@group(0) @binding(0)
var<uniform> blur: Blur;
@group(0) @binding(1)
var src: texture_2d<f32>;
@group(0) @binding(2)
var src_sampler: sampler;

@fragment
fn fs_blur(in: ScreenOutput) -> @location(0) vec4<f32> {
    let n = i32(blur.taps);
    var sum = vec4<f32>(0.0);
    for (var i = -n; i <= n; i = i + 1) {
        sum = sum + textureSampleLevel(src, src_sampler, in.uv + blur.direction * f32(i), 0.0);
    }
    return sum / f32(2 * n + 1);
}
"#;

/// Threshold, mip chain and composite for bloom.
pub const BLOOM: &str = r#"
struct Bloom {
    threshold: f32,
    smoothing: f32,
    intensity: f32,
    radius: f32,
};

@group(0) @binding(0)
var<uniform> bloom: Bloom;
@group(0) @binding(1)
var src: texture_2d<f32>;
@group(0) @binding(2)
var src_sampler: sampler;
@group(0) @binding(3)
var glow: texture_2d<f32>;

fn luma(c: vec3<f32>) -> f32 {
    return dot(c, vec3<f32>(0.2126, 0.7152, 0.0722));
}

@fragment
fn fs_bright(in: ScreenOutput) -> @location(0) vec4<f32> {
    let c = textureSampleLevel(src, src_sampler, in.uv, 0.0).rgb;
    let l = luma(c);
    var mask = step(bloom.threshold, l);
    if (bloom.smoothing > 0.0) {
        mask = smoothstep(bloom.threshold, bloom.threshold + bloom.smoothing, l);
    }
    return vec4<f32>(c * mask, 1.0);
}

@fragment
fn fs_downsample(in: ScreenOutput) -> @location(0) vec4<f32> {
    let o = 0.5 / vec2<f32>(textureDimensions(src));
    var c = textureSampleLevel(src, src_sampler, in.uv + vec2<f32>(-o.x, -o.y), 0.0);
    c = c + textureSampleLevel(src, src_sampler, in.uv + vec2<f32>(o.x, -o.y), 0.0);
    c = c + textureSampleLevel(src, src_sampler, in.uv + vec2<f32>(-o.x, o.y), 0.0);
    c = c + textureSampleLevel(src, src_sampler, in.uv + vec2<f32>(o.x, o.y), 0.0);
    return vec4<f32>(c.rgb * 0.25, 1.0);
}

// blended into the finer level with a constant blend factor of `radius`
@fragment
fn fs_upsample(in: ScreenOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(textureSampleLevel(src, src_sampler, in.uv, 0.0).rgb, 1.0);
}

@fragment
fn fs_composite(in: ScreenOutput) -> @location(0) vec4<f32> {
    let base = textureSampleLevel(src, src_sampler, in.uv, 0.0).rgb;
    let g = textureSampleLevel(glow, src_sampler, in.uv, 0.0).rgb;
    return vec4<f32>(base + g * bloom.intensity, 1.0);
}
"#;

/// Circle-of-confusion blend between the sharp and the blurred frame.
pub const DOF: &str = r#"
struct Dof {
    focus: f32,
    focal_length: f32,
    near: f32,
    far: f32,
};

@group(0) @binding(0)
var<uniform> dof: Dof;
@group(0) @binding(1)
var sharp_tex: texture_2d<f32>;
@group(0) @binding(2)
var blurred_tex: texture_2d<f32>;
@group(0) @binding(3)
var linear_sampler: sampler;
@group(0) @binding(4)
var depth_tex: texture_depth_2d;

fn linear_depth(z: f32) -> f32 {
    let view_z = dof.near * dof.far / (dof.far - z * (dof.far - dof.near));
    return clamp((view_z - dof.near) / (dof.far - dof.near), 0.0, 1.0);
}

@fragment
fn fs_dof(in: ScreenOutput) -> @location(0) vec4<f32> {
    let dims = vec2<f32>(textureDimensions(depth_tex));
    let coord = vec2<i32>(clamp(in.uv * dims, vec2<f32>(0.0), dims - vec2<f32>(1.0)));
    let z = textureLoad(depth_tex, coord, 0);
    let coc = smoothstep(0.0, dof.focal_length, abs(linear_depth(z) - dof.focus));
    let sharp = textureSampleLevel(sharp_tex, linear_sampler, in.uv, 0.0).rgb;
    let soft = textureSampleLevel(blurred_tex, linear_sampler, in.uv, 0.0).rgb;
    return vec4<f32>(mix(sharp, soft, coc), 1.0);
}
"#;

/// ACES filmic tone mapping onto the surface.
pub const TONEMAP: &str = r#"
@group(0) @binding(0)
var src: texture_2d<f32>;
@group(0) @binding(1)
var src_sampler: sampler;

fn aces(x: vec3<f32>) -> vec3<f32> {
    let num = x * (x * 2.51 + 0.03);
    let den = x * (x * 2.43 + 0.59) + 0.14;
    return clamp(num / den, vec3<f32>(0.0), vec3<f32>(1.0));
}

@fragment
fn fs_tonemap(in: ScreenOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(aces(textureSampleLevel(src, src_sampler, in.uv, 0.0).rgb), 1.0);
}
"#;

/// Concatenate shader pieces in order.
pub fn with_prelude(parts: &[&str]) -> String {
    parts.concat()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_module_has_entry_points() {
        let src = with_prelude(&[GLOBALS, LIGHTING, SCENE]);
        assert!(src.contains("fn vs_main"));
        assert!(src.contains("fn fs_main"));
        assert!(src.find("struct Globals") < src.find("fn lighting"));
    }

    #[test]
    fn screen_passes_share_fullscreen_vertex() {
        for body in [BLUR, BLOOM, DOF, TONEMAP] {
            let src = with_prelude(&[FULLSCREEN, body]);
            assert!(src.contains("fn vs_fullscreen"));
            assert!(src.contains("ScreenOutput"));
        }
    }
}
