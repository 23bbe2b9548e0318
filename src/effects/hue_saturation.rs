use crate::effect::{AttributeSpec, EffectDescriptor, UniformSpec};
use crate::shader::ShaderSource;

// The rotation weights only depend on u_hue, so they are computed per vertex.
const VERTEX_SHADER: &str = r#"
struct Params {
    u_hue: f32,
    u_saturation: f32,
}

@group(0) @binding(2) var<uniform> params: Params;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) tex_coord: vec2<f32>,
    @location(1) weights: vec3<f32>,
}

@vertex
fn vs_main(@location(0) a_position: vec2<f32>, @location(1) a_texCoord: vec2<f32>) -> VertexOutput {
    let angle = params.u_hue * 3.141592653589793;
    let s = sin(angle);
    let c = cos(angle);
    let root3 = sqrt(3.0);

    var out: VertexOutput;
    out.weights = (vec3<f32>(2.0 * c, -root3 * s - c, root3 * s - c) + vec3<f32>(1.0)) / 3.0;
    out.tex_coord = a_texCoord;
    out.position = vec4<f32>(a_position, 0.0, 1.0);
    return out;
}
"#;

const FRAGMENT_SHADER: &str = r#"
struct Params {
    u_hue: f32,
    u_saturation: f32,
}

@group(0) @binding(0) var t_source: texture_2d<f32>;
@group(0) @binding(1) var s_source: sampler;
@group(0) @binding(2) var<uniform> params: Params;

@fragment
fn fs_main(@location(0) tex_coord: vec2<f32>, @location(1) weights: vec3<f32>) -> @location(0) vec4<f32> {
    let pixel = textureSample(t_source, s_source, tex_coord);

    var rgb = vec3<f32>(
        dot(pixel.rgb, weights.xyz),
        dot(pixel.rgb, weights.zxy),
        dot(pixel.rgb, weights.yzx)
    );

    var adjustment = vec3<f32>((rgb.r + rgb.g + rgb.b) / 3.0) - rgb;
    if (params.u_saturation > 0.0) {
        adjustment = adjustment * (1.0 - 1.0 / (1.0001 - params.u_saturation));
    } else {
        adjustment = adjustment * (-params.u_saturation);
    }
    rgb = rgb + adjustment;

    return vec4<f32>(rgb, pixel.a);
}
"#;

/// Rotates hue and scales saturation.
///
/// * `u_hue`: -1.0 to 1.0, a rotation of -180 to +180 degrees
/// * `u_saturation`: -1.0 is grayscale, 0.0 unchanged, 1.0 maximum
///
/// Drawn as a six-vertex triangle list.
pub fn hue_saturation() -> EffectDescriptor {
    EffectDescriptor {
        name: Some("hue-saturation".to_string()),
        vertex_source: ShaderSource::Wgsl(VERTEX_SHADER.to_string()),
        fragment_source: ShaderSource::Wgsl(FRAGMENT_SHADER.to_string()),
        attributes: vec![
            AttributeSpec::float(
                "a_position",
                2,
                vec![-1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, -1.0],
            ),
            AttributeSpec::float(
                "a_texCoord",
                2,
                vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0],
            ),
        ],
        uniforms: vec![
            UniformSpec::float("u_hue", vec![0.0]),
            UniformSpec::float("u_saturation", vec![0.0]),
        ],
    }
}
