use crate::effect::{AttributeSpec, EffectDescriptor, UniformSpec};
use crate::shader::ShaderSource;

const VERTEX_SHADER: &str = r#"
struct Params {
    u_texOffset: vec2<f32>,
}

@group(0) @binding(2) var<uniform> params: Params;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) color_coord: vec2<f32>,
    @location(1) alpha_coord: vec2<f32>,
}

@vertex
fn vs_main(@location(0) a_position: vec2<f32>, @location(1) a_texCoord: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.color_coord = a_texCoord;
    out.alpha_coord = a_texCoord + params.u_texOffset;
    out.position = vec4<f32>(a_position, 0.0, 1.0);
    return out;
}
"#;

const FRAGMENT_SHADER: &str = r#"
@group(0) @binding(0) var t_source: texture_2d<f32>;
@group(0) @binding(1) var s_source: sampler;

@fragment
fn fs_main(@location(0) color_coord: vec2<f32>, @location(1) alpha_coord: vec2<f32>) -> @location(0) vec4<f32> {
    let luma = textureSample(t_source, s_source, alpha_coord).r;
    let color = textureSample(t_source, s_source, color_coord).rgb;
    return vec4<f32>(color, luma);
}
"#;

/// Packs color from the top half of the frame with alpha read from the
/// red channel of the bottom half.
///
/// `u_texOffset` is the displacement from a color texel to its alpha texel.
pub fn transparent_video() -> EffectDescriptor {
    EffectDescriptor {
        name: Some("transparent-video".to_string()),
        vertex_source: ShaderSource::Wgsl(VERTEX_SHADER.to_string()),
        fragment_source: ShaderSource::Wgsl(FRAGMENT_SHADER.to_string()),
        attributes: vec![
            AttributeSpec::float("a_position", 2, vec![-1.0, -1.0, -1.0, 1.0, 1.0, -1.0, 1.0, 1.0]),
            AttributeSpec::float("a_texCoord", 2, vec![0.0, 0.5, 0.0, 0.0, 1.0, 0.5, 1.0, 0.0]),
        ],
        uniforms: vec![UniformSpec::float("u_texOffset", vec![0.0, 0.5])],
    }
}
