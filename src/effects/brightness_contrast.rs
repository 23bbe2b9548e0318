use super::{quad_attributes, QUAD_VERTEX_SHADER};
use crate::effect::{EffectDescriptor, UniformSpec};
use crate::shader::ShaderSource;

const FRAGMENT_SHADER: &str = r#"
struct Params {
    u_brightness: f32,
    u_contrast: f32,
}

@group(0) @binding(0) var t_source: texture_2d<f32>;
@group(0) @binding(1) var s_source: sampler;
@group(0) @binding(2) var<uniform> params: Params;

const HALF3: vec3<f32> = vec3<f32>(0.5, 0.5, 0.5);

@fragment
fn fs_main(@location(0) tex_coord: vec2<f32>) -> @location(0) vec4<f32> {
    let pixel = textureSample(t_source, s_source, tex_coord);
    var color = pixel.rgb * params.u_brightness;
    color = (color - HALF3) * params.u_contrast + HALF3;
    return vec4<f32>(color, pixel.a);
}
"#;

/// Scales brightness, then stretches contrast around mid-gray.
///
/// * `u_brightness`: 0.0 is black, 1.0 is unchanged
/// * `u_contrast`: 0.0 is flat gray, 1.0 is unchanged
pub fn brightness_contrast() -> EffectDescriptor {
    EffectDescriptor {
        name: Some("brightness-contrast".to_string()),
        vertex_source: ShaderSource::Wgsl(QUAD_VERTEX_SHADER.to_string()),
        fragment_source: ShaderSource::Wgsl(FRAGMENT_SHADER.to_string()),
        attributes: quad_attributes(),
        uniforms: vec![
            UniformSpec::float("u_brightness", vec![1.0]),
            UniformSpec::float("u_contrast", vec![1.0]),
        ],
    }
}
