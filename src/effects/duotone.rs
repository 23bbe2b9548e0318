use super::{quad_attributes, QUAD_VERTEX_SHADER};
use crate::effect::{EffectDescriptor, UniformSpec};
use crate::shader::ShaderSource;

const FRAGMENT_SHADER: &str = r#"
struct Params {
    u_light: vec4<f32>,
    u_dark: vec4<f32>,
}

@group(0) @binding(0) var t_source: texture_2d<f32>;
@group(0) @binding(1) var s_source: sampler;
@group(0) @binding(2) var<uniform> params: Params;

const LUMCOEFF: vec3<f32> = vec3<f32>(0.2125, 0.7154, 0.0721);

@fragment
fn fs_main(@location(0) tex_coord: vec2<f32>) -> @location(0) vec4<f32> {
    let pixel = textureSample(t_source, s_source, tex_coord);
    let gray = vec3<f32>(dot(LUMCOEFF, pixel.rgb / pixel.a));
    let toned = mix(params.u_dark.rgb, params.u_light.rgb, gray);
    return vec4<f32>(toned, 1.0) * pixel.a;
}
"#;

/// Maps luminance onto a gradient between a dark and a light tone.
pub fn duotone() -> EffectDescriptor {
    EffectDescriptor {
        name: Some("duotone".to_string()),
        vertex_source: ShaderSource::Wgsl(QUAD_VERTEX_SHADER.to_string()),
        fragment_source: ShaderSource::Wgsl(FRAGMENT_SHADER.to_string()),
        attributes: quad_attributes(),
        uniforms: vec![
            UniformSpec::float("u_light", vec![0.9882352941, 0.7333333333, 0.05098039216, 1.0]),
            UniformSpec::float("u_dark", vec![0.7411764706, 0.0431372549, 0.568627451, 1.0]),
        ],
    }
}
