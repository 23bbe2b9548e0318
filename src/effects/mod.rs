//! Bundled effects.
//!
//! All of them draw a full-screen quad and sample the previous pass through
//! `t_source` / `s_source`. Texture coordinates use a top-left origin: `v = 0`
//! is the first row of the uploaded frame.

mod brightness_contrast;
mod duotone;
mod hue_saturation;
mod transparent_video;

pub use brightness_contrast::brightness_contrast;
pub use duotone::duotone;
pub use hue_saturation::hue_saturation;
pub use transparent_video::transparent_video;

use crate::effect::{AttributeSpec, EffectDescriptor};
use crate::shader::ShaderSource;

/// Names accepted by [`by_name`].
pub const NAMES: &[&str] = &[
    "passthrough",
    "brightness-contrast",
    "hue-saturation",
    "duotone",
    "transparent-video",
];

/// Shared vertex stage: forwards the quad position and texture coordinate.
pub const QUAD_VERTEX_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) tex_coord: vec2<f32>,
}

@vertex
fn vs_main(@location(0) a_position: vec2<f32>, @location(1) a_texCoord: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(a_position, 0.0, 1.0);
    out.tex_coord = a_texCoord;
    return out;
}
"#;

const PASSTHROUGH_FRAGMENT_SHADER: &str = r#"
@group(0) @binding(0) var t_source: texture_2d<f32>;
@group(0) @binding(1) var s_source: sampler;

@fragment
fn fs_main(@location(0) tex_coord: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(t_source, s_source, tex_coord);
}
"#;

/// Quad corners in triangle-strip order.
pub const QUAD_POSITIONS: [f32; 8] = [-1.0, -1.0, -1.0, 1.0, 1.0, -1.0, 1.0, 1.0];

/// Texture coordinates matching [`QUAD_POSITIONS`].
pub const QUAD_TEX_COORDS: [f32; 8] = [0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0];

/// `a_position` + `a_texCoord` attributes for a full-screen strip.
pub fn quad_attributes() -> Vec<AttributeSpec> {
    vec![
        AttributeSpec::float("a_position", 2, QUAD_POSITIONS.to_vec()),
        AttributeSpec::float("a_texCoord", 2, QUAD_TEX_COORDS.to_vec()),
    ]
}

/// Copies the source unchanged.
pub fn passthrough() -> EffectDescriptor {
    EffectDescriptor {
        name: Some("passthrough".to_string()),
        vertex_source: ShaderSource::Wgsl(QUAD_VERTEX_SHADER.to_string()),
        fragment_source: ShaderSource::Wgsl(PASSTHROUGH_FRAGMENT_SHADER.to_string()),
        attributes: quad_attributes(),
        uniforms: Vec::new(),
    }
}

/// Builds a fresh descriptor (with its own uniform storage) for a bundled effect.
pub fn by_name(name: &str) -> Option<EffectDescriptor> {
    match name {
        "passthrough" => Some(passthrough()),
        "brightness-contrast" => Some(brightness_contrast()),
        "hue-saturation" => Some(hue_saturation()),
        "duotone" => Some(duotone()),
        "transparent-video" => Some(transparent_video()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{compile, link, ShaderStage};

    #[test]
    fn test_every_bundled_effect_compiles_and_links() {
        for name in NAMES {
            let effect = by_name(name).unwrap();
            effect.validate().unwrap();

            let vs = compile(ShaderStage::Vertex, &effect.vertex_source)
                .unwrap_or_else(|log| panic!("{} vertex: {}", name, log));
            let fs = compile(ShaderStage::Fragment, &effect.fragment_source)
                .unwrap_or_else(|log| panic!("{} fragment: {}", name, log));
            let layout = link(&vs, &fs).unwrap_or_else(|log| panic!("{} link: {}", name, log));

            for attr in &effect.attributes {
                assert!(layout.attribute(&attr.name).is_some(), "{} misses {}", name, attr.name);
            }
            for uniform in &effect.uniforms {
                assert!(layout.uniform(&uniform.name).is_some(), "{} misses {}", name, uniform.name);
            }
        }
    }

    #[test]
    fn test_by_name_returns_independent_uniforms() {
        let a = by_name("duotone").unwrap();
        let b = by_name("duotone").unwrap();
        assert!(!a.uniforms[0].data.shares_storage(&b.uniforms[0].data));
        assert!(by_name("sepia").is_none());
    }
}
