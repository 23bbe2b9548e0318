//! Shader front-end: naga parsing, validation, reflection and WGSL emission.
//!
//! Every effect pass is expected to follow one binding convention on group 0:
//! binding 0 is the source texture, binding 1 its sampler and binding 2 an
//! optional uniform block shared by the vertex and fragment stages.

mod reflect;

pub use reflect::{compile, link, CompiledShader, ProgramLayout, UniformBlock, UniformMember};

use std::fmt;

/// Bind group slot of the source texture.
pub const SOURCE_TEXTURE_BINDING: u32 = 0;
/// Bind group slot of the source sampler.
pub const SOURCE_SAMPLER_BINDING: u32 = 1;
/// Bind group slot of the uniform block.
pub const UNIFORM_BLOCK_BINDING: u32 = 2;

/// Shader source tagged with its language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderSource {
    /// GLSL 450 source code (entry point `main`)
    Glsl(String),
    /// WGSL source code
    Wgsl(String),
}

impl ShaderSource {
    pub fn as_str(&self) -> &str {
        match self {
            ShaderSource::Glsl(s) | ShaderSource::Wgsl(s) => s,
        }
    }

    /// Picks the language from a file extension, defaulting to WGSL.
    pub fn from_path_and_code(path: &std::path::Path, code: String) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("glsl" | "vert" | "frag") => ShaderSource::Glsl(code),
            _ => ShaderSource::Wgsl(code),
        }
    }
}

/// Programmable pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub(crate) fn naga(self) -> naga::ShaderStage {
        match self {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}
