//! naga-based compilation and interface reflection.

use super::{ShaderSource, ShaderStage, UNIFORM_BLOCK_BINDING};
use crate::effect::ComponentType;
use naga::front::glsl::{Frontend, Options};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{AddressSpace, Binding, Handle, Module, ResourceBinding, ScalarKind, Type, TypeInner};

/// One named member of the uniform block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformMember {
    pub name: String,
    /// Byte offset inside the block
    pub offset: u32,
}

/// Layout of the group 0 / binding 2 uniform block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniformBlock {
    /// Total block size in bytes
    pub size: u32,
    pub members: Vec<UniformMember>,
}

/// A validated shader stage plus what reflection learned about it.
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub stage: ShaderStage,
    pub entry_point: String,
    /// Normalized WGSL handed to the GPU backend
    pub wgsl: String,
    /// User-defined inputs of the entry point as `(name, location)`
    pub inputs: Vec<(String, u32)>,
    /// Component type per input location; `None` when no attribute type fits
    pub input_types: Vec<(u32, Option<ComponentType>)>,
    /// User-defined output locations of the entry point
    pub outputs: Vec<u32>,
    pub uniforms: Option<UniformBlock>,
}

/// Interface of a linked vertex + fragment pair.
#[derive(Debug, Clone, Default)]
pub struct ProgramLayout {
    pub attributes: Vec<(String, u32)>,
    pub attribute_types: Vec<(u32, Option<ComponentType>)>,
    pub uniforms: UniformBlock,
}

impl ProgramLayout {
    /// Shader location of a vertex attribute.
    pub fn attribute(&self, name: &str) -> Option<u32> {
        self.attributes
            .iter()
            .find(|(attr, _)| attr == name)
            .map(|(_, location)| *location)
    }

    /// Component type a vertex attribute is read as. The outer `None` means
    /// the program has no such attribute; the inner one an unsupported type
    /// such as `u32` or `bool`.
    pub fn attribute_type(&self, name: &str) -> Option<Option<ComponentType>> {
        let location = self.attribute(name)?;
        self.attribute_types
            .iter()
            .find(|(at, _)| *at == location)
            .map(|(_, ty)| *ty)
    }

    /// Index of a uniform block member.
    pub fn uniform(&self, name: &str) -> Option<usize> {
        self.uniforms.members.iter().position(|m| m.name == name)
    }
}

/// Parses, validates and reflects a single shader stage.
///
/// The error string is the compiler log, suitable for surfacing to users.
pub fn compile(stage: ShaderStage, source: &ShaderSource) -> Result<CompiledShader, String> {
    let module = parse(stage, source)?;

    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    let info = validator
        .validate(&module)
        .map_err(|e| format!("validation error: {:?}", e))?;

    let entry = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == stage.naga())
        .ok_or_else(|| format!("no {} entry point found", stage))?;

    let mut inputs = Vec::new();
    let mut input_types = Vec::new();
    for arg in &entry.function.arguments {
        for (name, location, ty) in located(&module, arg.name.as_deref(), arg.ty, arg.binding.as_ref()) {
            input_types.push((location, component_type(&module.types[ty].inner)));
            inputs.push((name, location));
        }
    }

    let outputs = entry
        .function
        .result
        .as_ref()
        .map(|result| {
            located(&module, None, result.ty, result.binding.as_ref())
                .into_iter()
                .map(|(_, location, _)| location)
                .collect()
        })
        .unwrap_or_default();

    let wgsl = naga::back::wgsl::write_string(&module, &info, naga::back::wgsl::WriterFlags::empty())
        .map_err(|e| format!("WGSL generation error: {:?}", e))?;

    Ok(CompiledShader {
        stage,
        entry_point: entry.name.clone(),
        wgsl,
        inputs,
        input_types,
        outputs,
        uniforms: uniform_block(&module),
    })
}

/// Checks that a vertex and fragment stage fit together and merges their
/// uniform blocks.
pub fn link(vertex: &CompiledShader, fragment: &CompiledShader) -> Result<ProgramLayout, String> {
    if vertex.stage != ShaderStage::Vertex || fragment.stage != ShaderStage::Fragment {
        return Err("a program needs one vertex and one fragment shader".to_string());
    }

    for (name, location) in &fragment.inputs {
        if !vertex.outputs.contains(location) {
            return Err(format!(
                "fragment input `{}` at location {} is not written by the vertex stage",
                name, location
            ));
        }
    }

    let mut uniforms = vertex.uniforms.clone().unwrap_or_default();
    if let Some(block) = &fragment.uniforms {
        for member in &block.members {
            match uniforms.members.iter().find(|m| m.name == member.name) {
                Some(existing) if existing.offset != member.offset => {
                    return Err(format!(
                        "uniform `{}` sits at offset {} in the vertex stage but {} in the fragment stage",
                        member.name, existing.offset, member.offset
                    ));
                }
                Some(_) => {}
                None => uniforms.members.push(member.clone()),
            }
        }
        uniforms.size = uniforms.size.max(block.size);
    }

    Ok(ProgramLayout {
        attributes: vertex.inputs.clone(),
        attribute_types: vertex.input_types.clone(),
        uniforms,
    })
}

fn parse(stage: ShaderStage, source: &ShaderSource) -> Result<Module, String> {
    match source {
        ShaderSource::Wgsl(wgsl) => {
            naga::front::wgsl::parse_str(wgsl).map_err(|e| e.emit_to_string(wgsl))
        }
        ShaderSource::Glsl(glsl) => {
            let mut frontend = Frontend::default();
            let options = Options::from(stage.naga());
            frontend
                .parse(&options, glsl)
                .map_err(|e| format!("GLSL parse error: {:?}", e))
        }
    }
}

/// Flattens an entry point argument or result into `(name, location)` pairs.
fn located(
    module: &Module,
    name: Option<&str>,
    ty: Handle<Type>,
    binding: Option<&Binding>,
) -> Vec<(String, u32, Handle<Type>)> {
    match binding {
        Some(Binding::Location { location, .. }) => {
            vec![(name.unwrap_or_default().to_string(), *location, ty)]
        }
        Some(_) => Vec::new(),
        None => match &module.types[ty].inner {
            TypeInner::Struct { members, .. } => members
                .iter()
                .filter_map(|member| match &member.binding {
                    Some(Binding::Location { location, .. }) => {
                        Some((member.name.clone().unwrap_or_default(), *location, member.ty))
                    }
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        },
    }
}

/// Vertex data is uploaded as f32 or i32, so only those scalar kinds map.
fn component_type(inner: &TypeInner) -> Option<ComponentType> {
    let scalar = match inner {
        TypeInner::Scalar(scalar) | TypeInner::Vector { scalar, .. } => scalar,
        _ => return None,
    };
    match scalar.kind {
        ScalarKind::Float => Some(ComponentType::Float),
        ScalarKind::Sint => Some(ComponentType::Int),
        _ => None,
    }
}

fn uniform_block(module: &Module) -> Option<UniformBlock> {
    let (_, var) = module.global_variables.iter().find(|(_, var)| {
        var.space == AddressSpace::Uniform
            && matches!(var.binding, Some(ResourceBinding { group: 0, binding }) if binding == UNIFORM_BLOCK_BINDING)
    })?;

    match &module.types[var.ty].inner {
        TypeInner::Struct { members, span } => Some(UniformBlock {
            size: *span,
            members: members
                .iter()
                .map(|m| UniformMember {
                    name: m.name.clone().unwrap_or_default(),
                    offset: m.offset,
                })
                .collect(),
        }),
        inner => Some(UniformBlock {
            size: inner.size(module.to_ctx()),
            members: vec![UniformMember {
                name: var.name.clone().unwrap_or_default(),
                offset: 0,
            }],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = r#"
struct Params {
    u_amount: f32,
    u_tint: vec4<f32>,
}

@group(0) @binding(2) var<uniform> params: Params;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) a_position: vec2<f32>, @location(1) a_texCoord: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(a_position * params.u_amount, 0.0, 1.0);
    out.uv = a_texCoord;
    return out;
}
"#;

    const FRAGMENT: &str = r#"
@group(0) @binding(0) var t_source: texture_2d<f32>;
@group(0) @binding(1) var s_source: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(t_source, s_source, uv);
}
"#;

    #[test]
    fn test_reflects_attributes_and_uniform_offsets() {
        let vs = compile(ShaderStage::Vertex, &ShaderSource::Wgsl(VERTEX.to_string())).unwrap();
        assert_eq!(vs.entry_point, "vs_main");
        assert_eq!(
            vs.inputs,
            vec![("a_position".to_string(), 0), ("a_texCoord".to_string(), 1)]
        );
        assert_eq!(vs.outputs, vec![0]);

        let block = vs.uniforms.unwrap();
        assert_eq!(block.size, 32);
        assert_eq!(block.members[0], UniformMember { name: "u_amount".into(), offset: 0 });
        assert_eq!(block.members[1], UniformMember { name: "u_tint".into(), offset: 16 });
    }

    #[test]
    fn test_link_merges_interface() {
        let vs = compile(ShaderStage::Vertex, &ShaderSource::Wgsl(VERTEX.to_string())).unwrap();
        let fs = compile(ShaderStage::Fragment, &ShaderSource::Wgsl(FRAGMENT.to_string())).unwrap();
        let layout = link(&vs, &fs).unwrap();

        assert_eq!(layout.attribute("a_texCoord"), Some(1));
        assert_eq!(layout.attribute("a_missing"), None);
        assert_eq!(layout.attribute_type("a_texCoord"), Some(Some(ComponentType::Float)));
        assert_eq!(layout.attribute_type("a_missing"), None);
        assert_eq!(layout.uniform("u_tint"), Some(1));
    }

    #[test]
    fn test_reflects_integer_input_types() {
        let src = VERTEX
            .replace("@location(1) a_texCoord: vec2<f32>", "@location(1) a_texCoord: vec2<i32>, @location(2) a_id: u32")
            .replace("out.uv = a_texCoord;", "out.uv = vec2<f32>(a_texCoord) + f32(a_id);");
        let vs = compile(ShaderStage::Vertex, &ShaderSource::Wgsl(src)).unwrap();

        assert_eq!(
            vs.input_types,
            vec![(0, Some(ComponentType::Float)), (1, Some(ComponentType::Int)), (2, None)]
        );
    }

    #[test]
    fn test_link_rejects_unwritten_varying() {
        let vs = compile(ShaderStage::Vertex, &ShaderSource::Wgsl(VERTEX.to_string())).unwrap();
        let fs_src = FRAGMENT.replace("@location(0) uv", "@location(3) uv");
        let fs = compile(ShaderStage::Fragment, &ShaderSource::Wgsl(fs_src)).unwrap();

        let err = link(&vs, &fs).unwrap_err();
        assert!(err.contains("location 3"));
    }

    #[test]
    fn test_compile_error_returns_log() {
        let err = compile(
            ShaderStage::Fragment,
            &ShaderSource::Wgsl("@fragment fn fs_main() -> @location(0) vec4<f32> { return nope; }".into()),
        )
        .unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn test_missing_entry_point() {
        let err = compile(ShaderStage::Vertex, &ShaderSource::Wgsl(FRAGMENT.to_string())).unwrap_err();
        assert!(err.contains("vertex"));
    }
}
