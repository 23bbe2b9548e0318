//! Effect list to scene compilation.

use super::{
    AttributeBinding, BindingId, CompiledProgram, Dimensions, Layer, Scene, Target, TextureBinding,
    UniformBinding,
};
use crate::effect::EffectDescriptor;
use crate::error::{Result, VglError};
use crate::gpu::{
    ContextAttributes, DrawMode, ProgramId, RenderContext, Surface, TextureOrigin, VertexLayout,
};
use crate::shader::ShaderStage;
use std::time::Instant;
use tracing::{debug, error, info};

/// A fresh context together with the scene compiled on it.
pub struct Compiled<C> {
    pub context: C,
    pub scene: Scene,
}

/// Acquires a context from `surface` and compiles `effects` into a scene.
///
/// Nothing leaks on failure: objects created before the error are freed.
pub fn build<S: Surface>(
    surface: &mut S,
    effects: &[EffectDescriptor],
    dimensions: Option<Dimensions>,
) -> Result<Compiled<S::Context>> {
    if effects.is_empty() {
        return Err(VglError::EmptyEffectList);
    }
    let mut context = surface
        .get_context(&ContextAttributes::default())
        .ok_or(VglError::ContextUnavailable)?;
    let scene = build_scene(&mut context, effects, dimensions)?;
    Ok(Compiled { context, scene })
}

/// Compiles `effects` on an existing context.
pub fn build_scene<C: RenderContext + ?Sized>(
    ctx: &mut C,
    effects: &[EffectDescriptor],
    dimensions: Option<Dimensions>,
) -> Result<Scene> {
    if effects.is_empty() {
        return Err(VglError::EmptyEffectList);
    }
    for effect in effects {
        effect.validate()?;
    }

    let start = Instant::now();
    let mut scene = Scene::default();
    match populate(ctx, &mut scene, effects, dimensions) {
        Ok(()) => {
            info!(
                passes = scene.layers.len(),
                elapsed = ?start.elapsed(),
                "Effect pipeline built"
            );
            Ok(scene)
        }
        Err(e) => {
            scene.release(ctx);
            Err(e)
        }
    }
}

fn populate<C: RenderContext + ?Sized>(
    ctx: &mut C,
    scene: &mut Scene,
    effects: &[EffectDescriptor],
    dimensions: Option<Dimensions>,
) -> Result<()> {
    let (width, height) = dimensions
        .and_then(Dimensions::non_zero)
        .map(|d| (d.width, d.height))
        .unwrap_or((1, 1));
    let last = effects.len() - 1;
    let mut previous: Option<BindingId> = None;

    for (i, effect) in effects.iter().enumerate() {
        let source = match previous {
            Some(id) => id,
            None => {
                let texture = ctx.create_texture(1, 1);
                scene.add_binding(TextureBinding {
                    texture,
                    framebuffer: None,
                    width: 1,
                    height: 1,
                    flip_y: ctx.texture_origin() == TextureOrigin::BottomLeft,
                })
            }
        };

        let target = if i == last {
            Target::Screen
        } else {
            let texture = ctx.create_texture(width, height);
            let framebuffer = ctx.create_framebuffer(texture);
            Target::Binding(scene.add_binding(TextureBinding {
                texture,
                framebuffer: Some(framebuffer),
                width,
                height,
                flip_y: false,
            }))
        };

        let program = compile_program(ctx, effect)?;
        let layer = bind_inputs(ctx, effect, i, program, source, target);
        debug!(
            pass = i,
            effect = %layer.name,
            attributes = layer.attributes.len(),
            uniforms = layer.uniforms.len(),
            ?target,
            "Pass compiled"
        );
        scene.layers.push(layer);

        if let Target::Binding(id) = target {
            previous = Some(id);
        }
    }
    Ok(())
}

fn compile_program<C: RenderContext + ?Sized>(
    ctx: &mut C,
    effect: &EffectDescriptor,
) -> Result<CompiledProgram> {
    let vertex = ctx
        .create_shader(ShaderStage::Vertex, &effect.vertex_source)
        .map_err(|log| {
            error!(effect = effect.label(), "Vertex shader failed to compile:\n{}", log);
            VglError::ShaderCompile { stage: ShaderStage::Vertex, log }
        })?;

    let fragment = match ctx.create_shader(ShaderStage::Fragment, &effect.fragment_source) {
        Ok(id) => id,
        Err(log) => {
            error!(effect = effect.label(), "Fragment shader failed to compile:\n{}", log);
            ctx.delete_shader(vertex);
            return Err(VglError::ShaderCompile { stage: ShaderStage::Fragment, log });
        }
    };

    let linked = ctx.create_program(vertex, fragment).and_then(|program| {
        match attribute_mismatch(&*ctx, effect, program) {
            Some(log) => {
                ctx.delete_program(program);
                Err(log)
            }
            None => Ok(program),
        }
    });
    match linked {
        Ok(program) => Ok(CompiledProgram { program, vertex, fragment }),
        Err(log) => {
            error!(effect = effect.label(), "Program failed to link:\n{}", log);
            ctx.delete_shader(vertex);
            ctx.delete_shader(fragment);
            Err(VglError::ProgramLink { log })
        }
    }
}

/// First attribute whose data type the vertex input cannot read.
fn attribute_mismatch<C: RenderContext + ?Sized>(
    ctx: &C,
    effect: &EffectDescriptor,
    program: ProgramId,
) -> Option<String> {
    effect.attributes.iter().find_map(|attr| match ctx.attribute_type(program, &attr.name)? {
        Some(expected) if expected == attr.component_type => None,
        Some(expected) => Some(format!(
            "attribute `{}` supplies {:?} data but the vertex input is {:?}",
            attr.name, attr.component_type, expected
        )),
        None => Some(format!(
            "attribute `{}` feeds a vertex input of unsupported type",
            attr.name
        )),
    })
}

/// Resolves attribute buffers and uniform locations for a linked program.
fn bind_inputs<C: RenderContext + ?Sized>(
    ctx: &mut C,
    effect: &EffectDescriptor,
    index: usize,
    program: CompiledProgram,
    source: BindingId,
    target: Target,
) -> Layer {
    let mut attributes = Vec::with_capacity(effect.attributes.len());
    for attr in &effect.attributes {
        let Some(location) = ctx.attribute_location(program.program, &attr.name) else {
            debug!(effect = effect.label(), attribute = %attr.name, "Attribute not used by program");
            continue;
        };
        let buffer = ctx.create_buffer(&attr.data, attr.component_type);
        attributes.push(AttributeBinding {
            name: attr.name.clone(),
            location,
            buffer,
            layout: VertexLayout {
                component_count: attr.component_count,
                component_type: attr.component_type,
            },
        });
    }

    let mut uniforms = Vec::with_capacity(effect.uniforms.len());
    for uniform in &effect.uniforms {
        let Some(location) = ctx.uniform_location(program.program, &uniform.name) else {
            debug!(effect = effect.label(), uniform = %uniform.name, "Uniform not used by program");
            continue;
        };
        uniforms.push(UniformBinding {
            name: uniform.name.clone(),
            location,
            component_count: uniform.component_count,
            component_type: uniform.component_type,
            data: uniform.data.clone(),
        });
    }

    let vertex_count = effect
        .attributes
        .iter()
        .map(|attr| attr.vertex_count())
        .min()
        .unwrap_or(4);
    let mode = if vertex_count == 4 {
        DrawMode::TriangleStrip
    } else {
        DrawMode::Triangles
    };

    Layer {
        name: format!("{}#{}", effect.label(), index),
        program,
        source,
        target,
        attributes,
        uniforms,
        mode,
        vertex_count,
    }
}
