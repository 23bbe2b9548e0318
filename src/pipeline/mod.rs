//! The compiled render graph of one pipeline instance.
//!
//! A [`Scene`] is a linear chain of [`Layer`]s. Texture bindings live in an
//! arena owned by the scene; layers refer to them by [`BindingId`], so the
//! target of pass `i` and the source of pass `i + 1` are the same entry and
//! every GPU object has exactly one owner.

mod builder;
mod executor;

pub use builder::{build, build_scene, Compiled};
pub use executor::{draw, resize, DrawOutcome};

use crate::effect::{ComponentType, UniformData};
use crate::gpu::{
    AttributeLocation, BufferId, DrawMode, FramebufferId, ProgramId, RenderContext, ShaderId,
    TextureId, UniformLocation, VertexLayout,
};
use tracing::debug;

/// Explicit output size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    /// `None` when either side is zero; such a size counts as unset.
    pub fn non_zero(self) -> Option<Self> {
        (self.width > 0 && self.height > 0).then_some(self)
    }
}

/// Index of a texture binding inside its scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId(usize);

/// A texture, optionally wrapped in a framebuffer.
///
/// A binding without framebuffer is the media texture, filled by uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureBinding {
    pub texture: TextureId,
    pub framebuffer: Option<FramebufferId>,
    pub width: u32,
    pub height: u32,
    /// Reverse rows on upload
    pub flip_y: bool,
}

/// Where a pass writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Binding(BindingId),
    Screen,
}

/// A linked program and the two stages it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledProgram {
    pub program: ProgramId,
    pub vertex: ShaderId,
    pub fragment: ShaderId,
}

#[derive(Debug, Clone)]
pub struct AttributeBinding {
    pub name: String,
    pub location: AttributeLocation,
    pub buffer: BufferId,
    pub layout: VertexLayout,
}

#[derive(Debug, Clone)]
pub struct UniformBinding {
    pub name: String,
    pub location: UniformLocation,
    pub component_count: u8,
    pub component_type: ComponentType,
    /// Live values, read on every draw
    pub data: UniformData,
}

/// One compiled pass.
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub program: CompiledProgram,
    pub source: BindingId,
    pub target: Target,
    pub attributes: Vec<AttributeBinding>,
    pub uniforms: Vec<UniformBinding>,
    pub mode: DrawMode,
    pub vertex_count: u32,
}

/// Ordered passes plus the texture bindings they share.
#[derive(Debug, Default)]
pub struct Scene {
    bindings: Vec<TextureBinding>,
    layers: Vec<Layer>,
}

impl Scene {
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn binding(&self, id: BindingId) -> &TextureBinding {
        &self.bindings[id.0]
    }

    pub fn bindings(&self) -> &[TextureBinding] {
        &self.bindings
    }

    /// Looks up a live uniform of the pass at `layer`.
    pub fn uniform(&self, layer: usize, name: &str) -> Option<&UniformData> {
        self.layers
            .get(layer)?
            .uniforms
            .iter()
            .find(|u| u.name == name)
            .map(|u| &u.data)
    }

    fn add_binding(&mut self, binding: TextureBinding) -> BindingId {
        self.bindings.push(binding);
        BindingId(self.bindings.len() - 1)
    }

    /// Frees every GPU object the scene owns, each exactly once.
    pub fn release<C: RenderContext + ?Sized>(self, ctx: &mut C) {
        debug!(layers = self.layers.len(), bindings = self.bindings.len(), "Releasing scene");
        for layer in &self.layers {
            for attr in &layer.attributes {
                ctx.delete_buffer(attr.buffer);
            }
            ctx.delete_program(layer.program.program);
            ctx.delete_shader(layer.program.vertex);
            ctx.delete_shader(layer.program.fragment);
        }
        for binding in &self.bindings {
            if let Some(framebuffer) = binding.framebuffer {
                ctx.delete_framebuffer(framebuffer);
            }
            ctx.delete_texture(binding.texture);
        }
    }
}
