//! GPU resource layer.
//!
//! [`RenderContext`] is a small immediate-mode surface over opaque object ids,
//! shaped after what a multi-pass effect chain needs: shaders, programs,
//! static vertex buffers, textures and framebuffers, plus the draw state to
//! run one pass. [`Surface`] hands out contexts and delivers device signals.
//!
//! Two backends live here: [`WgpuContext`] renders to a window, and
//! [`RecordingContext`] keeps an object table and call log without a GPU.

mod device;
mod recording;
mod wgpu_context;

pub use device::GpuDevice;
pub use recording::{Call, DeviceState, RecordingContext, RecordingSurface};
pub use wgpu_context::{WgpuContext, WindowSurface};

use crate::effect::ComponentType;
use crate::frame::VideoFrame;
use crate::shader::{ShaderSource, ShaderStage};

macro_rules! object_id {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);
        )*
    };
}

object_id!(
    /// Compiled shader stage.
    ShaderId,
    /// Linked vertex + fragment pair.
    ProgramId,
    /// Static vertex buffer.
    BufferId,
    /// 2D RGBA texture.
    TextureId,
    /// Render target wrapping one texture.
    FramebufferId,
);

/// Shader input slot of a vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeLocation(pub u32);

/// Handle of one uniform inside a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

/// Primitive assembly for a draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawMode {
    TriangleStrip,
    Triangles,
}

/// Where texture row zero ends up when sampled at `v = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureOrigin {
    TopLeft,
    BottomLeft,
}

/// How a vertex buffer feeds one attribute: tightly packed, not normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub component_count: u8,
    pub component_type: ComponentType,
}

/// Options requested when acquiring a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextAttributes {
    pub antialias: bool,
    pub depth: bool,
    pub stencil: bool,
    pub preserve_drawing_buffer: bool,
    pub premultiplied_alpha: bool,
}

impl Default for ContextAttributes {
    fn default() -> Self {
        Self {
            antialias: false,
            depth: false,
            stencil: false,
            preserve_drawing_buffer: false,
            premultiplied_alpha: false,
        }
    }
}

/// Device lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    ContextLost,
    ContextRestored,
}

/// A drawable surface (window, canvas, offscreen target).
pub trait Surface {
    type Context: RenderContext;

    /// Acquires a fresh context, or `None` when no device is available.
    fn get_context(&mut self, attributes: &ContextAttributes) -> Option<Self::Context>;

    fn subscribe(&mut self, kind: SignalKind);

    fn unsubscribe(&mut self, kind: SignalKind);

    /// Pops the next pending signal of a subscribed kind.
    fn next_signal(&mut self) -> Option<SignalKind>;

    /// Claims a signal. A claimed loss makes the surface deliver a restore
    /// once a device is available again.
    fn prevent_default(&mut self, kind: SignalKind);
}

/// Immediate-mode rendering context bound to one surface.
///
/// Deleting an id twice or using a deleted id is a caller bug; backends
/// log it and otherwise ignore the call. While the device is lost every
/// call is a no-op.
pub trait RenderContext {
    fn texture_origin(&self) -> TextureOrigin;

    fn is_lost(&self) -> bool;

    fn create_shader(&mut self, stage: ShaderStage, source: &ShaderSource) -> Result<ShaderId, String>;

    fn delete_shader(&mut self, shader: ShaderId);

    fn create_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, String>;

    fn delete_program(&mut self, program: ProgramId);

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<AttributeLocation>;

    /// Component type the program reads an attribute as. `Some(None)` marks
    /// an input no `ComponentType` can feed.
    fn attribute_type(&self, program: ProgramId, name: &str) -> Option<Option<ComponentType>>;

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    /// Creates a static vertex buffer. Int data is truncated on upload.
    fn create_buffer(&mut self, data: &[f32], component_type: ComponentType) -> BufferId;

    fn delete_buffer(&mut self, buffer: BufferId);

    /// Creates an RGBA texture with nearest filtering and clamp-to-edge wrapping.
    fn create_texture(&mut self, width: u32, height: u32) -> TextureId;

    /// Reallocates texture storage, keeping the id.
    fn resize_texture(&mut self, texture: TextureId, width: u32, height: u32);

    fn delete_texture(&mut self, texture: TextureId);

    fn create_framebuffer(&mut self, texture: TextureId) -> FramebufferId;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    /// Selects the render target; `None` is the surface itself.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);

    fn bind_texture(&mut self, texture: TextureId);

    /// Uploads a frame into the texture, converting to RGBA as needed.
    fn upload_frame(&mut self, texture: TextureId, frame: &VideoFrame, flip_y: bool);

    fn use_program(&mut self, program: ProgramId);

    fn vertex_attribute(&mut self, location: AttributeLocation, buffer: BufferId, layout: VertexLayout);

    /// Sets a uniform of the current program. Int values are truncated.
    fn uniform(&mut self, location: UniformLocation, component_type: ComponentType, values: &[f32]);

    fn draw_arrays(&mut self, mode: DrawMode, first: u32, count: u32);

    /// Ends the frame: submits recorded work and presents the surface.
    fn finish_frame(&mut self);

    fn viewport(&mut self, width: u32, height: u32);

    /// Size of the drawing buffer.
    fn backing_size(&self) -> (u32, u32);

    fn set_backing_size(&mut self, width: u32, height: u32);

    /// Size the surface is displayed at.
    fn display_size(&self) -> (u32, u32);
}
