//! Headless backend that records every call against an object table.
//!
//! Shaders are still compiled and linked through naga, so a recording
//! context rejects exactly what the wgpu backend would reject. Used by the
//! `--check` command and throughout the tests.

use super::{
    AttributeLocation, BufferId, ContextAttributes, DrawMode, FramebufferId, ProgramId,
    RenderContext, ShaderId, SignalKind, Surface, TextureId, TextureOrigin, UniformLocation,
    VertexLayout,
};
use crate::effect::ComponentType;
use crate::frame::VideoFrame;
use crate::shader::{self, CompiledShader, ProgramLayout, ShaderSource, ShaderStage};
use std::cell::{Ref, RefCell};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::rc::Rc;
use tracing::warn;

/// One recorded context call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateShader(ShaderId),
    DeleteShader(ShaderId),
    CreateProgram(ProgramId),
    DeleteProgram(ProgramId),
    CreateBuffer(BufferId),
    DeleteBuffer(BufferId),
    CreateTexture { texture: TextureId, width: u32, height: u32 },
    ResizeTexture { texture: TextureId, width: u32, height: u32 },
    DeleteTexture(TextureId),
    CreateFramebuffer(FramebufferId),
    DeleteFramebuffer(FramebufferId),
    BindFramebuffer(Option<FramebufferId>),
    BindTexture(TextureId),
    UploadFrame { texture: TextureId, width: u32, height: u32, flip_y: bool },
    UseProgram(ProgramId),
    VertexAttribute { location: AttributeLocation, buffer: BufferId, layout: VertexLayout },
    Uniform { location: UniformLocation, values: Vec<f32> },
    DrawArrays { mode: DrawMode, first: u32, count: u32 },
    FinishFrame,
    Viewport { width: u32, height: u32 },
    SetBackingSize { width: u32, height: u32 },
}

#[derive(Debug)]
enum Object {
    Shader(CompiledShader),
    Program(ProgramLayout),
    Buffer,
    Texture { width: u32, height: u32 },
    Framebuffer(TextureId),
}

/// Device and surface state shared by a [`RecordingSurface`] and the
/// contexts it hands out.
#[derive(Debug)]
pub struct DeviceState {
    pub calls: Vec<Call>,
    /// Deletes of ids that were not live
    pub invalid_deletes: usize,
    pub contexts_created: usize,
    pub backing_size: (u32, u32),
    pub display_size: (u32, u32),
    /// Attributes of the most recent `get_context`
    pub last_attributes: Option<ContextAttributes>,
    context_available: bool,
    fail_link: Option<String>,
    objects: BTreeMap<u32, Object>,
    next_id: u32,
    lost: bool,
    loss_claimed: bool,
    restore_on_claim: bool,
    generation: u32,
    signals: VecDeque<SignalKind>,
    subscriptions: HashSet<SignalKind>,
}

impl DeviceState {
    fn new(display_size: (u32, u32)) -> Self {
        Self {
            calls: Vec::new(),
            invalid_deletes: 0,
            contexts_created: 0,
            // an unsized canvas
            backing_size: (300, 150),
            display_size,
            last_attributes: None,
            context_available: true,
            fail_link: None,
            objects: BTreeMap::new(),
            next_id: 1,
            lost: false,
            loss_claimed: false,
            restore_on_claim: false,
            generation: 0,
            signals: VecDeque::new(),
            subscriptions: HashSet::new(),
        }
    }

    fn allocate(&mut self, object: Object) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, object);
        id
    }

    fn release(&mut self, id: u32) {
        if self.objects.remove(&id).is_none() {
            warn!(id, "delete of an object that is not live");
            self.invalid_deletes += 1;
        }
    }

    fn emit(&mut self, kind: SignalKind) {
        if self.subscriptions.contains(&kind) {
            self.signals.push_back(kind);
        }
    }
}

/// In-memory surface with scriptable device loss.
#[derive(Debug, Clone)]
pub struct RecordingSurface {
    state: Rc<RefCell<DeviceState>>,
}

impl RecordingSurface {
    pub fn new(display_width: u32, display_height: u32) -> Self {
        Self {
            state: Rc::new(RefCell::new(DeviceState::new((display_width, display_height)))),
        }
    }

    pub fn state(&self) -> Ref<'_, DeviceState> {
        self.state.borrow()
    }

    /// Number of GPU objects currently alive.
    pub fn live_objects(&self) -> usize {
        self.state.borrow().objects.len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// Every uniform upload recorded so far, in order.
    pub fn uniform_uploads(&self) -> Vec<(UniformLocation, Vec<f32>)> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Uniform { location, values } => Some((*location, values.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        match self.state.borrow().objects.get(&texture.0) {
            Some(Object::Texture { width, height }) => Some((*width, *height)),
            _ => None,
        }
    }

    /// Texture a live framebuffer renders into.
    pub fn framebuffer_texture(&self, framebuffer: FramebufferId) -> Option<TextureId> {
        match self.state.borrow().objects.get(&framebuffer.0) {
            Some(Object::Framebuffer(texture)) => Some(*texture),
            _ => None,
        }
    }

    pub fn backing_size(&self) -> (u32, u32) {
        self.state.borrow().backing_size
    }

    pub fn set_display_size(&self, width: u32, height: u32) {
        self.state.borrow_mut().display_size = (width, height);
    }

    /// Makes `get_context` fail while `false`.
    pub fn set_context_available(&self, available: bool) {
        self.state.borrow_mut().context_available = available;
    }

    /// Makes every following link fail with `log`; `None` restores normal linking.
    pub fn set_link_failure(&self, log: Option<&str>) {
        self.state.borrow_mut().fail_link = log.map(str::to_string);
    }

    /// Restores the device from inside `prevent_default`, the way a window
    /// surface requests a replacement device as soon as the loss is claimed.
    pub fn set_restore_on_claim(&self, enabled: bool) {
        self.state.borrow_mut().restore_on_claim = enabled;
    }

    pub fn is_subscribed(&self, kind: SignalKind) -> bool {
        self.state.borrow().subscriptions.contains(&kind)
    }

    /// Simulates a device loss. All objects die with the device.
    pub fn lose_context(&self) {
        let mut state = self.state.borrow_mut();
        if state.lost {
            return;
        }
        state.lost = true;
        state.loss_claimed = false;
        state.generation += 1;
        state.objects.clear();
        state.emit(SignalKind::ContextLost);
    }

    /// Simulates the device coming back. Only a claimed loss is restored.
    pub fn restore_context(&self) {
        let mut state = self.state.borrow_mut();
        if !state.lost || !state.loss_claimed {
            return;
        }
        state.lost = false;
        state.loss_claimed = false;
        state.emit(SignalKind::ContextRestored);
    }
}

impl Surface for RecordingSurface {
    type Context = RecordingContext;

    fn get_context(&mut self, attributes: &ContextAttributes) -> Option<RecordingContext> {
        let mut state = self.state.borrow_mut();
        if !state.context_available || state.lost {
            return None;
        }
        state.contexts_created += 1;
        state.last_attributes = Some(*attributes);
        Some(RecordingContext {
            state: Rc::clone(&self.state),
            generation: state.generation,
        })
    }

    fn subscribe(&mut self, kind: SignalKind) {
        self.state.borrow_mut().subscriptions.insert(kind);
    }

    fn unsubscribe(&mut self, kind: SignalKind) {
        self.state.borrow_mut().subscriptions.remove(&kind);
    }

    fn next_signal(&mut self) -> Option<SignalKind> {
        let mut state = self.state.borrow_mut();
        while let Some(kind) = state.signals.pop_front() {
            if state.subscriptions.contains(&kind) {
                return Some(kind);
            }
        }
        None
    }

    fn prevent_default(&mut self, kind: SignalKind) {
        let mut state = self.state.borrow_mut();
        if kind != SignalKind::ContextLost || !state.lost {
            return;
        }
        if state.restore_on_claim {
            state.lost = false;
            state.loss_claimed = false;
            state.emit(SignalKind::ContextRestored);
        } else {
            state.loss_claimed = true;
        }
    }
}

/// Context handed out by [`RecordingSurface`].
#[derive(Debug)]
pub struct RecordingContext {
    state: Rc<RefCell<DeviceState>>,
    generation: u32,
}

impl RecordingContext {
    /// Runs `f` against the shared state unless this context is lost.
    fn live<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> Option<R> {
        let mut state = self.state.borrow_mut();
        if state.lost || state.generation != self.generation {
            return None;
        }
        Some(f(&mut state))
    }

    fn record(&self, call: Call) {
        self.live(|state| state.calls.push(call));
    }

    fn shader(&self, id: ShaderId) -> Option<CompiledShader> {
        match self.state.borrow().objects.get(&id.0) {
            Some(Object::Shader(compiled)) => Some(compiled.clone()),
            _ => None,
        }
    }

    fn program(&self, id: ProgramId) -> Option<ProgramLayout> {
        match self.state.borrow().objects.get(&id.0) {
            Some(Object::Program(layout)) => Some(layout.clone()),
            _ => None,
        }
    }
}

impl RenderContext for RecordingContext {
    fn texture_origin(&self) -> TextureOrigin {
        TextureOrigin::BottomLeft
    }

    fn is_lost(&self) -> bool {
        let state = self.state.borrow();
        state.lost || state.generation != self.generation
    }

    fn create_shader(&mut self, stage: ShaderStage, source: &ShaderSource) -> Result<ShaderId, String> {
        if self.is_lost() {
            return Err("context lost".to_string());
        }
        let compiled = shader::compile(stage, source)?;
        let id = self
            .live(|state| {
                let id = ShaderId(state.allocate(Object::Shader(compiled)));
                state.calls.push(Call::CreateShader(id));
                id
            })
            .ok_or_else(|| "context lost".to_string())?;
        Ok(id)
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.live(|state| {
            state.release(shader.0);
            state.calls.push(Call::DeleteShader(shader));
        });
    }

    fn create_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, String> {
        if self.is_lost() {
            return Err("context lost".to_string());
        }
        let vs = self.shader(vertex).ok_or("vertex shader is not live")?;
        let fs = self.shader(fragment).ok_or("fragment shader is not live")?;
        if let Some(log) = self.state.borrow().fail_link.clone() {
            return Err(log);
        }
        let layout = shader::link(&vs, &fs)?;
        self.live(|state| {
            let id = ProgramId(state.allocate(Object::Program(layout)));
            state.calls.push(Call::CreateProgram(id));
            id
        })
        .ok_or_else(|| "context lost".to_string())
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.live(|state| {
            state.release(program.0);
            state.calls.push(Call::DeleteProgram(program));
        });
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<AttributeLocation> {
        self.program(program)?.attribute(name).map(AttributeLocation)
    }

    fn attribute_type(&self, program: ProgramId, name: &str) -> Option<Option<ComponentType>> {
        self.program(program)?.attribute_type(name)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.program(program)?
            .uniform(name)
            .map(|index| UniformLocation(index as u32))
    }

    fn create_buffer(&mut self, _data: &[f32], _component_type: ComponentType) -> BufferId {
        self.live(|state| {
            let id = BufferId(state.allocate(Object::Buffer));
            state.calls.push(Call::CreateBuffer(id));
            id
        })
        .unwrap_or(BufferId(0))
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.live(|state| {
            state.release(buffer.0);
            state.calls.push(Call::DeleteBuffer(buffer));
        });
    }

    fn create_texture(&mut self, width: u32, height: u32) -> TextureId {
        self.live(|state| {
            let texture = TextureId(state.allocate(Object::Texture { width, height }));
            state.calls.push(Call::CreateTexture { texture, width, height });
            texture
        })
        .unwrap_or(TextureId(0))
    }

    fn resize_texture(&mut self, texture: TextureId, width: u32, height: u32) {
        self.live(|state| {
            if let Some(Object::Texture { width: w, height: h }) = state.objects.get_mut(&texture.0) {
                *w = width;
                *h = height;
            }
            state.calls.push(Call::ResizeTexture { texture, width, height });
        });
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.live(|state| {
            state.release(texture.0);
            state.calls.push(Call::DeleteTexture(texture));
        });
    }

    fn create_framebuffer(&mut self, texture: TextureId) -> FramebufferId {
        self.live(|state| {
            let framebuffer = FramebufferId(state.allocate(Object::Framebuffer(texture)));
            state.calls.push(Call::CreateFramebuffer(framebuffer));
            framebuffer
        })
        .unwrap_or(FramebufferId(0))
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.live(|state| {
            state.release(framebuffer.0);
            state.calls.push(Call::DeleteFramebuffer(framebuffer));
        });
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.record(Call::BindFramebuffer(framebuffer));
    }

    fn bind_texture(&mut self, texture: TextureId) {
        self.record(Call::BindTexture(texture));
    }

    fn upload_frame(&mut self, texture: TextureId, frame: &VideoFrame, flip_y: bool) {
        self.live(|state| {
            if let Some(Object::Texture { width, height }) = state.objects.get_mut(&texture.0) {
                *width = frame.width;
                *height = frame.height;
            }
            state.calls.push(Call::UploadFrame {
                texture,
                width: frame.width,
                height: frame.height,
                flip_y,
            });
        });
    }

    fn use_program(&mut self, program: ProgramId) {
        self.record(Call::UseProgram(program));
    }

    fn vertex_attribute(&mut self, location: AttributeLocation, buffer: BufferId, layout: VertexLayout) {
        self.record(Call::VertexAttribute { location, buffer, layout });
    }

    fn uniform(&mut self, location: UniformLocation, component_type: ComponentType, values: &[f32]) {
        let values = match component_type {
            ComponentType::Float => values.to_vec(),
            ComponentType::Int => values.iter().map(|v| v.trunc()).collect(),
        };
        self.record(Call::Uniform { location, values });
    }

    fn draw_arrays(&mut self, mode: DrawMode, first: u32, count: u32) {
        self.record(Call::DrawArrays { mode, first, count });
    }

    fn finish_frame(&mut self) {
        self.record(Call::FinishFrame);
    }

    fn viewport(&mut self, width: u32, height: u32) {
        self.record(Call::Viewport { width, height });
    }

    fn backing_size(&self) -> (u32, u32) {
        self.state.borrow().backing_size
    }

    fn set_backing_size(&mut self, width: u32, height: u32) {
        let mut state = self.state.borrow_mut();
        state.backing_size = (width, height);
        state.calls.push(Call::SetBackingSize { width, height });
    }

    fn display_size(&self) -> (u32, u32) {
        self.state.borrow().display_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_objects_are_tracked_until_deleted() {
        let mut surface = RecordingSurface::new(64, 64);
        let mut ctx = surface.get_context(&ContextAttributes::default()).unwrap();

        let texture = ctx.create_texture(1, 1);
        let framebuffer = ctx.create_framebuffer(texture);
        assert_eq!(surface.live_objects(), 2);

        ctx.delete_framebuffer(framebuffer);
        ctx.delete_texture(texture);
        ctx.delete_texture(texture);
        assert_eq!(surface.live_objects(), 0);
        assert_eq!(surface.state().invalid_deletes, 1);
    }

    #[test]
    fn test_restore_requires_claimed_loss() {
        let mut surface = RecordingSurface::new(64, 64);
        surface.subscribe(SignalKind::ContextLost);
        surface.subscribe(SignalKind::ContextRestored);
        let ctx = surface.get_context(&ContextAttributes::default()).unwrap();

        surface.lose_context();
        assert!(ctx.is_lost());
        assert_eq!(surface.next_signal(), Some(SignalKind::ContextLost));

        surface.restore_context();
        assert_eq!(surface.next_signal(), None);

        surface.prevent_default(SignalKind::ContextLost);
        surface.restore_context();
        assert_eq!(surface.next_signal(), Some(SignalKind::ContextRestored));

        // contexts from before the loss stay dead
        assert!(ctx.is_lost());
        let fresh = surface.get_context(&ContextAttributes::default()).unwrap();
        assert!(!fresh.is_lost());
    }

    #[test]
    fn test_restore_on_claim_emits_immediately() {
        let mut surface = RecordingSurface::new(64, 64);
        surface.set_restore_on_claim(true);
        surface.subscribe(SignalKind::ContextLost);
        surface.lose_context();
        assert_eq!(surface.next_signal(), Some(SignalKind::ContextLost));

        surface.subscribe(SignalKind::ContextRestored);
        surface.prevent_default(SignalKind::ContextLost);
        assert_eq!(surface.next_signal(), Some(SignalKind::ContextRestored));
        assert!(surface.get_context(&ContextAttributes::default()).is_some());
    }

    #[test]
    fn test_unsubscribed_signals_are_dropped() {
        let mut surface = RecordingSurface::new(64, 64);
        surface.lose_context();
        assert_eq!(surface.next_signal(), None);
        assert!(surface.get_context(&ContextAttributes::default()).is_none());
    }

    #[test]
    fn test_lost_context_records_nothing() {
        let mut surface = RecordingSurface::new(64, 64);
        let mut ctx = surface.get_context(&ContextAttributes::default()).unwrap();
        surface.lose_context();
        surface.clear_calls();

        ctx.bind_framebuffer(None);
        ctx.draw_arrays(DrawMode::TriangleStrip, 0, 4);
        assert!(surface.calls().is_empty());
    }
}
