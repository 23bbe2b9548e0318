//! wgpu backend rendering into a winit window.

use super::{
    AttributeLocation, BufferId, ContextAttributes, DrawMode, FramebufferId, GpuDevice, ProgramId,
    RenderContext, ShaderId, SignalKind, Surface, TextureId, TextureOrigin, UniformLocation,
    VertexLayout,
};
use crate::effect::ComponentType;
use crate::frame::VideoFrame;
use crate::shader::{
    self, CompiledShader, ProgramLayout, ShaderSource, ShaderStage, SOURCE_SAMPLER_BINDING,
    SOURCE_TEXTURE_BINDING, UNIFORM_BLOCK_BINDING,
};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use wgpu::util::DeviceExt;
use winit::window::Window;

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Signal bookkeeping shared with the device-lost callback.
#[derive(Debug, Default)]
struct SignalState {
    pending: VecDeque<SignalKind>,
    subscriptions: HashSet<SignalKind>,
    lost: bool,
    generation: u64,
}

impl SignalState {
    fn emit(&mut self, kind: SignalKind) {
        if self.subscriptions.contains(&kind) {
            self.pending.push_back(kind);
        }
    }
}

fn mark_lost(signals: &Mutex<SignalState>) {
    if let Ok(mut state) = signals.lock() {
        if state.lost {
            return;
        }
        state.lost = true;
        state.generation += 1;
        state.emit(SignalKind::ContextLost);
    }
}

/// A window used as a drawing surface.
///
/// Each [`Surface::get_context`] call requests a new adapter and device, so
/// recovering from device loss is a matter of asking again.
pub struct WindowSurface {
    window: Arc<Window>,
    instance: wgpu::Instance,
    signals: Arc<Mutex<SignalState>>,
}

impl WindowSurface {
    pub fn new(window: Arc<Window>) -> Self {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        Self {
            window,
            instance,
            signals: Arc::new(Mutex::new(SignalState::default())),
        }
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    fn create_context(&self, attributes: &ContextAttributes) -> anyhow::Result<WgpuContext> {
        let surface = self.instance.create_surface(self.window.clone())?;
        let gpu = GpuDevice::new(&self.instance, &surface)?;

        let generation = self
            .signals
            .lock()
            .map(|state| state.generation)
            .map_err(|_| anyhow::anyhow!("signal state poisoned"))?;

        let lost_signals = Arc::clone(&self.signals);
        gpu.device.set_device_lost_callback(move |reason, message| {
            if matches!(reason, wgpu::DeviceLostReason::Destroyed) {
                debug!("GPU device destroyed");
                return;
            }
            error!(?reason, %message, "GPU device lost");
            mark_lost(&lost_signals);
        });

        Ok(WgpuContext::new(
            self.window.clone(),
            surface,
            gpu,
            Arc::clone(&self.signals),
            generation,
            attributes,
        ))
    }
}

impl Surface for WindowSurface {
    type Context = WgpuContext;

    fn get_context(&mut self, attributes: &ContextAttributes) -> Option<WgpuContext> {
        if self.signals.lock().map(|state| state.lost).unwrap_or(true) {
            return None;
        }
        match self.create_context(attributes) {
            Ok(context) => Some(context),
            Err(e) => {
                error!("Failed to create GPU context: {:#}", e);
                None
            }
        }
    }

    fn subscribe(&mut self, kind: SignalKind) {
        if let Ok(mut state) = self.signals.lock() {
            state.subscriptions.insert(kind);
        }
    }

    fn unsubscribe(&mut self, kind: SignalKind) {
        if let Ok(mut state) = self.signals.lock() {
            state.subscriptions.remove(&kind);
        }
    }

    fn next_signal(&mut self) -> Option<SignalKind> {
        let mut state = self.signals.lock().ok()?;
        while let Some(kind) = state.pending.pop_front() {
            if state.subscriptions.contains(&kind) {
                return Some(kind);
            }
        }
        None
    }

    fn prevent_default(&mut self, kind: SignalKind) {
        if kind != SignalKind::ContextLost {
            return;
        }
        // A replacement device can be requested right away.
        if let Ok(mut state) = self.signals.lock() {
            if state.lost {
                state.lost = false;
                state.emit(SignalKind::ContextRestored);
            }
        }
    }
}

struct TextureEntry {
    texture: wgpu::Texture,
    width: u32,
    height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    format: wgpu::TextureFormat,
    mode: DrawMode,
    attributes: Vec<(u32, VertexLayout)>,
}

struct ProgramEntry {
    layout: ProgramLayout,
    vertex_module: wgpu::ShaderModule,
    vertex_entry: String,
    fragment_module: wgpu::ShaderModule,
    fragment_entry: String,
    uniform_buffer: wgpu::Buffer,
    uniform_shadow: Vec<u8>,
    uniforms_dirty: bool,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

/// Rendering context over one wgpu device presenting to a window.
pub struct WgpuContext {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    gpu: GpuDevice,
    config: wgpu::SurfaceConfiguration,
    signals: Arc<Mutex<SignalState>>,
    generation: u64,

    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,

    next_id: u32,
    shaders: HashMap<u32, CompiledShader>,
    programs: HashMap<u32, ProgramEntry>,
    buffers: HashMap<u32, wgpu::Buffer>,
    textures: HashMap<u32, TextureEntry>,
    framebuffers: HashMap<u32, TextureId>,

    // Draw state
    target: Option<FramebufferId>,
    bound_texture: Option<TextureId>,
    program: Option<ProgramId>,
    attributes: BTreeMap<u32, (BufferId, VertexLayout)>,
    viewport: (u32, u32),

    // Per-frame state
    encoder: Option<wgpu::CommandEncoder>,
    frame: Option<wgpu::SurfaceTexture>,
}

impl WgpuContext {
    fn new(
        window: Arc<Window>,
        surface: wgpu::Surface<'static>,
        gpu: GpuDevice,
        signals: Arc<Mutex<SignalState>>,
        generation: u64,
        attributes: &ContextAttributes,
    ) -> Self {
        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&gpu.adapter);
        // Frames are uploaded as-is, so write to a non-sRGB target to keep values untouched.
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .unwrap_or(wgpu::TextureFormat::Bgra8Unorm);
        let preferred_alpha = if attributes.premultiplied_alpha {
            wgpu::CompositeAlphaMode::PreMultiplied
        } else {
            wgpu::CompositeAlphaMode::PostMultiplied
        };
        let alpha_mode = if surface_caps.alpha_modes.contains(&preferred_alpha) {
            preferred_alpha
        } else {
            surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto)
        };

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&gpu.device, &config);
        info!(
            format = ?surface_format,
            ?alpha_mode,
            width = config.width,
            height = config.height,
            "Surface configured"
        );

        let bind_group_layout = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Effect Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: SOURCE_TEXTURE_BINDING,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: SOURCE_SAMPLER_BINDING,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: UNIFORM_BLOCK_BINDING,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Effect Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Source Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            window,
            surface,
            gpu,
            config,
            signals,
            generation,
            bind_group_layout,
            pipeline_layout,
            sampler,
            next_id: 1,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            target: None,
            bound_texture: None,
            program: None,
            attributes: BTreeMap::new(),
            viewport: (size.width.max(1), size.height.max(1)),
            encoder: None,
            frame: None,
        }
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn allocate_texture(device: &wgpu::Device, width: u32, height: u32) -> TextureEntry {
        let width = width.max(1);
        let height = height.max(1);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Effect Texture"),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        TextureEntry { texture, width, height }
    }

    /// Lazily acquires the swapchain image for this frame.
    fn acquire_frame(&mut self) -> Option<wgpu::TextureView> {
        if self.frame.is_none() {
            match self.surface.get_current_texture() {
                Ok(frame) => self.frame = Some(frame),
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    warn!("Surface lost or outdated, reconfiguring");
                    self.surface.configure(&self.gpu.device, &self.config);
                    return None;
                }
                Err(wgpu::SurfaceError::Timeout) => {
                    debug!("Surface acquire timed out, skipping frame");
                    return None;
                }
                Err(wgpu::SurfaceError::OutOfMemory) => {
                    error!("Out of memory acquiring surface texture");
                    mark_lost(&self.signals);
                    return None;
                }
                Err(e) => {
                    warn!("Surface error: {}", e);
                    return None;
                }
            }
        }
        self.frame
            .as_ref()
            .map(|frame| frame.texture.create_view(&wgpu::TextureViewDescriptor::default()))
    }

    fn build_pipeline(
        device: &wgpu::Device,
        pipeline_layout: &wgpu::PipelineLayout,
        program: &ProgramEntry,
        key: &PipelineKey,
    ) -> wgpu::RenderPipeline {
        let vertex_attributes: Vec<[wgpu::VertexAttribute; 1]> = key
            .attributes
            .iter()
            .map(|(location, layout)| {
                [wgpu::VertexAttribute {
                    format: vertex_format(*layout),
                    offset: 0,
                    shader_location: *location,
                }]
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout> = key
            .attributes
            .iter()
            .zip(&vertex_attributes)
            .map(|((_, layout), attributes)| wgpu::VertexBufferLayout {
                array_stride: (layout.component_count as u64) * 4,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes,
            })
            .collect();

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Effect Pipeline"),
            layout: Some(pipeline_layout),
            vertex: wgpu::VertexState {
                module: &program.vertex_module,
                entry_point: Some(&program.vertex_entry),
                buffers: &buffers,
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &program.fragment_module,
                entry_point: Some(&program.fragment_entry),
                targets: &[Some(wgpu::ColorTargetState {
                    format: key.format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: match key.mode {
                    DrawMode::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
                    DrawMode::Triangles => wgpu::PrimitiveTopology::TriangleList,
                },
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        })
    }
}

fn vertex_format(layout: VertexLayout) -> wgpu::VertexFormat {
    match (layout.component_type, layout.component_count) {
        (ComponentType::Float, 1) => wgpu::VertexFormat::Float32,
        (ComponentType::Float, 2) => wgpu::VertexFormat::Float32x2,
        (ComponentType::Float, 3) => wgpu::VertexFormat::Float32x3,
        (ComponentType::Float, _) => wgpu::VertexFormat::Float32x4,
        (ComponentType::Int, 1) => wgpu::VertexFormat::Sint32,
        (ComponentType::Int, 2) => wgpu::VertexFormat::Sint32x2,
        (ComponentType::Int, 3) => wgpu::VertexFormat::Sint32x3,
        (ComponentType::Int, _) => wgpu::VertexFormat::Sint32x4,
    }
}

fn to_bytes(values: &[f32], component_type: ComponentType) -> Vec<u8> {
    match component_type {
        ComponentType::Float => bytemuck::cast_slice(values).to_vec(),
        ComponentType::Int => {
            let ints: Vec<i32> = values.iter().map(|v| *v as i32).collect();
            bytemuck::cast_slice(&ints).to_vec()
        }
    }
}

impl RenderContext for WgpuContext {
    fn texture_origin(&self) -> TextureOrigin {
        TextureOrigin::TopLeft
    }

    fn is_lost(&self) -> bool {
        self.signals
            .lock()
            .map(|state| state.generation != self.generation)
            .unwrap_or(true)
    }

    fn create_shader(&mut self, stage: ShaderStage, source: &ShaderSource) -> Result<ShaderId, String> {
        if self.is_lost() {
            return Err("context lost".to_string());
        }
        let compiled = shader::compile(stage, source)?;
        let id = self.next_id();
        self.shaders.insert(id, compiled);
        Ok(ShaderId(id))
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        if self.shaders.remove(&shader.0).is_none() {
            warn!(id = shader.0, "delete of unknown shader");
        }
    }

    fn create_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, String> {
        if self.is_lost() {
            return Err("context lost".to_string());
        }
        let vs = self.shaders.get(&vertex.0).ok_or("vertex shader is not live")?;
        let fs = self.shaders.get(&fragment.0).ok_or("fragment shader is not live")?;
        let layout = shader::link(vs, fs)?;

        let device = &self.gpu.device;
        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Effect Vertex Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(vs.wgsl.clone())),
        });
        let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Effect Fragment Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(fs.wgsl.clone())),
        });

        // Uniform buffers are sized in 16 byte steps and never empty
        let uniform_size = (layout.uniforms.size.max(16) + 15) & !15;
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Effect Uniform Buffer"),
            size: uniform_size as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let entry = ProgramEntry {
            layout,
            vertex_module,
            vertex_entry: vs.entry_point.clone(),
            fragment_module,
            fragment_entry: fs.entry_point.clone(),
            uniform_buffer,
            uniform_shadow: vec![0; uniform_size as usize],
            uniforms_dirty: true,
            pipelines: HashMap::new(),
        };
        let id = self.next_id();
        self.programs.insert(id, entry);
        Ok(ProgramId(id))
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.program == Some(program) {
            self.program = None;
        }
        if self.programs.remove(&program.0).is_none() {
            warn!(id = program.0, "delete of unknown program");
        }
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<AttributeLocation> {
        self.programs
            .get(&program.0)?
            .layout
            .attribute(name)
            .map(AttributeLocation)
    }

    fn attribute_type(&self, program: ProgramId, name: &str) -> Option<Option<ComponentType>> {
        self.programs.get(&program.0)?.layout.attribute_type(name)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.programs
            .get(&program.0)?
            .layout
            .uniform(name)
            .map(|index| UniformLocation(index as u32))
    }

    fn create_buffer(&mut self, data: &[f32], component_type: ComponentType) -> BufferId {
        let buffer = self.gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Effect Vertex Buffer"),
            contents: &to_bytes(data, component_type),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let id = self.next_id();
        self.buffers.insert(id, buffer);
        BufferId(id)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.attributes.retain(|_, (bound, _)| *bound != buffer);
        if self.buffers.remove(&buffer.0).is_none() {
            warn!(id = buffer.0, "delete of unknown buffer");
        }
    }

    fn create_texture(&mut self, width: u32, height: u32) -> TextureId {
        let entry = Self::allocate_texture(&self.gpu.device, width, height);
        let id = self.next_id();
        self.textures.insert(id, entry);
        TextureId(id)
    }

    fn resize_texture(&mut self, texture: TextureId, width: u32, height: u32) {
        match self.textures.get_mut(&texture.0) {
            Some(entry) => *entry = Self::allocate_texture(&self.gpu.device, width, height),
            None => warn!(id = texture.0, "resize of unknown texture"),
        }
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.bound_texture == Some(texture) {
            self.bound_texture = None;
        }
        if self.textures.remove(&texture.0).is_none() {
            warn!(id = texture.0, "delete of unknown texture");
        }
    }

    fn create_framebuffer(&mut self, texture: TextureId) -> FramebufferId {
        let id = self.next_id();
        self.framebuffers.insert(id, texture);
        FramebufferId(id)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.target == Some(framebuffer) {
            self.target = None;
        }
        if self.framebuffers.remove(&framebuffer.0).is_none() {
            warn!(id = framebuffer.0, "delete of unknown framebuffer");
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.target = framebuffer;
    }

    fn bind_texture(&mut self, texture: TextureId) {
        self.bound_texture = Some(texture);
    }

    fn upload_frame(&mut self, texture: TextureId, frame: &VideoFrame, flip_y: bool) {
        if self.is_lost() {
            return;
        }
        let converted = frame
            .to_rgba()
            .and_then(|rgba| if flip_y { rgba.flipped_vertically() } else { Ok(rgba) });
        let rgba = match converted {
            Ok(rgba) => rgba,
            Err(e) => {
                warn!("Dropping frame: {:#}", e);
                return;
            }
        };
        let Some(entry) = self.textures.get_mut(&texture.0) else {
            warn!(id = texture.0, "upload into unknown texture");
            return;
        };
        if entry.width != rgba.width || entry.height != rgba.height {
            debug!(width = rgba.width, height = rgba.height, "Reallocating media texture");
            *entry = Self::allocate_texture(&self.gpu.device, rgba.width, rgba.height);
        }

        self.gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &rgba.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(rgba.width * 4),
                rows_per_image: Some(rgba.height),
            },
            wgpu::Extent3d {
                width: rgba.width,
                height: rgba.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn use_program(&mut self, program: ProgramId) {
        if self.program != Some(program) {
            self.attributes.clear();
        }
        self.program = Some(program);
    }

    fn vertex_attribute(&mut self, location: AttributeLocation, buffer: BufferId, layout: VertexLayout) {
        self.attributes.insert(location.0, (buffer, layout));
    }

    fn uniform(&mut self, location: UniformLocation, component_type: ComponentType, values: &[f32]) {
        let Some(program) = self.program.and_then(|id| self.programs.get_mut(&id.0)) else {
            return;
        };
        let Some(member) = program.layout.uniforms.members.get(location.0 as usize) else {
            return;
        };
        let bytes = to_bytes(values, component_type);
        let start = member.offset as usize;
        let end = (start + bytes.len()).min(program.uniform_shadow.len());
        if start >= end {
            return;
        }
        let slot = &mut program.uniform_shadow[start..end];
        if slot != &bytes[..end - start] {
            slot.copy_from_slice(&bytes[..end - start]);
            program.uniforms_dirty = true;
        }
    }

    fn draw_arrays(&mut self, mode: DrawMode, first: u32, count: u32) {
        if self.is_lost() {
            return;
        }
        let (Some(program_id), Some(texture_id)) = (self.program, self.bound_texture) else {
            warn!("draw without a program or source texture");
            return;
        };

        let target = self.target;
        let (target_view, format, target_size) = match target {
            Some(framebuffer) => {
                let Some(entry) = self
                    .framebuffers
                    .get(&framebuffer.0)
                    .and_then(|texture| self.textures.get(&texture.0))
                else {
                    warn!(id = framebuffer.0, "draw into unknown framebuffer");
                    return;
                };
                (
                    entry.texture.create_view(&wgpu::TextureViewDescriptor::default()),
                    TEXTURE_FORMAT,
                    (entry.width, entry.height),
                )
            }
            None => {
                let Some(view) = self.acquire_frame() else {
                    return;
                };
                (view, self.config.format, (self.config.width, self.config.height))
            }
        };

        let Some(source) = self.textures.get(&texture_id.0) else {
            warn!(id = texture_id.0, "draw from unknown texture");
            return;
        };
        let source_view = source.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let Some(program) = self.programs.get_mut(&program_id.0) else {
            warn!(id = program_id.0, "draw with unknown program");
            return;
        };

        let device = &self.gpu.device;
        if program.uniforms_dirty {
            self.gpu.queue.write_buffer(&program.uniform_buffer, 0, &program.uniform_shadow);
            program.uniforms_dirty = false;
        }

        let key = PipelineKey {
            format,
            mode,
            attributes: self
                .attributes
                .iter()
                .map(|(location, (_, layout))| (*location, *layout))
                .collect(),
        };
        if !program.pipelines.contains_key(&key) {
            debug!(?format, ?mode, "Creating render pipeline");
            let pipeline = Self::build_pipeline(device, &self.pipeline_layout, program, &key);
            program.pipelines.insert(key.clone(), pipeline);
        }
        let Some(pipeline) = program.pipelines.get(&key) else {
            return;
        };

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Effect Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: SOURCE_TEXTURE_BINDING,
                    resource: wgpu::BindingResource::TextureView(&source_view),
                },
                wgpu::BindGroupEntry {
                    binding: SOURCE_SAMPLER_BINDING,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: UNIFORM_BLOCK_BINDING,
                    resource: program.uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Effect Encoder") })
        });

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Effect Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        render_pass.set_pipeline(pipeline);
        render_pass.set_bind_group(0, &bind_group, &[]);
        for (slot, (buffer_id, _)) in self.attributes.values().enumerate() {
            if let Some(buffer) = self.buffers.get(&buffer_id.0) {
                render_pass.set_vertex_buffer(slot as u32, buffer.slice(..));
            }
        }
        // wgpu rejects viewports larger than the attachment
        let width = self.viewport.0.min(target_size.0).max(1);
        let height = self.viewport.1.min(target_size.1).max(1);
        render_pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
        render_pass.draw(first..first + count, 0..1);
    }

    fn finish_frame(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.gpu.queue.submit(std::iter::once(encoder.finish()));
        }
        if let Some(frame) = self.frame.take() {
            self.window.pre_present_notify();
            frame.present();
        }
    }

    fn viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn backing_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn set_backing_size(&mut self, width: u32, height: u32) {
        self.config.width = width.max(1);
        self.config.height = height.max(1);
        // an acquired image must not outlive its configuration
        self.frame = None;
        if !self.is_lost() {
            self.surface.configure(&self.gpu.device, &self.config);
        }
    }

    fn display_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }
}
