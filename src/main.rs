//! vgl: apply chained GPU shader effects to a camera, video or image.

use anyhow::{Context, Result};
use clap::Parser;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use vgl::animation::FrameQueue;
use vgl::capture::{AsyncCapture, CaptureBackend, CaptureConfig, NokhwaCapture};
use vgl::config::{self, AnimationMode, Config, ConfigWatcher, Input, InputConfig};
use vgl::effects;
use vgl::gpu::{RecordingSurface, WindowSurface};
use vgl::instance::InstanceId;
use vgl::media::{FrameSource, MediaSource, StillImage};
use vgl::pipeline::{self, DrawOutcome, Target};
use vgl::registry::Registry;
use vgl::utils::FpsCounter;
use vgl::video::VideoPlayer;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowAttributes, WindowId};

#[derive(Parser, Debug)]
#[command(name = "vgl")]
#[command(about = "Apply chained GPU shader effects to live video")]
struct Args {
    /// YAML config file, watched for changes
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Camera device index
    #[arg(long, conflicts_with_all = ["video", "image"])]
    camera: Option<u32>,

    /// Video file or stream URL
    #[arg(long, conflicts_with = "image")]
    video: Option<String>,

    /// Still image
    #[arg(long)]
    image: Option<PathBuf>,

    /// Built-in effect, repeat to chain (see --list-effects)
    #[arg(short, long = "effect")]
    effects: Vec<String>,

    /// Explicit output width (needs --height)
    #[arg(long, requires = "height")]
    width: Option<u32>,

    /// Explicit output height (needs --width)
    #[arg(long, requires = "width")]
    height: Option<u32>,

    /// Requested camera frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Animation scheduling
    #[arg(long, value_enum)]
    ticker: Option<AnimationMode>,

    /// Follow the window size on every frame
    #[arg(long)]
    resize_each_frame: bool,

    /// List available cameras and exit
    #[arg(long)]
    list_devices: bool,

    /// List built-in effects and exit
    #[arg(long)]
    list_effects: bool,

    /// Compile the effect chain without a GPU and exit
    #[arg(long)]
    check: bool,
}

/// Loads the config file (if any) and lets command-line flags override it.
fn load_config(args: &Args) -> Result<(Config, PathBuf)> {
    let (mut config, base) = match &args.config {
        Some(path) => (
            Config::load(path)?,
            path.parent().map(Path::to_path_buf).unwrap_or_default(),
        ),
        None => (Config::default(), PathBuf::from(".")),
    };

    let input = InputConfig {
        camera: args.camera,
        video: args.video.clone(),
        image: args.image.clone(),
    };
    if input != InputConfig::default() {
        config.input = Some(input);
    }
    if !args.effects.is_empty() {
        config.effects = args.effects.iter().map(config::EffectConfig::builtin).collect();
    }
    if let (Some(width), Some(height)) = (args.width, args.height) {
        config.width = Some(width);
        config.height = Some(height);
    }
    if let Some(fps) = args.fps {
        config.fps = fps;
    }
    if let Some(mode) = args.ticker {
        config.animation = mode;
    }
    config.resize_each_frame |= args.resize_each_frame;
    Ok((config, base))
}

fn open_media(config: &Config) -> Result<MediaSource> {
    let input = match &config.input {
        Some(input) => input.resolve()?,
        None => Input::Camera(0),
    };

    let (media, kind): (Box<dyn FrameSource>, &str) = match input {
        Input::Camera(index) => {
            let (width, height) = config
                .dimensions()
                .map(|d| (d.width, d.height))
                .unwrap_or((1280, 720));
            let capture = AsyncCapture::new(CaptureConfig {
                device_index: index,
                width,
                height,
                fps: config.fps,
            })?;
            (Box::new(capture), "camera")
        }
        Input::Video(path) => (Box::new(VideoPlayer::open(&path)?), "video"),
        Input::Image(path) => (Box::new(StillImage::open(&path)?), "image"),
    };
    let source = MediaSource::from(media).with_kind(kind);

    Ok(match config.dimensions() {
        Some(d) => source.with_size(d.width, d.height),
        None => source,
    })
}

/// Builds the chain on the recording backend and prints its wiring.
fn check(config: &Config, base: &Path) -> Result<()> {
    let effects = config.effects(base)?;
    let (width, height) = config
        .dimensions()
        .map(|d| (d.width, d.height))
        .unwrap_or((1280, 720));
    let mut surface = RecordingSurface::new(width, height);
    let compiled = pipeline::build(&mut surface, &effects, config.dimensions())?;

    for (i, layer) in compiled.scene.layers().iter().enumerate() {
        let target = match layer.target {
            Target::Screen => "screen".to_string(),
            Target::Binding(id) => format!("texture {}", compiled.scene.binding(id).texture.0),
        };
        println!(
            "pass {}: {} -> {} ({} attributes, {} uniforms, {} vertices)",
            i,
            layer.name,
            target,
            layer.attributes.len(),
            layer.uniforms.len(),
            layer.vertex_count
        );
    }
    println!("{} objects allocated", surface.live_objects());
    Ok(())
}

struct VglApp {
    config: Config,
    base: PathBuf,
    watcher: Option<ConfigWatcher>,
    queue: Rc<RefCell<FrameQueue>>,
    registry: Option<Registry<WindowSurface>>,
    instance: Option<InstanceId>,
    window: Option<Arc<Window>>,
    fps: FpsCounter,
}

impl VglApp {
    fn new(config: Config, base: PathBuf, watcher: Option<ConfigWatcher>) -> Self {
        Self {
            config,
            base,
            watcher,
            queue: FrameQueue::shared(),
            registry: None,
            instance: None,
            window: None,
            fps: FpsCounter::new(),
        }
    }

    fn initialize(&mut self, window: Arc<Window>) -> Result<()> {
        let mut registry = match self.config.animation {
            AnimationMode::Independent => Registry::new(self.queue.clone()),
            AnimationMode::Shared => Registry::with_shared_ticker(self.queue.clone()),
        };

        let effects = self.config.effects(&self.base)?;
        let id = registry
            .register(WindowSurface::new(window), effects, self.config.dimensions())
            .context("Failed to build effect pipeline")?;
        if let Some(instance) = registry.get_mut(id) {
            instance.set_resize_each_frame(self.config.resize_each_frame);
        }

        let media = open_media(&self.config)?;
        registry.set_source(id, Some(media));

        self.registry = Some(registry);
        self.instance = Some(id);
        Ok(())
    }

    fn reload(&mut self, previous: Config, config: Config) {
        let (Some(registry), Some(id)) = (self.registry.as_mut(), self.instance) else {
            return;
        };
        let Some(instance) = registry.get_mut(id) else {
            return;
        };

        if previous.same_chain(&config) {
            let updated = config::apply_uniforms(&config, instance);
            info!("Updated {} uniforms in place", updated);
        } else {
            match config.effects(&self.base).and_then(|effects| Ok(instance.set_effects(effects)?)) {
                Ok(()) => info!("Effect chain rebuilt"),
                Err(e) => error!("Keeping previous effect chain: {:#}", e),
            }
        }
        if previous.dimensions() != config.dimensions() || previous.input != config.input {
            warn!("Input and dimension changes take effect on restart");
        }
        instance.set_resize_each_frame(config.resize_each_frame);
        self.config = config;
    }

    fn redraw(&mut self) {
        let Some(registry) = self.registry.as_mut() else {
            return;
        };
        let handles = self.queue.borrow_mut().drain();
        for handle in handles {
            for (id, outcome) in registry.dispatch(handle) {
                match outcome {
                    DrawOutcome::Drawn { .. } => {
                        if let Some(fps) = self.fps.update() {
                            debug!("[Perf] {:.2} FPS", fps);
                        }
                    }
                    DrawOutcome::SourceNotReady => {}
                    DrawOutcome::ContextLost => debug!(instance = id.0, "Skipped frame while context is lost"),
                }
            }
        }
    }
}

impl ApplicationHandler for VglApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let (width, height) = self
            .config
            .dimensions()
            .map(|d| (d.width, d.height))
            .unwrap_or((1280, 720));
        let attributes = WindowAttributes::default()
            .with_title("vgl")
            .with_inner_size(PhysicalSize::new(width, height));

        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };
        self.window = Some(window.clone());

        if let Err(e) = self.initialize(window) {
            error!("Initialization error: {:#}", e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Window closed");
                self.registry = None;
                event_loop.exit();
            }
            WindowEvent::Resized(_) => {
                if let (Some(registry), Some(id)) = (self.registry.as_mut(), self.instance) {
                    registry.resize(id);
                }
            }
            WindowEvent::RedrawRequested => self.redraw(),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(registry) = self.registry.as_mut() {
            registry.process_signals();
        }
        if let Some((previous, config)) = self.watcher.as_mut().and_then(|w| w.check_for_changes()) {
            self.reload(previous, config);
        }
        if !self.queue.borrow().is_empty() {
            if let Some(window) = &self.window {
                window.request_redraw();
            }
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if args.list_devices {
        println!("Available cameras:");
        match NokhwaCapture::list_devices() {
            Ok(devices) => {
                for device in devices {
                    println!("  [{}] {}", device.index, device.name);
                }
            }
            Err(e) => eprintln!("Failed to list devices: {}", e),
        }
        return Ok(());
    }
    if args.list_effects {
        for name in effects::NAMES {
            println!("{}", name);
        }
        return Ok(());
    }

    let (config, base) = load_config(&args)?;
    if args.check {
        return check(&config, &base);
    }

    let watcher = match &args.config {
        Some(path) => match ConfigWatcher::new(path.clone(), config.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Config hot reload disabled: {:#}", e);
                None
            }
        },
        None => None,
    };

    info!("Starting vgl...");
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = VglApp::new(config, base, watcher);
    event_loop.run_app(&mut app)?;
    Ok(())
}
