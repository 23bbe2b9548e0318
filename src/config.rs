//! YAML configuration and hot reload.

use crate::effect::{EffectDescriptor, UniformSpec};
use crate::effects;
use crate::gpu::Surface;
use crate::instance::PipelineInstance;
use crate::pipeline::Dimensions;
use crate::shader::ShaderSource;
use anyhow::{anyhow, bail, Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use tracing::{debug, error, info, warn};

/// How instances are ticked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AnimationMode {
    /// One refresh request per instance
    #[default]
    Independent,
    /// One refresh request for all instances
    Shared,
}

/// Media feeding the first pass. Exactly one field must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub camera: Option<u32>,
    pub video: Option<String>,
    pub image: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Camera(u32),
    Video(String),
    Image(PathBuf),
}

impl InputConfig {
    pub fn resolve(&self) -> Result<Input> {
        match (self.camera, &self.video, &self.image) {
            (Some(index), None, None) => Ok(Input::Camera(index)),
            (None, Some(video), None) => Ok(Input::Video(video.clone())),
            (None, None, Some(image)) => Ok(Input::Image(image.clone())),
            (None, None, None) => bail!("input needs one of camera, video or image"),
            _ => bail!("input must name exactly one of camera, video or image"),
        }
    }
}

/// One pass: a bundled effect or a pair of shader files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectConfig {
    pub name: Option<String>,
    pub builtin: Option<String>,
    /// Defaults to the bundled full-screen quad vertex stage
    pub vertex: Option<PathBuf>,
    pub fragment: Option<PathBuf>,
    pub uniforms: BTreeMap<String, Vec<f32>>,
}

impl EffectConfig {
    pub fn builtin(name: impl Into<String>) -> Self {
        Self {
            builtin: Some(name.into()),
            ..Default::default()
        }
    }

    /// Same pass, ignoring uniform values.
    fn same_program(&self, other: &EffectConfig) -> bool {
        self.builtin == other.builtin
            && self.vertex == other.vertex
            && self.fragment == other.fragment
            && self.uniforms.keys().eq(other.uniforms.keys())
    }

    fn descriptor(&self, base: &Path) -> Result<EffectDescriptor> {
        let mut descriptor = match (&self.builtin, &self.fragment) {
            (Some(name), None) => {
                effects::by_name(name).ok_or_else(|| anyhow!("unknown built-in effect `{}`", name))?
            }
            (None, Some(fragment)) => {
                let vertex_source = match &self.vertex {
                    Some(path) => read_shader(base, path)?,
                    None => ShaderSource::Wgsl(effects::QUAD_VERTEX_SHADER.to_string()),
                };
                EffectDescriptor {
                    name: Some(fragment.display().to_string()),
                    vertex_source,
                    fragment_source: read_shader(base, fragment)?,
                    attributes: effects::quad_attributes(),
                    uniforms: Vec::new(),
                }
            }
            (Some(_), Some(_)) => bail!("effect cannot set both builtin and fragment"),
            (None, None) => bail!("effect needs a builtin name or a fragment shader"),
        };

        if let Some(name) = &self.name {
            descriptor.name = Some(name.clone());
        }
        for (name, values) in &self.uniforms {
            let count = u8::try_from(values.len())
                .ok()
                .filter(|count| (1..=4).contains(count))
                .ok_or_else(|| anyhow!("uniform `{}` has {} values, expected 1 to 4", name, values.len()))?;
            match descriptor.uniforms.iter_mut().find(|u| &u.name == name) {
                Some(uniform) => {
                    uniform.component_count = count;
                    uniform.data.set(values.clone());
                }
                None => descriptor.uniforms.push(UniformSpec::float(name.clone(), values.clone())),
            }
        }
        Ok(descriptor)
    }
}

fn read_shader(base: &Path, path: &Path) -> Result<ShaderSource> {
    let full = base.join(path);
    let code = fs::read_to_string(&full).with_context(|| format!("Failed to read shader {:?}", full))?;
    Ok(ShaderSource::from_path_and_code(&full, code))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input: Option<InputConfig>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: u32,
    pub animation: AnimationMode,
    pub resize_each_frame: bool,
    pub effects: Vec<EffectConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: None,
            width: None,
            height: None,
            fps: 30,
            animation: AnimationMode::default(),
            resize_each_frame: false,
            effects: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).with_context(|| format!("Failed to read config {:?}", path))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config {:?}", path))
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Explicit dimensions, only when both sides are set.
    pub fn dimensions(&self) -> Option<Dimensions> {
        match (self.width, self.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => Some(Dimensions { width, height }),
            _ => None,
        }
    }

    /// Builds fresh descriptors; relative shader paths resolve against `base`.
    /// An empty list yields a single passthrough pass.
    pub fn effects(&self, base: &Path) -> Result<Vec<EffectDescriptor>> {
        if self.effects.is_empty() {
            return Ok(vec![effects::passthrough()]);
        }
        self.effects
            .iter()
            .enumerate()
            .map(|(i, effect)| effect.descriptor(base).with_context(|| format!("effect #{}", i)))
            .collect()
    }

    /// True when `other` compiles to the same chain, so only uniform values
    /// can differ.
    pub fn same_chain(&self, other: &Config) -> bool {
        self.effects.len() == other.effects.len()
            && self.effects.iter().zip(&other.effects).all(|(a, b)| a.same_program(b))
    }
}

/// Pushes the configured uniform values into the live bindings of
/// `instance`. Returns how many uniforms were updated.
pub fn apply_uniforms<S: Surface>(config: &Config, instance: &PipelineInstance<S>) -> usize {
    let mut updated = 0;
    for (layer, effect) in config.effects.iter().enumerate() {
        for (name, values) in &effect.uniforms {
            match instance.uniform(layer, name) {
                Some(data) => {
                    data.set(values.clone());
                    updated += 1;
                }
                None => debug!(layer, uniform = %name, "Uniform not bound, skipping"),
            }
        }
    }
    updated
}

/// Watches a config file and reparses it on change.
pub struct ConfigWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    current: Config,
}

impl ConfigWatcher {
    pub fn new(path: PathBuf, current: Config) -> Result<Self> {
        let (tx, rx) = channel();
        let mut watcher = RecommendedWatcher::new(tx, notify::Config::default())?;
        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config {:?}", path))?;
        info!("Watching config file {:?} for changes", path);

        Ok(Self {
            path,
            _watcher: watcher,
            rx,
            current,
        })
    }

    /// Returns `(previous, new)` when the file changed and still parses.
    pub fn check_for_changes(&mut self) -> Option<(Config, Config)> {
        let mut changed = false;
        while let Ok(event) = self.rx.try_recv() {
            match event {
                Ok(event) => {
                    changed |= matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_));
                }
                Err(e) => warn!("Config watch error: {}", e),
            }
        }
        if !changed {
            return None;
        }

        match Config::load(&self.path) {
            Ok(config) if config == self.current => None,
            Ok(config) => {
                info!("Config file changed");
                let previous = std::mem::replace(&mut self.current, config.clone());
                Some((previous, config))
            }
            Err(e) => {
                error!("{:#}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::FrameQueue;
    use crate::gpu::RecordingSurface;
    use crate::instance::Animation;

    const SAMPLE: &str = r#"
input:
  camera: 1
width: 850
height: 480
animation: shared
effects:
  - builtin: brightness-contrast
    uniforms: { u_brightness: [1.2] }
  - builtin: duotone
"#;

    #[test]
    fn test_parses_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.input.as_ref().unwrap().resolve().unwrap(), Input::Camera(1));
        assert_eq!(config.dimensions(), Some(Dimensions { width: 850, height: 480 }));
        assert_eq!(config.animation, AnimationMode::Shared);
        assert_eq!(config.fps, 30);
        assert!(!config.resize_each_frame);

        let effects = config.effects(Path::new(".")).unwrap();
        assert_eq!(effects.len(), 2);
        assert_eq!(*effects[0].uniform("u_brightness").unwrap().data.get(), vec![1.2]);
        assert_eq!(*effects[0].uniform("u_contrast").unwrap().data.get(), vec![1.0]);
    }

    #[test]
    fn test_defaults_and_half_dimensions() {
        let config = Config::parse("width: 640\n").unwrap();
        assert_eq!(config.dimensions(), None);
        assert_eq!(config.animation, AnimationMode::Independent);
        let effects = config.effects(Path::new(".")).unwrap();
        assert_eq!(effects[0].label(), "passthrough");
    }

    #[test]
    fn test_rejects_ambiguous_input_and_unknown_effect() {
        let input = InputConfig {
            camera: Some(0),
            image: Some(PathBuf::from("a.png")),
            ..Default::default()
        };
        assert!(input.resolve().is_err());
        assert!(InputConfig::default().resolve().is_err());

        let config = Config {
            effects: vec![EffectConfig::builtin("sepia")],
            ..Default::default()
        };
        assert!(config.effects(Path::new(".")).is_err());
    }

    #[test]
    fn test_custom_effect_reads_shader_files() {
        let dir = std::env::temp_dir().join(format!("vgl-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("tint.wgsl"),
            r#"
struct Params { u_amount: f32 }
@group(0) @binding(0) var t_source: texture_2d<f32>;
@group(0) @binding(1) var s_source: sampler;
@group(0) @binding(2) var<uniform> params: Params;

@fragment
fn fs_main(@location(0) tex_coord: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(t_source, s_source, tex_coord) * params.u_amount;
}
"#,
        )
        .unwrap();

        let config = Config::parse("effects:\n  - fragment: tint.wgsl\n    uniforms: { u_amount: [0.5] }\n").unwrap();
        let effects = config.effects(&dir).unwrap();
        assert!(matches!(effects[0].fragment_source, ShaderSource::Wgsl(_)));
        assert_eq!(effects[0].attributes.len(), 2);

        let mut surface = RecordingSurface::new(64, 64);
        let compiled = crate::pipeline::build(&mut surface, &effects, None).unwrap();
        assert!(compiled.scene.uniform(0, "u_amount").is_some());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_oversized_uniform_is_rejected() {
        let values = vec!["0.5"; 257].join(", ");
        let config = Config::parse(&format!(
            "effects:\n  - builtin: brightness-contrast\n    uniforms: {{ u_brightness: [{}] }}\n",
            values
        ))
        .unwrap();
        let err = config.effects(Path::new(".")).unwrap_err();
        assert!(format!("{:#}", err).contains("257 values"), "{:#}", err);

        let empty = Config::parse("effects:\n  - builtin: duotone\n    uniforms: { u_extra: [] }\n").unwrap();
        assert!(empty.effects(Path::new(".")).is_err());
    }

    #[test]
    fn test_uniform_only_change_keeps_chain() {
        let old = Config::parse(SAMPLE).unwrap();
        let new = Config::parse(&SAMPLE.replace("[1.2]", "[0.8]")).unwrap();
        assert!(old.same_chain(&new));

        let fewer = Config::parse("effects:\n  - builtin: duotone\n").unwrap();
        assert!(!old.same_chain(&fewer));
    }

    #[test]
    fn test_apply_uniforms_updates_live_bindings() {
        let config = Config::parse(SAMPLE).unwrap();
        let effects = config.effects(Path::new(".")).unwrap();
        let surface = RecordingSurface::new(64, 64);
        let instance =
            PipelineInstance::new(surface, effects, None, Animation::Independent(FrameQueue::shared())).unwrap();

        let changed = Config::parse(&SAMPLE.replace("[1.2]", "[0.3]")).unwrap();
        assert_eq!(apply_uniforms(&changed, &instance), 1);
        assert_eq!(*instance.uniform(0, "u_brightness").unwrap().get(), vec![0.3]);
    }
}
