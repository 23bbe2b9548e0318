//! A pipeline bound to one surface.
//!
//! [`PipelineInstance`] owns everything one effect chain needs: the surface,
//! the live context and scene, the media, the explicit dimensions and its
//! animation clock. Device loss and restore arrive as surface signals and
//! are fed through [`Recovery`]; callers only observe a pause in output.

use crate::animation::{AnimationLoop, RefreshHandle, SharedScheduler, Ticker};
use crate::effect::{EffectDescriptor, UniformData};
use crate::error::Result;
use crate::gpu::{SignalKind, Surface};
use crate::media::{FrameSource, MediaSource};
use crate::pipeline::{self, Compiled, Dimensions, DrawOutcome, Scene};
use crate::recovery::{Action, Event, Recovery, RecoveryState};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info, warn};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl InstanceId {
    fn next() -> Self {
        Self(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// How an instance gets its refresh ticks.
#[derive(Clone)]
pub enum Animation {
    /// Its own clock on the given scheduler.
    Independent(SharedScheduler),
    /// Membership in a shared ticker pool.
    Shared(Rc<RefCell<Ticker>>),
}

pub struct PipelineInstance<S: Surface> {
    id: InstanceId,
    surface: S,
    effects: Vec<EffectDescriptor>,
    dimensions: Option<Dimensions>,
    live: Option<Compiled<S::Context>>,
    media: Option<Box<dyn FrameSource>>,
    kind: Option<String>,
    animation: Animation,
    clock: AnimationLoop,
    recovery: Recovery,
    resize_each_frame: bool,
    destroyed: bool,
}

impl<S: Surface> PipelineInstance<S> {
    /// Compiles `effects` on a fresh context of `surface` and starts
    /// listening for device loss. Explicit `dimensions` size the offscreen
    /// targets and later the backing store.
    pub fn new(
        mut surface: S,
        effects: Vec<EffectDescriptor>,
        dimensions: Option<Dimensions>,
        animation: Animation,
    ) -> Result<Self> {
        let compiled = pipeline::build(&mut surface, &effects, dimensions)?;
        surface.subscribe(SignalKind::ContextLost);

        let id = InstanceId::next();
        info!(instance = id.0, passes = effects.len(), "Pipeline instance created");

        Ok(Self {
            id,
            surface,
            effects,
            dimensions,
            live: Some(compiled),
            media: None,
            kind: None,
            animation,
            clock: AnimationLoop::new(),
            recovery: Recovery::new(),
            resize_each_frame: false,
            destroyed: false,
        })
    }

    /// Checks the display size on every draw instead of only when media is set.
    pub fn set_resize_each_frame(&mut self, enabled: bool) {
        self.resize_each_frame = enabled;
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn state(&self) -> RecoveryState {
        self.recovery.state()
    }

    pub fn scene(&self) -> Option<&Scene> {
        self.live.as_ref().map(|live| &live.scene)
    }

    pub fn context(&self) -> Option<&S::Context> {
        self.live.as_ref().map(|live| &live.context)
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn effects(&self) -> &[EffectDescriptor] {
        &self.effects
    }

    pub fn dimensions(&self) -> Option<Dimensions> {
        self.dimensions
    }

    pub fn media_kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Live uniform storage of the pass at `layer`.
    pub fn uniform(&self, layer: usize, name: &str) -> Option<UniformData> {
        self.scene()?.uniform(layer, name).cloned()
    }

    /// Replaces the media (when given) and starts animating.
    ///
    /// Width and height on the source become the explicit dimensions only
    /// when both are set; the kind is kept from the previous source when
    /// the new one has none.
    pub fn set_source(&mut self, source: Option<MediaSource>) {
        if self.destroyed {
            return;
        }
        if let Some(source) = source {
            if let Some(dimensions) = source.dimensions() {
                self.dimensions = Some(dimensions);
            }
            self.resize();
            self.media = Some(source.media);
            if source.kind.is_some() {
                self.kind = source.kind;
            }
        }
        self.play();
    }

    /// Swaps the effect list, rebuilding on the current context.
    ///
    /// On failure the previous scene stays in place.
    pub fn set_effects(&mut self, effects: Vec<EffectDescriptor>) -> Result<()> {
        if let Some(Compiled { context, scene }) = self.live.as_mut() {
            let mut fresh = pipeline::build_scene(context, &effects, self.dimensions)?;
            pipeline::resize(context, self.dimensions, Some(&mut fresh));
            std::mem::replace(scene, fresh).release(context);
            info!(instance = self.id.0, passes = effects.len(), "Effect list replaced");
        }
        self.effects = effects;
        Ok(())
    }

    /// Runs one frame. Pending device signals are handled first.
    pub fn draw(&mut self) -> DrawOutcome {
        self.process_signals();

        let Some(Compiled { context, scene }) = self.live.as_mut() else {
            return DrawOutcome::ContextLost;
        };
        let Some(media) = self.media.as_mut() else {
            return DrawOutcome::SourceNotReady;
        };
        if !media.has_current_data() {
            return DrawOutcome::SourceNotReady;
        }
        if self.resize_each_frame {
            pipeline::resize(context, self.dimensions, Some(scene));
        }
        pipeline::draw(context, media.as_mut(), scene)
    }

    /// Starts animating. Already running is a no-op; while the device is
    /// gone the request is remembered for after recovery.
    pub fn play(&mut self) {
        if self.destroyed {
            return;
        }
        if self.recovery.state() != RecoveryState::Active {
            self.recovery.request_resume();
            return;
        }
        match &self.animation {
            Animation::Independent(scheduler) => {
                self.clock.start(&mut *scheduler.borrow_mut());
            }
            Animation::Shared(ticker) => {
                let mut ticker = ticker.borrow_mut();
                ticker.add(self.id);
                ticker.start();
            }
        }
    }

    /// Stops animating. A draw already under way completes.
    pub fn stop(&mut self) {
        match &self.animation {
            Animation::Independent(scheduler) => self.clock.stop(&mut *scheduler.borrow_mut()),
            Animation::Shared(ticker) => {
                let mut ticker = ticker.borrow_mut();
                if ticker.remove(self.id) && ticker.instances().is_empty() {
                    ticker.stop();
                }
            }
        }
    }

    pub fn is_animating(&self) -> bool {
        match &self.animation {
            Animation::Independent(_) => self.clock.is_running(),
            Animation::Shared(ticker) => {
                let ticker = ticker.borrow();
                ticker.contains(self.id) && ticker.is_running()
            }
        }
    }

    /// Matches the backing store to the explicit dimensions or the display.
    pub fn resize(&mut self) -> bool {
        match self.live.as_mut() {
            Some(Compiled { context, scene }) => pipeline::resize(context, self.dimensions, Some(scene)),
            None => false,
        }
    }

    /// Handles a fired refresh of the independent clock. Returns the draw
    /// outcome when the handle was this instance's.
    pub fn on_refresh(&mut self, handle: RefreshHandle) -> Option<DrawOutcome> {
        let Animation::Independent(scheduler) = &self.animation else {
            return None;
        };
        if !self.clock.fire(handle, &mut *scheduler.borrow_mut()) {
            return None;
        }
        Some(self.draw())
    }

    /// Drains device signals from the surface into the recovery machine.
    pub fn process_signals(&mut self) {
        while let Some(signal) = self.surface.next_signal() {
            let event = match signal {
                SignalKind::ContextLost => {
                    warn!(instance = self.id.0, "GPU context lost");
                    Event::ContextLost {
                        animating: self.is_animating(),
                    }
                }
                SignalKind::ContextRestored => Event::ContextRestored,
            };
            self.apply(event);
        }
    }

    fn apply(&mut self, event: Event) {
        let mut events = VecDeque::from([event]);
        while let Some(event) = events.pop_front() {
            for action in self.recovery.handle(event) {
                if let Some(follow_up) = self.perform(action) {
                    events.push_back(follow_up);
                }
            }
        }
    }

    fn perform(&mut self, action: Action) -> Option<Event> {
        match action {
            Action::Claim(kind) => self.surface.prevent_default(kind),
            Action::Subscribe(kind) => self.surface.subscribe(kind),
            Action::Unsubscribe(kind) => self.surface.unsubscribe(kind),
            Action::StopAnimation => self.stop(),
            Action::ReleaseScene => self.release(),
            Action::Rebuild => {
                return Some(match pipeline::build(&mut self.surface, &self.effects, self.dimensions) {
                    Ok(compiled) => {
                        self.live = Some(compiled);
                        info!(instance = self.id.0, "GPU context restored");
                        Event::Rebuilt {
                            has_media: self.media.is_some(),
                        }
                    }
                    Err(e) => {
                        error!(instance = self.id.0, "Failed to rebuild after restore: {}", e);
                        Event::RebuildFailed
                    }
                });
            }
            Action::ReapplyMedia => {
                self.resize();
            }
            Action::ResumeAnimation => self.play(),
        }
        None
    }

    fn release(&mut self) {
        if let Some(Compiled { mut context, scene }) = self.live.take() {
            scene.release(&mut context);
        }
    }

    /// Stops animating, frees every GPU object and detaches from the surface.
    /// Calling it again does nothing.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.stop();
        self.release();
        self.surface.unsubscribe(SignalKind::ContextLost);
        self.surface.unsubscribe(SignalKind::ContextRestored);
        self.media = None;
        self.kind = None;
        self.dimensions = None;
        self.destroyed = true;
        info!(instance = self.id.0, "Pipeline instance destroyed");
    }
}

impl<S: Surface> Drop for PipelineInstance<S> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::FrameQueue;
    use crate::effects;
    use crate::frame::{PixelFormat, VideoFrame};
    use crate::gpu::RecordingSurface;
    use crate::media::StillImage;
    use crate::pipeline::Target;

    fn still() -> MediaSource {
        MediaSource::new(StillImage::from_frame(VideoFrame::new(8, 4, PixelFormat::Rgba)))
    }

    fn chain() -> Vec<EffectDescriptor> {
        vec![effects::brightness_contrast(), effects::duotone(), effects::passthrough()]
    }

    fn instance(surface: &RecordingSurface, queue: &Rc<RefCell<FrameQueue>>) -> PipelineInstance<RecordingSurface> {
        PipelineInstance::new(surface.clone(), chain(), None, Animation::Independent(queue.clone())).unwrap()
    }

    fn wiring(scene: &Scene) -> Vec<(bool, bool)> {
        scene
            .layers()
            .iter()
            .map(|layer| {
                (
                    scene.binding(layer.source).framebuffer.is_some(),
                    layer.target == Target::Screen,
                )
            })
            .collect()
    }

    #[test]
    fn test_play_twice_schedules_once() {
        let surface = RecordingSurface::new(640, 480);
        let queue = FrameQueue::shared();
        let mut vgl = instance(&surface, &queue);

        vgl.play();
        vgl.play();
        assert_eq!(queue.borrow().len(), 1);
        assert!(vgl.is_animating());
    }

    #[test]
    fn test_set_source_applies_dimensions_and_plays() {
        let surface = RecordingSurface::new(1280, 720);
        let queue = FrameQueue::shared();
        let mut vgl = instance(&surface, &queue);

        vgl.set_source(Some(still().with_size(850, 480).with_kind("image")));
        assert_eq!(surface.backing_size(), (850, 480));
        assert_eq!(vgl.dimensions(), Some(Dimensions { width: 850, height: 480 }));
        assert_eq!(vgl.media_kind(), Some("image"));
        assert!(vgl.is_animating());

        vgl.set_source(Some(still()));
        assert_eq!(vgl.media_kind(), Some("image"));
        assert_eq!(surface.backing_size(), (850, 480));
    }

    #[test]
    fn test_constructor_dimensions_size_targets() {
        let surface = RecordingSurface::new(1280, 720);
        let queue = FrameQueue::shared();
        let dimensions = Dimensions { width: 850, height: 480 };
        let mut vgl =
            PipelineInstance::new(surface.clone(), chain(), Some(dimensions), Animation::Independent(queue.clone()))
                .unwrap();

        let scene = vgl.scene().unwrap();
        let target = scene.binding(scene.layers()[1].source);
        assert_eq!(surface.texture_size(target.texture), Some((850, 480)));

        assert!(vgl.resize());
        assert_eq!(surface.backing_size(), (850, 480));
    }

    #[test]
    fn test_refresh_draws_and_reschedules() {
        let surface = RecordingSurface::new(640, 480);
        let queue = FrameQueue::shared();
        let mut vgl = instance(&surface, &queue);
        vgl.set_source(Some(still()));

        let handle = queue.borrow_mut().drain()[0];
        assert_eq!(vgl.on_refresh(handle), Some(DrawOutcome::Drawn { layers: 3 }));
        assert_eq!(queue.borrow().len(), 1);
        assert_eq!(vgl.on_refresh(handle), None);
    }

    #[test]
    fn test_stop_cancels_pending_refresh() {
        let surface = RecordingSurface::new(640, 480);
        let queue = FrameQueue::shared();
        let mut vgl = instance(&surface, &queue);
        vgl.play();
        vgl.stop();

        assert!(queue.borrow().is_empty());
        assert!(!vgl.is_animating());
    }

    #[test]
    fn test_draw_without_media_is_skipped() {
        let surface = RecordingSurface::new(640, 480);
        let queue = FrameQueue::shared();
        let mut vgl = instance(&surface, &queue);

        assert_eq!(vgl.draw(), DrawOutcome::SourceNotReady);
    }

    #[test]
    fn test_intermediate_targets_follow_display() {
        let surface = RecordingSurface::new(640, 480);
        let queue = FrameQueue::shared();
        let mut vgl = instance(&surface, &queue);
        vgl.set_source(Some(still()));

        let scene = vgl.scene().unwrap();
        let target = scene.binding(scene.layers()[1].source);
        assert_eq!(surface.texture_size(target.texture), Some((640, 480)));
    }

    #[test]
    fn test_resize_each_frame_tracks_display() {
        let surface = RecordingSurface::new(640, 480);
        let queue = FrameQueue::shared();
        let mut vgl = instance(&surface, &queue);
        vgl.set_source(Some(still()));

        surface.set_display_size(320, 240);
        vgl.draw();
        assert_eq!(surface.backing_size(), (640, 480));

        vgl.set_resize_each_frame(true);
        vgl.draw();
        assert_eq!(surface.backing_size(), (320, 240));
    }

    #[test]
    fn test_loss_and_restore_while_animating() {
        let surface = RecordingSurface::new(640, 480);
        let queue = FrameQueue::shared();
        let mut vgl = instance(&surface, &queue);
        vgl.set_source(Some(still().with_kind("video")));
        let before = wiring(vgl.scene().unwrap());

        surface.lose_context();
        vgl.process_signals();
        assert_eq!(vgl.state(), RecoveryState::Lost);
        assert!(vgl.scene().is_none());
        assert!(!vgl.is_animating());
        assert!(queue.borrow().is_empty());
        assert!(surface.is_subscribed(SignalKind::ContextRestored));
        assert_eq!(vgl.draw(), DrawOutcome::ContextLost);

        surface.restore_context();
        vgl.process_signals();
        assert_eq!(vgl.state(), RecoveryState::Active);
        assert!(!surface.is_subscribed(SignalKind::ContextRestored));
        assert_eq!(surface.state().contexts_created, 2);
        assert_eq!(wiring(vgl.scene().unwrap()), before);
        assert!(vgl.is_animating());
        assert_eq!(queue.borrow().len(), 1);
        assert_eq!(vgl.media_kind(), Some("video"));
        assert_eq!(vgl.draw(), DrawOutcome::Drawn { layers: 3 });
    }

    #[test]
    fn test_restore_from_within_claim_recovers() {
        let surface = RecordingSurface::new(640, 480);
        surface.set_restore_on_claim(true);
        let queue = FrameQueue::shared();
        let mut vgl = instance(&surface, &queue);
        vgl.set_source(Some(still()));
        let before = wiring(vgl.scene().unwrap());

        surface.lose_context();
        vgl.process_signals();

        assert_eq!(vgl.state(), RecoveryState::Active);
        assert_eq!(surface.state().contexts_created, 2);
        assert!(!surface.is_subscribed(SignalKind::ContextRestored));
        assert_eq!(wiring(vgl.scene().unwrap()), before);
        assert!(vgl.is_animating());
        assert_eq!(vgl.draw(), DrawOutcome::Drawn { layers: 3 });
    }

    #[test]
    fn test_loss_and_restore_in_shared_ticker() {
        let surface = RecordingSurface::new(640, 480);
        let queue = FrameQueue::shared();
        let ticker = Rc::new(RefCell::new(Ticker::new(queue.clone())));
        let mut vgl =
            PipelineInstance::new(surface.clone(), chain(), None, Animation::Shared(Rc::clone(&ticker))).unwrap();
        vgl.set_source(Some(still()));
        assert_eq!(ticker.borrow().instances(), &[vgl.id()]);

        surface.lose_context();
        vgl.process_signals();
        assert_eq!(vgl.state(), RecoveryState::Lost);
        assert!(ticker.borrow().instances().is_empty());
        assert!(!ticker.borrow().is_running());
        assert!(queue.borrow().is_empty());

        surface.restore_context();
        vgl.process_signals();
        assert_eq!(vgl.state(), RecoveryState::Active);
        assert_eq!(ticker.borrow().instances(), &[vgl.id()]);
        assert!(vgl.is_animating());
        assert_eq!(queue.borrow().len(), 1);

        let handle = queue.borrow_mut().drain()[0];
        assert_eq!(ticker.borrow_mut().fire(handle), Some(vec![vgl.id()]));
        assert_eq!(vgl.draw(), DrawOutcome::Drawn { layers: 3 });
    }

    #[test]
    fn test_not_ready_draw_leaves_gpu_state_alone() {
        let surface = RecordingSurface::new(640, 480);
        let queue = FrameQueue::shared();
        let mut vgl = instance(&surface, &queue);
        vgl.set_resize_each_frame(true);
        vgl.set_source(Some(MediaSource::new(None::<VideoFrame>)));

        surface.set_display_size(320, 240);
        surface.clear_calls();
        assert_eq!(vgl.draw(), DrawOutcome::SourceNotReady);
        assert!(surface.calls().is_empty());
        assert_eq!(surface.backing_size(), (640, 480));
    }

    #[test]
    fn test_restore_keeps_idle_instance_idle() {
        let surface = RecordingSurface::new(640, 480);
        let queue = FrameQueue::shared();
        let mut vgl = instance(&surface, &queue);

        surface.lose_context();
        vgl.process_signals();
        surface.restore_context();
        vgl.process_signals();

        assert_eq!(vgl.state(), RecoveryState::Active);
        assert!(!vgl.is_animating());
        assert!(queue.borrow().is_empty());
    }

    #[test]
    fn test_failed_rebuild_stays_lost() {
        let surface = RecordingSurface::new(640, 480);
        let queue = FrameQueue::shared();
        let mut vgl = instance(&surface, &queue);
        vgl.play();

        surface.lose_context();
        vgl.process_signals();
        surface.set_context_available(false);
        surface.restore_context();
        vgl.process_signals();

        assert_eq!(vgl.state(), RecoveryState::Lost);
        assert!(vgl.scene().is_none());
        assert!(surface.is_subscribed(SignalKind::ContextRestored));
        assert_eq!(vgl.draw(), DrawOutcome::ContextLost);
    }

    #[test]
    fn test_destroy_frees_everything() {
        let surface = RecordingSurface::new(640, 480);
        let queue = FrameQueue::shared();
        let mut vgl = instance(&surface, &queue);
        vgl.set_source(Some(still()));
        vgl.draw();

        vgl.destroy();
        assert_eq!(surface.live_objects(), 0);
        assert!(queue.borrow().is_empty());
        assert!(!surface.is_subscribed(SignalKind::ContextLost));

        vgl.destroy();
        drop(vgl);
        assert_eq!(surface.state().invalid_deletes, 0);
    }

    #[test]
    fn test_drop_releases_scene() {
        let surface = RecordingSurface::new(640, 480);
        let queue = FrameQueue::shared();
        drop(instance(&surface, &queue));
        assert_eq!(surface.live_objects(), 0);
    }

    #[test]
    fn test_set_effects_swaps_scene_without_leaks() {
        let surface = RecordingSurface::new(640, 480);
        let queue = FrameQueue::shared();
        let mut vgl = instance(&surface, &queue);

        vgl.set_effects(vec![effects::passthrough()]).unwrap();
        assert_eq!(vgl.scene().unwrap().layers().len(), 1);
        assert_eq!(surface.state().contexts_created, 1);

        vgl.destroy();
        assert_eq!(surface.live_objects(), 0);
        assert_eq!(surface.state().invalid_deletes, 0);
    }

    #[test]
    fn test_uniform_handle_is_live() {
        let surface = RecordingSurface::new(640, 480);
        let queue = FrameQueue::shared();
        let mut vgl = instance(&surface, &queue);
        vgl.set_source(Some(still()));

        vgl.uniform(0, "u_contrast").unwrap().set(vec![3.0]);
        surface.clear_calls();
        vgl.draw();
        assert!(surface.uniform_uploads().iter().any(|(_, values)| *values == vec![3.0]));
    }
}
