//! Handle-based front end over [`PipelineInstance`].
//!
//! The registry is a lookup convenience: each instance still owns its own
//! state, the registry only maps ids to instances and routes refresh ticks.

use crate::animation::{RefreshHandle, SharedScheduler, Ticker};
use crate::effect::EffectDescriptor;
use crate::error::Result;
use crate::gpu::Surface;
use crate::instance::{Animation, InstanceId, PipelineInstance};
use crate::media::MediaSource;
use crate::pipeline::{Dimensions, DrawOutcome};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

pub struct Registry<S: Surface> {
    instances: BTreeMap<InstanceId, PipelineInstance<S>>,
    scheduler: SharedScheduler,
    ticker: Option<Rc<RefCell<Ticker>>>,
}

impl<S: Surface> Registry<S> {
    /// Every instance runs its own clock on `scheduler`.
    pub fn new(scheduler: SharedScheduler) -> Self {
        Self {
            instances: BTreeMap::new(),
            scheduler,
            ticker: None,
        }
    }

    /// Every instance joins one ticker on `scheduler`.
    pub fn with_shared_ticker(scheduler: SharedScheduler) -> Self {
        let ticker = Rc::new(RefCell::new(Ticker::new(scheduler.clone())));
        Self {
            instances: BTreeMap::new(),
            scheduler,
            ticker: Some(ticker),
        }
    }

    pub fn register(
        &mut self,
        surface: S,
        effects: Vec<EffectDescriptor>,
        dimensions: Option<Dimensions>,
    ) -> Result<InstanceId> {
        let animation = match &self.ticker {
            Some(ticker) => Animation::Shared(Rc::clone(ticker)),
            None => Animation::Independent(Rc::clone(&self.scheduler)),
        };
        let instance = PipelineInstance::new(surface, effects, dimensions, animation)?;
        let id = instance.id();
        self.instances.insert(id, instance);
        Ok(id)
    }

    pub fn get(&self, id: InstanceId) -> Option<&PipelineInstance<S>> {
        self.instances.get(&id)
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut PipelineInstance<S>> {
        self.instances.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Returns `false` for unknown ids.
    pub fn set_source(&mut self, id: InstanceId, source: Option<MediaSource>) -> bool {
        match self.instances.get_mut(&id) {
            Some(instance) => {
                instance.set_source(source);
                true
            }
            None => false,
        }
    }

    pub fn draw(&mut self, id: InstanceId) -> Option<DrawOutcome> {
        self.instances.get_mut(&id).map(|instance| instance.draw())
    }

    pub fn play(&mut self, id: InstanceId) -> bool {
        let Some(instance) = self.instances.get_mut(&id) else {
            return false;
        };
        instance.play();
        true
    }

    pub fn stop(&mut self, id: InstanceId) -> bool {
        let Some(instance) = self.instances.get_mut(&id) else {
            return false;
        };
        instance.stop();
        true
    }

    /// Resizes the instance; unknown ids report no resize.
    pub fn resize(&mut self, id: InstanceId) -> bool {
        self.instances
            .get_mut(&id)
            .map(|instance| instance.resize())
            .unwrap_or(false)
    }

    /// Destroys and forgets the instance.
    pub fn destroy(&mut self, id: InstanceId) -> bool {
        match self.instances.remove(&id) {
            Some(mut instance) => {
                instance.destroy();
                true
            }
            None => false,
        }
    }

    /// Drains device signals of every instance.
    pub fn process_signals(&mut self) {
        for instance in self.instances.values_mut() {
            instance.process_signals();
        }
    }

    /// Routes one fired refresh to whoever requested it. Returns the
    /// instances that drew and how it went.
    pub fn dispatch(&mut self, handle: RefreshHandle) -> Vec<(InstanceId, DrawOutcome)> {
        let batch = self
            .ticker
            .as_ref()
            .and_then(|ticker| ticker.borrow_mut().fire(handle));

        match batch {
            Some(ids) => ids
                .into_iter()
                .filter_map(|id| Some((id, self.instances.get_mut(&id)?.draw())))
                .collect(),
            None => self
                .instances
                .iter_mut()
                .filter_map(|(id, instance)| Some((*id, instance.on_refresh(handle)?)))
                .collect(),
        }
    }
}
