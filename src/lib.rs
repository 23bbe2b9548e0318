//! vgl: chained GPU shader effects over live video.
//!
//! An ordered list of [`effect::EffectDescriptor`]s is compiled into a
//! linear chain of render passes ([`pipeline::Scene`]) that ping-pong through
//! offscreen targets and end on the surface. A [`instance::PipelineInstance`]
//! owns one such chain together with its media, dimensions and animation
//! clock, and recovers by itself from device loss.

pub mod animation;
pub mod capture;
pub mod config;
pub mod effect;
pub mod effects;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod instance;
pub mod media;
pub mod pipeline;
pub mod recovery;
pub mod registry;
pub mod shader;
pub mod utils;
pub mod video;

pub use error::{Result, VglError};
