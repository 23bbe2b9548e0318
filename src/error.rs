//! Library error type.

use crate::shader::ShaderStage;
use thiserror::Error;

/// Errors surfaced while building or configuring a pipeline.
///
/// Device loss never shows up here; it is handled by the recovery state
/// machine in [`crate::instance`].
#[derive(Debug, Error)]
pub enum VglError {
    #[error("effect list is empty")]
    EmptyEffectList,

    #[error("surface did not provide a rendering context")]
    ContextUnavailable,

    #[error("{stage} shader failed to compile: {log}")]
    ShaderCompile { stage: ShaderStage, log: String },

    #[error("program failed to link: {log}")]
    ProgramLink { log: String },

    #[error("invalid effect descriptor: {0}")]
    InvalidDescriptor(String),
}

pub type Result<T> = std::result::Result<T, VglError>;
