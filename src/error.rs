//! Error types shared by the stage tree, render targets and backends.
//!
//! Errors are split by how far they travel:
//!
//! - [`ContextError`] is raised by a [`GraphicsContext`](crate::GraphicsContext)
//!   when it cannot allocate or find a resource.
//! - [`BindError`] is raised when a material cannot be bound to a shader. Stages
//!   log it and skip the affected material group; it never leaves a frame.
//! - [`StageError`] is a configuration failure found while starting a stage. It
//!   aborts the start of that subtree and is returned to the engine caller.
//! - [`OptionsError`] covers reading and parsing [`EngineOptions`](crate::EngineOptions).

use thiserror::Error;

use crate::context::{ShaderId, TargetId};

/// Failure reported by a graphics backend.
#[derive(Debug, Error)]
pub enum ContextError {
    /// A target was requested with a zero width or height.
    #[error("render target '{label}' has a zero-sized dimension")]
    ZeroSize { label: String },
    /// The backend cannot attach that many color outputs to one target.
    #[error("render target '{label}' needs {requested} color attachments, device supports {max}")]
    TooManyAttachments {
        label: String,
        requested: usize,
        max: u32,
    },
    /// The target handle was never created by this context.
    #[error("unknown render target {0:?}")]
    UnknownTarget(TargetId),
    /// A shared depth attachment refers to a depth resource that does not exist.
    #[error("render target '{0}' shares a depth resource that does not exist")]
    UnknownDepth(String),
    /// The device or adapter could not be created.
    #[error("graphics device error: {0}")]
    Device(String),
}

/// Failure to bind a material's inputs to a shader.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BindError {
    /// The shader expects a sampler the material does not provide.
    #[error("shader {shader:?} expects sampler '{name}' which the material does not provide")]
    MissingBinding { shader: ShaderId, name: String },
    /// A sampler refers to a texture that was reallocated since it was taken.
    #[error("sampler '{name}' refers to a texture that has been reallocated")]
    StaleTexture { name: String },
    /// The shader handle is not known to the backend.
    #[error("unknown shader {0:?}")]
    UnknownShader(ShaderId),
}

/// Configuration failure while starting a stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// The backend has no program registered under this name.
    #[error("stage '{stage}' requires program '{program}', which the graphics context does not provide")]
    MissingProgram { stage: String, program: String },
    /// The stage must be nested inside another kind of stage.
    #[error("stage '{stage}' must be nested inside a {requires} stage")]
    MissingAncestor {
        stage: String,
        requires: &'static str,
    },
    /// A render target could not be allocated.
    #[error("stage '{stage}' could not allocate its render targets: {source}")]
    Target {
        stage: String,
        #[source]
        source: ContextError,
    },
}

impl StageError {
    /// Wraps a backend error with the name of the stage that hit it.
    pub fn target(stage: &str, source: ContextError) -> Self {
        StageError::Target {
            stage: stage.to_string(),
            source,
        }
    }
}

/// Failure to read engine options.
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("could not read options file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse options: {0}")]
    Parse(#[from] serde_json::Error),
}
