//! Export, import and GPU-state errors.

use std::fmt;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use thiserror::Error;

/// Converting a GPU image into a shareable handle failed.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The context or driver has no way to export images as dma-bufs.
    #[error("export unsupported: {0}")]
    Unsupported(String),
    /// The query or export call itself failed.
    #[error("export failed: {0}")]
    Failed(String),
}

impl ExportError {
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Building a GPU image from a received handle failed.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("import unsupported: {0}")]
    Unsupported(String),
    #[error("import failed: {0}")]
    Failed(String),
}

impl ImportError {
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Which layer reported a [`GpuError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuApi {
    Gl,
    Egl,
    /// The shared-memory backend; codes are `errno` values.
    Shm,
}

impl fmt::Display for GpuApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GpuApi::Gl => "GL",
            GpuApi::Egl => "EGL",
            GpuApi::Shm => "shm",
        })
    }
}

/// `glGetError` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum GlErrorCode {
    InvalidEnum = 0x0500,
    InvalidValue = 0x0501,
    InvalidOperation = 0x0502,
    StackOverflow = 0x0503,
    StackUnderflow = 0x0504,
    OutOfMemory = 0x0505,
    InvalidFramebufferOperation = 0x0506,
    ContextLost = 0x0507,
}

impl GlErrorCode {
    pub fn description(self) -> &'static str {
        match self {
            GlErrorCode::InvalidEnum => "invalid enum",
            GlErrorCode::InvalidValue => "invalid value",
            GlErrorCode::InvalidOperation => "invalid operation",
            GlErrorCode::StackOverflow => "stack overflow",
            GlErrorCode::StackUnderflow => "stack underflow",
            GlErrorCode::OutOfMemory => "out of memory",
            GlErrorCode::InvalidFramebufferOperation => "invalid framebuffer operation",
            GlErrorCode::ContextLost => "context lost",
        }
    }
}

/// A discrete error reported by the GPU context while the update loop runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{api} error {code:#06x} ({description})")]
pub struct GpuError {
    pub api: GpuApi,
    pub code: u32,
    pub description: String,
}

impl GpuError {
    pub fn new(api: GpuApi, code: u32, description: impl Into<String>) -> Self {
        Self {
            api,
            code,
            description: description.into(),
        }
    }

    /// Build from a `glGetError` value.
    pub fn gl(code: u32) -> Self {
        let description = GlErrorCode::from_u32(code)
            .map(GlErrorCode::description)
            .unwrap_or("unknown");
        Self::new(GpuApi::Gl, code, description)
    }
}
