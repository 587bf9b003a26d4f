//! GPU context and presentation backends for dma-buf sharing.
//!
//! This crate defines the [`GpuContextProvider`] and [`PresentationSurface`]
//! traits: the only things the handoff and update loop need from a GPU
//! context. Two implementations exist on Linux:
//!
//! - [`egl::EglProvider`]: headless EGL + desktop GL. Exports GL textures with
//!   `EGL_MESA_image_dma_buf_export` and imports them with
//!   `EGL_EXT_image_dma_buf_import`. Drawing goes through glium.
//! - [`shm::ShmProvider`]: memfd-backed images for machines without a
//!   dma-buf capable driver. Same sharing semantics, no GPU.

pub mod backend;
pub use backend::{GpuContextProvider, PresentationSurface};

// Platform-specific implementations.

#[cfg(target_os = "linux")]
pub mod egl;

#[cfg(target_os = "linux")]
pub mod shm;
