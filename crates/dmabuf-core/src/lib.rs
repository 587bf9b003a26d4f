//! Shared types for the dma-buf handoff between a producer and a consumer.
//!
//! Everything that crosses the process boundary, or that both sides must
//! agree on, lives here:
//!
//! - [`BufferMetadata`] is the fixed-layout record sent next to the handle.
//! - [`DmaBufHandle`] owns a kernel buffer descriptor.
//! - [`PixelQuad`] is the 2x2 color buffer the update loop mutates.
//! - [`error`] holds the export/import/GPU error taxonomy.

pub mod bytes;
pub mod error;
pub mod handle;
pub mod metadata;
pub mod pixels;

pub use bytes::AsBytes;
pub use error::{ExportError, GlErrorCode, GpuApi, GpuError, ImportError};
pub use handle::DmaBufHandle;
pub use metadata::{BufferMetadata, Extent, FourCc, InvalidMetadata};
pub use pixels::PixelQuad;
