//! Common interface to the GPU context used on either side of the handoff.

use anyhow::Result;
use dmabuf_core::{
    BufferMetadata, DmaBufHandle, ExportError, Extent, GpuError, ImportError, PixelQuad,
};

/// What the export path, import path and update loop need from a GPU context.
///
/// Implementations exist for EGL/GL (`egl`) and for shared memory (`shm`).
/// All calls happen on the thread that created the context.
pub trait GpuContextProvider {
    /// A GPU-resident image owned by this context.
    type Image;

    /// Create an image of `extent` with `pixels` in its top-left 2x2 corner.
    fn create_image(&mut self, extent: Extent, pixels: &PixelQuad) -> Result<Self::Image>;

    /// Force pending writes to complete before the memory is shared.
    fn flush(&mut self);

    /// Export `image` as a kernel handle plus plane-0 layout.
    ///
    /// The returned handle belongs to the caller and can be closed once it
    /// has been sent; the export stays valid.
    fn export_image(
        &mut self,
        image: &Self::Image,
    ) -> Result<(DmaBufHandle, BufferMetadata), ExportError>;

    /// Build an image in this context on top of foreign memory.
    ///
    /// The image takes its own reference to the buffer, so the caller closes
    /// `handle` right after this returns.
    fn import_image(
        &mut self,
        handle: &DmaBufHandle,
        metadata: &BufferMetadata,
        extent: Extent,
    ) -> Result<Self::Image, ImportError>;

    /// Write `pixels` into the top-left 2x2 corner of `image`.
    fn upload(&mut self, image: &Self::Image, pixels: &PixelQuad) -> Result<(), GpuError>;

    /// Read the top-left 2x2 corner of `image` back to the CPU.
    fn read_back(&mut self, image: &Self::Image) -> Result<PixelQuad, GpuError>;

    /// Take the pending error of the context, if any.
    fn poll_error(&mut self) -> Option<GpuError>;
}

/// A target the presenter draws the shared image to.
pub trait PresentationSurface: GpuContextProvider {
    /// Draw `image` as a textured quad into the back buffer.
    fn draw(&mut self, image: &Self::Image) -> Result<(), GpuError>;

    /// Show the back buffer.
    fn present(&mut self) -> Result<(), GpuError>;
}
