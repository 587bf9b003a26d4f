//! Producer side: turn a GPU image into a handle plus layout.

use dmabuf_core::{BufferMetadata, DmaBufHandle, ExportError};
use gpu_interop::GpuContextProvider;
use tracing::debug;

/// A handle ready to be sent, with the layout the importer needs.
///
/// Dropping it closes the exporter's copy of the descriptor. The image
/// itself stays shareable.
#[derive(Debug)]
pub struct ExportedBuffer {
    pub handle: DmaBufHandle,
    pub metadata: BufferMetadata,
}

/// Flush pending GPU writes to `image`, then export it.
///
/// The flush makes sure the importer never sees the image before its
/// initial contents have landed.
pub fn export_for_sharing<G: GpuContextProvider>(
    gpu: &mut G,
    image: &G::Image,
) -> Result<ExportedBuffer, ExportError> {
    gpu.flush();
    let (handle, metadata) = gpu.export_image(image)?;
    debug!(%metadata, ?handle, "image exported");
    Ok(ExportedBuffer { handle, metadata })
}
