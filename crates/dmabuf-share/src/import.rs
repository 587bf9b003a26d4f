//! Consumer side: bind a received handle into the local GPU context.

use dmabuf_core::{BufferMetadata, DmaBufHandle, Extent, ImportError};
use gpu_interop::GpuContextProvider;
use tracing::debug;

/// Import `handle` as an image of `extent` with the given layout.
///
/// The handle is consumed: it is closed when this returns, whether the
/// import worked or not. A successful import holds its own reference to the
/// memory.
pub fn import_from_handle<G: GpuContextProvider>(
    gpu: &mut G,
    handle: DmaBufHandle,
    metadata: &BufferMetadata,
    extent: Extent,
) -> Result<G::Image, ImportError> {
    let image = gpu.import_image(&handle, metadata, extent);
    debug!(?handle, ok = image.is_ok(), "closing received handle");
    drop(handle);
    image
}
