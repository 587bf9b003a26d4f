//! The one-time exchange that gives both processes the same image.

use dmabuf_core::{BufferMetadata, ExportError, ImportError, PixelQuad};
use gpu_interop::GpuContextProvider;
use rendezvous::{CancelToken, ChannelError, Connector, Listener};
use thiserror::Error;
use tracing::info;

use crate::config::{Role, ShareConfig};
use crate::export::export_for_sharing;
use crate::import::import_from_handle;

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("creating the shared image failed")]
    CreateImage(#[source] anyhow::Error),
    #[error("export step failed")]
    Export(#[from] ExportError),
    #[error("transport step failed")]
    Transport(#[from] ChannelError),
    #[error("import step failed")]
    Import(#[from] ImportError),
}

/// The image both sides hold after a successful handoff.
#[derive(Debug)]
pub struct SharedImage<I> {
    pub image: I,
    pub metadata: BufferMetadata,
}

/// Create the image, export it and hand it to the consumer.
///
/// Blocks until the consumer is listening or `cancel` fires. The sent
/// descriptor is closed before returning; the image stays alive.
pub fn run_producer<G: GpuContextProvider>(
    gpu: &mut G,
    config: &ShareConfig,
    cancel: &CancelToken,
) -> Result<SharedImage<G::Image>, HandoffError> {
    let image = gpu
        .create_image(config.extent, &PixelQuad::INITIAL)
        .map_err(HandoffError::CreateImage)?;
    let exported = export_for_sharing(gpu, &image)?;

    config.producer.remove_stale()?;
    let connection = Connector::bind(&config.producer)?.connect_until(
        &config.consumer,
        &config.retry,
        cancel,
    )?;
    connection.send_handle(&exported.handle, &exported.metadata)?;
    drop(connection);

    info!(metadata = %exported.metadata, "handed buffer to consumer");
    Ok(SharedImage {
        image,
        metadata: exported.metadata,
    })
}

/// Wait for the producer's handle and import it.
///
/// Accepting and receiving block without a timeout.
pub fn run_consumer<G: GpuContextProvider>(
    gpu: &mut G,
    config: &ShareConfig,
) -> Result<SharedImage<G::Image>, HandoffError> {
    config.consumer.remove_stale()?;
    let listener = Listener::bind(&config.consumer)?;
    let (handle, metadata) = listener.accept()?.receive_handle()?;
    drop(listener);

    let image = import_from_handle(gpu, handle, &metadata, config.extent)?;
    info!(%metadata, "imported buffer from producer");
    Ok(SharedImage { image, metadata })
}

/// Run the handoff for `role`.
pub fn run_role<G: GpuContextProvider>(
    gpu: &mut G,
    role: Role,
    config: &ShareConfig,
    cancel: &CancelToken,
) -> Result<SharedImage<G::Image>, HandoffError> {
    match role {
        Role::Producer => run_producer(gpu, config, cancel),
        Role::Consumer => run_consumer(gpu, config),
    }
}
