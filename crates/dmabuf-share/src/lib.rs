//! Share one GPU image between two processes as a dma-buf.
//!
//! The producer allocates the image, exports it and sends the descriptor with
//! its [`BufferMetadata`](dmabuf_core::BufferMetadata) over a local socket.
//! The consumer imports it into its own GPU context. From then on both run an
//! [`UpdateLoop`](update_loop::UpdateLoop): one side writes a rotating 2x2
//! pixel pattern into the shared memory, the other keeps presenting it.

pub mod config;
pub mod export;
pub mod handoff;
pub mod import;
pub mod logging;
pub mod update_loop;

use gpu_interop::PresentationSurface;
use rendezvous::CancelToken;
use tracing::info;

pub use config::{Duty, Role, ShareConfig, WriterPolicy};
pub use export::{export_for_sharing, ExportedBuffer};
pub use handoff::{run_consumer, run_producer, run_role, HandoffError, SharedImage};
pub use import::import_from_handle;
pub use update_loop::{LoopState, UpdateLoop};

/// Hand off the image for `role`, then run its update loop to the end.
pub fn run_session<G: PresentationSurface>(
    gpu: &mut G,
    role: Role,
    config: &ShareConfig,
    cancel: &CancelToken,
) -> Result<LoopState, HandoffError> {
    let shared = run_role(gpu, role, config, cancel)?;
    let duty = config.role_duty(role);
    info!(%role, ?duty, "starting update loop");
    let mut update = UpdateLoop::new(gpu, &shared.image, duty, config);
    Ok(update.run(cancel).clone())
}
