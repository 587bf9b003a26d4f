//! Shared-memory backend.
//!
//! Runs the full export, handoff and import path without a GPU, on top of
//! `memfd` descriptors that travel over the rendezvous socket exactly like a
//! dma-buf does.

mod provider;

pub use provider::{ShmImage, ShmProvider, PITCH_ALIGN};
