//! One-shot local socket rendezvous for passing a dma-buf between processes.
//!
//! The consumer binds a [`Listener`] on its [`Endpoint`] and waits in
//! [`Listener::accept`]. The producer binds a [`Connector`] on its own
//! endpoint and calls [`Connector::connect_until`], which keeps retrying with
//! capped exponential backoff until the consumer is listening or the
//! [`CancelToken`] fires. Exactly one message then crosses the resulting
//! [`Connection`]: the 12-byte [`BufferMetadata`](dmabuf_core::BufferMetadata)
//! as payload and the descriptor as `SCM_RIGHTS` ancillary data.
//!
//! The sockets are `SOCK_SEQPACKET`, so the payload and the descriptor are
//! delivered together or not at all.

pub mod channel;
pub mod endpoint;
pub mod error;
pub mod retry;

pub use channel::{Connection, Connector, Listener};
pub use endpoint::Endpoint;
pub use error::ChannelError;
pub use retry::{Backoff, CancelToken, RetryPolicy};
