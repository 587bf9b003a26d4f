//! Runtime configuration shared by both roles.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use dmabuf_core::{Extent, PixelQuad};
use rendezvous::{Endpoint, RetryPolicy};

/// Environment variable that overrides the socket directory.
pub const SOCKET_DIR_ENV: &str = "DMABUF_SHARE_SOCKET_DIR";

const PRODUCER_SOCKET: &str = "dmabuf-share-producer.sock";
const CONSUMER_SOCKET: &str = "dmabuf-share-consumer.sock";

/// Which side of the handoff a process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Allocates and exports the image, then connects to the consumer.
    Producer,
    /// Listens, receives the handle and imports it.
    Consumer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Producer => "producer",
            Role::Consumer => "consumer",
        })
    }
}

/// Which role rotates and uploads the pixels after the handoff.
///
/// Both processes must be started with the same policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum WriterPolicy {
    #[default]
    Consumer,
    Producer,
}

impl WriterPolicy {
    pub fn writer(self) -> Role {
        match self {
            WriterPolicy::Consumer => Role::Consumer,
            WriterPolicy::Producer => Role::Producer,
        }
    }
}

/// What a role does on every tick of the update loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duty {
    /// Rotate `pixels` and upload them into the shared image.
    Writer { pixels: PixelQuad },
    /// Draw the shared image and present it.
    Presenter,
}

#[derive(Debug, Clone)]
pub struct ShareConfig {
    pub producer: Endpoint,
    pub consumer: Endpoint,
    /// Dimensions of the shared image, known to both sides in advance.
    pub extent: Extent,
    pub tick_interval: Duration,
    /// Sleep between checks of the tick deadline.
    pub idle_interval: Duration,
    pub writer: WriterPolicy,
    pub retry: RetryPolicy,
    /// Stop cleanly after this many ticks. Runs forever if `None`.
    pub max_ticks: Option<u64>,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self::in_dir(std::env::temp_dir())
    }
}

impl ShareConfig {
    /// Reference configuration with both sockets placed in `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            producer: Endpoint::new(dir.join(PRODUCER_SOCKET)),
            consumer: Endpoint::new(dir.join(CONSUMER_SOCKET)),
            extent: PixelQuad::EXTENT,
            tick_interval: Duration::from_secs(1),
            idle_interval: Duration::from_millis(1),
            writer: WriterPolicy::default(),
            retry: RetryPolicy::default(),
            max_ticks: None,
        }
    }

    /// Directory from `DMABUF_SHARE_SOCKET_DIR`, or the system temp dir.
    pub fn default_socket_dir() -> PathBuf {
        std::env::var_os(SOCKET_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn role_duty(&self, role: Role) -> Duty {
        if self.writer.writer() == role {
            Duty::Writer {
                pixels: PixelQuad::INITIAL,
            }
        } else {
            Duty::Presenter
        }
    }

    /// Endpoint bound by `role`.
    pub fn endpoint(&self, role: Role) -> &Endpoint {
        match role {
            Role::Producer => &self.producer,
            Role::Consumer => &self.consumer,
        }
    }
}
