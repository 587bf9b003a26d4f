//! Transport errors.

use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// The address is still held, usually by a socket file a previous run
    /// did not clean up.
    #[error("address {} is already in use", .0.display())]
    AddressInUse(PathBuf),

    #[error("{} exists and is not a socket", .0.display())]
    NotASocket(PathBuf),

    /// The connect retry loop was stopped through its cancel token.
    #[error("connecting to {} was cancelled", .0.display())]
    Cancelled(PathBuf),

    /// The peer hung up before sending the handshake message.
    #[error("peer closed the channel before sending")]
    ChannelClosed,

    #[error("malformed handshake message: {0}")]
    MalformedPayload(String),

    /// The payload arrived without a descriptor attached.
    #[error("handshake message carried no buffer handle")]
    MissingHandle,

    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl ChannelError {
    pub(crate) fn errno(op: &'static str, errno: Errno) -> Self {
        Self::Io {
            op,
            source: io::Error::from(errno),
        }
    }

    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        Self::Io { op, source }
    }
}

/// Whether a failed `connect` only means the peer is not listening yet.
///
/// `ENOENT`: the peer's socket file does not exist yet. `ECONNREFUSED`: the
/// file exists but nobody is listening on it (stale, or bound but not yet in
/// `listen`). `EAGAIN`: the listen backlog is full. `EINTR`: interrupted.
pub fn is_peer_not_ready(errno: Errno) -> bool {
    matches!(
        errno,
        Errno::ENOENT | Errno::ECONNREFUSED | Errno::EAGAIN | Errno::EINTR
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_not_ready_errnos_are_retried() {
        assert!(is_peer_not_ready(Errno::ENOENT));
        assert!(is_peer_not_ready(Errno::ECONNREFUSED));
        assert!(!is_peer_not_ready(Errno::EACCES));
        assert!(!is_peer_not_ready(Errno::EPROTOTYPE));
        assert!(!is_peer_not_ready(Errno::ENAMETOOLONG));
    }
}
