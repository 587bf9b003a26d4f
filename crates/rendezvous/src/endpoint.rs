//! Filesystem addresses for the two sides of the rendezvous.

use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use nix::sys::socket::UnixAddr;
use tracing::{debug, warn};

use crate::error::ChannelError;

/// Path of a Unix socket owned by one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    path: PathBuf,
}

impl Endpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove a socket file left behind by an earlier run.
    ///
    /// Returns `true` if a file was removed. Refuses to delete anything that
    /// is not a socket.
    pub fn remove_stale(&self) -> Result<bool, ChannelError> {
        match fs::symlink_metadata(&self.path) {
            Ok(meta) if meta.file_type().is_socket() => {
                fs::remove_file(&self.path).map_err(|e| ChannelError::io("remove stale socket", e))?;
                debug!(path = %self.path.display(), "removed stale socket");
                Ok(true)
            }
            Ok(_) => Err(ChannelError::NotASocket(self.path.clone())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ChannelError::io("stat socket path", e)),
        }
    }

    pub(crate) fn addr(&self) -> Result<UnixAddr, ChannelError> {
        UnixAddr::new(&self.path).map_err(|e| ChannelError::errno("socket address", e))
    }
}

/// Unlinks the socket file of a bound endpoint when dropped.
#[derive(Debug)]
pub(crate) struct BoundPath(Endpoint);

impl BoundPath {
    pub(crate) fn new(endpoint: Endpoint) -> Self {
        Self(endpoint)
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.0
    }
}

impl Drop for BoundPath {
    fn drop(&mut self) {
        match fs::remove_file(self.0.path()) {
            Ok(()) => debug!(path = %self.0.path().display(), "unlinked socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.0.path().display(), "failed to unlink socket: {e}"),
        }
    }
}
