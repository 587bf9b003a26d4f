//! Listener, connector and the single-message connection.

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use dmabuf_core::{BufferMetadata, DmaBufHandle};
use nix::errno::Errno;
use nix::sys::socket::{
    accept4, bind, connect, listen, recvmsg, sendmsg, socket, AddressFamily, Backlog,
    ControlMessage, ControlMessageOwned, MsgFlags, SockFlag, SockType,
};
use tracing::{debug, trace, warn};

use crate::endpoint::{BoundPath, Endpoint};
use crate::error::{is_peer_not_ready, ChannelError};
use crate::retry::{CancelToken, RetryPolicy};

// ---------------------------------------------------------------------------
// Socket helpers
// ---------------------------------------------------------------------------

fn seqpacket_socket() -> Result<OwnedFd, ChannelError> {
    socket(
        AddressFamily::Unix,
        SockType::SeqPacket,
        SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(|e| ChannelError::errno("socket", e))
}

/// Create a socket bound to `endpoint`. The returned guard unlinks the path
/// on drop.
fn bind_endpoint(endpoint: &Endpoint) -> Result<(OwnedFd, BoundPath), ChannelError> {
    let fd = seqpacket_socket()?;
    let addr = endpoint.addr()?;
    match bind(fd.as_raw_fd(), &addr) {
        Ok(()) => {}
        Err(Errno::EADDRINUSE) => {
            return Err(ChannelError::AddressInUse(endpoint.path().to_path_buf()))
        }
        Err(e) => return Err(ChannelError::errno("bind", e)),
    }
    debug!(path = %endpoint.path().display(), "bound socket");
    Ok((fd, BoundPath::new(endpoint.clone())))
}

// ---------------------------------------------------------------------------
// Listener (consumer side)
// ---------------------------------------------------------------------------

/// The consumer's listening socket.
#[derive(Debug)]
pub struct Listener {
    fd: OwnedFd,
    path: BoundPath,
}

impl Listener {
    /// Bind and listen on `endpoint`.
    ///
    /// Fails with [`ChannelError::AddressInUse`] if a socket file is already
    /// present; call [`Endpoint::remove_stale`] first to reclaim it.
    pub fn bind(endpoint: &Endpoint) -> Result<Self, ChannelError> {
        let (fd, path) = bind_endpoint(endpoint)?;
        let backlog = Backlog::new(1).map_err(|e| ChannelError::errno("listen", e))?;
        listen(&fd, backlog).map_err(|e| ChannelError::errno("listen", e))?;
        Ok(Self { fd, path })
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.path.endpoint()
    }

    /// Block until a peer connects. No timeout.
    pub fn accept(&self) -> Result<Connection, ChannelError> {
        loop {
            match accept4(self.fd.as_raw_fd(), SockFlag::SOCK_CLOEXEC) {
                Ok(raw) => {
                    debug!(path = %self.endpoint().path().display(), "accepted peer");
                    // SAFETY: accept4 just returned this descriptor and nothing
                    // else owns it.
                    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
                    return Ok(Connection { fd, _local: None });
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(ChannelError::errno("accept", e)),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Connector (producer side)
// ---------------------------------------------------------------------------

/// The producer's socket, bound to its own endpoint, not yet connected.
#[derive(Debug)]
pub struct Connector {
    fd: OwnedFd,
    path: BoundPath,
}

impl Connector {
    pub fn bind(endpoint: &Endpoint) -> Result<Self, ChannelError> {
        let (fd, path) = bind_endpoint(endpoint)?;
        Ok(Self { fd, path })
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.path.endpoint()
    }

    /// Connect to `peer`, retrying for as long as the peer is not listening.
    ///
    /// Errors that only mean "not ready yet" are retried after the next
    /// backoff delay; any other error is returned immediately. The loop has
    /// no deadline and ends only on success, on a fatal error, or when
    /// `cancel` fires ([`ChannelError::Cancelled`]).
    pub fn connect_until(
        self,
        peer: &Endpoint,
        policy: &RetryPolicy,
        cancel: &CancelToken,
    ) -> Result<Connection, ChannelError> {
        let addr = peer.addr()?;
        let mut backoff = policy.backoff();
        let mut attempts: u64 = 0;
        let mut interrupted = false;
        loop {
            if cancel.is_cancelled() {
                return Err(ChannelError::Cancelled(peer.path().to_path_buf()));
            }
            attempts += 1;
            let result = connect(self.fd.as_raw_fd(), &addr);
            match settle_connect(result, interrupted) {
                Ok(()) => {
                    debug!(peer = %peer.path().display(), attempts, "connected");
                    return Ok(Connection {
                        fd: self.fd,
                        _local: Some(self.path),
                    });
                }
                Err(e) if is_peer_not_ready(e) || (interrupted && e == Errno::EALREADY) => {
                    interrupted |= e == Errno::EINTR;
                    let delay = backoff.next().unwrap_or(policy.max);
                    trace!(peer = %peer.path().display(), attempts, ?delay, "peer not ready: {e}");
                    if !cancel.sleep(delay) {
                        return Err(ChannelError::Cancelled(peer.path().to_path_buf()));
                    }
                }
                Err(e) => return Err(ChannelError::errno("connect", e)),
            }
        }
    }
}

/// An interrupted `connect` keeps going in the kernel, so a repeated call
/// may report `EALREADY` while it is still pending and `EISCONN` once it has
/// completed. The latter is a success.
fn settle_connect(result: nix::Result<()>, interrupted: bool) -> nix::Result<()> {
    match result {
        Err(Errno::EISCONN) if interrupted => Ok(()),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A connected socket that carries exactly one handshake message.
///
/// Dropping it closes the socket (and unlinks the producer's endpoint).
#[derive(Debug)]
pub struct Connection {
    fd: OwnedFd,
    _local: Option<BoundPath>,
}

impl Connection {
    /// Send `metadata` as payload and `handle` as `SCM_RIGHTS` in one
    /// message.
    ///
    /// The kernel installs a duplicate of the descriptor in the receiver, so
    /// the caller may close `handle` as soon as this returns.
    pub fn send_handle(
        &self,
        handle: &DmaBufHandle,
        metadata: &BufferMetadata,
    ) -> Result<(), ChannelError> {
        let payload = metadata.encode();
        let iov = [IoSlice::new(&payload)];
        let fds: [RawFd; 1] = [handle.as_raw_fd()];
        let cmsgs = [ControlMessage::ScmRights(&fds)];

        loop {
            match sendmsg::<()>(
                self.fd.as_raw_fd(),
                &iov,
                &cmsgs,
                MsgFlags::MSG_NOSIGNAL,
                None,
            ) {
                Ok(n) if n == payload.len() => {
                    debug!(%metadata, "sent buffer handle");
                    return Ok(());
                }
                Ok(n) => {
                    return Err(ChannelError::MalformedPayload(format!(
                        "short send: {n} of {} bytes",
                        payload.len()
                    )))
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::EPIPE) | Err(Errno::ECONNRESET) => {
                    return Err(ChannelError::ChannelClosed)
                }
                Err(e) => return Err(ChannelError::errno("sendmsg", e)),
            }
        }
    }

    /// Block until the handshake message arrives.
    ///
    /// Either the full record and its descriptor are returned, or an error;
    /// descriptors that arrive with an invalid message are closed.
    pub fn receive_handle(&self) -> Result<(DmaBufHandle, BufferMetadata), ChannelError> {
        // One spare byte so an oversized message shows up as a size mismatch
        // even if the kernel does not flag truncation.
        let mut buf = [0u8; BufferMetadata::WIRE_SIZE + 1];
        let mut cmsg_space = nix::cmsg_space!([RawFd; 1]);

        let (bytes, flags, mut fds) = loop {
            let mut iov = [IoSliceMut::new(&mut buf)];
            let msg = match recvmsg::<()>(
                self.fd.as_raw_fd(),
                &mut iov,
                Some(&mut cmsg_space),
                MsgFlags::MSG_CMSG_CLOEXEC,
            ) {
                Ok(msg) => msg,
                Err(Errno::EINTR) => continue,
                Err(Errno::ECONNRESET) => return Err(ChannelError::ChannelClosed),
                Err(e) => return Err(ChannelError::errno("recvmsg", e)),
            };

            let mut fds = Vec::new();
            let cmsgs = msg
                .cmsgs()
                .map_err(|e| ChannelError::errno("recvmsg control data", e))?;
            for cmsg in cmsgs {
                match cmsg {
                    ControlMessageOwned::ScmRights(raw) => {
                        for fd in raw {
                            // SAFETY: the kernel just installed this descriptor
                            // for us and nothing else refers to it.
                            fds.push(unsafe { OwnedFd::from_raw_fd(fd) });
                        }
                    }
                    other => warn!("ignoring unexpected control message: {other:?}"),
                }
            }
            break (msg.bytes, msg.flags, fds);
        };

        if bytes == 0 && fds.is_empty() {
            return Err(ChannelError::ChannelClosed);
        }
        if flags.intersects(MsgFlags::MSG_TRUNC | MsgFlags::MSG_CTRUNC) {
            return Err(ChannelError::MalformedPayload(format!(
                "message truncated ({flags:?})"
            )));
        }
        let metadata = BufferMetadata::decode(&buf[..bytes])
            .map_err(|e| ChannelError::MalformedPayload(e.to_string()))?;
        let fd = match fds.len() {
            0 => return Err(ChannelError::MissingHandle),
            1 => fds.remove(0),
            n => {
                return Err(ChannelError::MalformedPayload(format!(
                    "expected one descriptor, got {n}"
                )))
            }
        };

        debug!(%metadata, fd = fd.as_raw_fd(), "received buffer handle");
        Ok((DmaBufHandle::from(fd), metadata))
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
