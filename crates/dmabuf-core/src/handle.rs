//! Owned kernel buffer descriptors.

use std::fmt;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

/// A dma-buf file descriptor owned by this process.
///
/// This is a kernel object, not a GPU object name: it is only meaningful in
/// the process that holds it and must cross a process boundary through the
/// socket's fd-passing facility. Dropping the handle closes this process's
/// descriptor; other duplicates and GPU-side imports keep the memory alive.
pub struct DmaBufHandle {
    fd: OwnedFd,
}

impl DmaBufHandle {
    /// Duplicate the descriptor. Both copies refer to the same buffer and can
    /// be closed independently.
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            fd: self.fd.try_clone()?,
        })
    }

    pub fn into_owned_fd(self) -> OwnedFd {
        self.fd
    }
}

impl From<OwnedFd> for DmaBufHandle {
    fn from(fd: OwnedFd) -> Self {
        Self { fd }
    }
}

impl AsFd for DmaBufHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for DmaBufHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl fmt::Debug for DmaBufHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DmaBufHandle").field(&self.fd.as_raw_fd()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{Read, Seek, SeekFrom, Write};

    #[test]
    fn clones_outlive_the_original() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"shared").unwrap();

        let original = DmaBufHandle::from(OwnedFd::from(file));
        let copy = original.try_clone().unwrap();
        assert_ne!(original.as_raw_fd(), copy.as_raw_fd());
        drop(original);

        let mut file = File::from(copy.into_owned_fd());
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = String::new();
        file.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "shared");
    }
}
