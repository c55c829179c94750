//! Shared `/dev/null` descriptor

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use crate::error::{IoError, Result};

const DEV_NULL: &[u8] = b"/dev/null\0";

/// An open, read-write handle on `/dev/null`.
#[derive(Debug)]
pub struct NullFd {
    fd: OwnedFd,
}

impl NullFd {
    pub fn open() -> Result<Self> {
        let fd = unsafe {
            libc::open(DEV_NULL.as_ptr() as *const libc::c_char, libc::O_RDWR | libc::O_CLOEXEC)
        };
        if fd < 0 {
            return Err(IoError::last("open /dev/null"));
        }
        Ok(Self { fd: unsafe { OwnedFd::from_raw_fd(fd) } })
    }

    /// Point `target` at `/dev/null`.
    pub fn redirect(&self, target: RawFd) -> Result<()> {
        loop {
            if unsafe { libc::dup2(self.fd.as_raw_fd(), target) } >= 0 {
                return Ok(());
            }
            let err = IoError::last("dup2");
            if err.errno() != Some(nix::errno::Errno::EINTR) {
                return Err(err);
            }
        }
    }
}

impl AsFd for NullFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for NullFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Io;

    #[test]
    fn test_open_reads_eof() {
        let null = NullFd::open().unwrap();
        let mut b = [0u8; 4];
        let n = unsafe { libc::read(null.as_raw_fd(), b.as_mut_ptr() as *mut libc::c_void, 4) };
        assert_eq!(n, 0);
    }

    #[test]
    fn test_redirect_over_socket() {
        let null = NullFd::open().unwrap();
        let (a, b) = Io::pair().unwrap();
        null.redirect(a.fd()).unwrap();
        // `a` now refers to /dev/null, so the peer sees nothing
        a.write_all(b"gone").unwrap();
        b.set_nonblock(true).unwrap();
        let mut got = [0u8; 4];
        assert_eq!(b.read_some(&mut got).unwrap(), crate::io::ReadOutcome::Eof);
    }
}
