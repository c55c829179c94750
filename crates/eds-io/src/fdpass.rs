//! File descriptor passing
//!
//! Each transfer is one `sendmsg(2)` with a 4-byte big-endian `i32` payload.
//! A zero payload comes with exactly one descriptor in `SCM_RIGHTS`; a
//! non-zero payload is an errno value and carries no descriptor. A receiver
//! therefore sees either a valid fd or an error code, never both.

use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;

use nix::errno::Errno;

use crate::error::{IoError, Result};
use crate::io::{Io, Progress};

const PAYLOAD_LEN: usize = mem::size_of::<i32>();

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
        const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
    } else {
        const SEND_FLAGS: libc::c_int = 0;
        const RECV_FLAGS: libc::c_int = 0;
    }
}

/// What to hand the peer.
#[derive(Debug, Clone, Copy)]
pub enum PassFd<'a> {
    Fd(BorrowedFd<'a>),
    /// errno-style code in lieu of a descriptor. Must be non-zero.
    Err(i32),
}

/// What the peer handed us.
#[derive(Debug)]
pub enum Received {
    Fd(OwnedFd),
    Err(i32),
}

impl Received {
    /// Convert a remote error code into a `std::io::Error`.
    pub fn into_result(self) -> std::io::Result<OwnedFd> {
        match self {
            Received::Fd(fd) => Ok(fd),
            Received::Err(code) => Err(std::io::Error::from_raw_os_error(code)),
        }
    }
}

/// Control buffer large enough for one descriptor, aligned for `cmsghdr`.
#[repr(C)]
struct CmsgBuf {
    _align: [libc::cmsghdr; 0],
    bytes: [u8; 64],
}

impl CmsgBuf {
    fn new() -> Self {
        Self { _align: [], bytes: [0u8; 64] }
    }
}

/// Send one descriptor, or an error code in its place.
pub fn send_fd(io: &Io, what: PassFd<'_>) -> Result<Progress<()>> {
    let code: i32 = match what {
        PassFd::Fd(_) => 0,
        PassFd::Err(0) => return Err(IoError::BadFdMessage),
        PassFd::Err(code) => code,
    };
    let mut payload = code.to_be_bytes();
    let mut iov = libc::iovec {
        iov_base: payload.as_mut_ptr() as *mut libc::c_void,
        iov_len: PAYLOAD_LEN,
    };
    let mut cbuf = CmsgBuf::new();

    let mut hdr: libc::msghdr = unsafe { mem::zeroed() };
    hdr.msg_iov = &mut iov;
    hdr.msg_iovlen = 1;

    if let PassFd::Fd(fd) = what {
        let space = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) } as usize;
        debug_assert!(space <= cbuf.bytes.len());
        hdr.msg_control = cbuf.bytes.as_mut_ptr() as *mut libc::c_void;
        hdr.msg_controllen = space as _;
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&hdr);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<RawFd>() as u32) as _;
            ptr::write_unaligned(libc::CMSG_DATA(cmsg) as *mut RawFd, fd.as_raw_fd());
        }
    }

    loop {
        let n = unsafe { libc::sendmsg(io.fd(), &hdr, SEND_FLAGS) };
        if n >= 0 {
            // a 4-byte payload on a stream socket goes out whole or not at all
            return if n as usize == PAYLOAD_LEN {
                Ok(Progress::Done(()))
            } else {
                Err(IoError::BadFdMessage)
            };
        }
        match Errno::last() {
            Errno::EINTR => continue,
            e if e == Errno::EAGAIN || e == Errno::EWOULDBLOCK => return Ok(Progress::Again),
            e => return Err(IoError::os("sendmsg", e)),
        }
    }
}

/// Receive one descriptor or error code.
pub fn recv_fd(io: &Io) -> Result<Progress<Received>> {
    let mut payload = [0u8; PAYLOAD_LEN];
    let mut iov = libc::iovec {
        iov_base: payload.as_mut_ptr() as *mut libc::c_void,
        iov_len: PAYLOAD_LEN,
    };
    let mut cbuf = CmsgBuf::new();

    let mut hdr: libc::msghdr = unsafe { mem::zeroed() };
    hdr.msg_iov = &mut iov;
    hdr.msg_iovlen = 1;
    hdr.msg_control = cbuf.bytes.as_mut_ptr() as *mut libc::c_void;
    hdr.msg_controllen = cbuf.bytes.len() as _;

    let n = loop {
        let n = unsafe { libc::recvmsg(io.fd(), &mut hdr, RECV_FLAGS) };
        if n >= 0 {
            break n as usize;
        }
        match Errno::last() {
            Errno::EINTR => continue,
            e if e == Errno::EAGAIN || e == Errno::EWOULDBLOCK => return Ok(Progress::Again),
            e => return Err(IoError::os("recvmsg", e)),
        }
    };

    // collect every passed descriptor so none leak, keep the first
    let mut fds: Vec<OwnedFd> = Vec::new();
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&hdr);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg);
                let len = (*cmsg).cmsg_len as usize - (data as usize - cmsg as usize);
                for i in 0..len / mem::size_of::<RawFd>() {
                    let fd = ptr::read_unaligned((data as *const RawFd).add(i));
                    fds.push(OwnedFd::from_raw_fd(fd));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&hdr, cmsg);
        }
    }

    if n == 0 {
        return Err(IoError::PeerClosed);
    }
    if n != PAYLOAD_LEN || hdr.msg_flags & libc::MSG_CTRUNC != 0 {
        return Err(IoError::BadFdMessage);
    }

    let code = i32::from_be_bytes(payload);
    if fds.len() > 1 || (code != 0 && !fds.is_empty()) {
        tracing::debug!(code, passed = fds.len(), "closing surplus passed descriptors");
    }
    let mut fds = fds.into_iter();
    match (code, fds.next()) {
        (0, Some(fd)) => Ok(Progress::Done(Received::Fd(fd))),
        (0, None) => Err(IoError::BadFdMessage),
        (code, _) => Ok(Progress::Done(Received::Err(code))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsFd;

    fn identity(fd: RawFd) -> (libc::dev_t, libc::ino_t) {
        let mut st: libc::stat = unsafe { mem::zeroed() };
        assert_eq!(unsafe { libc::fstat(fd, &mut st) }, 0);
        (st.st_dev, st.st_ino)
    }

    #[test]
    fn test_pass_fd_same_file() {
        let (a, b) = Io::pair().unwrap();
        let file = tempfile::tempfile().unwrap();
        let sent = send_fd(&a, PassFd::Fd(file.as_fd())).unwrap();
        assert_eq!(sent, Progress::Done(()));

        let got = match recv_fd(&b).unwrap() {
            Progress::Done(Received::Fd(fd)) => fd,
            other => panic!("unexpected {:?}", other),
        };
        assert_ne!(got.as_raw_fd(), file.as_raw_fd());
        assert_eq!(identity(got.as_raw_fd()), identity(file.as_raw_fd()));
    }

    #[test]
    fn test_pass_error_code() {
        let (a, b) = Io::pair().unwrap();
        send_fd(&a, PassFd::Err(libc::ECONNREFUSED)).unwrap();
        match recv_fd(&b).unwrap() {
            Progress::Done(Received::Err(code)) => assert_eq!(code, libc::ECONNREFUSED),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_zero_error_code_rejected() {
        let (a, _b) = Io::pair().unwrap();
        assert!(matches!(send_fd(&a, PassFd::Err(0)), Err(IoError::BadFdMessage)));
    }

    #[test]
    fn test_recv_nonblocking_again() {
        let (_a, b) = Io::pair().unwrap();
        b.set_nonblock(true).unwrap();
        assert!(recv_fd(&b).unwrap().is_again());
    }

    #[test]
    fn test_recv_peer_closed() {
        let (a, b) = Io::pair().unwrap();
        drop(a);
        assert!(matches!(recv_fd(&b), Err(IoError::PeerClosed)));
    }

    #[test]
    fn test_plain_bytes_without_fd_rejected() {
        let (a, b) = Io::pair().unwrap();
        a.write_all(&0i32.to_be_bytes()).unwrap();
        assert!(matches!(recv_fd(&b), Err(IoError::BadFdMessage)));
    }

    #[test]
    fn test_into_result() {
        let err = Received::Err(libc::ENOENT).into_result().unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }
}
