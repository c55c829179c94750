//! # File descriptor I/O over UNIX domain sockets
//!
//! `Io` owns one descriptor and offers two families of calls:
//!
//! - blocking helpers (`write_all`, `read_full`) that retry on EINTR and never
//!   return a short count on success;
//! - single-shot calls (`write_some`, `read_some`, `read_buf`) for
//!   non-blocking descriptors, which report "would block" as a value rather
//!   than an error.
//!
//! ```ignore
//! let listener = Io::listen_unix("/var/run/eds/echo.sock", 128)?;
//! listener.set_nonblock(true)?;
//! if let Some(cli) = listener.accept()? {
//!     cli.set_nonblock(true)?;
//!     match cli.read_buf(&mut buf)? {
//!         ReadOutcome::Data(n) => { /* parse */ }
//!         ReadOutcome::Again => { /* wait for readability */ }
//!         ReadOutcome::Eof => { /* peer closed */ }
//!     }
//! }
//! ```

use std::ffi::CString;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::Duration;

use nix::errno::Errno;

use eds_core::Buffer;

use crate::error::{IoError, Result};

/// Bytes reserved per `read_buf` call.
pub const READ_CHUNK: usize = 4096;

/// Default listen backlog.
pub const DEFAULT_BACKLOG: i32 = 128;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
        const SOCK_FLAGS: libc::c_int = libc::SOCK_CLOEXEC;

        unsafe fn raw_accept(fd: RawFd) -> RawFd {
            libc::accept4(fd, std::ptr::null_mut(), std::ptr::null_mut(), libc::SOCK_CLOEXEC)
        }

        #[inline]
        fn finish_cloexec(_fd: RawFd) -> Result<()> {
            Ok(())
        }
    } else {
        const SEND_FLAGS: libc::c_int = 0;
        const SOCK_FLAGS: libc::c_int = 0;

        unsafe fn raw_accept(fd: RawFd) -> RawFd {
            libc::accept(fd, std::ptr::null_mut(), std::ptr::null_mut())
        }

        fn finish_cloexec(fd: RawFd) -> Result<()> {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
            if flags < 0 || unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
                return Err(IoError::last("fcntl"));
            }
            Ok(())
        }
    }
}

/// Result of a call that may hit EAGAIN.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress<T> {
    Done(T),
    Again,
}

impl<T> Progress<T> {
    #[inline]
    pub fn is_again(&self) -> bool {
        matches!(self, Progress::Again)
    }
}

/// Result of one non-blocking read.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(usize),
    Again,
    /// Zero-byte read: the peer closed its end.
    Eof,
}

#[inline]
fn would_block(errno: Errno) -> bool {
    errno == Errno::EAGAIN || errno == Errno::EWOULDBLOCK
}

fn unix_socket() -> Result<OwnedFd> {
    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM | SOCK_FLAGS, 0) };
    if fd < 0 {
        return Err(IoError::last("socket"));
    }
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    finish_cloexec(owned.as_raw_fd())?;
    Ok(owned)
}

fn unix_addr(path: &Path) -> Result<(libc::sockaddr_un, libc::socklen_t)> {
    let bytes = path.as_os_str().as_bytes();
    let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
    if bytes.is_empty() || bytes.len() >= addr.sun_path.len() || bytes.contains(&0) {
        return Err(IoError::BadPath(path.display().to_string()));
    }

    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }
    let len = mem::size_of::<libc::sa_family_t>() + bytes.len() + 1;
    Ok((addr, len as libc::socklen_t))
}

/// An owned descriptor with socket helpers.
#[derive(Debug)]
pub struct Io {
    fd: OwnedFd,
}

impl Io {
    pub fn from_owned(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// # Safety
    /// `fd` must be open and owned by nobody else.
    pub unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Self { fd: OwnedFd::from_raw_fd(fd) }
    }

    pub fn into_owned(self) -> OwnedFd {
        self.fd
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    // ── Setup ──

    /// Connect a stream socket to `path`.
    pub fn connect_unix(path: impl AsRef<Path>) -> Result<Io> {
        let (addr, len) = unix_addr(path.as_ref())?;
        let fd = unix_socket()?;
        loop {
            let ret = unsafe {
                libc::connect(fd.as_raw_fd(), &addr as *const _ as *const libc::sockaddr, len)
            };
            if ret == 0 {
                return Ok(Io { fd });
            }
            let errno = Errno::last();
            if errno != Errno::EINTR {
                return Err(IoError::os("connect", errno));
            }
        }
    }

    /// Bind and listen on `path`, removing a stale socket file first.
    pub fn listen_unix(path: impl AsRef<Path>, backlog: i32) -> Result<Io> {
        let path = path.as_ref();
        let (addr, len) = unix_addr(path)?;
        let cpath = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| IoError::BadPath(path.display().to_string()))?;
        if unsafe { libc::unlink(cpath.as_ptr()) } < 0 {
            let errno = Errno::last();
            if errno != Errno::ENOENT {
                return Err(IoError::os("unlink", errno));
            }
        }

        let fd = unix_socket()?;
        let ret = unsafe {
            libc::bind(fd.as_raw_fd(), &addr as *const _ as *const libc::sockaddr, len)
        };
        if ret < 0 {
            return Err(IoError::last("bind"));
        }
        if unsafe { libc::listen(fd.as_raw_fd(), backlog) } < 0 {
            return Err(IoError::last("listen"));
        }
        Ok(Io { fd })
    }

    /// Accept one connection. `None` when nothing is pending or the attempt
    /// was aborted or interrupted.
    pub fn accept(&self) -> Result<Option<Io>> {
        let fd = unsafe { raw_accept(self.fd()) };
        if fd < 0 {
            let errno = Errno::last();
            if would_block(errno) || errno == Errno::ECONNABORTED || errno == Errno::EINTR {
                return Ok(None);
            }
            return Err(IoError::os("accept", errno));
        }
        let io = unsafe { Io::from_raw_fd(fd) };
        finish_cloexec(io.fd())?;
        Ok(Some(io))
    }

    /// Connected stream socket pair.
    pub fn pair() -> Result<(Io, Io)> {
        let mut fds = [-1 as RawFd; 2];
        let ty = libc::SOCK_STREAM | SOCK_FLAGS;
        if unsafe { libc::socketpair(libc::AF_UNIX, ty, 0, fds.as_mut_ptr()) } < 0 {
            return Err(IoError::last("socketpair"));
        }
        let (a, b) = unsafe { (Io::from_raw_fd(fds[0]), Io::from_raw_fd(fds[1])) };
        finish_cloexec(a.fd())?;
        finish_cloexec(b.fd())?;
        Ok((a, b))
    }

    /// Duplicate the descriptor (close-on-exec).
    pub fn try_clone(&self) -> Result<Io> {
        let fd = unsafe { libc::fcntl(self.fd(), libc::F_DUPFD_CLOEXEC, 0) };
        if fd < 0 {
            return Err(IoError::last("dup"));
        }
        Ok(unsafe { Io::from_raw_fd(fd) })
    }

    pub fn set_nonblock(&self, on: bool) -> Result<()> {
        let flags = unsafe { libc::fcntl(self.fd(), libc::F_GETFL) };
        if flags < 0 {
            return Err(IoError::last("fcntl"));
        }
        let next = if on { flags | libc::O_NONBLOCK } else { flags & !libc::O_NONBLOCK };
        if next != flags && unsafe { libc::fcntl(self.fd(), libc::F_SETFL, next) } < 0 {
            return Err(IoError::last("fcntl"));
        }
        Ok(())
    }

    pub fn is_nonblock(&self) -> Result<bool> {
        let flags = unsafe { libc::fcntl(self.fd(), libc::F_GETFL) };
        if flags < 0 {
            return Err(IoError::last("fcntl"));
        }
        Ok(flags & libc::O_NONBLOCK != 0)
    }

    // ── Blocking helpers ──

    /// Write all of `data`, retrying on EINTR.
    pub fn write_all(&self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = unsafe { libc::write(self.fd(), data.as_ptr() as *const libc::c_void, data.len()) };
            if n < 0 {
                let errno = Errno::last();
                if errno == Errno::EINTR {
                    continue;
                }
                return Err(IoError::os("write", errno));
            }
            data = &data[n as usize..];
        }
        Ok(())
    }

    /// Fill `buf` completely, retrying on EINTR. A zero-byte read before the
    /// buffer is full is `UnexpectedEof`.
    pub fn read_full(&self, buf: &mut [u8]) -> Result<()> {
        let mut off = 0;
        while off < buf.len() {
            let rest = &mut buf[off..];
            let n = unsafe { libc::read(self.fd(), rest.as_mut_ptr() as *mut libc::c_void, rest.len()) };
            if n < 0 {
                let errno = Errno::last();
                if errno == Errno::EINTR {
                    continue;
                }
                return Err(IoError::os("read", errno));
            }
            if n == 0 {
                return Err(IoError::UnexpectedEof);
            }
            off += n as usize;
        }
        Ok(())
    }

    // ── Single-shot calls ──

    /// One write attempt. Sockets are written with `MSG_NOSIGNAL` where
    /// available so a vanished peer shows up as EPIPE.
    pub fn write_some(&self, data: &[u8]) -> Result<Progress<usize>> {
        loop {
            let mut n = unsafe {
                libc::send(self.fd(), data.as_ptr() as *const libc::c_void, data.len(), SEND_FLAGS)
            };
            if n < 0 && Errno::last() == Errno::ENOTSOCK {
                n = unsafe { libc::write(self.fd(), data.as_ptr() as *const libc::c_void, data.len()) };
            }
            if n >= 0 {
                return Ok(Progress::Done(n as usize));
            }
            let errno = Errno::last();
            match errno {
                Errno::EINTR => continue,
                e if would_block(e) => return Ok(Progress::Again),
                e => return Err(IoError::os("write", e)),
            }
        }
    }

    /// One read attempt into `buf`.
    pub fn read_some(&self, buf: &mut [u8]) -> Result<ReadOutcome> {
        loop {
            let n = unsafe { libc::read(self.fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n > 0 {
                return Ok(ReadOutcome::Data(n as usize));
            }
            if n == 0 {
                return Ok(ReadOutcome::Eof);
            }
            let errno = Errno::last();
            match errno {
                Errno::EINTR => continue,
                e if would_block(e) => return Ok(ReadOutcome::Again),
                e => return Err(IoError::os("read", e)),
            }
        }
    }

    /// One read appended to `buf`.
    pub fn read_buf(&self, buf: &mut Buffer) -> Result<ReadOutcome> {
        self.read_buf_max(buf, READ_CHUNK)
    }

    /// One read of at most `max` bytes appended to `buf`. Used where reading
    /// past a boundary would swallow bytes that carry ancillary data.
    pub fn read_buf_max(&self, buf: &mut Buffer, max: usize) -> Result<ReadOutcome> {
        if max == 0 {
            return Ok(ReadOutcome::Data(0));
        }
        buf.reserve(max)?;
        let spare = buf.spare_mut();
        let lim = spare.len().min(max);
        let out = self.read_some(&mut spare[..lim])?;
        if let ReadOutcome::Data(n) = out {
            buf.advance(n);
        }
        Ok(out)
    }

    /// Wait until any of `events` (`libc::POLLIN`, ...) is ready. Returns
    /// false on timeout. EINTR restarts the wait with the full timeout.
    pub fn wait(&self, events: libc::c_short, timeout: Option<Duration>) -> Result<bool> {
        let ms = match timeout {
            Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };
        let mut pfd = libc::pollfd { fd: self.fd(), events, revents: 0 };
        loop {
            let ret = unsafe { libc::poll(&mut pfd, 1, ms) };
            if ret < 0 {
                let errno = Errno::last();
                if errno == Errno::EINTR {
                    continue;
                }
                return Err(IoError::os("poll", errno));
            }
            return Ok(ret > 0);
        }
    }
}

impl AsRawFd for Io {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for Io {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl IntoRawFd for Io {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}

impl From<OwnedFd> for Io {
    fn from(fd: OwnedFd) -> Self {
        Io::from_owned(fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_write_read_full() {
        let (a, b) = Io::pair().unwrap();
        a.write_all(b"hello world").unwrap();
        let mut got = [0u8; 11];
        b.read_full(&mut got).unwrap();
        assert_eq!(&got, b"hello world");
    }

    #[test]
    fn test_read_full_eof() {
        let (a, b) = Io::pair().unwrap();
        a.write_all(b"abc").unwrap();
        drop(a);
        let mut got = [0u8; 8];
        assert!(matches!(b.read_full(&mut got), Err(IoError::UnexpectedEof)));
    }

    #[test]
    fn test_read_buf_again_then_eof() {
        let (a, b) = Io::pair().unwrap();
        b.set_nonblock(true).unwrap();
        assert!(b.is_nonblock().unwrap());

        let mut buf = Buffer::new();
        assert_eq!(b.read_buf(&mut buf).unwrap(), ReadOutcome::Again);
        a.write_all(b"xyz").unwrap();
        assert_eq!(b.read_buf(&mut buf).unwrap(), ReadOutcome::Data(3));
        assert_eq!(buf.as_slice(), b"xyz");
        drop(a);
        assert_eq!(b.read_buf(&mut buf).unwrap(), ReadOutcome::Eof);
    }

    #[test]
    fn test_read_buf_max_limits() {
        let (a, b) = Io::pair().unwrap();
        a.write_all(b"0123456789").unwrap();
        let mut buf = Buffer::new();
        assert_eq!(b.read_buf_max(&mut buf, 4).unwrap(), ReadOutcome::Data(4));
        assert_eq!(buf.as_slice(), b"0123");
    }

    #[test]
    fn test_set_nonblock_toggle() {
        let (a, _b) = Io::pair().unwrap();
        a.set_nonblock(true).unwrap();
        a.set_nonblock(false).unwrap();
        assert!(!a.is_nonblock().unwrap());
    }

    #[test]
    fn test_listen_connect_accept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.sock");
        let listener = Io::listen_unix(&path, DEFAULT_BACKLOG).unwrap();
        listener.set_nonblock(true).unwrap();
        assert!(listener.accept().unwrap().is_none());

        let cli = Io::connect_unix(&path).unwrap();
        let srv = loop {
            if let Some(io) = listener.accept().unwrap() {
                break io;
            }
            listener.wait(libc::POLLIN, Some(Duration::from_secs(5))).unwrap();
        };
        cli.write_all(b"ping").unwrap();
        let mut got = [0u8; 4];
        srv.read_full(&mut got).unwrap();
        assert_eq!(&got, b"ping");
    }

    #[test]
    fn test_listen_replaces_stale_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        drop(Io::listen_unix(&path, 1).unwrap());
        assert!(path.exists());
        Io::listen_unix(&path, 1).unwrap();
    }

    #[test]
    fn test_connect_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = Io::connect_unix(dir.path().join("nope.sock")).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::ENOENT));
    }

    #[test]
    fn test_bad_paths() {
        let long = "x".repeat(200);
        assert!(matches!(Io::connect_unix(&long), Err(IoError::BadPath(_))));
        assert!(matches!(Io::connect_unix(""), Err(IoError::BadPath(_))));
    }

    #[test]
    fn test_write_some_after_peer_close() {
        let (a, b) = Io::pair().unwrap();
        drop(b);
        let err = loop {
            match a.write_some(&[0u8; 1024]) {
                Ok(_) => continue,
                Err(e) => break e,
            }
        };
        assert!(err.is_peer_closed());
    }

    #[test]
    fn test_wait_timeout() {
        let (a, _b) = Io::pair().unwrap();
        assert!(!a.wait(libc::POLLIN, Some(Duration::from_millis(10))).unwrap());
        assert!(a.wait(libc::POLLOUT, Some(Duration::from_millis(10))).unwrap());
    }
}
