//! Growable byte buffer
//!
//! Capacity is always a multiple of [`BUF_ALIGNMENT`], grows geometrically
//! (at least 50% per grow, or exactly what a reservation needs if that is
//! larger) and every newly grown byte is zeroed. A buffer is meant to be
//! reused across many exchanges: `clear()` keeps the allocation.
//!
//! ```ignore
//! let mut buf = Buffer::new();
//! let hdr = buf.alloc(4)?;            // reserve room for a length field
//! buf.append(b"payload")?;
//! let n = (buf.len() - hdr - 4) as u32;
//! buf.as_mut_slice()[hdr..hdr + 4].copy_from_slice(&n.to_be_bytes());
//! ```

use std::fmt;
use std::io;

use crate::error::BufError;

/// Allocation granularity for buffer capacity.
pub const BUF_ALIGNMENT: usize = std::mem::size_of::<usize>();

#[inline]
fn align_up(n: usize) -> Option<usize> {
    n.checked_add(BUF_ALIGNMENT - 1)
        .map(|v| v & !(BUF_ALIGNMENT - 1))
}

/// Growable byte store.
///
/// Backing storage length always equals `cap()`; bytes in `len..cap` are
/// spare room that `spare_mut()` exposes for direct reads.
#[derive(Clone, Default)]
pub struct Buffer {
    data: Vec<u8>,
    len: usize,
}

impl Buffer {
    /// Empty buffer; nothing is allocated until the first reserve.
    pub const fn new() -> Self {
        Self { data: Vec::new(), len: 0 }
    }

    /// Buffer with at least `cap` bytes of zeroed, aligned storage.
    pub fn with_capacity(cap: usize) -> Result<Self, BufError> {
        let mut buf = Self::new();
        if cap > 0 {
            let aligned = align_up(cap).ok_or(BufError::Alloc { requested: cap })?;
            buf.grow_to(aligned)?;
        }
        Ok(buf)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn cap(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Make room for at least `n` more bytes after `len`.
    pub fn reserve(&mut self, n: usize) -> Result<(), BufError> {
        let needed = self
            .len
            .checked_add(n)
            .ok_or(BufError::Alloc { requested: usize::MAX })?;
        let cap = self.cap();
        if needed <= cap {
            return Ok(());
        }

        let short = needed - cap;
        let mut added = align_up(cap / 2).unwrap_or(0);
        if added < short {
            added = align_up(short).ok_or(BufError::Alloc { requested: needed })?;
        }
        let newcap = cap
            .checked_add(added)
            .ok_or(BufError::Alloc { requested: needed })?;
        self.grow_to(newcap)
    }

    fn grow_to(&mut self, newcap: usize) -> Result<(), BufError> {
        let extra = newcap - self.data.len();
        self.data
            .try_reserve_exact(extra)
            .map_err(|_| BufError::Alloc { requested: newcap })?;
        // capacity is already there; resize only zero-fills
        self.data.resize(newcap, 0);
        Ok(())
    }

    /// Copy `bytes` to the end of the buffer.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufError> {
        self.reserve(bytes.len())?;
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    pub fn push(&mut self, byte: u8) -> Result<(), BufError> {
        self.reserve(1)?;
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Claim `n` zeroed bytes at the end and return their offset, for
    /// fields that are written (or back-patched) in place.
    pub fn alloc(&mut self, n: usize) -> Result<usize, BufError> {
        self.reserve(n)?;
        let off = self.len;
        self.data[off..off + n].fill(0);
        self.len += n;
        Ok(off)
    }

    /// Pad `len` with zeros up to the next alignment boundary.
    pub fn align(&mut self) -> Result<(), BufError> {
        let target = align_up(self.len).ok_or(BufError::Alloc { requested: usize::MAX })?;
        let pad = target - self.len;
        if pad > 0 {
            self.alloc(pad)?;
        }
        Ok(())
    }

    /// Forget the contents, keep the allocation.
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Drop `n` trailing bytes.
    #[inline]
    pub fn shrink(&mut self, n: usize) {
        self.len = self.len.saturating_sub(n);
    }

    #[inline]
    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
        }
    }

    /// Drop `n` leading bytes, moving the rest to the front.
    pub fn consume(&mut self, n: usize) {
        if n >= self.len {
            self.len = 0;
            return;
        }
        self.data.copy_within(n..self.len, 0);
        self.len -= n;
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// Writable room after `len`. Pair with [`Buffer::advance`].
    #[inline]
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.len..]
    }

    /// Commit `n` bytes written into `spare_mut()`.
    #[inline]
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.len + n <= self.cap());
        self.len = (self.len + n).min(self.cap());
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("cap", &self.cap())
            .finish()
    }
}

impl io::Write for Buffer {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.append(bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_is_empty() {
        let buf = Buffer::new();
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.cap(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_with_capacity_aligned_and_zeroed() {
        let mut buf = Buffer::with_capacity(13).unwrap();
        assert_eq!(buf.cap() % BUF_ALIGNMENT, 0);
        assert!(buf.cap() >= 13);
        assert!(buf.spare_mut().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_growth_is_geometric() {
        let mut buf = Buffer::with_capacity(64).unwrap();
        buf.append(&[1u8; 64]).unwrap();
        buf.push(2).unwrap();
        assert!(buf.cap() >= 96);
        assert_eq!(buf.cap() % BUF_ALIGNMENT, 0);
    }

    #[test]
    fn test_large_reserve_takes_exact_need() {
        let mut buf = Buffer::with_capacity(8).unwrap();
        buf.reserve(1000).unwrap();
        assert!(buf.cap() >= 1000);
        assert!(buf.cap() < 1000 + 2 * BUF_ALIGNMENT);
    }

    #[test]
    fn test_grown_bytes_are_zero() {
        let mut buf = Buffer::new();
        buf.append(b"abc").unwrap();
        buf.reserve(100).unwrap();
        assert_eq!(buf.as_slice(), b"abc");
        assert!(buf.spare_mut().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_alloc_backpatch() {
        let mut buf = Buffer::new();
        buf.append(b"stale data").unwrap();
        buf.clear();
        let off = buf.alloc(4).unwrap();
        assert_eq!(off, 0);
        assert_eq!(buf.as_slice(), &[0, 0, 0, 0]);
        buf.append(b"xy").unwrap();
        buf.as_mut_slice()[off..off + 4].copy_from_slice(&2u32.to_be_bytes());
        assert_eq!(buf.as_slice(), &[0, 0, 0, 2, b'x', b'y']);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut buf = Buffer::new();
        buf.append(&[7u8; 100]).unwrap();
        let cap = buf.cap();
        buf.clear();
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.cap(), cap);
    }

    #[test]
    fn test_shrink_truncate_consume() {
        let mut buf = Buffer::new();
        buf.append(b"0123456789").unwrap();
        buf.shrink(2);
        assert_eq!(buf.as_slice(), b"01234567");
        buf.truncate(6);
        assert_eq!(buf.as_slice(), b"012345");
        buf.consume(2);
        assert_eq!(buf.as_slice(), b"2345");
        buf.shrink(100);
        assert!(buf.is_empty());
        buf.append(b"ab").unwrap();
        buf.consume(5);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_align_pads_with_zero() {
        let mut buf = Buffer::new();
        buf.append(b"abc").unwrap();
        buf.align().unwrap();
        assert_eq!(buf.len(), BUF_ALIGNMENT);
        assert!(buf.as_slice()[3..].iter().all(|&b| b == 0));
        buf.align().unwrap();
        assert_eq!(buf.len(), BUF_ALIGNMENT);
    }

    #[test]
    fn test_spare_and_advance() {
        let mut buf = Buffer::new();
        buf.reserve(4).unwrap();
        buf.spare_mut()[..4].copy_from_slice(b"read");
        buf.advance(4);
        assert_eq!(buf.as_slice(), b"read");
    }

    #[test]
    fn test_io_write() {
        use std::io::Write;
        let mut buf = Buffer::new();
        write!(buf, "{}:{}", 42, -7).unwrap();
        assert_eq!(buf.as_slice(), b"42:-7");
    }

    #[test]
    fn test_reserve_overflow_is_error() {
        let mut buf = Buffer::new();
        buf.append(b"x").unwrap();
        assert!(buf.reserve(usize::MAX).is_err());
        assert_eq!(buf.as_slice(), b"x");
    }

    proptest! {
        #[test]
        fn prop_append_reserve_sequence(ops in proptest::collection::vec(
            (any::<bool>(), proptest::collection::vec(any::<u8>(), 0..300)), 0..40)) {
            let mut buf = Buffer::new();
            let mut model: Vec<u8> = Vec::new();
            for (is_reserve, bytes) in ops {
                if is_reserve {
                    buf.reserve(bytes.len()).unwrap();
                } else {
                    buf.append(&bytes).unwrap();
                    model.extend_from_slice(&bytes);
                }
                prop_assert!(buf.cap() >= buf.len());
                prop_assert_eq!(buf.cap() % BUF_ALIGNMENT, 0);
                prop_assert_eq!(buf.as_slice(), &model[..]);
            }
            prop_assert_eq!(buf.len(), model.len());
        }
    }
}
