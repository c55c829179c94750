//! Interest sets keyed by file descriptor
//!
//! Like `fd_set` but growable and without the FD_SETSIZE ceiling. The event
//! loop keeps one for readable and one for writable interest.

use std::os::fd::RawFd;

const BITS_PER_WORD: usize = u64::BITS as usize;

#[derive(Debug, Clone, Default)]
pub struct FdSet {
    words: Vec<u64>,
    count: usize,
}

impl FdSet {
    pub const fn new() -> Self {
        Self { words: Vec::new(), count: 0 }
    }

    #[inline]
    fn slot(fd: RawFd) -> Option<(usize, u64)> {
        let fd = usize::try_from(fd).ok()?;
        Some((fd / BITS_PER_WORD, 1u64 << (fd % BITS_PER_WORD)))
    }

    /// Add `fd`; negative fds are ignored.
    pub fn insert(&mut self, fd: RawFd) {
        let Some((w, mask)) = Self::slot(fd) else { return };
        if w >= self.words.len() {
            self.words.resize(w + 1, 0);
        }
        if self.words[w] & mask == 0 {
            self.words[w] |= mask;
            self.count += 1;
        }
    }

    pub fn remove(&mut self, fd: RawFd) {
        let Some((w, mask)) = Self::slot(fd) else { return };
        if let Some(word) = self.words.get_mut(w) {
            if *word & mask != 0 {
                *word &= !mask;
                self.count -= 1;
            }
        }
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        match Self::slot(fd) {
            Some((w, mask)) => self.words.get(w).is_some_and(|word| word & mask != 0),
            None => false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
        self.count = 0;
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some((i * BITS_PER_WORD + bit) as RawFd)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove() {
        let mut set = FdSet::new();
        set.insert(3);
        set.insert(3);
        set.insert(130);
        assert_eq!(set.len(), 2);
        assert!(set.contains(3));
        assert!(set.contains(130));
        assert!(!set.contains(4));
        set.remove(3);
        set.remove(3);
        assert_eq!(set.len(), 1);
        assert!(!set.contains(3));
    }

    #[test]
    fn test_negative_fd_ignored() {
        let mut set = FdSet::new();
        set.insert(-1);
        set.remove(-1);
        assert!(set.is_empty());
        assert!(!set.contains(-1));
    }

    #[test]
    fn test_iter_ascending() {
        let mut set = FdSet::new();
        for fd in [70, 0, 5, 64, 63] {
            set.insert(fd);
        }
        let fds: Vec<RawFd> = set.iter().collect();
        assert_eq!(fds, vec![0, 5, 63, 64, 70]);
        set.clear();
        assert_eq!(set.iter().count(), 0);
    }
}
