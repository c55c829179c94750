//! Bounded ID pool
//!
//! Fixed-capacity bitset where a set bit marks a free id. The capacity is
//! rounded up to a power of two. `use_next` hands out the lowest free id in
//! O(words), so a caller holding fewer than `n` ids always gets one below `n`.

const BITS_PER_WORD: usize = u64::BITS as usize;

/// Pool of ids in `0..capacity`.
#[derive(Debug, Clone)]
pub struct IdSet {
    words: Box<[u64]>,
    capacity: usize,
    used: usize,
}

impl IdSet {
    /// Pool with at least `min` ids (the next power of two), all free.
    /// `None` for an empty pool.
    pub fn new(min: usize) -> Option<Self> {
        if min == 0 {
            return None;
        }
        let capacity = min.checked_next_power_of_two()?;

        let nwords = capacity.div_ceil(BITS_PER_WORD);
        let mut words = vec![u64::MAX; nwords].into_boxed_slice();
        let tail = capacity % BITS_PER_WORD;
        if tail != 0 {
            words[nwords - 1] = (1u64 << tail) - 1;
        }

        Some(Self { words, capacity, used: 0 })
    }

    /// Take the lowest free id, or `None` when the pool is exhausted.
    pub fn use_next(&mut self) -> Option<usize> {
        let (i, word) = self.words.iter_mut().enumerate().find(|(_, w)| **w != 0)?;
        let bit = word.trailing_zeros() as usize;
        *word &= !(1u64 << bit);
        self.used += 1;
        Some(i * BITS_PER_WORD + bit)
    }

    /// Return `id` to the pool. Out-of-range and already-free ids are ignored.
    pub fn clear(&mut self, id: usize) {
        if id >= self.capacity {
            return;
        }
        let mask = 1u64 << (id % BITS_PER_WORD);
        let word = &mut self.words[id / BITS_PER_WORD];
        if *word & mask == 0 {
            *word |= mask;
            self.used -= 1;
        }
    }

    #[inline]
    pub fn is_used(&self, id: usize) -> bool {
        id < self.capacity && self.words[id / BITS_PER_WORD] & (1u64 << (id % BITS_PER_WORD)) == 0
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.used == self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instantiation() {
        assert!(IdSet::new(0).is_none());
        for (n, cap) in [(1, 1), (2, 2), (3, 4), (63, 64), (64, 64), (65, 128), (1000, 1024)] {
            let ids = IdSet::new(n).unwrap();
            assert_eq!(ids.capacity(), cap);
            assert_eq!(ids.used(), 0);
        }
    }

    #[test]
    fn test_interval() {
        for n in [1usize, 2, 3, 65] {
            let mut ids = IdSet::new(n).unwrap();
            for expected in 0..ids.capacity() {
                assert_eq!(ids.use_next(), Some(expected));
            }
            assert_eq!(ids.use_next(), None);
            assert!(ids.is_full());
        }
    }

    #[test]
    fn test_reuse() {
        let mut ids = IdSet::new(128).unwrap();
        for _ in 0..128 {
            ids.use_next().unwrap();
        }
        ids.clear(64);
        ids.clear(3);
        assert_eq!(ids.used(), 126);
        assert_eq!(ids.use_next(), Some(3));
        assert_eq!(ids.use_next(), Some(64));
        assert_eq!(ids.use_next(), None);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut ids = IdSet::new(4).unwrap();
        let id = ids.use_next().unwrap();
        assert!(ids.is_used(id));
        ids.clear(id);
        ids.clear(id);
        ids.clear(100);
        assert_eq!(ids.used(), 0);
        assert!(!ids.is_used(id));
    }

    #[test]
    fn test_lowest_free_stays_below_request() {
        // 5 rounds up to 8; five callers never see an id past 4
        let mut ids = IdSet::new(5).unwrap();
        let taken: Vec<_> = (0..5).map(|_| ids.use_next().unwrap()).collect();
        assert_eq!(taken, [0, 1, 2, 3, 4]);
        ids.clear(2);
        assert_eq!(ids.use_next(), Some(2));
        assert!(!ids.is_full());
    }
}
