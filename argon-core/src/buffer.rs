//! Bounded FIFO byte ring with force-push semantics
//!
//! The buffer grows geometrically up to `hard_max`; once it cannot grow
//! any further a force-push evicts the oldest bytes instead of failing.
//! The buffer carries no lock of its own — the owner of a shared buffer
//! also owns its mutex, so both sides of a producer/consumer pair agree
//! on one lock.

/// Byte ring of `{capacity, hard_max, head, size}`
#[derive(Debug)]
pub struct DataBuffer {
    buf: Vec<u8>,
    hard_max: usize,
    head: usize,
    size: usize,
}

impl DataBuffer {
    /// Create a buffer with an initial capacity and a growth ceiling
    pub fn new(capacity: usize, hard_max: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: vec![0; capacity],
            hard_max: hard_max.max(capacity),
            head: 0,
            size: 0,
        }
    }

    /// Bytes currently stored
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Current allocated capacity
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Growth ceiling
    pub fn max_size(&self) -> usize {
        self.hard_max
    }

    /// True when at least `n` bytes can be pulled
    pub fn has_enough_data(&self, n: usize) -> bool {
        self.size >= n
    }

    /// True when `n` more bytes fit without evicting anything
    pub fn has_free_space(&self, n: usize) -> bool {
        self.size + n <= self.hard_max
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.size = 0;
    }

    /// Append all of `src`, growing up to `hard_max` and then evicting the
    /// oldest bytes. Never fails, never partial.
    pub fn push_exact_force(&mut self, src: &[u8]) {
        if src.is_empty() {
            return;
        }

        // A push larger than the ceiling keeps only its own tail.
        if src.len() >= self.hard_max {
            self.reserve(self.hard_max);
            self.head = 0;
            self.size = 0;
            let keep = &src[src.len() - self.hard_max..];
            self.copy_in(keep);
            self.size = keep.len();
            return;
        }

        let needed = self.size + src.len();
        if needed > self.buf.len() {
            self.reserve(needed);
        }
        if needed > self.buf.len() {
            // At hard_max: make room by dropping the oldest bytes.
            let overflow = needed - self.buf.len();
            self.discard_exact(overflow);
        }

        self.copy_in(src);
        self.size += src.len();
    }

    /// As `push_exact_force` with `n` zero bytes (silence padding)
    pub fn push_null_exact_force(&mut self, n: usize) {
        // Padding runs are short (at most one audio frame), so a scratch
        // allocation per call would still be fine; keep it simple.
        const ZEROS: [u8; 4096] = [0; 4096];
        let mut left = n;
        while left > 0 {
            let chunk = left.min(ZEROS.len());
            self.push_exact_force(&ZEROS[..chunk]);
            left -= chunk;
        }
    }

    /// Move up to `dst.len()` bytes out of the ring; returns the count
    pub fn pull(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.size);
        if n == 0 {
            return 0;
        }

        let cap = self.buf.len();
        let first = n.min(cap - self.head);
        dst[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        if first < n {
            dst[first..n].copy_from_slice(&self.buf[..n - first]);
        }

        self.head = (self.head + n) % cap;
        self.size -= n;
        n
    }

    /// Remove `n` bytes without copying; `n` must not exceed `len()`
    pub fn discard_exact(&mut self, n: usize) {
        debug_assert!(n <= self.size);
        let n = n.min(self.size);
        self.head = (self.head + n) % self.buf.len();
        self.size -= n;
    }

    /// Contiguous view of the front of the ring, up to the wrap point
    pub fn contiguous(&self) -> &[u8] {
        let end = (self.head + self.size).min(self.buf.len());
        &self.buf[self.head..end]
    }

    /// Grow towards `hard_max`, linearizing the stored bytes
    fn reserve(&mut self, needed: usize) {
        let target = needed.max(self.buf.len() * 2).min(self.hard_max);
        if target <= self.buf.len() {
            return;
        }

        let mut new_buf = vec![0; target];
        let mut stored = vec![0u8; self.size];
        let size = self.size;
        self.pull(&mut stored);
        new_buf[..size].copy_from_slice(&stored);
        self.buf = new_buf;
        self.head = 0;
        self.size = size;
    }

    /// Copy `src` in at the tail; caller guarantees it fits
    fn copy_in(&mut self, src: &[u8]) {
        let cap = self.buf.len();
        let tail = (self.head + self.size) % cap;
        let first = src.len().min(cap - tail);
        self.buf[tail..tail + first].copy_from_slice(&src[..first]);
        if first < src.len() {
            let rest = src.len() - first;
            self.buf[..rest].copy_from_slice(&src[first..]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut b = DataBuffer::new(8, 64);
        b.push_exact_force(&[1, 2, 3]);
        b.push_exact_force(&[4, 5]);
        let mut out = [0u8; 5];
        assert_eq!(b.pull(&mut out), 5);
        assert_eq!(out, [1, 2, 3, 4, 5]);
        assert!(b.is_empty());
    }

    #[test]
    fn test_grows_before_evicting() {
        let mut b = DataBuffer::new(4, 16);
        b.push_exact_force(&[0; 4]);
        b.push_exact_force(&[1; 8]);
        assert_eq!(b.len(), 12);
        assert!(b.capacity() <= 16);
    }

    #[test]
    fn test_wraparound() {
        let mut b = DataBuffer::new(4, 4);
        b.push_exact_force(&[1, 2, 3]);
        let mut out = [0u8; 2];
        b.pull(&mut out);
        b.push_exact_force(&[4, 5, 6]);
        let mut rest = [0u8; 4];
        assert_eq!(b.pull(&mut rest), 4);
        assert_eq!(rest, [3, 4, 5, 6]);
    }

    #[test]
    fn test_null_padding() {
        let mut b = DataBuffer::new(8, 8);
        b.push_exact_force(&[9; 2]);
        b.push_null_exact_force(3);
        let mut out = [1u8; 5];
        b.pull(&mut out);
        assert_eq!(out, [9, 9, 0, 0, 0]);
    }
}
