//! Size-bucketed pool for I/O buffers.
//!
//! The data-plane churns through read buffers at frame rate; pooling them
//! keeps allocation off the hot path. Released buffers are zeroed before
//! they become visible to another borrower, since they may have held
//! plaintext or key-adjacent material.

use std::sync::Mutex;

use zeroize::Zeroize;

use super::{BUFFERS_PER_BUCKET, BUFFER_BUCKETS};

/// A pool of reusable byte buffers in fixed size buckets.
///
/// Requests larger than the top bucket are allocated directly and never
/// retained.
pub struct BufferPool {
    buckets: Vec<Mutex<Vec<Vec<u8>>>>,
}

impl BufferPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            buckets: BUFFER_BUCKETS.iter().map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    /// Index of the smallest bucket that fits `size`, if any.
    fn bucket_index(size: usize) -> Option<usize> {
        BUFFER_BUCKETS.iter().position(|&b| size <= b)
    }

    /// Borrow a zero-filled buffer of exactly `size` bytes.
    pub fn acquire(&self, size: usize) -> Vec<u8> {
        let mut buf = match Self::bucket_index(size) {
            Some(idx) => {
                let mut bucket = self.buckets[idx].lock().unwrap_or_else(|e| e.into_inner());
                bucket.pop().unwrap_or_else(|| Vec::with_capacity(BUFFER_BUCKETS[idx]))
            }
            None => Vec::with_capacity(size),
        };
        buf.resize(size, 0);
        buf
    }

    /// Return a buffer to the pool, zeroing its contents first.
    ///
    /// Buffers that do not fit a bucket, or whose bucket is already full,
    /// are dropped after zeroing.
    pub fn release(&self, mut buf: Vec<u8>) {
        buf.zeroize();
        if let Some(idx) = Self::bucket_index(buf.capacity()) {
            // A buffer may only serve requests up to its own capacity, so
            // file it under the bucket it can actually satisfy.
            let idx = if buf.capacity() >= BUFFER_BUCKETS[idx] { idx } else { idx.saturating_sub(1) };
            let mut bucket = self.buckets[idx].lock().unwrap_or_else(|e| e.into_inner());
            if bucket.len() < BUFFERS_PER_BUCKET {
                bucket.push(buf);
            }
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_sizes() {
        let pool = BufferPool::new();

        let buf = pool.acquire(100);
        assert_eq!(buf.len(), 100);
        assert!(buf.capacity() >= 100);

        // Larger than the top bucket: allocated directly.
        let big = pool.acquire(100_000);
        assert_eq!(big.len(), 100_000);
    }

    #[test]
    fn test_release_zeroes() {
        let pool = BufferPool::new();

        let mut buf = pool.acquire(64);
        buf.copy_from_slice(&[0xAA; 64]);
        pool.release(buf);

        // The recycled buffer must come back zero-filled.
        let buf = pool.acquire(64);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_reuse() {
        let pool = BufferPool::new();

        let buf = pool.acquire(1024);
        let cap = buf.capacity();
        pool.release(buf);

        let again = pool.acquire(1024);
        assert_eq!(again.capacity(), cap);
    }
}
