// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tiered Buffer Pool
 * Reusable byte buffers for file content to keep allocation churn flat
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const SMALL_BUFFER: usize = 4 * 1024;
const MEDIUM_BUFFER: usize = 64 * 1024;
const LARGE_BUFFER: usize = 1024 * 1024;

/// A pool of fixed-capacity byte buffers
pub struct BufferPool {
    size: usize,
    free: Mutex<Vec<Vec<u8>>>,
    acquires: AtomicU64,
    releases: AtomicU64,
    allocations: AtomicU64,
}

impl BufferPool {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            free: Mutex::new(Vec::new()),
            acquires: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            allocations: AtomicU64::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Take a buffer of exactly `size` bytes, reusing a pooled one if any
    pub fn acquire(&self) -> Vec<u8> {
        self.acquires.fetch_add(1, Ordering::Relaxed);

        let pooled = self.free.lock().expect("buffer pool poisoned").pop();
        match pooled {
            Some(buf) => buf,
            None => {
                self.allocations.fetch_add(1, Ordering::Relaxed);
                vec![0u8; self.size]
            }
        }
    }

    /// Return a buffer. Buffers whose capacity no longer matches the tier are
    /// dropped rather than pooled.
    pub fn release(&self, mut buf: Vec<u8>) {
        self.releases.fetch_add(1, Ordering::Relaxed);

        if buf.capacity() == self.size {
            buf.clear();
            buf.resize(self.size, 0);
            self.free.lock().expect("buffer pool poisoned").push(buf);
        }
    }

    /// (acquires, releases, allocations)
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.acquires.load(Ordering::Relaxed),
            self.releases.load(Ordering::Relaxed),
            self.allocations.load(Ordering::Relaxed),
        )
    }

    /// Fraction of acquires served without a fresh allocation
    pub fn hit_rate(&self) -> f64 {
        let (acquires, _, allocations) = self.stats();
        if acquires == 0 {
            return 0.0;
        }
        let reused = acquires.saturating_sub(allocations);
        reused as f64 / acquires as f64
    }
}

/// Three-tier pool for file content: 4 KiB, 64 KiB and 1 MiB. Requests above
/// the top tier still receive a 1 MiB buffer; callers cap content beforehand.
pub struct ContentPool {
    small: BufferPool,
    medium: BufferPool,
    large: BufferPool,
}

impl ContentPool {
    pub fn new() -> Self {
        Self {
            small: BufferPool::new(SMALL_BUFFER),
            medium: BufferPool::new(MEDIUM_BUFFER),
            large: BufferPool::new(LARGE_BUFFER),
        }
    }

    /// Take a buffer from the smallest tier able to hold `size_hint` bytes
    pub fn acquire(&self, size_hint: u64) -> Vec<u8> {
        if size_hint <= SMALL_BUFFER as u64 {
            self.small.acquire()
        } else if size_hint <= MEDIUM_BUFFER as u64 {
            self.medium.acquire()
        } else {
            self.large.acquire()
        }
    }

    /// Return a buffer to the tier matching its capacity
    pub fn release(&self, buf: Vec<u8>) {
        let capacity = buf.capacity();
        if capacity <= SMALL_BUFFER {
            self.small.release(buf);
        } else if capacity <= MEDIUM_BUFFER {
            self.medium.release(buf);
        } else {
            self.large.release(buf);
        }
    }

    /// Hit rate averaged uniformly across the three tiers
    pub fn hit_rate(&self) -> f64 {
        (self.small.hit_rate() + self.medium.hit_rate() + self.large.hit_rate()) / 3.0
    }

    /// Aggregate (acquires, releases, allocations) across tiers
    pub fn totals(&self) -> (u64, u64, u64) {
        let (sa, sr, sn) = self.small.stats();
        let (ma, mr, mn) = self.medium.stats();
        let (la, lr, ln) = self.large.stats();
        (sa + ma + la, sr + mr + lr, sn + mn + ln)
    }

    pub fn tier_stats(&self) -> [(usize, u64, u64, u64); 3] {
        let (sa, sr, sn) = self.small.stats();
        let (ma, mr, mn) = self.medium.stats();
        let (la, lr, ln) = self.large.stats();
        [
            (SMALL_BUFFER, sa, sr, sn),
            (MEDIUM_BUFFER, ma, mr, mn),
            (LARGE_BUFFER, la, lr, ln),
        ]
    }
}

impl Default for ContentPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ContentPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (acquires, releases, allocations) = self.totals();
        f.debug_struct("ContentPool")
            .field("acquires", &acquires)
            .field("releases", &releases)
            .field("allocations", &allocations)
            .finish()
    }
}
