//! Lock-free single-producer/multi-consumer sample ring buffer
//!
//! The capture thread writes into a fixed circular arena of samples and
//! never blocks: when a consumer falls more than a full buffer behind, its
//! unread region is simply overwritten and the loss is counted. Each
//! consumer owns a private monotonic cursor, so consumers never contend
//! with each other or with the producer; the only synchronization point is
//! the atomic write cursor (release on publish, acquire on observation).
//!
//! Samples are stored as `AtomicU32` bit patterns. A maximally lagged
//! reader can race the producer's overwrite of the same slot, and the
//! atomic slot makes that race well-defined: the reader sees either the
//! old or the new sample, never a torn one. The producer additionally
//! publishes a reservation cursor before it touches any slot; after
//! copying, every read path (consuming reads and snapshots alike)
//! re-checks that cursor and discards any prefix the producer may have
//! begun overwriting in the meantime, so a returned window is always one
//! contiguous run of samples.

use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;

struct RingInner {
    /// Sample storage, indexed by `index & mask`. Slot stores are relaxed;
    /// the write cursor carries the release/acquire edge.
    slots: Box<[AtomicU32]>,
    mask: u64,
    /// Monotonic count of samples ever written. Never masked.
    write_pos: CachePadded<AtomicU64>,
    /// Monotonic reservation cursor, advanced before any slot of a batch
    /// is stored. A slot with index below `reserve_pos - capacity` may be
    /// mid-overwrite and must not be surfaced.
    reserve_pos: CachePadded<AtomicU64>,
}

impl RingInner {
    #[inline]
    fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }

    #[inline]
    fn load_slot(&self, index: u64) -> f32 {
        f32::from_bits(self.slots[(index & self.mask) as usize].load(Ordering::Relaxed))
    }

    /// Oldest index that is guaranteed untouched by any overwrite the
    /// producer has begun. Loaded after a copy to validate it.
    #[inline]
    fn safe_start(&self) -> u64 {
        // Pairs with the release fence in `Producer::write`: a reader
        // whose copy observed any slot store of a batch is guaranteed to
        // observe that batch's reservation here.
        fence(Ordering::Acquire);
        self.reserve_pos
            .load(Ordering::Relaxed)
            .saturating_sub(self.capacity())
    }
}

/// Shared handle to the ring. Hands out readers and non-consuming
/// snapshots; the single [`Producer`] is created together with it.
#[derive(Clone)]
pub struct RingBuffer {
    inner: Arc<RingInner>,
}

/// The write half. Exactly one exists per ring; owned by the capture
/// thread.
pub struct Producer {
    inner: Arc<RingInner>,
}

/// A consuming read handle with its own private cursor.
pub struct Reader {
    inner: Arc<RingInner>,
    cursor: u64,
}

/// Result of a consuming read: how many samples landed in the output and
/// how many were lost to overwrite since the previous read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadReport {
    pub read: usize,
    pub dropped: u64,
}

impl RingBuffer {
    /// Create a ring and its producer. `capacity` is rounded up to the
    /// next power of two (minimum 2).
    pub fn with_capacity(capacity: usize) -> (Producer, RingBuffer) {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity)
            .map(|_| AtomicU32::new(0f32.to_bits()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let inner = Arc::new(RingInner {
            slots,
            mask: capacity as u64 - 1,
            write_pos: CachePadded::new(AtomicU64::new(0)),
            reserve_pos: CachePadded::new(AtomicU64::new(0)),
        });
        (
            Producer {
                inner: Arc::clone(&inner),
            },
            RingBuffer { inner },
        )
    }

    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    /// Monotonic index one past the newest published sample.
    pub fn write_index(&self) -> u64 {
        self.inner.write_pos.load(Ordering::Acquire)
    }

    /// Create an independent consuming reader, positioned at the current
    /// write cursor (it will only observe samples written after this call).
    pub fn reader(&self) -> Reader {
        Reader {
            cursor: self.write_index(),
            inner: Arc::clone(&self.inner),
        }
    }

    /// Copy the newest `count` published samples into `out` without
    /// consuming anything. Returns the absolute index of the first copied
    /// sample. Fewer than `count` samples are copied if fewer exist or if
    /// the producer overwrote part of the window mid-copy.
    pub fn snapshot_latest(&self, count: usize, out: &mut Vec<f32>) -> u64 {
        let write = self.write_index();
        let start = write.saturating_sub((count as u64).min(self.inner.capacity()));
        self.copy_range(start, write, out)
    }

    /// Copy `count` samples starting at absolute index `start`, clamped to
    /// the currently retained range. Returns the number of samples copied.
    pub fn snapshot_range(&self, start: u64, count: usize, out: &mut Vec<f32>) -> usize {
        let write = self.write_index();
        let oldest = write.saturating_sub(self.inner.capacity());
        let start = start.clamp(oldest, write);
        let end = (start + count as u64).min(write);
        self.copy_range(start, end, out);
        out.len()
    }

    /// Copy `[start, end)` and validate against the reservation cursor:
    /// any prefix the producer has begun overwriting is discarded, so the
    /// result is one contiguous run. Returns the index of the first
    /// sample actually kept.
    fn copy_range(&self, start: u64, end: u64, out: &mut Vec<f32>) -> u64 {
        out.clear();
        out.reserve((end - start) as usize);
        for index in start..end {
            out.push(self.inner.load_slot(index));
        }
        let safe_start = self.inner.safe_start();
        if safe_start > start {
            let stale = ((safe_start - start).min(out.len() as u64)) as usize;
            out.drain(..stale);
            return start + stale as u64;
        }
        start
    }
}

impl Producer {
    /// Publish a batch of samples. Wait-free and allocation-free: if the
    /// furthest-behind reader has unread data in the overwritten region it
    /// loses that data, which the reader discovers and counts on its next
    /// read. Blocking the capture thread is never an option.
    pub fn write(&mut self, samples: &[f32]) {
        let inner = &self.inner;
        let cap = inner.capacity() as usize;
        // A batch larger than the ring would only overwrite itself.
        let skip = samples.len().saturating_sub(cap);
        let mut pos = inner.write_pos.load(Ordering::Relaxed) + skip as u64;
        let end = pos + (samples.len() - skip) as u64;
        // Reserve the whole batch before the first slot store; readers
        // treat anything below end - capacity as possibly mid-overwrite.
        inner.reserve_pos.store(end, Ordering::Relaxed);
        fence(Ordering::Release);
        for &sample in &samples[skip..] {
            inner.slots[(pos & inner.mask) as usize].store(sample.to_bits(), Ordering::Relaxed);
            pos += 1;
        }
        inner.write_pos.store(pos, Ordering::Release);
    }

    /// Monotonic count of samples written so far.
    pub fn write_index(&self) -> u64 {
        self.inner.write_pos.load(Ordering::Relaxed)
    }
}

impl Reader {
    /// Read everything newer than this reader's cursor, up to `max`
    /// samples, into `out` (oldest first). Samples that were overwritten
    /// before they could be read, or skipped because they are older than
    /// the `max` newest, are counted as dropped.
    pub fn read_latest(&mut self, max: usize, out: &mut Vec<f32>) -> ReadReport {
        out.clear();
        let inner = &self.inner;
        let write = inner.write_pos.load(Ordering::Acquire);
        let cap = inner.capacity();
        let retained = write.saturating_sub(cap);
        let mut start = self.cursor.max(retained);
        // Keep only the `max` newest if the backlog exceeds the request.
        let limited = write.saturating_sub(max as u64);
        start = start.max(limited.min(write));
        let mut dropped = start - self.cursor;

        out.reserve((write - start) as usize);
        for index in start..write {
            out.push(inner.load_slot(index));
        }

        // The producer may have lapped us mid-copy; anything it has begun
        // overwriting while we were copying is stale and must not be
        // surfaced.
        let safe_start = inner.safe_start();
        if safe_start > start {
            let stale = ((safe_start - start).min(out.len() as u64)) as usize;
            out.drain(..stale);
            dropped += stale as u64;
        }

        self.cursor = write;
        ReadReport {
            read: out.len(),
            dropped,
        }
    }

    /// Advance the cursor to the newest sample without copying, returning
    /// only the number of unread samples that were lost to overwrite
    /// (lag beyond capacity), not those merely skipped.
    pub fn poll_overrun(&mut self) -> u64 {
        let write = self.inner.write_pos.load(Ordering::Acquire);
        let lost = (write - self.cursor).saturating_sub(self.inner.capacity());
        self.cursor = write;
        lost
    }

    /// Number of unread samples currently available to this reader.
    pub fn available(&self) -> u64 {
        self.inner.write_pos.load(Ordering::Acquire) - self.cursor
    }
}
