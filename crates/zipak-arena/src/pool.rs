//! Tiered thread-safe arena allocator
//!
//! Archive decompression allocates and frees a great many short-lived
//! buffers, almost all of them either small (inflate's internal state) or
//! clustered around a handful of common entry sizes. Routing every one of
//! those through the system allocator would put lock contention and
//! fragmentation on the hot path, so allocation here is tiered, cheapest
//! first:
//!
//! 1. [`FixedPool`] — a freelist of same-size blocks guarded by a spinlock
//!    that gives up after a bounded number of iterations rather than
//!    spinning forever under contention.
//! 2. [`BigSlotPool`] — a small, fixed number of large singleton buffers
//!    claimed with a single atomic compare-exchange; no lock at all.
//! 3. [`GeneralHeap`] — a size-classed pool of reusable heap buffers for
//!    everything larger than the fixed/big-slot tiers cover.
//! 4. System allocator fallback — used when every pool tier misses or the
//!    request exceeds the heap tier's largest size class. Fallback use is
//!    tracked (count and cumulative time) so callers can tell whether the
//!    tiering is actually absorbing the workload.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Size of a single fixed-pool block.
pub const FIXED_BLOCK_SIZE: usize = 4 * 1024;
/// Number of blocks held by the fixed pool.
pub const FIXED_POOL_CAPACITY: usize = 64;
/// Size of a single big-slot buffer.
pub const BIG_SLOT_SIZE: usize = 256 * 1024;
/// Number of big slots.
pub const BIG_SLOT_COUNT: usize = 16;
/// Bounded spin count before the fixed pool's lock falls back to blocking.
const MAX_SPIN_ITERATIONS: u32 = 32;

/// Whether a buffer is expected to live for a single operation
/// (`Temporary`, e.g. inflate scratch space) or to outlive the call that
/// allocated it (`Persistent`, e.g. a cache entry's decompressed bytes
/// handed back to a caller). The arena itself pools both the same way;
/// the distinction exists so `temp_free`/`persistent_free` can catch a
/// caller freeing a buffer through the wrong path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Scoped to the allocating call; must be freed with `temp_free`.
    Temporary,
    /// Outlives the allocating call; must be freed with `persistent_free`.
    Persistent,
}

/// A buffer handed out by the arena, tagged with the tier it came from and,
/// for the big-slot tier, the slot it must be returned to.
pub struct ArenaBuffer {
    data: Vec<u8>,
    tier: Tier,
    big_slot_index: Option<usize>,
    persistence: Persistence,
}

impl ArenaBuffer {
    /// Borrow the buffer's bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Borrow the buffer's bytes mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Grow or shrink the buffer's logical length, filling new bytes with
    /// `value`. Capacity from the pool tier is reused where possible.
    pub fn resize(&mut self, new_len: usize, value: u8) {
        self.data.resize(new_len, value);
    }

    /// Which tier this buffer was served from.
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Which free path this buffer must be returned through.
    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    /// Take ownership of the underlying storage, detaching it from the
    /// arena. The caller is responsible for freeing it normally; it will
    /// not be returned to any pool.
    pub fn into_vec(mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }
}

/// The tier a buffer was allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Fixed in-place pool.
    Fixed,
    /// Big-slot pool.
    BigSlot,
    /// General heap region.
    GeneralHeap,
    /// System allocator fallback.
    SystemFallback,
}

/// A non-recursive spinlock-guarded freelist of fixed-size blocks.
struct FixedPool {
    locked: AtomicBool,
    free: Mutex<Vec<Vec<u8>>>,
}

impl FixedPool {
    fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            free: Mutex::new(Vec::with_capacity(FIXED_POOL_CAPACITY)),
        }
    }

    /// Acquire the freelist, spinning up to [`MAX_SPIN_ITERATIONS`] times
    /// before falling back to a blocking lock. The spin flag is purely an
    /// optimistic fast path; correctness comes from the underlying mutex.
    fn with_freelist<R>(&self, f: impl FnOnce(&mut Vec<Vec<u8>>) -> R) -> R {
        let mut spins = 0;
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spins += 1;
            if spins >= MAX_SPIN_ITERATIONS {
                break;
            }
            std::hint::spin_loop();
        }

        let result = {
            let mut guard = self.free.lock().unwrap_or_else(|p| p.into_inner());
            f(&mut guard)
        };

        self.locked.store(false, Ordering::Release);
        result
    }

    fn allocate(&self) -> Option<Vec<u8>> {
        self.with_freelist(|free| free.pop())
    }

    fn deallocate(&self, mut buf: Vec<u8>) {
        buf.clear();
        self.with_freelist(|free| {
            if free.len() < FIXED_POOL_CAPACITY {
                free.push(buf);
            }
        });
    }
}

/// A fixed number of singleton large buffers claimed with atomic CAS.
struct BigSlotPool {
    claimed: [AtomicBool; BIG_SLOT_COUNT],
    slots: [Mutex<Option<Vec<u8>>>; BIG_SLOT_COUNT],
}

impl BigSlotPool {
    fn new() -> Self {
        Self {
            claimed: std::array::from_fn(|_| AtomicBool::new(false)),
            slots: std::array::from_fn(|_| Mutex::new(None)),
        }
    }

    fn allocate(&self) -> Option<(usize, Vec<u8>)> {
        for (i, flag) in self.claimed.iter().enumerate() {
            if flag
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                let mut slot = self.slots[i].lock().unwrap_or_else(|p| p.into_inner());
                let buf = slot
                    .take()
                    .unwrap_or_else(|| Vec::with_capacity(BIG_SLOT_SIZE));
                return Some((i, buf));
            }
        }
        None
    }

    fn deallocate(&self, index: usize, mut buf: Vec<u8>) {
        buf.clear();
        let mut slot = self.slots[index].lock().unwrap_or_else(|p| p.into_inner());
        *slot = Some(buf);
        self.claimed[index].store(false, Ordering::Release);
    }
}

/// Size classes for the general heap tier, modeled after workload-observed
/// archive entry sizes rather than a fixed doubling scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeapSizeClass {
    Small,
    Medium,
    Large,
}

impl HeapSizeClass {
    fn from_size(size: usize) -> Self {
        match size {
            0..=65_536 => Self::Small,
            65_537..=1_048_576 => Self::Medium,
            _ => Self::Large,
        }
    }

    fn buffer_size(self) -> usize {
        match self {
            Self::Small => 64 * 1024,
            Self::Medium => 1024 * 1024,
            Self::Large => 8 * 1024 * 1024,
        }
    }

    fn max_pool_entries(self) -> usize {
        match self {
            Self::Small => 32,
            Self::Medium => 8,
            Self::Large => 2,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Small => 0,
            Self::Medium => 1,
            Self::Large => 2,
        }
    }
}

struct GeneralHeap {
    pools: [Mutex<Vec<Vec<u8>>>; 3],
}

impl GeneralHeap {
    fn new() -> Self {
        Self {
            pools: std::array::from_fn(|_| Mutex::new(Vec::new())),
        }
    }

    fn allocate(&self, size: usize) -> Vec<u8> {
        let class = HeapSizeClass::from_size(size);
        let mut pool = self.pools[class.index()]
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        pool.pop()
            .unwrap_or_else(|| Vec::with_capacity(size.max(class.buffer_size())))
    }

    fn deallocate(&self, mut buf: Vec<u8>) {
        let class = HeapSizeClass::from_size(buf.capacity());
        buf.clear();
        let mut pool = self.pools[class.index()]
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if pool.len() < class.max_pool_entries() {
            pool.push(buf);
        }
    }
}

/// Counters tracking how often each tier serves a request, and how often
/// the request falls all the way through to the system allocator.
#[derive(Debug, Default)]
pub struct ArenaStats {
    fixed_hits: AtomicU64,
    big_slot_hits: AtomicU64,
    general_heap_hits: AtomicU64,
    fallback_count: AtomicU64,
    fallback_nanos: AtomicU64,
    live_bytes: AtomicUsize,
}

impl ArenaStats {
    /// Snapshot of counters at this instant.
    pub fn snapshot(&self) -> ArenaStatsSnapshot {
        ArenaStatsSnapshot {
            fixed_hits: self.fixed_hits.load(Ordering::Relaxed),
            big_slot_hits: self.big_slot_hits.load(Ordering::Relaxed),
            general_heap_hits: self.general_heap_hits.load(Ordering::Relaxed),
            fallback_count: self.fallback_count.load(Ordering::Relaxed),
            fallback_nanos: self.fallback_nanos.load(Ordering::Relaxed),
            live_bytes: self.live_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ArenaStats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ArenaStatsSnapshot {
    /// Allocations served by the fixed pool.
    pub fixed_hits: u64,
    /// Allocations served by the big-slot pool.
    pub big_slot_hits: u64,
    /// Allocations served by the general heap tier.
    pub general_heap_hits: u64,
    /// Allocations that fell through to the system allocator.
    pub fallback_count: u64,
    /// Cumulative time spent in system allocator fallback, in nanoseconds.
    pub fallback_nanos: u64,
    /// Bytes currently checked out and not yet returned.
    pub live_bytes: usize,
}

/// Tiered thread-safe arena allocator.
pub struct Arena {
    fixed: FixedPool,
    big_slots: BigSlotPool,
    heap: GeneralHeap,
    stats: ArenaStats,
}

impl Arena {
    /// Create a new arena with empty pools.
    pub fn new() -> Self {
        Self {
            fixed: FixedPool::new(),
            big_slots: BigSlotPool::new(),
            heap: GeneralHeap::new(),
            stats: ArenaStats::default(),
        }
    }

    /// Allocate a buffer of at least `size` bytes scoped to the current
    /// call, trying each tier in order before falling back to the system
    /// allocator. Must be returned with [`Arena::temp_free`].
    pub fn temp_alloc(&self, size: usize) -> ArenaBuffer {
        self.alloc_tiered(size, Persistence::Temporary)
    }

    /// Allocate a buffer of at least `size` bytes expected to outlive the
    /// current call, trying each tier in order before falling back to the
    /// system allocator. Must be returned with [`Arena::persistent_free`].
    pub fn persistent_alloc(&self, size: usize) -> ArenaBuffer {
        self.alloc_tiered(size, Persistence::Persistent)
    }

    fn alloc_tiered(&self, size: usize, persistence: Persistence) -> ArenaBuffer {
        self.stats.live_bytes.fetch_add(size, Ordering::Relaxed);

        if size <= FIXED_BLOCK_SIZE {
            let buf = self
                .fixed
                .allocate()
                .unwrap_or_else(|| Vec::with_capacity(FIXED_BLOCK_SIZE));
            self.stats.fixed_hits.fetch_add(1, Ordering::Relaxed);
            return ArenaBuffer {
                data: buf,
                tier: Tier::Fixed,
                big_slot_index: None,
                persistence,
            };
        }

        if size <= BIG_SLOT_SIZE {
            if let Some((index, buf)) = self.big_slots.allocate() {
                self.stats.big_slot_hits.fetch_add(1, Ordering::Relaxed);
                return ArenaBuffer {
                    data: buf,
                    tier: Tier::BigSlot,
                    big_slot_index: Some(index),
                    persistence,
                };
            }
        }

        if size <= HeapSizeClass::Large.buffer_size() {
            let buf = self.heap.allocate(size);
            self.stats.general_heap_hits.fetch_add(1, Ordering::Relaxed);
            return ArenaBuffer {
                data: buf,
                tier: Tier::GeneralHeap,
                big_slot_index: None,
                persistence,
            };
        }

        let start = Instant::now();
        let buf = Vec::with_capacity(size);
        self.stats.fallback_count.fetch_add(1, Ordering::Relaxed);
        self.stats
            .fallback_nanos
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        ArenaBuffer {
            data: buf,
            tier: Tier::SystemFallback,
            big_slot_index: None,
            persistence,
        }
    }

    /// Return a buffer allocated with [`Arena::temp_alloc`] to the tier it
    /// came from.
    pub fn temp_free(&self, buffer: ArenaBuffer) {
        debug_assert_eq!(
            buffer.persistence,
            Persistence::Temporary,
            "temp_free called on a buffer from persistent_alloc"
        );
        self.free(buffer);
    }

    /// Return a buffer allocated with [`Arena::persistent_alloc`] to the
    /// tier it came from.
    pub fn persistent_free(&self, buffer: ArenaBuffer) {
        debug_assert_eq!(
            buffer.persistence,
            Persistence::Persistent,
            "persistent_free called on a buffer from temp_alloc"
        );
        self.free(buffer);
    }

    /// Free path dispatch shared by `temp_free`/`persistent_free`: returns
    /// the buffer to the tier it was allocated from regardless of which
    /// free entry point was used to get here.
    fn free(&self, buffer: ArenaBuffer) {
        self.stats
            .live_bytes
            .fetch_sub(buffer.data.capacity(), Ordering::Relaxed);
        match buffer.tier {
            Tier::Fixed => self.fixed.deallocate(buffer.data),
            Tier::BigSlot => {
                if let Some(index) = buffer.big_slot_index {
                    self.big_slots.deallocate(index, buffer.data);
                }
            }
            Tier::GeneralHeap => self.heap.deallocate(buffer.data),
            Tier::SystemFallback => {} // dropped, nothing to recycle
        }
    }

    /// Current allocator statistics.
    pub fn stats(&self) -> ArenaStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_allocations_use_fixed_tier() {
        let arena = Arena::new();
        let buf = arena.temp_alloc(1024);
        assert_eq!(buf.tier(), Tier::Fixed);
    }

    #[test]
    fn medium_allocations_use_big_slot_tier() {
        let arena = Arena::new();
        let buf = arena.temp_alloc(128 * 1024);
        assert_eq!(buf.tier(), Tier::BigSlot);
    }

    #[test]
    fn large_allocations_use_general_heap() {
        let arena = Arena::new();
        let buf = arena.temp_alloc(2 * 1024 * 1024);
        assert_eq!(buf.tier(), Tier::GeneralHeap);
    }

    #[test]
    fn oversized_allocations_fall_back_to_system() {
        let arena = Arena::new();
        let buf = arena.temp_alloc(64 * 1024 * 1024);
        assert_eq!(buf.tier(), Tier::SystemFallback);
        assert_eq!(arena.stats().fallback_count, 1);
    }

    #[test]
    fn fixed_pool_recycles_after_dealloc() {
        let arena = Arena::new();
        let buf = arena.temp_alloc(512);
        arena.temp_free(buf);
        let buf2 = arena.temp_alloc(512);
        assert_eq!(buf2.tier(), Tier::Fixed);
        assert_eq!(arena.stats().fixed_hits, 2);
    }

    #[test]
    fn big_slot_pool_exhausts_after_count_claims() {
        let arena = Arena::new();
        let mut bufs = Vec::new();
        for _ in 0..BIG_SLOT_COUNT {
            let b = arena.temp_alloc(BIG_SLOT_SIZE);
            assert_eq!(b.tier(), Tier::BigSlot);
            bufs.push(b);
        }
        // Every slot is claimed now; the next big-sized request must fall
        // through to the general heap tier instead.
        let overflow = arena.temp_alloc(BIG_SLOT_SIZE);
        assert_eq!(overflow.tier(), Tier::GeneralHeap);
    }

    #[test]
    fn big_slot_returns_to_pool_on_dealloc() {
        let arena = Arena::new();
        let buf = arena.temp_alloc(BIG_SLOT_SIZE);
        arena.temp_free(buf);
        let buf2 = arena.temp_alloc(BIG_SLOT_SIZE);
        assert_eq!(buf2.tier(), Tier::BigSlot);
        assert_eq!(arena.stats().big_slot_hits, 2);
    }

    #[test]
    fn persistent_alloc_round_trips_through_persistent_free() {
        let arena = Arena::new();
        let buf = arena.persistent_alloc(512);
        assert_eq!(buf.persistence(), Persistence::Persistent);
        arena.persistent_free(buf);
        assert_eq!(arena.stats().fixed_hits, 1);
    }
}
