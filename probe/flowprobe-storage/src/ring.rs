// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    backoff::Backoff,
    cell::{CellState, MAX_READER_GROUPS},
    pool::SlotPool,
};
use core::{cell::UnsafeCell, sync::atomic::{AtomicU64, AtomicUsize, Ordering}};
use crossbeam_utils::CachePadded;

/// What a producer does when the ring stays full past its backoff
/// budget
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Keep spinning and yielding until the ring drains
    Block,
    /// Free the record and count it as dropped
    Drop,
}

/// Ring geometry and backoff thresholds
#[derive(Clone, Copy, Debug)]
pub struct RingConfig {
    pub capacity: usize,
    pub short_spin: u32,
    pub long_spin: u32,
    pub policy: OverflowPolicy,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: 65_536,
            short_spin: 64,
            long_spin: 32,
            policy: OverflowPolicy::Block,
        }
    }
}

/// Counters observable by tests and operators
#[derive(Debug, Default)]
pub struct RingStats {
    submitted: AtomicU64,
    dropped: AtomicU64,
}

impl RingStats {
    #[inline]
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct Cell<T> {
    state: CellState,
    slot: UnsafeCell<*mut T>,
}

/// The MPMC output storage ring.
///
/// Producers claim monotonically increasing write ranks; each reader
/// group claims ranks from its own counter. Rank modulo capacity picks
/// the cell; the per-cell state machine arbitrates the writer and the
/// groups. Reader groups are fixed at construction so the canonical
/// empty cell state never changes.
pub struct OutputRing<T> {
    cells: Box<[Cell<T>]>,
    writer_rank: CachePadded<AtomicU64>,
    group_ranks: Box<[CachePadded<AtomicU64>]>,
    writers: AtomicUsize,
    next_writer_id: AtomicUsize,
    pool: SlotPool<T>,
    config: RingConfig,
    stats: RingStats,
}

unsafe impl<T: Send> Send for OutputRing<T> {}
unsafe impl<T: Send + Sync> Sync for OutputRing<T> {}

impl<T> OutputRing<T> {
    pub fn new(config: RingConfig, reader_groups: usize) -> Self {
        assert!(config.capacity > 0, "ring capacity must be non-zero");
        assert!(
            (1..=MAX_READER_GROUPS).contains(&reader_groups),
            "reader group count out of range"
        );

        let cells = (0..config.capacity)
            .map(|_| Cell {
                state: CellState::new_empty(reader_groups),
                slot: UnsafeCell::new(core::ptr::null_mut()),
            })
            .collect();
        let group_ranks = (0..reader_groups)
            .map(|_| CachePadded::new(AtomicU64::new(0)))
            .collect();

        Self {
            cells,
            writer_rank: CachePadded::new(AtomicU64::new(0)),
            group_ranks,
            writers: AtomicUsize::new(0),
            next_writer_id: AtomicUsize::new(0),
            pool: SlotPool::new(16),
            config,
            stats: RingStats::default(),
        }
    }

    #[inline]
    pub fn stats(&self) -> &RingStats {
        &self.stats
    }

    #[inline]
    pub fn pool(&self) -> &SlotPool<T> {
        &self.pool
    }

    #[inline]
    fn group_count(&self) -> usize {
        self.group_ranks.len()
    }

    #[inline]
    pub fn writers_present(&self) -> bool {
        self.writers.load(Ordering::Acquire) != 0
    }

    /// Registers a producer; dropping the handle unregisters it.
    pub fn register_writer(&self) -> Writer<'_, T> {
        self.writers.fetch_add(1, Ordering::AcqRel);
        Writer {
            ring: self,
            id: self.next_writer_id.fetch_add(1, Ordering::Relaxed),
            active: true,
        }
    }

    /// One of the reader groups fixed at construction
    pub fn group(&self, index: usize) -> ReaderGroup<'_, T> {
        assert!(index < self.group_count(), "no such reader group");
        ReaderGroup { ring: self, index }
    }

    /// Whether every cell between the slowest group and the writers is
    /// occupied
    fn is_full(&self) -> bool {
        let writer = self.writer_rank.load(Ordering::Acquire);
        let slowest = self
            .group_ranks
            .iter()
            .map(|rank| rank.load(Ordering::Acquire))
            .min()
            .unwrap_or(writer);
        writer.saturating_sub(slowest) >= self.config.capacity as u64
    }
}

impl<T> Drop for OutputRing<T> {
    fn drop(&mut self) {
        for cell in self.cells.iter_mut() {
            let ptr = core::mem::replace(cell.slot.get_mut(), core::ptr::null_mut());
            if !ptr.is_null() {
                // Safety: every non-null slot pointer originates from
                // Box::into_raw in `Writer::write` and is owned by
                // exactly one cell
                drop(unsafe { Box::from_raw(ptr) });
            }
        }
    }
}

/// A registered producer
pub struct Writer<'r, T> {
    ring: &'r OutputRing<T>,
    id: usize,
    active: bool,
}

impl<'r, T> Writer<'r, T> {
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Takes an empty entry from the allocation pool
    pub fn alloc(&self, make: impl FnOnce() -> T) -> Box<T> {
        self.ring.pool.alloc(self.id, make)
    }

    /// Returns an unused entry to the pool
    pub fn recycle(&self, slot: Box<T>) {
        self.ring.pool.free(slot, self.id);
    }

    /// Publishes one record.
    ///
    /// Returns `false` only under [`OverflowPolicy::Drop`] when the
    /// ring stayed full past the backoff budget; the record is recycled
    /// and counted in `stats().dropped()`. The overflow decision is
    /// made *before* a write rank is claimed, so every claimed rank is
    /// always fulfilled and readers never wait on an abandoned cell.
    pub fn write(&mut self, slot: Box<T>) -> bool {
        let ring = self.ring;

        let mut backoff = Backoff::new(ring.config.short_spin, ring.config.long_spin);
        while ring.is_full() {
            if !backoff.wait() {
                match ring.config.policy {
                    OverflowPolicy::Block => backoff.reset(),
                    OverflowPolicy::Drop => {
                        ring.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        ring.pool.free(slot, self.id);
                        return false;
                    }
                }
            }
        }

        let rank = ring.writer_rank.fetch_add(1, Ordering::AcqRel);
        let cell = &ring.cells[(rank % ring.config.capacity as u64) as usize];
        let groups = ring.group_count();

        let mut backoff = Backoff::new(ring.config.short_spin, ring.config.long_spin);
        loop {
            if cell.state.try_claim_write(groups) {
                let fresh = Box::into_raw(slot);
                // Safety: the claimed writer flag gives exclusive slot
                // access; the previous generation (if any) was released
                // by every group, so it recycles here
                let previous = unsafe { core::mem::replace(&mut *cell.slot.get(), fresh) };
                if !previous.is_null() {
                    ring.pool.free(unsafe { Box::from_raw(previous) }, self.id);
                }
                cell.state.publish(groups);
                ring.stats.submitted.fetch_add(1, Ordering::Relaxed);
                return true;
            }
            if !backoff.wait() {
                backoff.reset();
            }
        }
    }

    /// Unregisters the producer; idempotent.
    pub fn unregister(&mut self) {
        if self.active {
            self.active = false;
            self.ring.writers.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl<T> Drop for Writer<'_, T> {
    fn drop(&mut self) {
        self.unregister();
    }
}

/// One of the ring's reader groups
#[derive(Clone, Copy)]
pub struct ReaderGroup<'r, T> {
    ring: &'r OutputRing<T>,
    index: usize,
}

impl<'r, T> ReaderGroup<'r, T> {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Creates a reader participating in this group's load balancing
    pub fn reader(&self) -> Reader<'r, T> {
        Reader {
            ring: self.ring,
            group: self.index,
            last_cell: None,
            pending_rank: None,
        }
    }
}

/// Outcome of one read attempt
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome<E> {
    /// A record; borrowed until the next `read` call releases it
    Entry(E),
    /// Nothing became readable within the backoff budget
    Empty,
    /// All writers unregistered and this group consumed everything;
    /// terminal
    Exhausted,
}

/// A reader bound to one group.
///
/// The entry returned by [`read`](Self::read) stays borrowed until the
/// next call, which is when the cell is released for recycling.
pub struct Reader<'r, T> {
    ring: &'r OutputRing<T>,
    group: usize,
    last_cell: Option<usize>,
    pending_rank: Option<u64>,
}

impl<T> Reader<'_, T> {
    fn release_last(&mut self) {
        if let Some(index) = self.last_cell.take() {
            self.ring.cells[index].state.finish_read(self.group);
        }
    }

    /// Claims the group's next rank (or resumes a timed-out one) and
    /// waits for its record.
    pub fn read(&mut self) -> ReadOutcome<&T> {
        self.release_last();

        let ring = self.ring;
        let rank = self.pending_rank.take().unwrap_or_else(|| {
            ring.group_ranks[self.group].fetch_add(1, Ordering::AcqRel)
        });
        let index = (rank % ring.config.capacity as u64) as usize;
        let cell = &ring.cells[index];

        let mut backoff = Backoff::new(ring.config.short_spin, ring.config.long_spin);
        loop {
            if cell.state.try_claim_read(self.group) {
                // Safety: the acquire claim orders this load after the
                // writer's publish; the pointer stays valid until this
                // reader releases the cell
                let entry = unsafe { &**cell.slot.get() };
                self.last_cell = Some(index);
                return ReadOutcome::Entry(entry);
            }

            if !ring.writers_present() && rank >= ring.writer_rank.load(Ordering::Acquire) {
                return ReadOutcome::Exhausted;
            }

            if !backoff.wait() {
                self.pending_rank = Some(rank);
                return ReadOutcome::Empty;
            }
        }
    }
}

impl<T> Drop for Reader<'_, T> {
    fn drop(&mut self) {
        self.release_last();
    }
}
