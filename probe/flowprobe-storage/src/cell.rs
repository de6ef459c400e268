// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::sync::atomic::{AtomicU64, Ordering};

/// Reader-group slots in the packed cell state; the eighth byte is the
/// writer flag.
pub const MAX_READER_GROUPS: usize = 7;

const WRITER_SHIFT: u32 = 56;
const WRITING: u64 = 0x01;

/// Group byte: record published, not yet claimed by this group
const READABLE: u8 = 0x01;
/// Group byte: one reader of this group holds the record
const READING: u8 = 0x02;
/// Group byte: this group released the record
const READ_DONE: u8 = 0x03;

#[inline]
const fn group_word(groups: usize, byte: u8) -> u64 {
    let mut word = 0u64;
    let mut group = 0;
    while group < groups {
        word |= (byte as u64) << (8 * group);
        group += 1;
    }
    word
}

/// The packed state machine of one ring cell.
///
/// One atomic word holds a writer flag byte plus one byte per reader
/// group. A cell is empty exactly when the writer flag is clear and
/// every registered group marked it read-done, which makes the empty
/// state a single canonical word and lets the writer claim it with one
/// compare-and-swap.
#[derive(Debug)]
pub struct CellState(AtomicU64);

impl CellState {
    /// A fresh cell: empty, as if all `groups` already consumed it
    pub fn new_empty(groups: usize) -> Self {
        Self(AtomicU64::new(group_word(groups, READ_DONE)))
    }

    /// Attempts to become the cell's writer.
    ///
    /// Succeeds only from the canonical empty state, so at most one
    /// writer flag is ever set.
    #[inline]
    pub fn try_claim_write(&self, groups: usize) -> bool {
        let empty = group_word(groups, READ_DONE);
        let claimed = empty | (WRITING << WRITER_SHIFT);
        self.0
            .compare_exchange(empty, claimed, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Publishes the written record: clears the writer flag and marks
    /// the cell readable for every registered group in one store.
    #[inline]
    pub fn publish(&self, groups: usize) {
        self.0.store(group_word(groups, READABLE), Ordering::Release);
    }

    /// Attempts to claim the record for one reader of `group`
    #[inline]
    pub fn try_claim_read(&self, group: usize) -> bool {
        let shift = 8 * group as u32;
        self.0
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |word| {
                if (word >> shift) as u8 == READABLE {
                    Some(word ^ (((READABLE ^ READING) as u64) << shift))
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Releases the record on behalf of `group`
    #[inline]
    pub fn finish_read(&self, group: usize) {
        let shift = 8 * group as u32;
        let previous = self
            .0
            .fetch_xor(((READING ^ READ_DONE) as u64) << shift, Ordering::Release);
        debug_assert_eq!((previous >> shift) as u8, READING);
    }

    #[cfg(test)]
    fn load(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_claims_only_the_empty_state() {
        let state = CellState::new_empty(2);
        assert!(state.try_claim_write(2));
        // a second writer must not claim the same cell
        assert!(!state.try_claim_write(2));

        state.publish(2);
        // readable cell is not empty either
        assert!(!state.try_claim_write(2));
    }

    #[test]
    fn each_group_claims_once_per_generation() {
        let state = CellState::new_empty(2);
        assert!(state.try_claim_write(2));
        state.publish(2);

        assert!(state.try_claim_read(0));
        assert!(!state.try_claim_read(0));
        assert!(state.try_claim_read(1));

        state.finish_read(0);
        state.finish_read(1);

        // all groups done, cell is empty again
        assert!(state.try_claim_write(2));
    }

    #[test]
    fn unregistered_group_bytes_stay_clear() {
        let state = CellState::new_empty(3);
        assert!(state.try_claim_write(3));
        state.publish(3);
        assert_eq!(state.load() >> (8 * 3), 0);
        assert!(!state.try_claim_read(4));
    }
}
