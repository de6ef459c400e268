// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The output storage ring: the hand-off between flow-cache worker
//! threads (producers of completed flow records) and exporter threads
//! (consumers).
//!
//! Delivery contract: reader groups fan out (every group sees every
//! record); readers within one group load-balance (each record is
//! consumed by exactly one reader of the group).

mod backoff;
mod cell;
mod pool;
mod ring;

pub use backoff::Backoff;
pub use cell::MAX_READER_GROUPS;
pub use pool::SlotPool;
pub use ring::{
    OutputRing, OverflowPolicy, Reader, ReaderGroup, ReadOutcome, RingConfig, RingStats, Writer,
};
