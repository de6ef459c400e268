// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{fmt, ops::Add, time::Duration};
use std::time::{SystemTime, UNIX_EPOCH};

/// An absolute point in time, measured from the unix epoch.
///
/// Packet sources stamp packets with wall-clock capture times, and the
/// IPFIX wire format carries unix seconds/milliseconds, so unlike a
/// monotonic `Instant` this is calendar time by construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    pub const EPOCH: Self = Self(Duration::ZERO);

    #[inline]
    pub const fn from_duration(since_epoch: Duration) -> Self {
        Self(since_epoch)
    }

    #[inline]
    pub const fn from_unix(secs: u64, nanos: u32) -> Self {
        Self(Duration::new(secs, nanos))
    }

    /// The current wall-clock time.
    #[inline]
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self(since_epoch)
    }

    #[inline]
    pub const fn as_duration(self) -> Duration {
        self.0
    }

    #[inline]
    pub const fn as_secs(self) -> u64 {
        self.0.as_secs()
    }

    /// Unix milliseconds, as carried by `flowStartMilliseconds`-style
    /// IPFIX elements.
    #[inline]
    pub const fn as_unix_millis(self) -> u64 {
        self.0.as_millis() as u64
    }

    #[inline]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:09}", self.0.as_secs(), self.0.subsec_nanos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_round_down() {
        let ts = Timestamp::from_unix(12, 345_678_901);
        assert_eq!(ts.as_secs(), 12);
        assert_eq!(ts.as_unix_millis(), 12_345);
    }

    #[test]
    fn ordering_follows_the_clock() {
        let a = Timestamp::from_unix(1, 0);
        let b = a + Duration::from_millis(1);
        assert!(b > a);
        assert_eq!(b.saturating_duration_since(a), Duration::from_millis(1));
        assert_eq!(a.saturating_duration_since(b), Duration::ZERO);
    }
}
