//! Wraparound-aware millisecond clock arithmetic.
//!
//! Device time is a 32-bit millisecond counter since boot that wraps after
//! roughly 49.7 days. The ring is split into two half-planes: an interval
//! below [`HALF_RANGE`] is "recently before", anything at or above it is
//! "in the future". Timestamps deliberately do not implement `PartialOrd`;
//! every ordering decision goes through [`elapsed`] or [`is_due`].

use core::fmt::Display;

/// Half of the 32-bit timestamp ring.
pub const HALF_RANGE: u32 = 1 << 31;

/// Milliseconds since boot, wrapping at `u32::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Timestamp(pub u32);

impl Timestamp {
    /// Timestamp at boot.
    pub const ZERO: Self = Self(0);

    pub const fn from_millis(ms: u32) -> Self {
        Self(ms)
    }

    pub const fn as_millis(self) -> u32 {
        self.0
    }

    /// `self + ms`, wrapping around the ring.
    pub const fn add_millis(self, ms: u32) -> Self {
        Self(self.0.wrapping_add(ms))
    }

    /// `self + secs` seconds, wrapping around the ring.
    pub const fn add_secs(self, secs: u32) -> Self {
        self.add_millis(secs.wrapping_mul(1000))
    }

    /// Milliseconds from `earlier` up to `self`. See [`elapsed`].
    pub fn elapsed_since(self, earlier: Timestamp) -> u32 {
        elapsed(earlier, self)
    }

    /// Whether `self`, taken as a deadline, has been reached at `now`.
    pub fn is_reached_at(self, now: Timestamp) -> bool {
        is_due(self, now)
    }

    /// Milliseconds left until `self` is reached, zero if already due.
    pub fn remaining_at(self, now: Timestamp) -> u32 {
        if is_due(self, now) {
            0
        } else {
            self.0.wrapping_sub(now.0)
        }
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Milliseconds elapsed from `since` to `now`.
///
/// Uses wrapping subtraction, so a short forward interval across the
/// overflow point is still reported as a small number. A raw difference past
/// the half range means `since` actually lies ahead of `now`; it is folded
/// back by subtracting [`HALF_RANGE`].
pub fn elapsed(since: Timestamp, now: Timestamp) -> u32 {
    let raw = now.0.wrapping_sub(since.0);
    if raw > HALF_RANGE { raw - HALF_RANGE } else { raw }
}

/// True once `now` has reached or passed `deadline`.
pub fn is_due(deadline: Timestamp, now: Timestamp) -> bool {
    now.0.wrapping_sub(deadline.0) < HALF_RANGE
}
