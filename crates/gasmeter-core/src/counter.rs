//! Persisted base of a delta-accumulating counter.
//!
//! The logical value of a counter is `base + pending delta`. The delta lives
//! in [`PulseInput`](crate::pulse::PulseInput) so the interrupt never touches
//! storage; the base lives here and is only changed from the main context
//! when a delta is folded in.

use crate::config::READING_MODULUS;

/// Selects one of the meter's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    /// Scaled physical quantity, wraps like an odometer
    Reading,
    /// Raw accepted pulses
    PulseCount,
}

impl CounterKind {
    /// Odometer modulus applied when folding a delta, if any.
    pub const fn modulus(self) -> Option<u32> {
        match self {
            Self::Reading => Some(READING_MODULUS),
            Self::PulseCount => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedCounter {
    base: u32,
    valid: bool,
    modulus: Option<u32>,
}

impl PersistedCounter {
    pub const fn new(kind: CounterKind) -> Self {
        Self {
            base: 0,
            valid: false,
            modulus: kind.modulus(),
        }
    }

    /// Whether the base has been loaded this power cycle.
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Install a base read from storage.
    pub fn load(&mut self, base: u32) {
        self.base = self.wrap(base as u64);
        self.valid = true;
    }

    /// Forget the base so the next access reloads it.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Fold `delta` into the base, returning whether the base changed.
    pub fn fold(&mut self, delta: u32) -> bool {
        if delta == 0 {
            return false;
        }
        let before = self.base;
        self.base = self.wrap(self.base as u64 + delta as u64);
        self.base != before
    }

    /// Zero the base.
    pub fn clear(&mut self) {
        self.base = 0;
    }

    fn wrap(&self, value: u64) -> u32 {
        match self.modulus {
            Some(modulus) => (value % modulus as u64) as u32,
            None => value as u32,
        }
    }
}
