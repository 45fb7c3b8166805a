//! Interrupt-facing pulse input.
//!
//! [`PulseInput`] owns every piece of state the edge interrupt touches: the
//! debounce filter, the per-pulse increment and the two unpersisted deltas.
//! It is built with a `const fn` so firmware can keep it in a `static` and
//! hand `&'static PulseInput` to both the interrupt and the main loop.
//!
//! The delta pair is only updated inside `critical_section::with`, using
//! plain 32-bit loads and stores. The pair therefore moves together, and
//! cores without read-modify-write atomics are supported. The section never
//! spans storage I/O.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::clock::Timestamp;
use crate::config::ParamId;
use crate::debounce::Debouncer;

/// Increments accumulated since the last reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deltas {
    pub reading: u32,
    pub pulses: u32,
}

impl Deltas {
    pub const fn is_empty(&self) -> bool {
        self.reading == 0 && self.pulses == 0
    }
}

pub struct PulseInput {
    debouncer: Debouncer,
    increment: AtomicU32,
    reading_delta: AtomicU32,
    pulse_delta: AtomicU32,
}

impl PulseInput {
    pub const fn new(debounce_window_ms: u32, reading_increment: u32) -> Self {
        Self {
            debouncer: Debouncer::new(debounce_window_ms),
            increment: AtomicU32::new(reading_increment),
            reading_delta: AtomicU32::new(0),
            pulse_delta: AtomicU32::new(0),
        }
    }

    /// Input using the declared parameter defaults.
    pub const fn with_defaults() -> Self {
        Self::new(
            ParamId::DebounceWindow.spec().default,
            ParamId::ReadingIncrement.spec().default,
        )
    }

    /// Interrupt entry point for a pulse edge observed at `now`.
    ///
    /// Returns whether the edge was counted.
    pub fn on_pulse_edge(&self, now: Timestamp) -> bool {
        if !self.debouncer.accept(now) {
            return false;
        }
        self.record_pulse();
        true
    }

    /// Add one pulse and one increment to the pending deltas.
    pub fn record_pulse(&self) {
        let increment = self.increment.load(Ordering::Relaxed);
        critical_section::with(|_| {
            let reading = self.reading_delta.load(Ordering::Relaxed);
            self.reading_delta
                .store(reading.wrapping_add(increment), Ordering::Relaxed);
            let pulses = self.pulse_delta.load(Ordering::Relaxed);
            self.pulse_delta
                .store(pulses.wrapping_add(1), Ordering::Relaxed);
        });
    }

    /// Take the pending deltas, leaving zero behind.
    pub fn take_deltas(&self) -> Deltas {
        critical_section::with(|_| {
            let deltas = Deltas {
                reading: self.reading_delta.load(Ordering::Relaxed),
                pulses: self.pulse_delta.load(Ordering::Relaxed),
            };
            self.reading_delta.store(0, Ordering::Relaxed);
            self.pulse_delta.store(0, Ordering::Relaxed);
            deltas
        })
    }

    /// Pending deltas without consuming them.
    pub fn pending(&self) -> Deltas {
        critical_section::with(|_| Deltas {
            reading: self.reading_delta.load(Ordering::Relaxed),
            pulses: self.pulse_delta.load(Ordering::Relaxed),
        })
    }

    pub fn set_debounce_window_ms(&self, window_ms: u32) {
        self.debouncer.set_window_ms(window_ms);
    }

    pub fn debounce_window_ms(&self) -> u32 {
        self.debouncer.window_ms()
    }

    pub fn set_reading_increment(&self, increment: u32) {
        self.increment.store(increment, Ordering::Relaxed);
    }

    pub fn reading_increment(&self) -> u32 {
        self.increment.load(Ordering::Relaxed)
    }

    pub fn last_pulse(&self) -> Option<Timestamp> {
        self.debouncer.last_accepted()
    }
}

impl Default for PulseInput {
    fn default() -> Self {
        Self::with_defaults()
    }
}
