//! Switch-bounce filter for the pulse interrupt.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::clock::{Timestamp, elapsed};

/// Debounce state shared between the edge interrupt and the main context.
///
/// Only the interrupt mutates `last_accepted` and `primed`; the main context
/// only changes the window. Every field is a single 32-bit (or smaller) word,
/// so plain atomic loads and stores are enough.
pub struct Debouncer {
    last_accepted: AtomicU32,
    primed: AtomicBool,
    window_ms: AtomicU32,
}

impl Debouncer {
    pub const fn new(window_ms: u32) -> Self {
        Self {
            last_accepted: AtomicU32::new(0),
            primed: AtomicBool::new(false),
            window_ms: AtomicU32::new(window_ms),
        }
    }

    /// Decide whether an edge at `now` is a new physical pulse.
    ///
    /// The first edge after boot is always accepted. Afterwards an edge is
    /// rejected while less than the window has elapsed since the last
    /// accepted one. Interrupt-safe: no I/O, no allocation, no locking.
    pub fn accept(&self, now: Timestamp) -> bool {
        if self.primed.load(Ordering::Relaxed) {
            let last = Timestamp(self.last_accepted.load(Ordering::Relaxed));
            if elapsed(last, now) < self.window_ms.load(Ordering::Relaxed) {
                return false;
            }
        }
        self.last_accepted.store(now.0, Ordering::Relaxed);
        self.primed.store(true, Ordering::Relaxed);
        true
    }

    pub fn window_ms(&self) -> u32 {
        self.window_ms.load(Ordering::Relaxed)
    }

    pub fn set_window_ms(&self, window_ms: u32) {
        self.window_ms.store(window_ms, Ordering::Relaxed);
    }

    /// Timestamp of the last accepted pulse, if any.
    pub fn last_accepted(&self) -> Option<Timestamp> {
        self.primed
            .load(Ordering::Relaxed)
            .then(|| Timestamp(self.last_accepted.load(Ordering::Relaxed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_pulse_always_accepted() {
        for start in [0, 1_000, u32::MAX] {
            let debouncer = Debouncer::new(30_000);
            assert!(debouncer.accept(Timestamp(start)));
            assert_eq!(debouncer.last_accepted(), Some(Timestamp(start)));
        }
    }

    #[test]
    fn test_window_boundary() {
        let debouncer = Debouncer::new(5_000);
        let t = Timestamp(10_000);
        assert!(debouncer.accept(t));
        assert!(!debouncer.accept(t.add_millis(4_999)));
        assert!(debouncer.accept(t.add_millis(5_000)));
    }

    #[test]
    fn test_rejected_edge_does_not_restart_window() {
        let debouncer = Debouncer::new(5_000);
        assert!(debouncer.accept(Timestamp(0)));
        assert!(!debouncer.accept(Timestamp(4_000)));
        assert!(debouncer.accept(Timestamp(5_000)));
    }

    #[test]
    fn test_bounce_burst_scenario() {
        let debouncer = Debouncer::new(5_000);
        let accepted: usize = [0, 100, 6_000, 6_050]
            .into_iter()
            .filter(|&t| debouncer.accept(Timestamp(t)))
            .count();
        assert_eq!(accepted, 2);
        assert_eq!(debouncer.last_accepted(), Some(Timestamp(6_000)));
    }

    #[test]
    fn test_window_across_wrap() {
        let debouncer = Debouncer::new(5_000);
        let t = Timestamp(u32::MAX - 1_000);
        assert!(debouncer.accept(t));
        assert!(!debouncer.accept(t.add_millis(3_000)));
        assert!(debouncer.accept(t.add_millis(5_000)));
    }

    #[test]
    fn test_zero_window_accepts_everything() {
        let debouncer = Debouncer::new(0);
        assert!(debouncer.accept(Timestamp(5)));
        assert!(debouncer.accept(Timestamp(5)));
    }

    #[test]
    fn test_window_change_applies_immediately() {
        let debouncer = Debouncer::new(5_000);
        assert!(debouncer.accept(Timestamp(0)));
        debouncer.set_window_ms(1_000);
        assert_eq!(debouncer.window_ms(), 1_000);
        assert!(debouncer.accept(Timestamp(1_000)));
    }
}
