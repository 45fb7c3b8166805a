//! Schedule arbiter: tracks the recurring deadlines and picks the next wake.
//!
//! Each deadline cycles pending -> due -> serviced -> pending. "Due" is only
//! observed at wake time through [`ScheduleArbiter::due`]; servicing is
//! acknowledged with [`ScheduleArbiter::complete`], which computes the next
//! due instant.

use embassy_time::Duration;
use heapless::Vec;
use log::debug;

use crate::clock::{HALF_RANGE, Timestamp};

/// Never sleep for less than this, to avoid busy-waking.
pub const MIN_LEAD_SECS: u32 = 1;

/// Added to every sleep so the wake lands strictly after the due instant.
pub const WAKE_SLACK_SECS: u32 = 1;

/// Longest period a deadline can be scheduled ahead and still read as
/// pending on the wrapping millisecond clock.
pub const MAX_PERIOD_SECS: u32 = (HALF_RANGE - 1) / 1000;

/// Recurring actions, declared in tie-break order: when two deadlines are
/// equally soon, the earlier variant wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeadlineLabel {
    Report,
    Flush,
    KeepAlive,
}

impl DeadlineLabel {
    pub const COUNT: usize = 3;
    pub const ALL: [DeadlineLabel; Self::COUNT] = [Self::Report, Self::Flush, Self::KeepAlive];

    const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub label: DeadlineLabel,
    pub due_at: Timestamp,
}

/// Where to park the wake timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakePlan {
    pub label: DeadlineLabel,
    pub due_at: Timestamp,
    pub sleep_secs: u32,
}

impl WakePlan {
    pub fn sleep(&self) -> Duration {
        Duration::from_secs(self.sleep_secs as u64)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleArbiter {
    deadlines: [Option<Timestamp>; DeadlineLabel::COUNT],
}

impl ScheduleArbiter {
    pub const fn new() -> Self {
        Self {
            deadlines: [None; DeadlineLabel::COUNT],
        }
    }

    /// Start tracking `label`, or move it, with an explicit due instant.
    pub fn track(&mut self, label: DeadlineLabel, due_at: Timestamp) {
        self.deadlines[label.index()] = Some(due_at);
    }

    pub fn untrack(&mut self, label: DeadlineLabel) {
        self.deadlines[label.index()] = None;
    }

    pub fn is_tracked(&self, label: DeadlineLabel) -> bool {
        self.deadlines[label.index()].is_some()
    }

    pub fn deadline(&self, label: DeadlineLabel) -> Option<Deadline> {
        self.deadlines[label.index()].map(|due_at| Deadline { label, due_at })
    }

    /// Set `label` due `period_secs` after `now`.
    ///
    /// Used when a configuration change alters the period.
    pub fn reschedule(&mut self, label: DeadlineLabel, now: Timestamp, period_secs: u32) {
        let due_at = now.add_secs(period_secs);
        debug!("{:?} rescheduled to {}", label, due_at);
        self.track(label, due_at);
    }

    /// Acknowledge that `label` was serviced and schedule its next round.
    ///
    /// The next due instant is one period after the previous one, so the
    /// time spent waking and servicing never accumulates as drift. If the
    /// device overslept past that instant as well, it restarts from `now`.
    pub fn complete(&mut self, label: DeadlineLabel, now: Timestamp, period_secs: u32) {
        let next = match self.deadlines[label.index()] {
            Some(previous) => previous.add_secs(period_secs),
            None => now.add_secs(period_secs),
        };
        if next.is_reached_at(now) {
            self.reschedule(label, now, period_secs);
        } else {
            debug!("{:?} next due at {}", label, next);
            self.track(label, next);
        }
    }

    pub fn is_due(&self, label: DeadlineLabel, now: Timestamp) -> bool {
        self.deadlines[label.index()].is_some_and(|due_at| due_at.is_reached_at(now))
    }

    /// Labels due at `now`, in tie-break order.
    pub fn due(&self, now: Timestamp) -> Vec<DeadlineLabel, { DeadlineLabel::COUNT }> {
        DeadlineLabel::ALL
            .into_iter()
            .filter(|&label| self.is_due(label, now))
            .collect()
    }

    /// Soonest tracked deadline and the sleep needed to reach it.
    ///
    /// The sleep is rounded up to whole seconds, clamped to
    /// [`MIN_LEAD_SECS`] and padded with [`WAKE_SLACK_SECS`].
    pub fn next_deadline(&self, now: Timestamp) -> Option<WakePlan> {
        let mut best: Option<(Deadline, u32)> = None;
        for label in DeadlineLabel::ALL {
            let Some(deadline) = self.deadline(label) else {
                continue;
            };
            let remaining = deadline.due_at.remaining_at(now);
            match best {
                Some((_, best_remaining)) if best_remaining <= remaining => {}
                _ => best = Some((deadline, remaining)),
            }
        }

        best.map(|(deadline, remaining_ms)| WakePlan {
            label: deadline.label,
            due_at: deadline.due_at,
            sleep_secs: remaining_ms.div_ceil(1000).max(MIN_LEAD_SECS) + WAKE_SLACK_SECS,
        })
    }
}
