//! Low-power wake timer collaborator and wake-cause classification.

use embassy_time::Duration;

/// Why the device became active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    PowerOn,
    ManualReset,
    ExternalPin,
    ScheduledTimer,
    Watchdog,
    Other,
}

impl WakeReason {
    /// Decode the platform reset-cause code latched at wake.
    ///
    /// Codes follow the common low-power SoC convention: 0 power-on,
    /// 1 reset pin, 2 external interrupt pin, 3 wake timer, 4 watchdog.
    pub const fn from_reset_code(code: u8) -> Self {
        match code {
            0 => Self::PowerOn,
            1 => Self::ManualReset,
            2 => Self::ExternalPin,
            3 => Self::ScheduledTimer,
            4 => Self::Watchdog,
            _ => Self::Other,
        }
    }

    /// Whether the counters must be re-loaded because RAM was lost.
    pub const fn is_cold_start(self) -> bool {
        matches!(self, Self::PowerOn | Self::ManualReset | Self::Watchdog)
    }
}

/// One-shot wake timer used before entering sleep.
pub trait WakeTimer {
    /// Fire once after `after`; re-arming replaces any previous setting.
    fn arm(&mut self, after: Duration);

    /// Cause of the current activation.
    fn wake_reason(&self) -> WakeReason;
}

impl<T: WakeTimer + ?Sized> WakeTimer for &mut T {
    fn arm(&mut self, after: Duration) {
        (**self).arm(after)
    }

    fn wake_reason(&self) -> WakeReason {
        (**self).wake_reason()
    }
}
