//! Network report transport collaborator.

use thiserror_no_std::Error;

use crate::wake::WakeReason;

/// Channel carrying the meter value.
pub const METER_CHANNEL: u8 = 1;

/// Values handed to the transport for an unsolicited report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterReport {
    pub reading: u32,
    pub pulse_count: u32,
    pub wake_reason: WakeReason,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportError {
    #[error("transport not attached to a network")]
    NotAttached,
    #[error("report transmission failed")]
    SendFailed,
}

/// Radio stack that publishes the meter value.
pub trait ReportTransport {
    /// Whether the device is included in a network.
    fn is_attached(&self) -> bool;

    fn send_report(&mut self, channel: u8, report: &MeterReport) -> Result<(), ReportError>;

    /// Periodic "still alive" notification.
    fn send_keep_alive(&mut self) -> Result<(), ReportError>;

    /// Keep-alive period the network asked for, in seconds.
    ///
    /// `None` disables the keep-alive deadline.
    fn keep_alive_interval(&self) -> Option<u32>;
}
