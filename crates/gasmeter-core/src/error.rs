//! Error types shared across the meter core

use thiserror_no_std::Error;

use crate::config::ParamId;

/// Failure reported by the durable byte-storage collaborator.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("access of {len} bytes at address {address} is out of bounds")]
    OutOfBounds { address: u16, len: usize },
    #[error("storage device I/O failed")]
    Io,
}

/// Rejected or unreadable configuration.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown configuration parameter {0}")]
    UnknownParam(u8),
    #[error("value {value} out of bounds for {param:?}")]
    OutOfBounds { param: ParamId, value: u32 },
    #[error("no valid configuration image in storage")]
    Corrupt,
    #[error("configuration storage failed: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for ConfigError {
    fn from(e: StorageError) -> Self {
        ConfigError::Storage(e)
    }
}

/// Errors surfaced by the main-context meter operations.
///
/// Only storage failures reach this level. The platform treats them as fatal
/// and reboots, after which the seed-marker check runs again.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterError {
    #[error("durable storage failed: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for MeterError {
    fn from(e: StorageError) -> Self {
        MeterError::Storage(e)
    }
}
