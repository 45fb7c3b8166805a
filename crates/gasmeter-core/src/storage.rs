//! Durable byte storage collaborator and the meter's storage layout.
//!
//! Layout (little-endian):
//! - `0..4`:   reading base (u32)
//! - `4..8`:   pulse-count base (u32)
//! - `8..12`:  seed marker (u32)
//! - `16..48`: configuration image (postcard)
//!
//! The two bases are adjacent so a single write covers the pair; the
//! platform guarantees a write either lands fully or not at all.

use crate::error::StorageError;

pub const READING_BASE_ADDR: u16 = 0;
pub const PULSE_BASE_ADDR: u16 = 4;
pub const SEED_MARKER_ADDR: u16 = 8;
pub const CONFIG_ADDR: u16 = 16;
pub const CONFIG_IMAGE_LEN: usize = 32;

/// Bytes needed to hold the full layout.
pub const STORAGE_SIZE: usize = CONFIG_ADDR as usize + CONFIG_IMAGE_LEN;

/// Byte-addressed non-volatile storage (EEPROM, NVM page, file image).
///
/// Writes are slow and must only be issued from the main context.
pub trait ByteStorage {
    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), StorageError>;
    fn write(&mut self, address: u16, bytes: &[u8]) -> Result<(), StorageError>;
}

impl<T: ByteStorage + ?Sized> ByteStorage for &mut T {
    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), StorageError> {
        (**self).read(address, buf)
    }

    fn write(&mut self, address: u16, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).write(address, bytes)
    }
}

/// In-memory storage of `N` bytes, zero-filled like a blank EEPROM.
///
/// Counts the writes it receives so callers can check that redundant
/// flushes are skipped.
#[derive(Debug, Clone)]
pub struct RamStorage<const N: usize> {
    bytes: [u8; N],
    writes: usize,
}

impl<const N: usize> RamStorage<N> {
    pub const fn new() -> Self {
        Self {
            bytes: [0; N],
            writes: 0,
        }
    }

    /// Number of write operations performed so far.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.bytes
    }

    fn range(address: u16, len: usize) -> Result<core::ops::Range<usize>, StorageError> {
        let start = address as usize;
        match start.checked_add(len) {
            Some(end) if end <= N => Ok(start..end),
            _ => Err(StorageError::OutOfBounds { address, len }),
        }
    }
}

impl<const N: usize> Default for RamStorage<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ByteStorage for RamStorage<N> {
    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), StorageError> {
        let range = Self::range(address, buf.len())?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write(&mut self, address: u16, bytes: &[u8]) -> Result<(), StorageError> {
        let range = Self::range(address, bytes.len())?;
        self.bytes[range].copy_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }
}
