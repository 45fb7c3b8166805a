//! Durable record of the meter bases and the seed-marker check.

use log::{debug, info};

use crate::error::StorageError;
use crate::storage::{ByteStorage, READING_BASE_ADDR, SEED_MARKER_ADDR};

/// Durable tuple kept in storage.
///
/// `seed_marker` is a copy of the configured initial reading. It only serves
/// to tell a normal restart apart from a fresh install or a changed initial
/// reading.
///
/// Binary format (little-endian), 12 bytes:
/// - base_reading: 4 bytes (u32)
/// - base_pulse_count: 4 bytes (u32)
/// - seed_marker: 4 bytes (u32)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersistenceRecord {
    pub base_reading: u32,
    pub base_pulse_count: u32,
    pub seed_marker: u32,
}

impl PersistenceRecord {
    pub const SIZE: usize = 12;

    /// Fresh record for an install with the given initial reading.
    pub const fn seeded(initial_reading: u32) -> Self {
        Self {
            base_reading: initial_reading,
            base_pulse_count: 0,
            seed_marker: initial_reading,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.base_reading.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.base_pulse_count.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.seed_marker.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let word = |offset: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[offset..offset + 4]);
            u32::from_le_bytes(raw)
        };
        Self {
            base_reading: word(0),
            base_pulse_count: word(4),
            seed_marker: word(8),
        }
    }
}

/// Reads and writes the persisted bases.
///
/// Storage errors are returned to the caller untouched: the platform treats
/// them as fatal and the seed-marker check simply runs again after reboot.
pub struct PersistenceManager<S: ByteStorage> {
    storage: S,
}

impl<S: ByteStorage> PersistenceManager<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Load the bases, re-seeding when the stored marker differs from
    /// `configured_seed`.
    ///
    /// A mismatch covers both a blank device and an operator-changed initial
    /// reading. In that case all three fields are written before returning
    /// `(configured_seed, 0)`.
    pub fn initialize(&mut self, configured_seed: u32) -> Result<(u32, u32), StorageError> {
        let mut bytes = [0u8; PersistenceRecord::SIZE];
        self.storage.read(READING_BASE_ADDR, &mut bytes)?;
        let stored = PersistenceRecord::from_bytes(&bytes);

        if stored.seed_marker != configured_seed {
            info!(
                "Seed marker {} differs from initial reading {}, re-seeding",
                stored.seed_marker, configured_seed
            );
            let record = PersistenceRecord::seeded(configured_seed);
            self.storage.write(READING_BASE_ADDR, &record.to_bytes())?;
            return Ok((record.base_reading, record.base_pulse_count));
        }

        debug!(
            "Loaded bases: reading {}, pulses {}",
            stored.base_reading, stored.base_pulse_count
        );
        Ok((stored.base_reading, stored.base_pulse_count))
    }

    /// Durably write both bases with a single storage write.
    pub fn persist(&mut self, base_reading: u32, base_pulse_count: u32) -> Result<(), StorageError> {
        let mut bytes = [0u8; 8];
        bytes[0..4].copy_from_slice(&base_reading.to_le_bytes());
        bytes[4..8].copy_from_slice(&base_pulse_count.to_le_bytes());
        self.storage.write(READING_BASE_ADDR, &bytes)?;
        debug!(
            "Persisted bases: reading {}, pulses {}",
            base_reading, base_pulse_count
        );
        Ok(())
    }

    /// Seed marker currently held in storage.
    pub fn stored_seed(&mut self) -> Result<u32, StorageError> {
        let mut raw = [0u8; 4];
        self.storage.read(SEED_MARKER_ADDR, &mut raw)?;
        Ok(u32::from_le_bytes(raw))
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }
}
