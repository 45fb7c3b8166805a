//! Meter configuration parameters
//!
//! Parameters are addressed by a one-byte id as delivered by the remote
//! configuration command. Each parameter declares its bounds and default;
//! [`MeterConfig::set`] refuses anything outside them, so the values that
//! reach the core are always pre-validated.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::storage::{ByteStorage, CONFIG_ADDR, CONFIG_IMAGE_LEN};

/// Upper bound of the odometer-style reading (eight decimal digits).
pub const READING_MODULUS: u32 = 100_000_000;

/// Delay before the first report after boot, capped by the report period.
pub const INITIAL_REPORT_DELAY_SECS: u32 = 30;

/// Tags a configuration image written by this firmware (layout version 1).
const CONFIG_MAGIC: u8 = 0xC1;

/// Identifier of a configurable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ParamId {
    /// Reading the meter shows when the device is installed
    InitialReading = 1,
    /// Seconds between unsolicited meter reports
    ReportPeriod = 2,
    /// Minimum spacing between accepted pulses, in milliseconds
    DebounceWindow = 3,
    /// Reading units added per accepted pulse
    ReadingIncrement = 4,
    /// Seconds between forced flushes of pending deltas
    FlushPeriod = 5,
}

/// Declared bounds and default of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub min: u32,
    pub max: u32,
    pub default: u32,
}

impl ParamSpec {
    pub const fn contains(&self, value: u32) -> bool {
        value >= self.min && value <= self.max
    }
}

impl ParamId {
    pub const ALL: [ParamId; 5] = [
        Self::InitialReading,
        Self::ReportPeriod,
        Self::DebounceWindow,
        Self::ReadingIncrement,
        Self::FlushPeriod,
    ];

    pub fn from_id(id: u8) -> Result<Self, ConfigError> {
        match id {
            1 => Ok(Self::InitialReading),
            2 => Ok(Self::ReportPeriod),
            3 => Ok(Self::DebounceWindow),
            4 => Ok(Self::ReadingIncrement),
            5 => Ok(Self::FlushPeriod),
            other => Err(ConfigError::UnknownParam(other)),
        }
    }

    pub const fn id(self) -> u8 {
        self as u8
    }

    pub const fn spec(self) -> ParamSpec {
        match self {
            Self::InitialReading => ParamSpec {
                min: 0,
                max: READING_MODULUS - 1,
                default: 0,
            },
            Self::ReportPeriod => ParamSpec {
                min: 30,
                max: 86_400,
                default: 3_600,
            },
            Self::DebounceWindow => ParamSpec {
                min: 0,
                max: 30_000,
                default: 5_000,
            },
            Self::ReadingIncrement => ParamSpec {
                min: 1,
                max: 10_000,
                default: 1,
            },
            Self::FlushPeriod => ParamSpec {
                min: 60,
                max: 86_400,
                default: 3_600,
            },
        }
    }
}

/// Current values of every parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterConfig {
    pub initial_reading: u32,
    pub report_period_secs: u32,
    pub debounce_window_ms: u32,
    pub reading_increment: u32,
    pub flush_period_secs: u32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            initial_reading: ParamId::InitialReading.spec().default,
            report_period_secs: ParamId::ReportPeriod.spec().default,
            debounce_window_ms: ParamId::DebounceWindow.spec().default,
            reading_increment: ParamId::ReadingIncrement.spec().default,
            flush_period_secs: ParamId::FlushPeriod.spec().default,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ConfigImage {
    magic: u8,
    config: MeterConfig,
}

impl MeterConfig {
    pub fn get(&self, param: ParamId) -> u32 {
        match param {
            ParamId::InitialReading => self.initial_reading,
            ParamId::ReportPeriod => self.report_period_secs,
            ParamId::DebounceWindow => self.debounce_window_ms,
            ParamId::ReadingIncrement => self.reading_increment,
            ParamId::FlushPeriod => self.flush_period_secs,
        }
    }

    /// Set a parameter, rejecting values outside its declared bounds.
    pub fn set(&mut self, param: ParamId, value: u32) -> Result<(), ConfigError> {
        if !param.spec().contains(value) {
            return Err(ConfigError::OutOfBounds { param, value });
        }
        let slot = match param {
            ParamId::InitialReading => &mut self.initial_reading,
            ParamId::ReportPeriod => &mut self.report_period_secs,
            ParamId::DebounceWindow => &mut self.debounce_window_ms,
            ParamId::ReadingIncrement => &mut self.reading_increment,
            ParamId::FlushPeriod => &mut self.flush_period_secs,
        };
        *slot = value;
        Ok(())
    }

    /// Check every value against its declared bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for param in ParamId::ALL {
            let value = self.get(param);
            if !param.spec().contains(value) {
                return Err(ConfigError::OutOfBounds { param, value });
            }
        }
        Ok(())
    }

    /// Seconds from boot until the first report is due.
    pub fn initial_report_delay_secs(&self) -> u32 {
        self.report_period_secs.min(INITIAL_REPORT_DELAY_SECS)
    }

    /// Write the configuration image to its storage region.
    pub fn store<S: ByteStorage>(&self, storage: &mut S) -> Result<(), ConfigError> {
        let mut buf = [0u8; CONFIG_IMAGE_LEN];
        let image = ConfigImage {
            magic: CONFIG_MAGIC,
            config: *self,
        };
        let used = postcard::to_slice(&image, &mut buf).map_err(|_| ConfigError::Corrupt)?;
        storage.write(CONFIG_ADDR, used)?;
        Ok(())
    }

    /// Read the configuration image back from storage.
    ///
    /// A blank region, a foreign image or any out-of-bounds value yields an
    /// error; callers fall back to [`MeterConfig::default`].
    pub fn load<S: ByteStorage>(storage: &mut S) -> Result<Self, ConfigError> {
        let mut buf = [0u8; CONFIG_IMAGE_LEN];
        storage.read(CONFIG_ADDR, &mut buf)?;
        let (image, _) =
            postcard::take_from_bytes::<ConfigImage>(&buf).map_err(|_| ConfigError::Corrupt)?;
        if image.magic != CONFIG_MAGIC {
            return Err(ConfigError::Corrupt);
        }
        image.config.validate()?;
        Ok(image.config)
    }
}
