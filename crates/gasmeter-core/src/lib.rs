//! Hardware-independent core library for the gas meter pulse counter
//!
//! This crate contains the platform-agnostic logic of a battery-powered meter
//! agent: wraparound-aware millisecond clock arithmetic, the debounced pulse
//! input shared with the edge interrupt, the persisted base+delta counters,
//! the schedule arbiter that picks the next wake, and the lifecycle driver
//! that ties them together on every activation.
//!
//! It is `#![no_std]` so it compiles on both the battery-powered MCU target
//! and desktop hosts (for the simulator and tests). Hardware access is
//! expressed through the collaborator traits in [`storage`], [`wake`] and
//! [`report`].

#![no_std]

pub mod clock;
pub mod config;
pub mod counter;
pub mod debounce;
pub mod error;
pub mod lifecycle;
pub mod meter;
pub mod persistence;
pub mod pulse;
pub mod report;
pub mod schedule;
pub mod storage;
pub mod wake;

pub use clock::Timestamp;
pub use config::{MeterConfig, ParamId};
pub use error::{ConfigError, MeterError, StorageError};
pub use lifecycle::MeterAgent;
pub use meter::Meter;
pub use pulse::PulseInput;
