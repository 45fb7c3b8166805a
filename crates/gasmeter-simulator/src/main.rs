//! Desktop simulator for the gas meter pulse counter.
//!
//! Drives `gasmeter-core` on a virtual millisecond clock that starts shortly
//! before the 32-bit wrap point, feeding it a reed-switch pulse train with
//! contact bounce. The EEPROM is a file, so running the simulator again
//! resumes from the persisted total like a device after a battery swap.
//!
//! # Usage
//!
//! ```text
//! RUST_LOG=debug gasmeter-simulator [eeprom-image] [hours]
//! ```

use std::fs;
use std::path::PathBuf;

use embassy_time::Duration;
use log::{error, info};

use gasmeter_core::report::{MeterReport, ReportError, ReportTransport};
use gasmeter_core::storage::{ByteStorage, STORAGE_SIZE};
use gasmeter_core::wake::{WakeReason, WakeTimer};
use gasmeter_core::{MeterAgent, ParamId, PulseInput, StorageError, Timestamp};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

const DEFAULT_IMAGE: &str = "gasmeter_eeprom.bin";
const DEFAULT_HOURS: u32 = 6;

/// Longest run whose end still lies within half the millisecond clock range.
const MAX_HOURS: u32 = 596;

/// Virtual clock start, two hours before the millisecond counter wraps.
const CLOCK_START_MS: u32 = u32::MAX - 2 * 3_600_000;

/// Keep-alive period requested by the simulated network.
const KEEP_ALIVE_SECS: u32 = 4 * 3_600;

/// Bounce edges following each real contact closure, in ms after it.
const BOUNCE_OFFSETS_MS: [u32; 3] = [3, 11, 27];

/// Edge interrupt shared with the agent, as on the device.
static PULSES: PulseInput = PulseInput::with_defaults();

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// EEPROM image kept in a file, rewritten on every write.
struct FileStorage {
    path: PathBuf,
    bytes: [u8; STORAGE_SIZE],
    writes: usize,
}

impl FileStorage {
    fn open(path: PathBuf) -> Self {
        let mut bytes = [0u8; STORAGE_SIZE];
        match fs::read(&path) {
            Ok(contents) => {
                let len = contents.len().min(STORAGE_SIZE);
                bytes[..len].copy_from_slice(&contents[..len]);
                info!("Loaded EEPROM image {}", path.display());
            }
            Err(_) => info!("No EEPROM image at {}, starting blank", path.display()),
        }
        Self {
            path,
            bytes,
            writes: 0,
        }
    }

    fn range(address: u16, len: usize) -> Result<std::ops::Range<usize>, StorageError> {
        let start = address as usize;
        let end = start + len;
        if end > STORAGE_SIZE {
            return Err(StorageError::OutOfBounds { address, len });
        }
        Ok(start..end)
    }
}

impl ByteStorage for FileStorage {
    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), StorageError> {
        let range = Self::range(address, buf.len())?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write(&mut self, address: u16, bytes: &[u8]) -> Result<(), StorageError> {
        let range = Self::range(address, bytes.len())?;
        let mut image = self.bytes;
        image[range].copy_from_slice(bytes);
        fs::write(&self.path, image).map_err(|e| {
            error!("Writing {} failed: {}", self.path.display(), e);
            StorageError::Io
        })?;
        self.bytes = image;
        self.writes += 1;
        Ok(())
    }
}

/// Radio stand-in that logs what would go over the air.
struct LogTransport {
    reports: usize,
}

impl ReportTransport for LogTransport {
    fn is_attached(&self) -> bool {
        true
    }

    fn send_report(&mut self, channel: u8, report: &MeterReport) -> Result<(), ReportError> {
        self.reports += 1;
        info!(
            "[radio] channel {}: reading {:08} ({} pulses, woke by {:?})",
            channel, report.reading, report.pulse_count, report.wake_reason
        );
        Ok(())
    }

    fn send_keep_alive(&mut self) -> Result<(), ReportError> {
        info!("[radio] keep-alive");
        Ok(())
    }

    fn keep_alive_interval(&self) -> Option<u32> {
        Some(KEEP_ALIVE_SECS)
    }
}

/// Wake timer that remembers the last armed sleep.
struct SimTimer {
    reason: WakeReason,
    armed: Option<Duration>,
}

impl WakeTimer for SimTimer {
    fn arm(&mut self, after: Duration) {
        self.armed = Some(after);
    }

    fn wake_reason(&self) -> WakeReason {
        self.reason
    }
}

// ---------------------------------------------------------------------------
// Pulse generation
// ---------------------------------------------------------------------------

/// Generates dial rotations with idle stretches, deterministic per seed.
struct MockDial {
    state: u32,
}

impl MockDial {
    fn new(seed: u32) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u32(&mut self) -> u32 {
        // xorshift32
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Milliseconds until the next contact closure.
    fn next_gap_ms(&mut self) -> u32 {
        if self.next_u32() % 10 == 0 {
            // burner off for a while
            600_000 + self.next_u32() % 1_800_000
        } else {
            15_000 + self.next_u32() % 90_000
        }
    }
}

/// Parse the run length argument, rejecting runs the clock cannot span.
fn parse_hours(arg: Option<String>) -> Result<u32, String> {
    let Some(arg) = arg else {
        return Ok(DEFAULT_HOURS);
    };
    let hours: u32 = arg
        .parse()
        .map_err(|_| format!("invalid hours {:?}", arg))?;
    if hours > MAX_HOURS {
        return Err(format!("{} hours exceeds the maximum of {}", hours, MAX_HOURS));
    }
    Ok(hours)
}

/// Edge times of one contact closure including its bounce.
fn closure_edges(at: Timestamp) -> impl Iterator<Item = Timestamp> {
    std::iter::once(at).chain(BOUNCE_OFFSETS_MS.into_iter().map(move |ms| at.add_millis(ms)))
}

// ---------------------------------------------------------------------------
// Main loop
// ---------------------------------------------------------------------------

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let image = PathBuf::from(args.next().unwrap_or_else(|| DEFAULT_IMAGE.to_string()));
    let hours = match parse_hours(args.next()) {
        Ok(hours) => hours,
        Err(e) => {
            error!("{}", e);
            return;
        }
    };

    let storage = FileStorage::open(image);
    let transport = LogTransport { reports: 0 };
    let timer = SimTimer {
        reason: WakeReason::PowerOn,
        armed: None,
    };
    let mut agent = MeterAgent::from_storage(&PULSES, storage, transport, timer);

    let start = Timestamp(CLOCK_START_MS);
    let end = start.add_secs(hours * 3_600);
    let reconfigure_at = start.add_secs(hours * 3_600 / 3);
    let mut reconfigured = false;

    let mut dial = MockDial::new(0x6A5_3E7E);
    let mut next_closure = start.add_millis(dial.next_gap_ms());
    let mut now = start;

    info!("Simulating {}h starting at {}", hours, now);

    loop {
        if let Err(e) = agent.activate(now) {
            error!("Fatal: {}; the device would reboot here", e);
            return;
        }
        let wake_at = match agent.timer_mut().armed.take() {
            Some(sleep) => now.add_millis(sleep.as_millis() as u32),
            None => end,
        };

        // Sleep until either the wake timer or the next contact closure
        if next_closure.remaining_at(now) < wake_at.remaining_at(now) {
            for edge in closure_edges(next_closure) {
                agent.on_pulse_edge(edge);
            }
            now = next_closure.add_millis(BOUNCE_OFFSETS_MS[BOUNCE_OFFSETS_MS.len() - 1]);
            next_closure = next_closure.add_millis(dial.next_gap_ms());
            agent.timer_mut().reason = WakeReason::ExternalPin;
        } else {
            now = wake_at;
            agent.timer_mut().reason = WakeReason::ScheduledTimer;
        }

        if end.is_reached_at(now) {
            break;
        }

        if !reconfigured && reconfigure_at.is_reached_at(now) {
            reconfigured = true;
            info!("Operator shortens the report period to 15 minutes");
            if let Err(e) = agent.on_config_changed(ParamId::ReportPeriod, 900, now) {
                error!("Configuration rejected: {}", e);
            }
        }
    }

    match (agent.current_reading(), agent.current_pulse_count()) {
        (Ok(reading), Ok(pulses)) => info!(
            "Done at {}: reading {:08}, {} pulses, {} reports, {} EEPROM writes",
            now,
            reading,
            pulses,
            agent.transport().reports,
            agent.meter().storage().writes
        ),
        (Err(e), _) | (_, Err(e)) => error!("Final read failed: {}", e),
    }
}
