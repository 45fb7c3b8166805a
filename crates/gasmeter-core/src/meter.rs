//! Reading and pulse-count counters with crash-consistent persistence.
//!
//! [`Meter`] is the main-context half of the counter pair. It loads the
//! persisted bases lazily (running the seed-marker check once per power
//! cycle), folds deltas collected by the interrupt into the bases and writes
//! the result back. Reconciliation only writes when a base actually changed,
//! so back-to-back reads cost a single storage write at most.

use log::{debug, info, warn};

use crate::clock::Timestamp;
use crate::counter::{CounterKind, PersistedCounter};
use crate::error::MeterError;
use crate::persistence::PersistenceManager;
use crate::pulse::PulseInput;
use crate::storage::ByteStorage;

pub struct Meter<'a, S: ByteStorage> {
    input: &'a PulseInput,
    persistence: PersistenceManager<S>,
    reading: PersistedCounter,
    pulses: PersistedCounter,
    /// Configured initial reading, compared against the stored seed marker
    seed: u32,
}

impl<'a, S: ByteStorage> Meter<'a, S> {
    pub fn new(input: &'a PulseInput, storage: S, initial_reading: u32) -> Self {
        Self {
            input,
            persistence: PersistenceManager::new(storage),
            reading: PersistedCounter::new(CounterKind::Reading),
            pulses: PersistedCounter::new(CounterKind::PulseCount),
            seed: initial_reading,
        }
    }

    pub fn input(&self) -> &'a PulseInput {
        self.input
    }

    /// Interrupt entry point; see [`PulseInput::on_pulse_edge`].
    pub fn on_pulse_edge(&self, now: Timestamp) -> bool {
        self.input.on_pulse_edge(now)
    }

    /// Load the persisted bases if this has not happened yet this cycle.
    pub fn ensure_loaded(&mut self) -> Result<(), MeterError> {
        if self.reading.is_valid() && self.pulses.is_valid() {
            return Ok(());
        }
        let (reading, pulses) = self.persistence.initialize(self.seed)?;
        self.reading.load(reading);
        self.pulses.load(pulses);
        Ok(())
    }

    /// Fold pending deltas into both bases and persist them if they changed.
    pub fn reconcile(&mut self) -> Result<(), MeterError> {
        self.ensure_loaded()?;

        let deltas = self.input.take_deltas();
        if deltas.is_empty() {
            return Ok(());
        }

        let reading_changed = self.reading.fold(deltas.reading);
        let pulses_changed = self.pulses.fold(deltas.pulses);
        if reading_changed || pulses_changed {
            self.persistence
                .persist(self.reading.base(), self.pulses.base())?;
            debug!(
                "Reconciled {} pulses (+{}): reading {}, pulse count {}",
                deltas.pulses,
                deltas.reading,
                self.reading.base(),
                self.pulses.base()
            );
        }
        Ok(())
    }

    /// Reconciled value of a counter.
    ///
    /// Must only be called from the main context: it may write storage.
    pub fn read(&mut self, kind: CounterKind) -> Result<u32, MeterError> {
        self.reconcile()?;
        Ok(self.counter(kind).base())
    }

    /// Reading and pulse count from a single reconciliation, so both
    /// reflect the same set of accepted pulses.
    pub fn snapshot(&mut self) -> Result<(u32, u32), MeterError> {
        self.reconcile()?;
        Ok((self.reading.base(), self.pulses.base()))
    }

    pub fn current_reading(&mut self) -> Result<u32, MeterError> {
        self.read(CounterKind::Reading)
    }

    pub fn current_pulse_count(&mut self) -> Result<u32, MeterError> {
        self.read(CounterKind::PulseCount)
    }

    /// Zero a counter and persist immediately.
    ///
    /// Any delta pending on the other counter is kept by folding it in
    /// before the write; the target's own delta is discarded.
    pub fn reset(&mut self, kind: CounterKind) -> Result<(), MeterError> {
        self.ensure_loaded()?;

        let deltas = self.input.take_deltas();
        match kind {
            CounterKind::Reading => {
                self.pulses.fold(deltas.pulses);
                self.reading.clear();
            }
            CounterKind::PulseCount => {
                self.reading.fold(deltas.reading);
                self.pulses.clear();
            }
        }
        self.persistence
            .persist(self.reading.base(), self.pulses.base())?;
        info!("{:?} counter reset", kind);
        Ok(())
    }

    pub fn reset_reading(&mut self) -> Result<(), MeterError> {
        self.reset(CounterKind::Reading)
    }

    pub fn reset_pulse_count(&mut self) -> Result<(), MeterError> {
        self.reset(CounterKind::PulseCount)
    }

    /// Change the configured initial reading.
    ///
    /// A different value invalidates both counters so the next access
    /// re-runs the seed-marker check and re-seeds. Pulses pending at that
    /// moment belong to the old installation and are dropped.
    pub fn set_initial_reading(&mut self, initial_reading: u32) {
        if initial_reading == self.seed {
            return;
        }
        self.seed = initial_reading;
        self.reading.invalidate();
        self.pulses.invalidate();
        let dropped = self.input.take_deltas();
        if !dropped.is_empty() {
            warn!(
                "Initial reading changed, dropping {} pending pulses",
                dropped.pulses
            );
        }
    }

    pub fn initial_reading(&self) -> u32 {
        self.seed
    }

    /// Whether both bases have been loaded this cycle.
    pub fn is_loaded(&self) -> bool {
        self.reading.is_valid() && self.pulses.is_valid()
    }

    pub fn storage(&self) -> &S {
        self.persistence.storage()
    }

    pub fn storage_mut(&mut self) -> &mut S {
        self.persistence.storage_mut()
    }

    fn counter(&self, kind: CounterKind) -> &PersistedCounter {
        match kind {
            CounterKind::Reading => &self.reading,
            CounterKind::PulseCount => &self.pulses,
        }
    }
}
