//! Wake/act/sleep driver for the meter agent.
//!
//! Every activation, whatever woke the device, runs through
//! [`MeterAgent::activate`]: service the deadlines that are due, then arm the
//! wake timer for the soonest remaining one before control returns to the
//! sleep mechanism. The first activation after power-up also loads the
//! counters and registers the deadlines.

use log::{debug, error, info, warn};

use crate::clock::Timestamp;
use crate::config::{MeterConfig, ParamId};
use crate::error::{ConfigError, MeterError};
use crate::meter::Meter;
use crate::pulse::PulseInput;
use crate::report::{METER_CHANNEL, MeterReport, ReportTransport};
use crate::schedule::{DeadlineLabel, MAX_PERIOD_SECS, ScheduleArbiter, WakePlan};
use crate::storage::ByteStorage;
use crate::wake::{WakeReason, WakeTimer};

pub struct MeterAgent<'a, S, T, W>
where
    S: ByteStorage,
    T: ReportTransport,
    W: WakeTimer,
{
    meter: Meter<'a, S>,
    config: MeterConfig,
    arbiter: ScheduleArbiter,
    transport: T,
    timer: W,
    booted: bool,
    keep_alive_secs: Option<u32>,
    last_wake: Option<WakeReason>,
}

impl<'a, S, T, W> MeterAgent<'a, S, T, W>
where
    S: ByteStorage,
    T: ReportTransport,
    W: WakeTimer,
{
    /// Build an agent around an explicit configuration.
    pub fn new(input: &'a PulseInput, storage: S, transport: T, timer: W, config: MeterConfig) -> Self {
        input.set_debounce_window_ms(config.debounce_window_ms);
        input.set_reading_increment(config.reading_increment);
        Self {
            meter: Meter::new(input, storage, config.initial_reading),
            config,
            arbiter: ScheduleArbiter::new(),
            transport,
            timer,
            booted: false,
            keep_alive_secs: None,
            last_wake: None,
        }
    }

    /// Build an agent using the configuration image held in `storage`,
    /// falling back to defaults when there is none.
    pub fn from_storage(input: &'a PulseInput, mut storage: S, transport: T, timer: W) -> Self {
        let config = match MeterConfig::load(&mut storage) {
            Ok(config) => config,
            Err(e) => {
                warn!("Using default configuration: {}", e);
                MeterConfig::default()
            }
        };
        Self::new(input, storage, transport, timer, config)
    }

    /// Run one activation cycle at `now`.
    ///
    /// Returns the plan the wake timer was armed with, or `None` when no
    /// deadline is tracked and only a pulse edge can wake the device.
    pub fn activate(&mut self, now: Timestamp) -> Result<Option<WakePlan>, MeterError> {
        let reason = self.timer.wake_reason();
        self.last_wake = Some(reason);

        if !self.booted {
            self.boot(now, reason)?;
        } else {
            debug!("Activation at {} ({:?})", now, reason);
        }

        for label in self.arbiter.due(now) {
            match label {
                DeadlineLabel::Report => self.service_report(now, reason)?,
                DeadlineLabel::Flush => self.service_flush(now)?,
                DeadlineLabel::KeepAlive => self.service_keep_alive(now),
            }
        }

        self.sync_keep_alive(now);
        Ok(self.rearm(now))
    }

    fn boot(&mut self, now: Timestamp, reason: WakeReason) -> Result<(), MeterError> {
        if reason.is_cold_start() {
            info!("Cold start ({:?})", reason);
        } else {
            info!("Starting after {:?}", reason);
        }

        if let Err(e) = self.meter.ensure_loaded() {
            error!("Loading counters failed: {}", e);
            return Err(e);
        }

        self.arbiter.reschedule(
            DeadlineLabel::Report,
            now,
            self.config.initial_report_delay_secs(),
        );
        self.arbiter
            .reschedule(DeadlineLabel::Flush, now, self.config.flush_period_secs);
        self.booted = true;
        Ok(())
    }

    fn service_flush(&mut self, now: Timestamp) -> Result<(), MeterError> {
        if let Err(e) = self.meter.reconcile() {
            error!("Flush failed: {}", e);
            return Err(e);
        }
        self.arbiter
            .complete(DeadlineLabel::Flush, now, self.config.flush_period_secs);
        Ok(())
    }

    fn service_report(&mut self, now: Timestamp, reason: WakeReason) -> Result<(), MeterError> {
        let (reading, pulse_count) = self.meter.snapshot()?;

        if self.transport.is_attached() {
            let report = MeterReport {
                reading,
                pulse_count,
                wake_reason: reason,
            };
            match self.transport.send_report(METER_CHANNEL, &report) {
                Ok(()) => info!("Reported reading {} ({} pulses)", reading, pulse_count),
                Err(e) => warn!("Meter report failed: {}", e),
            }
        } else {
            debug!("Not attached, skipping report");
        }

        self.arbiter
            .complete(DeadlineLabel::Report, now, self.config.report_period_secs);
        Ok(())
    }

    fn service_keep_alive(&mut self, now: Timestamp) {
        if self.transport.is_attached() {
            if let Err(e) = self.transport.send_keep_alive() {
                warn!("Keep-alive failed: {}", e);
            }
        }
        match self.keep_alive_secs {
            Some(period) => self.arbiter.complete(DeadlineLabel::KeepAlive, now, period),
            None => self.arbiter.untrack(DeadlineLabel::KeepAlive),
        }
    }

    /// Follow the keep-alive interval the transport currently asks for.
    ///
    /// Intervals longer than [`MAX_PERIOD_SECS`] are clamped to it.
    fn sync_keep_alive(&mut self, now: Timestamp) {
        let requested = self
            .transport
            .keep_alive_interval()
            .filter(|&secs| secs > 0);
        let interval = requested.map(|secs| secs.min(MAX_PERIOD_SECS));
        if interval == self.keep_alive_secs {
            return;
        }
        self.keep_alive_secs = interval;
        match interval {
            Some(secs) => {
                if let Some(asked) = requested.filter(|&asked| asked > secs) {
                    warn!(
                        "Keep-alive interval {}s exceeds the clock range, clamped to {}s",
                        asked, secs
                    );
                }
                info!("Keep-alive every {}s", secs);
                self.arbiter.reschedule(DeadlineLabel::KeepAlive, now, secs);
            }
            None => {
                info!("Keep-alive disabled");
                self.arbiter.untrack(DeadlineLabel::KeepAlive);
            }
        }
    }

    /// Arm the wake timer for the soonest tracked deadline.
    pub fn rearm(&mut self, now: Timestamp) -> Option<WakePlan> {
        let plan = self.arbiter.next_deadline(now)?;
        debug!(
            "Sleeping {}s until {:?} at {}",
            plan.sleep_secs, plan.label, plan.due_at
        );
        self.timer.arm(plan.sleep());
        Some(plan)
    }

    /// Apply a configuration change delivered at `now`.
    ///
    /// The value is checked against the declared bounds, stored, and takes
    /// effect immediately: period changes reschedule their deadline and
    /// re-arm the wake timer, pulse settings go straight to the
    /// interrupt-shared input.
    pub fn on_config_changed(
        &mut self,
        param: ParamId,
        value: u32,
        now: Timestamp,
    ) -> Result<(), ConfigError> {
        self.config.set(param, value)?;
        info!("{:?} set to {}", param, value);

        let input = self.meter.input();
        match param {
            ParamId::InitialReading => self.meter.set_initial_reading(value),
            ParamId::DebounceWindow => input.set_debounce_window_ms(value),
            ParamId::ReadingIncrement => input.set_reading_increment(value),
            ParamId::ReportPeriod => {
                self.arbiter.reschedule(DeadlineLabel::Report, now, value);
                self.rearm(now);
            }
            ParamId::FlushPeriod => {
                self.arbiter.reschedule(DeadlineLabel::Flush, now, value);
                self.rearm(now);
            }
        }

        self.config.store(self.meter.storage_mut())
    }

    /// Apply a change addressed by its raw parameter id.
    pub fn on_config_param(&mut self, id: u8, value: u32, now: Timestamp) -> Result<(), ConfigError> {
        self.on_config_changed(ParamId::from_id(id)?, value, now)
    }

    /// Interrupt entry point for a pulse edge.
    pub fn on_pulse_edge(&self, now: Timestamp) -> bool {
        self.meter.on_pulse_edge(now)
    }

    pub fn current_reading(&mut self) -> Result<u32, MeterError> {
        self.meter.current_reading()
    }

    pub fn current_pulse_count(&mut self) -> Result<u32, MeterError> {
        self.meter.current_pulse_count()
    }

    pub fn reset_reading(&mut self) -> Result<(), MeterError> {
        self.meter.reset_reading()
    }

    pub fn reset_pulse_count(&mut self) -> Result<(), MeterError> {
        self.meter.reset_pulse_count()
    }

    pub fn config(&self) -> &MeterConfig {
        &self.config
    }

    pub fn arbiter(&self) -> &ScheduleArbiter {
        &self.arbiter
    }

    pub fn meter(&self) -> &Meter<'a, S> {
        &self.meter
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn timer(&self) -> &W {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut W {
        &mut self.timer
    }

    /// Cause of the most recent activation.
    pub fn last_wake(&self) -> Option<WakeReason> {
        self.last_wake
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ReportError;
    use crate::storage::{RamStorage, STORAGE_SIZE};
    use embassy_time::Duration;

    struct RecordingTimer {
        reason: WakeReason,
        armed: heapless::Vec<Duration, 32>,
    }

    impl RecordingTimer {
        fn new() -> Self {
            Self {
                reason: WakeReason::PowerOn,
                armed: heapless::Vec::new(),
            }
        }
    }

    impl WakeTimer for RecordingTimer {
        fn arm(&mut self, after: Duration) {
            let _ = self.armed.push(after);
        }

        fn wake_reason(&self) -> WakeReason {
            self.reason
        }
    }

    struct RecordingTransport {
        attached: bool,
        failing: bool,
        interval: Option<u32>,
        reports: heapless::Vec<MeterReport, 16>,
        keep_alives: usize,
    }

    impl RecordingTransport {
        fn attached() -> Self {
            Self {
                attached: true,
                failing: false,
                interval: None,
                reports: heapless::Vec::new(),
                keep_alives: 0,
            }
        }
    }

    impl ReportTransport for RecordingTransport {
        fn is_attached(&self) -> bool {
            self.attached
        }

        fn send_report(&mut self, channel: u8, report: &MeterReport) -> Result<(), ReportError> {
            assert_eq!(channel, METER_CHANNEL);
            if self.failing {
                return Err(ReportError::SendFailed);
            }
            let _ = self.reports.push(*report);
            Ok(())
        }

        fn send_keep_alive(&mut self) -> Result<(), ReportError> {
            self.keep_alives += 1;
            Ok(())
        }

        fn keep_alive_interval(&self) -> Option<u32> {
            self.interval
        }
    }

    type Agent<'a> =
        MeterAgent<'a, RamStorage<STORAGE_SIZE>, RecordingTransport, RecordingTimer>;

    fn agent_with(input: &PulseInput, transport: RecordingTransport, config: MeterConfig) -> Agent<'_> {
        MeterAgent::new(
            input,
            RamStorage::new(),
            transport,
            RecordingTimer::new(),
            config,
        )
    }

    fn report_every_minute() -> MeterConfig {
        let mut config = MeterConfig::default();
        config.set(ParamId::ReportPeriod, 60).unwrap();
        config
    }

    fn secs(s: u32) -> Timestamp {
        Timestamp::ZERO.add_secs(s)
    }

    #[test]
    fn test_boot_arms_initial_report() {
        let input = PulseInput::with_defaults();
        let mut agent = agent_with(&input, RecordingTransport::attached(), report_every_minute());

        let plan = agent.activate(Timestamp::ZERO).unwrap().unwrap();
        assert_eq!(plan.label, DeadlineLabel::Report);
        assert_eq!(plan.due_at, secs(30));
        assert_eq!(agent.timer().armed.as_slice(), &[Duration::from_secs(31)]);
        assert_eq!(agent.last_wake(), Some(WakeReason::PowerOn));
        assert!(agent.meter().is_loaded());
    }

    #[test]
    fn test_periodic_report_does_not_drift() {
        let input = PulseInput::with_defaults();
        let mut agent = agent_with(&input, RecordingTransport::attached(), report_every_minute());
        let mut now = Timestamp::ZERO;
        let mut plan = agent.activate(now).unwrap().unwrap();
        agent.timer_mut().reason = WakeReason::ScheduledTimer;

        for _ in 0..10 {
            now = now.add_secs(plan.sleep_secs).add_millis(250);
            plan = agent.activate(now).unwrap().unwrap();
        }

        assert_eq!(agent.transport().reports.len(), 10);
        let report = agent.arbiter().deadline(DeadlineLabel::Report).unwrap();
        assert_eq!(report.due_at, secs(30 + 60 * 10));
        assert_eq!(
            agent.transport().reports[0].wake_reason,
            WakeReason::ScheduledTimer
        );
    }

    #[test]
    fn test_debounced_pulses_reach_report() {
        let input = PulseInput::with_defaults();
        let mut agent = agent_with(&input, RecordingTransport::attached(), report_every_minute());
        agent.activate(Timestamp::ZERO).unwrap();

        for t in [0, 100, 6_000, 6_050] {
            agent.on_pulse_edge(Timestamp(t));
        }
        agent.activate(secs(31)).unwrap();

        let report = agent.transport().reports[0];
        assert_eq!(report.pulse_count, 2);
        assert_eq!(report.reading, 2);
    }

    #[test]
    fn test_report_skipped_when_detached() {
        let input = PulseInput::with_defaults();
        let mut transport = RecordingTransport::attached();
        transport.attached = false;
        let mut agent = agent_with(&input, transport, report_every_minute());
        agent.activate(Timestamp::ZERO).unwrap();
        input.record_pulse();

        agent.activate(secs(31)).unwrap();
        assert!(agent.transport().reports.is_empty());
        assert_eq!(
            agent.arbiter().deadline(DeadlineLabel::Report).unwrap().due_at,
            secs(90)
        );
        // Counters were still reconciled and persisted
        assert_eq!(agent.meter().storage().writes(), 1);
    }

    #[test]
    fn test_failed_report_is_not_fatal() {
        let input = PulseInput::with_defaults();
        let mut transport = RecordingTransport::attached();
        transport.failing = true;
        let mut agent = agent_with(&input, transport, report_every_minute());
        agent.activate(Timestamp::ZERO).unwrap();

        let plan = agent.activate(secs(31)).unwrap().unwrap();
        assert_eq!(plan.due_at, secs(90));
    }

    #[test]
    fn test_flush_persists_pending_pulses() {
        let input = PulseInput::new(0, 1);
        let mut config = MeterConfig::default();
        config.set(ParamId::FlushPeriod, 60).unwrap();
        let mut agent = agent_with(&input, RecordingTransport::attached(), config);
        agent.activate(Timestamp::ZERO).unwrap();

        input.record_pulse();
        input.record_pulse();
        agent.activate(secs(10)).unwrap();
        assert_eq!(agent.meter().storage().writes(), 0);

        agent.activate(secs(61)).unwrap();
        assert_eq!(agent.meter().storage().writes(), 1);
        assert!(input.pending().is_empty());
        assert_eq!(
            agent.arbiter().deadline(DeadlineLabel::Flush).unwrap().due_at,
            secs(120)
        );
    }

    #[test]
    fn test_keep_alive_follows_transport_interval() {
        let input = PulseInput::with_defaults();
        let mut transport = RecordingTransport::attached();
        transport.interval = Some(20);
        let mut agent = agent_with(&input, transport, MeterConfig::default());

        let plan = agent.activate(Timestamp::ZERO).unwrap().unwrap();
        assert_eq!(plan.label, DeadlineLabel::KeepAlive);
        assert_eq!(plan.due_at, secs(20));

        agent.activate(secs(21)).unwrap();
        assert_eq!(agent.transport().keep_alives, 1);
        assert_eq!(
            agent.arbiter().deadline(DeadlineLabel::KeepAlive).unwrap().due_at,
            secs(40)
        );

        agent.transport_mut().interval = None;
        agent.activate(secs(25)).unwrap();
        assert!(!agent.arbiter().is_tracked(DeadlineLabel::KeepAlive));
    }

    #[test]
    fn test_long_keep_alive_interval_is_clamped() {
        let input = PulseInput::with_defaults();
        let mut transport = RecordingTransport::attached();
        transport.interval = Some(3_000_000);
        let mut agent = agent_with(&input, transport, MeterConfig::default());

        let mut now = Timestamp::ZERO;
        let mut plan = agent.activate(now).unwrap().unwrap();
        assert_eq!(
            agent.arbiter().deadline(DeadlineLabel::KeepAlive).unwrap().due_at,
            secs(MAX_PERIOD_SECS)
        );

        agent.timer_mut().reason = WakeReason::ScheduledTimer;
        for _ in 0..48 {
            now = now.add_secs(plan.sleep_secs);
            plan = agent.activate(now).unwrap().unwrap();
            assert_eq!(agent.transport().keep_alives, 0);
        }

        agent.activate(secs(MAX_PERIOD_SECS + 1)).unwrap();
        assert_eq!(agent.transport().keep_alives, 1);
        assert_eq!(
            agent.arbiter().deadline(DeadlineLabel::KeepAlive).unwrap().due_at,
            secs(MAX_PERIOD_SECS).add_secs(MAX_PERIOD_SECS)
        );
    }

    #[test]
    fn test_report_period_change_reschedules() {
        let input = PulseInput::with_defaults();
        let mut agent = agent_with(&input, RecordingTransport::attached(), MeterConfig::default());
        agent.activate(Timestamp::ZERO).unwrap();

        agent
            .on_config_changed(ParamId::ReportPeriod, 600, secs(100))
            .unwrap();
        assert_eq!(
            agent.arbiter().deadline(DeadlineLabel::Report).unwrap().due_at,
            secs(700)
        );
        assert_eq!(agent.config().report_period_secs, 600);
    }

    #[test]
    fn test_period_change_rearms_timer() {
        let input = PulseInput::with_defaults();
        let mut agent = agent_with(&input, RecordingTransport::attached(), MeterConfig::default());
        agent.activate(Timestamp::ZERO).unwrap();
        agent.activate(secs(31)).unwrap();
        assert_eq!(agent.timer().armed.last(), Some(&Duration::from_secs(3_570)));

        agent
            .on_config_changed(ParamId::ReportPeriod, 60, secs(40))
            .unwrap();
        assert_eq!(agent.timer().armed.last(), Some(&Duration::from_secs(61)));

        agent
            .on_config_changed(ParamId::FlushPeriod, 60, secs(45))
            .unwrap();
        assert_eq!(agent.timer().armed.last(), Some(&Duration::from_secs(56)));
    }

    #[test]
    fn test_pulse_settings_apply_immediately() {
        let input = PulseInput::with_defaults();
        let mut agent = agent_with(&input, RecordingTransport::attached(), MeterConfig::default());
        agent.activate(Timestamp::ZERO).unwrap();

        agent
            .on_config_changed(ParamId::DebounceWindow, 100, Timestamp::ZERO)
            .unwrap();
        agent
            .on_config_changed(ParamId::ReadingIncrement, 25, Timestamp::ZERO)
            .unwrap();
        assert!(agent.on_pulse_edge(Timestamp(0)));
        assert!(agent.on_pulse_edge(Timestamp(100)));

        assert_eq!(agent.current_reading(), Ok(50));
        assert_eq!(agent.current_pulse_count(), Ok(2));
    }

    #[test]
    fn test_initial_reading_change_reseeds() {
        let input = PulseInput::new(0, 1);
        let mut agent = agent_with(&input, RecordingTransport::attached(), MeterConfig::default());
        agent.activate(Timestamp::ZERO).unwrap();
        input.record_pulse();
        assert_eq!(agent.current_reading(), Ok(1));

        agent
            .on_config_changed(ParamId::InitialReading, 5_000, secs(1))
            .unwrap();
        assert_eq!(agent.current_reading(), Ok(5_000));
        assert_eq!(agent.current_pulse_count(), Ok(0));
    }

    #[test]
    fn test_config_change_is_stored() {
        let input = PulseInput::with_defaults();
        let mut agent = agent_with(&input, RecordingTransport::attached(), MeterConfig::default());
        agent.on_config_param(4, 10, Timestamp::ZERO).unwrap();
        assert_eq!(
            agent.on_config_param(42, 1, Timestamp::ZERO),
            Err(ConfigError::UnknownParam(42))
        );
        assert!(agent
            .on_config_changed(ParamId::DebounceWindow, 99_999, Timestamp::ZERO)
            .is_err());

        let mut storage = agent.meter().storage().clone();
        let stored = MeterConfig::load(&mut storage).unwrap();
        assert_eq!(stored.reading_increment, 10);
        assert_eq!(stored.debounce_window_ms, 5_000);

        let rebooted_input = PulseInput::with_defaults();
        let rebooted = MeterAgent::from_storage(
            &rebooted_input,
            storage,
            RecordingTransport::attached(),
            RecordingTimer::new(),
        );
        assert_eq!(rebooted.config().reading_increment, 10);
        assert_eq!(rebooted_input.reading_increment(), 10);
    }

    #[test]
    fn test_from_blank_storage_uses_defaults() {
        let input = PulseInput::new(1, 1);
        let agent = MeterAgent::from_storage(
            &input,
            RamStorage::<STORAGE_SIZE>::new(),
            RecordingTransport::attached(),
            RecordingTimer::new(),
        );
        assert_eq!(agent.config(), &MeterConfig::default());
        assert_eq!(input.debounce_window_ms(), 5_000);
    }

    #[test]
    fn test_resets() {
        let input = PulseInput::new(0, 3);
        let mut agent = agent_with(&input, RecordingTransport::attached(), MeterConfig::default());
        agent.activate(Timestamp::ZERO).unwrap();
        input.record_pulse();

        agent.reset_reading().unwrap();
        assert_eq!(agent.current_reading(), Ok(0));
        assert_eq!(agent.current_pulse_count(), Ok(1));
        agent.reset_pulse_count().unwrap();
        assert_eq!(agent.current_pulse_count(), Ok(0));
    }

    #[test]
    fn test_activation_across_clock_wrap() {
        let input = PulseInput::with_defaults();
        let mut agent = agent_with(&input, RecordingTransport::attached(), report_every_minute());
        let boot = Timestamp(u32::MAX - 10_000);
        let plan = agent.activate(boot).unwrap().unwrap();
        assert_eq!(plan.sleep_secs, 31);

        let wake = boot.add_secs(plan.sleep_secs);
        assert_eq!(wake, Timestamp(20_999));
        agent.activate(wake).unwrap();
        assert_eq!(agent.transport().reports.len(), 1);
    }
}
