//! The protocol engine.
//!
//! `Engine` owns the command queue, the receive demultiplexer, the session
//! state and every pending timer. It never blocks and never reads a clock:
//! each entry point takes the caller's `Instant`, the host asks for the next
//! deadline with [`Engine::poll_timeout`] and calls [`Engine::handle_timeout`]
//! once it has passed. Results come back through [`Engine::poll_event`].
//!
//! ```text
//! host BLE stack ──LinkEvent──▶ Engine ──write()──▶ Transport
//!        timer ──handle_timeout──▶ │
//!                                  └──poll_event()──▶ Event
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use log::{debug, info, warn};

use crate::ble::{LinkEvent, Transport, TransportError, DEFAULT_MTU};
use crate::codec;
use crate::command::Command;
use crate::config::EngineConfig;
use crate::demux::{Demultiplexer, Extracted};
use crate::device::DeviceState;
use crate::error::EngineError;
use crate::event::Event;
use crate::models::{
    ChannelSamples, ChannelValues, EndValue, OfflineHeader, Unit, CHANNEL_COUNT, RANGE_COUNT,
};
use crate::queue::{CommandQueue, PumpOutcome};
use crate::session::{LinePurpose, SessionState};
use crate::sink::SampleSink;
use crate::timer::Timers;

/// Deferred continuations.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Deferred {
    RetryWrite,
    Enqueue(Command),
    LiveTick,
    EndValuesExpiry,
    ModeStart,
    ModeSecondWake,
    ModeQuery,
    ModeTimeout,
    HeaderTimeout,
    DownloadSend,
    DownloadTimeout,
    NextChannel,
    ArmWake,
    ArmSecondWake,
    ArmSend,
    ArmAckTimeout,
    CountdownTick,
}

impl Deferred {
    /// Timers that belong to the session's current operation.
    pub(crate) fn is_operation(&self) -> bool {
        !matches!(
            self,
            Deferred::RetryWrite | Deferred::Enqueue(_) | Deferred::EndValuesExpiry
        )
    }

    pub(crate) fn is_recording(&self) -> bool {
        matches!(
            self,
            Deferred::ArmWake
                | Deferred::ArmSecondWake
                | Deferred::ArmSend
                | Deferred::ArmAckTimeout
                | Deferred::CountdownTick
        )
    }
}

/// A full offline download in progress: the header has been fetched and the
/// listed channels are fetched one at a time.
#[derive(Debug)]
pub(crate) struct DownloadPlan {
    pub(crate) header: OfflineHeader,
    pub(crate) pending: VecDeque<u8>,
    pub(crate) collected: BTreeMap<u8, Vec<f32>>,
}

pub struct Engine<T: Transport> {
    pub(crate) transport: T,
    pub(crate) config: EngineConfig,
    connected: bool,
    ready: bool,
    mtu: u16,
    queue: CommandQueue,
    pub(crate) demux: Demultiplexer,
    pub(crate) state: SessionState,
    pub(crate) timers: Timers<Deferred>,
    device: DeviceState,
    pub(crate) header: Option<OfflineHeader>,
    pub(crate) plan: Option<DownloadPlan>,
    sink: Option<Box<dyn SampleSink>>,
    events: VecDeque<Event>,
}

impl<T: Transport> Engine<T> {
    pub fn new(transport: T, config: EngineConfig) -> Self {
        Self {
            queue: CommandQueue::new(config.queue_warn_depth),
            demux: Demultiplexer::new(config.receive_capacity),
            transport,
            config,
            connected: false,
            ready: false,
            mtu: DEFAULT_MTU,
            state: SessionState::Idle,
            timers: Timers::default(),
            device: DeviceState::default(),
            header: None,
            plan: None,
            sink: None,
            events: VecDeque::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn device(&self) -> &DeviceState {
        &self.device
    }

    pub fn session(&self) -> &SessionState {
        &self.state
    }

    /// Header of the last successful `sh`, if any.
    pub fn offline_header(&self) -> Option<&OfflineHeader> {
        self.header.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_writing(&self) -> bool {
        self.queue.is_writing()
    }

    pub fn queued_commands(&self) -> usize {
        self.queue.len()
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn receive_buffer(&self) -> &str {
        self.demux.buffer()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Fire every timer due at `now`, earliest first. Follow-up timers are
    /// scheduled from the deadline that fired, not from `now`.
    pub fn handle_timeout(&mut self, now: Instant) {
        while let Some((at, deferred)) = self.timers.pop_due(now) {
            self.fire(deferred, at);
        }
    }

    pub fn attach_sample_sink(&mut self, sink: Box<dyn SampleSink>) {
        self.sink = Some(sink);
    }

    pub fn detach_sample_sink(&mut self) -> Option<Box<dyn SampleSink>> {
        self.sink.take()
    }

    pub fn on_link_event(&mut self, event: LinkEvent, now: Instant) {
        match event {
            LinkEvent::Connected => {
                info!("connected");
                self.connected = true;
                if let Err(err) = self.transport.request_mtu(self.config.requested_mtu) {
                    warn!("mtu request failed: {err}");
                }
                self.emit(Event::Connected);
            }
            LinkEvent::NotificationsEnabled => {
                debug!("notifications enabled");
                self.ready = true;
                self.enqueue(Command::QueryRanges, now);
                self.enqueue(Command::QueryEndValues, now);
                self.enqueue(Command::BatteryVoltage, now);
            }
            LinkEvent::Disconnected => self.on_disconnect(),
            LinkEvent::WriteComplete => {
                let outcome = self.queue.on_write_complete(&mut self.transport);
                self.after_pump(outcome, now);
            }
            LinkEvent::MtuChanged(mtu) => {
                debug!("mtu changed to {mtu}");
                self.mtu = mtu;
            }
            LinkEvent::Notification(bytes) => self.on_notification(&bytes, now),
        }
    }

    /// Queue a single command after validating its parameters. An end-values
    /// reply has the shape of a live frame, so `e` is refused while live
    /// streaming.
    pub fn send(&mut self, command: Command, now: Instant) -> Result<(), EngineError> {
        self.ensure_ready()?;
        command.validate()?;
        if command == Command::QueryEndValues && self.state == SessionState::LiveStreaming {
            return Err(self.busy());
        }
        self.enqueue(command, now);
        Ok(())
    }

    /// Poll `d` until [`Engine::stop_live`].
    pub fn start_live(&mut self, now: Instant) -> Result<(), EngineError> {
        self.ensure_ready()?;
        match self.state {
            SessionState::LiveStreaming => return Ok(()),
            SessionState::Idle if self.plan.is_none() => {}
            _ => return Err(self.busy()),
        }
        info!("live streaming started");
        self.state = SessionState::LiveStreaming;
        self.live_tick(now);
        Ok(())
    }

    /// Returns true if live streaming was running.
    pub fn stop_live(&mut self) -> bool {
        if self.state != SessionState::LiveStreaming {
            return false;
        }
        info!("live streaming stopped");
        self.state = SessionState::Idle;
        self.timers.cancel(|d| *d == Deferred::LiveTick);
        true
    }

    pub fn set_display_unit(&mut self, channel: u8, unit: Unit) -> Result<(), EngineError> {
        self.device.set_display_unit(channel, unit)
    }

    /// `q`, then `we` once the box has stopped.
    pub fn factory_reset(&mut self, now: Instant) -> Result<(), EngineError> {
        self.ensure_ready()?;
        self.stop_live();
        self.enqueue(Command::Stop, now);
        self.timers.schedule(
            now + self.config.factory_reset_gap,
            Deferred::Enqueue(Command::FactoryReset),
        );
        Ok(())
    }

    /// Select the current-loop ranges, then calibrate them.
    pub fn calibrate_current_channels(&mut self, now: Instant) -> Result<(), EngineError> {
        self.ensure_ready()?;
        self.stop_live();
        self.enqueue(Command::SetRanges([5, 5, 5, 1, 1, 1]), now);
        self.timers.schedule(
            now + self.config.calibration_gap,
            Deferred::Enqueue(Command::CalibrateCurrent),
        );
        Ok(())
    }

    /// Make `active_range` the channel's active range and rewrite all five
    /// end values. Values are converted to the channel's native unit and
    /// truncated, as the firmware only takes whole numbers.
    pub fn apply_range_settings(
        &mut self,
        channel: u8,
        active_range: u8,
        ranges: [EndValue; RANGE_COUNT],
        now: Instant,
    ) -> Result<(), EngineError> {
        self.ensure_ready()?;
        let index = usize::from(channel)
            .checked_sub(1)
            .filter(|i| *i < CHANNEL_COUNT)
            .ok_or(EngineError::InvalidChannel {
                channel,
                min: 1,
                max: CHANNEL_COUNT as u8,
            })?;

        let mut active = self.device.ranges_or_default();
        active[index] = active_range;
        let select = Command::SetRanges(active);
        select.validate()?;

        let native = self.device.native_units[index];
        let mut writes = Vec::with_capacity(RANGE_COUNT);
        for (i, range) in ranges.iter().enumerate() {
            let value = codec::convert(range.value, range.unit, native).trunc();
            let command = Command::SetEndValue {
                channel,
                range: i as u8 + 1,
                value,
                unit: native,
            };
            command.validate()?;
            writes.push(command);
        }

        self.stop_live();
        info!("P{channel}: active range R{active_range}");
        self.enqueue(select, now);
        let spacing = self.config.range_write_spacing;
        for (i, command) in writes.into_iter().enumerate() {
            if i == 0 {
                self.enqueue(command, now);
            } else {
                self.timers
                    .schedule(now + spacing * i as u32, Deferred::Enqueue(command));
            }
        }
        self.device.current_ranges = Some(active);
        Ok(())
    }

    pub(crate) fn ensure_ready(&self) -> Result<(), EngineError> {
        if self.ready {
            Ok(())
        } else {
            Err(EngineError::NotConnected)
        }
    }

    /// Offline operations need the session to themselves.
    pub(crate) fn ensure_available(&self) -> Result<(), EngineError> {
        if self.state.is_available() && self.plan.is_none() {
            Ok(())
        } else {
            Err(self.busy())
        }
    }

    fn busy(&self) -> EngineError {
        if self.plan.is_some() {
            EngineError::Busy("recording download")
        } else {
            EngineError::Busy(self.state.name())
        }
    }

    pub(crate) fn emit(&mut self, event: Event) {
        debug!("event {:?}", event);
        self.events.push_back(event);
    }

    pub(crate) fn enqueue(&mut self, command: Command, now: Instant) {
        if command == Command::QueryEndValues {
            self.demux.expect_end_values(true);
            self.timers.cancel(|d| *d == Deferred::EndValuesExpiry);
            self.timers
                .schedule(now + self.config.end_values_expiry, Deferred::EndValuesExpiry);
        }
        if self.queue.enqueue(command.encode()) {
            let outcome = self.queue.pump(&mut self.transport);
            self.after_pump(outcome, now);
        }
    }

    fn after_pump(&mut self, outcome: PumpOutcome, now: Instant) {
        match outcome {
            PumpOutcome::RetryLater => {
                self.timers
                    .schedule(now + self.config.write_retry_delay, Deferred::RetryWrite);
            }
            PumpOutcome::Aborted(err) => self.abort_operation(err),
            PumpOutcome::Idle | PumpOutcome::Sent => {}
        }
    }

    fn fire(&mut self, deferred: Deferred, at: Instant) {
        match deferred {
            Deferred::RetryWrite => {
                let outcome = self.queue.retry(&mut self.transport);
                self.after_pump(outcome, at);
            }
            Deferred::Enqueue(command) => self.enqueue(command, at),
            Deferred::LiveTick => self.live_tick(at),
            Deferred::EndValuesExpiry => {
                if self.demux.expects_end_values() {
                    debug!("no end values reply, giving up");
                    self.demux.expect_end_values(false);
                }
            }
            Deferred::ModeStart => self.mode_start(at),
            Deferred::ModeSecondWake | Deferred::ArmSecondWake => {
                self.enqueue(Command::Stop, at)
            }
            Deferred::ModeQuery => self.mode_query(at),
            Deferred::ModeTimeout => self.mode_timeout(at),
            Deferred::HeaderTimeout => self.header_timeout(),
            Deferred::DownloadSend => self.download_send(at),
            Deferred::DownloadTimeout => self.download_timeout(at),
            Deferred::NextChannel => self.next_channel(at),
            Deferred::ArmWake => self.arm_wake(at),
            Deferred::ArmSend => self.arm_send(at),
            Deferred::ArmAckTimeout => self.arm_ack_timeout(),
            Deferred::CountdownTick => self.countdown_tick(at),
        }
    }

    fn live_tick(&mut self, at: Instant) {
        if self.state != SessionState::LiveStreaming {
            return;
        }
        if self.demux.expects_end_values() {
            debug!("live poll held, end values outstanding");
        } else if self.queue.len() < self.config.live_queue_limit {
            self.enqueue(Command::LiveRead, at);
        } else {
            debug!("live poll skipped, {} commands queued", self.queue.len());
        }
        self.timers
            .schedule(at + self.config.live_poll_interval, Deferred::LiveTick);
    }

    fn on_notification(&mut self, bytes: &[u8], now: Instant) {
        if matches!(self.state, SessionState::AwaitingBinary(_)) {
            if let Some(block) = self.demux.push_binary(bytes) {
                self.binary_complete(block, now);
            }
            return;
        }

        let text = String::from_utf8_lossy(bytes);
        self.demux.push_text(&text);
        for unit in self.demux.extract() {
            self.route(unit);
        }
        self.feed_waits(&text, now);
        self.demux.enforce_capacity();
    }

    fn route(&mut self, unit: Extracted) {
        match unit {
            Extracted::EndValues(values) => {
                self.timers.cancel(|d| *d == Deferred::EndValuesExpiry);
                let end_values = self.device.apply_end_values(values);
                self.emit(Event::EndValues(end_values));
            }
            Extracted::CurrentRanges(ranges) => {
                self.device.current_ranges = Some(ranges);
                self.emit(Event::CurrentRanges(ranges));
            }
            Extracted::Frame(frame) => {
                self.device.values = ChannelValues(frame.values);
                if let Some(sink) = self.sink.as_mut() {
                    let sample = self.device.display_sample();
                    if !sample.is_empty() {
                        sink.log_sample(&sample);
                    }
                }
                self.emit(Event::Measurement(self.device.values));
            }
            Extracted::Reply(reply) => {
                self.device.apply_reply(&reply);
                self.emit(Event::Reply(reply));
            }
        }
    }

    /// Offer newly arrived text to whatever wait is armed.
    fn feed_waits(&mut self, text: &str, now: Instant) {
        match &mut self.state {
            SessionState::AwaitingSingleChar(wait) => {
                if let Some(mode) = wait.feed(text) {
                    self.mode_received(mode);
                }
            }
            SessionState::AwaitingMultiLine(wait) => {
                if let Some(captured) = wait.feed(text) {
                    let purpose = wait.purpose;
                    self.header_received(&captured, purpose, now);
                }
            }
            SessionState::ArmingRecording(wait) => {
                if wait.feed(text) {
                    self.arm_acknowledged(now);
                }
            }
            _ => {}
        }
    }

    /// A write failed for good. The current operation resolves with the
    /// error; a countdown keeps running since the box records on its own.
    fn abort_operation(&mut self, err: TransportError) {
        if matches!(self.state, SessionState::RecordingCountdown { .. }) {
            return;
        }
        let err = EngineError::from(err);
        self.timers.cancel(Deferred::is_operation);
        match std::mem::take(&mut self.state) {
            SessionState::AwaitingSingleChar(_) => self.emit(Event::ModeChecked(Err(err))),
            SessionState::AwaitingMultiLine(wait) => {
                self.emit(Event::HeaderFetched(Err(err.clone())));
                if wait.purpose == LinePurpose::Download {
                    self.emit(Event::RecordingDownloaded(Err(err)));
                }
            }
            SessionState::AwaitingBinary(wait) => {
                let partial = self.demux.take_binary();
                self.emit(Event::ChannelDownloaded(ChannelSamples {
                    channel: wait.channel,
                    values: codec::decode(&partial, wait.end_value),
                    complete: false,
                }));
                if self.plan.take().is_some() {
                    self.emit(Event::RecordingDownloaded(Err(err)));
                }
            }
            SessionState::ArmingRecording(_) => self.emit(Event::RecordingArmed(Err(err))),
            SessionState::Idle => {
                if self.plan.take().is_some() {
                    self.emit(Event::RecordingDownloaded(Err(err)));
                }
            }
            SessionState::LiveStreaming | SessionState::RecordingCountdown { .. } => {}
        }
    }

    /// Everything in flight is dropped without resolving; the host only sees
    /// `Disconnected`.
    fn on_disconnect(&mut self) {
        info!(
            "disconnected in state {}, dropping {} queued commands",
            self.state.name(),
            self.queue.len()
        );
        self.connected = false;
        self.ready = false;
        self.mtu = DEFAULT_MTU;
        self.queue.clear();
        self.timers.clear();
        self.demux.reset();
        self.state = SessionState::Idle;
        self.header = None;
        self.plan = None;
        self.emit(Event::Disconnected);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ble_mock::MockTransport;
    use crate::demux::Reply;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    pub(crate) fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    /// Acknowledge every write the engine has in flight.
    pub(crate) fn ack_writes(engine: &mut Engine<MockTransport>, now: Instant) {
        for _ in 0..1000 {
            if !engine.is_writing() {
                return;
            }
            engine.on_link_event(LinkEvent::WriteComplete, now);
        }
    }

    /// Run timers up to `until`, acknowledging writes along the way.
    pub(crate) fn advance(engine: &mut Engine<MockTransport>, until: Instant) {
        loop {
            let at = match engine.poll_timeout() {
                Some(at) if at <= until => at,
                _ => break,
            };
            ack_writes(engine, at);
            engine.handle_timeout(at);
        }
        ack_writes(engine, until);
    }

    pub(crate) fn notify(engine: &mut Engine<MockTransport>, bytes: &[u8], now: Instant) {
        engine.on_link_event(LinkEvent::Notification(bytes.to_vec()), now);
    }

    pub(crate) fn drain(engine: &mut Engine<MockTransport>) -> Vec<Event> {
        std::iter::from_fn(|| engine.poll_event()).collect()
    }

    pub(crate) fn connect(transport: MockTransport, t0: Instant) -> Engine<MockTransport> {
        let mut engine = Engine::new(transport, EngineConfig::default());
        engine.on_link_event(LinkEvent::Connected, t0);
        engine.on_link_event(LinkEvent::NotificationsEnabled, t0);
        ack_writes(&mut engine, t0);
        engine
    }

    /// Connected engine whose start-up queries have been answered.
    pub(crate) fn ready(t0: Instant) -> Engine<MockTransport> {
        let mut engine = connect(MockTransport::new(), t0);
        notify(&mut engine, b"#600.00#600.00#600.00#150.00#100.00#100.00#", t0);
        drain(&mut engine);
        engine
    }

    #[test]
    fn test_startup_queries() {
        let t0 = Instant::now();
        let engine = connect(MockTransport::new(), t0);
        assert_eq!(engine.transport().written, vec!["p\n", "e\n", "v\n"]);
        assert_eq!(engine.transport().mtu_requests, vec![512]);
        assert!(engine.demux.expects_end_values());
    }

    #[test]
    fn test_commands_leave_in_fifo_order() {
        let t0 = Instant::now();
        let mut engine = ready(t0);
        engine.transport_mut().written.clear();

        let commands = [
            Command::Version,
            Command::QueryFlowCalibration,
            Command::Custom("ba".to_string()),
            Command::BatteryVoltage,
        ];
        for command in commands.clone() {
            engine.send(command, t0).unwrap();
        }
        assert_eq!(engine.transport().written, vec!["h\n"]);
        ack_writes(&mut engine, t0);
        let expected: Vec<String> = commands.iter().map(Command::encode).collect();
        assert_eq!(engine.transport().written, expected);
    }

    #[test]
    fn test_rejected_write_is_retried_after_delay() {
        let t0 = Instant::now();
        let mut engine = connect(
            MockTransport::with_failures([TransportError::WriteRejected]),
            t0,
        );
        assert!(engine.transport().written.is_empty());
        assert_eq!(engine.poll_timeout(), Some(t0 + ms(100)));

        advance(&mut engine, t0 + ms(100));
        assert_eq!(engine.transport().written, vec!["p\n", "e\n", "v\n"]);
        assert_eq!(engine.transport().attempts, 4);
    }

    #[test]
    fn test_send_validates_locally() {
        let t0 = Instant::now();
        let mut engine = Engine::new(MockTransport::new(), EngineConfig::default());
        assert_eq!(
            engine.send(Command::Version, t0),
            Err(EngineError::NotConnected)
        );

        let mut engine = ready(t0);
        let writes = engine.transport().attempts;
        assert!(engine.send(Command::SetRanges([1, 2, 3, 4, 5, 6]), t0).is_err());
        assert_eq!(engine.transport().attempts, writes);
    }

    #[test]
    fn test_range_query_end_to_end() {
        let t0 = Instant::now();
        let mut engine = ready(t0);
        engine.send(Command::QueryRanges, t0).unwrap();
        ack_writes(&mut engine, t0);

        notify(&mut engine, b"555212", t0);
        assert_eq!(drain(&mut engine), vec![Event::CurrentRanges([5, 5, 5, 2, 1, 2])]);
        assert_eq!(engine.receive_buffer(), "");
        assert_eq!(engine.device().current_ranges, Some([5, 5, 5, 2, 1, 2]));
    }

    #[test]
    fn test_startup_end_values() {
        let t0 = Instant::now();
        let mut engine = connect(MockTransport::new(), t0);
        drain(&mut engine);
        notify(&mut engine, b"#100.00#200.00#300.00#500.00#", t0);
        notify(&mut engine, b"2600.00#6000.00#", t0);
        let events = drain(&mut engine);
        let Some(Event::EndValues(values)) = events.first() else {
            panic!("unexpected {events:?}");
        };
        assert_eq!(values[4].to_string(), "2600 lpm");
        assert_eq!(values[3].unit, Unit::Celsius);
        assert_eq!(engine.poll_timeout(), None);

        // Once answered, the same shape is a live frame again.
        notify(&mut engine, b"#1#2#3#4#5#6#", t0);
        assert!(matches!(drain(&mut engine)[..], [Event::Measurement(_)]));
    }

    #[test]
    fn test_end_values_expectation_expires() {
        let t0 = Instant::now();
        let mut engine = connect(MockTransport::new(), t0);
        drain(&mut engine);
        advance(&mut engine, t0 + ms(3000));
        assert!(!engine.demux.expects_end_values());
        notify(&mut engine, b"#1#2#3#4#5#6#", t0 + ms(3100));
        assert!(matches!(drain(&mut engine)[..], [Event::Measurement(_)]));
    }

    #[test]
    fn test_replies_update_device() {
        let t0 = Instant::now();
        let mut engine = ready(t0);
        notify(&mut engine, b"12.61 V\r\n", t0);
        notify(&mut engine, b"SensorBox MC6600 Version 1.4\r\n", t0);
        let events = drain(&mut engine);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::Reply(Reply::BatteryVoltage { .. })));
        assert_eq!(engine.device().battery_volts, Some(12.61));
        assert_eq!(
            engine.device().version.as_deref(),
            Some("SensorBox MC6600 Version 1.4")
        );
    }

    struct SharedSink(Rc<RefCell<Vec<BTreeMap<u8, f32>>>>);

    impl SampleSink for SharedSink {
        fn log_sample(&mut self, values: &BTreeMap<u8, f32>) {
            self.0.borrow_mut().push(values.clone());
        }
    }

    #[test]
    fn test_live_polling() {
        let t0 = Instant::now();
        let mut engine = ready(t0);
        engine.transport_mut().written.clear();

        engine.start_live(t0).unwrap();
        advance(&mut engine, t0 + ms(1000));
        assert_eq!(engine.transport().count("d\n"), 5);

        assert!(engine.stop_live());
        advance(&mut engine, t0 + ms(5000));
        assert_eq!(engine.transport().count("d\n"), 5);
        assert_eq!(engine.poll_timeout(), None);
    }

    #[test]
    fn test_end_values_query_refused_while_live() {
        let t0 = Instant::now();
        let mut engine = ready(t0);
        engine.start_live(t0).unwrap();
        assert_eq!(
            engine.send(Command::QueryEndValues, t0),
            Err(EngineError::Busy("live streaming"))
        );
        assert!(!engine.demux.expects_end_values());

        notify(&mut engine, b"#12.5#3.0#0.0#21.4#0.0#0.0#", t0);
        assert!(matches!(drain(&mut engine)[..], [Event::Measurement(_)]));
        assert_eq!(
            engine.device().end_values.as_ref().map(|v| v[0].value),
            Some(600.0)
        );

        assert!(engine.stop_live());
        assert!(engine.send(Command::QueryEndValues, t0).is_ok());
    }

    #[test]
    fn test_live_poll_held_until_end_values_arrive() {
        let t0 = Instant::now();
        let mut engine = connect(MockTransport::new(), t0);
        engine.start_live(t0).unwrap();
        advance(&mut engine, t0 + ms(500));
        assert_eq!(engine.transport().count("d\n"), 0);

        notify(&mut engine, b"#600.00#600.00#600.00#150.00#100.00#100.00#", t0 + ms(600));
        assert!(!engine.demux.expects_end_values());
        advance(&mut engine, t0 + ms(750));
        assert_eq!(engine.transport().count("d\n"), 1);
    }

    #[test]
    fn test_reply_text_ahead_of_frame_keeps_channels_aligned() {
        let t0 = Instant::now();
        let mut engine = ready(t0);
        engine.start_live(t0).unwrap();
        notify(&mut engine, b"r\r\n", t0);
        notify(&mut engine, b"#1#2#3#4#5#6#", t0);
        let events = drain(&mut engine);
        let [Event::Measurement(values)] = &events[..] else {
            panic!("unexpected {events:?}");
        };
        assert_eq!(values.get(1), Some(1.0));
        assert_eq!(values.get(6), Some(6.0));
    }

    #[test]
    fn test_live_poll_skipped_when_queue_is_deep() {
        let t0 = Instant::now();
        let mut engine = ready(t0);
        engine.transport_mut().written.clear();
        // One write in flight, twelve queued.
        for _ in 0..13 {
            engine.send(Command::Version, t0).unwrap();
        }
        assert_eq!(engine.queued_commands(), 12);

        engine.start_live(t0).unwrap();
        assert_eq!(engine.queued_commands(), 12);
        assert_eq!(engine.transport().count("d\n"), 0);
    }

    #[test]
    fn test_live_frames_reach_sink_in_display_units() {
        let t0 = Instant::now();
        let mut engine = ready(t0);
        let samples = Rc::new(RefCell::new(Vec::new()));
        engine.attach_sample_sink(Box::new(SharedSink(samples.clone())));
        engine.set_display_unit(1, Unit::Psi).unwrap();
        engine.start_live(t0).unwrap();

        notify(&mut engine, b"#1.0#2#3", t0);
        notify(&mut engine, b"#4#5#---#", t0);
        let events = drain(&mut engine);
        let Some(Event::Measurement(values)) = events.first() else {
            panic!("unexpected {events:?}");
        };
        assert_eq!(values.get(1), Some(1.0));
        assert_eq!(values.get(6), None);

        let logged = samples.borrow();
        assert_eq!(logged.len(), 1);
        assert!((logged[0][&1] - 14.5038).abs() < 1e-4);
        assert_eq!(logged[0].get(&6), None);
        drop(logged);

        assert!(engine.detach_sample_sink().is_some());
        notify(&mut engine, b"#1#2#3#4#5#6#", t0);
        assert_eq!(samples.borrow().len(), 1);
    }

    #[test]
    fn test_factory_reset_and_calibration() {
        let t0 = Instant::now();
        let mut engine = ready(t0);
        engine.transport_mut().written.clear();

        engine.factory_reset(t0).unwrap();
        ack_writes(&mut engine, t0);
        assert_eq!(engine.transport().written, vec!["q\n"]);
        advance(&mut engine, t0 + ms(100));
        assert_eq!(engine.transport().written, vec!["q\n", "we\n"]);

        engine.calibrate_current_channels(t0 + ms(1000)).unwrap();
        advance(&mut engine, t0 + ms(1200));
        assert_eq!(engine.transport().written[2..], ["r555111\n", "ka\n"]);
    }

    #[test]
    fn test_range_settings() {
        let t0 = Instant::now();
        let mut engine = ready(t0);
        notify(&mut engine, b"555212", t0);
        engine.transport_mut().written.clear();

        let bar = |value| EndValue {
            value,
            unit: Unit::Bar,
        };
        let ranges = [
            bar(60.0),
            bar(250.0),
            bar(400.0),
            bar(600.0),
            EndValue {
                value: 1000.0,
                unit: Unit::Psi,
            },
        ];
        engine.apply_range_settings(1, 3, ranges, t0).unwrap();
        advance(&mut engine, t0 + ms(400));
        assert_eq!(
            engine.transport().written,
            vec![
                "r355212\n",
                "w11 60 bar\n",
                "w12 250 bar\n",
                "w13 400 bar\n",
                "w14 600 bar\n",
                "w15 68 bar\n",
            ]
        );
        assert_eq!(engine.device().current_ranges, Some([3, 5, 5, 2, 1, 2]));

        assert!(matches!(
            engine.apply_range_settings(1, 6, ranges, t0),
            Err(EngineError::InvalidParameter(_))
        ));
        assert!(matches!(
            engine.apply_range_settings(0, 1, ranges, t0),
            Err(EngineError::InvalidChannel { .. })
        ));
    }

    #[test]
    fn test_overflow_resets_buffer() {
        let t0 = Instant::now();
        let mut engine = ready(t0);
        notify(&mut engine, "x".repeat(195).as_bytes(), t0);
        notify(&mut engine, b"#1#2#3#4", t0);
        assert_eq!(engine.receive_buffer(), "");
        notify(&mut engine, b"#5#6#", t0);
        assert!(drain(&mut engine).is_empty());
    }

    #[test]
    fn test_disconnect_drops_everything() {
        let t0 = Instant::now();
        let mut engine = ready(t0);
        engine.start_live(t0).unwrap();
        engine.send(Command::Version, t0).unwrap();
        notify(&mut engine, b"#1#2", t0);

        engine.on_link_event(LinkEvent::Disconnected, t0);
        assert_eq!(drain(&mut engine), vec![Event::Disconnected]);
        assert_eq!(engine.poll_timeout(), None);
        assert_eq!(engine.queued_commands(), 0);
        assert!(!engine.is_writing());
        assert_eq!(engine.receive_buffer(), "");
        assert_eq!(engine.session(), &SessionState::Idle);
        assert_eq!(
            engine.send(Command::Version, t0),
            Err(EngineError::NotConnected)
        );
    }
}
