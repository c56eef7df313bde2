//! Offline recording controller: mode check, header fetch, channel
//! downloads and arming a triggered capture.

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use log::{debug, info, warn};

use crate::ble::Transport;
use crate::codec;
use crate::command::Command;
use crate::demux::parser::header_line;
use crate::engine::{Deferred, DownloadPlan, Engine};
use crate::error::EngineError;
use crate::event::Event;
use crate::models::{ChannelSamples, Mode, OfflineHeader, OfflineRecording, RecordingConfig};
use crate::session::{ArmPhase, ArmWait, BinaryWait, LinePurpose, LineWait, ModeWait, SessionState};

/// End value used for a channel whose header carries no `e{ch}`.
pub const DEFAULT_END_VALUE: f32 = 100.0;

/// Parse `key value` lines. Lines without a value, such as the closing
/// `end`, are skipped; a repeated key keeps its last value.
pub fn parse_header(text: &str) -> OfflineHeader {
    let mut header = OfflineHeader::default();
    for line in text.lines().map(str::trim) {
        if let Ok((_, (key, value))) = header_line(line) {
            header.fields.insert(key.to_string(), value.to_string());
        }
    }
    header
}

impl<T: Transport> Engine<T> {
    /// Ask the box for its offline mode, waking it first. Resolves with
    /// [`Event::ModeChecked`]. During a recording countdown this ends the
    /// local countdown, so the host can poll for completion instead.
    pub fn check_mode(&mut self, now: Instant) -> Result<(), EngineError> {
        self.ensure_ready()?;
        if let SessionState::RecordingCountdown { remaining, .. } = self.state {
            info!("mode check with {remaining}s of countdown left");
            self.timers.cancel(|d| *d == Deferred::CountdownTick);
            self.state = SessionState::Idle;
        }
        self.ensure_available()?;
        self.stop_live();
        self.state = SessionState::AwaitingSingleChar(ModeWait::new());
        self.mode_start(now);
        Ok(())
    }

    pub(crate) fn mode_start(&mut self, at: Instant) {
        let SessionState::AwaitingSingleChar(wait) = &mut self.state else {
            return;
        };
        wait.listening = false;
        debug!(
            "mode check attempt {}/{}",
            wait.attempt, self.config.mode_check_attempts
        );
        let wake = at + self.config.mode_wake_gap;
        self.timers.schedule(wake, Deferred::ModeSecondWake);
        self.timers
            .schedule(wake + self.config.mode_settle, Deferred::ModeQuery);
        self.enqueue(Command::Stop, at);
    }

    pub(crate) fn mode_query(&mut self, at: Instant) {
        let SessionState::AwaitingSingleChar(wait) = &mut self.state else {
            return;
        };
        wait.listening = true;
        self.timers
            .schedule(at + self.config.mode_reply_timeout, Deferred::ModeTimeout);
        self.enqueue(Command::ModeQuery, at);
    }

    pub(crate) fn mode_timeout(&mut self, at: Instant) {
        let max = self.config.mode_check_attempts;
        let SessionState::AwaitingSingleChar(wait) = &mut self.state else {
            return;
        };
        wait.listening = false;
        if wait.attempt < max {
            debug!("no mode reply on attempt {}, retrying", wait.attempt);
            wait.attempt += 1;
            self.timers
                .schedule(at + self.config.mode_retry_delay, Deferred::ModeStart);
            return;
        }
        let attempts = wait.attempt;
        warn!("mode check gave up after {attempts} attempts");
        self.state = SessionState::Idle;
        self.emit(Event::ModeChecked(Err(EngineError::NoResponse { attempts })));
    }

    pub(crate) fn mode_received(&mut self, mode: Mode) {
        info!("offline mode {}", mode.as_char());
        self.timers.cancel(|d| {
            matches!(
                d,
                Deferred::ModeStart
                    | Deferred::ModeSecondWake
                    | Deferred::ModeQuery
                    | Deferred::ModeTimeout
            )
        });
        self.state = SessionState::Idle;
        self.demux.clear_text();
        self.emit(Event::ModeChecked(Ok(mode)));
    }

    /// Fetch the recording header. Resolves with [`Event::HeaderFetched`].
    pub fn fetch_header(&mut self, now: Instant) -> Result<(), EngineError> {
        self.ensure_ready()?;
        self.ensure_available()?;
        self.stop_live();
        self.begin_header(LinePurpose::Standalone, now);
        Ok(())
    }

    fn begin_header(&mut self, purpose: LinePurpose, now: Instant) {
        self.state = SessionState::AwaitingMultiLine(LineWait::new(purpose));
        self.timers
            .schedule(now + self.config.header_timeout, Deferred::HeaderTimeout);
        self.enqueue(Command::OfflineHeader, now);
    }

    pub(crate) fn header_received(&mut self, text: &str, purpose: LinePurpose, now: Instant) {
        self.timers.cancel(|d| *d == Deferred::HeaderTimeout);
        self.state = SessionState::Idle;
        self.demux.clear_text();
        let header = parse_header(text);
        info!("offline header with {} fields", header.fields.len());
        self.header = Some(header.clone());
        self.emit(Event::HeaderFetched(Ok(header.clone())));
        if purpose == LinePurpose::Download {
            self.plan_download(header, now);
        }
    }

    pub(crate) fn header_timeout(&mut self) {
        let SessionState::AwaitingMultiLine(wait) = &self.state else {
            return;
        };
        let purpose = wait.purpose;
        warn!("offline header timed out");
        self.state = SessionState::Idle;
        let err = EngineError::Timeout("offline header");
        self.emit(Event::HeaderFetched(Err(err.clone())));
        if purpose == LinePurpose::Download {
            self.emit(Event::RecordingDownloaded(Err(err)));
        }
    }

    /// Download one channel (1..=4) of the stored recording. Requires a
    /// fetched header. Resolves with [`Event::ChannelDownloaded`], with
    /// partial data if the terminator never arrives.
    pub fn download_channel(
        &mut self,
        channel: u8,
        end_value: f32,
        now: Instant,
    ) -> Result<(), EngineError> {
        Command::DownloadChannel(channel).validate()?;
        if self.header.is_none() {
            return Err(EngineError::HeaderRequired);
        }
        self.ensure_ready()?;
        self.ensure_available()?;
        self.stop_live();
        self.begin_download(channel, end_value, now);
        Ok(())
    }

    fn begin_download(&mut self, channel: u8, end_value: f32, now: Instant) {
        self.demux.clear_binary();
        if let Err(err) = self.transport.request_mtu(self.config.requested_mtu) {
            warn!("mtu request before download failed: {err}");
        }
        self.state = SessionState::AwaitingBinary(BinaryWait {
            channel,
            end_value,
            requested: false,
        });
        self.timers
            .schedule(now + self.config.download_pre_delay, Deferred::DownloadSend);
    }

    pub(crate) fn download_send(&mut self, at: Instant) {
        let SessionState::AwaitingBinary(wait) = &mut self.state else {
            return;
        };
        wait.requested = true;
        let channel = wait.channel;
        self.demux.clear_binary();
        info!("downloading P{channel}");
        self.timers
            .schedule(at + self.config.download_timeout, Deferred::DownloadTimeout);
        self.enqueue(Command::DownloadChannel(channel), at);
    }

    pub(crate) fn binary_complete(&mut self, block: Vec<u8>, now: Instant) {
        let SessionState::AwaitingBinary(wait) = self.state else {
            return;
        };
        self.timers
            .cancel(|d| matches!(d, Deferred::DownloadSend | Deferred::DownloadTimeout));
        debug!("P{} block of {} bytes", wait.channel, block.len());
        self.finish_channel(
            ChannelSamples {
                channel: wait.channel,
                values: codec::decode(&block, wait.end_value),
                complete: true,
            },
            now,
        );
    }

    pub(crate) fn download_timeout(&mut self, at: Instant) {
        let SessionState::AwaitingBinary(wait) = self.state else {
            return;
        };
        let partial = self.demux.take_binary();
        warn!(
            "P{} download timed out with {} bytes",
            wait.channel,
            partial.len()
        );
        self.finish_channel(
            ChannelSamples {
                channel: wait.channel,
                values: codec::decode(&partial, wait.end_value),
                complete: false,
            },
            at,
        );
    }

    fn finish_channel(&mut self, samples: ChannelSamples, now: Instant) {
        self.state = SessionState::Idle;
        self.emit(Event::ChannelDownloaded(samples.clone()));
        let Some(plan) = self.plan.as_mut() else {
            return;
        };
        plan.collected.insert(samples.channel, samples.values);
        if !plan.pending.is_empty() {
            self.timers
                .schedule(now + self.config.inter_channel_pause, Deferred::NextChannel);
            return;
        }
        if let Some(plan) = self.plan.take() {
            info!("recording downloaded, {} channels", plan.collected.len());
            self.emit(Event::RecordingDownloaded(Ok(OfflineRecording {
                header: plan.header,
                channels: plan.collected,
            })));
        }
    }

    pub(crate) fn next_channel(&mut self, at: Instant) {
        let Some(plan) = self.plan.as_mut() else {
            return;
        };
        let Some(channel) = plan.pending.pop_front() else {
            return;
        };
        let end_value = plan.header.end_value(channel).unwrap_or(DEFAULT_END_VALUE);
        self.begin_download(channel, end_value, at);
    }

    /// Fetch the header, then every channel it lists. Resolves with
    /// [`Event::RecordingDownloaded`]; progress is reported through
    /// [`Event::HeaderFetched`] and [`Event::ChannelDownloaded`].
    pub fn download_recording(&mut self, now: Instant) -> Result<(), EngineError> {
        self.ensure_ready()?;
        self.ensure_available()?;
        self.stop_live();
        self.begin_header(LinePurpose::Download, now);
        Ok(())
    }

    fn plan_download(&mut self, header: OfflineHeader, now: Instant) {
        let channels = header
            .channel_mask()
            .map(|mask| mask.channels())
            .unwrap_or_default();
        if channels.is_empty() {
            warn!("header lists no recorded channels");
            self.emit(Event::RecordingDownloaded(Err(EngineError::NoChannels)));
            return;
        }
        self.plan = Some(DownloadPlan {
            header,
            pending: VecDeque::from(channels),
            collected: BTreeMap::new(),
        });
        self.next_channel(now);
    }

    /// Arm a triggered capture. `timestamp` is the Unix time stored with the
    /// recording. Resolves with [`Event::RecordingArmed`], then counts down
    /// with [`Event::RecordingTick`] until [`Event::RecordingFinished`].
    pub fn start_recording(
        &mut self,
        config: RecordingConfig,
        timestamp: i64,
        now: Instant,
    ) -> Result<(), EngineError> {
        config.validate()?;
        self.ensure_ready()?;
        self.ensure_available()?;
        let was_live = self.stop_live();
        self.state = SessionState::ArmingRecording(ArmWait {
            config,
            timestamp,
            phase: ArmPhase::Draining,
        });
        if was_live {
            self.timers
                .schedule(now + self.config.live_teardown, Deferred::ArmWake);
        } else {
            self.arm_wake(now);
        }
        Ok(())
    }

    pub(crate) fn arm_wake(&mut self, at: Instant) {
        let SessionState::ArmingRecording(wait) = &mut self.state else {
            return;
        };
        wait.phase = ArmPhase::Settling;
        self.timers
            .schedule(at + self.config.arm_wake_gap, Deferred::ArmSecondWake);
        self.timers
            .schedule(at + self.config.arm_settle, Deferred::ArmSend);
        self.enqueue(Command::Stop, at);
    }

    pub(crate) fn arm_send(&mut self, at: Instant) {
        let SessionState::ArmingRecording(wait) = &mut self.state else {
            return;
        };
        wait.phase = ArmPhase::AwaitingAck;
        let command = Command::arm(&wait.config, wait.timestamp);
        info!(
            "arming recording: {} samples every {} ms, {} s",
            wait.config.samples,
            wait.config.time_base_ms,
            wait.config.duration_secs()
        );
        self.demux.clear_text();
        self.timers
            .schedule(at + self.config.arm_ack_timeout, Deferred::ArmAckTimeout);
        self.enqueue(command, at);
    }

    pub(crate) fn arm_acknowledged(&mut self, now: Instant) {
        let SessionState::ArmingRecording(wait) = &self.state else {
            return;
        };
        let total = wait.config.duration_secs();
        self.timers.cancel(|d| *d == Deferred::ArmAckTimeout);
        self.demux.clear_text();
        info!("recording armed, {total} s");
        self.emit(Event::RecordingArmed(Ok(total)));
        if total == 0 {
            self.state = SessionState::Idle;
            self.emit(Event::RecordingFinished);
            return;
        }
        self.state = SessionState::RecordingCountdown {
            remaining: total,
            total,
        };
        self.timers
            .schedule(now + self.config.countdown_tick, Deferred::CountdownTick);
    }

    pub(crate) fn arm_ack_timeout(&mut self) {
        if !matches!(self.state, SessionState::ArmingRecording(_)) {
            return;
        }
        warn!("no acknowledgement for sr, recording may not have started");
        self.state = SessionState::Idle;
        self.emit(Event::RecordingArmed(Err(EngineError::Timeout(
            "recording acknowledgement",
        ))));
    }

    pub(crate) fn countdown_tick(&mut self, at: Instant) {
        let SessionState::RecordingCountdown { remaining, .. } = &mut self.state else {
            return;
        };
        *remaining = remaining.saturating_sub(1);
        let remaining_secs = *remaining;
        self.emit(Event::RecordingTick { remaining_secs });
        if remaining_secs > 0 {
            self.timers
                .schedule(at + self.config.countdown_tick, Deferred::CountdownTick);
            return;
        }
        info!("recording complete");
        self.state = SessionState::Idle;
        self.emit(Event::RecordingFinished);
    }

    /// Send `q` and abandon any arming or countdown without further events.
    pub fn stop_recording(&mut self, now: Instant) -> Result<(), EngineError> {
        self.ensure_ready()?;
        self.timers.cancel(Deferred::is_recording);
        if matches!(
            self.state,
            SessionState::ArmingRecording(_) | SessionState::RecordingCountdown { .. }
        ) {
            info!("recording stopped in state {}", self.state.name());
            self.state = SessionState::Idle;
        }
        self.enqueue(Command::Stop, now);
        Ok(())
    }
}
