//! Typed awaiting-state of the engine.
//!
//! At most one wait is outstanding at a time. Each state owns whatever its
//! wait has captured so far, so there is no way to hold two multi-line waits
//! or a binary wait alongside a mode check.

use crate::models::{Mode, RecordingConfig};

#[derive(Clone, Debug, PartialEq)]
pub struct ModeWait {
    /// 1-based attempt number.
    pub attempt: u32,
    /// True once `m` has been sent for this attempt.
    pub listening: bool,
}

impl ModeWait {
    pub fn new() -> Self {
        Self {
            attempt: 1,
            listening: false,
        }
    }

    /// First `N` or `R` in newly arrived text, once `m` is out.
    pub fn feed(&self, text: &str) -> Option<Mode> {
        if !self.listening {
            return None;
        }
        text.chars().find_map(Mode::from_char)
    }
}

impl Default for ModeWait {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinePurpose {
    /// Header requested by the host.
    Standalone,
    /// Header requested as the first step of a full download.
    Download,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LineWait {
    pub captured: String,
    pub purpose: LinePurpose,
}

impl LineWait {
    pub const SENTINEL: &'static str = "end";

    pub fn new(purpose: LinePurpose) -> Self {
        Self {
            captured: String::new(),
            purpose,
        }
    }

    /// Append text; returns everything captured once the sentinel is seen.
    pub fn feed(&mut self, text: &str) -> Option<String> {
        self.captured.push_str(text);
        self.captured
            .contains(Self::SENTINEL)
            .then(|| std::mem::take(&mut self.captured))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BinaryWait {
    pub channel: u8,
    pub end_value: f32,
    /// False while the pre-delay runs and `sd` has not been sent.
    pub requested: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArmPhase {
    /// Live streaming is being torn down.
    Draining,
    /// Wake pulses sent; waiting for the box to settle.
    Settling,
    /// `sr` sent; waiting for `r`.
    AwaitingAck,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArmWait {
    pub config: RecordingConfig,
    pub timestamp: i64,
    pub phase: ArmPhase,
}

impl ArmWait {
    pub const ACK: char = 'r';

    pub fn feed(&self, text: &str) -> bool {
        self.phase == ArmPhase::AwaitingAck && text.contains(Self::ACK)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum SessionState {
    #[default]
    Idle,
    LiveStreaming,
    AwaitingSingleChar(ModeWait),
    AwaitingMultiLine(LineWait),
    AwaitingBinary(BinaryWait),
    ArmingRecording(ArmWait),
    RecordingCountdown { remaining: u64, total: u64 },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::LiveStreaming => "live streaming",
            SessionState::AwaitingSingleChar(_) => "mode check",
            SessionState::AwaitingMultiLine(_) => "header fetch",
            SessionState::AwaitingBinary(_) => "channel download",
            SessionState::ArmingRecording(_) => "arming recording",
            SessionState::RecordingCountdown { .. } => "recording countdown",
        }
    }

    /// Whether a new offline operation may start. Live streaming is stopped
    /// by the operation itself.
    pub fn is_available(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::LiveStreaming)
    }
}
