use crate::demux::Reply;
use crate::error::EngineError;
use crate::models::{
    ChannelSamples, ChannelValues, EndValue, Mode, OfflineHeader, OfflineRecording, CHANNEL_COUNT,
};

/// Everything the engine reports back to its host, in the order it happened.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Connected,
    Disconnected,
    /// One live frame, in the peripheral's native units.
    Measurement(ChannelValues),
    CurrentRanges([u8; CHANNEL_COUNT]),
    EndValues([EndValue; CHANNEL_COUNT]),
    Reply(Reply),
    ModeChecked(Result<Mode, EngineError>),
    HeaderFetched(Result<OfflineHeader, EngineError>),
    /// A single channel download finished, possibly with partial data.
    ChannelDownloaded(ChannelSamples),
    RecordingDownloaded(Result<OfflineRecording, EngineError>),
    /// The box acknowledged `sr`; carries the expected capture time in seconds.
    RecordingArmed(Result<u64, EngineError>),
    RecordingTick { remaining_secs: u64 },
    RecordingFinished,
}
