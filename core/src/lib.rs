pub mod ble;
pub mod ble_mock;
pub mod codec;
pub mod command;
pub mod config;
pub mod demux;
pub mod device;
pub mod engine;
pub mod error;
pub mod event;
pub mod models;
pub mod queue;
pub mod recording;
pub mod session;
pub mod sink;
pub mod timer;

uniffi::include_scaffolding!("sensorbox");

pub use ble::{LinkEvent, Transport, TransportError};
pub use command::Command;
pub use config::EngineConfig;
pub use demux::Reply;
pub use device::DeviceState;
pub use engine::Engine;
pub use error::EngineError;
pub use event::Event;
pub use models::{
    ChannelMask, ChannelSamples, ChannelValues, EndValue, Mode, OfflineHeader, OfflineRecording,
    RecordingConfig, TriggerEdge, Unit,
};
pub use session::SessionState;
pub use sink::{CsvExporter, RecordingExporter, SampleSink};

pub fn decode_samples(raw: Vec<u8>, end_value: f32) -> Vec<f32> {
    codec::decode(&raw, end_value)
}

/// Unknown unit symbols leave the value unchanged.
pub fn convert_value(value: f32, from_unit: String, to_unit: String) -> f32 {
    match (Unit::from_symbol(&from_unit), Unit::from_symbol(&to_unit)) {
        (Some(from), Some(to)) => codec::convert(value, from, to),
        _ => value,
    }
}

pub fn format_value(value: f64, unit: String) -> String {
    codec::format(value, Unit::from_symbol(&unit))
}
