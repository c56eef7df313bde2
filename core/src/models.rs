use std::collections::BTreeMap;
use std::fmt;

use crate::error::EngineError;

/// Live channels P1..P6.
pub const CHANNEL_COUNT: usize = 6;
/// Channels P1..P4 can be captured by an offline recording.
pub const OFFLINE_CHANNEL_COUNT: usize = 4;
/// Ranges R1..R5 per channel.
pub const RANGE_COUNT: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Quantity {
    Pressure,
    Temperature,
    Flow,
    Speed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Unit {
    Bar,
    Psi,
    MegaPascal,
    Celsius,
    Fahrenheit,
    LitresPerMinute,
    GallonsPerMinute,
    Rpm,
    RevolutionsPerMinute,
}

impl Unit {
    /// Symbol as written on the wire and in exported files.
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Bar => "bar",
            Unit::Psi => "psi",
            Unit::MegaPascal => "MPa",
            Unit::Celsius => "C",
            Unit::Fahrenheit => "F",
            Unit::LitresPerMinute => "lpm",
            Unit::GallonsPerMinute => "gpm",
            Unit::Rpm => "rpm",
            Unit::RevolutionsPerMinute => "U/m",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Unit> {
        match symbol.trim() {
            "bar" => Some(Unit::Bar),
            "psi" => Some(Unit::Psi),
            "MPa" => Some(Unit::MegaPascal),
            "C" | "°C" => Some(Unit::Celsius),
            "F" | "°F" => Some(Unit::Fahrenheit),
            "lpm" => Some(Unit::LitresPerMinute),
            "gpm" => Some(Unit::GallonsPerMinute),
            "rpm" => Some(Unit::Rpm),
            "U/m" => Some(Unit::RevolutionsPerMinute),
            _ => None,
        }
    }

    pub fn quantity(&self) -> Quantity {
        match self {
            Unit::Bar | Unit::Psi | Unit::MegaPascal => Quantity::Pressure,
            Unit::Celsius | Unit::Fahrenheit => Quantity::Temperature,
            Unit::LitresPerMinute | Unit::GallonsPerMinute => Quantity::Flow,
            Unit::Rpm | Unit::RevolutionsPerMinute => Quantity::Speed,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Native unit per channel as fixed by the firmware: P1-P3 pressure,
/// P4 temperature, P5-P6 flow.
pub const DEFAULT_UNITS: [Unit; CHANNEL_COUNT] = [
    Unit::Bar,
    Unit::Bar,
    Unit::Bar,
    Unit::Celsius,
    Unit::LitresPerMinute,
    Unit::LitresPerMinute,
];

/// Offline mode reported by the `m` query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// `N`: ready, no recording held.
    Ready,
    /// `R`: a recording completed and its data is held in flash.
    HoldsData,
}

impl Mode {
    pub fn from_char(c: char) -> Option<Mode> {
        match c {
            'N' => Some(Mode::Ready),
            'R' => Some(Mode::HoldsData),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Mode::Ready => 'N',
            Mode::HoldsData => 'R',
        }
    }
}

/// Latest value per channel; `None` when the frame carried no number.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ChannelValues(pub [Option<f32>; CHANNEL_COUNT]);

impl ChannelValues {
    pub fn get(&self, channel: u8) -> Option<f32> {
        let index = usize::from(channel).checked_sub(1)?;
        self.0.get(index).copied().flatten()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EndValue {
    pub value: f32,
    pub unit: Unit,
}

impl fmt::Display for EndValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// One row of the turbine calibration table returned by `g`, e.g.
/// `K51 2625.01 26.64 1290.76 13.12 164.85 1.79`.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationRow {
    pub key: String,
    pub channel: u8,
    pub range: u8,
    pub params: [f32; 6],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerEdge {
    Rising,
    Falling,
}

impl TriggerEdge {
    pub fn code(&self) -> u8 {
        match self {
            TriggerEdge::Rising => 0,
            TriggerEdge::Falling => 1,
        }
    }
}

/// Active offline channels P1..P4, written as `"0101"` on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelMask(pub [bool; OFFLINE_CHANNEL_COUNT]);

impl ChannelMask {
    /// Reads the first four characters of an `rc` value; anything other than
    /// `'1'` is inactive.
    pub fn parse(text: &str) -> ChannelMask {
        let mut mask = [false; OFFLINE_CHANNEL_COUNT];
        for (slot, c) in mask.iter_mut().zip(text.trim().chars()) {
            *slot = c == '1';
        }
        ChannelMask(mask)
    }

    pub fn channels(&self) -> Vec<u8> {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, active)| **active)
            .map(|(i, _)| i as u8 + 1)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        !self.0.iter().any(|active| *active)
    }
}

impl fmt::Display for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for active in self.0 {
            f.write_str(if active { "1" } else { "0" })?;
        }
        Ok(())
    }
}

pub const TIME_BASES_MS: [u32; 5] = [1, 10, 100, 1000, 10000];

#[derive(Clone, Debug, PartialEq)]
pub struct RecordingConfig {
    pub channels: ChannelMask,
    pub trigger_channel: u8,
    pub threshold_percent: u8,
    pub edge: TriggerEdge,
    pub samples: u32,
    /// Milliseconds between samples.
    pub time_base_ms: u32,
}

impl RecordingConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.channels.is_empty() {
            return Err(EngineError::NoChannels);
        }
        if !(1..=CHANNEL_COUNT as u8).contains(&self.trigger_channel) {
            return Err(EngineError::InvalidChannel {
                channel: self.trigger_channel,
                min: 1,
                max: CHANNEL_COUNT as u8,
            });
        }
        if self.threshold_percent > 100 {
            return Err(EngineError::InvalidParameter(format!(
                "trigger threshold {}% outside 0..=100",
                self.threshold_percent
            )));
        }
        if self.samples == 0 || self.samples % 1000 != 0 {
            return Err(EngineError::InvalidParameter(format!(
                "sample count {} is not a positive multiple of 1000",
                self.samples
            )));
        }
        if !TIME_BASES_MS.contains(&self.time_base_ms) {
            return Err(EngineError::InvalidParameter(format!(
                "unsupported time base {} ms",
                self.time_base_ms
            )));
        }
        Ok(())
    }

    /// The `du` argument: thousands of samples.
    pub fn duration_units(&self) -> u32 {
        self.samples / 1000
    }

    /// Expected capture time once triggered.
    pub fn duration_secs(&self) -> u64 {
        u64::from(self.samples) * u64::from(self.time_base_ms) / 1000
    }
}

/// Key/value header returned by `sh`. Duplicate keys keep the last value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OfflineHeader {
    pub fields: BTreeMap<String, String>,
}

impl OfflineHeader {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    fn parsed<V: std::str::FromStr>(&self, key: &str) -> Option<V> {
        self.get(key)?.trim().parse().ok()
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.parsed("ts")
    }

    pub fn channel_mask(&self) -> Option<ChannelMask> {
        self.get("rc").map(ChannelMask::parse)
    }

    pub fn trigger_channel(&self) -> Option<u8> {
        self.parsed("tc")
    }

    pub fn trigger_threshold(&self) -> Option<u8> {
        self.parsed("th")
    }

    pub fn trigger_edge(&self) -> Option<TriggerEdge> {
        match self.parsed::<u8>("ed")? {
            0 => Some(TriggerEdge::Rising),
            1 => Some(TriggerEdge::Falling),
            _ => None,
        }
    }

    pub fn duration_units(&self) -> Option<u32> {
        self.parsed("du")
    }

    pub fn time_base_ms(&self) -> Option<u32> {
        self.parsed("tb")
    }

    pub fn end_value(&self, channel: u8) -> Option<f32> {
        self.parsed(&format!("e{channel}"))
    }

    pub fn unit(&self, channel: u8) -> Option<&str> {
        self.get(&format!("u{channel}"))
    }

    pub fn total_samples(&self) -> Option<u64> {
        self.parsed("end")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChannelSamples {
    pub channel: u8,
    pub values: Vec<f32>,
    /// False when the download timed out before the `&` terminator arrived.
    pub complete: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OfflineRecording {
    pub header: OfflineHeader,
    pub channels: BTreeMap<u8, Vec<f32>>,
}

impl OfflineRecording {
    pub fn suggested_filename(&self) -> String {
        let stamp = self.header.get("ts").unwrap_or("unknown");
        format!("sensorbox_{stamp}.csv")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RecordingConfig {
        RecordingConfig {
            channels: ChannelMask::parse("1100"),
            trigger_channel: 1,
            threshold_percent: 50,
            edge: TriggerEdge::Rising,
            samples: 5000,
            time_base_ms: 10,
        }
    }

    #[test]
    fn test_unit_symbols() {
        for unit in [Unit::Bar, Unit::MegaPascal, Unit::Celsius, Unit::RevolutionsPerMinute] {
            assert_eq!(Unit::from_symbol(unit.symbol()), Some(unit));
        }
        assert_eq!(Unit::from_symbol("°C"), Some(Unit::Celsius));
        assert_eq!(Unit::from_symbol("kPa"), None);
        assert_eq!(DEFAULT_UNITS[3].quantity(), Quantity::Temperature);
    }

    #[test]
    fn test_channel_mask() {
        let mask = ChannelMask::parse("0101");
        assert_eq!(mask.channels(), vec![2, 4]);
        assert_eq!(mask.to_string(), "0101");
        assert!(ChannelMask::parse("0000").is_empty());
        assert_eq!(ChannelMask::parse("11").channels(), vec![1, 2]);
    }

    #[test]
    fn test_recording_config_durations() {
        let config = base();
        assert!(config.validate().is_ok());
        assert_eq!(config.duration_units(), 5);
        assert_eq!(config.duration_secs(), 50);
    }

    #[test]
    fn test_recording_config_rejects_bad_samples() {
        let mut config = base();
        config.samples = 1500;
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidParameter(_))
        ));

        let mut config = base();
        config.time_base_ms = 7;
        assert!(config.validate().is_err());

        let mut config = base();
        config.channels = ChannelMask::default();
        assert_eq!(config.validate(), Err(EngineError::NoChannels));
    }

    #[test]
    fn test_header_accessors() {
        let mut header = OfflineHeader::default();
        for (k, v) in [
            ("ts", "1746266216"),
            ("rc", "1010"),
            ("ed", "1"),
            ("e1", "600.00"),
            ("u1", "bar"),
            ("end", "5000"),
        ] {
            header.fields.insert(k.to_string(), v.to_string());
        }
        assert_eq!(header.timestamp(), Some(1_746_266_216));
        assert_eq!(header.channel_mask().map(|m| m.channels()), Some(vec![1, 3]));
        assert_eq!(header.trigger_edge(), Some(TriggerEdge::Falling));
        assert_eq!(header.end_value(1), Some(600.0));
        assert_eq!(header.end_value(2), None);
        assert_eq!(header.unit(1), Some("bar"));
        assert_eq!(header.total_samples(), Some(5000));

        let recording = OfflineRecording {
            header,
            channels: BTreeMap::new(),
        };
        assert_eq!(recording.suggested_filename(), "sensorbox_1746266216.csv");
    }
}
