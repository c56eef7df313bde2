//! Content-based classification of replies that have no framing of their own.
//!
//! The matchers run in table order and the first one that accepts the text
//! wins, so the order below is the priority order.

use crate::demux::parser::{calibration_row, find_decimal};
use crate::models::CalibrationRow;

#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// `g`: turbine calibration rows for channels 5 and 6.
    FlowCalibration(Vec<CalibrationRow>),
    /// `v`: battery voltage.
    BatteryVoltage { volts: Option<f32>, raw: String },
    /// `h`: firmware version banner.
    Version(String),
    /// `z`: human-readable measurement line.
    ReadableMeasurement(String),
    /// `kr`: current-loop calibration values.
    CalibrationValues(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyKind {
    FlowCalibration,
    BatteryVoltage,
    Version,
    ReadableMeasurement,
    CalibrationValues,
}

type Matcher = fn(&str) -> Option<Reply>;

pub const CLASSIFIERS: [(ReplyKind, Matcher); 5] = [
    (ReplyKind::FlowCalibration, flow_calibration),
    (ReplyKind::BatteryVoltage, battery_voltage),
    (ReplyKind::Version, version),
    (ReplyKind::ReadableMeasurement, readable_measurement),
    (ReplyKind::CalibrationValues, calibration_values),
];

pub fn classify(text: &str) -> Option<Reply> {
    CLASSIFIERS.iter().find_map(|(_, matcher)| matcher(text))
}

fn flow_calibration(text: &str) -> Option<Reply> {
    if !(text.contains("K5") || text.contains("K6")) {
        return None;
    }
    let rows = text
        .lines()
        .filter_map(|line| calibration_row(line.trim()).ok().map(|(_, row)| row))
        .collect();
    Some(Reply::FlowCalibration(rows))
}

/// A decimal number followed somewhere by `V`.
fn battery_voltage(text: &str) -> Option<Reply> {
    let (at, volts) = find_decimal(text)?;
    if !text[at..].contains('V') {
        return None;
    }
    Some(Reply::BatteryVoltage {
        volts: Some(volts),
        raw: text.trim().to_string(),
    })
}

fn version(text: &str) -> Option<Reply> {
    text.contains("Version")
        .then(|| Reply::Version(text.trim().to_string()))
}

fn readable_measurement(text: &str) -> Option<Reply> {
    (text.contains("lpm") || text.contains("gpm"))
        .then(|| Reply::ReadableMeasurement(text.trim().to_string()))
}

fn calibration_values(text: &str) -> Option<Reply> {
    (text.contains("Calibration") || text.contains('%'))
        .then(|| Reply::CalibrationValues(text.trim().to_string()))
}
