use std::collections::BTreeMap;

use crate::codec;
use crate::demux::Reply;
use crate::error::EngineError;
use crate::models::{
    CalibrationRow, ChannelValues, EndValue, Unit, CHANNEL_COUNT, DEFAULT_UNITS,
};

/// Last known state of the connected box, as reported by its replies.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceState {
    /// Latest live frame, in native units.
    pub values: ChannelValues,
    pub current_ranges: Option<[u8; CHANNEL_COUNT]>,
    pub end_values: Option<[EndValue; CHANNEL_COUNT]>,
    /// Units the firmware measures in.
    pub native_units: [Unit; CHANNEL_COUNT],
    /// Units the host wants to see; same quantity as the native unit.
    pub display_units: [Unit; CHANNEL_COUNT],
    /// Turbine calibration rows keyed by `K{ch}{range}`.
    pub flow_calibration: BTreeMap<String, CalibrationRow>,
    pub battery_volts: Option<f32>,
    pub version: Option<String>,
    pub readable_measurement: Option<String>,
    pub calibration_values: Option<String>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            values: ChannelValues::default(),
            current_ranges: None,
            end_values: None,
            native_units: DEFAULT_UNITS,
            display_units: DEFAULT_UNITS,
            flow_calibration: BTreeMap::new(),
            battery_volts: None,
            version: None,
            readable_measurement: None,
            calibration_values: None,
        }
    }
}

impl DeviceState {
    /// Record the active end values. Native units come from the fixed
    /// per-channel table; a display unit survives only if it still measures
    /// the same quantity.
    pub fn apply_end_values(&mut self, values: [f32; CHANNEL_COUNT]) -> [EndValue; CHANNEL_COUNT] {
        let mut end_values = [EndValue {
            value: 0.0,
            unit: Unit::Bar,
        }; CHANNEL_COUNT];
        for (i, slot) in end_values.iter_mut().enumerate() {
            let native = DEFAULT_UNITS[i];
            self.native_units[i] = native;
            if self.display_units[i].quantity() != native.quantity() {
                self.display_units[i] = native;
            }
            *slot = EndValue {
                value: values[i],
                unit: native,
            };
        }
        self.end_values = Some(end_values);
        end_values
    }

    pub fn apply_reply(&mut self, reply: &Reply) {
        match reply {
            Reply::FlowCalibration(rows) => {
                for row in rows {
                    self.flow_calibration.insert(row.key.clone(), row.clone());
                }
            }
            Reply::BatteryVoltage { volts, .. } => self.battery_volts = *volts,
            Reply::Version(text) => self.version = Some(text.clone()),
            Reply::ReadableMeasurement(text) => self.readable_measurement = Some(text.clone()),
            Reply::CalibrationValues(text) => self.calibration_values = Some(text.clone()),
        }
    }

    pub fn set_display_unit(&mut self, channel: u8, unit: Unit) -> Result<(), EngineError> {
        let index = usize::from(channel)
            .checked_sub(1)
            .filter(|i| *i < CHANNEL_COUNT)
            .ok_or(EngineError::InvalidChannel {
                channel,
                min: 1,
                max: CHANNEL_COUNT as u8,
            })?;
        let native = self.native_units[index];
        if unit.quantity() != native.quantity() {
            return Err(EngineError::InvalidParameter(format!(
                "P{channel} measures in {native}, cannot display {unit}"
            )));
        }
        self.display_units[index] = unit;
        Ok(())
    }

    /// Readings of the latest frame converted to display units. Channels
    /// without a reading are left out.
    pub fn display_sample(&self) -> BTreeMap<u8, f32> {
        self.values
            .0
            .iter()
            .enumerate()
            .filter_map(|(i, value)| {
                let value = (*value)?;
                let converted = codec::convert(value, self.native_units[i], self.display_units[i]);
                Some((i as u8 + 1, converted))
            })
            .collect()
    }

    /// Active range per channel, R1 where the box has not reported one yet.
    pub fn ranges_or_default(&self) -> [u8; CHANNEL_COUNT] {
        self.current_ranges.unwrap_or([1; CHANNEL_COUNT])
    }
}
