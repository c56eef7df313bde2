//! Pure value conversions: binary sample decoding, unit conversion and
//! display formatting. No I/O and no state.

use crate::models::Unit;

/// Raw byte mapped to 0 %.
pub const RAW_ZERO: f32 = 40.0;
/// Raw counts per percent (byte 200 maps to 100 %).
pub const RAW_PER_PERCENT: f32 = 1.6;

const PSI_PER_BAR: f32 = 14.5038;
const PSI_PER_MPA: f32 = 145.038;
const GPM_PER_LPM: f32 = 0.264172;

/// Decode an offline sample block, one unsigned byte per sample, into
/// physical values scaled by the channel's end-of-scale value.
pub fn decode(bytes: &[u8], end_value: f32) -> Vec<f32> {
    bytes
        .iter()
        .map(|&raw| {
            let percentage = (f32::from(raw) - RAW_ZERO) / RAW_PER_PERCENT;
            percentage / 100.0 * end_value
        })
        .collect()
}

/// Convert between units of the same quantity. Pairs without a known
/// conversion return the value unchanged.
pub fn convert(value: f32, from: Unit, to: Unit) -> f32 {
    use Unit::*;

    match (from, to) {
        (Bar, Psi) => value * PSI_PER_BAR,
        (Psi, Bar) => value / PSI_PER_BAR,
        (Bar, MegaPascal) => value * 0.1,
        (MegaPascal, Bar) => value * 10.0,
        (Psi, MegaPascal) => value / PSI_PER_MPA,
        (MegaPascal, Psi) => value * PSI_PER_MPA,
        (Celsius, Fahrenheit) => value * 1.8 + 32.0,
        (Fahrenheit, Celsius) => (value - 32.0) / 1.8,
        (LitresPerMinute, GallonsPerMinute) => value * GPM_PER_LPM,
        (GallonsPerMinute, LitresPerMinute) => value / GPM_PER_LPM,
        _ => value,
    }
}

/// Format a reading for display: whole numbers for speeds and psi, three
/// decimals otherwise.
pub fn format(value: f64, unit: Option<Unit>) -> String {
    match unit {
        Some(Unit::Rpm | Unit::RevolutionsPerMinute | Unit::Psi) => {
            format!("{}", value.trunc() as i64)
        }
        _ => format!("{value:.3}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-4, "{a} != {b}");
    }

    #[test]
    fn test_decode_calibration_points() {
        let values = decode(&[40, 200], 100.0);
        assert_eq!(values.len(), 2);
        assert_close(values[0], 0.0);
        assert_close(values[1], 100.0);
    }

    #[test]
    fn test_decode_scales_by_end_value() {
        let values = decode(&[120], 50.0);
        assert_close(values[0], ((120.0 - 40.0) / 1.6) / 100.0 * 50.0);
    }

    #[test]
    fn test_decode_below_zero_and_high_bytes() {
        let values = decode(&[0, 255], 160.0);
        assert_close(values[0], -40.0);
        assert_close(values[1], 215.0);
        assert!(decode(&[], 100.0).is_empty());
    }

    #[test]
    fn test_convert_pressure() {
        assert_close(convert(10.0, Unit::Bar, Unit::Psi), 145.038);
        assert_close(convert(145.038, Unit::Psi, Unit::Bar), 10.0);
        assert_close(convert(10.0, Unit::Bar, Unit::MegaPascal), 1.0);
        assert_close(convert(1.0, Unit::MegaPascal, Unit::Psi), 145.038);
    }

    #[test]
    fn test_convert_temperature_and_flow() {
        assert_close(convert(100.0, Unit::Celsius, Unit::Fahrenheit), 212.0);
        assert_close(convert(32.0, Unit::Fahrenheit, Unit::Celsius), 0.0);
        assert_close(convert(100.0, Unit::LitresPerMinute, Unit::GallonsPerMinute), 26.4172);
    }

    #[test]
    fn test_convert_unrelated_units_is_identity() {
        assert_eq!(convert(12.5, Unit::Bar, Unit::Celsius), 12.5);
        assert_eq!(convert(12.5, Unit::Rpm, Unit::Rpm), 12.5);
    }

    #[test]
    fn test_format() {
        assert_eq!(format(1234.56, Some(Unit::Rpm)), "1234");
        assert_eq!(format(87.9, Some(Unit::Psi)), "87");
        assert_eq!(format(1.23456, Some(Unit::Bar)), "1.235");
        assert_eq!(format(20.0, None), "20.000");
    }
}
