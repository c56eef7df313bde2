
use crate::error::EngineError;
use crate::models::{
    ChannelMask, RecordingConfig, Unit, CHANNEL_COUNT, OFFLINE_CHANNEL_COUNT, RANGE_COUNT,
};

/// Outbound SensorBox commands. Each encodes to one ASCII line terminated by
/// a single `\n`.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// `d`: request one live frame.
    LiveRead,
    /// `z`: readable measurement of all channels.
    ReadableMeasurement,
    /// `p`: active range per channel.
    QueryRanges,
    /// `r` + six digits: select the active range per channel.
    SetRanges([u8; CHANNEL_COUNT]),
    /// `w{ch}{range} {value} {unit}`: end-of-scale value of one range.
    SetEndValue {
        channel: u8,
        range: u8,
        value: f32,
        unit: Unit,
    },
    /// `e`: end values of the active ranges.
    QueryEndValues,
    /// `ba`: end values and units of every range.
    QueryBulk,
    /// `g`: turbine calibration table.
    QueryFlowCalibration,
    /// `K{ch}{range} p1..p6`: turbine calibration curve.
    SetFlowCalibration {
        channel: u8,
        range: u8,
        params: [f32; 6],
    },
    BatteryVoltage,
    Version,
    /// `we`: restore factory ranges. Send after `q`.
    FactoryReset,
    /// `ka`: calibrate the current-loop channels.
    CalibrateCurrent,
    CalibrationValues,
    /// `q`: stop whatever the box is doing. Doubles as the wake pulse.
    Stop,
    ModeQuery,
    OfflineHeader,
    DownloadChannel(u8),
    Arm {
        timestamp: i64,
        channels: ChannelMask,
        trigger_channel: u8,
        threshold_percent: u8,
        edge: u8,
        duration_units: u32,
        time_base_ms: u32,
    },
    Custom(String),
}

fn check_channel(channel: u8, max: u8) -> Result<(), EngineError> {
    if (1..=max).contains(&channel) {
        Ok(())
    } else {
        Err(EngineError::InvalidChannel {
            channel,
            min: 1,
            max,
        })
    }
}

fn check_range(range: u8, max: u8) -> Result<(), EngineError> {
    if (1..=max).contains(&range) {
        Ok(())
    } else {
        Err(EngineError::InvalidParameter(format!(
            "range {range} outside 1..={max}"
        )))
    }
}

impl Command {
    pub fn arm(config: &RecordingConfig, timestamp: i64) -> Command {
        Command::Arm {
            timestamp,
            channels: config.channels,
            trigger_channel: config.trigger_channel,
            threshold_percent: config.threshold_percent,
            edge: config.edge.code(),
            duration_units: config.duration_units(),
            time_base_ms: config.time_base_ms,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        match self {
            Command::SetRanges(ranges) => {
                for range in ranges {
                    check_range(*range, RANGE_COUNT as u8)?;
                }
                Ok(())
            }
            Command::SetEndValue { channel, range, .. } => {
                check_channel(*channel, CHANNEL_COUNT as u8)?;
                check_range(*range, RANGE_COUNT as u8)
            }
            Command::SetFlowCalibration { channel, range, .. } => match channel {
                5 => check_range(*range, 5),
                6 => check_range(*range, 2),
                _ => Err(EngineError::InvalidChannel {
                    channel: *channel,
                    min: 5,
                    max: 6,
                }),
            },
            Command::DownloadChannel(channel) => {
                check_channel(*channel, OFFLINE_CHANNEL_COUNT as u8)
            }
            Command::Custom(text) => {
                if text.trim_end_matches('\n').contains(['\n', '\r']) {
                    Err(EngineError::InvalidParameter(
                        "command must be a single line".to_string(),
                    ))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// Wire form including the trailing newline.
    pub fn encode(&self) -> String {
        let mut line = match self {
            Command::LiveRead => "d".to_string(),
            Command::ReadableMeasurement => "z".to_string(),
            Command::QueryRanges => "p".to_string(),
            Command::SetRanges(ranges) => {
                let digits: String = ranges.iter().map(u8::to_string).collect();
                format!("r{digits}")
            }
            Command::SetEndValue {
                channel,
                range,
                value,
                unit,
            } => format!("w{channel}{range} {value} {unit}"),
            Command::QueryEndValues => "e".to_string(),
            Command::QueryBulk => "ba".to_string(),
            Command::QueryFlowCalibration => "g".to_string(),
            Command::SetFlowCalibration {
                channel,
                range,
                params,
            } => {
                let params: String = params.iter().map(|p| format!(" {p:.2}")).collect();
                format!("K{channel}{range}{params}")
            }
            Command::BatteryVoltage => "v".to_string(),
            Command::Version => "h".to_string(),
            Command::FactoryReset => "we".to_string(),
            Command::CalibrateCurrent => "ka".to_string(),
            Command::CalibrationValues => "kr".to_string(),
            Command::Stop => "q".to_string(),
            Command::ModeQuery => "m".to_string(),
            Command::OfflineHeader => "sh".to_string(),
            Command::DownloadChannel(channel) => format!("sd{channel}"),
            Command::Arm {
                timestamp,
                channels,
                trigger_channel,
                threshold_percent,
                edge,
                duration_units,
                time_base_ms,
            } => format!(
                "sr {timestamp} {channels} {trigger_channel} {threshold_percent} {edge} {duration_units} {time_base_ms}"
            ),
            Command::Custom(text) => text.trim_end_matches('\n').to_string(),
        };
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TriggerEdge;

    #[test]
    fn test_simple_commands() {
        assert_eq!(Command::LiveRead.encode(), "d\n");
        assert_eq!(Command::QueryBulk.encode(), "ba\n");
        assert_eq!(Command::OfflineHeader.encode(), "sh\n");
        assert_eq!(Command::DownloadChannel(3).encode(), "sd3\n");
        assert_eq!(Command::SetRanges([5, 5, 5, 1, 1, 1]).encode(), "r555111\n");
    }

    #[test]
    fn test_set_end_value() {
        let cmd = Command::SetEndValue {
            channel: 1,
            range: 2,
            value: 600.0,
            unit: Unit::Bar,
        };
        assert_eq!(cmd.encode(), "w12 600 bar\n");
        assert!(cmd.validate().is_ok());

        let cmd = Command::SetEndValue {
            channel: 7,
            range: 2,
            value: 600.0,
            unit: Unit::Bar,
        };
        assert!(matches!(
            cmd.validate(),
            Err(EngineError::InvalidChannel { channel: 7, .. })
        ));
    }

    #[test]
    fn test_flow_calibration() {
        let cmd = Command::SetFlowCalibration {
            channel: 5,
            range: 1,
            params: [2600.0, 25.0, 1200.0, 12.0, 160.0, 1.5],
        };
        assert_eq!(
            cmd.encode(),
            "K51 2600.00 25.00 1200.00 12.00 160.00 1.50\n"
        );
        assert!(cmd.validate().is_ok());

        let cmd = Command::SetFlowCalibration {
            channel: 6,
            range: 3,
            params: [0.0; 6],
        };
        assert!(cmd.validate().is_err());

        let cmd = Command::SetFlowCalibration {
            channel: 4,
            range: 1,
            params: [0.0; 6],
        };
        assert!(cmd.validate().is_err());
    }

    #[test]
    fn test_arm_command() {
        let config = RecordingConfig {
            channels: ChannelMask::parse("1101"),
            trigger_channel: 2,
            threshold_percent: 40,
            edge: TriggerEdge::Falling,
            samples: 10000,
            time_base_ms: 100,
        };
        assert_eq!(
            Command::arm(&config, 1_746_266_216).encode(),
            "sr 1746266216 1101 2 40 1 10 100\n"
        );
    }

    #[test]
    fn test_custom_commands() {
        assert_eq!(Command::Custom("h".to_string()).encode(), "h\n");
        assert_eq!(Command::Custom("h\n".to_string()).encode(), "h\n");
        assert!(Command::Custom("a\nb".to_string()).validate().is_err());
        assert!(Command::SetRanges([0, 1, 1, 1, 1, 1]).validate().is_err());
        assert!(Command::DownloadChannel(5).validate().is_err());
    }
}
