use std::time::Duration;

/// Timing constants and thresholds of the SensorBox protocol.
///
/// The defaults are what the firmware tolerates; hosts normally only change
/// them in tests.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub write_retry_delay: Duration,
    pub queue_warn_depth: usize,
    pub receive_capacity: usize,

    pub live_poll_interval: Duration,
    /// Live polls are skipped while at least this many commands are queued.
    pub live_queue_limit: usize,

    pub mode_check_attempts: u32,
    pub mode_wake_gap: Duration,
    pub mode_settle: Duration,
    pub mode_reply_timeout: Duration,
    pub mode_retry_delay: Duration,

    pub header_timeout: Duration,
    pub end_values_expiry: Duration,

    pub download_pre_delay: Duration,
    pub download_timeout: Duration,
    pub inter_channel_pause: Duration,
    pub requested_mtu: u16,

    pub live_teardown: Duration,
    pub arm_wake_gap: Duration,
    pub arm_settle: Duration,
    pub arm_ack_timeout: Duration,
    pub countdown_tick: Duration,

    pub factory_reset_gap: Duration,
    pub calibration_gap: Duration,
    pub range_write_spacing: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            write_retry_delay: Duration::from_millis(100),
            queue_warn_depth: 20,
            receive_capacity: 200,
            live_poll_interval: Duration::from_millis(250),
            live_queue_limit: 12,
            mode_check_attempts: 20,
            mode_wake_gap: Duration::from_millis(300),
            mode_settle: Duration::from_secs(2),
            mode_reply_timeout: Duration::from_secs(5),
            mode_retry_delay: Duration::from_secs(1),
            header_timeout: Duration::from_secs(3),
            end_values_expiry: Duration::from_secs(3),
            download_pre_delay: Duration::from_secs(1),
            download_timeout: Duration::from_secs(120),
            inter_channel_pause: Duration::from_millis(300),
            requested_mtu: 512,
            live_teardown: Duration::from_millis(800),
            arm_wake_gap: Duration::from_millis(500),
            arm_settle: Duration::from_millis(2500),
            arm_ack_timeout: Duration::from_secs(3),
            countdown_tick: Duration::from_secs(1),
            factory_reset_gap: Duration::from_millis(100),
            calibration_gap: Duration::from_millis(200),
            range_write_spacing: Duration::from_millis(100),
        }
    }
}
