use thiserror::Error;

use crate::ble::TransportError;

/// Error type for engine operations.
///
/// Returned synchronously when an operation is rejected before touching the
/// transport, and carried inside [`crate::Event`] results when a request
/// resolves without data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("not connected to a SensorBox")]
    NotConnected,

    #[error("engine busy: {0}")]
    Busy(&'static str),

    #[error("invalid channel {channel}: expected {min}..={max}")]
    InvalidChannel { channel: u8, min: u8, max: u8 },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("offline header must be fetched before downloading channel data")]
    HeaderRequired,

    #[error("no channels recorded")]
    NoChannels,

    #[error("no response from SensorBox after {attempts} attempts")]
    NoResponse { attempts: u32 },

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::InvalidChannel {
            channel: 5,
            min: 1,
            max: 4,
        };
        assert_eq!(err.to_string(), "invalid channel 5: expected 1..=4");

        let err = EngineError::NoResponse { attempts: 20 };
        assert_eq!(
            err.to_string(),
            "no response from SensorBox after 20 attempts"
        );

        let err = EngineError::Timeout("offline header");
        assert_eq!(err.to_string(), "timed out waiting for offline header");

        let err = EngineError::from(TransportError::PermissionDenied);
        assert_eq!(err.to_string(), "bluetooth permission denied");
    }
}
