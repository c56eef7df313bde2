use thiserror::Error;

/// Serial-over-GATT service exposed by the SensorBox MC6600.
pub const SERVICE_UUID: &str = "0000ffe0-0000-1000-8000-00805f9b34fb";
/// Single characteristic used for both writes and notifications.
pub const CHARACTERISTIC_UUID: &str = "0000ffe1-0000-1000-8000-00805f9b34fb";
/// Client characteristic configuration descriptor that enables notifications.
pub const CCCD_UUID: &str = "00002902-0000-1000-8000-00805f9b34fb";

pub const DEFAULT_MTU: u16 = 23;

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    #[error("bluetooth permission denied")]
    PermissionDenied,
    #[error("link is down")]
    LinkDown,
    #[error("service not found")]
    ServiceNotFound,
    #[error("characteristic not found")]
    CharacteristicNotFound,
    #[error("write rejected by the bluetooth stack")]
    WriteRejected,
}

impl TransportError {
    /// Only a rejected submission is worth resubmitting; everything else waits
    /// for the next connection cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::WriteRejected)
    }
}

/// Link-level events reported by the host's BLE stack, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    NotificationsEnabled,
    Disconnected,
    WriteComplete,
    MtuChanged(u16),
    Notification(Vec<u8>),
}

/// One write/notify characteristic of a connected peripheral.
pub trait Transport {
    /// Submit a write. `Ok` means the stack accepted it; completion is
    /// reported later through [`LinkEvent::WriteComplete`].
    fn write(&mut self, payload: &[u8]) -> Result<(), TransportError>;
    fn request_mtu(&mut self, mtu: u16) -> Result<(), TransportError>;
}
