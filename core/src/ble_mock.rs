use std::collections::VecDeque;

use crate::ble::{Transport, TransportError};

#[derive(Clone, Debug, Default)]
pub struct MockTransport {
    pub written: Vec<String>,
    pub attempts: usize,
    pub mtu_requests: Vec<u16>,
    pub failures: VecDeque<TransportError>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue errors returned by the next `write` calls, in order.
    pub fn with_failures(failures: impl IntoIterator<Item = TransportError>) -> Self {
        Self {
            failures: failures.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn count(&self, line: &str) -> usize {
        self.written.iter().filter(|w| w.as_str() == line).count()
    }

    pub fn last(&self) -> Option<&str> {
        self.written.last().map(String::as_str)
    }
}

impl Transport for MockTransport {
    fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.attempts += 1;
        if let Some(err) = self.failures.pop_front() {
            return Err(err);
        }
        self.written
            .push(String::from_utf8_lossy(payload).into_owned());
        Ok(())
    }

    fn request_mtu(&mut self, mtu: u16) -> Result<(), TransportError> {
        self.mtu_requests.push(mtu);
        Ok(())
    }
}
