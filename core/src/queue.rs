use std::collections::VecDeque;

use log::{debug, error, warn};

use crate::ble::{Transport, TransportError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PumpOutcome {
    /// Nothing queued; the queue is idle.
    Idle,
    /// Head of the queue handed to the transport.
    Sent,
    /// The transport refused the write; resubmit the same head later.
    RetryLater,
    /// The transport is unusable; the queue waits for a reconnect.
    Aborted(TransportError),
}

/// FIFO of command lines with at most one write in flight.
#[derive(Debug)]
pub struct CommandQueue {
    pending: VecDeque<String>,
    writing: bool,
    retry_scheduled: bool,
    warn_depth: usize,
}

impl CommandQueue {
    pub fn new(warn_depth: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            writing: false,
            retry_scheduled: false,
            warn_depth,
        }
    }

    /// Append a line. Returns true when nothing is in flight and the caller
    /// should pump.
    pub fn enqueue(&mut self, line: String) -> bool {
        self.pending.push_back(line);
        if self.pending.len() > self.warn_depth {
            warn!("command queue grew large: {} pending", self.pending.len());
        }
        !self.writing
    }

    /// Hand the head of the queue to the transport. The head is only removed
    /// once the transport accepts it.
    pub fn pump<T: Transport>(&mut self, transport: &mut T) -> PumpOutcome {
        self.retry_scheduled = false;
        let Some(line) = self.pending.front() else {
            self.writing = false;
            return PumpOutcome::Idle;
        };
        self.writing = true;
        match transport.write(line.as_bytes()) {
            Ok(()) => {
                debug!("sent {:?}", line.trim_end());
                self.pending.pop_front();
                PumpOutcome::Sent
            }
            Err(err) if err.is_retryable() => {
                debug!("write of {:?} refused ({err}), retrying", line.trim_end());
                self.retry_scheduled = true;
                PumpOutcome::RetryLater
            }
            Err(err) => {
                error!("write of {:?} aborted: {err}", line.trim_end());
                self.writing = false;
                PumpOutcome::Aborted(err)
            }
        }
    }

    /// The transport accepted the previous write; send the next one.
    pub fn on_write_complete<T: Transport>(&mut self, transport: &mut T) -> PumpOutcome {
        if !self.writing || self.retry_scheduled {
            debug!("ignoring write completion with no write in flight");
            return PumpOutcome::Idle;
        }
        self.writing = false;
        self.pump(transport)
    }

    /// Deferred resubmission after [`PumpOutcome::RetryLater`].
    pub fn retry<T: Transport>(&mut self, transport: &mut T) -> PumpOutcome {
        if !self.retry_scheduled {
            return PumpOutcome::Idle;
        }
        self.pump(transport)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.writing = false;
        self.retry_scheduled = false;
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_writing(&self) -> bool {
        self.writing
    }
}
