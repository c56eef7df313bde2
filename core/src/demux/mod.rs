//! Demultiplexer for the single notification channel.
//!
//! Live frames, replies to queries and binary sample blocks all arrive on the
//! same characteristic without common framing. Text is accumulated in a
//! bounded receive buffer and complete units are extracted in a fixed
//! priority order:
//!
//! 1. end-values frame (only while an `e` query is outstanding)
//! 2. standalone six-digit range code
//! 3. measurement frames, as many as are complete
//! 4. content-classified replies (see [`classify`])
//!
//! Binary downloads bypass the text path entirely and are collected until the
//! `&` terminator.

pub mod classify;
pub mod parser;

use log::debug;

pub use classify::{classify, Reply, ReplyKind};

use crate::models::CHANNEL_COUNT;
use parser::{end_values_frame, range_code, reading, DELIMITER};

pub const BINARY_TERMINATOR: u8 = b'&';

/// Delimiters in one complete frame: a leading one plus one per value.
const FRAME_DELIMITERS: usize = CHANNEL_COUNT + 1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frame {
    pub values: [Option<f32>; CHANNEL_COUNT],
}

#[derive(Clone, Debug, PartialEq)]
pub enum Extracted {
    EndValues([f32; CHANNEL_COUNT]),
    CurrentRanges([u8; CHANNEL_COUNT]),
    Frame(Frame),
    Reply(Reply),
}

/// Characters that make a digit run part of a larger token.
fn joins_token(c: char) -> bool {
    c.is_ascii_digit() || c == '.' || c == '-' || c == DELIMITER
}

#[derive(Debug)]
pub struct Demultiplexer {
    text: String,
    binary: Vec<u8>,
    capacity: usize,
    expect_end_values: bool,
}

impl Demultiplexer {
    pub fn new(capacity: usize) -> Self {
        Self {
            text: String::new(),
            binary: Vec::new(),
            capacity,
            expect_end_values: false,
        }
    }

    pub fn buffer(&self) -> &str {
        &self.text
    }

    pub fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Arm or disarm end-values classification. A `#v#v#v#v#v#v#` reply is
    /// indistinguishable from a live frame, so it is only taken while an `e`
    /// query is outstanding.
    pub fn expect_end_values(&mut self, expect: bool) {
        self.expect_end_values = expect;
    }

    pub fn expects_end_values(&self) -> bool {
        self.expect_end_values
    }

    /// Run every extraction step once, in priority order.
    pub fn extract(&mut self) -> Vec<Extracted> {
        let mut units = Vec::new();
        if let Some(values) = self.take_end_values() {
            units.push(Extracted::EndValues(values));
        }
        if let Some(ranges) = self.take_range_code() {
            units.push(Extracted::CurrentRanges(ranges));
        }
        while let Some(frame) = self.take_frame() {
            units.push(Extracted::Frame(frame));
        }
        if let Some(reply) = self.take_reply() {
            units.push(Extracted::Reply(reply));
        }
        units
    }

    /// Remove the first end-values frame found anywhere in the buffer.
    pub fn take_end_values(&mut self) -> Option<[f32; CHANNEL_COUNT]> {
        if !self.expect_end_values {
            return None;
        }
        let (start, end, values) = self.text.match_indices(DELIMITER).find_map(|(i, _)| {
            end_values_frame(&self.text[i..])
                .ok()
                .map(|(rest, values)| (i, self.text.len() - rest.len(), values))
        })?;
        debug!("end values reply {:?}", &self.text[start..end]);
        self.text.replace_range(start..end, "");
        self.expect_end_values = false;
        Some(values)
    }

    /// Remove the first standalone range code.
    pub fn take_range_code(&mut self) -> Option<[u8; CHANNEL_COUNT]> {
        let text = &self.text;
        let (start, end, ranges) = text.char_indices().find_map(|(i, _)| {
            if text[..i].chars().next_back().is_some_and(joins_token) {
                return None;
            }
            let (rest, ranges) = range_code(&text[i..]).ok()?;
            if rest.chars().next().is_some_and(joins_token) {
                return None;
            }
            Some((i, text.len() - rest.len(), ranges))
        })?;
        debug!("range code reply {:?}", &self.text[start..end]);
        self.text.replace_range(start..end, "");
        Some(ranges)
    }

    /// Remove one measurement frame, from its opening delimiter to the
    /// seventh, once both have arrived. Text ahead of the opening delimiter
    /// is not part of the frame and stays for the classifier. A frame with
    /// fewer than six non-blank parts is left in place.
    pub fn take_frame(&mut self) -> Option<Frame> {
        let mut delimiters = self.text.match_indices(DELIMITER).map(|(i, _)| i);
        let start = delimiters.next()?;
        let end = delimiters.nth(FRAME_DELIMITERS - 2)?;
        let parts: Vec<&str> = self.text[start..=end]
            .split(DELIMITER)
            .filter(|part| !part.trim().is_empty())
            .collect();
        if parts.len() < CHANNEL_COUNT {
            return None;
        }
        let mut values = [None; CHANNEL_COUNT];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = reading(part);
        }
        if start > 0 {
            debug!("text ahead of frame: {:?}", &self.text[..start]);
        }
        self.text.replace_range(start..=end, "");
        Some(Frame { values })
    }

    /// Classify the remaining text; the whole buffer is consumed on a match.
    pub fn take_reply(&mut self) -> Option<Reply> {
        if self.text.trim().is_empty() {
            return None;
        }
        let reply = classify(&self.text)?;
        debug!("reply {:?}", reply);
        self.text.clear();
        Some(reply)
    }

    /// Clear the buffer if it outgrew its capacity, counted in characters.
    /// Returns true when data was discarded.
    pub fn enforce_capacity(&mut self) -> bool {
        let len = self.text.chars().count();
        if len <= self.capacity {
            return false;
        }
        debug!("receive buffer overflow, discarding {len} characters");
        self.text.clear();
        true
    }

    /// Append downloaded bytes. Returns the block, terminator stripped, once
    /// the last byte received is `&`.
    pub fn push_binary(&mut self, bytes: &[u8]) -> Option<Vec<u8>> {
        self.binary.extend_from_slice(bytes);
        if self.binary.last() != Some(&BINARY_TERMINATOR) {
            return None;
        }
        self.binary.pop();
        Some(std::mem::take(&mut self.binary))
    }

    /// Whatever arrived so far, for a download that timed out.
    pub fn take_binary(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.binary)
    }

    /// Drop buffered text that a completed wait has already consumed.
    pub fn clear_text(&mut self) {
        self.text.clear();
    }

    pub fn clear_binary(&mut self) {
        self.binary.clear();
    }

    pub fn reset(&mut self) {
        self.text.clear();
        self.binary.clear();
        self.expect_end_values = false;
    }
}
