//! Stratux v3 UAT dongle support.
//!
//! The dongle (a TI CC1310) demodulates on-device and ships framed
//! messages, still carrying their FEC bytes, over 2 Mbps USB serial:
//!
//! ```text
//! 0A B0 CD E0   - preamble
//! LL LL         - payload size in bytes, 16 bits, little-endian
//! SS            - RSSI, signed dBm
//! TT TT TT TT   - device timestamp, 32 bits little-endian, 4 MHz ticks
//! pp pp pp ...  - payload, includes FEC data
//! ```
//!
//! The parser here is an incremental state machine over arbitrary read
//! chunks; the serial port itself is owned by the caller. Each message's
//! wall clock is derived from the device tick delta against the first
//! anchored message (ticks run at 4000/ms); when ticks go backwards the
//! anchor is re-taken from the read time.

use crate::fec::FecContext;
use crate::types::*;

const PREAMBLE: [u8; 4] = [0x0A, 0xB0, 0xCD, 0xE0];

/// 2 Mbps, 8N1: 200,000 bytes/s.
const BYTES_PER_MS: u64 = 200;

/// Device timestamp ticks per millisecond.
const TICKS_PER_MS: u64 = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    /// Scanning for the preamble sequence.
    Preamble,
    /// Reading the first length byte.
    Length1,
    /// Reading the second length byte.
    Length2,
    /// Reading RSSI, timestamp and payload.
    Message,
}

/// Incremental parser for the Stratux v3 framed format.
pub struct StratuxParser {
    fec: FecContext,
    state: ParserState,
    preamble_index: usize,
    message_len: usize,
    message: Vec<u8>,
    message_start_timestamp: u64,
    previous_sys_timestamp: u64,
    previous_raw_timestamp: u32,
}

impl StratuxParser {
    pub fn new() -> StratuxParser {
        StratuxParser {
            fec: FecContext::new(),
            state: ParserState::Preamble,
            preamble_index: 0,
            message_len: 0,
            message: Vec::new(),
            message_start_timestamp: 0,
            previous_sys_timestamp: 0,
            previous_raw_timestamp: 0,
        }
    }

    /// Consume one read chunk. `now_ms` is the wall-clock time at the end
    /// of the read; the preamble time of each message is back-computed from
    /// the byte rate.
    pub fn feed(&mut self, buf: &[u8], now_ms: u64) -> Vec<RawFrame> {
        let start_of_read = now_ms.saturating_sub(buf.len() as u64 / BYTES_PER_MS);

        let mut frames = Vec::new();
        let mut i = 0;
        while i < buf.len() {
            match self.state {
                ParserState::Preamble => {
                    if buf[i] == PREAMBLE[self.preamble_index] {
                        if self.preamble_index == 0 {
                            // remember the (system) time of the preamble start
                            self.message_start_timestamp =
                                start_of_read + i as u64 / BYTES_PER_MS;
                        }
                        i += 1;
                        self.preamble_index += 1;
                        if self.preamble_index >= PREAMBLE.len() {
                            self.state = ParserState::Length1;
                        }
                    } else if self.preamble_index > 0 {
                        // mismatch mid-preamble: re-examine this byte
                        self.preamble_index = 0;
                    } else {
                        i += 1;
                    }
                }

                ParserState::Length1 => {
                    self.message_len = buf[i] as usize + 5;
                    i += 1;
                    self.state = ParserState::Length2;
                }

                ParserState::Length2 => {
                    self.message_len += (buf[i] as usize) << 8;
                    i += 1;
                    self.message.clear();
                    self.state = ParserState::Message;
                }

                ParserState::Message => {
                    let wanted = self.message_len - self.message.len();
                    let take = wanted.min(buf.len() - i);
                    self.message.extend_from_slice(&buf[i..i + take]);
                    i += take;

                    if self.message.len() == self.message_len {
                        let raw_timestamp = u32::from_le_bytes([
                            self.message[1],
                            self.message[2],
                            self.message[3],
                            self.message[4],
                        ]);
                        let sys_timestamp = if self.previous_sys_timestamp != 0
                            && raw_timestamp > self.previous_raw_timestamp
                        {
                            self.previous_sys_timestamp
                                + (raw_timestamp - self.previous_raw_timestamp) as u64
                                    / TICKS_PER_MS
                        } else {
                            self.previous_sys_timestamp = self.message_start_timestamp;
                            self.previous_raw_timestamp = raw_timestamp;
                            self.message_start_timestamp
                        };

                        if let Some(frame) = self.parse_message(sys_timestamp) {
                            frames.push(frame);
                        }
                        self.message.clear();
                        self.state = ParserState::Preamble;
                        self.preamble_index = 0;
                    }
                }
            }
        }

        frames
    }

    fn parse_message(&self, sys_timestamp: u64) -> Option<RawFrame> {
        debug_assert!(self.message.len() >= 5);

        // assume the CC1310's signed-dBm RSSI format
        let rssi = self.message[0] as i8 as f32;
        let raw_timestamp = u32::from_le_bytes([
            self.message[1],
            self.message[2],
            self.message[3],
            self.message[4],
        ]) as u64;

        let payload = &self.message[5..];
        let (corrected, errors) = match payload.len() {
            UPLINK_BYTES => self.fec.correct_uplink(payload, &[])?,
            DOWNLINK_LONG_BYTES => self.fec.correct_downlink(payload, &[])?,
            _ => return None, // unexpected length
        };

        Some(RawFrame::with_raw_timestamp(
            corrected,
            sys_timestamp,
            errors,
            rssi,
            raw_timestamp,
        ))
    }
}

impl Default for StratuxParser {
    fn default() -> Self {
        StratuxParser::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
