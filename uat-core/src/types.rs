//! Shared types for uat-core: error enum, protocol constants, raw frames.

use std::collections::BTreeMap;

use thiserror::Error;

/// All errors produced by uat-core.
#[derive(Debug, Error)]
pub enum UatError {
    #[error("unknown sample format: {0}")]
    UnknownFormat(String),
    #[error("malformed raw message line: {0}")]
    Protocol(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, UatError>;

// ---------------------------------------------------------------------------
// Protocol constants
// ---------------------------------------------------------------------------

/// Samples per second delivered by the SDR front end (2 samples per UAT bit).
pub const SAMPLE_RATE: u64 = 2_083_333;

pub const SYNC_BITS: usize = 36;
pub const DOWNLINK_SYNC_WORD: u64 = 0x0EAC_DDA4_E2;
pub const UPLINK_SYNC_WORD: u64 = 0x1_5322_5B1D;

pub const DOWNLINK_SHORT_DATA_BITS: usize = 144;
pub const DOWNLINK_SHORT_DATA_BYTES: usize = DOWNLINK_SHORT_DATA_BITS / 8;
pub const DOWNLINK_SHORT_BITS: usize = DOWNLINK_SHORT_DATA_BITS + 96;
pub const DOWNLINK_SHORT_BYTES: usize = DOWNLINK_SHORT_BITS / 8;

pub const DOWNLINK_LONG_DATA_BITS: usize = 272;
pub const DOWNLINK_LONG_DATA_BYTES: usize = DOWNLINK_LONG_DATA_BITS / 8;
pub const DOWNLINK_LONG_BITS: usize = DOWNLINK_LONG_DATA_BITS + 112;
pub const DOWNLINK_LONG_BYTES: usize = DOWNLINK_LONG_BITS / 8;

pub const UPLINK_BLOCK_DATA_BITS: usize = 576;
pub const UPLINK_BLOCK_DATA_BYTES: usize = UPLINK_BLOCK_DATA_BITS / 8;
pub const UPLINK_BLOCK_BITS: usize = UPLINK_BLOCK_DATA_BITS + 160;
pub const UPLINK_BLOCK_BYTES: usize = UPLINK_BLOCK_BITS / 8;

pub const UPLINK_BLOCKS_PER_FRAME: usize = 6;
pub const UPLINK_DATA_BITS: usize = UPLINK_BLOCK_DATA_BITS * UPLINK_BLOCKS_PER_FRAME;
pub const UPLINK_DATA_BYTES: usize = UPLINK_DATA_BITS / 8;
pub const UPLINK_BITS: usize = UPLINK_BLOCK_BITS * UPLINK_BLOCKS_PER_FRAME;
pub const UPLINK_BYTES: usize = UPLINK_BITS / 8;

// ---------------------------------------------------------------------------
// Wrap-safe phase arithmetic
// ---------------------------------------------------------------------------

/// Signed difference between two 16-bit phase values.
///
/// Phase is angle scaled by 2^15/pi and wrapped mod 2^16, so the plain
/// difference lies in -65535..=65535; folding it back into i16 range gives
/// a value proportional to the instantaneous frequency over the sample
/// pair. All phase differences must be taken through here.
#[inline(always)]
pub fn phase_difference(from: u16, to: u16) -> i16 {
    to.wrapping_sub(from) as i16
}

// ---------------------------------------------------------------------------
// Raw frames
// ---------------------------------------------------------------------------

/// Frame kind, derived from the corrected payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    DownlinkShort,
    DownlinkLong,
    Uplink,
    /// Metadata-only message (`!key=value;` lines), no payload.
    Metadata,
    Invalid,
}

impl FrameKind {
    fn from_payload_len(len: usize) -> FrameKind {
        match len {
            DOWNLINK_SHORT_DATA_BYTES => FrameKind::DownlinkShort,
            DOWNLINK_LONG_DATA_BYTES => FrameKind::DownlinkLong,
            UPLINK_DATA_BYTES => FrameKind::Uplink,
            _ => FrameKind::Invalid,
        }
    }
}

/// A FEC-corrected frame plus reception metadata.
///
/// Produced by the demodulator or by one of the message sources (raw line
/// parser, Stratux serial parser) and consumed by the payload decoder and
/// the output formatters.
#[derive(Debug, Clone)]
pub struct RawFrame {
    kind: FrameKind,
    payload: Vec<u8>,
    /// Wall-clock reception time, milliseconds since the Unix epoch.
    /// 0 when unknown.
    pub received_at: u64,
    /// Number of bytes corrected by FEC.
    pub errors: usize,
    /// Received signal strength, dB. 0 when unknown.
    pub rssi: f32,
    /// Device-supplied raw timestamp (Stratux ticks). 0 when absent.
    pub raw_timestamp: u64,
    metadata: BTreeMap<String, String>,
}

impl RawFrame {
    pub fn new(payload: Vec<u8>, received_at: u64, errors: usize, rssi: f32) -> RawFrame {
        RawFrame::with_raw_timestamp(payload, received_at, errors, rssi, 0)
    }

    pub fn with_raw_timestamp(
        payload: Vec<u8>,
        received_at: u64,
        errors: usize,
        rssi: f32,
        raw_timestamp: u64,
    ) -> RawFrame {
        RawFrame {
            kind: FrameKind::from_payload_len(payload.len()),
            payload,
            received_at,
            errors,
            rssi,
            raw_timestamp,
            metadata: BTreeMap::new(),
        }
    }

    /// A metadata-only message carrying key/value pairs and no payload.
    pub fn metadata(metadata: BTreeMap<String, String>) -> RawFrame {
        RawFrame {
            kind: FrameKind::Metadata,
            payload: Vec::new(),
            received_at: 0,
            errors: 0,
            rssi: 0.0,
            raw_timestamp: 0,
            metadata,
        }
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn metadata_map(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn is_downlink(&self) -> bool {
        matches!(
            self.kind,
            FrameKind::DownlinkShort | FrameKind::DownlinkLong
        )
    }

    /// Number of raw bits in the message on air, excluding the sync bits.
    pub fn bit_length(&self) -> usize {
        match self.kind {
            FrameKind::DownlinkShort => DOWNLINK_SHORT_BITS,
            FrameKind::DownlinkLong => DOWNLINK_LONG_BITS,
            FrameKind::Uplink => UPLINK_BITS,
            FrameKind::Metadata | FrameKind::Invalid => 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Hex utilities
// ---------------------------------------------------------------------------

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

/// Encode bytes as lowercase hex (the raw wire format uses lowercase).
pub fn hex_encode(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for &b in data {
        s.push(HEX_CHARS[(b >> 4) as usize] as char);
        s.push(HEX_CHARS[(b & 0x0F) as usize] as char);
    }
    s
}

/// Decode a hex string into bytes. Case-insensitive, must be even length.
pub fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.as_bytes().chunks(2) {
        let high = hex_digit(chunk[0])?;
        let low = hex_digit(chunk[1])?;
        bytes.push((high << 4) | low);
    }
    Some(bytes)
}

pub(crate) fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Round to `dp` decimal places.
pub(crate) fn round_n(value: f64, dp: i32) -> f64 {
    let scale = 10f64.powi(dp);
    (value * scale).round() / scale
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
