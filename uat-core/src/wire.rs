//! The raw-message wire format: one ASCII line per message.
//!
//! ```text
//! -18b2c3...;rs=2;rssi=-13.4;t=1609459200.123;
//! +a70081...;t=1609459201.005;rt=48211;
//! !program=uat-decoder;version=0.3.1;
//! ```
//!
//! `-` marks a downlink, `+` an uplink, `!` a metadata-only line. The
//! payload is lowercase hex; key/value pairs trail it. Unknown keys are
//! ignored on input. A malformed data line is a protocol error: the
//! reading connection is expected to close.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::types::*;

/// Render a frame as a wire line, without the trailing newline.
///
/// Only valid frames and metadata messages have a line form; panics on
/// [`FrameKind::Invalid`], which never reaches an output.
pub fn format_frame(frame: &RawFrame) -> String {
    if frame.kind() == FrameKind::Metadata {
        let mut line = String::from("!");
        for (key, value) in frame.metadata_map() {
            let _ = write!(line, "{key}={value};");
        }
        return line;
    }

    let prefix = match frame.kind() {
        FrameKind::DownlinkShort | FrameKind::DownlinkLong => '-',
        FrameKind::Uplink => '+',
        FrameKind::Metadata | FrameKind::Invalid => panic!("unexpected message type"),
    };

    let mut line = String::with_capacity(frame.payload().len() * 2 + 32);
    line.push(prefix);
    line.push_str(&hex_encode(frame.payload()));
    line.push(';');

    if frame.errors > 0 {
        let _ = write!(line, "rs={};", frame.errors);
    }
    if frame.rssi != 0.0 {
        let _ = write!(line, "rssi={:.1};", frame.rssi);
    }
    if frame.received_at != 0 {
        let _ = write!(
            line,
            "t={}.{:03};",
            frame.received_at / 1000,
            frame.received_at % 1000
        );
    }
    if frame.raw_timestamp != 0 {
        let _ = write!(line, "rt={};", frame.raw_timestamp);
    }

    line
}

/// Parse one wire line (without its newline) into a frame.
///
/// Unknown keys and malformed key/value tails are ignored; a malformed
/// prefix or payload is a [`UatError::Protocol`] and the caller should
/// drop the connection.
pub fn parse_line(line: &str) -> Result<RawFrame> {
    if line.len() < 2 {
        return Err(UatError::Protocol(line.to_string()));
    }

    if line.starts_with('!') {
        return Ok(RawFrame::metadata(parse_metadata(line)));
    }

    if !line.starts_with('-') && !line.starts_with('+') {
        return Err(UatError::Protocol(line.to_string()));
    }

    let eod = match line.find(';') {
        Some(i) => i,
        None => return Err(UatError::Protocol(line.to_string())),
    };

    let payload = match hex_decode(&line[1..eod]) {
        Some(p) => p,
        None => return Err(UatError::Protocol(line.to_string())),
    };

    let mut rs = 0usize;
    let mut rssi = 0f64;
    let mut t = 0u64;
    let mut rt = 0u64;

    for (key, value) in kv_pairs(&line[eod + 1..]) {
        match key {
            "rs" => rs = value.parse().unwrap_or(0),
            "rssi" => rssi = value.parse().unwrap_or(0.0),
            "t" => {
                t = value
                    .parse::<f64>()
                    .map(|secs| (secs * 1000.0) as u64)
                    .unwrap_or(0)
            }
            "rt" => rt = value.parse().unwrap_or(0),
            _ => {} // unknown keys are ignored
        }
    }

    Ok(RawFrame::with_raw_timestamp(payload, t, rs, rssi as f32, rt))
}

/// Iterate `key=value;` pairs, stopping at the first malformed tail.
fn kv_pairs(mut rest: &str) -> impl Iterator<Item = (&str, &str)> + '_ {
    std::iter::from_fn(move || {
        let equals = rest.find('=')?;
        let semicolon = rest.find(';')?;
        if semicolon < equals {
            return None;
        }
        let key = &rest[..equals];
        let value = &rest[equals + 1..semicolon];
        rest = &rest[semicolon + 1..];
        Some((key, value))
    })
}

fn parse_metadata(line: &str) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    for (key, value) in kv_pairs(&line[1..]) {
        metadata.insert(key.to_string(), value.to_string());
    }
    metadata
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
