//! Blocking sample and message sources.
//!
//! These run on a dedicated pipeline thread and push decoded frames into a
//! sink callback. Reads are re-aligned to whole samples before they reach
//! the receiver, so nothing is lost across read boundaries.

use std::io::{self, ErrorKind, Read};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use uat_core::convert::SampleFormat;
use uat_core::demod::Receiver;
use uat_core::stratux::StratuxParser;
use uat_core::types::{RawFrame, SAMPLE_RATE};

/// Read granularity for sample sources.
const BLOCK_BYTES: usize = 262_144;

/// Read granularity for the Stratux serial stream.
const SERIAL_BLOCK_BYTES: usize = 8_192;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// How block timestamps are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// Synthetic timestamps starting at 1, advanced by sample count.
    /// Used for file sources, where wall time is meaningless.
    Synthetic,
    /// Wall-clock timestamps, back-dated over the block length.
    Wall,
}

/// Drive a [`Receiver`] from a byte stream until EOF.
///
/// With `throttle`, playback is paced to the live sample rate.
pub fn run_sample_source<R, F>(
    mut reader: R,
    format: SampleFormat,
    clock: ClockMode,
    throttle: bool,
    mut sink: F,
) -> io::Result<()>
where
    R: Read,
    F: FnMut(Vec<RawFrame>),
{
    let bps = format.bytes_per_sample();
    let bytes_per_second = (SAMPLE_RATE as usize * bps) as u64;

    let mut receiver = Receiver::new(format);
    let mut block = vec![0u8; BLOCK_BYTES - BLOCK_BYTES % bps];
    let mut used = 0usize;
    let mut timestamp: u64 = 1;
    let mut next_block = Instant::now();

    loop {
        let n = match reader.read(&mut block[used..]) {
            Ok(0) => return Ok(()), // EOF
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        used += n;

        let aligned = used - used % bps;
        if aligned == 0 {
            continue;
        }
        let block_millis = aligned as u64 * 1000 / bytes_per_second;

        let block_timestamp = match clock {
            ClockMode::Synthetic => timestamp,
            ClockMode::Wall => now_millis().saturating_sub(block_millis),
        };

        let frames = receiver.handle_samples(block_timestamp, &block[..aligned]);

        if clock == ClockMode::Synthetic {
            timestamp += block_millis;
        }

        // keep the partial trailing sample for the next read
        block.copy_within(aligned..used, 0);
        used -= aligned;

        if !frames.is_empty() {
            sink(frames);
        }

        if throttle {
            next_block += Duration::from_nanos(1_000_000_000 * aligned as u64 / bytes_per_second);
            let now = Instant::now();
            if next_block > now {
                std::thread::sleep(next_block - now);
            }
        }
    }
}

/// Drive a [`StratuxParser`] from a serial (or captured) byte stream until
/// EOF. The port must already be configured for 2 Mbps 8N1.
pub fn run_stratux_source<R, F>(mut reader: R, mut sink: F) -> io::Result<()>
where
    R: Read,
    F: FnMut(Vec<RawFrame>),
{
    let mut parser = StratuxParser::new();
    let mut buf = vec![0u8; SERIAL_BLOCK_BYTES];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(()), // EOF
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        let frames = parser.feed(&buf[..n], now_millis());
        if !frames.is_empty() {
            sink(frames);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
