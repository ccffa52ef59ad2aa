//! Phase-buffer demodulation — locate UAT frames and slice their bits.
//!
//! The sample rate is exactly twice the UAT bitrate, so each transmitted
//! bit covers two phase samples and the bit value is the sign of the
//! wrap-safe phase difference across the pair.
//!
//! Sync search keeps two rolling 36-bit registers fed from the two possible
//! sample alignments:
//!
//! ```text
//!   sample 1 - sample 0   -> sync0
//!   sample 2 - sample 1   -> sync1
//!   sample 3 - sample 2   -> sync0
//!   sample 4 - sample 3   -> sync1
//!   ...
//! ```
//!
//! When either register matches a sync word (up to 4 bit errors), the frame
//! is demodulated at both candidate sample alignments and the one whose FEC
//! pass corrects fewer errors wins.
//!
//! The scan stops a max-sized frame short of the end of the buffer; the
//! caller carries that tail into the next call so no frame is lost across
//! buffer boundaries and no state needs to survive between calls.

use crate::convert::{SampleConverter, SampleFormat};
use crate::fec::FecContext;
use crate::types::*;

/// Samples the caller must retain and prepend to the next batch.
pub const TRAILING_SAMPLES: usize = (SYNC_BITS + UPLINK_BITS) * 2;

// ---------------------------------------------------------------------------
// Sync word matching
// ---------------------------------------------------------------------------

/// True when `word` is within 4 bits of `expected`.
///
/// Short-circuited popcount: clearing the lowest set bit of the XOR up to
/// four times, bailing as soon as it hits zero.
#[inline(always)]
pub fn sync_word_match(word: u64, expected: u64) -> bool {
    let mut diff = word ^ expected;
    if diff == 0 {
        return true;
    }

    diff &= diff - 1; // clear lowest set bit
    if diff == 0 {
        return true; // 1 bit error
    }
    diff &= diff - 1;
    if diff == 0 {
        return true; // 2 bits
    }
    diff &= diff - 1;
    if diff == 0 {
        return true; // 3 bits
    }
    diff &= diff - 1;
    diff == 0 // 4 bits, or give up
}

// ---------------------------------------------------------------------------
// Bit slicing
// ---------------------------------------------------------------------------

/// Demodulate `bytes` bytes of payload starting at `start`, slicing each
/// bit against the given thresholds. A pair that clears `zero_slice` but
/// not `one_slice` marks its byte as an erasure; with both thresholds at
/// zero (the default centering) no erasures are produced.
fn demod_bits(
    phase: &[u16],
    start: usize,
    bytes: usize,
    zero_slice: i16,
    one_slice: i16,
) -> (Vec<u8>, Vec<usize>) {
    let mut result = Vec::with_capacity(bytes);
    let mut erasures = Vec::new();

    let mut p = start;
    for i in 0..bytes {
        let mut b = 0u8;
        let mut erasure = false;
        for bit in 0..8 {
            let d = phase_difference(phase[p + bit * 2], phase[p + bit * 2 + 1]);
            if d > one_slice {
                b |= 0x80 >> bit;
            } else if d > zero_slice {
                erasure = true;
            }
        }
        result.push(b);
        if erasure {
            erasures.push(i);
        }
        p += 16;
    }

    (result, erasures)
}

/// Re-check the sync word at `start` against `pattern` using a bit-slicing
/// threshold centered between the mean one-bit and zero-bit phase
/// differences. Returns whether the sync still matches (≤ 4 errors) and
/// the center value.
fn check_sync_word(phase: &[u16], start: usize, pattern: u64) -> (bool, i16) {
    let mut dphi_zero_total: i32 = 0;
    let mut zero_bits: i32 = 0;
    let mut dphi_one_total: i32 = 0;
    let mut one_bits: i32 = 0;

    // mean dphi for one and zero bits; their midpoint is the center
    for i in 0..SYNC_BITS {
        let dphi = phase_difference(phase[start + i * 2], phase[start + i * 2 + 1]) as i32;
        if pattern & (1 << (35 - i)) != 0 {
            one_bits += 1;
            dphi_one_total += dphi;
        } else {
            zero_bits += 1;
            dphi_zero_total += dphi;
        }
    }

    dphi_zero_total /= zero_bits;
    dphi_one_total /= one_bits;
    let center = ((dphi_one_total + dphi_zero_total) / 2) as i16;

    let mut error_bits = 0;
    for i in 0..SYNC_BITS {
        let dphi = phase_difference(phase[start + i * 2], phase[start + i * 2 + 1]);
        if pattern & (1 << (35 - i)) != 0 {
            if dphi < center {
                error_bits += 1;
            }
        } else if dphi > center {
            error_bits += 1;
        }
    }

    (error_bits <= 4, center)
}

// ---------------------------------------------------------------------------
// Demodulator
// ---------------------------------------------------------------------------

/// A frame recovered from a phase buffer, with its enclosing sample range
/// preserved so the caller can compute RSSI over the same samples.
#[derive(Debug, Clone)]
pub struct DemodFrame {
    /// FEC-corrected payload, parity stripped (18, 34 or 432 bytes).
    pub payload: Vec<u8>,
    /// Bytes corrected by FEC.
    pub errors: usize,
    /// First sample of the sync word.
    pub begin: usize,
    /// One past the last sample of the frame.
    pub end: usize,
}

/// Demodulator for 2.083 Msps phase buffers (2 samples per bit).
pub struct Demodulator {
    fec: FecContext,
    auto_center: bool,
}

impl Demodulator {
    pub fn new() -> Demodulator {
        Demodulator {
            fec: FecContext::new(),
            auto_center: false,
        }
    }

    /// Enable threshold auto-centering: the bit-slicing threshold is taken
    /// from the sync word instead of assuming symmetric deviation.
    pub fn with_auto_center(auto_center: bool) -> Demodulator {
        Demodulator {
            fec: FecContext::new(),
            auto_center,
        }
    }

    /// Samples the caller must carry over between calls so a frame starting
    /// near the end of one buffer is found in the next.
    pub fn trailing_samples(&self) -> usize {
        TRAILING_SAMPLES
    }

    /// Scan a phase buffer and demodulate every frame found. Frames whose
    /// body would extend into the trailing reserve are left for the next
    /// call.
    pub fn demodulate(&self, phase: &[u16]) -> Vec<DemodFrame> {
        let mut messages = Vec::new();

        if phase.len() < TRAILING_SAMPLES {
            return messages;
        }
        let limit = phase.len() - TRAILING_SAMPLES;

        const SYNC_MASK: u64 = (1u64 << SYNC_BITS) - 1;
        let mut sync_bits = 0usize;
        let mut sync0: u64 = 0;
        let mut sync1: u64 = 0;

        let mut probe = 0usize;
        while probe < limit {
            let d0 = phase_difference(phase[probe], phase[probe + 1]);
            let d1 = phase_difference(phase[probe + 1], phase[probe + 2]);

            sync0 = ((sync0 << 1) | (d0 > 0) as u64) & SYNC_MASK;
            sync1 = ((sync1 << 1) | (d1 > 0) as u64) & SYNC_MASK;

            sync_bits += 1;
            if sync_bits < SYNC_BITS {
                probe += 2;
                continue; // registers not fully populated yet
            }

            // A match tells us which sample the frame starts at; demodulate
            // both candidate alignments there and keep the better one.
            let mut message = None;
            if sync_word_match(sync0, DOWNLINK_SYNC_WORD) {
                message = self.demod_best(phase, probe + 2 - SYNC_BITS * 2, true);
            }
            if message.is_none() && sync_word_match(sync1, DOWNLINK_SYNC_WORD) {
                message = self.demod_best(phase, probe + 3 - SYNC_BITS * 2, true);
            }
            if message.is_none() && sync_word_match(sync0, UPLINK_SYNC_WORD) {
                message = self.demod_best(phase, probe + 2 - SYNC_BITS * 2, false);
            }
            if message.is_none() && sync_word_match(sync1, UPLINK_SYNC_WORD) {
                message = self.demod_best(phase, probe + 3 - SYNC_BITS * 2, false);
            }

            if let Some(m) = message {
                probe = m.end;
                sync_bits = 0;
                messages.push(m);
            } else {
                probe += 2;
            }
        }

        messages
    }

    /// Demodulate at `start` and `start + 1`; keep whichever alignment the
    /// FEC pass likes better.
    fn demod_best(&self, phase: &[u16], start: usize, downlink: bool) -> Option<DemodFrame> {
        let message0 = if downlink {
            self.demod_one_downlink(phase, start)
        } else {
            self.demod_one_uplink(phase, start)
        };
        let message1 = if downlink {
            self.demod_one_downlink(phase, start + 1)
        } else {
            self.demod_one_uplink(phase, start + 1)
        };

        match (message0, message1) {
            (None, None) => None,
            (Some(m0), None) => Some(m0),
            (None, Some(m1)) => Some(m1),
            (Some(m0), Some(m1)) => Some(if m0.errors <= m1.errors { m0 } else { m1 }),
        }
    }

    fn demod_one_downlink(&self, phase: &[u16], start: usize) -> Option<DemodFrame> {
        let (zero_slice, one_slice) = if self.auto_center {
            let (ok, center) = check_sync_word(phase, start, DOWNLINK_SYNC_WORD);
            if !ok {
                return None;
            }
            (center, center)
        } else {
            (0, 0)
        };

        let (raw, erasures) = demod_bits(
            phase,
            start + SYNC_BITS * 2,
            DOWNLINK_LONG_BYTES,
            zero_slice,
            one_slice,
        );
        let (corrected, errors) = self.fec.correct_downlink(&raw, &erasures)?;

        let bits = if corrected.len() == DOWNLINK_LONG_DATA_BYTES {
            DOWNLINK_LONG_BITS
        } else {
            DOWNLINK_SHORT_BITS
        };
        Some(DemodFrame {
            payload: corrected,
            errors,
            begin: start,
            end: start + (SYNC_BITS + bits) * 2,
        })
    }

    fn demod_one_uplink(&self, phase: &[u16], start: usize) -> Option<DemodFrame> {
        let (zero_slice, one_slice) = if self.auto_center {
            let (ok, center) = check_sync_word(phase, start, UPLINK_SYNC_WORD);
            if !ok {
                return None;
            }
            (center, center)
        } else {
            (0, 0)
        };

        let (raw, erasures) = demod_bits(
            phase,
            start + SYNC_BITS * 2,
            UPLINK_BYTES,
            zero_slice,
            one_slice,
        );
        let (corrected, errors) = self.fec.correct_uplink(&raw, &erasures)?;

        Some(DemodFrame {
            payload: corrected,
            errors,
            begin: start,
            end: start + (SYNC_BITS + UPLINK_BITS) * 2,
        })
    }
}

impl Default for Demodulator {
    fn default() -> Self {
        Demodulator::new()
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// Single-threaded receive chain: raw sample bytes in, corrected frames
/// out.
///
/// Owns the sample carry buffer: the trailing reserve of each batch is kept
/// at the front of the buffer and fresh samples are appended after it, so
/// frames spanning batch boundaries are decoded exactly once.
pub struct Receiver {
    converter: SampleConverter,
    demodulator: Demodulator,
    samples: Vec<u8>,
    saved_samples: usize,
    phase: Vec<u16>,
}

impl Receiver {
    pub fn new(format: SampleFormat) -> Receiver {
        Receiver {
            converter: SampleConverter::new(format),
            demodulator: Demodulator::new(),
            samples: Vec::new(),
            saved_samples: 0,
            phase: Vec::new(),
        }
    }

    pub fn format(&self) -> SampleFormat {
        self.converter.format()
    }

    /// Process one batch of raw sample bytes stamped with the wall-clock
    /// time (ms since epoch) of its first sample. Returns the frames
    /// decoded from this batch in receive order.
    pub fn handle_samples(&mut self, timestamp: u64, buffer: &[u8]) -> Vec<RawFrame> {
        let bps = self.converter.bytes_per_sample();
        let previous_samples = self.saved_samples;

        // append whole samples after the carried tail; a trailing partial
        // sample is discarded
        let whole_bytes = buffer.len() - buffer.len() % bps;
        self.samples.truncate(previous_samples * bps);
        self.samples.extend_from_slice(&buffer[..whole_bytes]);
        let total_samples = self.samples.len() / bps;

        self.phase.clear();
        self.converter.convert_phase(&self.samples, &mut self.phase);

        let messages = self.demodulator.demodulate(&self.phase);

        let mut frames = Vec::with_capacity(messages.len());
        let mut magsq = Vec::new();
        for m in messages {
            magsq.clear();
            self.converter
                .convert_magsq(&self.samples[m.begin * bps..m.end * bps], &mut magsq);

            let total_power: f64 = magsq.iter().sum();
            let rssi = if total_power == 0.0 {
                -1000.0
            } else {
                10.0 * (total_power / magsq.len() as f64).log10()
            };

            // back-date to the frame's first sample; carried samples belong
            // to the previous batch's clock
            let received_at = (timestamp as i64
                - 1000 * previous_samples as i64 / SAMPLE_RATE as i64
                + 1000 * m.begin as i64 / SAMPLE_RATE as i64)
                .max(0) as u64;

            frames.push(RawFrame::new(m.payload, received_at, m.errors, rssi as f32));
        }

        // preserve the tail of the sample buffer for next time
        let tail = self.demodulator.trailing_samples();
        if total_samples > tail {
            let keep_from = (total_samples - tail) * bps;
            self.samples.copy_within(keep_from.., 0);
            self.samples.truncate(tail * bps);
            self.saved_samples = tail;
        } else {
            self.saved_samples = total_samples;
        }

        frames
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
