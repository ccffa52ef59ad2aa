//! I/Q sample conversion — raw byte streams to phase and magnitude².
//!
//! Phase is represented as an unsigned 16-bit value: angle scaled by
//! 2^15/pi, wrapped mod 2^16. The demodulator only ever looks at wrap-safe
//! differences of these values, so absolute phase offsets don't matter.
//!
//! The 8-bit formats index a precomputed 65536-entry table directly with
//! the I/Q byte pair. CS16H goes through a 65536-entry arctangent table
//! keyed by |256·y/x| plus quadrant folding on unsigned wraparound; max
//! angular error is about 0.2 degrees. CF32H just calls libm.

use std::str::FromStr;
use std::sync::LazyLock;

use crate::types::UatError;

// ---------------------------------------------------------------------------
// Sample formats
// ---------------------------------------------------------------------------

/// Sample data layouts, all interleaved I then Q:
/// - `Cu8`   - 8-bit unsigned integers
/// - `Cs8`   - 8-bit signed integers
/// - `Cs16H` - 16-bit signed integers, host byte order
/// - `Cf32H` - 32-bit floats, host byte order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Cu8,
    Cs8,
    Cs16H,
    Cf32H,
}

impl SampleFormat {
    /// Number of bytes for one complex sample in this format.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::Cu8 | SampleFormat::Cs8 => 2,
            SampleFormat::Cs16H => 4,
            SampleFormat::Cf32H => 8,
        }
    }
}

impl FromStr for SampleFormat {
    type Err = UatError;

    fn from_str(s: &str) -> Result<SampleFormat, UatError> {
        match s {
            "CU8" => Ok(SampleFormat::Cu8),
            "CS8" => Ok(SampleFormat::Cs8),
            "CS16H" => Ok(SampleFormat::Cs16H),
            "CF32H" => Ok(SampleFormat::Cf32H),
            other => Err(UatError::UnknownFormat(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Angle scaling
// ---------------------------------------------------------------------------

fn scaled_atan2(y: f64, x: f64) -> u16 {
    let mut ang = y.atan2(x);
    if ang < 0.0 {
        // atan2 returns [-pi..pi], normalize to [0..2*pi]
        ang += 2.0 * std::f64::consts::PI;
    }
    let scaled = (32768.0 * ang / std::f64::consts::PI).round();
    scaled.clamp(0.0, 65535.0) as u16
}

fn scaled_atan(x: f64) -> u16 {
    let mut ang = x.atan();
    if ang < 0.0 {
        ang += 2.0 * std::f64::consts::PI;
    }
    let scaled = (32768.0 * ang / std::f64::consts::PI).round();
    scaled.clamp(0.0, 65535.0) as u16
}

#[inline(always)]
fn magsq(i: f64, q: f64) -> f64 {
    i * i + q * q
}

// ---------------------------------------------------------------------------
// Lookup tables
// ---------------------------------------------------------------------------

/// Index an 8-bit I/Q pair as the table key: low byte I, high byte Q.
#[inline(always)]
fn iq8_index(i: u8, q: u8) -> usize {
    (q as usize) << 8 | i as usize
}

/// CU8: phase for every I/Q byte pair. Zero point 127.5, scale 1/128.
static CU8_PHASE: LazyLock<Box<[u16]>> = LazyLock::new(|| {
    let mut lut = vec![0u16; 65536];
    for i in 0..256u32 {
        let d_i = (i as f64 - 127.5) / 128.0;
        for q in 0..256u32 {
            let d_q = (q as f64 - 127.5) / 128.0;
            lut[iq8_index(i as u8, q as u8)] = scaled_atan2(d_q, d_i);
        }
    }
    lut.into_boxed_slice()
});

/// CU8: magnitude² for every I/Q byte pair, in normalised units.
static CU8_MAGSQ: LazyLock<Box<[f64]>> = LazyLock::new(|| {
    let mut lut = vec![0f64; 65536];
    for i in 0..256u32 {
        let d_i = (i as f64 - 127.5) / 128.0;
        for q in 0..256u32 {
            let d_q = (q as f64 - 127.5) / 128.0;
            lut[iq8_index(i as u8, q as u8)] = magsq(d_i, d_q);
        }
    }
    lut.into_boxed_slice()
});

/// CS8: phase for every signed I/Q byte pair. Scale 1/128.
static CS8_PHASE: LazyLock<Box<[u16]>> = LazyLock::new(|| {
    let mut lut = vec![0u16; 65536];
    for i in -128..=127i32 {
        let d_i = i as f64 / 128.0;
        for q in -128..=127i32 {
            let d_q = q as f64 / 128.0;
            lut[iq8_index(i as u8, q as u8)] = scaled_atan2(d_q, d_i);
        }
    }
    lut.into_boxed_slice()
});

/// CS8: magnitude² for every signed I/Q byte pair.
static CS8_MAGSQ: LazyLock<Box<[f64]>> = LazyLock::new(|| {
    let mut lut = vec![0f64; 65536];
    for i in -128..=127i32 {
        let d_i = i as f64 / 128.0;
        for q in -128..=127i32 {
            let d_q = q as f64 / 128.0;
            lut[iq8_index(i as u8, q as u8)] = magsq(d_i, d_q);
        }
    }
    lut.into_boxed_slice()
});

/// CS16H: arctangent lookup, positive ratios only, 8-bit fixed point
/// covering 0.0 .. 256.0.
static CS16H_ATAN: LazyLock<Box<[u16]>> = LazyLock::new(|| {
    let mut lut = vec![0u16; 65536];
    for (i, entry) in lut.iter_mut().enumerate() {
        *entry = scaled_atan(i as f64 / 256.0);
    }
    lut.into_boxed_slice()
});

/// Caution: expects a non-negative ratio only.
#[inline(always)]
fn cs16h_table_atan(r: u32) -> u16 {
    let lut = &*CS16H_ATAN;
    if r as usize >= lut.len() {
        16384 // pi/2
    } else {
        lut[r as usize]
    }
}

/// atan2 via the atan lookup table, relying on unsigned 16-bit wraparound
/// so the four quadrants reduce to an add or subtract of pi.
#[inline]
fn cs16h_table_atan2(y: i16, x: i16) -> u16 {
    if x == 0 {
        return if y >= 0 {
            16384 // pi/2
        } else {
            49152 // 3/2 pi
        };
    }

    let r = (256 * y as i32) / x as i32;
    if x < 0 {
        if y < 0 {
            // x < 0, y < 0   => y/x > 0
            // atan2(y,x) = pi + atan(y/x)
            32768u16.wrapping_add(cs16h_table_atan(r as u32))
        } else {
            // x < 0, y >= 0  => y/x <= 0
            // atan2(y,x) = -pi + atan(y/x) = -pi - atan(-y/x)
            32768u16.wrapping_sub(cs16h_table_atan((-r) as u32))
        }
    } else if y < 0 {
        // x > 0, y < 0   => y/x < 0
        // atan2(y,x) = atan(y/x) = -atan(-y/x)
        0u16.wrapping_sub(cs16h_table_atan((-r) as u32))
    } else {
        // x > 0, y >= 0  => y/x >= 0
        cs16h_table_atan(r as u32)
    }
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Converts a raw I/Q byte stream to phase or magnitude² sequences.
///
/// A closed set of variants dispatched once per buffer; the per-sample
/// inner loops are monomorphic. Trailing partial samples are silently
/// discarded, not buffered.
#[derive(Debug, Clone, Copy)]
pub enum SampleConverter {
    Cu8,
    Cs8,
    Cs16H,
    Cf32H,
}

impl SampleConverter {
    pub fn new(format: SampleFormat) -> SampleConverter {
        match format {
            SampleFormat::Cu8 => SampleConverter::Cu8,
            SampleFormat::Cs8 => SampleConverter::Cs8,
            SampleFormat::Cs16H => SampleConverter::Cs16H,
            SampleFormat::Cf32H => SampleConverter::Cf32H,
        }
    }

    pub fn format(&self) -> SampleFormat {
        match self {
            SampleConverter::Cu8 => SampleFormat::Cu8,
            SampleConverter::Cs8 => SampleFormat::Cs8,
            SampleConverter::Cs16H => SampleFormat::Cs16H,
            SampleConverter::Cf32H => SampleFormat::Cf32H,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.format().bytes_per_sample()
    }

    /// Convert whole samples in `bytes`, appending one phase value per
    /// sample to `out`.
    pub fn convert_phase(&self, bytes: &[u8], out: &mut Vec<u16>) {
        match self {
            SampleConverter::Cu8 => {
                let lut = &*CU8_PHASE;
                out.extend(
                    bytes
                        .chunks_exact(2)
                        .map(|iq| lut[iq8_index(iq[0], iq[1])]),
                );
            }
            SampleConverter::Cs8 => {
                let lut = &*CS8_PHASE;
                out.extend(
                    bytes
                        .chunks_exact(2)
                        .map(|iq| lut[iq8_index(iq[0], iq[1])]),
                );
            }
            SampleConverter::Cs16H => {
                out.extend(bytes.chunks_exact(4).map(|iq| {
                    let i = i16::from_ne_bytes([iq[0], iq[1]]);
                    let q = i16::from_ne_bytes([iq[2], iq[3]]);
                    cs16h_table_atan2(q, i)
                }));
            }
            SampleConverter::Cf32H => {
                out.extend(bytes.chunks_exact(8).map(|iq| {
                    let i = f32::from_ne_bytes([iq[0], iq[1], iq[2], iq[3]]);
                    let q = f32::from_ne_bytes([iq[4], iq[5], iq[6], iq[7]]);
                    scaled_atan2(q as f64, i as f64)
                }));
            }
        }
    }

    /// Convert whole samples in `bytes`, appending one magnitude² value per
    /// sample to `out`.
    ///
    /// Units are normalised per format (8-bit formats scale by 1/128,
    /// CS16H by 1/32768, CF32H is taken as-is); magnitudes are only
    /// comparable within a single format.
    pub fn convert_magsq(&self, bytes: &[u8], out: &mut Vec<f64>) {
        match self {
            SampleConverter::Cu8 => {
                let lut = &*CU8_MAGSQ;
                out.extend(
                    bytes
                        .chunks_exact(2)
                        .map(|iq| lut[iq8_index(iq[0], iq[1])]),
                );
            }
            SampleConverter::Cs8 => {
                let lut = &*CS8_MAGSQ;
                out.extend(
                    bytes
                        .chunks_exact(2)
                        .map(|iq| lut[iq8_index(iq[0], iq[1])]),
                );
            }
            SampleConverter::Cs16H => {
                out.extend(bytes.chunks_exact(4).map(|iq| {
                    let i = i16::from_ne_bytes([iq[0], iq[1]]) as f64;
                    let q = i16::from_ne_bytes([iq[2], iq[3]]) as f64;
                    magsq(i, q) / 32768.0 / 32768.0
                }));
            }
            SampleConverter::Cf32H => {
                out.extend(bytes.chunks_exact(8).map(|iq| {
                    let i = f32::from_ne_bytes([iq[0], iq[1], iq[2], iq[3]]) as f64;
                    let q = f32::from_ne_bytes([iq[4], iq[5], iq[6], iq[7]]) as f64;
                    magsq(i, q)
                }));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::phase_difference;

    /// Reference phase for an angle in radians: round(32768·θ/π) mod 2^16.
    fn reference_phase(theta: f64) -> u16 {
        ((32768.0 * theta / std::f64::consts::PI).round() as i64).rem_euclid(65536) as u16
    }

    /// Wrap-aware distance between two phase values.
    fn phase_error(expected: u16, actual: u16) -> i32 {
        (phase_difference(expected, actual) as i32).abs()
    }

    fn angle_grid() -> impl Iterator<Item = f64> {
        (0..997).map(|k| k as f64 * 2.0 * std::f64::consts::PI / 997.0)
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("CU8".parse::<SampleFormat>().unwrap(), SampleFormat::Cu8);
        assert_eq!("CS8".parse::<SampleFormat>().unwrap(), SampleFormat::Cs8);
        assert_eq!(
            "CS16H".parse::<SampleFormat>().unwrap(),
            SampleFormat::Cs16H
        );
        assert_eq!(
            "CF32H".parse::<SampleFormat>().unwrap(),
            SampleFormat::Cf32H
        );
        assert!("CF32".parse::<SampleFormat>().is_err());
    }

    #[test]
    fn test_bytes_per_sample() {
        assert_eq!(SampleFormat::Cu8.bytes_per_sample(), 2);
        assert_eq!(SampleFormat::Cs8.bytes_per_sample(), 2);
        assert_eq!(SampleFormat::Cs16H.bytes_per_sample(), 4);
        assert_eq!(SampleFormat::Cf32H.bytes_per_sample(), 8);
    }

    #[test]
    fn test_cf32h_phase_roundtrip() {
        let conv = SampleConverter::new(SampleFormat::Cf32H);
        for theta in angle_grid() {
            let i = theta.cos() as f32;
            let q = theta.sin() as f32;
            let mut bytes = Vec::new();
            bytes.extend_from_slice(&i.to_ne_bytes());
            bytes.extend_from_slice(&q.to_ne_bytes());

            let mut out = Vec::new();
            conv.convert_phase(&bytes, &mut out);
            assert_eq!(out.len(), 1);
            assert!(
                phase_error(reference_phase(theta), out[0]) <= 1,
                "theta={theta} expected={} got={}",
                reference_phase(theta),
                out[0]
            );
        }
    }

    #[test]
    fn test_cu8_phase_matches_dequantized_atan2() {
        // The table is exact for the dequantized I/Q values; input
        // quantization is the only error source.
        let conv = SampleConverter::new(SampleFormat::Cu8);
        for theta in angle_grid() {
            let i = (theta.cos() * 127.0 + 127.5).round().clamp(0.0, 255.0) as u8;
            let q = (theta.sin() * 127.0 + 127.5).round().clamp(0.0, 255.0) as u8;

            let mut out = Vec::new();
            conv.convert_phase(&[i, q], &mut out);

            let d_i = (i as f64 - 127.5) / 128.0;
            let d_q = (q as f64 - 127.5) / 128.0;
            let expected = scaled_atan2(d_q, d_i);
            assert!(
                phase_error(expected, out[0]) <= 1,
                "theta={theta} expected={expected} got={}",
                out[0]
            );

            // and the dequantization error itself stays small
            assert!(phase_error(reference_phase(theta), out[0]) <= 96);
        }
    }

    #[test]
    fn test_cs8_phase_roundtrip() {
        let conv = SampleConverter::new(SampleFormat::Cs8);
        for theta in angle_grid() {
            let i = (theta.cos() * 127.0).round() as i8;
            let q = (theta.sin() * 127.0).round() as i8;

            let mut out = Vec::new();
            conv.convert_phase(&[i as u8, q as u8], &mut out);

            let expected = scaled_atan2(q as f64 / 128.0, i as f64 / 128.0);
            assert!(
                phase_error(expected, out[0]) <= 1,
                "theta={theta} expected={expected} got={}",
                out[0]
            );
        }
    }

    #[test]
    fn test_cs16h_phase_within_table_error() {
        let conv = SampleConverter::new(SampleFormat::Cs16H);
        for theta in angle_grid() {
            let i = (theta.cos() * 32000.0).round() as i16;
            let q = (theta.sin() * 32000.0).round() as i16;
            let mut bytes = Vec::new();
            bytes.extend_from_slice(&i.to_ne_bytes());
            bytes.extend_from_slice(&q.to_ne_bytes());

            let mut out = Vec::new();
            conv.convert_phase(&bytes, &mut out);
            // table error is bounded at 0.2 degrees, ~36 LSB
            assert!(
                phase_error(reference_phase(theta), out[0]) <= 256,
                "theta={theta} expected={} got={}",
                reference_phase(theta),
                out[0]
            );
        }
    }

    #[test]
    fn test_cs16h_axes() {
        // x == 0 is special-cased
        assert_eq!(cs16h_table_atan2(100, 0), 16384);
        assert_eq!(cs16h_table_atan2(-100, 0), 49152);
        assert_eq!(cs16h_table_atan2(0, 100), 0);
        assert_eq!(cs16h_table_atan2(0, -100), 32768);
    }

    #[test]
    fn test_cu8_magsq() {
        let conv = SampleConverter::new(SampleFormat::Cu8);
        let mut out = Vec::new();
        // (0,0) is the farthest corner: ((0-127.5)/128)² × 2
        conv.convert_magsq(&[0, 0, 127, 128], &mut out);
        let corner = (127.5f64 / 128.0).powi(2) * 2.0;
        assert!((out[0] - corner).abs() < 1e-9);
        // near the zero point the power is tiny
        assert!(out[1] < 0.0001);
    }

    #[test]
    fn test_unit_circle_magsq_all_formats() {
        let theta = 0.7f64;

        let conv = SampleConverter::new(SampleFormat::Cs8);
        let i = (theta.cos() * 127.0).round() as i8;
        let q = (theta.sin() * 127.0).round() as i8;
        let mut out = Vec::new();
        conv.convert_magsq(&[i as u8, q as u8], &mut out);
        assert!((out[0] - 1.0).abs() < 0.05);

        let conv = SampleConverter::new(SampleFormat::Cs16H);
        let i = (theta.cos() * 32767.0).round() as i16;
        let q = (theta.sin() * 32767.0).round() as i16;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&i.to_ne_bytes());
        bytes.extend_from_slice(&q.to_ne_bytes());
        out.clear();
        conv.convert_magsq(&bytes, &mut out);
        assert!((out[0] - 1.0).abs() < 0.01);

        let conv = SampleConverter::new(SampleFormat::Cf32H);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(theta.cos() as f32).to_ne_bytes());
        bytes.extend_from_slice(&(theta.sin() as f32).to_ne_bytes());
        out.clear();
        conv.convert_magsq(&bytes, &mut out);
        assert!((out[0] - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_trailing_partial_sample_discarded() {
        let conv = SampleConverter::new(SampleFormat::Cu8);
        let mut out = Vec::new();
        conv.convert_phase(&[1, 2, 3], &mut out); // 1.5 samples
        assert_eq!(out.len(), 1);

        let conv = SampleConverter::new(SampleFormat::Cs16H);
        out.clear();
        conv.convert_phase(&[0u8; 7], &mut out); // 1.75 samples
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_output_appended_not_replaced() {
        let conv = SampleConverter::new(SampleFormat::Cu8);
        let mut out = vec![42u16];
        conv.convert_phase(&[10, 20], &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], 42);
    }
}
