//! Reed-Solomon forward error correction for UAT frames.
//!
//! Three shortened RS codes over GF(2^8), all built on generator polynomial
//! 0x187 with first consecutive root 120 and primitive element 1:
//!
//! - downlink short: RS(30,18), 12 parity bytes, pad 225
//! - downlink long:  RS(48,34), 14 parity bytes, pad 207
//! - uplink block:   RS(92,72), 20 parity bytes, pad 163
//!
//! The codec control block (log/antilog tables, generator polynomial) is
//! computed once at construction and never mutated during decode, so a
//! [`FecContext`] can be shared by reference across receivers.
//!
//! Decoding is errors-and-erasures Berlekamp-Massey followed by Chien
//! search and Forney. On any failure the input buffer is left exactly as it
//! was passed in; the downlink driver depends on this when it retries a
//! failed long decode as a short frame.

use crate::types::*;

// ---------------------------------------------------------------------------
// Codec parameters
// ---------------------------------------------------------------------------

/// Field generator polynomial for all three UAT codes.
pub const GF_POLY: u32 = 0x187;
/// First consecutive root, index form.
pub const FCR: usize = 120;
/// Primitive element, index form.
pub const PRIM: usize = 1;

pub const DOWNLINK_SHORT_ROOTS: usize = 12;
pub const DOWNLINK_LONG_ROOTS: usize = 14;
pub const UPLINK_BLOCK_ROOTS: usize = 20;

pub const DOWNLINK_SHORT_PAD: usize = 255 - DOWNLINK_SHORT_BYTES;
pub const DOWNLINK_LONG_PAD: usize = 255 - DOWNLINK_LONG_BYTES;
pub const UPLINK_BLOCK_PAD: usize = 255 - UPLINK_BLOCK_BYTES;

/// Symbols per unshortened block for an 8-bit symbol field.
const NN: usize = 255;
/// Bits per symbol.
const MM: usize = 8;
/// Sentinel log value for the zero symbol.
const A0: usize = NN;

/// Why a block failed to decode. Callers normally only care that it failed;
/// the demodulator treats any failure as "decline to emit".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsError {
    /// Nonzero syndromes but an empty error locator.
    DegLambdaZero,
    /// Locator degree does not match the number of roots found.
    DegLambdaNeqCount,
    /// A computed error position lies inside the implicit shortening pad.
    ImpossibleErrorPosition,
    /// Forney denominator vanished.
    ZeroDenominator,
    /// Corrections did not produce a valid codeword.
    NotACodeword,
}

// ---------------------------------------------------------------------------
// Reed-Solomon codec
// ---------------------------------------------------------------------------

/// A single shortened RS(255 - pad, 255 - pad - nroots) code over GF(2^8).
///
/// Erasure positions given to [`decode`](Self::decode) are expressed in the
/// conceptual unshortened 255-symbol block, i.e. data index + pad.
pub struct ReedSolomon {
    /// Antilog table: alpha_to[i] = alpha^i.
    alpha_to: [u8; NN + 1],
    /// Log table; index_of[0] is the A0 sentinel.
    index_of: [usize; NN + 1],
    /// Generator polynomial in index form, nroots + 1 coefficients.
    genpoly: Vec<usize>,
    fcr: usize,
    prim: usize,
    /// prim-th root of 1, index form.
    iprim: usize,
    nroots: usize,
    pad: usize,
}

impl ReedSolomon {
    pub fn new(gfpoly: u32, fcr: usize, prim: usize, nroots: usize, pad: usize) -> ReedSolomon {
        assert!(fcr < NN);
        assert!(prim > 0 && prim < NN);
        assert!(nroots < NN);
        assert!(pad < NN - nroots);

        let mut alpha_to = [0u8; NN + 1];
        let mut index_of = [0usize; NN + 1];

        index_of[0] = A0;
        alpha_to[A0] = 0;
        let mut sr: u32 = 1;
        for i in 0..NN {
            index_of[sr as usize] = i;
            alpha_to[i] = sr as u8;
            sr <<= 1;
            if sr & (1 << MM) != 0 {
                sr ^= gfpoly;
            }
            sr &= NN as u32;
        }
        // field generator polynomial must be primitive
        assert_eq!(sr, 1, "field generator polynomial is not primitive");

        // prim-th root of 1 for decoding
        let mut iprim = 1;
        while iprim % prim != 0 {
            iprim += NN;
        }
        let iprim = iprim / prim;

        let mut rs = ReedSolomon {
            alpha_to,
            index_of,
            genpoly: vec![0; nroots + 1],
            fcr,
            prim,
            iprim,
            nroots,
            pad,
        };

        // build the generator polynomial in poly form
        let mut gp = vec![0usize; nroots + 1];
        gp[0] = 1;
        let mut root = fcr * prim;
        for i in 0..nroots {
            gp[i + 1] = 1;
            // multiply by (x + alpha^root)
            for j in (1..=i).rev() {
                if gp[j] != 0 {
                    gp[j] = gp[j - 1] ^ rs.alpha_to[rs.modnn(rs.index_of[gp[j]] + root)] as usize;
                } else {
                    gp[j] = gp[j - 1];
                }
            }
            gp[0] = rs.alpha_to[rs.modnn(rs.index_of[gp[0]] + root)] as usize;
            root += prim;
        }
        // store in index form for faster encoding
        for g in gp.iter_mut() {
            *g = rs.index_of[*g];
        }
        rs.genpoly = gp;
        rs
    }

    /// Length of a shortened block (data + parity).
    pub fn block_len(&self) -> usize {
        NN - self.pad
    }

    /// Data bytes per shortened block.
    pub fn data_len(&self) -> usize {
        NN - self.pad - self.nroots
    }

    pub fn nroots(&self) -> usize {
        self.nroots
    }

    pub fn pad(&self) -> usize {
        self.pad
    }

    #[inline(always)]
    fn modnn(&self, mut x: usize) -> usize {
        while x >= NN {
            x -= NN;
            x = (x >> MM) + (x & NN);
        }
        x
    }

    /// Compute the parity of `data` (which must be `data_len` bytes long)
    /// into `parity` (`nroots` bytes). Used for test synthesis; UAT
    /// reception never encodes.
    pub fn encode(&self, data: &[u8], parity: &mut [u8]) {
        assert_eq!(data.len(), self.data_len());
        assert_eq!(parity.len(), self.nroots);

        parity.fill(0);
        for &d in data {
            let feedback = self.index_of[(d ^ parity[0]) as usize];
            if feedback != A0 {
                for j in 1..self.nroots {
                    parity[j] ^=
                        self.alpha_to[self.modnn(feedback + self.genpoly[self.nroots - j])];
                }
            }
            parity.copy_within(1.., 0);
            parity[self.nroots - 1] = if feedback != A0 {
                self.alpha_to[self.modnn(feedback + self.genpoly[0])]
            } else {
                0
            };
        }
    }

    /// Encode in place: `block` holds `data_len` data bytes followed by
    /// `nroots` bytes that will be overwritten with parity.
    pub fn encode_block(&self, block: &mut [u8]) {
        assert_eq!(block.len(), self.block_len());
        let (data, parity) = block.split_at_mut(self.data_len());
        // parity is computed from a copy so the borrow split is enough
        let mut p = vec![0u8; self.nroots];
        self.encode(data, &mut p);
        parity.copy_from_slice(&p);
    }

    fn syndromes(&self, data: &[u8], syn: &mut [usize]) -> bool {
        for s in syn.iter_mut() {
            *s = data[0] as usize;
        }
        for &d in &data[1..] {
            for (i, s) in syn.iter_mut().enumerate() {
                if *s == 0 {
                    *s = d as usize;
                } else {
                    *s = d as usize
                        ^ self.alpha_to[self.modnn(self.index_of[*s] + (self.fcr + i) * self.prim)]
                            as usize;
                }
            }
        }
        syn.iter().any(|&s| s != 0)
    }

    /// Correct `data` (a full shortened block) in place.
    ///
    /// `erasures` holds up to `nroots` positions in the unshortened block
    /// (data index + pad) whose symbols are unreliable; the caller zeroes
    /// them beforehand if it wants classic erasure behaviour.
    ///
    /// Returns the number of corrected symbols. On `Err` the buffer is
    /// guaranteed to be unmodified.
    pub fn decode(&self, data: &mut [u8], erasures: &[usize]) -> std::result::Result<usize, RsError> {
        assert_eq!(data.len(), self.block_len());
        assert!(erasures.len() <= self.nroots);

        let nroots = self.nroots;
        let no_eras = erasures.len();

        // form the syndromes and convert to index form
        let mut syn = vec![0usize; nroots];
        if !self.syndromes(data, &mut syn) {
            return Ok(0); // codeword as received
        }
        for s in syn.iter_mut() {
            *s = self.index_of[*s];
        }

        // init lambda to the erasure locator polynomial
        let mut lambda = vec![0usize; nroots + 1];
        lambda[0] = 1;
        if no_eras > 0 {
            lambda[1] = self.alpha_to[self.modnn(self.prim * (NN - 1 - erasures[0]))] as usize;
            for i in 1..no_eras {
                let u = self.modnn(self.prim * (NN - 1 - erasures[i]));
                for j in (1..=i + 1).rev() {
                    let tmp = self.index_of[lambda[j - 1]];
                    if tmp != A0 {
                        lambda[j] ^= self.alpha_to[self.modnn(u + tmp)] as usize;
                    }
                }
            }
        }

        let mut b: Vec<usize> = lambda.iter().map(|&l| self.index_of[l]).collect();
        let mut t = vec![0usize; nroots + 1];

        // Berlekamp-Massey over the remaining (error) capacity
        let mut r = no_eras;
        let mut el = no_eras;
        while r < nroots {
            r += 1;
            // discrepancy at step r, poly form
            let mut discr = 0usize;
            for i in 0..r {
                if lambda[i] != 0 && syn[r - i - 1] != A0 {
                    discr ^=
                        self.alpha_to[self.modnn(self.index_of[lambda[i]] + syn[r - i - 1])]
                            as usize;
                }
            }
            let discr = self.index_of[discr];
            if discr == A0 {
                // B(x) <- x*B(x)
                for j in (1..=nroots).rev() {
                    b[j] = b[j - 1];
                }
                b[0] = A0;
            } else {
                // T(x) <- lambda(x) - discr*x*B(x)
                t[0] = lambda[0];
                for i in 0..nroots {
                    t[i + 1] = if b[i] != A0 {
                        lambda[i + 1] ^ self.alpha_to[self.modnn(discr + b[i])] as usize
                    } else {
                        lambda[i + 1]
                    };
                }
                if 2 * el <= r + no_eras - 1 {
                    el = r + no_eras - el;
                    // B(x) <- inv(discr) * lambda(x)
                    for i in 0..=nroots {
                        b[i] = if lambda[i] == 0 {
                            A0
                        } else {
                            self.modnn(self.index_of[lambda[i]] + NN - discr)
                        };
                    }
                } else {
                    // B(x) <- x*B(x)
                    for j in (1..=nroots).rev() {
                        b[j] = b[j - 1];
                    }
                    b[0] = A0;
                }
                lambda.copy_from_slice(&t);
            }
        }

        // lambda to index form; compute its degree
        let mut deg_lambda = 0;
        for (i, l) in lambda.iter_mut().enumerate() {
            *l = self.index_of[*l];
            if *l != A0 {
                deg_lambda = i;
            }
        }
        if deg_lambda == 0 {
            return Err(RsError::DegLambdaZero);
        }

        // Chien search for the roots of lambda
        let mut reg = vec![A0; nroots + 1];
        reg[1..].copy_from_slice(&lambda[1..]);
        let mut root = Vec::with_capacity(nroots);
        let mut loc = Vec::with_capacity(nroots);
        let mut k = self.iprim - 1;
        for i in 1..=NN {
            let mut q = 1usize; // lambda[0] is always 1
            for j in (1..=deg_lambda).rev() {
                if reg[j] != A0 {
                    reg[j] = self.modnn(reg[j] + j);
                    q ^= self.alpha_to[reg[j]] as usize;
                }
            }
            if q == 0 {
                root.push(i);
                loc.push(k);
                if root.len() == deg_lambda {
                    break;
                }
            }
            k = self.modnn(k + self.iprim);
        }
        if root.len() != deg_lambda {
            // deg(lambda) != number of roots: uncorrectable
            return Err(RsError::DegLambdaNeqCount);
        }

        // evaluator omega(x) = s(x)*lambda(x) mod x^nroots, index form
        let deg_omega = deg_lambda - 1;
        let mut omega = vec![A0; nroots + 1];
        for i in 0..=deg_omega {
            let mut tmp = 0usize;
            for j in (0..=i).rev() {
                if syn[i - j] != A0 && lambda[j] != A0 {
                    tmp ^= self.alpha_to[self.modnn(syn[i - j] + lambda[j])] as usize;
                }
            }
            omega[i] = self.index_of[tmp];
        }

        // Forney: error values at each root, collected before application
        let mut corrections: Vec<(usize, u8)> = Vec::with_capacity(root.len());
        for j in (0..root.len()).rev() {
            let mut num1 = 0usize;
            for i in (0..=deg_omega).rev() {
                if omega[i] != A0 {
                    num1 ^= self.alpha_to[self.modnn(omega[i] + i * root[j])] as usize;
                }
            }
            let num2 = self.alpha_to[self.modnn(root[j] * (self.fcr + NN - 1) + NN)] as usize;
            let mut den = 0usize;
            // lambda[i+1] for even i is the formal derivative of lambda
            let mut i = deg_lambda.min(nroots - 1) & !1;
            loop {
                if lambda[i + 1] != A0 {
                    den ^= self.alpha_to[self.modnn(lambda[i + 1] + i * root[j])] as usize;
                }
                if i < 2 {
                    break;
                }
                i -= 2;
            }
            if den == 0 {
                return Err(RsError::ZeroDenominator);
            }
            if num1 != 0 {
                if loc[j] < self.pad {
                    // error inside the implicit zero padding
                    return Err(RsError::ImpossibleErrorPosition);
                }
                let val = self.alpha_to[self.modnn(
                    self.index_of[num1] + self.index_of[num2] + NN - self.index_of[den],
                )];
                corrections.push((loc[j] - self.pad, val));
            }
        }

        // apply, then verify we actually landed on a codeword
        for &(pos, val) in &corrections {
            data[pos] ^= val;
        }
        let mut recheck = vec![0usize; nroots];
        if self.syndromes(data, &mut recheck) {
            for &(pos, val) in &corrections {
                data[pos] ^= val;
            }
            return Err(RsError::NotACodeword);
        }

        Ok(root.len())
    }
}

// ---------------------------------------------------------------------------
// UAT frame correction
// ---------------------------------------------------------------------------

/// The three RS codec instances used by UAT, built once and shared
/// immutably.
pub struct FecContext {
    downlink_short: ReedSolomon,
    downlink_long: ReedSolomon,
    uplink_block: ReedSolomon,
}

impl FecContext {
    pub fn new() -> FecContext {
        FecContext {
            downlink_short: ReedSolomon::new(
                GF_POLY,
                FCR,
                PRIM,
                DOWNLINK_SHORT_ROOTS,
                DOWNLINK_SHORT_PAD,
            ),
            downlink_long: ReedSolomon::new(
                GF_POLY,
                FCR,
                PRIM,
                DOWNLINK_LONG_ROOTS,
                DOWNLINK_LONG_PAD,
            ),
            uplink_block: ReedSolomon::new(
                GF_POLY,
                FCR,
                PRIM,
                UPLINK_BLOCK_ROOTS,
                UPLINK_BLOCK_PAD,
            ),
        }
    }

    pub fn downlink_short(&self) -> &ReedSolomon {
        &self.downlink_short
    }

    pub fn downlink_long(&self) -> &ReedSolomon {
        &self.downlink_long
    }

    pub fn uplink_block(&self) -> &ReedSolomon {
        &self.uplink_block
    }

    /// Correct `DOWNLINK_LONG_BYTES` of demodulated data.
    ///
    /// Tries the long code first; a long frame is only accepted when its
    /// payload type is nonzero. Otherwise retries the head of the buffer as
    /// a short frame, which must carry payload type zero. Returns the
    /// corrected payload with parity stripped (34 or 18 bytes) and the
    /// number of corrected bytes, or `None` if uncorrectable.
    pub fn correct_downlink(&self, raw: &[u8], erasures: &[usize]) -> Option<(Vec<u8>, usize)> {
        assert_eq!(raw.len(), DOWNLINK_LONG_BYTES);

        if erasures.len() > DOWNLINK_LONG_ROOTS {
            return None;
        }

        let mut corrected = raw.to_vec();
        let mut long_erasures = Vec::with_capacity(erasures.len());
        for &e in erasures {
            corrected[e] = 0;
            long_erasures.push(e + DOWNLINK_LONG_PAD);
        }

        if let Ok(n) = self.downlink_long.decode(&mut corrected, &long_erasures) {
            if n <= DOWNLINK_LONG_ROOTS && corrected[0] >> 3 != 0 {
                corrected.truncate(DOWNLINK_LONG_DATA_BYTES);
                return Some((corrected, n));
            }
        }

        // Retry as a short frame. The long decode left `corrected`
        // untouched on failure, so the erasure zeroing is still in place.
        // Only erasures inside the short block length still apply.
        let mut short_erasures = Vec::new();
        for &e in erasures {
            if e < DOWNLINK_SHORT_DATA_BYTES {
                short_erasures.push(e + DOWNLINK_SHORT_PAD);
            }
        }
        if short_erasures.len() > DOWNLINK_SHORT_ROOTS {
            return None;
        }

        let short_block = &mut corrected[..DOWNLINK_SHORT_BYTES];
        if let Ok(n) = self.downlink_short.decode(short_block, &short_erasures) {
            if n <= DOWNLINK_SHORT_ROOTS && short_block[0] >> 3 == 0 {
                corrected.truncate(DOWNLINK_SHORT_DATA_BYTES);
                return Some((corrected, n));
            }
        }

        None
    }

    /// Correct `UPLINK_BYTES` of demodulated data.
    ///
    /// Uplink frames are six RS blocks interleaved at byte granularity.
    /// Each block is deinterleaved and corrected independently; the frame
    /// fails if any block is uncorrectable. Returns the concatenated data
    /// sections (432 bytes) and the total number of corrected bytes.
    pub fn correct_uplink(&self, raw: &[u8], erasures: &[usize]) -> Option<(Vec<u8>, usize)> {
        assert_eq!(raw.len(), UPLINK_BYTES);

        let mut total_errors = 0;
        let mut corrected = Vec::with_capacity(UPLINK_DATA_BYTES);
        let mut blockdata = [0u8; UPLINK_BLOCK_BYTES];

        for block in 0..UPLINK_BLOCKS_PER_FRAME {
            for (i, b) in blockdata.iter_mut().enumerate() {
                *b = raw[i * UPLINK_BLOCKS_PER_FRAME + block];
            }

            let mut block_erasures = Vec::new();
            for &index in erasures {
                if index % UPLINK_BLOCKS_PER_FRAME == block {
                    block_erasures.push(index / UPLINK_BLOCKS_PER_FRAME + UPLINK_BLOCK_PAD);
                }
            }
            if block_erasures.len() > UPLINK_BLOCK_ROOTS {
                return None;
            }

            match self.uplink_block.decode(&mut blockdata, &block_erasures) {
                Ok(n) if n <= UPLINK_BLOCK_ROOTS => total_errors += n,
                _ => return None,
            }

            corrected.extend_from_slice(&blockdata[..UPLINK_BLOCK_DATA_BYTES]);
        }

        Some((corrected, total_errors))
    }
}

impl Default for FecContext {
    fn default() -> Self {
        FecContext::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
