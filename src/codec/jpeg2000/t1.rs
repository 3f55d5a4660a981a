//! Embedded block coding (tier-1).
//!
//! Each code-block is coded bitplane by bitplane with the significance,
//! refinement and cleanup passes, all into one MQ codeword terminated after
//! the last pass.

use super::mq::{MqEncoder, CTX_RUN, CTX_UNIFORM};
use super::Orientation;

const SIGNIFICANT: u8 = 1;
const NEGATIVE: u8 = 1 << 1;
const VISITED: u8 = 1 << 2;
const REFINED: u8 = 1 << 3;

const CTX_SIGN: usize = 9;
const CTX_REFINE: usize = 14;

/// Result of coding one code-block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockCode {
    /// Terminated MQ codeword.
    pub data: Vec<u8>,
    /// Number of coding passes in `data`.
    pub passes: u32,
    /// Number of magnitude bitplanes, 0 for an all-zero block.
    pub magnitude_bits: u32,
}

/// Code a block of quantized coefficients in row-major order.
pub fn encode_block(
    coefficients: &[i32],
    width: usize,
    height: usize,
    orientation: Orientation,
) -> BlockCode {
    let max = coefficients.iter().map(|c| c.unsigned_abs()).max().unwrap_or(0);
    let bits = u32::BITS - max.leading_zeros();
    if bits == 0 {
        return BlockCode::default();
    }

    let mut coder = BlockCoder::new(coefficients, width, height, orientation);
    for plane in (0..bits).rev() {
        if plane != bits - 1 {
            coder.significance_pass(plane);
            coder.refinement_pass(plane);
        }
        coder.cleanup_pass(plane);
    }

    BlockCode {
        data: coder.mq.finish(),
        passes: 3 * bits - 2,
        magnitude_bits: bits,
    }
}

struct BlockCoder {
    width: usize,
    height: usize,
    stride: usize,
    magnitudes: Vec<u32>,
    // Padded by one on each side so neighbor lookups never leave the block.
    flags: Vec<u8>,
    orientation: Orientation,
    mq: MqEncoder,
}

impl BlockCoder {
    fn new(coefficients: &[i32], width: usize, height: usize, orientation: Orientation) -> Self {
        let stride = width + 2;
        let mut flags = vec![0u8; stride * (height + 2)];
        for y in 0..height {
            for x in 0..width {
                if coefficients[y * width + x] < 0 {
                    flags[(y + 1) * stride + x + 1] |= NEGATIVE;
                }
            }
        }
        Self {
            width,
            height,
            stride,
            magnitudes: coefficients.iter().map(|c| c.unsigned_abs()).collect(),
            flags,
            orientation,
            mq: MqEncoder::new(),
        }
    }

    fn index(&self, x: usize, y: usize) -> usize {
        (y + 1) * self.stride + x + 1
    }

    fn bit(&self, x: usize, y: usize, plane: u32) -> u8 {
        ((self.magnitudes[y * self.width + x] >> plane) & 1) as u8
    }

    fn significant(&self, i: usize) -> u32 {
        (self.flags[i] & SIGNIFICANT) as u32
    }

    /// Significant (horizontal, vertical, diagonal) neighbor counts.
    fn neighbors(&self, i: usize) -> (u32, u32, u32) {
        let s = self.stride;
        let h = self.significant(i - 1) + self.significant(i + 1);
        let v = self.significant(i - s) + self.significant(i + s);
        let d = self.significant(i - s - 1)
            + self.significant(i - s + 1)
            + self.significant(i + s - 1)
            + self.significant(i + s + 1);
        (h, v, d)
    }

    fn zero_context(&self, i: usize) -> usize {
        let (h, v, d) = self.neighbors(i);
        match self.orientation {
            Orientation::LL | Orientation::LH => primary_context(h, v, d),
            Orientation::HL => primary_context(v, h, d),
            Orientation::HH => diagonal_context(h + v, d),
        }
    }

    fn sign_contribution(&self, i: usize) -> i32 {
        match self.flags[i] & (SIGNIFICANT | NEGATIVE) {
            SIGNIFICANT => 1,
            f if f == SIGNIFICANT | NEGATIVE => -1,
            _ => 0,
        }
    }

    fn code_sign(&mut self, i: usize) {
        let s = self.stride;
        let h = (self.sign_contribution(i - 1) + self.sign_contribution(i + 1)).clamp(-1, 1);
        let v = (self.sign_contribution(i - s) + self.sign_contribution(i + s)).clamp(-1, 1);
        let (ctx, flip) = match (h, v) {
            (1, 1) => (4, 0),
            (1, 0) => (3, 0),
            (1, -1) => (2, 0),
            (0, 1) => (1, 0),
            (0, 0) => (0, 0),
            (0, -1) => (1, 1),
            (-1, 1) => (2, 1),
            (-1, 0) => (3, 1),
            _ => (4, 1),
        };
        let negative = (self.flags[i] & NEGATIVE != 0) as u8;
        self.mq.encode(CTX_SIGN + ctx, negative ^ flip);
    }

    fn significance_pass(&mut self, plane: u32) {
        for stripe in (0..self.height).step_by(4) {
            for x in 0..self.width {
                for y in stripe..(stripe + 4).min(self.height) {
                    let i = self.index(x, y);
                    if self.flags[i] & SIGNIFICANT != 0 {
                        continue;
                    }
                    let ctx = self.zero_context(i);
                    if ctx == 0 {
                        continue;
                    }
                    let bit = self.bit(x, y, plane);
                    self.mq.encode(ctx, bit);
                    if bit == 1 {
                        self.code_sign(i);
                        self.flags[i] |= SIGNIFICANT;
                    }
                    self.flags[i] |= VISITED;
                }
            }
        }
    }

    fn refinement_pass(&mut self, plane: u32) {
        for stripe in (0..self.height).step_by(4) {
            for x in 0..self.width {
                for y in stripe..(stripe + 4).min(self.height) {
                    let i = self.index(x, y);
                    if self.flags[i] & (SIGNIFICANT | VISITED) != SIGNIFICANT {
                        continue;
                    }
                    let ctx = if self.flags[i] & REFINED != 0 {
                        CTX_REFINE + 2
                    } else {
                        let (h, v, d) = self.neighbors(i);
                        CTX_REFINE + (h + v + d > 0) as usize
                    };
                    let bit = self.bit(x, y, plane);
                    self.mq.encode(ctx, bit);
                    self.flags[i] |= REFINED;
                }
            }
        }
    }

    fn cleanup_pass(&mut self, plane: u32) {
        for stripe in (0..self.height).step_by(4) {
            let end = (stripe + 4).min(self.height);
            for x in 0..self.width {
                let mut start = stripe;

                if end - stripe == 4 && self.run_mode(x, stripe) {
                    let first_one = (0..4).find(|&k| self.bit(x, stripe + k, plane) == 1);
                    match first_one {
                        None => {
                            self.mq.encode(CTX_RUN, 0);
                            continue;
                        }
                        Some(k) => {
                            self.mq.encode(CTX_RUN, 1);
                            self.mq.encode(CTX_UNIFORM, (k >> 1) as u8);
                            self.mq.encode(CTX_UNIFORM, (k & 1) as u8);
                            let i = self.index(x, stripe + k);
                            self.code_sign(i);
                            self.flags[i] |= SIGNIFICANT;
                            start = stripe + k + 1;
                        }
                    }
                }

                for y in start..end {
                    let i = self.index(x, y);
                    if self.flags[i] & (SIGNIFICANT | VISITED) != 0 {
                        continue;
                    }
                    let ctx = self.zero_context(i);
                    let bit = self.bit(x, y, plane);
                    self.mq.encode(ctx, bit);
                    if bit == 1 {
                        self.code_sign(i);
                        self.flags[i] |= SIGNIFICANT;
                    }
                }
            }
        }

        for flag in self.flags.iter_mut() {
            *flag &= !VISITED;
        }
    }

    /// Whether a full stripe column qualifies for run-length coding.
    fn run_mode(&self, x: usize, stripe: usize) -> bool {
        (stripe..stripe + 4).all(|y| {
            let i = self.index(x, y);
            self.flags[i] & (SIGNIFICANT | VISITED) == 0 && self.zero_context(i) == 0
        })
    }
}

/// Zero-coding context with `h` as the primary direction.
fn primary_context(h: u32, v: u32, d: u32) -> usize {
    match (h, v, d) {
        (2, _, _) => 8,
        (1, v, _) if v >= 1 => 7,
        (1, 0, d) if d >= 1 => 6,
        (1, 0, 0) => 5,
        (0, 2, _) => 4,
        (0, 1, _) => 3,
        (0, 0, d) if d >= 2 => 2,
        (0, 0, 1) => 1,
        _ => 0,
    }
}

/// Zero-coding context for diagonal detail bands.
fn diagonal_context(hv: u32, d: u32) -> usize {
    match (d, hv) {
        (d, _) if d >= 3 => 8,
        (2, hv) if hv >= 1 => 7,
        (2, _) => 6,
        (1, hv) if hv >= 2 => 5,
        (1, 1) => 4,
        (1, _) => 3,
        (0, hv) if hv >= 2 => 2,
        (0, 1) => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_block_has_no_passes() {
        let code = encode_block(&[0; 16], 4, 4, Orientation::LL);
        assert_eq!(code.passes, 0);
        assert!(code.data.is_empty());
    }

    #[test]
    fn test_pass_count_follows_magnitude() {
        let mut coefficients = vec![0i32; 64];
        coefficients[9] = -13; // 4 bits
        coefficients[30] = 5;
        let code = encode_block(&coefficients, 8, 8, Orientation::HH);

        assert_eq!(code.magnitude_bits, 4);
        assert_eq!(code.passes, 10);
        assert!(!code.data.is_empty());
    }

    #[test]
    fn test_context_tables() {
        assert_eq!(primary_context(0, 0, 0), 0);
        assert_eq!(primary_context(0, 0, 3), 2);
        assert_eq!(primary_context(1, 0, 0), 5);
        assert_eq!(primary_context(1, 2, 4), 7);
        assert_eq!(primary_context(2, 0, 0), 8);
        assert_eq!(diagonal_context(0, 3), 8);
        assert_eq!(diagonal_context(1, 2), 7);
        assert_eq!(diagonal_context(0, 1), 3);
        assert_eq!(diagonal_context(2, 0), 2);
    }

    #[test]
    fn test_coding_is_deterministic() {
        let coefficients: Vec<i32> = (0..64 * 64).map(|i| (i * 7919 % 61) - 30).collect();
        let a = encode_block(&coefficients, 64, 64, Orientation::HL);
        let b = encode_block(&coefficients, 64, 64, Orientation::HL);
        assert_eq!(a, b);
        assert_eq!(a.magnitude_bits, 5);
    }
}
