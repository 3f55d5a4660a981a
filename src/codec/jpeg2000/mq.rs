//! MQ arithmetic encoder.

/// Number of coding contexts used by the block coder.
pub const CONTEXTS: usize = 19;
/// Run-length context.
pub const CTX_RUN: usize = 17;
/// Uniform context.
pub const CTX_UNIFORM: usize = 18;

/// Probability state: (Qe, next MPS state, next LPS state, switch MPS).
const STATES: [(u32, u8, u8, bool); 47] = [
    (0x5601, 1, 1, true),
    (0x3401, 2, 6, false),
    (0x1801, 3, 9, false),
    (0x0AC1, 4, 12, false),
    (0x0521, 5, 29, false),
    (0x0221, 38, 33, false),
    (0x5601, 7, 6, true),
    (0x5401, 8, 14, false),
    (0x4801, 9, 14, false),
    (0x3801, 10, 14, false),
    (0x3001, 11, 17, false),
    (0x2401, 12, 18, false),
    (0x1C01, 13, 20, false),
    (0x1601, 29, 21, false),
    (0x5601, 15, 14, true),
    (0x5401, 16, 14, false),
    (0x5101, 17, 15, false),
    (0x4801, 18, 16, false),
    (0x3801, 19, 17, false),
    (0x3401, 20, 18, false),
    (0x3001, 21, 19, false),
    (0x2801, 22, 19, false),
    (0x2401, 23, 20, false),
    (0x2201, 24, 21, false),
    (0x1C01, 25, 22, false),
    (0x1801, 26, 23, false),
    (0x1601, 27, 24, false),
    (0x1401, 28, 25, false),
    (0x1201, 29, 26, false),
    (0x1101, 30, 27, false),
    (0x0AC1, 31, 28, false),
    (0x09C1, 32, 29, false),
    (0x08A1, 33, 30, false),
    (0x0521, 34, 31, false),
    (0x0441, 35, 32, false),
    (0x02A1, 36, 33, false),
    (0x0221, 37, 34, false),
    (0x0141, 38, 35, false),
    (0x0111, 39, 36, false),
    (0x0085, 40, 37, false),
    (0x0049, 41, 38, false),
    (0x0025, 42, 39, false),
    (0x0015, 43, 40, false),
    (0x0009, 44, 41, false),
    (0x0005, 45, 42, false),
    (0x0001, 45, 43, false),
    (0x5601, 46, 46, false),
];

/// Binary arithmetic coder producing one terminated codeword.
pub struct MqEncoder {
    a: u32,
    c: u32,
    ct: u32,
    // out[0] is a placeholder for the byte before the codeword.
    out: Vec<u8>,
    state: [u8; CONTEXTS],
    mps: [u8; CONTEXTS],
}

impl MqEncoder {
    /// Create an encoder with contexts in their initial states.
    pub fn new() -> Self {
        let mut state = [0u8; CONTEXTS];
        state[0] = 4;
        state[CTX_RUN] = 3;
        state[CTX_UNIFORM] = 46;
        Self {
            a: 0x8000,
            c: 0,
            ct: 12,
            out: vec![0],
            state,
            mps: [0; CONTEXTS],
        }
    }

    /// Code one binary decision in context `ctx`.
    pub fn encode(&mut self, ctx: usize, bit: u8) {
        if bit == self.mps[ctx] {
            self.code_mps(ctx);
        } else {
            self.code_lps(ctx);
        }
    }

    fn code_mps(&mut self, ctx: usize) {
        let (qe, next_mps, _, _) = STATES[self.state[ctx] as usize];
        self.a -= qe;
        if self.a & 0x8000 == 0 {
            if self.a < qe {
                self.a = qe;
            } else {
                self.c += qe;
            }
            self.state[ctx] = next_mps;
            self.renormalize();
        } else {
            self.c += qe;
        }
    }

    fn code_lps(&mut self, ctx: usize) {
        let (qe, _, next_lps, switch) = STATES[self.state[ctx] as usize];
        self.a -= qe;
        if self.a < qe {
            self.c += qe;
        } else {
            self.a = qe;
        }
        if switch {
            self.mps[ctx] ^= 1;
        }
        self.state[ctx] = next_lps;
        self.renormalize();
    }

    fn renormalize(&mut self) {
        loop {
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.ct == 0 {
                self.byte_out();
            }
            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }

    fn byte_out(&mut self) {
        let last = self.out.len() - 1;
        if self.out[last] == 0xFF {
            self.emit_stuffed();
        } else if self.c & 0x800_0000 == 0 {
            self.emit();
        } else {
            self.out[last] = self.out[last].wrapping_add(1);
            if self.out[last] == 0xFF {
                self.c &= 0x7FF_FFFF;
                self.emit_stuffed();
            } else {
                self.emit();
            }
        }
    }

    // After 0xFF only 7 bits go into the next byte.
    fn emit_stuffed(&mut self) {
        self.out.push((self.c >> 20) as u8);
        self.c &= 0xF_FFFF;
        self.ct = 7;
    }

    fn emit(&mut self) {
        self.out.push((self.c >> 19) as u8);
        self.c &= 0x7_FFFF;
        self.ct = 8;
    }

    /// Terminate the codeword and return its bytes.
    pub fn finish(mut self) -> Vec<u8> {
        let upper = self.c + self.a;
        self.c |= 0xFFFF;
        if self.c >= upper {
            self.c -= 0x8000;
        }

        self.c <<= self.ct;
        self.byte_out();
        self.c <<= self.ct;
        self.byte_out();

        if self.out.last() == Some(&0xFF) {
            self.out.pop();
        }
        self.out.remove(0);
        self.out
    }
}

impl Default for MqEncoder {
    fn default() -> Self {
        Self::new()
    }
}
