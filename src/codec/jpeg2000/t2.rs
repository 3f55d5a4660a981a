//! Packet construction (tier-2).

/// Packet header bit writer with 0xFF bit stuffing.
pub struct BitWriter {
    out: Vec<u8>,
    buf: u32,
    ct: u32,
}

impl BitWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            buf: 0,
            ct: 8,
        }
    }

    fn byte_out(&mut self) {
        self.buf = (self.buf << 8) & 0xFFFF;
        self.ct = if self.buf == 0xFF00 { 7 } else { 8 };
        self.out.push((self.buf >> 8) as u8);
    }

    /// Append one bit.
    pub fn put_bit(&mut self, bit: bool) {
        if self.ct == 0 {
            self.byte_out();
        }
        self.ct -= 1;
        self.buf |= (bit as u32) << self.ct;
    }

    /// Append the low `bits` bits of `value`, most significant first.
    pub fn write(&mut self, value: u32, bits: u32) {
        for i in (0..bits).rev() {
            self.put_bit((value >> i) & 1 == 1);
        }
    }

    /// Pad to a byte boundary and return the bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.byte_out();
        if self.ct == 7 {
            self.byte_out();
        }
        self.out
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct Node {
    value: u32,
    low: u32,
    known: bool,
    parent: Option<usize>,
}

/// Tag tree over a grid of code-blocks.
#[derive(Debug, Clone)]
pub struct TagTree {
    nodes: Vec<Node>,
}

impl TagTree {
    /// Build a tree over a `width` x `height` leaf grid with all values unset.
    pub fn new(width: usize, height: usize) -> Self {
        let mut dims = vec![(width.max(1), height.max(1))];
        while let Some(&(w, h)) = dims.last() {
            if w == 1 && h == 1 {
                break;
            }
            dims.push((w.div_ceil(2), h.div_ceil(2)));
        }

        let mut offsets = Vec::with_capacity(dims.len());
        let mut total = 0;
        for &(w, h) in &dims {
            offsets.push(total);
            total += w * h;
        }

        let mut nodes = Vec::with_capacity(total);
        for (level, &(w, h)) in dims.iter().enumerate() {
            for y in 0..h {
                for x in 0..w {
                    let parent = dims
                        .get(level + 1)
                        .map(|&(pw, _)| offsets[level + 1] + (y / 2) * pw + x / 2);
                    nodes.push(Node {
                        value: u32::MAX,
                        low: 0,
                        known: false,
                        parent,
                    });
                }
            }
        }
        Self { nodes }
    }

    /// Set a leaf value, lowering ancestors so each node holds its subtree minimum.
    pub fn set_value(&mut self, leaf: usize, value: u32) {
        let mut node = Some(leaf);
        while let Some(i) = node {
            if self.nodes[i].value <= value {
                break;
            }
            self.nodes[i].value = value;
            node = self.nodes[i].parent;
        }
    }

    /// Code whether the value of `leaf` is below `threshold`.
    pub fn encode(&mut self, writer: &mut BitWriter, leaf: usize, threshold: u32) {
        let mut path = Vec::new();
        let mut node = leaf;
        while let Some(parent) = self.nodes[node].parent {
            path.push(node);
            node = parent;
        }

        let mut low = 0;
        loop {
            let current = &mut self.nodes[node];
            if low > current.low {
                current.low = low;
            } else {
                low = current.low;
            }
            while low < threshold {
                if low >= current.value {
                    if !current.known {
                        writer.put_bit(true);
                        current.known = true;
                    }
                    break;
                }
                writer.put_bit(false);
                low += 1;
            }
            current.low = low;

            match path.pop() {
                Some(next) => node = next,
                None => break,
            }
        }
    }
}

/// One code-block's contribution to a packet.
#[derive(Debug, Clone, Copy)]
pub struct BlockContribution<'a> {
    /// Codeword bytes.
    pub data: &'a [u8],
    /// Coding passes in `data`; 0 excludes the block.
    pub passes: u32,
    /// Missing most significant bitplanes.
    pub zero_bitplanes: u32,
}

/// Code-blocks of one subband within a precinct, in raster order.
#[derive(Debug, Clone)]
pub struct PrecinctBand<'a> {
    /// Code-block columns.
    pub blocks_wide: usize,
    /// Code-block rows.
    pub blocks_high: usize,
    /// Contributions, `blocks_wide * blocks_high` of them.
    pub blocks: Vec<BlockContribution<'a>>,
}

const INITIAL_LENGTH_BITS: u32 = 3;

/// Append the single-layer packet for one precinct to `out`.
pub fn write_packet(bands: &[PrecinctBand<'_>], out: &mut Vec<u8>) {
    let mut header = BitWriter::new();
    let empty = bands
        .iter()
        .all(|band| band.blocks.iter().all(|block| block.passes == 0));
    if empty {
        header.put_bit(false);
        out.extend(header.finish());
        return;
    }
    header.put_bit(true);

    for band in bands {
        let mut inclusion = TagTree::new(band.blocks_wide, band.blocks_high);
        let mut zero_planes = TagTree::new(band.blocks_wide, band.blocks_high);
        for (leaf, block) in band.blocks.iter().enumerate() {
            if block.passes > 0 {
                inclusion.set_value(leaf, 0);
            }
            zero_planes.set_value(leaf, block.zero_bitplanes);
        }

        for (leaf, block) in band.blocks.iter().enumerate() {
            inclusion.encode(&mut header, leaf, 1);
            if block.passes == 0 {
                continue;
            }
            zero_planes.encode(&mut header, leaf, u32::MAX);
            write_pass_count(&mut header, block.passes);

            let length = block.data.len() as u32;
            let pass_bits = floor_log2(block.passes);
            let needed = floor_log2(length) + 1;
            let increment = needed.saturating_sub(INITIAL_LENGTH_BITS + pass_bits);
            for _ in 0..increment {
                header.put_bit(true);
            }
            header.put_bit(false);
            header.write(length, INITIAL_LENGTH_BITS + increment + pass_bits);
        }
    }

    out.extend(header.finish());
    for band in bands {
        for block in &band.blocks {
            out.extend_from_slice(block.data);
        }
    }
}

fn write_pass_count(writer: &mut BitWriter, passes: u32) {
    match passes {
        1 => writer.put_bit(false),
        2 => writer.write(0b10, 2),
        3..=5 => writer.write(0b1100 | (passes - 3), 4),
        6..=36 => writer.write(0x1E0 | (passes - 6), 9),
        _ => writer.write(0xFF80 | (passes - 37), 16),
    }
}

fn floor_log2(value: u32) -> u32 {
    u32::BITS - 1 - value.max(1).leading_zeros()
}
