//! Encapsulated multi-frame pixel data.
//!
//! One stream per pyramid level: a Basic Offset Table item followed by one
//! item per frame and a sequence delimitation item. Offsets are measured
//! from the first byte of the first frame item, so entry `i` is the sum of
//! the encoded sizes (8-byte item header plus even-padded payload) of the
//! frames before it (PS3.5 Annex A.4).

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::{DicomizeError, Result};
use crate::pipeline::EncodedTileRecord;

/// Item tag (FFFE,E000).
const ITEM_TAG: (u16, u16) = (0xFFFE, 0xE000);
/// Sequence delimitation item tag (FFFE,E0DD).
const SEQUENCE_DELIMITER_TAG: (u16, u16) = (0xFFFE, 0xE0DD);
/// Item tag plus 32-bit length.
const ITEM_HEADER_LEN: u64 = 8;

fn padded_len(len: usize) -> u64 {
    (len as u64 + 1) & !1
}

/// Collects the encoded frames of one level in sequence order.
#[derive(Debug)]
pub struct MultiFrameAssembler {
    level: usize,
    expected_frames: usize,
    frames: Vec<Vec<u8>>,
    offsets: Vec<u32>,
    next_offset: u64,
}

impl MultiFrameAssembler {
    /// Create an assembler for `expected_frames` frames of `level`.
    pub fn new(level: usize, expected_frames: usize) -> Self {
        Self {
            level,
            expected_frames,
            frames: Vec::with_capacity(expected_frames),
            offsets: Vec::with_capacity(expected_frames),
            next_offset: 0,
        }
    }

    /// Level being assembled.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Frames accepted so far.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn error(&self, message: String) -> DicomizeError {
        DicomizeError::Assembly {
            level: self.level,
            message,
        }
    }

    /// Append the next frame.
    ///
    /// Records must arrive for this level with consecutive sequence indices
    /// starting at 0; anything else is a sequencing defect.
    pub fn push(&mut self, record: EncodedTileRecord) -> Result<()> {
        if record.level != self.level {
            return Err(self.error(format!(
                "received a frame for level {}",
                record.level
            )));
        }
        let expected_index = self.frames.len();
        if record.index != expected_index {
            return Err(self.error(format!(
                "frame {} arrived while expecting frame {}",
                record.index, expected_index
            )));
        }
        if expected_index >= self.expected_frames {
            return Err(self.error(format!(
                "more than {} frames pushed",
                self.expected_frames
            )));
        }

        let offset = u32::try_from(self.next_offset).map_err(|_| {
            self.error(format!(
                "offset of frame {} exceeds the 32-bit offset table",
                record.index
            ))
        })?;
        let item_len = padded_len(record.data.len());
        if item_len > u64::from(u32::MAX) - 1 {
            return Err(self.error(format!("frame {} is too large for an item", record.index)));
        }

        self.offsets.push(offset);
        self.next_offset += ITEM_HEADER_LEN + item_len;
        self.frames.push(record.data);
        Ok(())
    }

    /// Complete the stream, checking that every frame arrived.
    pub fn finish(self) -> Result<MultiFrameStream> {
        if self.frames.len() != self.expected_frames {
            return Err(self.error(format!(
                "{} of {} frames assembled",
                self.frames.len(),
                self.expected_frames
            )));
        }
        log::debug!(
            "Assembled {} frames for level {} ({} bytes of items)",
            self.frames.len(),
            self.level,
            self.next_offset
        );
        Ok(MultiFrameStream {
            level: self.level,
            offsets: self.offsets,
            frames: self.frames,
        })
    }
}

/// Assembled frames and Basic Offset Table of one level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiFrameStream {
    level: usize,
    offsets: Vec<u32>,
    frames: Vec<Vec<u8>>,
}

impl MultiFrameStream {
    /// Pyramid level of the frames.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Basic Offset Table entries, one per frame.
    ///
    /// Entry `i` is the byte distance from the start of the first frame item
    /// to the item tag of frame `i`. Each earlier frame contributes its
    /// 8-byte item header plus its payload padded to even length (PS3.5 A.4).
    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    /// Frame payloads as produced by the codec (unpadded).
    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    /// Number of frames.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Total size of the codec payloads.
    pub fn payload_len(&self) -> u64 {
        self.frames.iter().map(|frame| frame.len() as u64).sum()
    }

    /// Serialize the encapsulated value: offset table item, frame items and
    /// the sequence delimiter.
    pub fn to_bytes(&self) -> Vec<u8> {
        let items: u64 = self
            .frames
            .iter()
            .map(|frame| ITEM_HEADER_LEN + padded_len(frame.len()))
            .sum();
        let table_len = self.offsets.len() * 4;
        let mut out = Vec::with_capacity(items as usize + table_len + 16);

        write_item_header(&mut out, ITEM_TAG, table_len as u32);
        for offset in &self.offsets {
            push_u32(&mut out, *offset);
        }
        for frame in &self.frames {
            write_item_header(&mut out, ITEM_TAG, padded_len(frame.len()) as u32);
            out.extend_from_slice(frame);
            if frame.len() % 2 == 1 {
                out.push(0);
            }
        }
        write_item_header(&mut out, SEQUENCE_DELIMITER_TAG, 0);
        out
    }

    /// Frames concatenated as native pixel data, padded to even length.
    pub fn native_pixel_data(&self) -> Vec<u8> {
        let mut data = self.frames.concat();
        if data.len() % 2 == 1 {
            data.push(0);
        }
        data
    }

    /// Offset table and even-padded fragments, one fragment per frame.
    pub fn into_fragments(self) -> (Vec<u32>, Vec<Vec<u8>>) {
        let fragments = self
            .frames
            .into_iter()
            .map(|mut frame| {
                if frame.len() % 2 == 1 {
                    frame.push(0);
                }
                frame
            })
            .collect();
        (self.offsets, fragments)
    }
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    // Writing to a Vec cannot fail.
    let _ = out.write_u32::<LittleEndian>(value);
}

fn write_item_header(out: &mut Vec<u8>, tag: (u16, u16), len: u32) {
    let _ = out.write_u16::<LittleEndian>(tag.0);
    let _ = out.write_u16::<LittleEndian>(tag.1);
    push_u32(out, len);
}
