//! JPEG 2000 codec.
//!
//! Encodes each tile as a raw single-tile J2K codestream (no JP2 wrapper), as
//! DICOM stores JPEG 2000 frames:
//!
//! - 3 components, 8-bit unsigned, multiple component transform enabled
//! - up to 5 decomposition levels, 64x64 code-blocks, maximum precincts
//! - one quality layer, LRCP progression
//!
//! Lossless mode uses the reversible color transform and the 5/3 wavelet with
//! no quantization. Lossy mode uses the irreversible color transform, the 9/7
//! wavelet and scalar quantization with explicitly signalled step sizes
//! derived from the quality setting.

mod dwt;
mod mq;
mod t1;
mod t2;

use byteorder::{BigEndian, WriteBytesExt};

use crate::config::transfer_syntax;
use crate::error::{DicomizeError, Result};
use crate::pixel::{PixelBuffer, PixelEncoding};

use super::traits::{Codec, CodecCapabilities, CodecInfo};

const SOC: u16 = 0xFF4F;
const SIZ: u16 = 0xFF51;
const COD: u16 = 0xFF52;
const QCD: u16 = 0xFF5C;
const SOT: u16 = 0xFF90;
const SOD: u16 = 0xFF93;
const EOC: u16 = 0xFFD9;

const COMPONENTS: usize = 3;
const PRECISION: u32 = 8;
const MAX_LEVELS: u32 = 5;
const BLOCK_SIZE: usize = 64;
const MIN_GUARD_BITS: u32 = 2;
const MAX_GUARD_BITS: u32 = 7;

/// Image-domain quantization step at quality 100.
const FINEST_STEP: f64 = 4.0;
/// Quality points per doubling of the quantization step.
const QUALITY_PER_OCTAVE: f64 = 20.0;

/// Synthesis basis norms of the 9/7 wavelet by orientation and level.
const NORMS: [[f64; 6]; 4] = [
    [1.000, 1.965, 4.177, 8.403, 16.90, 33.84],
    [2.022, 3.989, 8.355, 17.04, 34.27, 68.63],
    [2.022, 3.989, 8.355, 17.04, 34.27, 68.63],
    [2.080, 3.865, 8.307, 17.18, 34.71, 69.59],
];

/// Subband orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Low-pass in both directions.
    LL,
    /// Horizontally high-pass.
    HL,
    /// Vertically high-pass.
    LH,
    /// High-pass in both directions.
    HH,
}

impl Orientation {
    /// Log2 of the nominal range gain.
    fn gain(self) -> u32 {
        match self {
            Orientation::LL => 0,
            Orientation::HL | Orientation::LH => 1,
            Orientation::HH => 2,
        }
    }

    fn row(self) -> usize {
        match self {
            Orientation::LL => 0,
            Orientation::HL => 1,
            Orientation::LH => 2,
            Orientation::HH => 3,
        }
    }
}

/// Subband position within a transformed plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Subband {
    orientation: Orientation,
    resolution: usize,
    // 0 for the finest detail bands.
    level: usize,
    x0: usize,
    y0: usize,
    width: usize,
    height: usize,
}

/// Subbands in codestream order: LL, then HL, LH, HH per resolution.
fn subbands(width: usize, height: usize, levels: u32) -> Vec<Subband> {
    let levels = levels as usize;
    let size = |n: usize, d: usize| n.div_ceil(1 << d);

    let mut bands = vec![Subband {
        orientation: Orientation::LL,
        resolution: 0,
        level: levels,
        x0: 0,
        y0: 0,
        width: size(width, levels),
        height: size(height, levels),
    }];

    for d in (1..=levels).rev() {
        let (lw, lh) = (size(width, d), size(height, d));
        let (pw, ph) = (size(width, d - 1), size(height, d - 1));
        let resolution = levels - d + 1;
        for (orientation, x0, y0, w, h) in [
            (Orientation::HL, lw, 0, pw - lw, lh),
            (Orientation::LH, 0, lh, lw, ph - lh),
            (Orientation::HH, lw, lh, pw - lw, ph - lh),
        ] {
            bands.push(Subband {
                orientation,
                resolution,
                level: d - 1,
                x0,
                y0,
                width: w,
                height: h,
            });
        }
    }
    bands
}

fn decomposition_levels(width: u32, height: u32) -> u32 {
    let min = width.min(height).max(1);
    (u32::BITS - 1 - min.leading_zeros()).min(MAX_LEVELS)
}

/// Image-domain step for `quality`, doubling every `QUALITY_PER_OCTAVE` points below 100.
fn base_step(quality: u8) -> f64 {
    let below = 100 - quality.clamp(1, 100);
    FINEST_STEP * 2f64.powf(f64::from(below) / QUALITY_PER_OCTAVE)
}

/// Quantization parameters signalled for one subband.
#[derive(Debug, Clone, Copy, PartialEq)]
struct StepSize {
    exponent: u32,
    mantissa: u32,
    delta: f64,
}

impl StepSize {
    fn reversible(band: &Subband) -> Self {
        Self {
            exponent: PRECISION + band.orientation.gain(),
            mantissa: 0,
            delta: 1.0,
        }
    }

    fn irreversible(band: &Subband, quality: u8) -> Self {
        let target = base_step(quality) / NORMS[band.orientation.row()][band.level];
        let range = (PRECISION + band.orientation.gain()) as i32;

        let floor = target.log2().floor() as i32;
        let mut exponent = range - floor;
        let mut mantissa = ((target / 2f64.powi(floor) - 1.0) * 2048.0).round() as i32;
        if mantissa >= 2048 {
            mantissa = 0;
            exponent -= 1;
        }
        let exponent = exponent.clamp(0, 31);

        Self {
            exponent: exponent as u32,
            mantissa: mantissa as u32,
            delta: 2f64.powi(range - exponent) * (1.0 + mantissa as f64 / 2048.0),
        }
    }
}

/// Encoding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jpeg2000Mode {
    /// 5/3 wavelet with the reversible color transform.
    Reversible,
    /// 9/7 wavelet with the irreversible color transform and quantization.
    Irreversible {
        /// Quality 1-100.
        quality: u8,
    },
}

/// JPEG 2000 codec.
#[derive(Debug, Clone, Copy)]
pub struct Jpeg2000Codec {
    mode: Jpeg2000Mode,
}

struct CodedBand {
    blocks_wide: usize,
    blocks_high: usize,
    blocks: Vec<t1::BlockCode>,
}

impl Jpeg2000Codec {
    /// Create a codec for lossless compression.
    pub fn lossless() -> Self {
        Self {
            mode: Jpeg2000Mode::Reversible,
        }
    }

    /// Create a codec for lossy compression at the given quality.
    pub fn lossy(quality: u8) -> Self {
        Self {
            mode: Jpeg2000Mode::Irreversible { quality },
        }
    }

    /// Encoding mode.
    pub fn mode(&self) -> Jpeg2000Mode {
        self.mode
    }

    fn name(&self) -> &'static str {
        match self.mode {
            Jpeg2000Mode::Reversible => "JPEG 2000 Lossless",
            Jpeg2000Mode::Irreversible { .. } => "JPEG 2000",
        }
    }

    /// Produce the J2K codestream for one tile.
    fn encode_codestream(&self, tile: &PixelBuffer) -> Result<Vec<u8>> {
        let (width, height) = (tile.width as usize, tile.height as usize);
        let levels = decomposition_levels(tile.width, tile.height);
        let bands = subbands(width, height, levels);

        let (planes, steps) = match self.mode {
            Jpeg2000Mode::Reversible => {
                let mut planes = reversible_components(tile);
                for plane in planes.iter_mut() {
                    dwt::forward_53(plane, width, height, levels as u8);
                }
                let steps: Vec<StepSize> = bands.iter().map(StepSize::reversible).collect();
                (planes, steps)
            }
            Jpeg2000Mode::Irreversible { quality } => {
                let mut planes = irreversible_components(tile);
                for plane in planes.iter_mut() {
                    dwt::forward_97(plane, width, height, levels as u8);
                }
                let steps: Vec<StepSize> = bands
                    .iter()
                    .map(|band| StepSize::irreversible(band, quality))
                    .collect();
                let quantized = planes
                    .iter()
                    .map(|plane| quantize(plane, width, &bands, &steps))
                    .collect();
                (quantized, steps)
            }
        };

        let coded: Vec<Vec<CodedBand>> = planes
            .iter()
            .map(|plane| {
                bands
                    .iter()
                    .map(|band| code_band(plane, width, band))
                    .collect()
            })
            .collect();

        let guard_bits = self.guard_bits(&coded, &steps)?;
        let body = packets(&coded, &bands, &steps, guard_bits, levels);

        let mut out = Vec::with_capacity(body.len() + 128);
        out.write_u16::<BigEndian>(SOC)?;
        write_siz(&mut out, tile.width, tile.height)?;
        self.write_cod(&mut out, levels)?;
        self.write_qcd(&mut out, &steps, guard_bits)?;

        out.write_u16::<BigEndian>(SOT)?;
        out.write_u16::<BigEndian>(10)?;
        out.write_u16::<BigEndian>(0)?;
        let tile_part_length = u32::try_from(12 + 2 + body.len()).map_err(|_| {
            DicomizeError::encode(self.name(), "tile-part exceeds 4 GiB")
        })?;
        out.write_u32::<BigEndian>(tile_part_length)?;
        out.write_u8(0)?;
        out.write_u8(1)?;
        out.write_u16::<BigEndian>(SOD)?;
        out.extend_from_slice(&body);
        out.write_u16::<BigEndian>(EOC)?;
        Ok(out)
    }

    /// Smallest guard bit count that holds every code-block's magnitude.
    fn guard_bits(&self, coded: &[Vec<CodedBand>], steps: &[StepSize]) -> Result<u32> {
        let mut guard = MIN_GUARD_BITS;
        for component in coded {
            for (band, step) in component.iter().zip(steps) {
                for block in &band.blocks {
                    if block.magnitude_bits > 0 {
                        guard = guard.max((block.magnitude_bits + 1).saturating_sub(step.exponent));
                    }
                }
            }
        }
        if guard > MAX_GUARD_BITS {
            return Err(DicomizeError::encode(
                self.name(),
                format!("coefficients need {} guard bits", guard),
            ));
        }
        Ok(guard)
    }

    fn write_cod(&self, out: &mut Vec<u8>, levels: u32) -> Result<()> {
        out.write_u16::<BigEndian>(COD)?;
        out.write_u16::<BigEndian>(12)?;
        out.write_u8(0)?; // default precincts, no SOP/EPH
        out.write_u8(0)?; // LRCP
        out.write_u16::<BigEndian>(1)?;
        out.write_u8(1)?; // component transform
        out.write_u8(levels as u8)?;
        let block_exponent = (BLOCK_SIZE.trailing_zeros() - 2) as u8;
        out.write_u8(block_exponent)?;
        out.write_u8(block_exponent)?;
        out.write_u8(0)?;
        out.write_u8(match self.mode {
            Jpeg2000Mode::Reversible => 1,
            Jpeg2000Mode::Irreversible { .. } => 0,
        })?;
        Ok(())
    }

    fn write_qcd(&self, out: &mut Vec<u8>, steps: &[StepSize], guard_bits: u32) -> Result<()> {
        out.write_u16::<BigEndian>(QCD)?;
        match self.mode {
            Jpeg2000Mode::Reversible => {
                out.write_u16::<BigEndian>(3 + steps.len() as u16)?;
                out.write_u8((guard_bits << 5) as u8)?;
                for step in steps {
                    out.write_u8((step.exponent << 3) as u8)?;
                }
            }
            Jpeg2000Mode::Irreversible { .. } => {
                out.write_u16::<BigEndian>(3 + 2 * steps.len() as u16)?;
                out.write_u8(((guard_bits << 5) | 2) as u8)?;
                for step in steps {
                    out.write_u16::<BigEndian>(((step.exponent << 11) | step.mantissa) as u16)?;
                }
            }
        }
        Ok(())
    }
}

fn write_siz(out: &mut Vec<u8>, width: u32, height: u32) -> Result<()> {
    out.write_u16::<BigEndian>(SIZ)?;
    out.write_u16::<BigEndian>(38 + 3 * COMPONENTS as u16)?;
    out.write_u16::<BigEndian>(0)?;
    out.write_u32::<BigEndian>(width)?;
    out.write_u32::<BigEndian>(height)?;
    out.write_u32::<BigEndian>(0)?;
    out.write_u32::<BigEndian>(0)?;
    out.write_u32::<BigEndian>(width)?;
    out.write_u32::<BigEndian>(height)?;
    out.write_u32::<BigEndian>(0)?;
    out.write_u32::<BigEndian>(0)?;
    out.write_u16::<BigEndian>(COMPONENTS as u16)?;
    for _ in 0..COMPONENTS {
        out.write_u8((PRECISION - 1) as u8)?;
        out.write_u8(1)?;
        out.write_u8(1)?;
    }
    Ok(())
}

/// Level-shifted RCT planes (Y, Cb, Cr).
fn reversible_components(tile: &PixelBuffer) -> Vec<Vec<i32>> {
    let pixels = tile.width as usize * tile.height as usize;
    let mut planes = vec![Vec::with_capacity(pixels); COMPONENTS];
    for rgb in tile.data.chunks_exact(3) {
        let r = rgb[0] as i32 - 128;
        let g = rgb[1] as i32 - 128;
        let b = rgb[2] as i32 - 128;
        planes[0].push((r + 2 * g + b) >> 2);
        planes[1].push(b - g);
        planes[2].push(r - g);
    }
    planes
}

/// Level-shifted ICT planes (Y, Cb, Cr).
fn irreversible_components(tile: &PixelBuffer) -> Vec<Vec<f32>> {
    let pixels = tile.width as usize * tile.height as usize;
    let mut planes = vec![Vec::with_capacity(pixels); COMPONENTS];
    for rgb in tile.data.chunks_exact(3) {
        let r = rgb[0] as f32 - 128.0;
        let g = rgb[1] as f32 - 128.0;
        let b = rgb[2] as f32 - 128.0;
        planes[0].push(0.299 * r + 0.587 * g + 0.114 * b);
        planes[1].push(-0.168_75 * r - 0.331_26 * g + 0.5 * b);
        planes[2].push(0.5 * r - 0.418_69 * g - 0.081_31 * b);
    }
    planes
}

fn quantize(plane: &[f32], width: usize, bands: &[Subband], steps: &[StepSize]) -> Vec<i32> {
    let mut out = vec![0i32; plane.len()];
    for (band, step) in bands.iter().zip(steps) {
        for y in band.y0..band.y0 + band.height {
            for x in band.x0..band.x0 + band.width {
                let i = y * width + x;
                let magnitude = (plane[i].abs() as f64 / step.delta).floor() as i32;
                out[i] = if plane[i] < 0.0 { -magnitude } else { magnitude };
            }
        }
    }
    out
}

fn code_band(plane: &[i32], width: usize, band: &Subband) -> CodedBand {
    let blocks_wide = band.width.div_ceil(BLOCK_SIZE);
    let blocks_high = band.height.div_ceil(BLOCK_SIZE);
    let mut blocks = Vec::with_capacity(blocks_wide * blocks_high);
    let mut coefficients = Vec::with_capacity(BLOCK_SIZE * BLOCK_SIZE);

    for by in 0..blocks_high {
        for bx in 0..blocks_wide {
            let x0 = band.x0 + bx * BLOCK_SIZE;
            let y0 = band.y0 + by * BLOCK_SIZE;
            let w = BLOCK_SIZE.min(band.x0 + band.width - x0);
            let h = BLOCK_SIZE.min(band.y0 + band.height - y0);

            coefficients.clear();
            for y in y0..y0 + h {
                coefficients.extend_from_slice(&plane[y * width + x0..y * width + x0 + w]);
            }
            blocks.push(t1::encode_block(&coefficients, w, h, band.orientation));
        }
    }

    CodedBand {
        blocks_wide,
        blocks_high,
        blocks,
    }
}

/// Packets in LRCP order, one precinct per resolution.
fn packets(
    coded: &[Vec<CodedBand>],
    bands: &[Subband],
    steps: &[StepSize],
    guard_bits: u32,
    levels: u32,
) -> Vec<u8> {
    let mut out = Vec::new();
    for resolution in 0..=levels as usize {
        for component in coded {
            let precinct: Vec<t2::PrecinctBand<'_>> = bands
                .iter()
                .zip(component)
                .zip(steps)
                .filter(|((band, _), _)| band.resolution == resolution)
                .map(|((_, coded_band), step)| {
                    let max_bitplanes = guard_bits + step.exponent - 1;
                    t2::PrecinctBand {
                        blocks_wide: coded_band.blocks_wide,
                        blocks_high: coded_band.blocks_high,
                        blocks: coded_band
                            .blocks
                            .iter()
                            .map(|block| t2::BlockContribution {
                                data: &block.data,
                                passes: block.passes,
                                zero_bitplanes: max_bitplanes - block.magnitude_bits,
                            })
                            .collect(),
                    }
                })
                .collect();
            t2::write_packet(&precinct, &mut out);
        }
    }
    out
}

impl Codec for Jpeg2000Codec {
    fn encode(&self, tile: &PixelBuffer) -> Result<Vec<u8>> {
        self.check_tile(tile)?;
        let codestream = self.encode_codestream(tile)?;

        log::debug!(
            "Encoded {}x{} tile to {} bytes ({:.2}:1)",
            tile.width,
            tile.height,
            codestream.len(),
            tile.data.len() as f64 / codestream.len() as f64
        );
        Ok(codestream)
    }

    fn info(&self) -> CodecInfo {
        match self.mode {
            Jpeg2000Mode::Reversible => CodecInfo {
                name: self.name(),
                lossy: false,
                transfer_syntax: transfer_syntax::JPEG_2000_LOSSLESS,
            },
            Jpeg2000Mode::Irreversible { .. } => CodecInfo {
                name: self.name(),
                lossy: true,
                transfer_syntax: transfer_syntax::JPEG_2000_LOSSY,
            },
        }
    }

    fn capabilities(&self) -> CodecCapabilities {
        CodecCapabilities {
            max_bits_per_sample: 8,
            samples_per_pixel: 3,
            input_encoding: PixelEncoding::Rgb,
            supports_decode: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::BackgroundColor;

    fn marker_at(data: &[u8], offset: usize) -> u16 {
        u16::from_be_bytes([data[offset], data[offset + 1]])
    }

    fn noise_tile(size: u32) -> PixelBuffer {
        let mut seed = 0x9E37_79B9u32;
        let data = (0..size * size * 3)
            .map(|_| {
                seed ^= seed << 13;
                seed ^= seed >> 17;
                seed ^= seed << 5;
                seed as u8
            })
            .collect();
        PixelBuffer::rgb8(size, size, data).unwrap()
    }

    /// Walk the main header and return the offset of SOT.
    fn main_header_end(data: &[u8]) -> usize {
        assert_eq!(marker_at(data, 0), SOC);
        let mut offset = 2;
        loop {
            let marker = marker_at(data, offset);
            if marker == SOT {
                return offset;
            }
            let length = marker_at(data, offset + 2) as usize;
            offset += 2 + length;
        }
    }

    #[test]
    fn test_subband_layout() {
        let bands = subbands(256, 200, 2);
        assert_eq!(bands.len(), 7);
        assert_eq!((bands[0].width, bands[0].height), (64, 50));
        // Resolution 1 detail bands at decomposition level 2.
        assert_eq!((bands[1].x0, bands[1].width, bands[1].height), (64, 64, 50));
        assert_eq!((bands[2].y0, bands[2].width, bands[2].height), (50, 64, 50));
        // Finest HH.
        let hh = bands[6];
        assert_eq!(hh.orientation, Orientation::HH);
        assert_eq!((hh.x0, hh.y0, hh.width, hh.height), (128, 100, 128, 100));
        assert_eq!(hh.resolution, 2);
        assert_eq!(hh.level, 0);
    }

    #[test]
    fn test_levels_follow_tile_size() {
        assert_eq!(decomposition_levels(256, 256), 5);
        assert_eq!(decomposition_levels(16, 300), 4);
        assert_eq!(decomposition_levels(1, 1), 0);
    }

    #[test]
    fn test_lossless_marker_structure() {
        let tile = noise_tile(64);
        let data = Jpeg2000Codec::lossless().encode(&tile).unwrap();

        assert_eq!(marker_at(&data, 0), SOC);
        assert_eq!(marker_at(&data, 2), SIZ);
        assert_eq!(marker_at(&data, 4), 47);
        assert_eq!(u32::from_be_bytes([data[8], data[9], data[10], data[11]]), 64);
        assert_eq!(marker_at(&data, data.len() - 2), EOC);

        let cod = 2 + 2 + 47;
        assert_eq!(marker_at(&data, cod), COD);
        assert_eq!(data[cod + 9], 5); // decomposition levels
        assert_eq!(data[cod + 13], 1); // 5/3 wavelet

        let sot = main_header_end(&data);
        let psot = u32::from_be_bytes([data[sot + 6], data[sot + 7], data[sot + 8], data[sot + 9]]);
        assert_eq!(sot + psot as usize, data.len() - 2);
        assert_eq!(marker_at(&data, sot + 12), SOD);
    }

    #[test]
    fn test_lossy_signals_quantization() {
        let tile = noise_tile(32);
        let data = Jpeg2000Codec::lossy(80).encode(&tile).unwrap();

        let cod = 2 + 2 + 47;
        assert_eq!(data[cod + 13], 0); // 9/7 wavelet
        let qcd = cod + 2 + 12;
        assert_eq!(marker_at(&data, qcd), QCD);
        let bands = 1 + 3 * 5;
        assert_eq!(marker_at(&data, qcd + 2) as usize, 3 + 2 * bands);
        assert_eq!(data[qcd + 4] & 0x1F, 2);
        assert!(data[qcd + 4] >> 5 >= MIN_GUARD_BITS as u8);
    }

    #[test]
    fn test_uniform_tile_is_small() {
        let tile = PixelBuffer::filled(256, 256, 3, 8, BackgroundColor::new(200, 10, 90));
        let lossless = Jpeg2000Codec::lossless().encode(&tile).unwrap();
        let lossy = Jpeg2000Codec::lossy(90).encode(&tile).unwrap();
        assert!(lossless.len() < 1024, "{} bytes", lossless.len());
        assert!(lossy.len() < 1024, "{} bytes", lossy.len());
    }

    #[test]
    fn test_lower_quality_is_smaller() {
        let tile = noise_tile(64);
        let high = Jpeg2000Codec::lossy(95).encode(&tile).unwrap();
        let low = Jpeg2000Codec::lossy(20).encode(&tile).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn test_step_size_signalling() {
        let band = subbands(64, 64, 1)[3];
        let step = StepSize::irreversible(&band, 100);
        let signalled = 2f64.powi((PRECISION + 2) as i32 - step.exponent as i32)
            * (1.0 + step.mantissa as f64 / 2048.0);
        assert!((signalled - step.delta).abs() < 1e-12);
        assert!((step.delta - FINEST_STEP / 2.080).abs() < 1e-3);
        assert!(step.mantissa < 2048);
    }

    #[test]
    fn test_sixteen_bit_rejected() {
        let tile = PixelBuffer::new(2, 2, 3, 16, PixelEncoding::Rgb, vec![0; 24]).unwrap();
        let err = Jpeg2000Codec::lossless().encode(&tile).unwrap_err();
        assert!(matches!(err, DicomizeError::Encode { codec: "JPEG 2000 Lossless", .. }));
    }

    #[test]
    fn test_tiny_tile_encodes() {
        let tile = PixelBuffer::rgb8(1, 1, vec![1, 2, 3]).unwrap();
        let data = Jpeg2000Codec::lossless().encode(&tile).unwrap();
        assert_eq!(marker_at(&data, data.len() - 2), EOC);
    }

    fn pattern_tile(width: u32, height: u32, pattern: impl Fn(u32, u32, u32) -> u8) -> PixelBuffer {
        let data = (0..height)
            .flat_map(|y| (0..width).flat_map(move |x| (0..3).map(move |c| (x, y, c))))
            .map(|(x, y, c)| pattern(x, y, c))
            .collect();
        PixelBuffer::rgb8(width, height, data).unwrap()
    }

    fn noise(width: u32, height: u32) -> PixelBuffer {
        pattern_tile(width, height, |x, y, c| {
            let mut v = x.wrapping_mul(0x9E37_79B9) ^ y.wrapping_mul(0x85EB_CA6B) ^ c.wrapping_mul(0xC2B2_AE35);
            v ^= v >> 15;
            v = v.wrapping_mul(0x2C1B_3C6D);
            v ^= v >> 12;
            v as u8
        })
    }

    fn gradient(width: u32, height: u32) -> PixelBuffer {
        pattern_tile(width, height, |x, y, c| match c {
            0 => (x * 255 / (width - 1).max(1)) as u8,
            1 => (y * 255 / (height - 1).max(1)) as u8,
            _ => ((x + y) % 256) as u8,
        })
    }

    fn checker(width: u32, height: u32) -> PixelBuffer {
        pattern_tile(width, height, |x, y, c| {
            if (x / 4 + y / 4) % 2 == 0 {
                [230, 20, 120][c as usize]
            } else {
                [15, 200, 60][c as usize]
            }
        })
    }

    /// Decode with OpenJPEG into interleaved 8-bit RGB.
    fn decode(data: &[u8]) -> (u32, u32, Vec<u8>) {
        let image = jpeg2k::Image::from_bytes(data).unwrap();
        let (width, height) = (image.width(), image.height());
        let components = image.components();
        assert_eq!(components.len(), 3);

        let mut rgb = vec![0u8; (width * height * 3) as usize];
        for (c, component) in components.iter().enumerate() {
            assert_eq!(component.data().len(), (width * height) as usize);
            for (i, sample) in component.data().iter().enumerate() {
                rgb[i * 3 + c] = (*sample).clamp(0, 255) as u8;
            }
        }
        (width, height, rgb)
    }

    fn psnr(original: &[u8], decoded: &[u8]) -> f64 {
        let mse = original
            .iter()
            .zip(decoded)
            .map(|(&a, &b)| (a as f64 - b as f64).powi(2))
            .sum::<f64>()
            / original.len() as f64;
        if mse == 0.0 {
            f64::INFINITY
        } else {
            10.0 * (255.0 * 255.0 / mse).log10()
        }
    }

    #[test]
    fn test_lossless_decodes_bit_exact() {
        let sizes = [(64, 64), (256, 256), (37, 29), (1, 1), (16, 300)];
        for (width, height) in sizes {
            for tile in [noise(width, height), gradient(width, height), checker(width, height)] {
                let data = Jpeg2000Codec::lossless().encode(&tile).unwrap();
                let (w, h, rgb) = decode(&data);
                assert_eq!((w, h), (width, height));
                let differing = rgb.iter().zip(&tile.data).filter(|(a, b)| a != b).count();
                assert_eq!(differing, 0, "{}x{} tile differs in {} samples", width, height, differing);
            }
        }
    }

    #[test]
    fn test_lossy_psnr_floor() {
        for (quality, floor) in [(95u8, 40.0), (80, 35.0), (40, 24.0)] {
            for tile in [noise(64, 64), gradient(37, 29), checker(16, 300)] {
                let data = Jpeg2000Codec::lossy(quality).encode(&tile).unwrap();
                let (w, h, rgb) = decode(&data);
                assert_eq!((w, h), (tile.width, tile.height));
                let db = psnr(&tile.data, &rgb);
                assert!(db > floor, "q{} {}x{}: {:.1} dB", quality, w, h, db);
            }
        }
    }

    #[test]
    fn test_lossy_noise_smaller_than_raw() {
        let tile = noise(256, 256);
        for quality in [80u8, 90, 95, 100] {
            let data = Jpeg2000Codec::lossy(quality).encode(&tile).unwrap();
            assert!(
                data.len() < tile.data.len(),
                "q{}: {} bytes for {} raw",
                quality,
                data.len(),
                tile.data.len()
            );
        }
    }
}
