//! In-memory pyramid built from a flat raster image.

use std::path::Path;

use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::{DicomizeError, Result};
use crate::pixel::PixelBuffer;

use super::{PyramidLevel, SourceImageAdapter};

/// Default native tile size for flat images.
pub const DEFAULT_TILE_SIZE: u32 = 256;

struct Level {
    info: PyramidLevel,
    pixels: PixelBuffer,
}

/// Source adapter over a pyramid held entirely in memory.
///
/// Built either from a decoded raster, halving until a level fits in a single
/// tile, or from explicit per-level buffers.
pub struct ImagePyramidSource {
    levels: Vec<Level>,
    background: Option<[u8; 3]>,
}

impl ImagePyramidSource {
    /// Decode an image file and build a pyramid from it.
    pub fn open<P: AsRef<Path>>(path: P, tile_size: u32, levels: Option<usize>) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Decoding {}", path.display());
        let image = image::open(path)?;
        Self::from_image(image, tile_size, levels)
    }

    /// Build a pyramid from a decoded image.
    ///
    /// Without a level count, levels are halved until one fits in a single
    /// `tile_size` tile. With a count, exactly that many levels are built
    /// unless the image shrinks to a single pixel first.
    pub fn from_image(image: DynamicImage, tile_size: u32, levels: Option<usize>) -> Result<Self> {
        if tile_size == 0 {
            return Err(DicomizeError::Config("tile size must be positive".into()));
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(DicomizeError::source_read("image has no pixels"));
        }

        let mut built = Vec::new();
        let mut current = image;
        loop {
            let index = built.len();
            let pixels = to_pixel_buffer(&current)?;
            built.push(Level {
                info: PyramidLevel {
                    index,
                    width: current.width(),
                    height: current.height(),
                    tile_width: tile_size,
                    tile_height: tile_size,
                    downsample: 2f64.powi(index as i32),
                },
                pixels,
            });

            let (w, h) = (current.width(), current.height());
            let more = match levels {
                Some(count) => built.len() < count,
                None => w > tile_size || h > tile_size,
            };
            if !more || (w == 1 && h == 1) {
                break;
            }
            current = current.resize_exact((w / 2).max(1), (h / 2).max(1), FilterType::Triangle);
        }

        log::info!(
            "Built {}-level pyramid from {}x{} image",
            built.len(),
            built[0].info.width,
            built[0].info.height
        );
        Ok(Self {
            levels: built,
            background: None,
        })
    }

    /// Build a pyramid from explicit level buffers, level 0 first.
    ///
    /// Downsample factors are derived from the level widths.
    pub fn from_levels(levels: Vec<PixelBuffer>, tile_width: u32, tile_height: u32) -> Result<Self> {
        let base_width = levels
            .first()
            .map(|level| level.width)
            .ok_or_else(|| DicomizeError::InvalidPyramid("no levels given".into()))?;

        let levels = levels
            .into_iter()
            .enumerate()
            .map(|(index, pixels)| Level {
                info: PyramidLevel {
                    index,
                    width: pixels.width,
                    height: pixels.height,
                    tile_width,
                    tile_height,
                    downsample: base_width as f64 / pixels.width.max(1) as f64,
                },
                pixels,
            })
            .collect();

        Ok(Self {
            levels,
            background: None,
        })
    }

    /// Record a background color hint, as a slide reader would.
    pub fn with_background(mut self, background: [u8; 3]) -> Self {
        self.background = Some(background);
        self
    }

    fn level(&self, level: usize) -> Result<&Level> {
        self.levels.get(level).ok_or_else(|| {
            DicomizeError::source_read(format!(
                "level {} out of range ({} levels)",
                level,
                self.levels.len()
            ))
        })
    }
}

impl SourceImageAdapter for ImagePyramidSource {
    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level_info(&self, level: usize) -> Result<PyramidLevel> {
        Ok(self.level(level)?.info)
    }

    fn read_region(
        &self,
        level: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<PixelBuffer> {
        let source = &self.level(level)?.pixels;
        if x >= source.width || y >= source.height {
            return Err(DicomizeError::source_read(format!(
                "region origin ({}, {}) outside {}x{} level {}",
                x, y, source.width, source.height, level
            )));
        }

        let width = width.min(source.width - x);
        let height = height.min(source.height - y);
        let pixel = source.bytes_per_pixel();
        let src_stride = source.width as usize * pixel;
        let row_bytes = width as usize * pixel;

        let mut data = Vec::with_capacity(row_bytes * height as usize);
        for row in y..y + height {
            let start = row as usize * src_stride + x as usize * pixel;
            data.extend_from_slice(&source.data[start..start + row_bytes]);
        }

        PixelBuffer::new(
            width,
            height,
            source.samples_per_pixel,
            source.bits_per_sample,
            source.encoding,
            data,
        )
    }

    fn background_color(&self) -> Option<[u8; 3]> {
        self.background
    }
}

/// Convert a decoded image to an interleaved RGB or RGBA buffer.
fn to_pixel_buffer(image: &DynamicImage) -> Result<PixelBuffer> {
    let color = image.color();
    let wide = color.bytes_per_pixel() / color.channel_count() > 1;
    let (w, h) = (image.width(), image.height());

    match (color.has_alpha(), wide) {
        (false, false) => PixelBuffer::rgb8(w, h, image.to_rgb8().into_raw()),
        (true, false) => PixelBuffer::rgba8(w, h, image.to_rgba8().into_raw()),
        (false, true) => wide_buffer(w, h, 3, image.to_rgb16().into_raw()),
        (true, true) => wide_buffer(w, h, 4, image.to_rgba16().into_raw()),
    }
}

fn wide_buffer(width: u32, height: u32, samples: u16, raw: Vec<u16>) -> Result<PixelBuffer> {
    let data = raw.iter().flat_map(|v| v.to_le_bytes()).collect();
    PixelBuffer::new(width, height, samples, 16, crate::pixel::PixelEncoding::Rgb, data)
}
