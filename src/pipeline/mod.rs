//! Conversion pipeline.
//!
//! Walks the source pyramid level by level, encodes every tile and assembles
//! the frames of each level into one multi-frame pixel-data stream. Levels
//! are handed to a sink as soon as they are complete, so a writer can store
//! one instance per level without keeping the whole pyramid in memory.

mod reorder;
mod sequencer;
mod tile;

pub use reorder::{encode_level_parallel, ReorderBuffer};
pub use sequencer::PyramidTileSequencer;
pub use tile::{EncodedTileRecord, LevelGrid, TileEncoder};

use std::time::Instant;

use rayon::ThreadPool;
use serde::Serialize;

use crate::codec::CodecAdapter;
use crate::config::{ConversionConfig, TransferSyntaxBinding};
use crate::dicom::{MultiFrameAssembler, MultiFrameStream};
use crate::error::{DicomizeError, Result};
use crate::pixel::BackgroundColor;
use crate::progress::{NullProgress, ProgressEvent, ProgressHandler, ProgressPhase};
use crate::source::{validate_pyramid, SourceImageAdapter};

/// Statistics for a conversion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversionStats {
    /// Levels converted.
    pub levels: usize,
    /// Frames encoded over all levels.
    pub frames: usize,
    /// Size of the padded tiles as 8-bit RGB.
    pub raw_bytes: u64,
    /// Size of the encoded frames.
    pub encoded_bytes: u64,
    /// Wall-clock time in milliseconds.
    pub elapsed_ms: u64,
}

impl ConversionStats {
    /// Raw to encoded size ratio.
    pub fn compression_ratio(&self) -> f64 {
        if self.encoded_bytes == 0 {
            0.0
        } else {
            self.raw_bytes as f64 / self.encoded_bytes as f64
        }
    }

    /// Space saved relative to the raw tiles, in percent.
    pub fn space_savings_percent(&self) -> f64 {
        if self.raw_bytes == 0 {
            0.0
        } else {
            (1.0 - (self.encoded_bytes as f64 / self.raw_bytes as f64)) * 100.0
        }
    }
}

/// Everything resolved before the first tile is read.
#[derive(Debug, Clone)]
pub struct ConversionPlan {
    /// Tile grids, level 0 first.
    pub grids: Vec<LevelGrid>,
    /// Run tile width.
    pub tile_width: u32,
    /// Run tile height.
    pub tile_height: u32,
    /// Background used for padding and alpha compositing.
    pub background: BackgroundColor,
    /// Codec for every frame of the run.
    pub codec: CodecAdapter,
}

impl ConversionPlan {
    /// Total frames the run will produce.
    pub fn total_tiles(&self) -> usize {
        self.grids.iter().map(LevelGrid::tile_count).sum()
    }

    /// Transfer syntax of the produced frames.
    pub fn binding(&self) -> TransferSyntaxBinding {
        self.codec.binding()
    }
}

/// A fully assembled level.
#[derive(Debug, Clone)]
pub struct LevelOutput {
    /// Grid the frames were cut from.
    pub grid: LevelGrid,
    /// Frames and offset table.
    pub stream: MultiFrameStream,
    /// Transfer syntax of the frames.
    pub binding: TransferSyntaxBinding,
}

impl LevelOutput {
    /// Bits allocated per stored sample.
    ///
    /// Compressed frames are always 8-bit; native frames keep the source
    /// depth, which shows in the frame size.
    pub fn bits_allocated(&self) -> u16 {
        if self.binding.encapsulated {
            return 8;
        }
        let pixel_samples = self.grid.tile_width as usize * self.grid.tile_height as usize * 3;
        match self.stream.frames().first() {
            Some(frame) if frame.len() == pixel_samples * 2 => 16,
            _ => 8,
        }
    }
}

/// Running totals for progress events.
struct RunTracker<'a> {
    handler: &'a dyn ProgressHandler,
    total_levels: usize,
    tiles_in_run: usize,
    tiles_done: usize,
    bytes_encoded: u64,
}

impl RunTracker<'_> {
    fn tile_done(&mut self, grid: &LevelGrid, index: usize, len: usize) {
        self.tiles_done += 1;
        self.bytes_encoded += len as u64;
        let event = ProgressEvent::encoding(grid.index(), index + 1, grid.tile_count())
            .with_run_progress(
                self.tiles_done,
                self.tiles_in_run,
                self.total_levels,
                self.bytes_encoded,
            );
        self.handler.on_progress(&event);
    }

    fn phase(&self, phase: ProgressPhase, level: usize) {
        let event = ProgressEvent::for_level(phase, level).with_run_progress(
            self.tiles_done,
            self.tiles_in_run,
            self.total_levels,
            self.bytes_encoded,
        );
        self.handler.on_progress(&event);
    }
}

/// Pyramid-to-DICOM conversion pipeline.
pub struct ConversionPipeline {
    config: ConversionConfig,
    progress: Box<dyn ProgressHandler>,
}

impl ConversionPipeline {
    /// Create a pipeline with the given configuration.
    pub fn new(config: ConversionConfig) -> Self {
        Self {
            config,
            progress: Box::new(NullProgress),
        }
    }

    /// Report progress to `handler` and poll it for cancellation.
    pub fn with_progress<H: ProgressHandler + 'static>(mut self, handler: H) -> Self {
        self.progress = Box::new(handler);
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// The progress handler.
    pub fn progress(&self) -> &dyn ProgressHandler {
        self.progress.as_ref()
    }

    /// Validate the configuration and source and resolve the run settings.
    pub fn plan(&self, source: &dyn SourceImageAdapter) -> Result<ConversionPlan> {
        self.config.validate()?;
        let levels = validate_pyramid(source)?;
        let base = levels[0];

        let (tile_width, tile_height) = match self.config.tile_size {
            Some(size) => (size, size),
            None => (base.tile_width, base.tile_height),
        };
        if tile_width > u16::MAX as u32 || tile_height > u16::MAX as u32 {
            return Err(DicomizeError::Config(format!(
                "{}x{} tiles exceed the DICOM Rows/Columns range",
                tile_width, tile_height
            )));
        }

        let hint = source.background_color();
        if self.config.background.is_none() && hint.is_none() {
            log::warn!("Source has no background color; padding with white");
        }
        let background = BackgroundColor::resolve(self.config.background, hint);

        let grids = levels
            .into_iter()
            .map(|level| LevelGrid::new(level, tile_width, tile_height))
            .collect();

        Ok(ConversionPlan {
            grids,
            tile_width,
            tile_height,
            background,
            codec: CodecAdapter::from_config(&self.config),
        })
    }

    /// Convert every level of `source`, passing each finished level to `sink`.
    ///
    /// The first error aborts the run; it is reported to the progress
    /// handler and returned.
    pub fn run<F>(&self, source: &dyn SourceImageAdapter, mut sink: F) -> Result<ConversionStats>
    where
        F: FnMut(LevelOutput) -> Result<()>,
    {
        match self.run_levels(source, &mut sink) {
            Ok(stats) => {
                log::info!(
                    "Converted {} levels, {} frames, {} -> {} bytes ({:.2}:1) in {} ms",
                    stats.levels,
                    stats.frames,
                    stats.raw_bytes,
                    stats.encoded_bytes,
                    stats.compression_ratio(),
                    stats.elapsed_ms
                );
                self.progress.on_complete(&stats);
                Ok(stats)
            }
            Err(e) => {
                log::error!("Conversion failed: {}", e);
                self.progress.on_error(&e, e.tile());
                Err(e)
            }
        }
    }

    /// Convert every level of `source` and collect the results.
    pub fn convert(&self, source: &dyn SourceImageAdapter) -> Result<Vec<LevelOutput>> {
        let mut outputs = Vec::new();
        self.run(source, |level| {
            outputs.push(level);
            Ok(())
        })?;
        Ok(outputs)
    }

    fn run_levels(
        &self,
        source: &dyn SourceImageAdapter,
        sink: &mut dyn FnMut(LevelOutput) -> Result<()>,
    ) -> Result<ConversionStats> {
        let start = Instant::now();
        let plan = self.plan(source)?;
        let binding = plan.binding();
        let workers = self.config.worker_count();

        log::info!(
            "Converting {} levels ({} tiles of {}x{}) to {} with {} worker(s)",
            plan.grids.len(),
            plan.total_tiles(),
            plan.tile_width,
            plan.tile_height,
            binding.name,
            workers
        );
        self.progress
            .on_progress(&ProgressEvent::reading(plan.grids.len()));

        let pool = if workers > 1 {
            Some(build_pool(workers)?)
        } else {
            None
        };
        let encoder = TileEncoder::new(plan.tile_width, plan.tile_height, plan.background, plan.codec);
        let mut tracker = RunTracker {
            handler: self.progress.as_ref(),
            total_levels: plan.grids.len(),
            tiles_in_run: plan.total_tiles(),
            tiles_done: 0,
            bytes_encoded: 0,
        };

        let mut stats = ConversionStats::default();
        for grid in &plan.grids {
            log::info!(
                "Level {}: {}x{} pixels, {}x{} tiles",
                grid.index(),
                grid.level.width,
                grid.level.height,
                grid.tiles_across,
                grid.tiles_down
            );
            let stream = self.encode_level(pool.as_ref(), source, &encoder, grid, &mut tracker)?;

            stats.levels += 1;
            stats.frames += stream.frame_count();
            stats.encoded_bytes += stream.payload_len();
            stats.raw_bytes += stream.frame_count() as u64
                * u64::from(plan.tile_width)
                * u64::from(plan.tile_height)
                * 3;

            tracker.phase(ProgressPhase::Writing, grid.index());
            sink(LevelOutput {
                grid: *grid,
                stream,
                binding,
            })?;
        }

        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        Ok(stats)
    }

    fn encode_level(
        &self,
        pool: Option<&ThreadPool>,
        source: &dyn SourceImageAdapter,
        encoder: &TileEncoder,
        grid: &LevelGrid,
        tracker: &mut RunTracker<'_>,
    ) -> Result<MultiFrameStream> {
        let mut assembler = MultiFrameAssembler::new(grid.index(), grid.tile_count());
        let mut push = |record: EncodedTileRecord| -> Result<()> {
            tracker.tile_done(grid, record.index, record.len());
            assembler.push(record)
        };

        match pool {
            Some(pool) => encode_level_parallel(
                pool,
                self.config.worker_count(),
                self.config.in_flight_limit(),
                source,
                encoder,
                grid,
                self.progress.as_ref(),
                &mut push,
            )?,
            None => {
                let sequencer =
                    PyramidTileSequencer::new(source, encoder, std::slice::from_ref(grid))
                        .with_cancellation(self.progress.as_ref());
                for record in sequencer {
                    push(record?)?;
                }
            }
        }

        tracker.phase(ProgressPhase::Assembling, grid.index());
        assembler.finish()
    }
}

fn build_pool(workers: usize) -> Result<ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|index| format!("tile-encoder-{}", index))
        .build()
        .map_err(|e| DicomizeError::Internal(format!("failed to start encoder threads: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodecChoice;
    use crate::error::TileCoord;
    use crate::pixel::PixelBuffer;
    use crate::progress::{CallbackProgress, ChannelProgress};
    use crate::source::ImagePyramidSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn config(codec: CodecChoice, workers: usize) -> ConversionConfig {
        ConversionConfig {
            workers: Some(workers),
            ..ConversionConfig::with_codec(codec)
        }
    }

    fn gradient(width: u32, height: u32) -> PixelBuffer {
        let data = (0..height)
            .flat_map(|y| (0..width).flat_map(move |x| [(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]))
            .collect();
        PixelBuffer::rgb8(width, height, data).unwrap()
    }

    #[test]
    fn test_two_level_uncompressed_scenario() {
        let source = ImagePyramidSource::from_levels(
            vec![
                PixelBuffer::filled(512, 512, 3, 8, BackgroundColor::WHITE),
                PixelBuffer::filled(256, 256, 3, 8, BackgroundColor::WHITE),
            ],
            256,
            256,
        )
        .unwrap();

        let outputs = ConversionPipeline::new(config(CodecChoice::Uncompressed, 1))
            .convert(&source)
            .unwrap();

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].stream.frame_count(), 4);
        assert_eq!(outputs[1].stream.frame_count(), 1);

        let frame = 256 * 256 * 3;
        let item = 8 + frame as u32;
        assert_eq!(outputs[0].stream.offsets(), &[0, item, 2 * item, 3 * item]);
        assert!(outputs[0].stream.frames().iter().all(|f| f.len() == frame));
        assert_eq!(outputs[0].bits_allocated(), 8);
        assert!(!outputs[0].binding.encapsulated);
    }

    #[test]
    fn test_transparent_tile_becomes_background() {
        let pixels = PixelBuffer::rgba8(4, 4, [10, 200, 30, 0].repeat(16)).unwrap();
        let source = ImagePyramidSource::from_levels(vec![pixels], 4, 4).unwrap();
        let config = ConversionConfig {
            background: Some([255, 0, 0]),
            ..config(CodecChoice::Uncompressed, 1)
        };

        let outputs = ConversionPipeline::new(config).convert(&source).unwrap();
        let frame = &outputs[0].stream.frames()[0];
        assert_eq!(frame.len(), 48);
        assert!(frame.chunks(3).all(|px| px == [255, 0, 0]));
    }

    #[test]
    fn test_background_hint_pads_edges() {
        let source = ImagePyramidSource::from_levels(vec![gradient(5, 3)], 4, 4)
            .unwrap()
            .with_background([9, 8, 7]);

        let outputs = ConversionPipeline::new(config(CodecChoice::Uncompressed, 1))
            .convert(&source)
            .unwrap();
        let edge = &outputs[0].stream.frames()[1];
        // Column 0 of tile 1 is source column 4; the rest is padding.
        assert_eq!(&edge[0..3], &[4, 0, 4]);
        assert_eq!(&edge[3..6], &[9, 8, 7]);
        assert_eq!(&edge[edge.len() - 3..], &[9, 8, 7]);
    }

    #[test]
    fn test_frame_counts_match_grids() {
        let source = ImagePyramidSource::from_levels(
            vec![gradient(300, 200), gradient(150, 100), gradient(75, 50)],
            64,
            64,
        )
        .unwrap();
        let pipeline = ConversionPipeline::new(config(CodecChoice::Uncompressed, 1));
        let plan = pipeline.plan(&source).unwrap();
        let outputs = pipeline.convert(&source).unwrap();

        for (output, grid) in outputs.iter().zip(&plan.grids) {
            let expected = (grid.level.width.div_ceil(64) * grid.level.height.div_ceil(64)) as usize;
            assert_eq!(output.stream.frame_count(), expected);
            assert_eq!(output.stream.offsets().len(), expected);
        }
        assert_eq!(plan.total_tiles(), 5 * 4 + 3 * 2 + 2);
    }

    #[test]
    fn test_parallel_matches_serial() {
        let source = ImagePyramidSource::from_levels(
            vec![gradient(200, 130), gradient(100, 65)],
            32,
            32,
        )
        .unwrap();

        for codec in [CodecChoice::Jpeg, CodecChoice::Jpeg2000Lossless] {
            let serial = ConversionPipeline::new(config(codec, 1)).convert(&source).unwrap();
            let parallel = ConversionPipeline::new(ConversionConfig {
                max_in_flight: Some(3),
                ..config(codec, 4)
            })
            .convert(&source)
            .unwrap();

            assert_eq!(serial.len(), parallel.len());
            for (a, b) in serial.iter().zip(&parallel) {
                assert_eq!(a.stream, b.stream);
            }
        }
    }

    #[test]
    fn test_jpeg_frames_decode() {
        let source = ImagePyramidSource::from_levels(vec![gradient(64, 64)], 32, 32).unwrap();
        let outputs = ConversionPipeline::new(config(CodecChoice::Jpeg, 2))
            .convert(&source)
            .unwrap();

        for frame in outputs[0].stream.frames() {
            let image = image::load_from_memory(frame).unwrap();
            assert_eq!((image.width(), image.height()), (32, 32));
        }
        assert_eq!(outputs[0].binding.photometric_interpretation, "YBR_FULL_422");
    }

    #[test]
    fn test_jpeg2000_frames_are_codestreams() {
        let source = ImagePyramidSource::from_levels(vec![gradient(40, 24)], 16, 16).unwrap();
        let outputs = ConversionPipeline::new(config(CodecChoice::Jpeg2000, 1))
            .convert(&source)
            .unwrap();

        assert_eq!(outputs[0].stream.frame_count(), 6);
        for frame in outputs[0].stream.frames() {
            assert_eq!(&frame[..2], &[0xFF, 0x4F]);
            assert_eq!(&frame[frame.len() - 2..], &[0xFF, 0xD9]);
        }
    }

    #[test]
    fn test_cancellation_is_reported() {
        let source = ImagePyramidSource::from_levels(vec![gradient(64, 64)], 16, 16).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(Mutex::new(Vec::new()));

        let progress = {
            let seen = seen.clone();
            let failures = failures.clone();
            CallbackProgress::new(move |event| {
                if event.phase == ProgressPhase::Encoding {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_error(move |error, _| failures.lock().unwrap().push(error.to_string()))
        };
        progress.cancel();

        let err = ConversionPipeline::new(config(CodecChoice::Uncompressed, 1))
            .with_progress(progress)
            .convert(&source)
            .unwrap_err();
        assert!(matches!(err, DicomizeError::Cancelled { level: 0 }));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(failures.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_callback_run_ends_with_terminal_phase() {
        let source = ImagePyramidSource::from_levels(vec![gradient(32, 32)], 16, 16).unwrap();
        let phases = Arc::new(Mutex::new(Vec::new()));
        let recorder = {
            let phases = phases.clone();
            move || {
                let phases = phases.clone();
                CallbackProgress::new(move |event| phases.lock().unwrap().push(event.phase))
            }
        };

        ConversionPipeline::new(config(CodecChoice::Uncompressed, 1))
            .with_progress(recorder())
            .convert(&source)
            .unwrap();
        assert_eq!(phases.lock().unwrap().last(), Some(&ProgressPhase::Complete));

        phases.lock().unwrap().clear();
        let cancelled = recorder();
        cancelled.cancel();
        ConversionPipeline::new(config(CodecChoice::Uncompressed, 1))
            .with_progress(cancelled)
            .convert(&source)
            .unwrap_err();
        assert_eq!(phases.lock().unwrap().last(), Some(&ProgressPhase::Failed));
    }

    #[test]
    fn test_source_error_carries_tile() {
        struct Broken(ImagePyramidSource);

        impl SourceImageAdapter for Broken {
            fn level_count(&self) -> usize {
                self.0.level_count()
            }
            fn level_info(&self, level: usize) -> Result<crate::source::PyramidLevel> {
                self.0.level_info(level)
            }
            fn read_region(&self, level: usize, x: u32, y: u32, w: u32, h: u32) -> Result<PixelBuffer> {
                if level == 1 && x > 0 {
                    return Err(DicomizeError::source_read("bad sector"));
                }
                self.0.read_region(level, x, y, w, h)
            }
        }

        let source = Broken(
            ImagePyramidSource::from_levels(vec![gradient(64, 32), gradient(32, 16)], 16, 16)
                .unwrap(),
        );
        let err = ConversionPipeline::new(config(CodecChoice::Uncompressed, 1))
            .convert(&source)
            .unwrap_err();
        assert_eq!(err.tile(), Some(TileCoord::new(1, 0, 1)));
    }

    #[test]
    fn test_progress_events_and_stats() {
        let source = ImagePyramidSource::from_levels(vec![gradient(32, 32), gradient(16, 16)], 16, 16)
            .unwrap();
        let (progress, receiver) = ChannelProgress::new();

        let stats = ConversionPipeline::new(config(CodecChoice::Uncompressed, 1))
            .with_progress(progress)
            .run(&source, |_| Ok(()))
            .unwrap();

        assert_eq!(stats.levels, 2);
        assert_eq!(stats.frames, 5);
        assert_eq!(stats.raw_bytes, 5 * 16 * 16 * 3);
        assert_eq!(stats.encoded_bytes, stats.raw_bytes);
        assert!((stats.compression_ratio() - 1.0).abs() < 1e-9);

        let events: Vec<_> = receiver.until_finished().collect();
        assert_eq!(events.first().map(|e| e.phase), Some(ProgressPhase::Reading));
        assert_eq!(events.last().map(|e| e.phase), Some(ProgressPhase::Complete));
        let encoded = events
            .iter()
            .filter(|e| e.phase == ProgressPhase::Encoding)
            .count();
        assert_eq!(encoded, 5);
        let last_tile = events
            .iter()
            .filter(|e| e.phase == ProgressPhase::Encoding)
            .last()
            .unwrap();
        assert!((last_tile.overall_progress - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_pyramid_is_rejected() {
        let source = ImagePyramidSource::from_levels(vec![gradient(16, 16), gradient(16, 16)], 8, 8)
            .unwrap();
        let err = ConversionPipeline::new(ConversionConfig::default())
            .plan(&source)
            .unwrap_err();
        assert!(matches!(err, DicomizeError::InvalidPyramid(_)));
    }

    #[test]
    fn test_tile_size_override() {
        let source = ImagePyramidSource::from_levels(vec![gradient(100, 100)], 256, 256).unwrap();
        let config = ConversionConfig {
            tile_size: Some(40),
            ..ConversionConfig::default()
        };
        let plan = ConversionPipeline::new(config).plan(&source).unwrap();
        assert_eq!((plan.tile_width, plan.tile_height), (40, 40));
        assert_eq!(plan.grids[0].tile_count(), 9);
    }
}
