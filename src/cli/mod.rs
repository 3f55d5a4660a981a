//! Command-line interface for the whole-slide DICOM conversion tool.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::{CodecChoice, ConversionConfig};
use crate::dicom::{transfer_syntax_name, SampleInfo, SpecimenInfo, WsiDatasetBuilder};
use crate::pipeline::{ConversionPipeline, ConversionPlan, ConversionStats};
use crate::progress::{CallbackProgress, ProgressPhase};
use crate::source::{validate_pyramid, ImagePyramidSource, SourceImageAdapter, DEFAULT_TILE_SIZE};

/// Whole-slide image to DICOM converter
///
/// Re-encodes every tile of an image pyramid with the chosen codec and
/// writes one multi-frame VL Whole Slide Microscopy instance per level.
#[derive(Parser, Debug)]
#[command(name = "wsidicomize")]
#[command(author = "Medical Imaging Team")]
#[command(version)]
#[command(about = "Convert pyramidal whole-slide images to tiled DICOM")]
#[command(long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert an image pyramid into DICOM instances
    Convert {
        /// Input image path
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory for the level instances
        #[arg(short, long)]
        output: PathBuf,

        /// Codec for the tile frames
        #[arg(short, long, value_enum)]
        codec: Option<CodecArg>,

        /// Quality for lossy codecs (1-100)
        #[arg(short = 'Q', long)]
        quality: Option<u8>,

        /// Tile width and height in pixels
        #[arg(short, long)]
        tile_size: Option<u32>,

        /// Background color for padding and transparency, as "r,g,b"
        #[arg(short, long, value_parser = parse_color)]
        background: Option<[u8; 3]>,

        /// Number of pyramid levels to build
        #[arg(short, long)]
        levels: Option<usize>,

        /// Encoding worker threads (1 encodes serially)
        #[arg(short, long)]
        workers: Option<usize>,

        /// TOML configuration file; command-line flags take precedence
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the conversion plan without encoding anything
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        specimen: SpecimenArgs,
    },

    /// Show the pyramid an input image would produce
    Info {
        /// Input image path
        #[arg(short, long)]
        input: PathBuf,

        /// Tile width and height in pixels
        #[arg(short, long, default_value_t = DEFAULT_TILE_SIZE)]
        tile_size: u32,

        /// Number of pyramid levels to build
        #[arg(short, long)]
        levels: Option<usize>,

        /// Print the levels as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Slide and first-sample description; further samples come from the config file.
#[derive(Args, Debug, Default)]
pub struct SpecimenArgs {
    /// Container identifier of the slide
    #[arg(long)]
    pub slide_id: Option<String>,

    /// Identifier of the sample on the slide
    #[arg(long)]
    pub sample_id: Option<String>,

    /// Embedding medium of the sample, e.g. "Paraffin wax"
    #[arg(long)]
    pub embedding_medium: Option<String>,

    /// Fixative of the sample, e.g. "Formalin"
    #[arg(long)]
    pub fixative: Option<String>,

    /// Stain applied to the sample; repeat for several stains
    #[arg(long = "stain")]
    pub stains: Vec<String>,
}

impl SpecimenArgs {
    /// Overlay the flags onto `specimen`, editing its first sample.
    pub fn apply(self, specimen: &mut SpecimenInfo) {
        if let Some(slide_id) = self.slide_id {
            specimen.slide_id = slide_id;
        }
        if self.sample_id.is_none()
            && self.embedding_medium.is_none()
            && self.fixative.is_none()
            && self.stains.is_empty()
        {
            return;
        }
        if specimen.samples.is_empty() {
            specimen.samples.push(SampleInfo::new("sample"));
        }
        let sample = &mut specimen.samples[0];
        if let Some(id) = self.sample_id {
            sample.id = id;
        }
        if self.embedding_medium.is_some() {
            sample.embedding_medium = self.embedding_medium;
        }
        if self.fixative.is_some() {
            sample.fixative = self.fixative;
        }
        if !self.stains.is_empty() {
            sample.stainings = self.stains;
        }
    }
}

/// Codec argument.
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum CodecArg {
    /// Explicit VR little endian, no compression
    Uncompressed,
    /// Baseline JPEG (lossy)
    Jpeg,
    /// JPEG 2000 reversible
    Jpeg2000Lossless,
    /// JPEG 2000 irreversible
    Jpeg2000,
}

impl From<CodecArg> for CodecChoice {
    fn from(arg: CodecArg) -> Self {
        match arg {
            CodecArg::Uncompressed => CodecChoice::Uncompressed,
            CodecArg::Jpeg => CodecChoice::Jpeg,
            CodecArg::Jpeg2000Lossless => CodecChoice::Jpeg2000Lossless,
            CodecArg::Jpeg2000 => CodecChoice::Jpeg2000,
        }
    }
}

fn parse_color(text: &str) -> std::result::Result<[u8; 3], String> {
    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!("expected \"r,g,b\", got \"{}\"", text));
    }
    let mut color = [0u8; 3];
    for (slot, part) in color.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|_| format!("\"{}\" is not a value in 0-255", part))?;
    }
    Ok(color)
}

/// Run the CLI application.
pub fn run(cli: Cli) -> Result<()> {
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
            .init();
    } else if !cli.quiet {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .init();
    }

    match cli.command {
        Commands::Convert {
            input,
            output,
            codec,
            quality,
            tile_size,
            background,
            levels,
            workers,
            config,
            dry_run,
            specimen,
        } => {
            let mut settings = match config {
                Some(path) => ConversionConfig::from_toml_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => ConversionConfig::default(),
            };
            if let Some(codec) = codec {
                settings.codec = codec.into();
            }
            if let Some(quality) = quality {
                match settings.codec {
                    CodecChoice::Jpeg => settings.jpeg_quality = quality,
                    CodecChoice::Jpeg2000 => settings.jpeg2000_quality = quality,
                    CodecChoice::Uncompressed | CodecChoice::Jpeg2000Lossless => {
                        log::warn!("--quality has no effect on lossless output")
                    }
                }
            }
            settings.tile_size = tile_size.or(settings.tile_size);
            settings.background = background.or(settings.background);
            settings.levels = levels.or(settings.levels);
            settings.workers = workers.or(settings.workers);
            specimen.apply(&mut settings.specimen);
            settings.validate()?;

            run_convert(&input, &output, settings, dry_run, cli.quiet)
        }
        Commands::Info {
            input,
            tile_size,
            levels,
            json,
        } => run_info(&input, tile_size, levels, json, cli.quiet),
    }
}

fn open_source(input: &Path, config: &ConversionConfig) -> Result<ImagePyramidSource> {
    let tile_size = config.tile_size.unwrap_or(DEFAULT_TILE_SIZE);
    ImagePyramidSource::open(input, tile_size, config.levels)
        .with_context(|| format!("reading {}", input.display()))
}

fn run_convert(
    input: &Path,
    output: &Path,
    config: ConversionConfig,
    dry_run: bool,
    quiet: bool,
) -> Result<()> {
    let source = open_source(input, &config)?;
    let builder = WsiDatasetBuilder::new().specimen(&config.specimen)?;
    let pipeline = ConversionPipeline::new(config);
    let plan = pipeline.plan(&source)?;

    if dry_run {
        if !quiet {
            print_plan(input, &plan);
        }
        return Ok(());
    }

    fs::create_dir_all(output)
        .with_context(|| format!("creating {}", output.display()))?;
    let writer = builder.build();

    let bar = if quiet {
        ProgressBar::hidden()
    } else {
        progress_bar(plan.total_tiles() as u64)
    };
    let events = bar.clone();
    let pipeline = pipeline.with_progress(CallbackProgress::new(move |event| {
        match event.phase {
            ProgressPhase::Encoding => {
                if let Some(level) = event.level {
                    events.set_message(format!("level {}", level));
                }
                events.inc(1);
            }
            ProgressPhase::Complete => events.finish_with_message("done"),
            ProgressPhase::Failed => events.abandon_with_message("failed"),
            _ => {}
        }
    }));

    let mut written = Vec::new();
    let stats = pipeline.run(&source, |level| {
        written.push(writer.write_level(level, output)?);
        Ok(())
    })?;

    if !quiet {
        print_stats(&plan, &stats, &written);
    }
    Ok(())
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{spinner} {msg:>10} [{bar:40}] {pos}/{len} tiles ({eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn print_plan(input: &Path, plan: &ConversionPlan) {
    let binding = plan.binding();
    println!("Conversion Plan: {}", input.display());
    println!("========================================");
    println!("  Transfer Syntax: {} ({})", binding.name, binding.uid);
    println!("  Photometric: {}", binding.photometric_interpretation);
    println!("  Tile Size: {}x{}", plan.tile_width, plan.tile_height);
    let bg = plan.background.to_array();
    println!("  Background: {},{},{}", bg[0], bg[1], bg[2]);
    println!();
    for grid in &plan.grids {
        println!(
            "  Level {}: {}x{} px, downsample {:.2}, {}x{} tiles ({} frames)",
            grid.index(),
            grid.level.width,
            grid.level.height,
            grid.level.downsample,
            grid.tiles_across,
            grid.tiles_down,
            grid.tile_count()
        );
    }
    println!();
    println!("  Total Frames: {}", plan.total_tiles());
}

fn print_stats(plan: &ConversionPlan, stats: &ConversionStats, written: &[PathBuf]) {
    let binding = plan.binding();
    let name = transfer_syntax_name(binding.uid).unwrap_or_else(|| binding.name.to_string());
    println!("Conversion Result:");
    println!("  Transfer Syntax: {}", name);
    println!("  Levels: {}", stats.levels);
    println!("  Frames: {}", stats.frames);
    println!(
        "  Raw Size: {} bytes ({:.2} MB)",
        stats.raw_bytes,
        stats.raw_bytes as f64 / 1_048_576.0
    );
    println!(
        "  Encoded Size: {} bytes ({:.2} MB)",
        stats.encoded_bytes,
        stats.encoded_bytes as f64 / 1_048_576.0
    );
    println!("  Compression Ratio: {:.2}:1", stats.compression_ratio());
    println!("  Space Savings: {:.1}%", stats.space_savings_percent());
    println!("  Time: {} ms", stats.elapsed_ms);
    println!();
    println!("Files:");
    for path in written {
        println!("  {}", path.display());
    }
}

fn run_info(
    input: &Path,
    tile_size: u32,
    levels: Option<usize>,
    json: bool,
    quiet: bool,
) -> Result<()> {
    if tile_size == 0 {
        bail!("tile size must be positive");
    }
    let source = ImagePyramidSource::open(input, tile_size, levels)
        .with_context(|| format!("reading {}", input.display()))?;
    let pyramid = validate_pyramid(&source)?;

    if quiet {
        return Ok(());
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&pyramid)?);
        return Ok(());
    }

    println!("Pyramid Information");
    println!("===================");
    println!("File: {}", input.display());
    match source.background_color() {
        Some([r, g, b]) => println!("Background: {},{},{}", r, g, b),
        None => println!("Background: (none)"),
    }
    println!();
    for level in &pyramid {
        println!(
            "  Level {}: {}x{} px, downsample {:.2}, {} tiles of {}x{}",
            level.index,
            level.width,
            level.height,
            level.downsample,
            level.tile_count(level.tile_width, level.tile_height),
            level.tile_width,
            level.tile_height
        );
    }
    Ok(())
}
