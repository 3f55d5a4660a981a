//! Whole-slide image to DICOM conversion tool.

use clap::Parser;
use std::process::ExitCode;
use wsi_dicomize::cli::{run, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
