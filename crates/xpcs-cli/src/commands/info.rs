use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use xpcs_core::io::StackReader;
use xpcs_core::params::CorrelatorParams;

use super::read_mask;

#[derive(Args)]
pub struct InfoArgs {
    /// Input frame stack (.xstk)
    pub file: PathBuf,

    /// Bin mask image; prints the pixel count of every bin
    #[arg(long)]
    pub mask: Option<PathBuf>,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let reader = StackReader::open(&args.file)
        .with_context(|| format!("Failed to open stack {}", args.file.display()))?;
    let header = &reader.header;
    let (rows, cols) = header.shape();

    println!("File:        {}", args.file.display());
    println!("Version:     {}", header.version);
    println!("Frames:      {}", header.n_frames);
    println!("Dimensions:  {}x{}", cols, rows);
    println!("Sample type: {}", header.sample_type);

    let total_mb =
        (header.frame_byte_size() * reader.frame_count()) as f64 / (1024.0 * 1024.0);
    println!("Data size:   {:.1} MB", total_mb);

    let mask = read_mask(args.mask.as_deref())?;
    if mask.is_some() {
        let params = CorrelatorParams::new((rows, cols), reader.frame_count(), mask, None)
            .context("Mask does not fit the stack")?;
        println!("Bins:        {}", params.n_bins());
        for &bin in params.bins() {
            println!("  {:<10} {} px", bin.to_string(), params.pixel_count(bin)?);
        }
    }

    Ok(())
}
