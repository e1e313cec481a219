pub mod config;
pub mod correlate;
pub mod info;

use std::path::Path;

use anyhow::{Context, Result};
use ndarray::Array2;
use xpcs_core::io::load_mask;

/// Load an optional bin mask image, with the path in the error context.
pub fn read_mask(path: Option<&Path>) -> Result<Option<Array2<u32>>> {
    path.map(|p| {
        load_mask(p).with_context(|| format!("Failed to read mask {}", p.display()))
    })
    .transpose()
}
