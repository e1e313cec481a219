use thiserror::Error;

use crate::bins::Bin;

#[derive(Error, Debug)]
pub enum XpcsError {
    #[error("Shape mismatch for {what}: expected {expected:?}, got {found:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Bin {bin} contains no pixels")]
    EmptyBin { bin: Bin },

    #[error("Unknown bin: {0}")]
    UnknownBin(Bin),

    #[error("Missing compute facility: {0}")]
    MissingFacility(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid stack file: {0}")]
    InvalidStack(String),

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, XpcsError>;
