use std::fmt;

use serde::{Deserialize, Serialize};

use crate::compute::DevicePreference;

/// Which correlation algorithm a [`Correlator`](crate::correlator::engine::Correlator) runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrelationMethod {
    /// Host-only matrix product with a sequential diagonal loop.
    DenseReference,
    /// Matrix products and diagonal reduction on a compute backend.
    DenseAccelerated,
    /// Zero-padded FFT (Wiener–Khinchin) on a compute backend.
    #[default]
    Spectral,
}

impl fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DenseReference => write!(f, "Dense (reference)"),
            Self::DenseAccelerated => write!(f, "Dense (accelerated)"),
            Self::Spectral => write!(f, "Spectral (FFT)"),
        }
    }
}

/// How upper-diagonal sums are reduced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagonalStrategy {
    /// Scatter into an (N, N) staging buffer, then sum each staging row.
    #[default]
    Staged,
    /// Reduce every diagonal straight into its output slot; no staging memory.
    Direct,
}

impl fmt::Display for DiagonalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Staged => write!(f, "Staged"),
            Self::Direct => write!(f, "Direct"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    pub method: CorrelationMethod,
    pub device: DevicePreference,
    pub diagonal_strategy: DiagonalStrategy,
    /// Build every FFT plan at construction instead of on first use.
    pub precompute_plans: bool,
    /// Keep FFT plans between calls. When false, plans are rebuilt per bin.
    pub save_plans: bool,
    /// Evaluate independent bins on the Rayon pool (reference dense method only).
    pub parallel_bins: bool,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            method: CorrelationMethod::default(),
            device: DevicePreference::default(),
            diagonal_strategy: DiagonalStrategy::default(),
            precompute_plans: false,
            save_plans: true,
            parallel_bins: false,
        }
    }
}

impl CorrelatorConfig {
    pub fn with_method(method: CorrelationMethod) -> Self {
        Self {
            method,
            ..Default::default()
        }
    }
}
