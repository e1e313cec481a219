pub mod dense;
pub mod engine;
pub mod plan_cache;
pub mod reduction;
pub mod spectral;

use ndarray::{Array1, ArrayView2};

use crate::bins::Bin;
use crate::compute::create_backend;
use crate::config::{CorrelationMethod, CorrelatorConfig};
use crate::error::Result;
use crate::params::CorrelatorParams;

pub use dense::{dense_correlation, DenseAccelerated, DenseReference};
pub use engine::Correlator;
pub use plan_cache::PlanCache;
pub use spectral::SpectralCorrelator;

/// One way of turning a bin's `(n_frames, n_pixels)` matrix into its
/// normalized intensity autocorrelation curve.
pub trait CorrelationAlgorithm: Send {
    fn name(&self) -> &str;

    /// Curve of length `n_frames` for one bin, divided by `n_pixels * scale`.
    fn correlate_bin(
        &mut self,
        pixels: ArrayView2<'_, f32>,
        bin: Bin,
        scale: f32,
    ) -> Result<Array1<f32>>;

    /// Drop cached transform plans. Algorithms without plans ignore this.
    fn flush_plans(&mut self, _bin: Option<Bin>) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "host/ndarray"
    }
}

/// Build the algorithm selected by `config.method`.
pub fn build_algorithm(
    params: &CorrelatorParams,
    config: &CorrelatorConfig,
) -> Result<Box<dyn CorrelationAlgorithm>> {
    let algorithm: Box<dyn CorrelationAlgorithm> = match config.method {
        CorrelationMethod::DenseReference => Box::new(DenseReference),
        CorrelationMethod::DenseAccelerated => {
            let backend = create_backend(&config.device)?;
            Box::new(DenseAccelerated::new(
                backend,
                params.n_frames(),
                config.diagonal_strategy,
            )?)
        }
        CorrelationMethod::Spectral => {
            let backend = create_backend(&config.device)?;
            Box::new(SpectralCorrelator::new(
                backend,
                params,
                config.precompute_plans,
                config.save_plans,
            )?)
        }
    };
    Ok(algorithm)
}
