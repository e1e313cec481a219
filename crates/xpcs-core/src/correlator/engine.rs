use ndarray::{Array1, Array2, ArrayView3};
use num_traits::AsPrimitive;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::bins::{extract_pixels, Bin};
use crate::config::{CorrelationMethod, CorrelatorConfig};
use crate::consts::PARALLEL_BIN_THRESHOLD;
use crate::error::Result;
use crate::params::CorrelatorParams;

use super::dense::dense_correlation;
use super::{build_algorithm, CorrelationAlgorithm};

/// Linear-lag intensity autocorrelation over every bin of a frame stack.
///
/// The result of [`Correlator::correlate`] has one row per bin, in the order
/// of [`CorrelatorParams::bins`], and one column per lag in frames.
pub struct Correlator {
    params: CorrelatorParams,
    config: CorrelatorConfig,
    algorithm: Box<dyn CorrelationAlgorithm>,
}

impl Correlator {
    pub fn new(params: CorrelatorParams, config: &CorrelatorConfig) -> Result<Self> {
        let algorithm = build_algorithm(&params, config)?;
        info!(
            method = %config.method,
            backend = algorithm.backend_name(),
            n_bins = params.n_bins(),
            n_frames = params.n_frames(),
            "correlator ready"
        );
        Ok(Self {
            params,
            config: config.clone(),
            algorithm,
        })
    }

    pub fn correlate<A>(&mut self, frames: ArrayView3<'_, A>) -> Result<Array2<f32>>
    where
        A: AsPrimitive<f32> + Sync,
    {
        self.correlate_with_progress(frames, |_, _| {})
    }

    /// Like [`correlate`](Self::correlate), calling `progress(done, total)`
    /// after every finished bin.
    pub fn correlate_with_progress<A, F>(
        &mut self,
        frames: ArrayView3<'_, A>,
        mut progress: F,
    ) -> Result<Array2<f32>>
    where
        A: AsPrimitive<f32> + Sync,
        F: FnMut(usize, usize),
    {
        self.params.validate_frames(frames.dim())?;
        let total = self.params.n_bins();
        let mut result = Array2::<f32>::zeros((total, self.params.n_frames()));

        if self.runs_bins_in_parallel() {
            debug!(total, "correlating bins on the Rayon pool");
            let params = &self.params;
            let curves: Vec<Array1<f32>> = params
                .bins()
                .par_iter()
                .map(|&bin| -> Result<Array1<f32>> {
                    let pixels = extract_pixels(frames, params.pixels(bin)?);
                    Ok(dense_correlation(pixels.view(), params.scale_factor(bin)?))
                })
                .collect::<Result<_>>()?;
            for (i, curve) in curves.iter().enumerate() {
                result.row_mut(i).assign(curve);
                progress(i + 1, total);
            }
            return Ok(result);
        }

        let bins = self.params.bins().to_vec();
        for (i, &bin) in bins.iter().enumerate() {
            let curve = self.run_bin(frames, bin)?;
            result.row_mut(i).assign(&curve);
            progress(i + 1, total);
        }
        Ok(result)
    }

    /// Curve of a single bin.
    pub fn correlate_bin<A>(&mut self, frames: ArrayView3<'_, A>, bin: Bin) -> Result<Array1<f32>>
    where
        A: AsPrimitive<f32> + Sync,
    {
        self.params.bin_index(bin)?;
        self.params.validate_frames(frames.dim())?;
        self.run_bin(frames, bin)
    }

    /// Evict the FFT plan of `bin`, or every plan when `bin` is `None`.
    pub fn flush_plans(&mut self, bin: Option<Bin>) -> Result<()> {
        if let Some(bin) = bin {
            self.params.bin_index(bin)?;
        }
        self.algorithm.flush_plans(bin)
    }

    pub fn method(&self) -> CorrelationMethod {
        self.config.method
    }

    pub fn backend_name(&self) -> &str {
        self.algorithm.backend_name()
    }

    pub fn params(&self) -> &CorrelatorParams {
        &self.params
    }

    fn runs_bins_in_parallel(&self) -> bool {
        self.config.parallel_bins
            && self.config.method == CorrelationMethod::DenseReference
            && self.params.n_bins() >= PARALLEL_BIN_THRESHOLD
    }

    fn run_bin<A>(&mut self, frames: ArrayView3<'_, A>, bin: Bin) -> Result<Array1<f32>>
    where
        A: AsPrimitive<f32> + Sync,
    {
        let selection = self.params.pixels(bin)?;
        let scale = self.params.scale_factor(bin)?;
        let pixels = extract_pixels(frames, selection);
        debug!(%bin, n_pixels = pixels.ncols(), algorithm = self.algorithm.name(), "correlating bin");
        self.algorithm.correlate_bin(pixels.view(), bin, scale)
    }
}
