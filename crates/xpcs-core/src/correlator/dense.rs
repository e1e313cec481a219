use std::sync::Arc;

use ndarray::{Array1, ArrayView2, Axis};

use crate::bins::Bin;
use crate::compute::{ComputeBackend, DeviceBuffer};
use crate::config::DiagonalStrategy;
use crate::error::{Result, XpcsError};

use super::reduction::upper_diagonal_sum;
use super::CorrelationAlgorithm;

/// Dense correlation of one bin, computed on the host.
///
/// `pixels` is the `(n_frames, n_pixels)` intensity matrix `X`. With the
/// per-frame means `m`, `Num = X·Xᵀ` and `Den = m·mᵀ`; entry `(i, j)` of
/// either matrix pairs frame `i` with frame `j`, so the `k`-th upper diagonal
/// collects every pair at lag `k`:
///
/// `curve[k] = Σdiag_k(Num) / Σdiag_k(Den) / n_pixels / scale`
///
/// Every lag, including the single pair at `n_frames - 1`, is evaluated the
/// same way.
pub fn dense_correlation(pixels: ArrayView2<'_, f32>, scale: f32) -> Array1<f32> {
    let (n_frames, n_pixels) = pixels.dim();
    let means = pixels
        .mean_axis(Axis(1))
        .unwrap_or_else(|| Array1::from_elem(n_frames, f32::NAN));

    let numerator = pixels.dot(&pixels.t());
    let column = means.view().insert_axis(Axis(1));
    let denominator = column.dot(&column.t());

    let norm = n_pixels as f64 * scale as f64;
    Array1::from_shape_fn(n_frames, |k| {
        let num = upper_diagonal_sum(numerator.view(), k);
        let den = upper_diagonal_sum(denominator.view(), k);
        (num / den / norm) as f32
    })
}

/// Host-only dense correlator. Stateless, so bins can run in any order.
#[derive(Clone, Copy, Debug, Default)]
pub struct DenseReference;

impl CorrelationAlgorithm for DenseReference {
    fn name(&self) -> &str {
        "dense-reference"
    }

    fn correlate_bin(
        &mut self,
        pixels: ArrayView2<'_, f32>,
        bin: Bin,
        scale: f32,
    ) -> Result<Array1<f32>> {
        if pixels.ncols() == 0 {
            return Err(XpcsError::EmptyBin { bin });
        }
        Ok(dense_correlation(pixels, scale))
    }
}

/// Dense correlator running its products and reductions on a compute backend.
///
/// With the staged strategy one `(n_frames, n_frames)` staging buffer is
/// allocated up front and reused by every reduction of every bin.
pub struct DenseAccelerated {
    backend: Arc<dyn ComputeBackend>,
    n_frames: usize,
    staging: Option<DeviceBuffer>,
}

impl DenseAccelerated {
    pub fn new(
        backend: Arc<dyn ComputeBackend>,
        n_frames: usize,
        strategy: DiagonalStrategy,
    ) -> Result<Self> {
        let staging = match strategy {
            DiagonalStrategy::Staged => Some(backend.zeros(n_frames, n_frames)?),
            DiagonalStrategy::Direct => None,
        };
        tracing::debug!(
            backend = backend.name(),
            %strategy,
            n_frames,
            "dense accelerated correlator"
        );
        Ok(Self {
            backend,
            n_frames,
            staging,
        })
    }
}

impl CorrelationAlgorithm for DenseAccelerated {
    fn name(&self) -> &str {
        "dense-accelerated"
    }

    fn backend_name(&self) -> &str {
        self.backend.name()
    }

    fn correlate_bin(
        &mut self,
        pixels: ArrayView2<'_, f32>,
        bin: Bin,
        scale: f32,
    ) -> Result<Array1<f32>> {
        let (n_frames, n_pixels) = pixels.dim();
        if n_pixels == 0 {
            return Err(XpcsError::EmptyBin { bin });
        }
        if n_frames != self.n_frames {
            return Err(XpcsError::ShapeMismatch {
                what: "bin pixel matrix",
                expected: vec![self.n_frames, n_pixels],
                found: vec![n_frames, n_pixels],
            });
        }

        let backend = &*self.backend;
        let x = backend.upload(pixels)?;
        let outer = backend.matmul_transposed(&x, &x)?;
        let means = backend.row_means(&x)?;
        let denom_matrix = backend.matmul_transposed(&means, &means)?;

        let num_sums = backend.sum_diagonals(&outer, self.staging.as_mut())?;
        let den_sums = backend.sum_diagonals(&denom_matrix, self.staging.as_mut())?;
        let curve = backend.divide_scaled(&num_sums, &den_sums, n_pixels as f32 * scale)?;

        let host = backend.download(&curve)?;
        Ok(host.row(0).to_owned())
    }
}
