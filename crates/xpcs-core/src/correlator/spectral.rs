//! Spectral (FFT) correlation.
//!
//! The bin matrix `X` of shape `(T, P)` is flattened row-major into a signal
//! `x` of length `L = T * P`. The linear correlation of `x` with itself,
//! computed as `IFFT(FFT(pad(x)) * FFT(pad(reverse(x))))` over `N >= 2L`
//! points, gives `R[n] = Σ_m x[m] * x[m + L - 1 - n]`. A lag of `k` frames is
//! a flat lag of `k * P`, which pairs every pixel with itself `k` frames
//! later, so the numerator of lag `k` sits at `R[L - 1 - k * P]`.

use std::collections::BTreeMap;
use std::sync::Arc;

use ndarray::{s, Array1, ArrayView1, ArrayView2, Axis};

use crate::bins::Bin;
use crate::compute::{ComputeBackend, DeviceBuffer, FftDirection, FftPlan};
use crate::error::{Result, XpcsError};
use crate::params::CorrelatorParams;

use super::plan_cache::PlanCache;
use super::CorrelationAlgorithm;

/// Transform length for a bin of `n_pixels` over `n_frames` frames.
pub fn padded_length(n_frames: usize, n_pixels: usize) -> usize {
    (2 * n_frames * n_pixels).next_power_of_two()
}

/// `out[k] = Σ_t m[t] * m[t + k]` for every `k` in `0..len(m)`.
pub fn direct_autocorrelation(means: ArrayView1<'_, f64>) -> Array1<f64> {
    let n = means.len();
    Array1::from_shape_fn(n, |k| {
        means
            .slice(s![..n - k])
            .iter()
            .zip(means.slice(s![k..]).iter())
            .map(|(a, b)| a * b)
            .sum()
    })
}

pub struct SpectralCorrelator {
    backend: Arc<dyn ComputeBackend>,
    plans: PlanCache,
}

impl SpectralCorrelator {
    /// One plan slot per bin, sized from the bin's pixel count.
    ///
    /// With `precompute` every plan is built here, so a backend that cannot
    /// transform the required length fails at construction.
    pub fn new(
        backend: Arc<dyn ComputeBackend>,
        params: &CorrelatorParams,
        precompute: bool,
        save_plans: bool,
    ) -> Result<Self> {
        let mut sizes = BTreeMap::new();
        for &bin in params.bins() {
            let n_pixels = params.pixel_count(bin)?;
            sizes.insert(bin, padded_length(params.n_frames(), n_pixels));
        }
        let mut plans = PlanCache::new(sizes, save_plans);

        if precompute {
            if save_plans {
                for &bin in params.bins() {
                    plans.get_or_create(bin, &*backend)?;
                }
                tracing::info!(
                    count = plans.cached_count(),
                    backend = backend.name(),
                    "precomputed FFT plans"
                );
            } else {
                tracing::warn!("precompute_plans has no effect when save_plans is disabled");
            }
        }

        Ok(Self { backend, plans })
    }

    pub fn plans(&self) -> &PlanCache {
        &self.plans
    }
}

impl CorrelationAlgorithm for SpectralCorrelator {
    fn name(&self) -> &str {
        "spectral"
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
        let size = self.plans.padded_len(bin)?;
        let needed = padded_length(n_frames, n_pixels);
        if size != needed {
            return Err(XpcsError::ShapeMismatch {
                what: "spectral transform length",
                expected: vec![size],
                found: vec![needed],
            });
        }
        let len = n_frames * n_pixels;

        let backend = &*self.backend;
        let correlation = {
            let plan = self.plans.get_or_create(bin, backend)?;
            linear_autocorrelation(backend, plan, pixels, len)
        };
        self.plans.release(bin);
        let flat = backend.download(&correlation?)?;

        let means = pixels
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::from_elem(n_frames, f32::NAN))
            .mapv(f64::from);
        let denominator = direct_autocorrelation(means.view());

        let norm = n_pixels as f64 * scale as f64;
        Ok(Array1::from_shape_fn(n_frames, |k| {
            let num = flat[[0, len - 1 - k * n_pixels]] as f64;
            (num / denominator[k] / norm) as f32
        }))
    }

    fn flush_plans(&mut self, bin: Option<Bin>) -> Result<()> {
        self.plans.flush(bin)
    }
}

/// First `len` samples of the zero-padded linear autocorrelation of the
/// row-major flattened `pixels`, left on the backend.
fn linear_autocorrelation(
    backend: &dyn ComputeBackend,
    plan: &mut FftPlan,
    pixels: ArrayView2<'_, f32>,
    len: usize,
) -> Result<DeviceBuffer> {
    let size = plan.size();
    let signal = backend.upload(pixels)?;

    let padded = backend.pad_complex(&signal, size, false)?;
    let forward = backend.fft(plan, &padded, FftDirection::Forward)?;
    let padded_rev = backend.pad_complex(&signal, size, true)?;
    let forward_rev = backend.fft(plan, &padded_rev, FftDirection::Forward)?;

    let product = backend.complex_mul(&forward, &forward_rev)?;
    let correlation = backend.fft(plan, &product, FftDirection::Inverse)?;
    backend.real_part(&correlation, len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn padded_length_is_next_power_of_two() {
        assert_eq!(padded_length(1, 1), 2);
        assert_eq!(padded_length(3, 5), 32);
        assert_eq!(padded_length(4, 4), 32);
    }

    #[test]
    fn direct_autocorrelation_sums_lagged_products() {
        let m = array![1.0, 2.0, 3.0];
        let d = direct_autocorrelation(m.view());
        assert_eq!(d.to_vec(), vec![14.0, 8.0, 3.0]);
    }
}
