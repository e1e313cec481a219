use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};
use num_complex::Complex;
use rayon::prelude::*;
use rustfft::FftPlanner;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::correlator::reduction::{sum_diagonals_direct, sum_diagonals_staged};
use crate::error::{Result, XpcsError};

use super::{BufferInner, ComputeBackend, DeviceBuffer, FftDirection, FftPlan, PlanInner};

/// CPU backend: ndarray/matrixmultiply products, rustfft transforms, Rayon for
/// the reductions.
pub struct CpuBackend;

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "CPU/Rayon"
    }

    fn upload(&self, data: ArrayView2<'_, f32>) -> Result<DeviceBuffer> {
        Ok(DeviceBuffer::from_array(data.to_owned()))
    }

    fn download(&self, buf: &DeviceBuffer) -> Result<Array2<f32>> {
        Ok(cpu_array(buf)?.clone())
    }

    fn zeros(&self, rows: usize, cols: usize) -> Result<DeviceBuffer> {
        Ok(DeviceBuffer::from_array(Array2::zeros((rows, cols))))
    }

    fn matmul_transposed(&self, a: &DeviceBuffer, b: &DeviceBuffer) -> Result<DeviceBuffer> {
        let a_data = cpu_array(a)?;
        let b_data = cpu_array(b)?;
        if a_data.ncols() != b_data.ncols() {
            return Err(XpcsError::ShapeMismatch {
                what: "matrix product operand",
                expected: vec![b_data.nrows(), a_data.ncols()],
                found: vec![b_data.nrows(), b_data.ncols()],
            });
        }
        Ok(DeviceBuffer::from_array(a_data.dot(&b_data.t())))
    }

    fn row_means(&self, a: &DeviceBuffer) -> Result<DeviceBuffer> {
        let data = cpu_array(a)?;
        let means = data
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::from_elem(data.nrows(), f32::NAN));
        Ok(DeviceBuffer::from_array(means.insert_axis(Axis(1))))
    }

    fn sum_diagonals(
        &self,
        matrix: &DeviceBuffer,
        staging: Option<&mut DeviceBuffer>,
    ) -> Result<DeviceBuffer> {
        let data = cpu_array(matrix)?;
        let sums = match staging {
            Some(staging) => sum_diagonals_staged(data.view(), cpu_array_mut(staging)?)?,
            None => sum_diagonals_direct(data.view())?,
        };
        Ok(DeviceBuffer::from_array(sums.insert_axis(Axis(0))))
    }

    fn divide_scaled(
        &self,
        a: &DeviceBuffer,
        b: &DeviceBuffer,
        scale: f32,
    ) -> Result<DeviceBuffer> {
        let a_data = cpu_array(a)?;
        let b_data = cpu_array(b)?;
        check_same_dim("divisor", a_data.dim(), b_data.dim())?;
        let result = Zip::from(a_data)
            .and(b_data)
            .map_collect(|&av, &bv| av / bv / scale);
        Ok(DeviceBuffer::from_array(result))
    }

    fn plan_fft(&self, size: usize) -> Result<FftPlan> {
        if size == 0 {
            return Err(XpcsError::InvalidConfig(
                "FFT size must be at least 1".into(),
            ));
        }
        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        Ok(FftPlan::new(
            size,
            PlanInner::Cpu {
                forward,
                inverse,
                scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            },
        ))
    }

    fn pad_complex(
        &self,
        signal: &DeviceBuffer,
        size: usize,
        reversed: bool,
    ) -> Result<DeviceBuffer> {
        let data = cpu_array(signal)?;
        let len = data.len();
        if len > size {
            return Err(XpcsError::ShapeMismatch {
                what: "padded transform input",
                expected: vec![size],
                found: vec![len],
            });
        }

        let mut out = Array2::<f32>::zeros((1, size * 2));
        if reversed {
            for (i, &v) in data.iter().enumerate() {
                out[[0, (len - 1 - i) * 2]] = v;
            }
        } else {
            for (i, &v) in data.iter().enumerate() {
                out[[0, i * 2]] = v;
            }
        }
        Ok(DeviceBuffer::complex_from_array(out))
    }

    fn fft(
        &self,
        plan: &mut FftPlan,
        input: &DeviceBuffer,
        direction: FftDirection,
    ) -> Result<DeviceBuffer> {
        let size = plan.size();
        if input.rows != 1 || input.cols != size {
            return Err(XpcsError::ShapeMismatch {
                what: "transform input",
                expected: vec![1, size],
                found: vec![input.rows, input.cols],
            });
        }
        let data = cpu_array(input)?;
        let (forward, inverse, scratch) = match &mut plan.inner {
            PlanInner::Cpu {
                forward,
                inverse,
                scratch,
            } => (forward, inverse, scratch),
            #[cfg(feature = "gpu")]
            _ => {
                return Err(XpcsError::Resource(
                    "CPU backend received a device transform plan".into(),
                ))
            }
        };

        let mut work = interleaved_to_complex(data);
        let (fft, scale) = match direction {
            FftDirection::Forward => (forward, 1.0),
            FftDirection::Inverse => (inverse, 1.0 / size as f64),
        };
        fft.process_with_scratch(&mut work, scratch);

        let mut out = Array2::<f32>::zeros((1, size * 2));
        for (i, v) in work.iter().enumerate() {
            out[[0, i * 2]] = (v.re * scale) as f32;
            out[[0, i * 2 + 1]] = (v.im * scale) as f32;
        }
        Ok(DeviceBuffer::complex_from_array(out))
    }

    fn complex_mul(&self, a: &DeviceBuffer, b: &DeviceBuffer) -> Result<DeviceBuffer> {
        let a_data = cpu_array(a)?;
        let b_data = cpu_array(b)?;
        check_same_dim("complex operand", a_data.dim(), b_data.dim())?;
        let (h, w2) = a_data.dim();
        let w = w2 / 2;

        let mut result = Array2::<f32>::zeros((h, w2));
        for r in 0..h {
            for c in 0..w {
                let a_re = a_data[[r, c * 2]] as f64;
                let a_im = a_data[[r, c * 2 + 1]] as f64;
                let b_re = b_data[[r, c * 2]] as f64;
                let b_im = b_data[[r, c * 2 + 1]] as f64;

                result[[r, c * 2]] = (a_re * b_re - a_im * b_im) as f32;
                result[[r, c * 2 + 1]] = (a_re * b_im + a_im * b_re) as f32;
            }
        }

        Ok(DeviceBuffer::complex_from_array(result))
    }

    fn real_part(&self, input: &DeviceBuffer, count: usize) -> Result<DeviceBuffer> {
        let data = cpu_array(input)?;
        if count > input.len() {
            return Err(XpcsError::ShapeMismatch {
                what: "real part extraction",
                expected: vec![input.len()],
                found: vec![count],
            });
        }
        let cols = input.cols;
        let out = Array2::from_shape_fn((1, count), |(_, i)| data[[i / cols, (i % cols) * 2]]);
        Ok(DeviceBuffer::from_array(out))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn cpu_array(buf: &DeviceBuffer) -> Result<&Array2<f32>> {
    match &buf.inner {
        BufferInner::Cpu(arr) => Ok(arr),
        #[cfg(feature = "gpu")]
        _ => Err(XpcsError::Resource(
            "CPU backend received a device buffer".into(),
        )),
    }
}

fn cpu_array_mut(buf: &mut DeviceBuffer) -> Result<&mut Array2<f32>> {
    match &mut buf.inner {
        BufferInner::Cpu(arr) => Ok(arr),
        #[cfg(feature = "gpu")]
        _ => Err(XpcsError::Resource(
            "CPU backend received a device buffer".into(),
        )),
    }
}

fn check_same_dim(what: &'static str, a: (usize, usize), b: (usize, usize)) -> Result<()> {
    if a != b {
        return Err(XpcsError::ShapeMismatch {
            what,
            expected: vec![a.0, a.1],
            found: vec![b.0, b.1],
        });
    }
    Ok(())
}

fn interleaved_to_complex(data: &Array2<f32>) -> Vec<Complex<f64>> {
    let (h, w2) = data.dim();
    let w = w2 / 2;
    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        (0..h * w)
            .into_par_iter()
            .map(|i| {
                let (r, c) = (i / w, i % w);
                Complex::new(data[[r, c * 2]] as f64, data[[r, c * 2 + 1]] as f64)
            })
            .collect()
    } else {
        (0..h * w)
            .map(|i| {
                let (r, c) = (i / w, i % w);
                Complex::new(data[[r, c * 2]] as f64, data[[r, c * 2 + 1]] as f64)
            })
            .collect()
    }
}
