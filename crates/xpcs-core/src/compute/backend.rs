use std::fmt;
use std::sync::Arc;

use ndarray::{Array2, ArrayView2};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::cpu::CpuBackend;

/// Where a correlator should run its bulk operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DevicePreference {
    /// GPU when one is usable, CPU otherwise.
    #[default]
    Auto,
    Cpu,
    /// GPU only; construction fails when no adapter is available.
    Gpu,
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "Auto"),
            Self::Cpu => write!(f, "CPU"),
            Self::Gpu => write!(f, "GPU"),
        }
    }
}

/// Whether a buffer's data lives in host memory or on a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferLocation {
    Host,
    Device,
}

pub(crate) enum BufferInner {
    Cpu(Array2<f32>),
    #[cfg(feature = "gpu")]
    Wgpu {
        buffer: wgpu::Buffer,
        #[allow(dead_code)]
        device: Arc<wgpu::Device>,
        #[allow(dead_code)]
        queue: Arc<wgpu::Queue>,
    },
}

/// A 2D `f32` buffer owned by a compute backend.
///
/// Complex data is stored interleaved (`re, im`); `cols` then counts complex
/// elements and the host array is `(rows, 2 * cols)` wide.
pub struct DeviceBuffer {
    pub(crate) inner: BufferInner,
    pub rows: usize,
    pub cols: usize,
}

impl DeviceBuffer {
    /// Wrap a host array as a real-valued buffer.
    pub fn from_array(data: Array2<f32>) -> Self {
        let (rows, cols) = data.dim();
        Self {
            inner: BufferInner::Cpu(data),
            rows,
            cols,
        }
    }

    pub(crate) fn complex_from_array(data: Array2<f32>) -> Self {
        let (rows, cols2) = data.dim();
        Self {
            inner: BufferInner::Cpu(data),
            rows,
            cols: cols2 / 2,
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn location(&self) -> BufferLocation {
        match &self.inner {
            BufferInner::Cpu(_) => BufferLocation::Host,
            #[cfg(feature = "gpu")]
            BufferInner::Wgpu { .. } => BufferLocation::Device,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FftDirection {
    Forward,
    /// Inverse transform, normalized by `1/n`.
    Inverse,
}

pub(crate) enum PlanInner {
    Cpu {
        forward: Arc<dyn rustfft::Fft<f64>>,
        inverse: Arc<dyn rustfft::Fft<f64>>,
        scratch: Vec<Complex<f64>>,
    },
    #[cfg(feature = "gpu")]
    Wgpu {
        /// One uniform per radix-2 stage.
        forward_stages: Vec<wgpu::Buffer>,
        inverse_stages: Vec<wgpu::Buffer>,
        /// Uniforms of the final copy pass (`1` forward, `1/n` inverse).
        forward_scale: wgpu::Buffer,
        inverse_scale: wgpu::Buffer,
        ping: wgpu::Buffer,
        pong: wgpu::Buffer,
    },
}

/// A prepared forward/inverse 1D transform pair for one length.
pub struct FftPlan {
    size: usize,
    pub(crate) inner: PlanInner,
}

impl FftPlan {
    pub(crate) fn new(size: usize, inner: PlanInner) -> Self {
        Self { size, inner }
    }

    /// Number of complex points transformed by this plan.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Bulk operations the correlation algorithms offload.
///
/// Buffers returned by a backend must only be passed back to the same
/// backend. Operations are issued synchronously in call order.
pub trait ComputeBackend: Send + Sync {
    fn name(&self) -> &str;

    fn is_gpu(&self) -> bool {
        false
    }

    fn upload(&self, data: ArrayView2<'_, f32>) -> Result<DeviceBuffer>;

    fn download(&self, buf: &DeviceBuffer) -> Result<Array2<f32>>;

    fn zeros(&self, rows: usize, cols: usize) -> Result<DeviceBuffer>;

    /// `a · bᵀ` for `a` of shape `(m, k)` and `b` of shape `(n, k)`.
    fn matmul_transposed(&self, a: &DeviceBuffer, b: &DeviceBuffer) -> Result<DeviceBuffer>;

    /// Mean of every row, as an `(rows, 1)` column.
    fn row_means(&self, a: &DeviceBuffer) -> Result<DeviceBuffer>;

    /// Upper-diagonal sums of a square matrix, as a `(1, n)` row.
    ///
    /// With a staging buffer of shape `(n, n)` the staged strategy is used,
    /// otherwise each diagonal is reduced directly.
    fn sum_diagonals(
        &self,
        matrix: &DeviceBuffer,
        staging: Option<&mut DeviceBuffer>,
    ) -> Result<DeviceBuffer>;

    /// Elementwise `a / b / scale`. Division by zero is not trapped.
    fn divide_scaled(&self, a: &DeviceBuffer, b: &DeviceBuffer, scale: f32)
        -> Result<DeviceBuffer>;

    fn plan_fft(&self, size: usize) -> Result<FftPlan>;

    /// Flatten a real buffer (row-major), optionally reversed, into a
    /// zero-padded complex `(1, size)` buffer.
    fn pad_complex(&self, signal: &DeviceBuffer, size: usize, reversed: bool)
        -> Result<DeviceBuffer>;

    fn fft(
        &self,
        plan: &mut FftPlan,
        input: &DeviceBuffer,
        direction: FftDirection,
    ) -> Result<DeviceBuffer>;

    fn complex_mul(&self, a: &DeviceBuffer, b: &DeviceBuffer) -> Result<DeviceBuffer>;

    /// Real parts of the first `count` complex elements, as a `(1, count)` row.
    fn real_part(&self, input: &DeviceBuffer, count: usize) -> Result<DeviceBuffer>;
}

/// Create the backend matching a device preference.
///
/// An explicit GPU request fails with `XpcsError::MissingFacility` when no
/// GPU backend can be created; only `Auto` falls back to the CPU.
pub fn create_backend(preference: &DevicePreference) -> Result<Arc<dyn ComputeBackend>> {
    match preference {
        DevicePreference::Cpu => Ok(Arc::new(CpuBackend)),
        DevicePreference::Gpu => gpu_backend(),
        DevicePreference::Auto => match gpu_backend() {
            Ok(backend) => Ok(backend),
            Err(e) => {
                tracing::warn!("GPU backend unavailable ({e}), using CPU");
                Ok(Arc::new(CpuBackend))
            }
        },
    }
}

#[cfg(feature = "gpu")]
fn gpu_backend() -> Result<Arc<dyn ComputeBackend>> {
    let backend = super::wgpu_backend::WgpuBackend::new()?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "gpu"))]
fn gpu_backend() -> Result<Arc<dyn ComputeBackend>> {
    Err(crate::error::XpcsError::MissingFacility(
        "GPU backend requires building with the `gpu` feature".into(),
    ))
}
