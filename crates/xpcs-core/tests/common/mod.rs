#![allow(dead_code)]

use ndarray::{Array1, Array2, Array3, ArrayView2};

use xpcs_core::config::{CorrelationMethod, CorrelatorConfig};
use xpcs_core::compute::DevicePreference;

/// Deterministic, strictly positive intensities with structure in time and space.
pub fn speckle_stack(n_frames: usize, rows: usize, cols: usize) -> Array3<f32> {
    Array3::from_shape_fn((n_frames, rows, cols), |(t, r, c)| {
        let phase = (t * 7 + r * 13 + c * 29) as f32 * 0.37;
        let drift = (t as f32 * 0.21 + (r * cols + c) as f32 * 0.05).cos();
        2.0 + phase.sin() + 0.5 * drift
    })
}

/// Every pixel of frame `t` holds `values[t]`.
pub fn uniform_frames(values: &[f32], rows: usize, cols: usize) -> Array3<f32> {
    Array3::from_shape_fn((values.len(), rows, cols), |(t, _, _)| values[t])
}

/// The same frame repeated `n_frames` times.
pub fn repeated_frame(frame: ArrayView2<'_, f32>, n_frames: usize) -> Array3<f32> {
    let (rows, cols) = frame.dim();
    Array3::from_shape_fn((n_frames, rows, cols), |(_, r, c)| frame[[r, c]])
}

/// Vertical stripes cycling through labels `1..=n_labels`.
pub fn striped_mask(rows: usize, cols: usize, n_labels: u32) -> Array2<u32> {
    Array2::from_shape_fn((rows, cols), |(_, c)| (c as u32 % n_labels) + 1)
}

/// Config for `method` pinned to the CPU backend.
pub fn cpu_config(method: CorrelationMethod) -> CorrelatorConfig {
    CorrelatorConfig {
        method,
        device: DevicePreference::Cpu,
        ..CorrelatorConfig::default()
    }
}

pub const ALL_METHODS: [CorrelationMethod; 3] = [
    CorrelationMethod::DenseReference,
    CorrelationMethod::DenseAccelerated,
    CorrelationMethod::Spectral,
];

/// Element-wise relative comparison with a readable failure message.
pub fn assert_curves_close(expected: &Array2<f32>, got: &Array2<f32>, tol: f32, label: &str) {
    assert_eq!(expected.dim(), got.dim(), "{label}: shape differs");
    for ((idx, &e), &g) in expected.indexed_iter().zip(got.iter()) {
        let scale = e.abs().max(g.abs()).max(f32::MIN_POSITIVE);
        assert!(
            (e - g).abs() / scale <= tol,
            "{label}: mismatch at {idx:?}: expected {e}, got {g}"
        );
    }
}

pub fn assert_all_close_to(curve: &Array1<f32>, value: f32, tol: f32) {
    for (k, &v) in curve.iter().enumerate() {
        assert!(
            (v - value).abs() <= tol * value.abs(),
            "lag {k}: expected {value}, got {v}"
        );
    }
}
