use approx::assert_relative_eq;
use ndarray::{array, Array2};

use xpcs_core::compute::cpu::CpuBackend;
use xpcs_core::compute::{
    create_backend, BufferLocation, ComputeBackend, DevicePreference, FftDirection,
};
use xpcs_core::correlator::reduction::{
    scatter_diagonals, sum_diagonals_direct, sum_diagonals_reference, sum_diagonals_staged,
};
use xpcs_core::error::XpcsError;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_ramp_array(h: usize, w: usize) -> Array2<f32> {
    Array2::from_shape_fn((h, w), |(r, c)| ((r * w + c) % 17) as f32 * 0.25 + 1.0)
}

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

#[test]
fn test_cpu_preference_gives_cpu_backend() {
    let backend = create_backend(&DevicePreference::Cpu).unwrap();
    assert_eq!(backend.name(), "CPU/Rayon");
    assert!(!backend.is_gpu());
}

#[test]
fn test_auto_preference_always_succeeds() {
    assert!(create_backend(&DevicePreference::Auto).is_ok());
}

#[cfg(not(feature = "gpu"))]
#[test]
fn test_gpu_preference_without_feature_is_missing_facility() {
    let err = create_backend(&DevicePreference::Gpu).err().unwrap();
    assert!(matches!(err, XpcsError::MissingFacility(_)));
}

// ---------------------------------------------------------------------------
// Dense operations
// ---------------------------------------------------------------------------

#[test]
fn test_upload_download_keeps_data() {
    let backend = CpuBackend;
    let data = make_ramp_array(3, 5);
    let buf = backend.upload(data.view()).unwrap();
    assert_eq!(buf.dim(), (3, 5));
    assert_eq!(buf.location(), BufferLocation::Host);
    assert_eq!(backend.download(&buf).unwrap(), data);
}

#[test]
fn test_matmul_transposed() {
    let backend = CpuBackend;
    let a = backend.upload(array![[1.0f32, 2.0], [3.0, 4.0], [5.0, 6.0]].view()).unwrap();
    let b = backend.upload(array![[1.0f32, 0.0], [1.0, 1.0]].view()).unwrap();
    let c = backend.download(&backend.matmul_transposed(&a, &b).unwrap()).unwrap();
    assert_eq!(c, array![[1.0, 3.0], [3.0, 7.0], [5.0, 11.0]]);
}

#[test]
fn test_matmul_transposed_inner_dim_mismatch() {
    let backend = CpuBackend;
    let a = backend.zeros(2, 3).unwrap();
    let b = backend.zeros(2, 4).unwrap();
    assert!(matches!(
        backend.matmul_transposed(&a, &b),
        Err(XpcsError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_row_means_column() {
    let backend = CpuBackend;
    let a = backend.upload(array![[1.0f32, 3.0], [2.0, 6.0]].view()).unwrap();
    let means = backend.download(&backend.row_means(&a).unwrap()).unwrap();
    assert_eq!(means, array![[2.0], [4.0]]);
}

#[test]
fn test_sum_diagonals_with_and_without_staging() {
    let backend = CpuBackend;
    let m = make_ramp_array(6, 6);
    let buf = backend.upload(m.view()).unwrap();
    let mut staging = backend.zeros(6, 6).unwrap();

    let staged = backend.download(&backend.sum_diagonals(&buf, Some(&mut staging)).unwrap()).unwrap();
    let direct = backend.download(&backend.sum_diagonals(&buf, None).unwrap()).unwrap();
    let reference = sum_diagonals_reference(m.view()).unwrap();

    assert_eq!(staged.dim(), (1, 6));
    for k in 0..6 {
        assert_relative_eq!(staged[[0, k]], reference[k], max_relative = 1e-6);
        assert_relative_eq!(direct[[0, k]], reference[k], max_relative = 1e-6);
    }
}

#[test]
fn test_divide_scaled() {
    let backend = CpuBackend;
    let a = backend.upload(array![[8.0f32, 6.0]].view()).unwrap();
    let b = backend.upload(array![[2.0f32, 3.0]].view()).unwrap();
    let out = backend.download(&backend.divide_scaled(&a, &b, 2.0).unwrap()).unwrap();
    assert_eq!(out, array![[2.0, 1.0]]);
}

// ---------------------------------------------------------------------------
// Transform operations
// ---------------------------------------------------------------------------

#[test]
fn test_fft_inverse_is_normalized() {
    let backend = CpuBackend;
    let signal = backend.upload(array![[1.0f32, 2.0, 3.0]].view()).unwrap();
    let mut plan = backend.plan_fft(8).unwrap();
    let padded = backend.pad_complex(&signal, 8, false).unwrap();
    assert_eq!(padded.dim(), (1, 8));

    let spectrum = backend.fft(&mut plan, &padded, FftDirection::Forward).unwrap();
    let back = backend.fft(&mut plan, &spectrum, FftDirection::Inverse).unwrap();
    let real = backend.download(&backend.real_part(&back, 4).unwrap()).unwrap();
    for (got, want) in real.iter().zip([1.0f32, 2.0, 3.0, 0.0]) {
        assert!((got - want).abs() < 1e-5, "got {got}, want {want}");
    }
}

#[test]
fn test_pad_reversed() {
    let backend = CpuBackend;
    let signal = backend.upload(array![[1.0f32, 2.0], [3.0, 4.0]].view()).unwrap();
    let padded = backend.pad_complex(&signal, 6, true).unwrap();
    let host = backend.download(&padded).unwrap();
    assert_eq!(host.dim(), (1, 12));
    let re: Vec<f32> = (0..6).map(|i| host[[0, 2 * i]]).collect();
    assert_eq!(re, vec![4.0, 3.0, 2.0, 1.0, 0.0, 0.0]);
}

#[test]
fn test_linear_correlation_through_fft() {
    // x = [1, 2, 3]: correlation with reversed copy, R[n] = Σ x[m] x[m + 2 - n]
    let backend = CpuBackend;
    let signal = backend.upload(array![[1.0f32, 2.0, 3.0]].view()).unwrap();
    let mut plan = backend.plan_fft(8).unwrap();
    let f1 = backend
        .fft(&mut plan, &backend.pad_complex(&signal, 8, false).unwrap(), FftDirection::Forward)
        .unwrap();
    let f2 = backend
        .fft(&mut plan, &backend.pad_complex(&signal, 8, true).unwrap(), FftDirection::Forward)
        .unwrap();
    let product = backend.complex_mul(&f1, &f2).unwrap();
    let r = backend.fft(&mut plan, &product, FftDirection::Inverse).unwrap();
    let real = backend.download(&backend.real_part(&r, 3).unwrap()).unwrap();
    for (got, want) in real.iter().zip([3.0f32, 8.0, 14.0]) {
        assert!((got - want).abs() < 1e-4, "got {got}, want {want}");
    }
}

#[test]
fn test_fft_rejects_wrong_length() {
    let backend = CpuBackend;
    let mut plan = backend.plan_fft(8).unwrap();
    let signal = backend.upload(array![[1.0f32]].view()).unwrap();
    let padded = backend.pad_complex(&signal, 4, false).unwrap();
    assert!(matches!(
        backend.fft(&mut plan, &padded, FftDirection::Forward),
        Err(XpcsError::ShapeMismatch { .. })
    ));
    assert!(matches!(
        backend.pad_complex(&backend.zeros(1, 9).unwrap(), 8, false),
        Err(XpcsError::ShapeMismatch { .. })
    ));
}

// ---------------------------------------------------------------------------
// Host diagonal reductions
// ---------------------------------------------------------------------------

#[test]
fn test_strategies_match_reference_parallel_path() {
    // 300x300 = 90_000 elements, above PARALLEL_PIXEL_THRESHOLD
    let m = make_ramp_array(300, 300);
    let reference = sum_diagonals_reference(m.view()).unwrap();
    let direct = sum_diagonals_direct(m.view()).unwrap();
    let mut staging = Array2::<f32>::zeros((300, 300));
    let staged = sum_diagonals_staged(m.view(), &mut staging).unwrap();
    assert_eq!(direct, reference);
    assert_eq!(staged, reference);
}

#[test]
fn test_staging_reuse_overwrites_previous_content() {
    let mut staging = Array2::<f32>::from_elem((3, 3), 99.0);
    let m = array![[1.0f32, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, 1.0]];
    scatter_diagonals(m.view(), &mut staging).unwrap();
    assert_eq!(staging, array![[1.0, 1.0, 1.0], [0.0, 1.0, 1.0], [0.0, 0.0, 1.0]]);
    let sums = sum_diagonals_staged(m.view(), &mut staging).unwrap();
    assert_eq!(sums.to_vec(), vec![3.0, 2.0, 1.0]);
}

#[test]
fn test_staging_shape_mismatch() {
    let m = Array2::<f32>::zeros((4, 4));
    let mut staging = Array2::<f32>::zeros((3, 3));
    assert!(matches!(
        sum_diagonals_staged(m.view(), &mut staging),
        Err(XpcsError::ShapeMismatch { .. })
    ));
}
