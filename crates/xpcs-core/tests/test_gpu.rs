#![cfg(feature = "gpu")]

mod common;

use std::sync::Arc;

use ndarray::Array2;

use common::{assert_curves_close, cpu_config, speckle_stack, striped_mask};
use xpcs_core::compute::cpu::CpuBackend;
use xpcs_core::compute::{create_backend, BufferLocation, ComputeBackend, DevicePreference};
use xpcs_core::config::{CorrelationMethod, CorrelatorConfig, DiagonalStrategy};
use xpcs_core::correlator::Correlator;
use xpcs_core::params::CorrelatorParams;

/// GPU backend, or `None` when the machine has no usable adapter.
fn gpu() -> Option<Arc<dyn ComputeBackend>> {
    match create_backend(&DevicePreference::Gpu) {
        Ok(backend) => Some(backend),
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            None
        }
    }
}

fn gpu_config(method: CorrelationMethod) -> CorrelatorConfig {
    CorrelatorConfig {
        device: DevicePreference::Gpu,
        ..cpu_config(method)
    }
}

#[test]
fn test_gpu_matmul_matches_cpu() {
    let Some(backend) = gpu() else { return };
    let a = Array2::from_shape_fn((37, 21), |(r, c)| ((r * 3 + c) % 11) as f32 * 0.5);
    let b = Array2::from_shape_fn((19, 21), |(r, c)| ((r + c * 5) % 7) as f32 - 2.0);

    let cpu = CpuBackend;
    let expected = cpu
        .download(&cpu.matmul_transposed(&cpu.upload(a.view()).unwrap(), &cpu.upload(b.view()).unwrap()).unwrap())
        .unwrap();

    let ga = backend.upload(a.view()).unwrap();
    let gb = backend.upload(b.view()).unwrap();
    assert_eq!(ga.location(), BufferLocation::Device);
    let got = backend
        .download(&backend.matmul_transposed(&ga, &gb).unwrap())
        .unwrap();
    assert_curves_close(&expected, &got, 1e-5, "matmul");
}

#[test]
fn test_gpu_diagonal_sums_match_cpu() {
    let Some(backend) = gpu() else { return };
    let m = Array2::from_shape_fn((40, 40), |(r, c)| ((r * 7 + c) % 13) as f32 + 1.0);
    let cpu = CpuBackend;
    let expected = cpu
        .download(&cpu.sum_diagonals(&cpu.upload(m.view()).unwrap(), None).unwrap())
        .unwrap();

    let buf = backend.upload(m.view()).unwrap();
    let mut staging = backend.zeros(40, 40).unwrap();
    let staged = backend
        .download(&backend.sum_diagonals(&buf, Some(&mut staging)).unwrap())
        .unwrap();
    let direct = backend
        .download(&backend.sum_diagonals(&buf, None).unwrap())
        .unwrap();
    assert_curves_close(&expected, &staged, 1e-5, "staged");
    assert_curves_close(&expected, &direct, 1e-5, "direct");
}

#[test]
fn test_gpu_methods_match_reference() {
    if gpu().is_none() {
        return;
    }
    let frames = speckle_stack(10, 6, 6);
    let mask = striped_mask(6, 6, 2);
    let params = CorrelatorParams::new((6, 6), 10, Some(mask), None).unwrap();
    let reference = Correlator::new(params.clone(), &cpu_config(CorrelationMethod::DenseReference))
        .unwrap()
        .correlate(frames.view())
        .unwrap();

    for strategy in [DiagonalStrategy::Staged, DiagonalStrategy::Direct] {
        let config = CorrelatorConfig {
            diagonal_strategy: strategy,
            ..gpu_config(CorrelationMethod::DenseAccelerated)
        };
        let got = Correlator::new(params.clone(), &config)
            .unwrap()
            .correlate(frames.view())
            .unwrap();
        assert_curves_close(&reference, &got, 1e-4, &format!("dense {strategy}"));
    }

    // f32 transforms on the device are less precise than the f64 host planner
    let got = Correlator::new(params, &gpu_config(CorrelationMethod::Spectral))
        .unwrap()
        .correlate(frames.view())
        .unwrap();
    assert_curves_close(&reference, &got, 1e-3, "spectral");
}
