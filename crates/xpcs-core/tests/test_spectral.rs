mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use ndarray::Array2;

use common::{cpu_config, speckle_stack, striped_mask};
use xpcs_core::bins::{extract_pixels, Bin};
use xpcs_core::compute::cpu::CpuBackend;
use xpcs_core::config::{CorrelationMethod, CorrelatorConfig};
use xpcs_core::correlator::spectral::{padded_length, SpectralCorrelator};
use xpcs_core::correlator::{dense_correlation, CorrelationAlgorithm, Correlator, PlanCache};
use xpcs_core::error::XpcsError;
use xpcs_core::params::CorrelatorParams;

fn masked_params() -> CorrelatorParams {
    CorrelatorParams::new((4, 6), 7, Some(striped_mask(4, 6, 3)), None).unwrap()
}

// ---------------------------------------------------------------------------
// Numerator offset
// ---------------------------------------------------------------------------

#[test]
fn test_spectral_matches_dense_per_bin() {
    let params = masked_params();
    let frames = speckle_stack(7, 4, 6);
    let mut spectral =
        SpectralCorrelator::new(Arc::new(CpuBackend), &params, false, true).unwrap();

    for &bin in params.bins() {
        let pixels = extract_pixels(frames.view(), params.pixels(bin).unwrap());
        let expected = dense_correlation(pixels.view(), 1.0);
        let got = spectral.correlate_bin(pixels.view(), bin, 1.0).unwrap();
        for (k, (&e, &g)) in expected.iter().zip(got.iter()).enumerate() {
            assert!(
                ((e - g) / e).abs() < 1e-4,
                "bin {bin} lag {k}: dense {e}, spectral {g}"
            );
        }
    }
}

#[test]
fn test_padded_length_covers_linear_correlation() {
    for (t, p) in [(1, 1), (3, 5), (7, 8), (100, 3)] {
        let n = padded_length(t, p);
        assert!(n.is_power_of_two());
        assert!(n >= 2 * t * p);
        assert!(n / 2 < 2 * t * p);
    }
}

// ---------------------------------------------------------------------------
// Plan cache
// ---------------------------------------------------------------------------

#[test]
fn test_plans_created_lazily_and_kept() {
    let params = masked_params();
    let frames = speckle_stack(7, 4, 6);
    let mut spectral =
        SpectralCorrelator::new(Arc::new(CpuBackend), &params, false, true).unwrap();
    assert_eq!(spectral.plans().cached_count(), 0);

    let bin = Bin::Label(2);
    let pixels = extract_pixels(frames.view(), params.pixels(bin).unwrap());
    spectral.correlate_bin(pixels.view(), bin, 1.0).unwrap();
    assert!(spectral.plans().is_cached(bin));
    assert_eq!(spectral.plans().cached_count(), 1);
}

#[test]
fn test_precompute_builds_every_plan() {
    let params = masked_params();
    let spectral = SpectralCorrelator::new(Arc::new(CpuBackend), &params, true, true).unwrap();
    assert_eq!(spectral.plans().cached_count(), 3);
    for &bin in params.bins() {
        assert_eq!(
            spectral.plans().padded_len(bin).unwrap(),
            padded_length(7, params.pixel_count(bin).unwrap())
        );
    }
}

#[test]
fn test_unsaved_plans_are_released() {
    let params = masked_params();
    let frames = speckle_stack(7, 4, 6);
    let mut spectral =
        SpectralCorrelator::new(Arc::new(CpuBackend), &params, true, false).unwrap();
    assert_eq!(spectral.plans().cached_count(), 0);

    let bin = Bin::Label(1);
    let pixels = extract_pixels(frames.view(), params.pixels(bin).unwrap());
    spectral.correlate_bin(pixels.view(), bin, 1.0).unwrap();
    assert_eq!(spectral.plans().cached_count(), 0);
    assert!(!spectral.plans().retains_plans());
}

#[test]
fn test_results_stable_across_flushes() {
    let params = masked_params();
    let frames = speckle_stack(7, 4, 6);
    let mut correlator =
        Correlator::new(params, &cpu_config(CorrelationMethod::Spectral)).unwrap();

    let first = correlator.correlate(frames.view()).unwrap();
    let second = correlator.correlate(frames.view()).unwrap();
    assert_eq!(first, second);

    correlator.flush_plans(Some(Bin::Label(3))).unwrap();
    let third = correlator.correlate(frames.view()).unwrap();
    assert_eq!(first, third);

    correlator.flush_plans(None).unwrap();
    let fourth = correlator.correlate(frames.view()).unwrap();
    assert_eq!(first, fourth);
}

#[test]
fn test_flush_unknown_bin() {
    let params = masked_params();
    let config = CorrelatorConfig {
        precompute_plans: true,
        ..cpu_config(CorrelationMethod::Spectral)
    };
    let mut correlator = Correlator::new(params, &config).unwrap();
    let err = correlator.flush_plans(Some(Bin::Label(8))).unwrap_err();
    assert!(matches!(err, XpcsError::UnknownBin(Bin::Label(8))));
    assert!(matches!(
        correlator.flush_plans(Some(Bin::Whole)),
        Err(XpcsError::UnknownBin(Bin::Whole))
    ));
}

#[test]
fn test_flush_on_dense_method_is_noop() {
    let params = masked_params();
    let mut correlator =
        Correlator::new(params, &cpu_config(CorrelationMethod::DenseReference)).unwrap();
    correlator.flush_plans(None).unwrap();
    correlator.flush_plans(Some(Bin::Label(1))).unwrap();
}

#[test]
fn test_plan_cache_flush_one_and_all() {
    let sizes = BTreeMap::from([(Bin::Label(1), 8), (Bin::Label(2), 16)]);
    let mut cache = PlanCache::new(sizes, true);
    let backend = CpuBackend;
    cache.get_or_create(Bin::Label(1), &backend).unwrap();
    let plan = cache.get_or_create(Bin::Label(2), &backend).unwrap();
    assert_eq!(plan.size(), 16);
    assert_eq!(cache.cached_count(), 2);

    cache.flush(Some(Bin::Label(1))).unwrap();
    assert!(!cache.is_cached(Bin::Label(1)));
    assert!(cache.is_cached(Bin::Label(2)));

    cache.flush(None).unwrap();
    assert_eq!(cache.cached_count(), 0);
    assert!(matches!(
        cache.get_or_create(Bin::Label(3), &backend),
        Err(XpcsError::UnknownBin(_))
    ));
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[test]
fn test_empty_pixel_matrix_is_empty_bin() {
    let params = CorrelatorParams::new((2, 2), 3, None, None).unwrap();
    let mut spectral =
        SpectralCorrelator::new(Arc::new(CpuBackend), &params, false, true).unwrap();
    let empty = Array2::<f32>::zeros((3, 0));
    let err = spectral.correlate_bin(empty.view(), Bin::Whole, 1.0).unwrap_err();
    assert!(matches!(err, XpcsError::EmptyBin { bin: Bin::Whole }));
}

#[test]
fn test_wrong_pixel_count_for_bin() {
    let params = CorrelatorParams::new((2, 2), 3, None, None).unwrap();
    let mut spectral =
        SpectralCorrelator::new(Arc::new(CpuBackend), &params, false, true).unwrap();
    let pixels = Array2::<f32>::ones((3, 9));
    let err = spectral.correlate_bin(pixels.view(), Bin::Whole, 1.0).unwrap_err();
    assert!(matches!(err, XpcsError::ShapeMismatch { .. }));
}
