use xpcs_core::compute::DevicePreference;
use xpcs_core::config::{CorrelationMethod, CorrelatorConfig, DiagonalStrategy};

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

#[test]
fn test_method_display() {
    assert_eq!(format!("{}", CorrelationMethod::DenseReference), "Dense (reference)");
    assert_eq!(format!("{}", CorrelationMethod::DenseAccelerated), "Dense (accelerated)");
    assert_eq!(format!("{}", CorrelationMethod::Spectral), "Spectral (FFT)");
}

#[test]
fn test_strategy_and_device_display() {
    assert_eq!(format!("{}", DiagonalStrategy::Staged), "Staged");
    assert_eq!(format!("{}", DiagonalStrategy::Direct), "Direct");
    assert_eq!(format!("{}", DevicePreference::Auto), "Auto");
    assert_eq!(format!("{}", DevicePreference::Gpu), "GPU");
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

#[test]
fn test_config_defaults() {
    let config = CorrelatorConfig::default();
    assert_eq!(config.method, CorrelationMethod::Spectral);
    assert_eq!(config.device, DevicePreference::Auto);
    assert_eq!(config.diagonal_strategy, DiagonalStrategy::Staged);
    assert!(!config.precompute_plans);
    assert!(config.save_plans);
    assert!(!config.parallel_bins);
}

#[test]
fn test_with_method_keeps_other_defaults() {
    let config = CorrelatorConfig::with_method(CorrelationMethod::DenseReference);
    assert_eq!(config.method, CorrelationMethod::DenseReference);
    assert!(config.save_plans);
}

// ---------------------------------------------------------------------------
// Serde
// ---------------------------------------------------------------------------

#[test]
fn test_config_json_roundtrip() {
    let config = CorrelatorConfig {
        method: CorrelationMethod::DenseAccelerated,
        device: DevicePreference::Cpu,
        diagonal_strategy: DiagonalStrategy::Direct,
        precompute_plans: true,
        save_plans: false,
        parallel_bins: true,
    };
    let json = serde_json::to_string(&config).unwrap();
    let back: CorrelatorConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}

#[test]
fn test_partial_config_fills_defaults() {
    let config: CorrelatorConfig =
        serde_json::from_str(r#"{ "method": "DenseReference", "parallel_bins": true }"#).unwrap();
    assert_eq!(config.method, CorrelationMethod::DenseReference);
    assert!(config.parallel_bins);
    assert!(config.save_plans);
    assert_eq!(config.device, DevicePreference::Auto);
}

#[test]
fn test_unknown_method_rejected() {
    let result: Result<CorrelatorConfig, _> = serde_json::from_str(r#"{ "method": "Multitau" }"#);
    assert!(result.is_err());
}
