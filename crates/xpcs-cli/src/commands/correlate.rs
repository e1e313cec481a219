use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use xpcs_core::compute::DevicePreference;
use xpcs_core::config::{CorrelationMethod, CorrelatorConfig, DiagonalStrategy};
use xpcs_core::correlator::Correlator;
use xpcs_core::io::{save_curves_csv, StackReader};
use xpcs_core::params::CorrelatorParams;

use super::read_mask;
use crate::summary::{print_correlate_summary, print_curve_table};

#[derive(Clone, ValueEnum)]
pub enum MethodArg {
    DenseReference,
    DenseAccelerated,
    Spectral,
}

impl From<&MethodArg> for CorrelationMethod {
    fn from(arg: &MethodArg) -> Self {
        match arg {
            MethodArg::DenseReference => CorrelationMethod::DenseReference,
            MethodArg::DenseAccelerated => CorrelationMethod::DenseAccelerated,
            MethodArg::Spectral => CorrelationMethod::Spectral,
        }
    }
}

#[derive(Clone, ValueEnum)]
pub enum DeviceArg {
    Auto,
    Cpu,
    Gpu,
}

impl From<&DeviceArg> for DevicePreference {
    fn from(arg: &DeviceArg) -> Self {
        match arg {
            DeviceArg::Auto => DevicePreference::Auto,
            DeviceArg::Cpu => DevicePreference::Cpu,
            DeviceArg::Gpu => DevicePreference::Gpu,
        }
    }
}

#[derive(Clone, ValueEnum)]
pub enum StrategyArg {
    Staged,
    Direct,
}

impl From<&StrategyArg> for DiagonalStrategy {
    fn from(arg: &StrategyArg) -> Self {
        match arg {
            StrategyArg::Staged => DiagonalStrategy::Staged,
            StrategyArg::Direct => DiagonalStrategy::Direct,
        }
    }
}

#[derive(Args)]
pub struct CorrelateArgs {
    /// Input frame stack (.xstk)
    pub file: PathBuf,

    /// Bin mask image (8/16-bit grayscale, pixel value = bin label)
    #[arg(long)]
    pub mask: Option<PathBuf>,

    /// Correlator config file (TOML); flags below override its fields
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Correlation algorithm
    #[arg(long, value_enum)]
    pub method: Option<MethodArg>,

    /// Compute device
    #[arg(long, value_enum)]
    pub device: Option<DeviceArg>,

    /// Diagonal reduction for the accelerated dense method
    #[arg(long, value_enum)]
    pub diagonal_strategy: Option<StrategyArg>,

    /// Build every FFT plan before the first bin
    #[arg(long)]
    pub precompute_plans: bool,

    /// Rebuild FFT plans for every bin instead of caching them
    #[arg(long)]
    pub no_save_plans: bool,

    /// Evaluate bins in parallel (reference dense method)
    #[arg(long)]
    pub parallel_bins: bool,

    /// Comma-separated mask labels to correlate instead of all of them
    #[arg(long, value_delimiter = ',')]
    pub bins: Option<Vec<u32>>,

    /// Output CSV path
    #[arg(short, long, default_value = "curves.csv")]
    pub output: PathBuf,
}

pub fn run(args: &CorrelateArgs) -> Result<()> {
    let config = build_config(args)?;

    let reader = StackReader::open(&args.file)
        .with_context(|| format!("Failed to open stack {}", args.file.display()))?;
    let mask = read_mask(args.mask.as_deref())?;

    let mut params = CorrelatorParams::new(reader.header.shape(), reader.frame_count(), mask, None)
        .context("Invalid correlator parameters")?;
    if let Some(ref labels) = args.bins {
        params = params.with_bins(labels).context("Invalid bin selection")?;
    }

    let mut correlator = Correlator::new(params, &config)?;
    print_correlate_summary(
        &args.file,
        &args.output,
        &config,
        correlator.params(),
        correlator.backend_name(),
    );

    let frames = reader.read_all().context("Failed to decode frame stack")?;

    let pb = ProgressBar::new(correlator.params().n_bins() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("Correlating [{bar:40}] {pos}/{len} bins")?
            .progress_chars("=> "),
    );
    let curves = correlator.correlate_with_progress(frames.view(), |done, _| {
        pb.set_position(done as u64);
    })?;
    pb.finish_and_clear();

    save_curves_csv(&args.output, correlator.params().bins(), curves.view())
        .with_context(|| format!("Failed to write curves to {}", args.output.display()))?;

    print_curve_table(correlator.params(), curves.view())?;
    println!("Curves saved to {}", args.output.display());

    Ok(())
}

fn build_config(args: &CorrelateArgs) -> Result<CorrelatorConfig> {
    let mut config = if let Some(ref config_path) = args.config {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config {}", config_path.display()))?;
        toml::from_str(&contents).context("Invalid correlator config")?
    } else {
        CorrelatorConfig::default()
    };

    if let Some(ref method) = args.method {
        config.method = method.into();
    }
    if let Some(ref device) = args.device {
        config.device = device.into();
    }
    if let Some(ref strategy) = args.diagonal_strategy {
        config.diagonal_strategy = strategy.into();
    }
    if args.precompute_plans {
        config.precompute_plans = true;
    }
    if args.no_save_plans {
        config.save_plans = false;
    }
    if args.parallel_bins {
        config.parallel_bins = true;
    }
    if config.parallel_bins && config.method != CorrelationMethod::DenseReference {
        tracing::warn!(method = %config.method, "parallel_bins only applies to the reference dense method");
    }

    Ok(config)
}
