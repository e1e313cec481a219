use std::path::Path;

use anyhow::Result;
use console::Style;
use ndarray::ArrayView2;
use xpcs_core::config::{CorrelationMethod, CorrelatorConfig};
use xpcs_core::params::CorrelatorParams;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }
}

fn on_off(s: &Styles, enabled: bool) -> String {
    if enabled {
        s.value.apply_to("yes").to_string()
    } else {
        s.disabled.apply_to("no").to_string()
    }
}

pub fn print_correlate_summary(
    input: &Path,
    output: &Path,
    config: &CorrelatorConfig,
    params: &CorrelatorParams,
    backend_name: &str,
) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("XPCS Correlation"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(16)));
    println!();

    println!(
        "  {:<14}{}",
        s.label.apply_to("Input"),
        s.path.apply_to(input.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Output"),
        s.path.apply_to(output.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Device"),
        s.method.apply_to(format!("{} ({})", backend_name, config.device))
    );
    println!();

    // Geometry
    let (rows, cols) = params.shape();
    println!("  {}", s.header.apply_to("Stack"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Frames"),
        s.value.apply_to(params.n_frames())
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Dimensions"),
        s.value.apply_to(format!("{cols}x{rows}"))
    );
    if params.is_masked() {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Bins"),
            s.value.apply_to(params.n_bins())
        );
    } else {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Bins"),
            s.disabled.apply_to("whole frame")
        );
    }
    println!();

    // Algorithm
    println!("  {}", s.header.apply_to("Algorithm"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Method"),
        s.method.apply_to(config.method)
    );
    match config.method {
        CorrelationMethod::DenseReference => {
            println!(
                "    {:<12}{}",
                s.label.apply_to("Parallel"),
                on_off(&s, config.parallel_bins)
            );
        }
        CorrelationMethod::DenseAccelerated => {
            println!(
                "    {:<12}{}",
                s.label.apply_to("Diagonals"),
                s.value.apply_to(config.diagonal_strategy)
            );
        }
        CorrelationMethod::Spectral => {
            println!(
                "    {:<12}{}",
                s.label.apply_to("Precompute"),
                on_off(&s, config.precompute_plans)
            );
            println!(
                "    {:<12}{}",
                s.label.apply_to("Save plans"),
                on_off(&s, config.save_plans)
            );
        }
    }
    println!();
}

/// One line per bin: pixel count, g2 at lag 0 and at the last lag.
pub fn print_curve_table(params: &CorrelatorParams, curves: ArrayView2<'_, f32>) -> Result<()> {
    let s = Styles::new();
    let last = curves.ncols().saturating_sub(1);

    println!(
        "  {:<10}{:>10}{:>12}{:>12}",
        s.header.apply_to("Bin"),
        s.header.apply_to("Pixels"),
        s.header.apply_to("g2(0)"),
        s.header.apply_to(format!("g2({last})"))
    );
    for (i, &bin) in params.bins().iter().enumerate() {
        let row = curves.row(i);
        println!(
            "  {:<10}{:>10}{:>12}{:>12}",
            s.label.apply_to(bin.to_string()),
            s.value.apply_to(params.pixel_count(bin)?),
            s.value.apply_to(format!("{:.5}", row[0])),
            s.value.apply_to(format!("{:.5}", row[last]))
        );
    }
    println!();
    Ok(())
}
