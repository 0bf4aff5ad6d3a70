//! Line chart of per-class accuracy change, sorted ascending.

use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result};
use plotters::prelude::*;
use tracing::debug;

/// Y axis limits in percent.
const Y_RANGE: Range<f32> = -100.0..100.0;
/// Fraction of the class count added as padding on each side of the x axis.
const X_PAD_FRACTION: f32 = 0.005;

/// `(index, value)` points, skipping non-finite values.
pub fn series(sorted_pct: &[f32]) -> Vec<(f32, f32)> {
    sorted_pct
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(i, &v)| (i as f32, v))
        .collect()
}

/// `[-pad, n + pad]` with `pad = floor(n * 0.005)`.
pub fn x_range(n: usize) -> Range<f32> {
    let pad = (n as f32 * X_PAD_FRACTION).floor();
    -pad..(n as f32 + pad)
}

/// Render the chart to `out_path` (SVG).
pub fn render(out_path: &Path, title: &str, sorted_pct: &[f32]) -> Result<()> {
    let root = SVGBackend::new(out_path, (1000, 700)).into_drawing_area();
    root.fill(&WHITE).context("Cannot clear chart")?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 16))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range(sorted_pct.len()), Y_RANGE)
        .context("Cannot build chart")?;

    chart
        .configure_mesh()
        .x_desc("sorted categories")
        .y_desc("accuracy difference (%)")
        .axis_desc_style(("sans-serif", 14))
        .draw()
        .context("Cannot draw chart mesh")?;

    chart
        .draw_series(LineSeries::new(series(sorted_pct), BLUE.stroke_width(2)))
        .context("Cannot draw accuracy series")?;

    root.present()
        .with_context(|| format!("Cannot write chart to {}", out_path.display()))?;
    debug!("Summary chart written to {}", out_path.display());
    Ok(())
}
