//! Heatmap rendering of dense grid predictions.
//!
//! Values are inverted (`1 - v`) so that likely locations come out dark,
//! clipped to `[0, 1]` and mapped through the `afmhot` colormap.

use std::path::Path;

use anyhow::{bail, Context, Result};
use image::{ImageBuffer, Rgb};
use ndarray::Array2;
use plotters::prelude::*;
use tracing::debug;

/// Width of the titled figure in pixels.
const FIGURE_WIDTH: u32 = 1200;
/// Height reserved for the figure title.
const TITLE_HEIGHT: u32 = 48;

/// Render `1 - grid` as one pixel per cell.
pub fn render(grid: &Array2<f32>) -> ImageBuffer<Rgb<u8>, Vec<u8>> {
    let (h, w) = grid.dim();
    let mut img = ImageBuffer::<Rgb<u8>, _>::new(w as u32, h as u32);
    for ((r, c), &v) in grid.indexed_iter() {
        img.put_pixel(c as u32, r as u32, colormap(1.0 - v));
    }
    img
}

/// Save the raw heatmap image (one pixel per grid cell).
pub fn save(grid: &Array2<f32>, out_path: &Path) -> Result<()> {
    render(grid)
        .save(out_path)
        .with_context(|| format!("Cannot write heatmap to {}", out_path.display()))?;
    debug!("Heatmap written to {}", out_path.display());
    Ok(())
}

/// Save a titled figure of the heatmap, scaled to [`FIGURE_WIDTH`].
pub fn save_figure(grid: &Array2<f32>, title: &str, out_path: &Path) -> Result<()> {
    let (h, w) = grid.dim();
    if h == 0 || w == 0 {
        bail!("Cannot draw an empty {h}x{w} grid");
    }
    let img_h = ((FIGURE_WIDTH as f64 * h as f64 / w as f64).round() as u32).max(1);

    let root = BitMapBackend::new(out_path, (FIGURE_WIDTH, img_h + TITLE_HEIGHT))
        .into_drawing_area();
    root.fill(&WHITE).context("Cannot clear figure")?;
    let body = root
        .titled(title, ("sans-serif", 24))
        .context("Cannot draw figure title")?;

    let (body_w, body_h) = body.dim_in_pixel();
    for y in 0..body_h {
        let r = ((y as f64 / body_h as f64) * h as f64) as usize;
        for x in 0..body_w {
            let c = ((x as f64 / body_w as f64) * w as f64) as usize;
            let Rgb([red, green, blue]) = colormap(1.0 - grid[[r.min(h - 1), c.min(w - 1)]]);
            body.draw_pixel((x as i32, y as i32), &RGBColor(red, green, blue))
                .context("Cannot draw heatmap pixel")?;
        }
    }

    root.present()
        .with_context(|| format!("Cannot write figure to {}", out_path.display()))?;
    debug!("Figure written to {}", out_path.display());
    Ok(())
}

/// matplotlib's `afmhot` on `[0, 1]`; out-of-range values are clipped,
/// non-finite values render white.
pub fn colormap(val: f32) -> Rgb<u8> {
    let v = if val.is_finite() { val.clamp(0.0, 1.0) } else { 1.0 };
    let channel = |offset: f32| (255.0 * (2.0 * v - offset).clamp(0.0, 1.0)).round() as u8;
    Rgb([channel(0.0), channel(0.5), channel(1.0)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::temp_dir;
    use ndarray::array;

    #[test]
    fn test_colormap_endpoints() {
        assert_eq!(colormap(0.0), Rgb([0, 0, 0]));
        assert_eq!(colormap(1.0), Rgb([255, 255, 255]));
        assert_eq!(colormap(0.5), Rgb([255, 128, 0]));
    }

    #[test]
    fn test_colormap_clips() {
        assert_eq!(colormap(-3.0), colormap(0.0));
        assert_eq!(colormap(7.0), colormap(1.0));
        assert_eq!(colormap(f32::NAN), colormap(1.0));
    }

    #[test]
    fn test_render_inverts() {
        // certain presence → black, ocean (0) → white, outline (≥1) → black
        let grid = array![[1.0f32, 0.0], [1.7, 0.5]];
        let img = render(&grid);
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(*img.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*img.get_pixel(1, 0), Rgb([255, 255, 255]));
        assert_eq!(*img.get_pixel(0, 1), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_save_png() {
        let path = temp_dir("heatmap_raw").join("0042.png");
        let _ = std::fs::remove_file(&path);
        save(&Array2::from_elem((3, 6), 0.25), &path).unwrap();
        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (6, 3));
    }

    #[test]
    fn test_save_into_missing_dir_fails_with_context() {
        let path = temp_dir("heatmap_nodir").join("absent").join("0001.png");
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
        let err = save(&Array2::from_elem((2, 2), 0.5), &path).unwrap_err();
        assert!(format!("{err}").contains("Cannot write heatmap"), "got: {err}");
    }

    #[test]
    fn test_save_figure_size() {
        let path = temp_dir("heatmap_figure").join("0042_figure.png");
        let _ = std::fs::remove_file(&path);
        // 3x6 grid scales to 1200x600, plus the title band
        let grid = Array2::from_shape_fn((3, 6), |(r, c)| (r * 6 + c) as f32 / 17.0);
        save_figure(&grid, "Test species 42", &path).unwrap();
        let img = image::open(&path).unwrap();
        assert_eq!(img.width(), FIGURE_WIDTH);
        assert_eq!(img.height(), 600 + TITLE_HEIGHT);
    }

    #[test]
    fn test_save_figure_rejects_empty_grid() {
        let path = temp_dir("heatmap_empty").join("empty_figure.png");
        let _ = std::fs::remove_file(&path);
        let err = save_figure(&Array2::zeros((0, 4)), "empty", &path).unwrap_err();
        assert!(format!("{err}").contains("empty"), "got: {err}");
        assert!(!path.exists());
    }
}
