use std::path::Path;

use image::{DynamicImage, ImageBuffer, ImageFormat, Luma};
use ndarray::Array2;

use crate::error::{Result, XpcsError};

/// Load a bin mask from a grayscale image; each pixel value is its label.
///
/// 8- and 16-bit images are read at their native depth, so an 8-bit value
/// of `3` is label `3`. Colour images are converted to luma first.
pub fn load_mask(path: &Path) -> Result<Array2<u32>> {
    let img = image::open(path)?;
    let (w, h) = (img.width(), img.height());
    let mut mask = Array2::<u32>::zeros((h as usize, w as usize));

    match &img {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_) => {
            for (col, row, pixel) in img.to_luma8().enumerate_pixels() {
                mask[[row as usize, col as usize]] = u32::from(pixel.0[0]);
            }
        }
        _ => {
            for (col, row, pixel) in img.to_luma16().enumerate_pixels() {
                mask[[row as usize, col as usize]] = u32::from(pixel.0[0]);
            }
        }
    }

    tracing::debug!(path = %path.display(), rows = h, cols = w, "loaded bin mask");
    Ok(mask)
}

/// Save a bin mask as a 16-bit grayscale PNG.
pub fn save_mask(mask: &Array2<u32>, path: &Path) -> Result<()> {
    let (h, w) = mask.dim();
    let mut pixels: Vec<u16> = Vec::with_capacity(h * w);
    for &label in mask.iter() {
        let value = u16::try_from(label).map_err(|_| {
            XpcsError::InvalidConfig(format!("label {label} does not fit a 16-bit mask image"))
        })?;
        pixels.push(value);
    }

    let img = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
        .ok_or_else(|| XpcsError::InvalidConfig("mask buffer does not match its shape".into()))?;
    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}
