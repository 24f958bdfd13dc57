//! Image binarization: encoded scan → black-and-white PNG.
//!
//! Phone photos and flatbed scans of paper forms have shading gradients that
//! defeat a single global threshold: the darker corner turns solid black and
//! the faint pen strokes in the bright corner vanish. Comparing each pixel
//! with a Gaussian-weighted mean of its own neighbourhood follows those
//! gradients instead.
//!
//! A pixel becomes white when `value > round(weighted_mean) - offset`, black
//! otherwise. Borders replicate the edge pixels. Grayscale conversion uses
//! the BT.601 weights (0.299, 0.587, 0.114) in 14-bit fixed point.
//! Phone JPEGs are turned upright from their EXIF orientation first.

use image::{DynamicImage, GrayImage, ImageDecoder, ImageFormat, ImageReader, Luma};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

/// Failure to turn the input bytes into a binarized PNG.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("{0}")]
    Decode(#[source] image::ImageError),

    #[error("PNG encoding failed: {0}")]
    Encode(#[source] image::ImageError),
}

/// Decode, grayscale, adaptive-threshold and re-encode an image.
///
/// `block_size` must be odd; `offset` is subtracted from the local mean.
/// Deterministic for identical input.
pub fn preprocess(bytes: &[u8], block_size: u32, offset: i32) -> Result<Vec<u8>, PreprocessError> {
    let img = decode_upright(bytes).map_err(PreprocessError::Decode)?;
    let gray = to_gray_bt601(&img);
    let binary = adaptive_threshold_gaussian(&gray, block_size, offset);

    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(binary)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(PreprocessError::Encode)?;

    debug!(
        "Binarized {}x{} image → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

/// Decode and apply the EXIF orientation, if any.
fn decode_upright(bytes: &[u8]) -> Result<DynamicImage, image::ImageError> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

fn to_gray_bt601(img: &DynamicImage) -> GrayImage {
    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let v = (r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + (1 << 13)) >> 14;
        Luma([v.min(255) as u8])
    })
}

/// Normalized 1-D Gaussian kernel with the sigma implied by its size.
fn gaussian_kernel(size: u32) -> Vec<f64> {
    let sigma = 0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (size as f64 - 1.0) / 2.0;
    let weights: Vec<f64> = (0..size)
        .map(|i| {
            let d = i as f64 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

fn adaptive_threshold_gaussian(gray: &GrayImage, block_size: u32, offset: i32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let kernel = gaussian_kernel(block_size);
    let radius = (block_size / 2) as i64;
    let clamp = |v: i64, max: u32| v.clamp(0, max as i64 - 1) as u32;

    // Horizontal pass.
    let mut horiz = vec![0f64; (w as usize) * (h as usize)];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = clamp(x as i64 + k as i64 - radius, w);
                acc += weight * gray.get_pixel(sx, y)[0] as f64;
            }
            horiz[(y * w + x) as usize] = acc;
        }
    }

    // Vertical pass, then compare.
    GrayImage::from_fn(w, h, |x, y| {
        let mut acc = 0.0;
        for (k, weight) in kernel.iter().enumerate() {
            let sy = clamp(y as i64 + k as i64 - radius, h);
            acc += weight * horiz[(sy * w + x) as usize];
        }
        let mean = acc.round().clamp(0.0, 255.0) as i32;
        let value = gray.get_pixel(x, y)[0] as i32;
        if value - mean > -offset {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}
