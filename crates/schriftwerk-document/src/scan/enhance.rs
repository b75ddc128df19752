// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan enhancement — despeckle, contrast stretch and Otsu binarization of page
// rasters ahead of recognition.

use image::{DynamicImage, GrayImage, Luma};
use imageproc::filter::median_filter;
use schriftwerk_core::error::Result;
use tracing::{debug, instrument};

use crate::image::processor::ImageProcessor;

/// A cleanup step run on a page raster before it reaches the recognition
/// backend. Implementations must not change the image dimensions, since word
/// boxes are reported against the original raster.
pub trait Preprocessor: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    fn process(&self, image: DynamicImage) -> Result<DynamicImage>;
}

/// Grayscale, median despeckle, contrast stretch, then global Otsu
/// binarization. Suited to noisy or faint scans.
#[derive(Debug, Clone)]
pub struct EnhancePreprocessor {
    /// Median filter radius in pixels; 0 disables despeckling.
    pub despeckle_radius: u32,
    /// Whether to finish with Otsu binarization.
    pub binarize: bool,
}

impl Default for EnhancePreprocessor {
    fn default() -> Self {
        Self {
            despeckle_radius: 1,
            binarize: true,
        }
    }
}

impl Preprocessor for EnhancePreprocessor {
    fn name(&self) -> &str {
        "enhance"
    }

    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    fn process(&self, image: DynamicImage) -> Result<DynamicImage> {
        let mut gray = ImageProcessor::from_dynamic(image)
            .grayscale()
            .into_dynamic()
            .to_luma8();

        if self.despeckle_radius > 0 {
            gray = median_filter(&gray, self.despeckle_radius, self.despeckle_radius);
        }

        let stretched = ImageProcessor::from_dynamic(DynamicImage::ImageLuma8(gray))
            .stretch_contrast()
            .into_dynamic()
            .to_luma8();

        if !self.binarize {
            return Ok(DynamicImage::ImageLuma8(stretched));
        }

        let threshold = otsu_threshold(&stretched);
        debug!(threshold, "Otsu threshold computed");
        Ok(DynamicImage::ImageLuma8(apply_threshold(&stretched, threshold)))
    }
}

fn apply_threshold(gray: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let val = gray.get_pixel(x, y).0[0];
        Luma([if val < threshold { 0u8 } else { 255u8 }])
    })
}

/// Compute the Otsu threshold for a grayscale image.
///
/// Finds the threshold value that maximises the between-class variance of the
/// black and white pixel groups.
fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }

    let total_pixels = gray.width() as u64 * gray.height() as u64;
    if total_pixels == 0 {
        return 128;
    }

    let sum_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut sum_background: f64 = 0.0;
    let mut weight_background: u64 = 0;
    let mut max_variance: f64 = 0.0;
    let mut best_threshold: u8 = 0;

    for (t, &count) in histogram.iter().enumerate() {
        weight_background += count;
        if weight_background == 0 {
            continue;
        }
        let weight_foreground = total_pixels - weight_background;
        if weight_foreground == 0 {
            break;
        }

        sum_background += t as f64 * count as f64;
        let mean_background = sum_background / weight_background as f64;
        let mean_foreground = (sum_total - sum_background) / weight_foreground as f64;

        let between_variance = weight_background as f64
            * weight_foreground as f64
            * (mean_background - mean_foreground).powi(2);

        if between_variance > max_variance {
            max_variance = between_variance;
            // Pixels strictly below the threshold become black, so the cut
            // sits one above the last background level.
            best_threshold = (t as u8).saturating_add(1);
        }
    }

    best_threshold
}
