// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image processor — decoding, resampling, quarter-turn orientation, grayscale,
// contrast stretching and PNG encoding for page rasters. Operates on in-memory
// images using the `image` crate.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use schriftwerk_core::error::{Result, SchriftwerkError};
use tracing::{debug, instrument};

/// Image processing pipeline operating on a single in-memory image.
///
/// Each transformation consumes `self` and returns a new `ImageProcessor`,
/// enabling method chaining.
///
/// ```ignore
/// let png = ImageProcessor::from_bytes(&jpeg)?
///     .orient(90)
///     .resize_exact(2550, 3300)
///     .to_png_bytes()?;
/// ```
pub struct ImageProcessor {
    /// The current working image.
    image: DynamicImage,
}

impl ImageProcessor {
    // -- Construction ---------------------------------------------------------

    /// Load an image from a file path.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let img = image::open(path.as_ref()).map_err(|err| {
            SchriftwerkError::ImageError(format!(
                "failed to open {}: {}",
                path.as_ref().display(),
                err
            ))
        })?;
        debug!(width = img.width(), height = img.height(), "Image loaded");
        Ok(Self { image: img })
    }

    /// Create a processor from encoded bytes, with an explicit format when
    /// the container is known (e.g. a PDF `/DCTDecode` stream).
    #[instrument(skip(data), fields(data_len = data.len()))]
    pub fn from_bytes(data: &[u8], format: Option<ImageFormat>) -> Result<Self> {
        let decoded = match format {
            Some(format) => image::load_from_memory_with_format(data, format),
            None => image::load_from_memory(data),
        };
        let img = decoded.map_err(|err| {
            SchriftwerkError::ImageError(format!("failed to decode image: {}", err))
        })?;
        debug!(
            width = img.width(),
            height = img.height(),
            "Image decoded from bytes"
        );
        Ok(Self { image: img })
    }

    /// Wrap an already-decoded `DynamicImage`.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self { image }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Consume the processor and return the underlying `DynamicImage`.
    pub fn into_dynamic(self) -> DynamicImage {
        self.image
    }

    // -- Transformations (consume self, return new Self) -----------------------

    /// Resize to exactly `width` x `height`, ignoring aspect ratio.
    ///
    /// Uses Triangle filtering: fast, and good enough for text at scan DPI.
    pub fn resize_exact(self, width: u32, height: u32) -> Self {
        if self.image.width() == width && self.image.height() == height {
            return self;
        }
        debug!(
            from_w = self.image.width(),
            from_h = self.image.height(),
            width,
            height,
            "Resampling image"
        );
        Self {
            image: self.image.resize_exact(width, height, FilterType::Triangle),
        }
    }

    /// Rotate clockwise by a PDF `/Rotate` value (0, 90, 180 or 270).
    /// Other values leave the image unchanged.
    pub fn orient(self, rotation: u16) -> Self {
        let image = match rotation {
            90 => self.image.rotate90(),
            180 => self.image.rotate180(),
            270 => self.image.rotate270(),
            _ => self.image,
        };
        Self { image }
    }

    /// Convert the image to grayscale (luma).
    pub fn grayscale(self) -> Self {
        Self {
            image: DynamicImage::ImageLuma8(self.image.to_luma8()),
        }
    }

    /// Linearly stretch luma so the darkest pixel maps to 0 and the lightest
    /// to 255. Flat images are returned unchanged.
    pub fn stretch_contrast(self) -> Self {
        let gray = self.image.to_luma8();
        let (low, high) = gray
            .pixels()
            .fold((u8::MAX, u8::MIN), |(lo, hi), px| (lo.min(px.0[0]), hi.max(px.0[0])));
        if high <= low {
            return Self {
                image: DynamicImage::ImageLuma8(gray),
            };
        }

        let span = (high - low) as f32;
        let stretched = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            let value = gray.get_pixel(x, y).0[0];
            let scaled = (value - low) as f32 * 255.0 / span;
            Luma([scaled.round().clamp(0.0, 255.0) as u8])
        });
        debug!(low, high, "Contrast stretched");
        Self {
            image: DynamicImage::ImageLuma8(stretched),
        }
    }

    // -- Output ---------------------------------------------------------------

    /// Encode the current image as PNG bytes.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        encode_to_format(&self.image, ImageFormat::Png)
    }

    /// Write the image to a file. The format is inferred from the file extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.image.save(path.as_ref()).map_err(|err| {
            SchriftwerkError::ImageError(format!(
                "failed to save image to {}: {}",
                path.as_ref().display(),
                err
            ))
        })
    }
}

/// Encode a `DynamicImage` into the specified format, returning the raw bytes.
fn encode_to_format(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buffer);
    image
        .write_to(&mut cursor, format)
        .map_err(|err| SchriftwerkError::ImageError(format!("image encoding failed: {}", err)))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, _| {
            Luma([100 + (x % 50) as u8])
        }))
    }

    #[test]
    fn orient_swaps_dimensions_for_quarter_turns() {
        let rotated = ImageProcessor::from_dynamic(gradient(40, 10)).orient(90);
        assert_eq!((rotated.width(), rotated.height()), (10, 40));
        let flipped = ImageProcessor::from_dynamic(gradient(40, 10)).orient(180);
        assert_eq!((flipped.width(), flipped.height()), (40, 10));
    }

    #[test]
    fn stretch_contrast_uses_full_range() {
        let stretched = ImageProcessor::from_dynamic(gradient(50, 2))
            .stretch_contrast()
            .into_dynamic()
            .to_luma8();
        let values: Vec<u8> = stretched.pixels().map(|p| p.0[0]).collect();
        assert_eq!(values.iter().min(), Some(&0));
        assert_eq!(values.iter().max(), Some(&255));
    }

    #[test]
    fn png_round_trip_preserves_size() {
        let png = ImageProcessor::from_dynamic(gradient(12, 7))
            .to_png_bytes()
            .unwrap();
        let decoded = ImageProcessor::from_bytes(&png, Some(ImageFormat::Png)).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (12, 7));
    }

    #[test]
    fn undecodable_bytes_are_an_image_error() {
        let err = ImageProcessor::from_bytes(b"nope", None).err().unwrap();
        assert!(matches!(err, SchriftwerkError::ImageError(_)));
    }
}
