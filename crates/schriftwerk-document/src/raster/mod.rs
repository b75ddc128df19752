// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page rasterization — turn one PDF page into a bitmap at a requested DPI.
//
// Rasters always show the page as displayed: `/Rotate` is applied, so pixel
// (0, 0) is the top-left corner a reader sees.

pub mod embedded;

#[cfg(feature = "pdfium")]
pub mod pdfium;

use image::DynamicImage;
use schriftwerk_core::error::Result;

use crate::pdf::reader::PdfReader;

pub use embedded::EmbeddedImageRasterizer;

/// Largest raster accepted from any backend, in pixels (roughly A3 at 600 DPI).
pub const MAX_RASTER_PIXELS: u64 = 70_000_000;

/// Converts a single page of a parsed document into an image.
///
/// Implementations run on blocking threads and must be shareable across them.
/// Failures are reported as [`SchriftwerkError::Rasterization`] carrying the
/// page index.
///
/// [`SchriftwerkError::Rasterization`]: schriftwerk_core::SchriftwerkError::Rasterization
pub trait PageRasterizer: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Render page `index` (0-based) of `source` at `dpi`.
    fn rasterize(&self, source: &PdfReader, index: usize, dpi: u32) -> Result<DynamicImage>;
}
