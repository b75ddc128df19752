// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pdfium rasterizer — full-fidelity page rendering through `pdfium-render`.
//
// # Feature Gate
//
// Only available with the `pdfium` feature. The Pdfium shared library is
// loaded at runtime: from an explicit path, the `PDFIUM_LIBRARY_PATH`
// environment variable, the working directory, or the system library path,
// in that order.

use std::path::{Path, PathBuf};

use image::{DynamicImage, RgbaImage};
use pdfium_render::prelude::{PdfRenderConfig, Pdfium, PdfiumError};
use schriftwerk_core::error::{Result, SchriftwerkError};
use tracing::{debug, instrument};

use super::{MAX_RASTER_PIXELS, PageRasterizer};
use crate::pdf::reader::PdfReader;

const LIBRARY_PATH_ENV: &str = "PDFIUM_LIBRARY_PATH";

/// Renders pages with Pdfium. Handles vector text, mixed content and every
/// image codec Pdfium supports.
///
/// Pdfium bindings are not shared between threads, so each call binds the
/// library afresh; the cost is small next to rendering at scan resolution.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    /// Directory containing the platform Pdfium library, or the library file.
    library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library_path(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
        }
    }

    fn bind(&self) -> std::result::Result<Pdfium, PdfiumError> {
        let explicit = self
            .library_path
            .clone()
            .or_else(|| std::env::var_os(LIBRARY_PATH_ENV).map(PathBuf::from));
        if let Some(path) = explicit {
            return Pdfium::bind_to_library(library_file(&path)).map(Pdfium::new);
        }

        match Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./")) {
            Ok(bindings) => Ok(Pdfium::new(bindings)),
            Err(primary_err) => match Pdfium::bind_to_system_library() {
                Ok(bindings) => Ok(Pdfium::new(bindings)),
                Err(_) => Err(primary_err),
            },
        }
    }
}

fn library_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        Pdfium::pdfium_platform_library_name_at_path(path)
    } else {
        path.to_path_buf()
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn name(&self) -> &str {
        "pdfium"
    }

    #[instrument(skip(self, source), fields(page = index, dpi))]
    fn rasterize(&self, source: &PdfReader, index: usize, dpi: u32) -> Result<DynamicImage> {
        let fail = |detail: String| SchriftwerkError::Rasterization {
            page: index,
            detail,
        };

        let geometry = source.page_geometry(index).map_err(|err| fail(err.to_string()))?;
        let (target_w, target_h) = geometry.pixel_size(dpi);
        if target_w as u64 * target_h as u64 > MAX_RASTER_PIXELS {
            return Err(fail(format!(
                "raster of {target_w}x{target_h} at {dpi} DPI exceeds the pixel limit"
            )));
        }

        let pdfium = self
            .bind()
            .map_err(|err| fail(format!("failed to load Pdfium runtime: {err}")))?;
        let document = pdfium
            .load_pdf_from_byte_slice(source.bytes(), None)
            .map_err(|err| fail(format!("Pdfium cannot open document: {err}")))?;

        let page_index = u16::try_from(index).map_err(|_| fail("page index too large".into()))?;
        let page = document
            .pages()
            .get(page_index)
            .map_err(|err| fail(format!("Pdfium cannot load page: {err}")))?;

        let config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);
        let bitmap = page
            .render_with_config(&config)
            .map_err(|err| fail(format!("Pdfium render failed: {err}")))?;

        let width = bitmap.width() as u32;
        let height = bitmap.height() as u32;
        let rgba = RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes())
            .ok_or_else(|| fail("Pdfium returned a bitmap of unexpected size".into()))?;
        debug!(width, height, "Page rendered");

        Ok(DynamicImage::ImageRgba8(rgba))
    }
}
