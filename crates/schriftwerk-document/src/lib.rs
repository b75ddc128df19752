// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// schriftwerk-document — Document-level building blocks for the Schriftwerk
// OCR pipeline.
//
// Provides PDF inspection and searchable-PDF writing (lopdf), page
// rasterization backends, recognition backends (Tesseract CLI, and `ocrs`
// behind the `ocr` feature), and the scan preprocessing step.

pub mod image;
pub mod pdf;
pub mod raster;
pub mod recognize;
pub mod scan;

// Re-export the primary types so callers can use `schriftwerk_document::PdfReader` etc.
pub use image::processor::ImageProcessor;
pub use pdf::reader::{PageGeometry, PdfReader};
pub use pdf::writer::{PageOverlay, SearchablePdfWriter};
pub use raster::{EmbeddedImageRasterizer, PageRasterizer};
pub use recognize::{CancelFlag, RecognitionBackend, RecognitionRequest, TesseractBackend};
pub use scan::enhance::{EnhancePreprocessor, Preprocessor};

#[cfg(feature = "pdfium")]
pub use raster::pdfium::PdfiumRasterizer;

#[cfg(feature = "ocr")]
pub use recognize::neural::OcrsBackend;
