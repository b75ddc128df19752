// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Text recognition backends.
//
// A backend turns one page raster into words with pixel bounding boxes and
// confidences. Backends are blocking and run on the runtime's blocking pool;
// they observe a shared cancel flag so a page whose deadline passed can stop
// doing work.

pub mod tesseract;

#[cfg(feature = "ocr")]
pub mod neural;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use image::DynamicImage;
use schriftwerk_core::error::Result;
use schriftwerk_core::{LanguageSet, PageRecognition};

pub use tesseract::TesseractBackend;

#[cfg(feature = "ocr")]
pub use neural::OcrsBackend;

/// Cooperative cancellation signal shared between a scheduler and the
/// blocking work it spawned.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a backend needs to recognise one page.
pub struct RecognitionRequest<'a> {
    /// 0-based page index, for error attribution and logs.
    pub page: usize,
    pub image: &'a DynamicImage,
    pub languages: &'a LanguageSet,
    /// Resolution the raster was produced at.
    pub dpi: u32,
    /// Budget for this page. Backends that run external processes enforce it
    /// themselves; the pipeline enforces it regardless.
    pub timeout: Option<Duration>,
    pub cancel: &'a CancelFlag,
}

/// A multi-language OCR engine.
///
/// Implementations must be shareable across blocking threads. Word boxes are
/// reported in raster pixel space with a top-left origin, confidences in
/// `0.0..=1.0`.
pub trait RecognitionBackend: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    fn recognize(&self, request: &RecognitionRequest<'_>) -> Result<PageRecognition>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let observer = flag.clone();
        assert!(!observer.is_cancelled());
        flag.cancel();
        assert!(observer.is_cancelled());
    }
}
