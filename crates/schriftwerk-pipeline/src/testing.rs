// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Test doubles for the pipeline: a rasterizer and a recognition backend
// with scriptable delays and failures, plus PDF fixtures.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use image::{DynamicImage, GrayImage, Luma};
use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_core::{BoundingBox, PageRecognition, RasterGeometry, RecognizedWord};
use schriftwerk_document::pdf::fixtures::{FixturePage, build_pdf};
use schriftwerk_document::{PageRasterizer, PdfReader, RecognitionBackend, RecognitionRequest};

const STEP: Duration = Duration::from_millis(5);

/// A PDF of `pages` blank Letter pages.
pub fn pdf_with_pages(pages: usize) -> Vec<u8> {
    let pages: Vec<FixturePage> = (0..pages)
        .map(|_| FixturePage::blank(612.0, 792.0))
        .collect();
    build_pdf(&pages)
}

/// A copy of `pdf` whose trailer declares encryption.
pub fn encrypted(pdf: &[u8]) -> Vec<u8> {
    use lopdf::{Document, Object, StringFormat, dictionary};

    let mut document = Document::load_mem(pdf).unwrap();
    let encrypt_id = document.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => 1,
        "R" => 2,
        "O" => Object::String(vec![0x11; 32], StringFormat::Hexadecimal),
        "U" => Object::String(vec![0x22; 32], StringFormat::Hexadecimal),
        "P" => -4,
    });
    document.trailer.set("Encrypt", encrypt_id);
    document.trailer.set(
        "ID",
        vec![
            Object::String(vec![0x33; 16], StringFormat::Hexadecimal),
            Object::String(vec![0x33; 16], StringFormat::Hexadecimal),
        ],
    );
    let mut bytes = Vec::new();
    document.save_to(&mut bytes).unwrap();
    bytes
}

/// The words `FakeBackend` reports for page `index`.
pub fn page_words(index: usize) -> Vec<RecognizedWord> {
    vec![
        RecognizedWord {
            text: "page".into(),
            bbox: BoundingBox::new(4, 4, 20, 8),
            confidence: 0.9,
            line: 0,
        },
        RecognizedWord {
            text: index.to_string(),
            bbox: BoundingBox::new(28, 4, 8, 8),
            confidence: 0.7,
            line: 0,
        },
    ]
}

/// What `FakeBackend` returns for page `index` of a 64x48 raster at 72 DPI.
pub fn page_recognition(index: usize) -> PageRecognition {
    PageRecognition::from_words(
        page_words(index),
        RasterGeometry {
            width: 64,
            height: 48,
            dpi: 72,
        },
    )
}

/// Sleep `total` in small steps, giving up early once `cancelled` says so.
fn cooperative_sleep(total: Duration, cancelled: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < total {
        if cancelled() {
            return false;
        }
        std::thread::sleep(STEP.min(total.saturating_sub(start.elapsed())));
    }
    true
}

// ---------------------------------------------------------------------------
// FakeRasterizer
// ---------------------------------------------------------------------------

/// Renders every page as a small striped 64x48 image.
#[derive(Debug, Clone, Default)]
pub struct FakeRasterizer {
    failing: HashSet<usize>,
    delay: Duration,
}

impl FakeRasterizer {
    pub fn failing_on(mut self, pages: impl IntoIterator<Item = usize>) -> Self {
        self.failing.extend(pages);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl PageRasterizer for FakeRasterizer {
    fn name(&self) -> &str {
        "fake"
    }

    fn rasterize(&self, source: &PdfReader, index: usize, _dpi: u32) -> Result<DynamicImage> {
        std::thread::sleep(self.delay);
        if index >= source.page_count() || self.failing.contains(&index) {
            return Err(SchriftwerkError::Rasterization {
                page: index,
                detail: "corrupt page".into(),
            });
        }
        let image = GrayImage::from_fn(64, 48, |_, y| {
            if y % 8 < 3 { Luma([30u8]) } else { Luma([220u8]) }
        });
        Ok(DynamicImage::ImageLuma8(image))
    }
}

// ---------------------------------------------------------------------------
// FakeBackend
// ---------------------------------------------------------------------------

/// Reports "page <index>" for every page, after a configurable delay.
///
/// Delays observe the request's cancel flag. The backend records how many
/// recognitions ran at once.
#[derive(Debug, Default)]
pub struct FakeBackend {
    delay: Duration,
    page_delays: HashMap<usize, Duration>,
    failing: HashSet<usize>,
    panicking: HashSet<usize>,
    occupied: Option<(PathBuf, String)>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeBackend {
    /// Delay for every page without its own delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_page_delay(mut self, page: usize, delay: Duration) -> Self {
        self.page_delays.insert(page, delay);
        self
    }

    pub fn failing_on(mut self, pages: impl IntoIterator<Item = usize>) -> Self {
        self.failing.extend(pages);
        self
    }

    pub fn panicking_on(mut self, pages: impl IntoIterator<Item = usize>) -> Self {
        self.panicking.extend(pages);
        self
    }

    /// While recognising, create a directory called `name` inside every job
    /// directory under `scratch`, so a later file write to that name fails.
    pub fn occupying(mut self, scratch: impl Into<PathBuf>, name: &str) -> Self {
        self.occupied = Some((scratch.into(), name.to_owned()));
        self
    }

    /// Highest number of recognitions observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RecognitionBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn recognize(&self, request: &RecognitionRequest<'_>) -> Result<PageRecognition> {
        let page = request.page;
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveGuard(&self.active);
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        let delay = self.page_delays.get(&page).copied().unwrap_or(self.delay);
        if !cooperative_sleep(delay, || request.cancel.is_cancelled()) {
            return Err(SchriftwerkError::Recognition {
                page,
                detail: "cancelled".into(),
            });
        }
        if let Some((scratch, name)) = &self.occupied {
            for job_dir in std::fs::read_dir(scratch).into_iter().flatten().flatten() {
                if job_dir.path().is_dir() {
                    std::fs::create_dir_all(job_dir.path().join(name)).unwrap();
                }
            }
        }
        if self.panicking.contains(&page) {
            panic!("fake backend exploded on page {page}");
        }
        if self.failing.contains(&page) {
            return Err(SchriftwerkError::Recognition {
                page,
                detail: "unrecognisable".into(),
            });
        }

        Ok(PageRecognition::from_words(
            page_words(page),
            RasterGeometry {
                width: request.image.width(),
                height: request.image.height(),
                dpi: request.dpi,
            },
        ))
    }
}
