// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for pipeline overhead: a full job with instant
// rasterization and recognition, and text reassembly.

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use image::{DynamicImage, GrayImage, Luma};

use schriftwerk_core::error::Result;
use schriftwerk_core::{
    BoundingBox, DocumentRequest, LanguageSet, OutputMode, PageRecognition, PipelineConfig,
    RasterGeometry, RecognizedWord,
};
use schriftwerk_document::pdf::fixtures::{FixturePage, build_pdf};
use schriftwerk_document::{PageRasterizer, PdfReader, RecognitionBackend, RecognitionRequest};
use schriftwerk_pipeline::{JobOrchestrator, PageOutcome, ResourceManager, assemble_text};

// ---------------------------------------------------------------------------
// Instant stages
// ---------------------------------------------------------------------------

struct FlatRasterizer;

impl PageRasterizer for FlatRasterizer {
    fn name(&self) -> &str {
        "flat"
    }

    fn rasterize(&self, _source: &PdfReader, _index: usize, _dpi: u32) -> Result<DynamicImage> {
        Ok(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            128,
            128,
            Luma([255u8]),
        )))
    }
}

struct EchoBackend;

impl RecognitionBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    fn recognize(&self, request: &RecognitionRequest<'_>) -> Result<PageRecognition> {
        Ok(recognition(request.page))
    }
}

fn recognition(page: usize) -> PageRecognition {
    let words = (0..40u32)
        .map(|i| RecognizedWord {
            text: format!("w{page}-{i}"),
            bbox: BoundingBox::new((i % 8) * 16, (i / 8) * 20, 14, 12),
            confidence: 0.9,
            line: i / 8,
        })
        .collect();
    PageRecognition::from_words(
        words,
        RasterGeometry {
            width: 128,
            height: 128,
            dpi: 72,
        },
    )
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

/// One 8-page job through the whole pipeline with K = 4.
fn bench_job(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let resources = Arc::new(ResourceManager::new(scratch.path()).unwrap());
    let config = PipelineConfig {
        concurrency_limit: 4,
        raster_dpi: 72,
        default_languages: LanguageSet::default(),
        ..PipelineConfig::default()
    };
    let orchestrator =
        JobOrchestrator::new(config, resources, Arc::new(FlatRasterizer), Arc::new(EchoBackend))
            .unwrap();
    let pages: Vec<FixturePage> = (0..8).map(|_| FixturePage::blank(612.0, 792.0)).collect();
    let pdf = build_pdf(&pages);

    c.bench_function("job (8 pages, text)", |b| {
        b.iter(|| {
            let request = DocumentRequest::from_bytes("bench.pdf", pdf.clone(), OutputMode::Text);
            let result = runtime.block_on(orchestrator.run(request)).unwrap();
            black_box(result);
        });
    });
}

/// Join 100 recognised pages.
fn bench_assemble_text(c: &mut Criterion) {
    let pages: Vec<PageOutcome> = (0..100)
        .map(|page| PageOutcome::Done(recognition(page)))
        .collect();

    c.bench_function("assemble_text (100 pages)", |b| {
        b.iter(|| black_box(assemble_text(black_box(&pages))));
    });
}

criterion_group!(benches, bench_job, bench_assemble_text);
criterion_main!(benches);
