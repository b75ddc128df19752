// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Rasterizer and recognition backend selection, and orchestrator assembly.

use std::path::PathBuf;
use std::sync::Arc;

use clap::ValueEnum;
use schriftwerk_core::PipelineConfig;
use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_document::{
    EmbeddedImageRasterizer, EnhancePreprocessor, PageRasterizer, RecognitionBackend,
    TesseractBackend,
};
use schriftwerk_pipeline::{JobOrchestrator, ResourceManager};
use tracing::info;

/// How pages are turned into bitmaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RasterizerChoice {
    /// Decode the scan image embedded in each page (no native libraries)
    Embedded,
    /// Render pages with PDFium (needs the `pdfium` feature and libpdfium)
    Pdfium,
}

/// Which OCR engine recognises the pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendChoice {
    /// The `tesseract` command-line tool
    Tesseract,
    /// In-process neural OCR (needs the `ocr` feature and downloaded models)
    Ocrs,
}

/// Everything needed to build the engines for a run.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub rasterizer: RasterizerChoice,
    pub backend: BackendChoice,
    /// Path to the `tesseract` binary; `PATH` lookup when absent.
    pub tesseract: Option<PathBuf>,
    /// Directory holding the `ocrs` model files.
    pub models: Option<PathBuf>,
    /// Clean up scans before recognition.
    pub enhance: bool,
    /// OCR every page, even those that already carry text.
    pub force_ocr: bool,
}

pub fn build_rasterizer(choice: RasterizerChoice) -> Result<Arc<dyn PageRasterizer>> {
    match choice {
        RasterizerChoice::Embedded => Ok(Arc::new(EmbeddedImageRasterizer)),
        #[cfg(feature = "pdfium")]
        RasterizerChoice::Pdfium => Ok(Arc::new(schriftwerk_document::PdfiumRasterizer::new())),
        #[cfg(not(feature = "pdfium"))]
        RasterizerChoice::Pdfium => Err(SchriftwerkError::Config(
            "this build has no PDFium support; rebuild with the `pdfium` feature".into(),
        )),
    }
}

pub fn build_backend(options: &EngineOptions) -> Result<Arc<dyn RecognitionBackend>> {
    match options.backend {
        BackendChoice::Tesseract => {
            let backend = match &options.tesseract {
                Some(binary) => TesseractBackend::with_binary(binary.clone()),
                None => TesseractBackend::new(),
            };
            Ok(Arc::new(backend))
        }
        #[cfg(feature = "ocr")]
        BackendChoice::Ocrs => {
            use schriftwerk_document::recognize::neural::{OcrsBackend, OcrsModels};
            let models = match &options.models {
                Some(dir) => OcrsModels::from_dir(dir),
                None => OcrsModels::default(),
            };
            Ok(Arc::new(OcrsBackend::new(models)?))
        }
        #[cfg(not(feature = "ocr"))]
        BackendChoice::Ocrs => Err(SchriftwerkError::Config(
            "this build has no neural OCR; rebuild with the `ocr` feature".into(),
        )),
    }
}

/// Assemble an orchestrator from a validated config and engine choices.
pub fn build_orchestrator(
    config: PipelineConfig,
    resources: Arc<ResourceManager>,
    options: &EngineOptions,
) -> Result<JobOrchestrator> {
    let rasterizer = build_rasterizer(options.rasterizer)?;
    let backend = build_backend(options)?;
    info!(
        rasterizer = rasterizer.name(),
        backend = backend.name(),
        enhance = options.enhance,
        force_ocr = options.force_ocr,
        "Engines ready"
    );

    let orchestrator = JobOrchestrator::new(config, resources, rasterizer, backend)?
        .with_text_layer(!options.force_ocr);
    Ok(if options.enhance {
        orchestrator.with_preprocessor(Arc::new(EnhancePreprocessor::default()))
    } else {
        orchestrator
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(backend: BackendChoice) -> EngineOptions {
        EngineOptions {
            rasterizer: RasterizerChoice::Embedded,
            backend,
            tesseract: None,
            models: None,
            enhance: false,
            force_ocr: false,
        }
    }

    #[test]
    fn default_engines_need_no_native_libraries() {
        assert_eq!(build_rasterizer(RasterizerChoice::Embedded).unwrap().name(), "embedded");
        assert_eq!(build_backend(&options(BackendChoice::Tesseract)).unwrap().name(), "tesseract");
    }

    #[cfg(not(feature = "ocr"))]
    #[test]
    fn neural_backend_needs_the_ocr_feature() {
        let err = build_backend(&options(BackendChoice::Ocrs)).err().unwrap();
        assert!(matches!(err, SchriftwerkError::Config(_)));
    }

    #[cfg(not(feature = "pdfium"))]
    #[test]
    fn pdfium_needs_its_feature() {
        let err = build_rasterizer(RasterizerChoice::Pdfium).err().unwrap();
        assert!(matches!(err, SchriftwerkError::Config(_)));
    }

    #[test]
    fn orchestrator_takes_the_validated_config() {
        let scratch = tempfile::tempdir().unwrap();
        let resources = Arc::new(ResourceManager::new(scratch.path()).unwrap());
        let config = PipelineConfig {
            concurrency_limit: 2,
            ..PipelineConfig::default()
        };
        let mut opts = options(BackendChoice::Tesseract);
        opts.enhance = true;

        let orchestrator = build_orchestrator(config, resources, &opts).unwrap();
        assert_eq!(orchestrator.config().concurrency_limit, 2);
    }
}
