// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Neural OCR backend built on the `ocrs` crate, a pure-Rust engine whose
// models are executed by `rten`.
//
// # Feature Gate
//
// This module is only available when the `ocr` feature is enabled:
//
// ```toml
// schriftwerk-document = { path = "crates/schriftwerk-document", features = ["ocr"] }
// ```
//
// # Model Setup
//
// The engine requires two model files:
//
// - **Detection model** (`text-detection.rten`) — locates words in the image.
// - **Recognition model** (`text-recognition.rten`) — decodes characters.
//
// Running `ocrs-cli` once downloads both to `$XDG_CACHE_HOME/ocrs`
// (typically `~/.cache/ocrs`), which is where the default config looks.
//
// The models cover Latin script only. Requested languages are advisory: they
// are logged, never rejected.

use std::path::{Path, PathBuf};

use ocrs::{ImageSource, OcrEngine as OcrsEngine, OcrEngineParams, TextItem};
use rten::Model;
use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_core::{BoundingBox, PageRecognition, RasterGeometry, RecognizedWord};
use tracing::{debug, info, instrument};

use super::{RecognitionBackend, RecognitionRequest};

/// Well-known filenames for the detection and recognition models.
const DETECTION_MODEL_FILENAME: &str = "text-detection.rten";
const RECOGNITION_MODEL_FILENAME: &str = "text-recognition.rten";

/// `ocrs` does not score its output; every word is reported with this value.
pub const UNSCORED_CONFIDENCE: f32 = 1.0;

/// Default directory for cached OCR model files.
///
/// Follows the XDG Base Directory specification: `$XDG_CACHE_HOME/ocrs`, falling
/// back to `~/.cache/ocrs` when `XDG_CACHE_HOME` is unset.
fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg).join("ocrs")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".cache").join("ocrs")
    } else {
        PathBuf::from("ocrs-models")
    }
}

/// Locations of the two model files.
#[derive(Debug, Clone)]
pub struct OcrsModels {
    pub detection_model_path: PathBuf,
    pub recognition_model_path: PathBuf,
}

impl Default for OcrsModels {
    fn default() -> Self {
        Self::from_dir(default_model_dir())
    }
}

impl OcrsModels {
    /// Expects the directory to contain `text-detection.rten` and
    /// `text-recognition.rten`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detection_model_path: dir.join(DETECTION_MODEL_FILENAME),
            recognition_model_path: dir.join(RECOGNITION_MODEL_FILENAME),
        }
    }

    /// Verify that both model files exist.
    pub fn validate(&self) -> Result<()> {
        for path in [&self.detection_model_path, &self.recognition_model_path] {
            if !path.exists() {
                return Err(SchriftwerkError::OcrError(format!(
                    "model not found at {}; run `ocrs-cli` once to download models",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Recognition backend running the `ocrs` models in-process.
///
/// Model loading is the expensive step; build one backend and share it.
pub struct OcrsBackend {
    engine: OcrsEngine,
}

impl OcrsBackend {
    /// Load both models.
    ///
    /// # Performance
    ///
    /// `ocrs` and `rten` must be compiled in release mode; debug builds are
    /// 10-100x slower.
    #[instrument(skip_all, fields(
        detection = %models.detection_model_path.display(),
        recognition = %models.recognition_model_path.display(),
    ))]
    pub fn new(models: OcrsModels) -> Result<Self> {
        models.validate()?;

        info!("Loading OCR detection model");
        let detection_model = Model::load_file(&models.detection_model_path).map_err(|err| {
            SchriftwerkError::OcrError(format!(
                "failed to load detection model from {}: {}",
                models.detection_model_path.display(),
                err
            ))
        })?;

        info!("Loading OCR recognition model");
        let recognition_model =
            Model::load_file(&models.recognition_model_path).map_err(|err| {
                SchriftwerkError::OcrError(format!(
                    "failed to load recognition model from {}: {}",
                    models.recognition_model_path.display(),
                    err
                ))
            })?;

        let engine = OcrsEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(|err| {
            SchriftwerkError::OcrError(format!("failed to initialise OCR engine: {}", err))
        })?;

        info!("OCR engine initialised");
        Ok(Self { engine })
    }

    /// Load models from the default cache directory.
    pub fn with_defaults() -> Result<Self> {
        Self::new(OcrsModels::default())
    }
}

impl RecognitionBackend for OcrsBackend {
    fn name(&self) -> &str {
        "ocrs"
    }

    #[instrument(skip_all, fields(page = request.page, width = request.image.width(), height = request.image.height()))]
    fn recognize(&self, request: &RecognitionRequest<'_>) -> Result<PageRecognition> {
        let page = request.page;
        let fail = |detail: String| SchriftwerkError::Recognition { page, detail };
        let check_cancelled = || {
            if request.cancel.is_cancelled() {
                Err(fail("recognition cancelled".into()))
            } else {
                Ok(())
            }
        };

        if request.languages.iter().any(|code| code != "eng") {
            debug!(languages = %request.languages, "ocrs models are Latin-only; languages are advisory");
        }

        let rgb = request.image.to_rgb8();
        let (width, height) = rgb.dimensions();
        let source = ImageSource::from_bytes(rgb.as_raw(), (width, height)).map_err(|err| {
            fail(format!(
                "failed to create image source ({}x{}): {}",
                width, height, err
            ))
        })?;

        let input = self
            .engine
            .prepare_input(source)
            .map_err(|err| fail(format!("OCR preprocessing failed: {}", err)))?;
        check_cancelled()?;

        // Step 1: Detect word bounding boxes.
        let word_rects = self
            .engine
            .detect_words(&input)
            .map_err(|err| fail(format!("word detection failed: {}", err)))?;
        debug!(word_count = word_rects.len(), "Words detected");
        check_cancelled()?;

        // Step 2: Group words into text lines.
        let line_rects = self.engine.find_text_lines(&input, &word_rects);
        debug!(line_count = line_rects.len(), "Text lines found");

        // Step 3: Recognise characters within each line.
        let lines = self
            .engine
            .recognize_text(&input, &line_rects)
            .map_err(|err| fail(format!("line recognition failed: {}", err)))?;
        check_cancelled()?;

        let mut words = Vec::new();
        for (line_number, line) in lines.iter().flatten().enumerate() {
            for word in line.words() {
                let text = word.to_string();
                if text.trim().is_empty() {
                    continue;
                }
                let rect = word.rotated_rect().bounding_rect();
                let left = (rect.left() as f32).max(0.0) as u32;
                let top = (rect.top() as f32).max(0.0) as u32;
                let right = (rect.right() as f32).clamp(0.0, width as f32) as u32;
                let bottom = (rect.bottom() as f32).clamp(0.0, height as f32) as u32;
                words.push(RecognizedWord {
                    text: text.trim().to_owned(),
                    bbox: BoundingBox::new(
                        left,
                        top,
                        right.saturating_sub(left),
                        bottom.saturating_sub(top),
                    ),
                    confidence: UNSCORED_CONFIDENCE,
                    line: line_number as u32,
                });
            }
        }

        info!(words = words.len(), "OCR recognition complete");
        Ok(PageRecognition::from_words(
            words,
            RasterGeometry {
                width,
                height,
                dpi: request.dpi,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_models_point_to_cache_dir() {
        let models = OcrsModels::default();
        assert!(
            models
                .detection_model_path
                .to_string_lossy()
                .ends_with(DETECTION_MODEL_FILENAME)
        );
        assert!(
            models
                .recognition_model_path
                .to_string_lossy()
                .ends_with(RECOGNITION_MODEL_FILENAME)
        );
    }

    #[test]
    fn models_from_dir() {
        let models = OcrsModels::from_dir("/tmp/my-models");
        assert_eq!(
            models.detection_model_path,
            PathBuf::from("/tmp/my-models/text-detection.rten")
        );
        assert_eq!(
            models.recognition_model_path,
            PathBuf::from("/tmp/my-models/text-recognition.rten")
        );
    }

    #[test]
    fn missing_models_fail_validation() {
        let models = OcrsModels::from_dir("/nonexistent/path/ocr-models");
        assert!(models.validate().is_err());
        assert!(OcrsBackend::new(models).is_err());
    }
}
