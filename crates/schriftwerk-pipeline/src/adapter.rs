// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Recognition adapter — the async face of a blocking `RecognitionBackend`.
//
// For one raster it loads the PNG, applies the optional preprocessor and runs
// the backend on the blocking pool under the per-page timeout. Backend output
// is normalised before it leaves the adapter: word text is sanitised, empty
// words are dropped and confidences are clamped to `0.0..=1.0`.

use std::sync::Arc;
use std::time::Duration;

use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_core::text::sanitize;
use schriftwerk_core::{LanguageSet, PageRecognition, RecognizedWord};
use schriftwerk_document::{
    CancelFlag, ImageProcessor, Preprocessor, RecognitionBackend, RecognitionRequest,
};
use tracing::{debug, instrument, warn};

use crate::raster_stage::RasterPage;

/// Runs one backend for the pipeline.
pub struct RecognitionAdapter {
    backend: Arc<dyn RecognitionBackend>,
    preprocessor: Option<Arc<dyn Preprocessor>>,
    page_timeout: Duration,
}

impl RecognitionAdapter {
    pub fn new(backend: Arc<dyn RecognitionBackend>, page_timeout: Duration) -> Self {
        Self {
            backend,
            preprocessor: None,
            page_timeout,
        }
    }

    /// Run `preprocessor` on every raster before recognition.
    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn Preprocessor>) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn page_timeout(&self) -> Duration {
        self.page_timeout
    }

    /// Recognise one raster.
    ///
    /// When the page timeout passes, `cancel` is raised so the backend can
    /// stop, and `RecognitionTimeout` is returned without waiting for it.
    #[instrument(skip_all, fields(page = page.index, backend = self.backend.name()))]
    pub async fn recognize(
        &self,
        page: &RasterPage,
        languages: &LanguageSet,
        cancel: CancelFlag,
    ) -> Result<PageRecognition> {
        let index = page.index;
        let dpi = page.geometry.dpi;
        let path = page.path().to_path_buf();
        let backend = Arc::clone(&self.backend);
        let preprocessor = self.preprocessor.clone();
        let languages = languages.clone();
        let timeout = self.page_timeout;
        let flag = cancel.clone();

        let work = tokio::task::spawn_blocking(move || {
            let image = ImageProcessor::open(&path)
                .map_err(|err| SchriftwerkError::Recognition {
                    page: index,
                    detail: format!("unreadable raster: {err}"),
                })?
                .into_dynamic();
            if image.width() == 0 || image.height() == 0 {
                return Err(SchriftwerkError::Recognition {
                    page: index,
                    detail: "empty image".into(),
                });
            }
            let image = match &preprocessor {
                Some(preprocessor) => {
                    debug!(page = index, preprocessor = preprocessor.name(), "Preprocessing raster");
                    preprocessor.process(image)?
                }
                None => image,
            };
            backend.recognize(&RecognitionRequest {
                page: index,
                image: &image,
                languages: &languages,
                dpi,
                timeout: Some(timeout),
                cancel: &flag,
            })
        });

        let raw = match tokio::time::timeout(timeout, work).await {
            Ok(Ok(result)) => result.map_err(|err| match err.page() {
                Some(_) => err,
                None => SchriftwerkError::Recognition {
                    page: index,
                    detail: err.to_string(),
                },
            })?,
            Ok(Err(join_err)) => {
                return Err(SchriftwerkError::Recognition {
                    page: index,
                    detail: if join_err.is_panic() {
                        "recognition backend crashed".into()
                    } else {
                        format!("recognition task ended early: {join_err}")
                    },
                });
            }
            Err(_) => {
                cancel.cancel();
                warn!(page = index, after_ms = timeout.as_millis() as u64, "Recognition timed out");
                return Err(SchriftwerkError::RecognitionTimeout {
                    page: index,
                    after_ms: timeout.as_millis() as u64,
                });
            }
        };

        let recognition = normalise(raw);
        debug!(
            page = index,
            words = recognition.words.len(),
            confidence = recognition.confidence,
            "Page recognised"
        );
        Ok(recognition)
    }
}

/// Sanitise word text, drop words that end up empty and clamp confidences,
/// then rebuild page text and mean confidence from what is left.
fn normalise(raw: PageRecognition) -> PageRecognition {
    let words: Vec<RecognizedWord> = raw
        .words
        .into_iter()
        .filter_map(|word| {
            let text = sanitize(&word.text).trim().to_owned();
            if text.is_empty() {
                return None;
            }
            let confidence = if word.confidence.is_nan() {
                0.0
            } else {
                word.confidence.clamp(0.0, 1.0)
            };
            Some(RecognizedWord {
                text,
                confidence,
                ..word
            })
        })
        .collect();
    PageRecognition::from_words(words, raw.geometry)
}
