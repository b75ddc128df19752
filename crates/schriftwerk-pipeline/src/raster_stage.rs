// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page rasterization stage.
//
// A single producer walks the document in page order. Pages that already
// carry a text layer are passed on as extracted text when the stage is
// allowed to; every other page is rendered on
// the blocking pool and writes the raster as a PNG transient. Results are
// pushed into a bounded channel. The scheduler only takes a raster off the
// channel once a recognition slot is free, so at most `2 * K + 1` rasters
// exist at once: K recognising, K queued and one being written.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;
use schriftwerk_core::{PageRecognition, RasterGeometry};
use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_document::{ImageProcessor, PageRasterizer, PdfReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::resources::{JobResources, ResourceKind, TransientResource};

/// A rendered page waiting for recognition. Dropping it releases the raster.
#[derive(Debug)]
pub struct RasterPage {
    pub index: usize,
    pub geometry: RasterGeometry,
    path: PathBuf,
    file: TransientResource,
}

impl RasterPage {
    /// The PNG on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn resource(&self) -> &TransientResource {
        &self.file
    }

    /// Release the raster now.
    pub fn release(self) {
        self.file.release();
    }
}

/// One unit handed from the raster stage to the scheduler.
#[derive(Debug)]
pub enum PageWork {
    Ready(RasterPage),
    /// The page's own text layer, no recognition needed.
    Extracted {
        index: usize,
        recognition: PageRecognition,
    },
    Failed {
        index: usize,
        error: SchriftwerkError,
    },
}

impl PageWork {
    pub fn index(&self) -> usize {
        match self {
            Self::Ready(page) => page.index,
            Self::Extracted { index, .. } | Self::Failed { index, .. } => *index,
        }
    }
}

/// Pin an error that does not name a page to `page`.
fn attribute(page: usize, err: SchriftwerkError) -> SchriftwerkError {
    match err.page() {
        Some(_) => err,
        None => SchriftwerkError::Rasterization {
            page,
            detail: err.to_string(),
        },
    }
}

/// Everything the producer needs, shared with its task.
#[derive(Clone)]
pub struct RasterStage {
    pub rasterizer: Arc<dyn PageRasterizer>,
    pub source: Arc<PdfReader>,
    pub resources: Arc<JobResources>,
    pub dpi: u32,
    pub timeout: Duration,
    /// Take the text of pages that already have some instead of rendering
    /// them.
    pub use_text_layer: bool,
}

impl RasterStage {
    /// Render page `index` into a PNG transient.
    #[instrument(skip(self), fields(rasterizer = self.rasterizer.name()))]
    pub async fn rasterize_page(&self, index: usize) -> Result<RasterPage> {
        let image = self.render(index).await?;
        self.store(index, image).await
    }

    /// The page's existing text, if it has any that is not whitespace.
    ///
    /// Extraction problems only mean the page is rendered instead.
    pub async fn text_layer(&self, index: usize) -> Option<PageRecognition> {
        let source = Arc::clone(&self.source);
        let dpi = self.dpi;
        let extracted = tokio::task::spawn_blocking(move || {
            let text = source.page_text(index)?;
            let (width, height) = source.page_geometry(index)?.pixel_size(dpi);
            Ok::<_, SchriftwerkError>((text, RasterGeometry { width, height, dpi }))
        })
        .await;

        match extracted {
            Ok(Ok((text, geometry))) => {
                let recognition = PageRecognition::from_text_layer(&text, geometry);
                if recognition.words.is_empty() {
                    return None;
                }
                debug!(page = index, words = recognition.words.len(), "Using existing text layer");
                Some(recognition)
            }
            Ok(Err(err)) => {
                debug!(page = index, error = %err, "No usable text layer");
                None
            }
            Err(join_err) => {
                warn!(page = index, error = %join_err, "Text extraction crashed");
                None
            }
        }
    }

    /// Render on the blocking pool under the page timeout. Touches no
    /// transient, so the future may be dropped at any point.
    async fn render(&self, index: usize) -> Result<DynamicImage> {
        let rasterizer = Arc::clone(&self.rasterizer);
        let source = Arc::clone(&self.source);
        let dpi = self.dpi;
        let render = tokio::task::spawn_blocking(move || rasterizer.rasterize(&source, index, dpi));

        let image: DynamicImage = match tokio::time::timeout(self.timeout, render).await {
            Ok(Ok(rendered)) => rendered.map_err(|err| attribute(index, err))?,
            Ok(Err(join_err)) => {
                return Err(SchriftwerkError::Rasterization {
                    page: index,
                    detail: format!("rasterizer crashed: {join_err}"),
                });
            }
            Err(_) => {
                return Err(SchriftwerkError::Rasterization {
                    page: index,
                    detail: format!("timed out after {} ms", self.timeout.as_millis()),
                });
            }
        };
        if image.width() == 0 || image.height() == 0 {
            return Err(SchriftwerkError::Rasterization {
                page: index,
                detail: "rasterizer produced an empty image".into(),
            });
        }
        Ok(image)
    }

    /// Write a rendered page to a new raster transient.
    ///
    /// Must run to completion once started: dropping it mid-write would
    /// release the transient while the blocking writer still creates the file.
    async fn store(&self, index: usize, image: DynamicImage) -> Result<RasterPage> {
        let geometry = RasterGeometry {
            width: image.width(),
            height: image.height(),
            dpi: self.dpi,
        };
        let file = self
            .resources
            .allocate_file(ResourceKind::Raster, &format!("page-{index:04}.png"));
        let path = file.path().map(Path::to_path_buf).ok_or_else(|| {
            SchriftwerkError::Resource(format!("raster transient for page {index} has no path"))
        })?;

        let target = path.clone();
        let written = tokio::task::spawn_blocking(move || {
            ImageProcessor::from_dynamic(image).save(&target)
        })
        .await
        .map_err(|err| SchriftwerkError::Rasterization {
            page: index,
            detail: format!("raster writer crashed: {err}"),
        })?;
        // `file` is dropped on error, which removes any partial PNG.
        written.map_err(|err| SchriftwerkError::Rasterization {
            page: index,
            detail: format!("cannot store raster: {err}"),
        })?;

        debug!(width = geometry.width, height = geometry.height, "Page rasterized");
        Ok(RasterPage {
            index,
            geometry,
            path,
            file,
        })
    }

    /// Rasterize pages `0..page_count` in order on a background task.
    ///
    /// The task stops once the receiving side is gone. A render in progress
    /// is abandoned at that point; a raster being written is finished and
    /// then released with the unsent message, so the task never leaves a
    /// write running behind it.
    pub fn spawn(self, page_count: usize, outbox: mpsc::Sender<PageWork>) -> JoinHandle<()> {
        tokio::spawn(async move {
            for index in 0..page_count {
                if self.use_text_layer {
                    if let Some(recognition) = self.text_layer(index).await {
                        let work = PageWork::Extracted { index, recognition };
                        if outbox.send(work).await.is_err() {
                            debug!(page = index, "Scheduler gone; raster stage stopping");
                            break;
                        }
                        continue;
                    }
                }

                let rendered = tokio::select! {
                    biased;
                    _ = outbox.closed() => {
                        debug!(page = index, "Scheduler gone; raster stage stopping");
                        return;
                    }
                    rendered = self.render(index) => rendered,
                };
                let work = match rendered {
                    Ok(image) => self.store(index, image).await,
                    Err(error) => Err(error),
                };
                let work = match work {
                    Ok(page) => PageWork::Ready(page),
                    Err(error) => {
                        warn!(page = index, error = %error, "Rasterization failed");
                        PageWork::Failed { index, error }
                    }
                };
                if outbox.send(work).await.is_err() {
                    debug!(page = index, "Scheduler gone; raster stage stopping");
                    break;
                }
            }
        })
    }
}
