// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Schriftwerk.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for all Schriftwerk operations.
#[derive(Debug, Error)]
pub enum SchriftwerkError {
    // -- Job-fatal errors --
    /// Undecodable, encrypted, empty, or oversized source document.
    #[error("invalid input document: {0}")]
    Input(String),

    #[error("reassembly failed: {0}")]
    Reassembly(String),

    #[error("job deadline of {after_ms} ms exceeded")]
    GlobalTimeout { after_ms: u64 },

    // -- Page-level errors (recorded on the page, never fatal) --
    #[error("rasterization of page {page} failed: {detail}")]
    Rasterization { page: usize, detail: String },

    #[error("recognition of page {page} failed: {detail}")]
    Recognition { page: usize, detail: String },

    #[error("recognition of page {page} timed out after {after_ms} ms")]
    RecognitionTimeout { page: usize, after_ms: u64 },

    #[error("page {page} was unfinished when the job deadline passed")]
    DeadlineExceeded { page: usize },

    #[error("{failed} of {total} pages failed, above the tolerated ratio")]
    TooManyFailedPages { failed: usize, total: usize },

    // -- Backend errors (not yet attributed to a page) --
    #[error("PDF operation failed: {0}")]
    PdfError(String),

    #[error("image processing failed: {0}")]
    ImageError(String),

    #[error("OCR engine failed: {0}")]
    OcrError(String),

    // -- Scheduling / lifecycle --
    #[error("a recognition batch is already in flight for job {0}")]
    BatchInFlight(String),

    #[error("transient resource error: {0}")]
    Resource(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    // -- Storage / persistence --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification carried on recorded job errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Input,
    Rasterization,
    Recognition,
    Timeout,
    Reassembly,
    /// The job-level failed-page policy tripped.
    Policy,
    Internal,
}

impl SchriftwerkError {
    /// Classification used when the error is recorded on a job or page.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) => ErrorKind::Input,
            Self::Reassembly(_) => ErrorKind::Reassembly,
            Self::GlobalTimeout { .. }
            | Self::RecognitionTimeout { .. }
            | Self::DeadlineExceeded { .. } => ErrorKind::Timeout,
            Self::TooManyFailedPages { .. } => ErrorKind::Policy,
            Self::Rasterization { .. } | Self::PdfError(_) => ErrorKind::Rasterization,
            Self::Recognition { .. } | Self::OcrError(_) | Self::ImageError(_) => {
                ErrorKind::Recognition
            }
            Self::BatchInFlight(_)
            | Self::Resource(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// The page this error is attributed to, if any.
    pub fn page(&self) -> Option<usize> {
        match self {
            Self::Rasterization { page, .. }
            | Self::Recognition { page, .. }
            | Self::RecognitionTimeout { page, .. }
            | Self::DeadlineExceeded { page } => Some(*page),
            _ => None,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SchriftwerkError>;
