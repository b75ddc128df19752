// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Source admission — decide whether a document may enter the pipeline.

use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_document::PdfReader;
use tracing::{debug, instrument};

/// Largest accepted source, in bytes.
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 50 * 1024 * 1024;
/// Largest accepted page count.
pub const DEFAULT_MAX_PAGES: usize = 100;

/// Hard bounds on what a job accepts. Fixed when the orchestrator is built;
/// not part of the runtime configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLimits {
    pub max_bytes: usize,
    pub max_pages: usize,
}

impl Default for SourceLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_SOURCE_BYTES,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl SourceLimits {
    /// Parse `bytes` and check it against the limits and the page count the
    /// caller declared. Every rejection is an `Input` error.
    #[instrument(skip_all, fields(bytes = bytes.len(), declared_pages = ?declared_pages))]
    pub fn admit(&self, bytes: Vec<u8>, declared_pages: Option<usize>) -> Result<PdfReader> {
        if bytes.is_empty() {
            return Err(SchriftwerkError::Input("document is empty".into()));
        }
        if bytes.len() > self.max_bytes {
            return Err(SchriftwerkError::Input(format!(
                "document is {} bytes, above the limit of {} bytes",
                bytes.len(),
                self.max_bytes
            )));
        }

        let reader = PdfReader::from_bytes(bytes)
            .map_err(|err| SchriftwerkError::Input(format!("not a readable PDF: {err}")))?;
        if reader.is_encrypted() {
            return Err(SchriftwerkError::Input(
                "document is encrypted; decrypt it before processing".into(),
            ));
        }

        let pages = reader.page_count();
        if pages == 0 {
            return Err(SchriftwerkError::Input("document has no pages".into()));
        }
        if pages > self.max_pages {
            return Err(SchriftwerkError::Input(format!(
                "document has {pages} pages, above the limit of {}",
                self.max_pages
            )));
        }
        if let Some(declared) = declared_pages {
            if declared != pages {
                return Err(SchriftwerkError::Input(format!(
                    "declared page count {declared} does not match the document's {pages} pages"
                )));
            }
        }

        debug!(pages, "Source admitted");
        Ok(reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{encrypted, pdf_with_pages};

    fn rejection(limits: &SourceLimits, bytes: Vec<u8>, declared: Option<usize>) -> String {
        match limits.admit(bytes, declared) {
            Err(SchriftwerkError::Input(message)) => message,
            Err(other) => panic!("expected an input error, got {other}"),
            Ok(_) => panic!("expected rejection"),
        }
    }

    #[test]
    fn admits_a_valid_document() {
        let reader = SourceLimits::default().admit(pdf_with_pages(3), Some(3)).unwrap();
        assert_eq!(reader.page_count(), 3);
    }

    #[test]
    fn rejects_empty_and_oversized_sources() {
        let limits = SourceLimits {
            max_bytes: 64,
            ..SourceLimits::default()
        };
        assert!(rejection(&limits, Vec::new(), None).contains("empty"));
        assert!(rejection(&limits, pdf_with_pages(1), None).contains("limit"));
    }

    #[test]
    fn rejects_garbage() {
        rejection(&SourceLimits::default(), b"%PDF-1.7 nonsense".to_vec(), None);
        rejection(&SourceLimits::default(), b"plain text, not a PDF".to_vec(), None);
    }

    #[test]
    fn rejects_encrypted_documents() {
        rejection(&SourceLimits::default(), encrypted(&pdf_with_pages(1)), None);
    }

    #[test]
    fn rejects_page_count_problems() {
        let limits = SourceLimits {
            max_pages: 2,
            ..SourceLimits::default()
        };
        assert!(rejection(&limits, pdf_with_pages(0), None).contains("no pages"));
        assert!(rejection(&limits, pdf_with_pages(3), None).contains("above the limit"));
        assert!(rejection(&limits, pdf_with_pages(2), Some(5)).contains("does not match"));
    }
}
