// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF module — parsing and page geometry of source documents, and writing
// searchable PDFs with an invisible text layer.

pub mod reader;
pub mod writer;

pub use reader::{PageGeometry, PdfReader};
pub use writer::{PageOverlay, SearchablePdfWriter};

#[cfg(any(test, feature = "test-util"))]
pub mod fixtures;
