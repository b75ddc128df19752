// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan preprocessing — pluggable cleanup applied to page rasters before
// recognition.

pub mod enhance;

pub use enhance::{EnhancePreprocessor, Preprocessor};
