// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Schriftwerk — Core types, configuration, and error definitions shared across
// all crates.

pub mod config;
pub mod error;
pub mod integrity;
pub mod text;
pub mod types;

pub use config::PipelineConfig;
pub use error::SchriftwerkError;
pub use types::*;
