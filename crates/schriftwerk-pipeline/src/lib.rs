// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// schriftwerk-pipeline — runs OCR jobs end to end.
//
// A job flows through:
//
//   SourceLimits -> RasterStage -> Scheduler (RecognitionAdapter x K) -> reassemble
//
// bracketed by a `JobResources` scope from the `ResourceManager`, which
// guarantees every transient is released once the job settles.

pub mod adapter;
pub mod job;
pub mod orchestrator;
pub mod raster_stage;
pub mod reassemble;
pub mod resources;
pub mod scheduler;
pub mod source;

#[cfg(test)]
mod testing;

pub use adapter::RecognitionAdapter;
pub use job::{JobProgress, JobRecord};
pub use orchestrator::JobOrchestrator;
pub use raster_stage::{PageWork, RasterPage, RasterStage};
pub use reassemble::{assemble_text, reassemble};
pub use resources::{
    DEFAULT_STALE_AGE, JobResources, ResourceId, ResourceKind, ResourceManager, TransientResource,
};
pub use scheduler::{BatchOutcome, PageOutcome, Scheduler};
pub use source::SourceLimits;
