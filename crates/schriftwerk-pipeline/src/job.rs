// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job bookkeeping: live page progress, and the record a job accumulates
// until it is turned into a `JobResult`.

use chrono::{DateTime, Utc};
use schriftwerk_core::error::SchriftwerkError;
use schriftwerk_core::{
    Artifact, Document, JobError, JobId, JobResult, JobStatus, PageReport, PageStatus,
};
use serde::Serialize;

use crate::scheduler::{BatchOutcome, PageOutcome};

/// Snapshot of every page's status while a job runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    pub pages: Vec<PageStatus>,
}

impl JobProgress {
    pub fn pending(page_count: usize) -> Self {
        Self {
            pages: vec![PageStatus::Pending; page_count],
        }
    }

    pub fn count(&self, status: PageStatus) -> usize {
        self.pages.iter().filter(|page| **page == status).count()
    }

    /// Every page reached `done` or `failed`.
    pub fn is_settled(&self) -> bool {
        self.pages.iter().all(PageStatus::is_terminal)
    }
}

/// Whether `failed` out of `total` pages is more than the job tolerates.
pub fn failure_ratio_exceeded(failed: usize, total: usize, max_ratio: f64) -> bool {
    total > 0 && failed as f64 / total as f64 > max_ratio
}

/// Report entry for one page outcome.
pub fn page_report(index: usize, outcome: &PageOutcome) -> PageReport {
    match outcome {
        PageOutcome::Done(recognition) => PageReport {
            index,
            status: PageStatus::Done,
            text: recognition.text.clone(),
            confidence: recognition.confidence,
            words: recognition.words.clone(),
            error: None,
        },
        PageOutcome::Failed(err) => PageReport {
            index,
            status: PageStatus::Failed,
            text: String::new(),
            confidence: 0.0,
            words: Vec::new(),
            error: Some(JobError::from(err)),
        },
    }
}

/// Everything known about a job before it settles.
#[derive(Debug)]
pub struct JobRecord {
    pub id: JobId,
    pub created_at: DateTime<Utc>,
    pub document: Option<Document>,
    pages: Vec<PageReport>,
    errors: Vec<JobError>,
}

impl JobRecord {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            document: None,
            pages: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Record page outcomes in page order, and page errors in the job's
    /// error list.
    pub fn record_batch(&mut self, batch: &BatchOutcome) {
        self.pages = batch
            .pages
            .iter()
            .enumerate()
            .map(|(index, outcome)| page_report(index, outcome))
            .collect();
        self.errors
            .extend(self.pages.iter().filter_map(|page| page.error.clone()));
    }

    /// Record a job-level error.
    pub fn record_error(&mut self, err: &SchriftwerkError) {
        self.errors.push(JobError::from(err));
    }

    pub fn failed_pages(&self) -> usize {
        self.pages
            .iter()
            .filter(|page| page.status == PageStatus::Failed)
            .count()
    }

    /// Settle the job with a terminal `status`.
    pub fn finish(self, status: JobStatus, artifact: Option<Artifact>) -> JobResult {
        debug_assert!(status.is_terminal());
        JobResult {
            job_id: self.id,
            status,
            document: self.document,
            pages: self.pages,
            artifact,
            errors: self.errors,
            created_at: self.created_at,
            completed_at: Utc::now(),
        }
    }
}
