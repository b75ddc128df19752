// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Concurrency scheduler.
//
// Consumes rasters from the raster stage and runs at most `limit`
// recognitions at once. A raster is only taken off the channel once a
// recognition permit is in hand, so a slow backend holds the producer back. Every page ends in exactly one outcome slot, indexed
// by page, no matter in which order recognitions finish. The whole batch is
// raced against the job deadline; when it passes, in-flight work is
// cancelled and every page without an outcome is marked timed out.
//
// Only one batch per job may run at a time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_core::{JobId, LanguageSet, PageRecognition, PageStatus};
use schriftwerk_document::CancelFlag;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::adapter::RecognitionAdapter;
use crate::job::JobProgress;
use crate::raster_stage::{PageWork, RasterPage};

/// Terminal outcome of one page.
#[derive(Debug)]
pub enum PageOutcome {
    Done(PageRecognition),
    Failed(SchriftwerkError),
}

impl PageOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub fn recognition(&self) -> Option<&PageRecognition> {
        match self {
            Self::Done(recognition) => Some(recognition),
            Self::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&SchriftwerkError> {
        match self {
            Self::Done(_) => None,
            Self::Failed(err) => Some(err),
        }
    }
}

/// Everything a batch produced, one outcome per page in page order.
#[derive(Debug)]
pub struct BatchOutcome {
    pub pages: Vec<PageOutcome>,
    /// The job deadline passed before every page finished.
    pub timed_out: bool,
}

impl BatchOutcome {
    pub fn failed_count(&self) -> usize {
        self.pages.iter().filter(|page| !page.is_done()).count()
    }
}

/// Bounded-concurrency runner for page recognition.
#[derive(Debug, Clone)]
pub struct Scheduler {
    limit: usize,
    in_flight: Arc<Mutex<HashSet<JobId>>>,
}

/// Marks a job as having a batch in flight until dropped.
struct BatchClaim {
    job: JobId,
    in_flight: Arc<Mutex<HashSet<JobId>>>,
}

impl BatchClaim {
    fn acquire(in_flight: &Arc<Mutex<HashSet<JobId>>>, job: JobId) -> Result<Self> {
        let mut jobs = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !jobs.insert(job) {
            return Err(SchriftwerkError::BatchInFlight(job.to_string()));
        }
        Ok(Self {
            job,
            in_flight: Arc::clone(in_flight),
        })
    }
}

impl Drop for BatchClaim {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job);
    }
}

/// A task hands its permit back with the raster, so the slot only frees up
/// once the raster is released.
type TaskOutput = (usize, Result<PageRecognition>, RasterPage, Option<OwnedSemaphorePermit>);

/// Publish one page's status, if anyone is watching.
fn mark(progress: Option<&watch::Sender<JobProgress>>, index: usize, status: PageStatus) {
    if let Some(progress) = progress {
        progress.send_modify(|snapshot| {
            if let Some(page) = snapshot.pages.get_mut(index) {
                *page = status;
            }
        });
    }
}

impl Scheduler {
    /// `limit` is clamped to at least 1.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Recognise `page_count` pages arriving on `inbox`.
    ///
    /// Returns `BatchInFlight` if another batch for `job` is still running.
    /// Rasters are released as soon as their outcome is recorded; on timeout
    /// every raster still held is released before this returns.
    pub async fn run_batch(
        &self,
        job: JobId,
        page_count: usize,
        inbox: mpsc::Receiver<PageWork>,
        adapter: Arc<RecognitionAdapter>,
        languages: LanguageSet,
        deadline: Instant,
    ) -> Result<BatchOutcome> {
        self.run_batch_with_progress(job, page_count, inbox, adapter, languages, deadline, None)
            .await
    }

    /// [`run_batch`](Self::run_batch), publishing page status changes on
    /// `progress`.
    ///
    /// Pages are produced in order, so when page `i` arrives page `i + 1` is
    /// the one being rasterized.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(job = %job, pages = page_count, limit = self.limit))]
    pub async fn run_batch_with_progress(
        &self,
        job: JobId,
        page_count: usize,
        mut inbox: mpsc::Receiver<PageWork>,
        adapter: Arc<RecognitionAdapter>,
        languages: LanguageSet,
        deadline: Instant,
        progress: Option<&watch::Sender<JobProgress>>,
    ) -> Result<BatchOutcome> {
        let _claim = BatchClaim::acquire(&self.in_flight, job)?;
        if let Some(progress) = progress {
            progress.send_replace(JobProgress::pending(page_count));
        }
        mark(progress, 0, PageStatus::Rasterizing);

        let permits = Arc::new(Semaphore::new(self.limit));
        let mut slots: Vec<Option<PageOutcome>> = (0..page_count).map(|_| None).collect();
        let mut dispatched = vec![false; page_count];
        let mut cancel_flags: Vec<CancelFlag> = Vec::new();
        let mut tasks: JoinSet<TaskOutput> = JoinSet::new();
        let mut permit: Option<OwnedSemaphorePermit> = None;
        let mut inbox_open = true;
        let mut timed_out = false;

        let expiry = tokio::time::sleep_until(deadline);
        tokio::pin!(expiry);

        loop {
            if !inbox_open && tasks.is_empty() {
                break;
            }
            tokio::select! {
                biased;

                _ = &mut expiry => {
                    timed_out = true;
                    break;
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                    Ok((index, result, page, held)) => {
                        let outcome = match result {
                            Ok(recognition) => PageOutcome::Done(recognition),
                            Err(err) => {
                                warn!(page = index, error = %err, "Page failed");
                                PageOutcome::Failed(err)
                            }
                        };
                        let status = if outcome.is_done() {
                            PageStatus::Done
                        } else {
                            PageStatus::Failed
                        };
                        slots[index] = Some(outcome);
                        page.release();
                        drop(held);
                        mark(progress, index, status);
                    }
                    Err(join_err) => warn!(error = %join_err, "Recognition task ended abnormally"),
                },

                acquired = Arc::clone(&permits).acquire_owned(), if inbox_open && permit.is_none() => {
                    match acquired {
                        Ok(acquired) => permit = Some(acquired),
                        // The semaphore is never closed.
                        Err(_) => inbox_open = false,
                    }
                }

                work = inbox.recv(), if inbox_open && permit.is_some() => match work {
                    Some(PageWork::Ready(page)) => {
                        let index = page.index;
                        if index >= page_count || dispatched[index] || slots[index].is_some() {
                            warn!(page = index, "Ignoring unexpected raster");
                            page.release();
                            continue;
                        }
                        dispatched[index] = true;
                        mark(progress, index, PageStatus::Recognizing);
                        mark(progress, index + 1, PageStatus::Rasterizing);
                        let cancel = CancelFlag::new();
                        cancel_flags.push(cancel.clone());
                        let held = permit.take();
                        let adapter = Arc::clone(&adapter);
                        let languages = languages.clone();
                        tasks.spawn(async move {
                            let result = adapter.recognize(&page, &languages, cancel).await;
                            (index, result, page, held)
                        });
                    }
                    Some(PageWork::Extracted { index, recognition }) => {
                        if let Some(slot) = slots.get_mut(index) {
                            slot.get_or_insert(PageOutcome::Done(recognition));
                            mark(progress, index, PageStatus::Done);
                            mark(progress, index + 1, PageStatus::Rasterizing);
                        }
                    }
                    Some(PageWork::Failed { index, error }) => {
                        if let Some(slot) = slots.get_mut(index) {
                            slot.get_or_insert(PageOutcome::Failed(error));
                            mark(progress, index, PageStatus::Failed);
                            mark(progress, index + 1, PageStatus::Rasterizing);
                        }
                    }
                    None => inbox_open = false,
                },
            }
        }

        if timed_out {
            warn!(
                in_flight = tasks.len(),
                "Job deadline passed; cancelling outstanding pages"
            );
            for flag in &cancel_flags {
                flag.cancel();
            }
            tasks.abort_all();
            // Aborted tasks drop their rasters; wait so none outlives the batch.
            while tasks.join_next().await.is_some() {}
            inbox.close();
            while inbox.recv().await.is_some() {}
        }

        let pages: Vec<PageOutcome> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| match slot {
                Some(outcome) => outcome,
                None if timed_out => {
                    PageOutcome::Failed(SchriftwerkError::DeadlineExceeded { page: index })
                }
                None if dispatched[index] => PageOutcome::Failed(SchriftwerkError::Recognition {
                    page: index,
                    detail: "recognition task crashed".into(),
                }),
                None => PageOutcome::Failed(SchriftwerkError::Rasterization {
                    page: index,
                    detail: "page was never rasterized".into(),
                }),
            })
            .collect();

        if let Some(progress) = progress {
            progress.send_replace(JobProgress {
                pages: pages
                    .iter()
                    .map(|page| {
                        if page.is_done() {
                            PageStatus::Done
                        } else {
                            PageStatus::Failed
                        }
                    })
                    .collect(),
            });
        }

        let outcome = BatchOutcome { pages, timed_out };
        let failed = outcome.failed_count();
        if timed_out {
            info!(done = page_count - failed, failed, "Batch stopped at deadline");
        } else {
            debug!(done = page_count - failed, failed, "Batch finished");
        }
        Ok(outcome)
    }
}
