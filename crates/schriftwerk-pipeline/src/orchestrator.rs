// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job orchestrator — runs one document through admission, rasterization,
// recognition and reassembly, and settles the job.
//
// Every job ends in exactly one terminal status, decided in this order:
//
//   1. the source was rejected                        -> failed
//   2. the job deadline passed                        -> timed-out (no artifact)
//   3. failed / total pages above the tolerated ratio -> failed (no artifact)
//   4. the artifact could not be written              -> failed
//   5. at least one page failed                       -> completed-with-errors
//   6. otherwise                                      -> completed
//
// The job's resource scope is released before `run` returns, whatever the
// outcome.

use std::sync::Arc;

use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_core::integrity::fingerprint;
use schriftwerk_core::{
    Artifact, Document, DocumentRequest, JobId, JobResult, JobStatus, LanguageSet, OutputMode,
    PipelineConfig, SourceHandle,
};
use schriftwerk_document::{PageRasterizer, Preprocessor, RecognitionBackend};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{Span, debug, error, info, instrument, warn};

use crate::adapter::RecognitionAdapter;
use crate::job::{JobProgress, JobRecord, failure_ratio_exceeded};
use crate::raster_stage::RasterStage;
use crate::reassemble::reassemble;
use crate::resources::{JobResources, ResourceKind, ResourceManager};
use crate::scheduler::Scheduler;
use crate::source::SourceLimits;

/// Runs OCR jobs with one rasterizer and one recognition backend.
pub struct JobOrchestrator {
    config: PipelineConfig,
    resources: Arc<ResourceManager>,
    rasterizer: Arc<dyn PageRasterizer>,
    backend: Arc<dyn RecognitionBackend>,
    adapter: Arc<RecognitionAdapter>,
    scheduler: Scheduler,
    limits: SourceLimits,
    use_text_layer: bool,
}

impl JobOrchestrator {
    /// Validates `config`; an invalid configuration is rejected here, once.
    pub fn new(
        config: PipelineConfig,
        resources: Arc<ResourceManager>,
        rasterizer: Arc<dyn PageRasterizer>,
        backend: Arc<dyn RecognitionBackend>,
    ) -> Result<Self> {
        config.validate()?;
        let adapter = Arc::new(RecognitionAdapter::new(
            Arc::clone(&backend),
            config.page_timeout(),
        ));
        info!(
            concurrency = config.concurrency_limit,
            dpi = config.raster_dpi,
            rasterizer = rasterizer.name(),
            backend = backend.name(),
            "Orchestrator ready"
        );
        Ok(Self {
            scheduler: Scheduler::new(config.concurrency_limit),
            config,
            resources,
            rasterizer,
            backend,
            adapter,
            limits: SourceLimits::default(),
            use_text_layer: true,
        })
    }

    /// Preprocess every raster before recognition.
    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn Preprocessor>) -> Self {
        self.adapter = Arc::new(
            RecognitionAdapter::new(Arc::clone(&self.backend), self.config.page_timeout())
                .with_preprocessor(preprocessor),
        );
        self
    }

    pub fn with_limits(mut self, limits: SourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Whether pages that already carry text skip OCR. On by default.
    pub fn with_text_layer(mut self, enabled: bool) -> Self {
        self.use_text_layer = enabled;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// Process one document.
    ///
    /// Always yields a `JobResult`, except when a path source cannot be read
    /// at all.
    pub async fn run(&self, request: DocumentRequest) -> Result<JobResult> {
        self.run_with_progress(request, None).await
    }

    /// [`run`](Self::run), publishing per-page status on `progress`.
    #[instrument(skip_all, fields(job_id = tracing::field::Empty, name = %request.name, mode = ?request.output_mode))]
    pub async fn run_with_progress(
        &self,
        request: DocumentRequest,
        progress: Option<&watch::Sender<JobProgress>>,
    ) -> Result<JobResult> {
        let job_id = JobId::new();
        Span::current().record("job_id", tracing::field::display(job_id));
        let deadline = Instant::now() + self.config.job_timeout();
        let mut record = JobRecord::new(job_id);
        info!("Job started");

        let DocumentRequest {
            source,
            name,
            page_count,
            languages,
            output_mode,
        } = request;
        let bytes = match source {
            SourceHandle::Bytes(bytes) => bytes,
            SourceHandle::Path(path) => tokio::fs::read(&path).await.map_err(|err| {
                error!(path = %path.display(), error = %err, "Source unreadable");
                SchriftwerkError::Input(format!("cannot read {}: {err}", path.display()))
            })?,
        };

        let (status, artifact) = match self.resources.scope(job_id) {
            Ok(scope) => {
                let scope = Arc::new(scope);
                let job = JobInput {
                    bytes,
                    name,
                    declared_pages: page_count,
                    languages: languages.unwrap_or_else(|| self.config.default_languages.clone()),
                    output_mode,
                    deadline,
                };
                let settled = self.execute(&mut record, &scope, job, progress).await;
                scope.release_all();
                settled
            }
            Err(err) => {
                error!(error = %err, "Cannot open job scope");
                record.record_error(&err);
                (JobStatus::Failed, None)
            }
        };

        let result = record.finish(status, artifact);
        info!(
            status = ?result.status,
            done = result.done_pages(),
            failed = result.failed_pages(),
            elapsed_ms = (result.completed_at - result.created_at).num_milliseconds(),
            "Job finished"
        );
        Ok(result)
    }

    /// Everything between opening and releasing the job scope.
    async fn execute(
        &self,
        record: &mut JobRecord,
        resources: &Arc<JobResources>,
        job: JobInput,
        progress: Option<&watch::Sender<JobProgress>>,
    ) -> (JobStatus, Option<Artifact>) {
        let JobInput {
            bytes,
            name,
            declared_pages,
            languages,
            output_mode,
            deadline,
        } = job;

        // -- Admission --------------------------------------------------------

        let byte_len = bytes.len();
        let _source = resources.register_memory(ResourceKind::Source, byte_len);
        let limits = self.limits;
        let admitted = tokio::task::spawn_blocking(move || {
            let digest = fingerprint(&bytes);
            limits.admit(bytes, declared_pages).map(|reader| (reader, digest))
        })
        .await
        .unwrap_or_else(|err| Err(SchriftwerkError::Input(format!("source parser crashed: {err}"))));
        let (reader, digest) = match admitted {
            Ok(admitted) => admitted,
            Err(err) => {
                error!(error = %err, "Source rejected");
                record.record_error(&err);
                return (JobStatus::Failed, None);
            }
        };

        let page_count = reader.page_count();
        record.document = Some(Document {
            name,
            byte_len: byte_len as u64,
            page_count,
            languages: languages.clone(),
            output_mode,
            fingerprint: digest,
        });
        debug!(pages = page_count, bytes = byte_len, languages = %languages, "Source admitted");

        // -- Rasterize and recognise ------------------------------------------

        let source = Arc::new(reader);
        let (outbox, inbox) = mpsc::channel(self.scheduler.limit());
        let producer = RasterStage {
            rasterizer: Arc::clone(&self.rasterizer),
            source: Arc::clone(&source),
            resources: Arc::clone(resources),
            dpi: self.config.raster_dpi,
            timeout: self.config.page_timeout(),
            use_text_layer: self.use_text_layer,
        }
        .spawn(page_count, outbox);

        let batch = self
            .scheduler
            .run_batch_with_progress(
                record.id,
                page_count,
                inbox,
                Arc::clone(&self.adapter),
                languages,
                deadline,
                progress,
            )
            .await;
        // The batch dropped its receiver, so the producer is already winding
        // down; waiting lets any raster write in progress finish first.
        if let Err(err) = producer.await {
            if err.is_panic() {
                warn!(error = %err, "Raster stage crashed");
            }
        }
        let batch = match batch {
            Ok(batch) => batch,
            Err(err) => {
                error!(error = %err, "Batch could not run");
                record.record_error(&err);
                return (JobStatus::Failed, None);
            }
        };
        record.record_batch(&batch);

        // -- Settle -----------------------------------------------------------

        if batch.timed_out {
            let err = SchriftwerkError::GlobalTimeout {
                after_ms: self.config.job_timeout_ms,
            };
            warn!(error = %err, "Job timed out");
            record.record_error(&err);
            return (JobStatus::TimedOut, None);
        }

        let failed = batch.failed_count();
        if failure_ratio_exceeded(failed, page_count, self.config.max_failed_page_ratio) {
            let err = SchriftwerkError::TooManyFailedPages {
                failed,
                total: page_count,
            };
            error!(error = %err, max_ratio = self.config.max_failed_page_ratio, "Job failed");
            record.record_error(&err);
            return (JobStatus::Failed, None);
        }

        let assembled = tokio::time::timeout_at(
            deadline,
            reassemble(output_mode, source, &batch.pages, resources),
        )
        .await;
        match assembled {
            Ok(Ok(artifact)) if failed > 0 => (JobStatus::CompletedWithErrors, Some(artifact)),
            Ok(Ok(artifact)) => (JobStatus::Completed, Some(artifact)),
            Ok(Err(err)) => {
                error!(error = %err, "Reassembly failed");
                record.record_error(&err);
                (JobStatus::Failed, None)
            }
            Err(_) => {
                let err = SchriftwerkError::GlobalTimeout {
                    after_ms: self.config.job_timeout_ms,
                };
                warn!(error = %err, "Job timed out during reassembly");
                record.record_error(&err);
                (JobStatus::TimedOut, None)
            }
        }
    }
}

/// A request after its source bytes were read.
struct JobInput {
    bytes: Vec<u8>,
    name: String,
    declared_pages: Option<usize>,
    languages: LanguageSet,
    output_mode: OutputMode,
    deadline: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::testing::{FakeBackend, FakeRasterizer, encrypted, pdf_with_pages};
    use schriftwerk_core::error::ErrorKind;
    use schriftwerk_core::{PAGE_BREAK, PageStatus};
    use schriftwerk_document::pdf::fixtures::{FixturePage, build_pdf};
    use schriftwerk_document::{EmbeddedImageRasterizer, EnhancePreprocessor, PdfReader};

    fn config(concurrency_limit: usize) -> PipelineConfig {
        PipelineConfig {
            concurrency_limit,
            page_timeout_ms: 5_000,
            job_timeout_ms: 10_000,
            max_failed_page_ratio: 0.5,
            raster_dpi: 72,
            default_languages: LanguageSet::default(),
        }
    }

    struct Setup {
        dir: tempfile::TempDir,
        resources: Arc<ResourceManager>,
    }

    fn setup() -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let resources = Arc::new(ResourceManager::new(dir.path().join("scratch")).unwrap());
        Setup { dir, resources }
    }

    fn orchestrator(
        setup: &Setup,
        config: PipelineConfig,
        rasterizer: impl PageRasterizer + 'static,
        backend: Arc<FakeBackend>,
    ) -> JobOrchestrator {
        JobOrchestrator::new(
            config,
            Arc::clone(&setup.resources),
            Arc::new(rasterizer),
            backend,
        )
        .unwrap()
    }

    fn assert_no_leaks(setup: &Setup) {
        assert!(setup.resources.allocated_total() > 0);
        assert_eq!(
            setup.resources.allocated_total(),
            setup.resources.released_total()
        );
        assert_eq!(setup.resources.live_count(), 0);
        let leftovers = std::fs::read_dir(setup.resources.root()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    /// Scanned pages around one page whose image is not a real JPEG.
    fn scanned_with_corrupt_middle() -> Vec<u8> {
        build_pdf(&[
            FixturePage::scanned(144.0, 144.0, 48, 48, 180),
            FixturePage::corrupt(144.0, 144.0),
            FixturePage::scanned(144.0, 144.0, 48, 48, 90),
        ])
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn corrupt_middle_page_completes_with_errors() {
        let setup = setup();
        let orchestrator = orchestrator(
            &setup,
            config(2),
            EmbeddedImageRasterizer,
            Arc::new(FakeBackend::default()),
        );

        let request =
            DocumentRequest::from_bytes("scan.pdf", scanned_with_corrupt_middle(), OutputMode::Text);
        let result = orchestrator.run(request).await.unwrap();

        assert_eq!(result.status, JobStatus::CompletedWithErrors);
        assert_eq!(
            result.text().unwrap(),
            format!("page 0{PAGE_BREAK}{PAGE_BREAK}page 2")
        );
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].page, Some(1));
        assert_eq!(result.errors[0].kind, ErrorKind::Rasterization);
        assert_eq!(result.pages[1].status, PageStatus::Failed);
        assert_no_leaks(&setup);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn clean_run_completes_and_releases_everything() {
        let setup = setup();
        let orchestrator = orchestrator(
            &setup,
            config(3),
            FakeRasterizer::default(),
            Arc::new(FakeBackend::default()),
        );

        let bytes = pdf_with_pages(4);
        let request = DocumentRequest::from_bytes("four.pdf", bytes.clone(), OutputMode::Text)
            .with_page_count(4);
        let result = orchestrator.run(request).await.unwrap();

        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(result.done_pages(), 4);
        assert!(result.errors.is_empty());
        let document = result.document.as_ref().unwrap();
        assert_eq!(document.page_count, 4);
        assert_eq!(document.fingerprint, fingerprint(&bytes));
        assert_eq!(document.languages, LanguageSet::default());
        let artifact = result.artifact.as_ref().unwrap();
        assert_eq!(artifact.sha256, fingerprint(&artifact.bytes));
        assert_no_leaks(&setup);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn page_order_survives_reversed_completion() {
        let setup = setup();
        let backend = FakeBackend::default()
            .with_page_delay(0, Duration::from_millis(150))
            .with_page_delay(1, Duration::from_millis(100))
            .with_page_delay(2, Duration::from_millis(50));
        let orchestrator = orchestrator(
            &setup,
            config(4),
            FakeRasterizer::default(),
            Arc::new(backend),
        );

        let result = orchestrator
            .run(DocumentRequest::from_bytes("r.pdf", pdf_with_pages(4), OutputMode::Text))
            .await
            .unwrap();
        let indices: Vec<usize> = result.pages.iter().map(|page| page.index).collect();
        assert_eq!(indices, [0, 1, 2, 3]);
        let expected = (0..4)
            .map(|index| format!("page {index}"))
            .collect::<Vec<_>>()
            .join(PAGE_BREAK);
        assert_eq!(result.text().unwrap(), expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn deadline_keeps_finished_pages_and_times_out_the_rest() {
        let setup = setup();
        let backend = FakeBackend::default()
            .with_delay(Duration::from_secs(5))
            .with_page_delay(0, Duration::ZERO)
            .with_page_delay(1, Duration::ZERO);
        let orchestrator = orchestrator(
            &setup,
            PipelineConfig {
                job_timeout_ms: 400,
                ..config(2)
            },
            FakeRasterizer::default(),
            Arc::new(backend),
        );

        let result = orchestrator
            .run(DocumentRequest::from_bytes("slow.pdf", pdf_with_pages(4), OutputMode::Text))
            .await
            .unwrap();

        assert_eq!(result.status, JobStatus::TimedOut);
        assert!(result.artifact.is_none());
        assert_eq!(result.done_pages(), 2);
        assert_eq!(result.failed_pages(), 2);
        for page in &result.pages[2..] {
            assert_eq!(page.error.as_ref().unwrap().kind, ErrorKind::Timeout);
        }
        assert!(result.pages.iter().all(|page| page.status.is_terminal()));
        assert!(
            result
                .errors
                .iter()
                .any(|err| err.page.is_none() && err.kind == ErrorKind::Timeout)
        );
        assert_no_leaks(&setup);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn too_many_failed_pages_fails_without_artifact() {
        let setup = setup();
        let orchestrator = orchestrator(
            &setup,
            config(2),
            FakeRasterizer::default().failing_on([0]),
            Arc::new(FakeBackend::default().failing_on([2])),
        );

        let result = orchestrator
            .run(DocumentRequest::from_bytes("bad.pdf", pdf_with_pages(3), OutputMode::Text))
            .await
            .unwrap();

        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.artifact.is_none());
        assert_eq!(result.done_pages(), 1);
        assert_eq!(result.errors.last().unwrap().kind, ErrorKind::Policy);
        assert_no_leaks(&setup);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn recognition_timeout_only_fails_its_page() {
        let setup = setup();
        let backend = FakeBackend::default().with_page_delay(1, Duration::from_secs(5));
        let orchestrator = orchestrator(
            &setup,
            PipelineConfig {
                page_timeout_ms: 100,
                ..config(2)
            },
            FakeRasterizer::default(),
            Arc::new(backend),
        );

        let result = orchestrator
            .run(DocumentRequest::from_bytes("t.pdf", pdf_with_pages(3), OutputMode::Text))
            .await
            .unwrap();

        assert_eq!(result.status, JobStatus::CompletedWithErrors);
        assert_eq!(result.pages[1].error.as_ref().unwrap().kind, ErrorKind::Timeout);
        assert_eq!(result.pages[0].status, PageStatus::Done);
        assert_eq!(result.pages[2].status, PageStatus::Done);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn single_slot_runs_pages_one_at_a_time() {
        let setup = setup();
        let backend = Arc::new(FakeBackend::default().with_delay(Duration::from_millis(25)));
        let orchestrator = orchestrator(
            &setup,
            config(1),
            FakeRasterizer::default(),
            Arc::clone(&backend),
        );

        let started = std::time::Instant::now();
        let result = orchestrator
            .run(DocumentRequest::from_bytes("five.pdf", pdf_with_pages(5), OutputMode::Text))
            .await
            .unwrap();

        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(backend.max_concurrency(), 1);
        assert_eq!(backend.calls(), 5);
        assert!(started.elapsed() >= Duration::from_millis(125));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn identical_runs_have_identical_structure() {
        let setup = setup();
        let orchestrator = orchestrator(
            &setup,
            config(2),
            FakeRasterizer::default().failing_on([2]),
            Arc::new(FakeBackend::default()),
        );
        let bytes = pdf_with_pages(4);

        let first = orchestrator
            .run(DocumentRequest::from_bytes("a.pdf", bytes.clone(), OutputMode::Text))
            .await
            .unwrap();
        let second = orchestrator
            .run(DocumentRequest::from_bytes("a.pdf", bytes, OutputMode::Text))
            .await
            .unwrap();

        assert_ne!(first.job_id, second.job_id);
        assert_eq!(first.status, second.status);
        let shape = |result: &JobResult| -> Vec<(PageStatus, String)> {
            result
                .pages
                .iter()
                .map(|page| (page.status, page.text.clone()))
                .collect()
        };
        assert_eq!(shape(&first), shape(&second));
        assert_eq!(
            first.artifact.as_ref().unwrap().sha256,
            second.artifact.as_ref().unwrap().sha256
        );
        assert_no_leaks(&setup);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn searchable_mode_returns_the_source_with_a_text_layer() {
        let setup = setup();
        let orchestrator = orchestrator(
            &setup,
            config(2),
            EmbeddedImageRasterizer,
            Arc::new(FakeBackend::default()),
        )
        .with_preprocessor(Arc::new(EnhancePreprocessor::default()));

        let request = DocumentRequest::from_bytes(
            "scan.pdf",
            scanned_with_corrupt_middle(),
            OutputMode::Searchable,
        )
        .with_languages(LanguageSet::parse("deu+eng").unwrap());
        let result = orchestrator.run(request).await.unwrap();

        assert_eq!(result.status, JobStatus::CompletedWithErrors);
        assert_eq!(
            result.document.as_ref().unwrap().languages.tesseract_arg(),
            "deu+eng"
        );
        let artifact = result.artifact.as_ref().unwrap();
        assert_eq!(artifact.mode, OutputMode::Searchable);
        assert!(result.text().is_none());
        let searchable = PdfReader::from_bytes(artifact.bytes.clone()).unwrap();
        assert_eq!(searchable.page_count(), 3);
        assert_no_leaks(&setup);
    }

    /// A born-digital page, a blank page and a scanned page.
    fn mixed_document() -> Vec<u8> {
        build_pdf(&[
            FixturePage::digital(144.0, 144.0, "Invoice 42"),
            FixturePage::blank(144.0, 144.0),
            FixturePage::scanned(144.0, 144.0, 48, 48, 90),
        ])
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pages_with_text_skip_recognition() {
        let setup = setup();
        let backend = Arc::new(FakeBackend::default());
        let orchestrator = orchestrator(&setup, config(2), EmbeddedImageRasterizer, Arc::clone(&backend));

        let result = orchestrator
            .run(DocumentRequest::from_bytes("mixed.pdf", mixed_document(), OutputMode::Text))
            .await
            .unwrap();

        assert_eq!(result.status, JobStatus::Completed);
        assert!(result.errors.is_empty());
        let text = result.text().unwrap();
        let pages: Vec<&str> = text.split(PAGE_BREAK).collect();
        assert_eq!(pages.len(), 3);
        assert!(pages[0].contains("Invoice 42"), "{text}");
        assert_eq!(pages[1], "page 1");
        assert_eq!(pages[2], "page 2");
        assert_eq!(result.pages[0].confidence, 1.0);
        // The blank page renders white and is still recognised.
        assert_eq!(backend.calls(), 2);
        assert_no_leaks(&setup);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn forced_ocr_recognises_every_page() {
        let setup = setup();
        let backend = Arc::new(FakeBackend::default());
        let orchestrator = orchestrator(&setup, config(2), EmbeddedImageRasterizer, Arc::clone(&backend))
            .with_text_layer(false);

        let result = orchestrator
            .run(DocumentRequest::from_bytes("mixed.pdf", mixed_document(), OutputMode::Text))
            .await
            .unwrap();

        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(
            result.text().unwrap(),
            format!("page 0{PAGE_BREAK}page 1{PAGE_BREAK}page 2")
        );
        assert_eq!(backend.calls(), 3);
        assert_no_leaks(&setup);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn searchable_output_keeps_an_existing_text_layer() {
        let setup = setup();
        let orchestrator = orchestrator(
            &setup,
            config(2),
            EmbeddedImageRasterizer,
            Arc::new(FakeBackend::default()),
        );

        let result = orchestrator
            .run(DocumentRequest::from_bytes("mixed.pdf", mixed_document(), OutputMode::Searchable))
            .await
            .unwrap();

        assert_eq!(result.status, JobStatus::Completed);
        let searchable = PdfReader::from_bytes(result.artifact.unwrap().bytes).unwrap();
        assert_eq!(searchable.page_count(), 3);
        let text = searchable.page_text(0).unwrap();
        assert_eq!(text.matches("Invoice 42").count(), 1, "{text}");
        assert_no_leaks(&setup);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn output_write_failure_fails_a_fully_recognised_job() {
        let setup = setup();
        // A directory where the text output should go makes the write fail.
        let backend = FakeBackend::default().occupying(setup.resources.root(), "output.txt");
        let orchestrator = orchestrator(&setup, config(2), FakeRasterizer::default(), Arc::new(backend));

        let result = orchestrator
            .run(DocumentRequest::from_bytes("w.pdf", pdf_with_pages(3), OutputMode::Text))
            .await
            .unwrap();

        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.pages.iter().all(|page| page.status == PageStatus::Done));
        assert!(result.artifact.is_none());
        assert!(result.text().is_none());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, ErrorKind::Reassembly);
        assert_eq!(result.errors[0].page, None);
        assert_no_leaks(&setup);
    }

    #[tokio::test]
    async fn rejected_sources_fail_the_job() {
        let setup = setup();
        let orchestrator = orchestrator(
            &setup,
            config(2),
            FakeRasterizer::default(),
            Arc::new(FakeBackend::default()),
        );

        let cases = [
            DocumentRequest::from_bytes("empty.pdf", Vec::new(), OutputMode::Text),
            DocumentRequest::from_bytes("junk.pdf", b"not a pdf".to_vec(), OutputMode::Text),
            DocumentRequest::from_bytes("locked.pdf", encrypted(&pdf_with_pages(1)), OutputMode::Text),
            DocumentRequest::from_bytes("two.pdf", pdf_with_pages(2), OutputMode::Text)
                .with_page_count(3),
        ];
        for request in cases {
            let result = orchestrator.run(request).await.unwrap();
            assert_eq!(result.status, JobStatus::Failed);
            assert!(result.document.is_none());
            assert!(result.pages.is_empty());
            assert_eq!(result.errors.len(), 1);
            assert_eq!(result.errors[0].kind, ErrorKind::Input);
        }
        assert_no_leaks(&setup);
    }

    #[tokio::test]
    async fn oversized_and_overlong_sources_are_rejected() {
        let setup = setup();
        let orchestrator = orchestrator(
            &setup,
            config(2),
            FakeRasterizer::default(),
            Arc::new(FakeBackend::default()),
        )
        .with_limits(SourceLimits {
            max_bytes: 1024 * 1024,
            max_pages: 3,
        });

        let result = orchestrator
            .run(DocumentRequest::from_bytes("long.pdf", pdf_with_pages(4), OutputMode::Text))
            .await
            .unwrap();
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.errors[0].kind, ErrorKind::Input);

        let result = orchestrator
            .run(DocumentRequest::from_bytes("big.pdf", vec![b'%'; 2 * 1024 * 1024], OutputMode::Text))
            .await
            .unwrap();
        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.errors[0].message.contains("limit"));
    }

    #[tokio::test]
    async fn unreadable_path_is_an_error() {
        let setup = setup();
        let orchestrator = orchestrator(
            &setup,
            config(2),
            FakeRasterizer::default(),
            Arc::new(FakeBackend::default()),
        );

        let missing = setup.dir.path().join("missing.pdf");
        let err = orchestrator
            .run(DocumentRequest::from_path(&missing, OutputMode::Text))
            .await
            .unwrap_err();
        assert!(matches!(err, SchriftwerkError::Input(_)));
        assert_eq!(setup.resources.allocated_total(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn path_sources_are_read_from_disk() {
        let setup = setup();
        let orchestrator = orchestrator(
            &setup,
            config(2),
            FakeRasterizer::default(),
            Arc::new(FakeBackend::default()),
        );
        let path = setup.dir.path().join("two.pdf");
        std::fs::write(&path, pdf_with_pages(2)).unwrap();

        let result = orchestrator
            .run(DocumentRequest::from_path(&path, OutputMode::Text))
            .await
            .unwrap();
        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(result.document.as_ref().unwrap().name, "two.pdf");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn progress_is_published() {
        let setup = setup();
        let orchestrator = orchestrator(
            &setup,
            config(2),
            FakeRasterizer::default(),
            Arc::new(FakeBackend::default()),
        );
        let (progress, watcher) = watch::channel(JobProgress::default());

        orchestrator
            .run_with_progress(
                DocumentRequest::from_bytes("p.pdf", pdf_with_pages(3), OutputMode::Text),
                Some(&progress),
            )
            .await
            .unwrap();
        let snapshot = watcher.borrow().clone();
        assert_eq!(snapshot.count(PageStatus::Done), 3);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let setup = setup();
        let result = JobOrchestrator::new(
            PipelineConfig {
                concurrency_limit: 0,
                ..config(1)
            },
            Arc::clone(&setup.resources),
            Arc::new(FakeRasterizer::default()),
            Arc::new(FakeBackend::default()),
        );
        assert!(matches!(result, Err(SchriftwerkError::Config(_))));
    }

    #[tokio::test]
    async fn json_report_carries_the_source_fingerprint() {
        let setup = setup();
        let orchestrator = orchestrator(
            &setup,
            config(1),
            FakeRasterizer::default(),
            Arc::new(FakeBackend::default()),
        );
        let bytes = pdf_with_pages(1);

        let result = orchestrator
            .run(DocumentRequest::from_bytes("f.pdf", bytes.clone(), OutputMode::Text))
            .await
            .unwrap();
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["document"]["fingerprint"], fingerprint(&bytes));
        assert_eq!(json["artifact"]["sha256"], result.artifact.as_ref().unwrap().sha256);
        assert!(json.get("fingerprint").is_none());
    }

    #[test]
    fn json_report_omits_artifact_bytes() {
        let result = JobRecord::new(JobId::new()).finish(JobStatus::Failed, None);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failed");
        assert!(json.get("artifact").is_none());
    }
}
