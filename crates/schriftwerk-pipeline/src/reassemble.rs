// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document reassembler — turns per-page outcomes into the final artifact.
//
// Text mode concatenates page texts in page order, separated by
// `PAGE_BREAK`; a failed page contributes an empty segment so page positions
// are preserved. Searchable mode writes a copy of the source PDF with an
// invisible text layer on every recognised page.
//
// Either way the artifact is first written to an output transient in the job
// directory and read back, so its bytes and checksum describe exactly what
// was stored.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_core::integrity::fingerprint;
use schriftwerk_core::{Artifact, OutputMode, PAGE_BREAK, PageRecognition};
use schriftwerk_document::{PageOverlay, PdfReader, SearchablePdfWriter};
use tracing::{info, instrument};

use crate::resources::{JobResources, ResourceKind};
use crate::scheduler::PageOutcome;

/// Join page texts with [`PAGE_BREAK`]. Failed pages yield empty segments.
pub fn assemble_text(pages: &[PageOutcome]) -> String {
    pages
        .iter()
        .map(|page| page.recognition().map_or("", |r| r.text.as_str()))
        .collect::<Vec<_>>()
        .join(PAGE_BREAK)
}

/// Build the artifact for `mode`.
#[instrument(skip_all, fields(job = %resources.job_id(), mode = ?mode, pages = pages.len()))]
pub async fn reassemble(
    mode: OutputMode,
    source: Arc<PdfReader>,
    pages: &[PageOutcome],
    resources: &JobResources,
) -> Result<Artifact> {
    let output = resources.allocate_file(
        ResourceKind::Output,
        &format!("output.{}", mode.extension()),
    );
    let path = output
        .path()
        .map(Path::to_path_buf)
        .ok_or_else(|| SchriftwerkError::Reassembly("output transient has no path".into()))?;

    match mode {
        OutputMode::Text => {
            let text = assemble_text(pages);
            tokio::fs::write(&path, text.as_bytes())
                .await
                .map_err(|err| reassembly_io("cannot write text output", &path, err))?;
        }
        OutputMode::Searchable => {
            let recognised: Vec<(usize, PageRecognition)> = pages
                .iter()
                .enumerate()
                .filter_map(|(index, page)| page.recognition().map(|r| (index, r.clone())))
                .collect();
            let target = path.clone();
            tokio::task::spawn_blocking(move || write_searchable(&source, &recognised, &target))
                .await
                .map_err(|err| {
                    SchriftwerkError::Reassembly(format!("searchable writer crashed: {err}"))
                })??;
        }
    }

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|err| reassembly_io("cannot read back output", &path, err))?;
    output.release();

    let artifact = Artifact {
        mode,
        media_type: mode.media_type().to_owned(),
        byte_len: bytes.len() as u64,
        sha256: fingerprint(&bytes),
        bytes,
    };
    info!(bytes = artifact.byte_len, sha256 = %artifact.sha256, "Artifact assembled");
    Ok(artifact)
}

fn write_searchable(
    source: &PdfReader,
    recognised: &[(usize, PageRecognition)],
    path: &Path,
) -> Result<()> {
    let overlays: Vec<PageOverlay<'_>> = recognised
        .iter()
        .map(|(index, recognition)| PageOverlay {
            index: *index,
            recognition,
        })
        .collect();
    let file = File::create(path).map_err(|err| reassembly_io("cannot create output", path, err))?;
    let mut out = BufWriter::new(file);
    SearchablePdfWriter::new(source).write(&overlays, &mut out)?;
    out.flush()
        .map_err(|err| reassembly_io("cannot flush output", path, err))
}

fn reassembly_io(what: &str, path: &Path, err: std::io::Error) -> SchriftwerkError {
    SchriftwerkError::Reassembly(format!("{what} {}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceManager;
    use crate::testing::{page_recognition, pdf_with_pages};
    use schriftwerk_core::JobId;

    fn outcomes() -> Vec<PageOutcome> {
        vec![
            PageOutcome::Done(page_recognition(0)),
            PageOutcome::Failed(SchriftwerkError::Rasterization {
                page: 1,
                detail: "corrupt".into(),
            }),
            PageOutcome::Done(page_recognition(2)),
        ]
    }

    #[test]
    fn text_keeps_page_positions() {
        assert_eq!(
            assemble_text(&outcomes()),
            format!("page 0{PAGE_BREAK}{PAGE_BREAK}page 2")
        );
    }

    #[test]
    fn single_page_has_no_separator() {
        let pages = vec![PageOutcome::Done(page_recognition(0))];
        assert_eq!(assemble_text(&pages), "page 0");
    }

    #[tokio::test]
    async fn text_artifact_matches_assembled_text() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ResourceManager::new(dir.path()).unwrap();
        let resources = manager.scope(JobId::new()).unwrap();
        let source = Arc::new(PdfReader::from_bytes(pdf_with_pages(3)).unwrap());

        let artifact = reassemble(OutputMode::Text, source, &outcomes(), &resources)
            .await
            .unwrap();
        let expected = assemble_text(&outcomes());
        assert_eq!(artifact.bytes, expected.as_bytes());
        assert_eq!(artifact.byte_len, expected.len() as u64);
        assert_eq!(artifact.sha256, fingerprint(expected.as_bytes()));
        assert_eq!(artifact.media_type, "text/plain; charset=utf-8");
        assert_eq!(manager.live_count(), 0);
    }

    #[tokio::test]
    async fn searchable_artifact_is_a_pdf_with_every_page() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ResourceManager::new(dir.path()).unwrap();
        let resources = manager.scope(JobId::new()).unwrap();
        let source = Arc::new(PdfReader::from_bytes(pdf_with_pages(3)).unwrap());

        let artifact = reassemble(OutputMode::Searchable, source, &outcomes(), &resources)
            .await
            .unwrap();
        assert!(artifact.bytes.starts_with(b"%PDF"));
        assert_eq!(artifact.media_type, "application/pdf");
        let reread = PdfReader::from_bytes(artifact.bytes.clone()).unwrap();
        assert_eq!(reread.page_count(), 3);
        assert_eq!(manager.live_count(), 0);
    }

    #[tokio::test]
    async fn write_failure_is_a_reassembly_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ResourceManager::new(dir.path()).unwrap();
        let resources = manager.scope(JobId::new()).unwrap();
        std::fs::remove_dir_all(resources.dir()).unwrap();
        let source = Arc::new(PdfReader::from_bytes(pdf_with_pages(3)).unwrap());

        let err = reassemble(OutputMode::Text, source, &outcomes(), &resources)
            .await
            .unwrap_err();
        assert!(matches!(err, SchriftwerkError::Reassembly(_)));
        assert_eq!(manager.live_count(), 0);
    }
}
