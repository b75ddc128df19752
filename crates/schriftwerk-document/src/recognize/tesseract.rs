// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tesseract backend — drives the `tesseract` command-line engine.
//
// The page raster is streamed to the child as PNG on stdin and word-level
// results are read back in TSV form (`tesseract stdin stdout -l eng+deu tsv`).
// The child is polled rather than waited on, so it can be killed as soon as
// the page is cancelled or its own deadline passes.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_core::{BoundingBox, PageRecognition, RasterGeometry, RecognizedWord};
use tracing::{debug, instrument, warn};

use super::{RecognitionBackend, RecognitionRequest};
use crate::image::processor::ImageProcessor;

const DEFAULT_BINARY: &str = "tesseract";
const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// TSV row level of individual words.
const WORD_LEVEL: u32 = 5;
/// Page segmentation mode 3: fully automatic, no OSD.
const DEFAULT_PSM: u8 = 3;

/// Recognition through an installed Tesseract 4+ binary.
#[derive(Debug, Clone)]
pub struct TesseractBackend {
    binary: PathBuf,
    psm: u8,
}

impl Default for TesseractBackend {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_BINARY),
            psm: DEFAULT_PSM,
        }
    }
}

impl TesseractBackend {
    /// Use `tesseract` from `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific executable.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    /// Override the page segmentation mode (`--psm`).
    pub fn with_psm(mut self, psm: u8) -> Self {
        self.psm = psm;
        self
    }

    /// Whether the configured binary starts and answers `--version`.
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    fn command(&self, request: &RecognitionRequest<'_>) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("stdin")
            .arg("stdout")
            .arg("-l")
            .arg(request.languages.tesseract_arg())
            .arg("--dpi")
            .arg(request.dpi.to_string())
            .arg("--psm")
            .arg(self.psm.to_string())
            .arg("tsv")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

impl RecognitionBackend for TesseractBackend {
    fn name(&self) -> &str {
        "tesseract"
    }

    #[instrument(skip_all, fields(page = request.page, languages = %request.languages))]
    fn recognize(&self, request: &RecognitionRequest<'_>) -> Result<PageRecognition> {
        let page = request.page;
        let fail = |detail: String| SchriftwerkError::Recognition { page, detail };

        let png = ImageProcessor::from_dynamic(request.image.clone())
            .to_png_bytes()
            .map_err(|err| fail(err.to_string()))?;

        let mut child = self.command(request).spawn().map_err(|err| {
            fail(format!(
                "cannot start {}: {}",
                self.binary.display(),
                err
            ))
        })?;

        let (Some(mut stdin), Some(mut stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            kill_quietly(&mut child);
            return Err(fail("child process pipes unavailable".into()));
        };

        let deadline = request.timeout.map(|timeout| Instant::now() + timeout);

        // stdin, stdout and stderr are serviced on their own threads so a full
        // pipe can never stall the poll loop below.
        let (outcome, tsv, diagnostics) = thread::scope(|scope| {
            scope.spawn(move || {
                // A child killed mid-write surfaces as a broken pipe; the exit
                // status carries the real story.
                let _ = stdin.write_all(&png);
            });
            let out_reader = scope.spawn(move || {
                let mut buffer = String::new();
                stdout.read_to_string(&mut buffer).map(|_| buffer)
            });
            let err_reader = scope.spawn(move || {
                let mut buffer = String::new();
                let _ = stderr.read_to_string(&mut buffer);
                buffer
            });

            let outcome = wait_for_exit(&mut child, request, deadline);
            let tsv = out_reader.join();
            let diagnostics = err_reader.join().unwrap_or_default();
            (outcome, tsv, diagnostics)
        });

        let status = match outcome {
            Exit::Finished(status) => status,
            Exit::Cancelled => return Err(fail("recognition cancelled".into())),
            Exit::TimedOut => {
                return Err(SchriftwerkError::RecognitionTimeout {
                    page,
                    after_ms: request.timeout.map_or(0, |t| t.as_millis() as u64),
                });
            }
            Exit::WaitFailed(err) => {
                return Err(fail(format!("cannot wait for tesseract: {err}")));
            }
        };

        if !status.success() {
            warn!(%status, "tesseract exited with failure");
            return Err(fail(format!(
                "tesseract exited with {}: {}",
                status,
                last_line(&diagnostics)
            )));
        }

        let tsv = match tsv {
            Ok(Ok(tsv)) => tsv,
            Ok(Err(err)) => return Err(fail(format!("cannot read tesseract output: {err}"))),
            Err(_) => return Err(fail("tesseract output reader panicked".into())),
        };

        let words = parse_tsv(&tsv);
        debug!(words = words.len(), "tesseract finished");
        Ok(PageRecognition::from_words(
            words,
            RasterGeometry {
                width: request.image.width(),
                height: request.image.height(),
                dpi: request.dpi,
            },
        ))
    }
}

enum Exit {
    Finished(ExitStatus),
    Cancelled,
    TimedOut,
    WaitFailed(std::io::Error),
}

/// Poll the child until it exits, is cancelled, or runs past `deadline`.
/// Cancelled and overdue children are killed and reaped before returning.
fn wait_for_exit(
    child: &mut Child,
    request: &RecognitionRequest<'_>,
    deadline: Option<Instant>,
) -> Exit {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Exit::Finished(status),
            Ok(None) => {}
            Err(err) => {
                kill_quietly(child);
                return Exit::WaitFailed(err);
            }
        }
        if request.cancel.is_cancelled() {
            kill_quietly(child);
            return Exit::Cancelled;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            kill_quietly(child);
            return Exit::TimedOut;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn kill_quietly(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!(%err, "kill after exit");
    }
    let _ = child.wait();
}

fn last_line(diagnostics: &str) -> &str {
    diagnostics
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no diagnostics")
}

/// Extract word rows from Tesseract TSV output.
///
/// Columns: `level page_num block_num par_num line_num word_num left top
/// width height conf text`. Rows that are not words, have negative
/// confidence, or carry only whitespace are skipped. Lines are renumbered
/// sequentially across blocks and paragraphs.
pub fn parse_tsv(tsv: &str) -> Vec<RecognizedWord> {
    let mut words = Vec::new();
    let mut current_key: Option<(u32, u32, u32)> = None;
    let mut line_number = 0u32;

    for row in tsv.lines() {
        let columns: Vec<&str> = row.split('\t').collect();
        if columns.len() < 12 {
            continue;
        }
        let Ok(level) = columns[0].trim().parse::<u32>() else {
            continue; // header
        };
        if level != WORD_LEVEL {
            continue;
        }

        let number = |i: usize| columns[i].trim().parse::<u32>().ok();
        let (Some(block), Some(par), Some(line)) = (number(2), number(3), number(4)) else {
            continue;
        };
        let (Some(left), Some(top), Some(width), Some(height)) =
            (number(6), number(7), number(8), number(9))
        else {
            continue;
        };
        let confidence = match columns[10].trim().parse::<f32>() {
            Ok(conf) if conf >= 0.0 => (conf / 100.0).clamp(0.0, 1.0),
            _ => continue,
        };
        // Text is the last column and may itself contain tabs in theory.
        let text = columns[11..].join("\t");
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let key = (block, par, line);
        if current_key != Some(key) {
            if current_key.is_some() {
                line_number += 1;
            }
            current_key = Some(key);
        }

        words.push(RecognizedWord {
            text: text.to_owned(),
            bbox: BoundingBox::new(left, top, width, height),
            confidence,
            line: line_number,
        });
    }

    words
}
