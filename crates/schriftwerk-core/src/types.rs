// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Schriftwerk OCR pipeline.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, SchriftwerkError};

/// Unique identifier for a processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Requested form of the final artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// Plain UTF-8 text, pages separated by [`PAGE_BREAK`].
    Text,
    /// The source PDF with an invisible, position-aligned text layer.
    Searchable,
}

impl OutputMode {
    /// MIME type of the artifact produced in this mode.
    pub fn media_type(&self) -> &'static str {
        match self {
            Self::Text => "text/plain; charset=utf-8",
            Self::Searchable => "application/pdf",
        }
    }

    /// File extension used for the on-disk output artifact.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Searchable => "pdf",
        }
    }
}

impl FromStr for OutputMode {
    type Err = SchriftwerkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "searchable" | "pdf" => Ok(Self::Searchable),
            other => Err(SchriftwerkError::Config(format!(
                "unknown output mode '{other}' (expected 'text' or 'searchable')"
            ))),
        }
    }
}

/// Explicit marker placed between pages in text output.
///
/// A form feed on its own line, so the output always splits back into exactly
/// one segment per source page.
pub const PAGE_BREAK: &str = "\n\u{000C}\n";

/// Lifecycle states of a job. Every state except `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Lifecycle states of a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageStatus {
    Pending,
    Rasterizing,
    Recognizing,
    Done,
    Failed,
}

impl PageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Set of OCR language codes (Tesseract-style, e.g. `eng`, `deu`, `chi_sim`).
///
/// Kept sorted so the same request always produces the same engine arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageSet(BTreeSet<String>);

impl LanguageSet {
    /// Build a set from individual codes, validating each one.
    pub fn new<I, S>(codes: I) -> Result<Self, SchriftwerkError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for code in codes {
            let code = code.as_ref().trim();
            if code.is_empty() {
                continue;
            }
            validate_language_code(code)?;
            set.insert(code.to_owned());
        }
        if set.is_empty() {
            return Err(SchriftwerkError::Config(
                "language set must contain at least one code".into(),
            ));
        }
        Ok(Self(set))
    }

    /// Parse `eng+deu` or `eng,deu` into a set.
    pub fn parse(raw: &str) -> Result<Self, SchriftwerkError> {
        Self::new(raw.split(['+', ',']))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    /// The `-l` argument understood by Tesseract (`deu+eng`).
    pub fn tesseract_arg(&self) -> String {
        self.iter().collect::<Vec<_>>().join("+")
    }
}

impl Default for LanguageSet {
    fn default() -> Self {
        Self(BTreeSet::from(["eng".to_owned()]))
    }
}

impl fmt::Display for LanguageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tesseract_arg())
    }
}

impl FromStr for LanguageSet {
    type Err = SchriftwerkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn validate_language_code(code: &str) -> Result<(), SchriftwerkError> {
    let valid_len = (2..=16).contains(&code.len());
    let starts_alpha = code
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase());
    let valid_chars = code
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid_len && starts_alpha && valid_chars {
        Ok(())
    } else {
        Err(SchriftwerkError::Config(format!(
            "invalid language code '{code}'"
        )))
    }
}

/// Axis-aligned box in raster pixel space (origin top-left, y grows down).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.left.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.top.saturating_add(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// One recognized word with its geometry and confidence (0.0–1.0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedWord {
    pub text: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// Line number within the page, used to rebuild line breaks.
    pub line: u32,
}

/// Raster dimensions a recognition result refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterGeometry {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
}

/// Output of recognizing one page image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecognition {
    pub text: String,
    pub words: Vec<RecognizedWord>,
    /// Mean word confidence, 0.0 when no words were found.
    pub confidence: f32,
    pub geometry: RasterGeometry,
}

impl PageRecognition {
    /// Build a result from words, deriving text (one line per `line` value)
    /// and mean confidence.
    pub fn from_words(words: Vec<RecognizedWord>, geometry: RasterGeometry) -> Self {
        let mut text = String::new();
        let mut current_line: Option<u32> = None;
        for word in &words {
            match current_line {
                Some(line) if line == word.line => text.push(' '),
                Some(_) => text.push('\n'),
                None => {}
            }
            current_line = Some(word.line);
            text.push_str(&word.text);
        }
        let confidence = mean_confidence(&words);
        Self {
            text,
            words,
            confidence,
            geometry,
        }
    }
}

impl PageRecognition {
    /// Build a result from a page's existing text layer.
    ///
    /// Words carry no geometry (empty boxes) and full confidence; blank lines
    /// are dropped.
    pub fn from_text_layer(text: &str, geometry: RasterGeometry) -> Self {
        let clean = crate::text::sanitize(text);
        let words = clean
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .flat_map(|(line, content)| {
                content.split_whitespace().map(move |word| RecognizedWord {
                    text: word.to_owned(),
                    bbox: BoundingBox::new(0, 0, 0, 0),
                    confidence: 1.0,
                    line: line as u32,
                })
            })
            .collect();
        Self::from_words(words, geometry)
    }
}

fn mean_confidence(words: &[RecognizedWord]) -> f32 {
    if words.is_empty() {
        return 0.0;
    }
    words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32
}

/// An error recorded on a job, optionally attributed to a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub page: Option<usize>,
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&SchriftwerkError> for JobError {
    fn from(err: &SchriftwerkError) -> Self {
        Self {
            page: err.page(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Where the source bytes of a document come from.
#[derive(Debug, Clone)]
pub enum SourceHandle {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// Caller-facing job request.
#[derive(Debug, Clone)]
pub struct DocumentRequest {
    pub source: SourceHandle,
    /// Display name for logs and results.
    pub name: String,
    /// Declared page count; must match the PDF when present.
    pub page_count: Option<usize>,
    /// Requested languages; the configured default applies when absent.
    pub languages: Option<LanguageSet>,
    pub output_mode: OutputMode,
}

impl DocumentRequest {
    pub fn from_path(path: impl Into<PathBuf>, output_mode: OutputMode) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            source: SourceHandle::Path(path),
            name,
            page_count: None,
            languages: None,
            output_mode,
        }
    }

    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>, output_mode: OutputMode) -> Self {
        Self {
            source: SourceHandle::Bytes(bytes),
            name: name.into(),
            page_count: None,
            languages: None,
            output_mode,
        }
    }

    pub fn with_languages(mut self, languages: LanguageSet) -> Self {
        self.languages = Some(languages);
        self
    }

    pub fn with_page_count(mut self, page_count: usize) -> Self {
        self.page_count = Some(page_count);
        self
    }
}

/// A validated document. Immutable once a job starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    pub byte_len: u64,
    pub page_count: usize,
    pub languages: LanguageSet,
    pub output_mode: OutputMode,
    /// SHA-256 of the source bytes.
    pub fingerprint: String,
}

/// Per-page entry of a job result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageReport {
    pub index: usize,
    pub status: PageStatus,
    pub text: String,
    pub confidence: f32,
    pub words: Vec<RecognizedWord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

/// The reassembled output returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub mode: OutputMode,
    pub media_type: String,
    pub byte_len: u64,
    /// SHA-256 of `bytes`.
    pub sha256: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// Final, structured outcome of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub status: JobStatus,
    pub document: Option<Document>,
    pub pages: Vec<PageReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    pub errors: Vec<JobError>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl JobResult {
    pub fn done_pages(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| p.status == PageStatus::Done)
            .count()
    }

    pub fn failed_pages(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| p.status == PageStatus::Failed)
            .count()
    }

    /// Plain text of the artifact when the job ran in text mode.
    pub fn text(&self) -> Option<&str> {
        self.artifact
            .as_ref()
            .filter(|a| a.mode == OutputMode::Text)
            .and_then(|a| std::str::from_utf8(&a.bytes).ok())
    }
}
