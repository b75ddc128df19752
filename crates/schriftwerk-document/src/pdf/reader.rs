// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF reader — parse a source document once with `lopdf` and answer the
// questions later stages ask about it: page count, encryption, page objects
// and page geometry (MediaBox / Rotate, including inherited values).

use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId};
use schriftwerk_core::error::{Result, SchriftwerkError};
use tracing::{debug, info, instrument};

/// Upper bound on `/Parent` hops and reference chains followed while
/// resolving page attributes. Guards against cyclic page trees.
const MAX_INDIRECTION: usize = 32;

/// US Letter, used when neither the page nor any ancestor has a MediaBox.
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// A parsed source PDF together with the bytes it was parsed from.
///
/// Rasterizers that need the raw file (pdfium) and those that walk the object
/// graph (embedded-image extraction, searchable writer) share one instance.
pub struct PdfReader {
    /// The underlying lopdf document.
    document: Document,
    /// Page object IDs in page order (index 0 is the first page).
    pages: Vec<ObjectId>,
    /// The source bytes.
    bytes: Vec<u8>,
}

impl PdfReader {
    // -- Construction ---------------------------------------------------------

    /// Open a PDF from the filesystem.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        info!("Opening PDF: {}", path_ref.display());
        let bytes = std::fs::read(path_ref)?;
        Self::from_bytes(bytes)
    }

    /// Parse a PDF from bytes already in memory, taking ownership of them.
    #[instrument(skip_all, fields(bytes_len = data.len()))]
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let document = Document::load_mem(&data).map_err(|err| {
            SchriftwerkError::PdfError(format!("failed to load PDF from memory: {}", err))
        })?;

        // lopdf pages are keyed by 1-indexed page number; BTreeMap keeps them ordered.
        let pages: Vec<ObjectId> = document.get_pages().into_values().collect();
        debug!(pages = pages.len(), "PDF loaded from bytes");

        Ok(Self {
            document,
            pages,
            bytes: data,
        })
    }

    // -- Inspection -----------------------------------------------------------

    /// Number of pages in the document.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Whether the trailer declares an `/Encrypt` dictionary.
    pub fn is_encrypted(&self) -> bool {
        self.document.is_encrypted()
    }

    /// The source bytes this reader was built from.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Borrow the parsed lopdf document.
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Object ID of the page at 0-based `index`.
    pub fn page_id(&self, index: usize) -> Result<ObjectId> {
        self.pages.get(index).copied().ok_or_else(|| {
            SchriftwerkError::PdfError(format!(
                "page {} out of range (document has {} pages)",
                index,
                self.pages.len()
            ))
        })
    }

    /// Text drawn by the page's content stream, empty for image-only pages.
    ///
    /// Only as good as the document's font encodings; scanned pages that were
    /// already OCRed yield their invisible text layer here.
    #[instrument(skip(self))]
    pub fn page_text(&self, index: usize) -> Result<String> {
        self.page_id(index)?;
        let page_number = u32::try_from(index + 1).map_err(|_| {
            SchriftwerkError::PdfError(format!("page {index} out of range"))
        })?;
        self.document.extract_text(&[page_number]).map_err(|err| {
            SchriftwerkError::PdfError(format!("cannot extract text of page {index}: {err}"))
        })
    }

    /// MediaBox and effective rotation of the page at `index`.
    pub fn page_geometry(&self, index: usize) -> Result<PageGeometry> {
        let page_id = self.page_id(index)?;

        let media_box = match self.inherited_attribute(page_id, b"MediaBox") {
            Some(object) => parse_rectangle(&self.document, object).ok_or_else(|| {
                SchriftwerkError::PdfError(format!("page {} has a malformed /MediaBox", index))
            })?,
            None => DEFAULT_MEDIA_BOX,
        };

        let rotation = self
            .inherited_attribute(page_id, b"Rotate")
            .and_then(|object| resolve(&self.document, object).as_i64().ok())
            .map(normalise_rotation)
            .unwrap_or(0);

        Ok(PageGeometry {
            media_box,
            rotation,
        })
    }

    /// Look up `key` on a page dictionary, walking the `/Parent` chain for
    /// inheritable attributes (`/Resources`, `/MediaBox`, `/Rotate`, ...).
    pub fn inherited_attribute(&self, page_id: ObjectId, key: &[u8]) -> Option<&Object> {
        let mut current = self.document.get_dictionary(page_id).ok()?;
        for _ in 0..MAX_INDIRECTION {
            if let Ok(value) = current.get(key) {
                return Some(value);
            }
            let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
            current = self.document.get_dictionary(parent).ok()?;
        }
        None
    }

    /// Follow references from `object` until a direct object is reached.
    pub fn resolve<'a>(&'a self, object: &'a Object) -> &'a Object {
        resolve(&self.document, object)
    }

    /// Resolve `object` to a dictionary, following references.
    pub fn resolve_dictionary<'a>(&'a self, object: &'a Object) -> Option<&'a Dictionary> {
        self.resolve(object).as_dict().ok()
    }
}

/// Follow `Object::Reference` chains in `document`, bounded by
/// [`MAX_INDIRECTION`]. Dangling references resolve to the reference itself.
pub(crate) fn resolve<'a>(document: &'a Document, object: &'a Object) -> &'a Object {
    let mut current = object;
    for _ in 0..MAX_INDIRECTION {
        match current {
            Object::Reference(id) => match document.get_object(*id) {
                Ok(next) => current = next,
                Err(_) => return current,
            },
            _ => return current,
        }
    }
    current
}

fn parse_rectangle(document: &Document, object: &Object) -> Option<[f32; 4]> {
    let array = resolve(document, object).as_array().ok()?;
    if array.len() != 4 {
        return None;
    }
    let mut values = [0.0f32; 4];
    for (slot, item) in values.iter_mut().zip(array) {
        *slot = resolve(document, item).as_float().ok()?;
    }
    // Corners may be given in any order; normalise to lower-left / upper-right.
    let [x0, y0, x1, y1] = values;
    let rect = [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)];
    if rect[2] - rect[0] <= 0.0 || rect[3] - rect[1] <= 0.0 {
        return None;
    }
    Some(rect)
}

/// Clamp an arbitrary `/Rotate` value to 0, 90, 180 or 270.
fn normalise_rotation(raw: i64) -> u16 {
    let snapped = ((raw as f64 / 90.0).round() as i64 * 90).rem_euclid(360);
    snapped as u16
}

/// Size and orientation of a page in PDF user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    /// `[x0, y0, x1, y1]` in points, normalised so `x0 < x1` and `y0 < y1`.
    pub media_box: [f32; 4],
    /// Clockwise display rotation: 0, 90, 180 or 270.
    pub rotation: u16,
}

impl PageGeometry {
    /// Unrotated page width in points.
    pub fn width(&self) -> f32 {
        self.media_box[2] - self.media_box[0]
    }

    /// Unrotated page height in points.
    pub fn height(&self) -> f32 {
        self.media_box[3] - self.media_box[1]
    }

    /// `(width, height)` in points as the page is displayed (rotation applied).
    pub fn display_size(&self) -> (f32, f32) {
        if self.is_sideways() {
            (self.height(), self.width())
        } else {
            (self.width(), self.height())
        }
    }

    /// Pixel dimensions of the displayed page rendered at `dpi`.
    pub fn pixel_size(&self, dpi: u32) -> (u32, u32) {
        let (width, height) = self.display_size();
        let scale = dpi as f32 / 72.0;
        (
            ((width * scale).round() as u32).max(1),
            ((height * scale).round() as u32).max(1),
        )
    }

    pub fn is_sideways(&self) -> bool {
        self.rotation == 90 || self.rotation == 270
    }
}
