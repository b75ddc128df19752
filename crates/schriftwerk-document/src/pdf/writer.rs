// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Searchable PDF writer — copies the source document unchanged and lays an
// invisible text layer over each recognised page.
//
// Every word becomes one `Tj` in text render mode 3 (neither fill nor
// stroke), positioned on its bounding box and stretched with `Tz` to the box
// width. Text is set in the base-14 Helvetica with WinAnsi encoding, so
// characters outside Windows-1252 are written as `?`; selection and search
// geometry stay correct either way.

use std::io::Write;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat, dictionary};
use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_core::{BoundingBox, PageRecognition, RasterGeometry};
use tracing::{debug, info, instrument};

use super::reader::{PageGeometry, PdfReader};

/// Resource name of the overlay font on every page that receives a layer.
const OVERLAY_FONT: &str = "FOcr";
/// Average Helvetica advance width as a fraction of the font size.
const AVERAGE_GLYPH_WIDTH: f32 = 0.5;
/// Helvetica descender depth as a fraction of the font size.
const DESCENT: f32 = 0.2;
/// Text render mode 3: invisible.
const RENDER_INVISIBLE: i64 = 3;

/// Recognition result for one page, to be laid over that page.
#[derive(Debug, Clone, Copy)]
pub struct PageOverlay<'a> {
    /// 0-based page index in the source document.
    pub index: usize,
    pub recognition: &'a PageRecognition,
}

/// Produces a searchable copy of a source PDF.
///
/// Pages without an overlay (failed recognition, or nothing recognised) are
/// carried over untouched.
pub struct SearchablePdfWriter<'a> {
    source: &'a PdfReader,
}

impl<'a> SearchablePdfWriter<'a> {
    pub fn new(source: &'a PdfReader) -> Self {
        Self { source }
    }

    /// Serialise the searchable document into `out`.
    ///
    /// Fails with [`SchriftwerkError::Reassembly`] when an overlay cannot be
    /// attached or the document cannot be written.
    #[instrument(skip_all, fields(pages = self.source.page_count(), overlays = overlays.len()))]
    pub fn write<W: Write>(&self, overlays: &[PageOverlay<'_>], out: &mut W) -> Result<()> {
        let mut document = self.source.document().clone();
        let font_id = document.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });

        let mut layered = 0usize;
        for overlay in overlays {
            let geometry = self
                .source
                .page_geometry(overlay.index)
                .map_err(|err| reassembly(overlay.index, err))?;
            let Some(content) = overlay_content(&geometry, overlay.recognition)? else {
                continue;
            };
            let page_id = self
                .source
                .page_id(overlay.index)
                .map_err(|err| reassembly(overlay.index, err))?;
            self.attach_overlay(&mut document, page_id, font_id, content)
                .map_err(|err| reassembly(overlay.index, err))?;
            layered += 1;
        }

        document.save_to(out).map_err(|err| {
            SchriftwerkError::Reassembly(format!("failed to serialise searchable PDF: {}", err))
        })?;

        info!(layered, "Searchable PDF written");
        Ok(())
    }

    /// Wrap the page's existing content in `q .. Q` and append the overlay
    /// stream, registering the overlay font in a page-local resource copy.
    fn attach_overlay(
        &self,
        document: &mut Document,
        page_id: ObjectId,
        font_id: ObjectId,
        overlay: Vec<u8>,
    ) -> Result<()> {
        let source = self.source;

        // Resources may be inherited or shared between pages; the page gets
        // its own copy so other pages are unaffected.
        let mut resources = source
            .inherited_attribute(page_id, b"Resources")
            .and_then(|object| source.resolve_dictionary(object))
            .cloned()
            .unwrap_or_default();
        let mut fonts = resources
            .get(b"Font")
            .ok()
            .and_then(|object| source.resolve_dictionary(object))
            .cloned()
            .unwrap_or_default();
        fonts.set(OVERLAY_FONT, Object::Reference(font_id));
        resources.set("Font", Object::Dictionary(fonts));

        let page = source
            .document()
            .get_dictionary(page_id)
            .map_err(|err| SchriftwerkError::PdfError(format!("cannot read page object: {err}")))?;
        let mut contents = existing_contents(source, page);

        let open_id = document.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
        let overlay_id = document.add_object(Stream::new(Dictionary::new(), overlay));
        contents.insert(0, Object::Reference(open_id));
        contents.push(Object::Reference(overlay_id));

        let page = document
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|err| SchriftwerkError::PdfError(format!("cannot update page object: {err}")))?;
        page.set("Contents", Object::Array(contents));
        page.set("Resources", Object::Dictionary(resources));
        Ok(())
    }
}

fn reassembly(index: usize, err: SchriftwerkError) -> SchriftwerkError {
    SchriftwerkError::Reassembly(format!("page {index}: {err}"))
}

/// The page's content streams as a flat list of references.
fn existing_contents(source: &PdfReader, page: &Dictionary) -> Vec<Object> {
    let Ok(contents) = page.get(b"Contents") else {
        return Vec::new();
    };
    match source.resolve(contents) {
        Object::Array(items) => items.clone(),
        Object::Stream(_) => vec![contents.clone()],
        _ => Vec::new(),
    }
}

/// Encoded content stream placing every word of `recognition` on the page,
/// or `None` when there is nothing to place.
fn overlay_content(
    geometry: &PageGeometry,
    recognition: &PageRecognition,
) -> Result<Option<Vec<u8>>> {
    let mut operations = vec![
        Operation::new("Q", vec![]),
        Operation::new("BT", vec![]),
        Operation::new("Tr", vec![Object::Integer(RENDER_INVISIBLE)]),
    ];
    let mut placed = 0usize;

    let words = &recognition.words;
    for (position, word) in words.iter().enumerate() {
        let Some(placement) = place_word(geometry, &recognition.geometry, &word.bbox) else {
            continue;
        };
        let glyphs = word.text.chars().count().max(1) as f32;
        let natural_width = placement.font_size * AVERAGE_GLYPH_WIDTH * glyphs;
        let scale = 100.0 * placement.width / natural_width;

        let mut text = encode_win_ansi(&word.text);
        let line_continues = words
            .get(position + 1)
            .is_some_and(|next| next.line == word.line);
        if line_continues {
            text.push(b' ');
        }

        operations.extend([
            Operation::new(
                "Tf",
                vec![
                    Object::Name(OVERLAY_FONT.as_bytes().to_vec()),
                    Object::Real(placement.font_size),
                ],
            ),
            Operation::new("Tz", vec![Object::Real(scale)]),
            Operation::new(
                "Tm",
                placement.matrix.iter().map(|v| Object::Real(*v)).collect(),
            ),
            Operation::new("Tj", vec![Object::String(text, StringFormat::Hexadecimal)]),
        ]);
        placed += 1;
    }

    if placed == 0 {
        return Ok(None);
    }
    operations.push(Operation::new("ET", vec![]));
    debug!(placed, "Overlay built");

    Content { operations }
        .encode()
        .map(Some)
        .map_err(|err| SchriftwerkError::Reassembly(format!("cannot encode text layer: {err}")))
}

/// Where and how large one word is drawn, in unrotated PDF user space.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Placement {
    /// Text matrix `[a b c d e f]`; the origin is the word's baseline start.
    matrix: [f32; 6],
    font_size: f32,
    /// Box width in points along the text direction.
    width: f32,
}

/// Map a pixel box on the displayed raster to a text placement on the page.
///
/// The raster shows the page with `/Rotate` applied, so the box is first
/// expressed as fractions of the displayed page and then turned back into
/// unrotated user space.
fn place_word(
    geometry: &PageGeometry,
    raster: &RasterGeometry,
    bbox: &BoundingBox,
) -> Option<Placement> {
    if raster.width == 0 || raster.height == 0 || bbox.is_empty() {
        return None;
    }
    let (display_w, display_h) = geometry.display_size();
    let scale_x = display_w / raster.width as f32;
    let scale_y = display_h / raster.height as f32;

    let left = bbox.left as f32 * scale_x;
    let width = bbox.width as f32 * scale_x;
    let font_size = bbox.height as f32 * scale_y;
    let baseline = bbox.bottom() as f32 * scale_y - DESCENT * font_size;

    let u = left / display_w;
    let v = baseline / display_h;
    let (page_w, page_h) = (geometry.width(), geometry.height());

    let (x, y, dx, dy) = match geometry.rotation {
        90 => (v * page_w, u * page_h, 0.0, 1.0),
        180 => ((1.0 - u) * page_w, v * page_h, -1.0, 0.0),
        270 => ((1.0 - v) * page_w, (1.0 - u) * page_h, 0.0, -1.0),
        _ => (u * page_w, (1.0 - v) * page_h, 1.0, 0.0),
    };

    Some(Placement {
        matrix: [
            dx,
            dy,
            -dy,
            dx,
            geometry.media_box[0] + x,
            geometry.media_box[1] + y,
        ],
        font_size,
        width,
    })
}

/// Encode text as Windows-1252 (PDF `WinAnsiEncoding`), substituting `?`
/// for anything it cannot represent.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            ' '..='~' => c as u8,
            '\u{A0}'..='\u{FF}' => c as u32 as u8,
            '€' => 0x80,
            '‚' => 0x82,
            'ƒ' => 0x83,
            '„' => 0x84,
            '…' => 0x85,
            '†' => 0x86,
            '‡' => 0x87,
            'ˆ' => 0x88,
            '‰' => 0x89,
            'Š' => 0x8A,
            '‹' => 0x8B,
            'Œ' => 0x8C,
            'Ž' => 0x8E,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            '˜' => 0x98,
            '™' => 0x99,
            'š' => 0x9A,
            '›' => 0x9B,
            'œ' => 0x9C,
            'ž' => 0x9E,
            'Ÿ' => 0x9F,
            _ => b'?',
        })
        .collect()
}
