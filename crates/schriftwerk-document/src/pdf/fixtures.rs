// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory PDF fixtures for tests. Available to other workspace crates
// through the `test-util` feature.

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, Stream, dictionary};

/// Raw pixel payload embedded as an image XObject.
pub enum FixtureImage {
    /// Uncompressed 8-bit DeviceGray samples.
    Gray { width: u32, height: u32, pixels: Vec<u8> },
    /// Bytes that claim to be a JPEG but are not.
    CorruptJpeg,
}

/// One page of a fixture document.
pub struct FixturePage {
    pub width: f32,
    pub height: f32,
    pub inherited_rotation: Option<i64>,
    pub image: Option<FixtureImage>,
    /// Visible Helvetica text drawn near the top-left corner.
    pub text: Option<String>,
}

impl FixturePage {
    pub fn blank(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            inherited_rotation: None,
            image: None,
            text: None,
        }
    }

    /// A born-digital page carrying `text` in its content stream.
    pub fn digital(width: f32, height: f32, text: &str) -> Self {
        Self {
            text: Some(text.to_owned()),
            ..Self::blank(width, height)
        }
    }

    /// A page filled by a uniform gray image of `px_width` x `px_height`.
    pub fn scanned(width: f32, height: f32, px_width: u32, px_height: u32, shade: u8) -> Self {
        Self {
            image: Some(FixtureImage::Gray {
                width: px_width,
                height: px_height,
                pixels: vec![shade; (px_width * px_height) as usize],
            }),
            ..Self::blank(width, height)
        }
    }

    pub fn corrupt(width: f32, height: f32) -> Self {
        Self {
            image: Some(FixtureImage::CorruptJpeg),
            ..Self::blank(width, height)
        }
    }

    /// Put `/Rotate` on an intermediate page-tree node instead of the page.
    pub fn with_inherited_rotation(mut self, degrees: i64) -> Self {
        self.inherited_rotation = Some(degrees);
        self
    }
}

/// Serialise `pages` into a PDF. Each page gets its own intermediate
/// `/Pages` node so inherited attributes can be exercised.
pub fn build_pdf(pages: &[FixturePage]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let root_pages_id = doc.new_object_id();
    let mut kids = Vec::with_capacity(pages.len());

    for page in pages {
        let node_id = doc.new_object_id();
        let mut resources = Dictionary::new();
        let mut operations = Vec::new();

        if let Some(image) = &page.image {
            let stream = match image {
                FixtureImage::Gray {
                    width,
                    height,
                    pixels,
                } => Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Width" => *width as i64,
                        "Height" => *height as i64,
                        "ColorSpace" => "DeviceGray",
                        "BitsPerComponent" => 8,
                    },
                    pixels.clone(),
                ),
                FixtureImage::CorruptJpeg => Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Width" => 16,
                        "Height" => 16,
                        "ColorSpace" => "DeviceRGB",
                        "BitsPerComponent" => 8,
                        "Filter" => "DCTDecode",
                    },
                    b"\xFF\xD8 this is not really a jpeg".to_vec(),
                ),
            };
            let image_id = doc.add_object(stream);
            resources.set("XObject", dictionary! { "Im0" => image_id });
            operations.extend([
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        page.width.into(),
                        0.into(),
                        0.into(),
                        page.height.into(),
                        0.into(),
                        0.into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ]);
        }

        if let Some(text) = &page.text {
            resources.set(
                "Font",
                dictionary! {
                    "F1" => dictionary! {
                        "Type" => "Font",
                        "Subtype" => "Type1",
                        "BaseFont" => "Helvetica",
                        "Encoding" => "WinAnsiEncoding",
                    },
                },
            );
            operations.extend([
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![36.into(), (page.height - 48.0).into()]),
                Operation::new("Tj", vec![Object::string_literal(text.as_str())]),
                Operation::new("ET", vec![]),
            ]);
        }

        let content = Content { operations }.encode().unwrap();
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => node_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), page.width.into(), page.height.into()],
            "Resources" => resources,
        });

        let mut node = dictionary! {
            "Type" => "Pages",
            "Parent" => root_pages_id,
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        };
        if let Some(degrees) = page.inherited_rotation {
            node.set("Rotate", degrees);
        }
        doc.objects.insert(node_id, Object::Dictionary(node));
        kids.push(node_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        root_pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => root_pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}
