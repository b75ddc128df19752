// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Embedded-image rasterizer — pure-Rust rasterization for scanned PDFs.
//
// A scanned page is almost always one full-page image XObject. This backend
// picks the largest image on the page, decodes it (JPEG, Flate or raw 8-bit
// Gray/RGB/CMYK), applies the page rotation and resamples it to the size the
// page would have at the requested DPI. A page without any image renders as
// blank white paper. Vector content is ignored; use the pdfium backend for
// born-digital documents.

use image::{DynamicImage, GrayImage, ImageFormat, Luma, RgbImage};
use lopdf::{ObjectId, Stream};
use schriftwerk_core::error::{Result, SchriftwerkError};
use tracing::{debug, instrument};

use super::{MAX_RASTER_PIXELS, PageRasterizer};
use crate::image::processor::ImageProcessor;
use crate::pdf::reader::PdfReader;

/// Rasterizer that extracts the dominant embedded image of each page.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedImageRasterizer;

impl PageRasterizer for EmbeddedImageRasterizer {
    fn name(&self) -> &str {
        "embedded"
    }

    #[instrument(skip(self, source), fields(page = index, dpi))]
    fn rasterize(&self, source: &PdfReader, index: usize, dpi: u32) -> Result<DynamicImage> {
        let fail = |detail: String| SchriftwerkError::Rasterization {
            page: index,
            detail,
        };

        let geometry = source.page_geometry(index).map_err(|err| fail(err.to_string()))?;
        let (target_w, target_h) = geometry.pixel_size(dpi);
        if target_w as u64 * target_h as u64 > MAX_RASTER_PIXELS {
            return Err(fail(format!(
                "raster of {target_w}x{target_h} at {dpi} DPI exceeds the pixel limit"
            )));
        }

        let page_id = source.page_id(index).map_err(|err| fail(err.to_string()))?;
        let Some(stream) = dominant_image(source, page_id) else {
            debug!(target_w, target_h, "No embedded image; rendering a white page");
            return Ok(DynamicImage::ImageLuma8(GrayImage::from_pixel(
                target_w,
                target_h,
                Luma([255]),
            )));
        };
        let decoded = decode_image_stream(source, stream).map_err(fail)?;
        debug!(
            source_w = decoded.width(),
            source_h = decoded.height(),
            target_w,
            target_h,
            rotation = geometry.rotation,
            "Embedded image decoded"
        );

        Ok(ImageProcessor::from_dynamic(decoded)
            .orient(geometry.rotation)
            .resize_exact(target_w, target_h)
            .into_dynamic())
    }
}

/// The image XObject with the largest pixel area in the page's resources.
fn dominant_image(source: &PdfReader, page_id: ObjectId) -> Option<&Stream> {
    let resources = source
        .inherited_attribute(page_id, b"Resources")
        .and_then(|object| source.resolve_dictionary(object))?;
    let xobjects = resources
        .get(b"XObject")
        .ok()
        .and_then(|object| source.resolve_dictionary(object))?;

    xobjects
        .iter()
        .filter_map(|(_, object)| source.resolve(object).as_stream().ok())
        .filter(|stream| {
            stream
                .dict
                .get(b"Subtype")
                .and_then(|subtype| subtype.as_name())
                .is_ok_and(|name| name == b"Image")
        })
        .max_by_key(|stream| {
            let (width, height) = image_dimensions(stream).unwrap_or((0, 0));
            width as u64 * height as u64
        })
}

fn image_dimensions(stream: &Stream) -> Option<(u32, u32)> {
    let width = stream.dict.get(b"Width").ok()?.as_i64().ok()?;
    let height = stream.dict.get(b"Height").ok()?.as_i64().ok()?;
    let width = u32::try_from(width).ok().filter(|w| *w > 0)?;
    let height = u32::try_from(height).ok().filter(|h| *h > 0)?;
    Some((width, height))
}

/// Filter names of a stream, outermost first.
fn filter_names(stream: &Stream) -> Vec<Vec<u8>> {
    match stream.dict.get(b"Filter") {
        Ok(lopdf::Object::Name(name)) => vec![name.clone()],
        Ok(lopdf::Object::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_name().ok().map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}

fn decode_image_stream(
    source: &PdfReader,
    stream: &Stream,
) -> std::result::Result<DynamicImage, String> {
    let (width, height) = image_dimensions(stream)
        .ok_or_else(|| "image has no valid /Width or /Height".to_string())?;
    let filters = filter_names(stream);

    match filters.as_slice() {
        [only] if only.as_slice() == b"DCTDecode" => {
            return ImageProcessor::from_bytes(&stream.content, Some(ImageFormat::Jpeg))
                .map(ImageProcessor::into_dynamic)
                .map_err(|err| err.to_string());
        }
        [] | [_] => {}
        _ => {
            return Err(format!(
                "unsupported filter chain {}",
                describe_filters(&filters)
            ));
        }
    }

    let samples = match filters.first().map(Vec::as_slice) {
        None => stream.content.clone(),
        Some(b"FlateDecode") => stream
            .decompressed_content()
            .map_err(|err| format!("cannot inflate image data: {err}"))?,
        Some(_) => {
            return Err(format!(
                "unsupported image encoding {}",
                describe_filters(&filters)
            ));
        }
    };

    let bits = stream
        .dict
        .get(b"BitsPerComponent")
        .and_then(|bits| bits.as_i64())
        .unwrap_or(8);
    if bits != 8 {
        return Err(format!("unsupported {bits}-bit image samples"));
    }

    let components = colour_components(source, stream)
        .ok_or_else(|| "unsupported image colour space".to_string())?;
    samples_to_image(samples, width, height, components)
}

fn describe_filters(filters: &[Vec<u8>]) -> String {
    filters
        .iter()
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .collect::<Vec<_>>()
        .join("+")
}

/// Number of colour components of an image's `/ColorSpace`.
///
/// Device and calibrated spaces plus `ICCBased` profiles are understood;
/// indexed, separation and pattern spaces are reported as unsupported.
fn colour_components(source: &PdfReader, stream: &Stream) -> Option<u8> {
    let space = source.resolve(stream.dict.get(b"ColorSpace").ok()?);
    match space {
        lopdf::Object::Name(name) => components_for_name(name),
        lopdf::Object::Array(items) => {
            let family = items.first()?.as_name().ok()?;
            if family == b"ICCBased" {
                items
                    .get(1)
                    .and_then(|profile| source.resolve(profile).as_stream().ok())
                    .and_then(|profile| profile.dict.get(b"N").ok())
                    .and_then(|n| n.as_i64().ok())
                    .and_then(|n| u8::try_from(n).ok())
            } else {
                components_for_name(family)
            }
        }
        _ => None,
    }
}

fn components_for_name(name: &[u8]) -> Option<u8> {
    match name {
        b"DeviceGray" | b"CalGray" => Some(1),
        b"DeviceRGB" | b"CalRGB" => Some(3),
        b"DeviceCMYK" => Some(4),
        _ => None,
    }
}

fn samples_to_image(
    mut samples: Vec<u8>,
    width: u32,
    height: u32,
    components: u8,
) -> std::result::Result<DynamicImage, String> {
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(components as usize))
        .ok_or_else(|| format!("image of {width}x{height} with {components} components is too large"))?;
    if samples.len() < expected {
        return Err(format!(
            "image data truncated: expected {expected} bytes, found {}",
            samples.len()
        ));
    }
    samples.truncate(expected);

    let image = match components {
        1 => GrayImage::from_raw(width, height, samples).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(width, height, samples).map(DynamicImage::ImageRgb8),
        4 => {
            let rgb: Vec<u8> = samples
                .chunks_exact(4)
                .flat_map(|cmyk| {
                    let k = 255 - cmyk[3] as u16;
                    let channel = |c: u8| ((255 - c as u16) * k / 255) as u8;
                    [channel(cmyk[0]), channel(cmyk[1]), channel(cmyk[2])]
                })
                .collect();
            RgbImage::from_raw(width, height, rgb).map(DynamicImage::ImageRgb8)
        }
        other => return Err(format!("unsupported {other}-component image")),
    };
    image.ok_or_else(|| "image buffer does not match its dimensions".to_string())
}
