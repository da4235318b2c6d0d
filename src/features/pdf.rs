use std::io::Write;

use chrono::{DateTime, FixedOffset};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

use crate::error::{PortalError, PortalResult};

/// Stamp size relative to the signature's native pixel size.
pub const STAMP_SCALE: f64 = 0.3;
/// Distance of the stamp from the right and bottom page edges, in points.
pub const STAMP_MARGIN: f64 = 50.0;
const TEXT_INDENT: f64 = 10.0;
const CAPTION_OFFSET: f64 = 15.0;
const TIMESTAMP_OFFSET: f64 = 27.0;
const CAPTION_SIZE: f64 = 8.0;
const TIMESTAMP_SIZE: f64 = 7.0;
const TEXT_GRAY: f64 = 0.5;

/// Where a stamp lands on one page, in PDF user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StampPlacement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl StampPlacement {
    pub fn caption_origin(&self) -> (f64, f64) {
        (self.x + TEXT_INDENT, self.y - CAPTION_OFFSET)
    }

    pub fn timestamp_origin(&self) -> (f64, f64) {
        (self.x + TEXT_INDENT, self.y - TIMESTAMP_OFFSET)
    }
}

/// Bottom-right placement inside `media_box` (`[llx, lly, urx, ury]`).
pub fn stamp_placement(media_box: [f64; 4], image_px: (u32, u32)) -> StampPlacement {
    let width = image_px.0 as f64 * STAMP_SCALE;
    let height = image_px.1 as f64 * STAMP_SCALE;
    StampPlacement {
        x: media_box[2] - STAMP_MARGIN - width,
        y: media_box[1] + STAMP_MARGIN,
        width,
        height,
    }
}

/// Date and time as printed under the caption (`dd/mm/yyyy, HH:MM`).
pub fn format_stamp_timestamp(at: &DateTime<FixedOffset>) -> String {
    at.format("%d/%m/%Y, %H:%M").to_string()
}

/// Stamps `signature_png` with `caption` and `timestamp` on every page of
/// `document` and returns the re-serialized bytes. Existing page content is
/// kept byte for byte; the stamp is appended in its own content streams.
pub fn stamp(
    document: &[u8],
    signature_png: &[u8],
    caption: &str,
    timestamp: &DateTime<FixedOffset>,
) -> PortalResult<Vec<u8>> {
    let mut doc = load_document(document)?;
    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    if pages.is_empty() {
        return Err(PortalError::MalformedDocument("pdf_has_no_pages".into()));
    }

    let (image_id, img_w, img_h) = embed_signature(&mut doc, signature_png)?;
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let stamped_at = format_stamp_timestamp(timestamp);

    for page_id in pages {
        let media_box = page_media_box(&doc, page_id)?;
        let placement = stamp_placement(media_box, (img_w, img_h));

        let mut resources = effective_resources(&doc, page_id)?;
        let image_name = {
            let xobjects = ensure_subdict(&doc, &mut resources, b"XObject")?;
            let name = unused_name(xobjects, "ImSig");
            xobjects.set(name.as_str(), image_id);
            name
        };
        let font_name = {
            let fonts = ensure_subdict(&doc, &mut resources, b"Font")?;
            let name = unused_name(fonts, "FSig");
            fonts.set(name.as_str(), font_id);
            name
        };
        {
            let page_dict = doc
                .get_object_mut(page_id)
                .and_then(|o| o.as_dict_mut())
                .map_err(|_| PortalError::MalformedDocument("signature_page_missing_dict".into()))?;
            page_dict.set("Resources", resources);
        }

        let content = stamp_content(&placement, &image_name, &font_name, caption, &stamped_at)?;
        wrap_page_contents(&mut doc, page_id, content)?;
    }

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| PortalError::MalformedDocument(format!("pdf_save_failed:{e}")))?;
    Ok(out)
}

pub fn page_count(document: &[u8]) -> PortalResult<usize> {
    Ok(load_document(document)?.get_pages().len())
}

fn load_document(bytes: &[u8]) -> PortalResult<Document> {
    Document::load_mem(bytes).map_err(|e| PortalError::MalformedDocument(format!("pdf_parse_failed:{e}")))
}

/// Adds the signature as an RGB image XObject with an 8-bit soft mask.
fn embed_signature(doc: &mut Document, png: &[u8]) -> PortalResult<(ObjectId, u32, u32)> {
    let img = image::load_from_memory_with_format(png, image::ImageFormat::Png)
        .map_err(|e| PortalError::ImageDecode(format!("signature_image_invalid:{e}")))?
        .to_rgba8();
    let (img_w, img_h) = img.dimensions();
    if img_w == 0 || img_h == 0 {
        return Err(PortalError::ImageDecode("signature_image_empty".into()));
    }
    let mut rgb = Vec::with_capacity((img_w * img_h * 3) as usize);
    let mut alpha = Vec::with_capacity((img_w * img_h) as usize);
    for pixel in img.pixels() {
        rgb.push(pixel[0]);
        rgb.push(pixel[1]);
        rgb.push(pixel[2]);
        alpha.push(pixel[3]);
    }

    let smask_stream = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => img_w as i64,
            "Height" => img_h as i64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        },
        deflate(&alpha)?,
    );
    let smask_id = doc.add_object(smask_stream);

    let image_stream = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => img_w as i64,
            "Height" => img_h as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "SMask" => smask_id,
            "Filter" => "FlateDecode",
        },
        deflate(&rgb)?,
    );
    let image_id = doc.add_object(image_stream);
    Ok((image_id, img_w, img_h))
}

fn deflate(raw: &[u8]) -> PortalResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(raw)
        .and_then(|_| encoder.finish())
        .map_err(|e| PortalError::ImageDecode(format!("signature_compress_failed:{e}")))
}

fn stamp_content(
    placement: &StampPlacement,
    image_name: &str,
    font_name: &str,
    caption: &str,
    stamped_at: &str,
) -> PortalResult<Vec<u8>> {
    let (cap_x, cap_y) = placement.caption_origin();
    let (ts_x, ts_y) = placement.timestamp_origin();
    let mut ops = vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![
                real(placement.width),
                Object::Integer(0),
                Object::Integer(0),
                real(placement.height),
                real(placement.x),
                real(placement.y),
            ],
        ),
        Operation::new("Do", vec![Object::Name(image_name.as_bytes().to_vec())]),
        Operation::new("Q", vec![]),
    ];
    for (text, size, x, y) in [
        (caption, CAPTION_SIZE, cap_x, cap_y),
        (stamped_at, TIMESTAMP_SIZE, ts_x, ts_y),
    ] {
        ops.extend([
            Operation::new("q", vec![]),
            Operation::new("rg", vec![real(TEXT_GRAY), real(TEXT_GRAY), real(TEXT_GRAY)]),
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![Object::Name(font_name.as_bytes().to_vec()), real(size)],
            ),
            Operation::new("Td", vec![real(x), real(y)]),
            Operation::new(
                "Tj",
                vec![Object::String(win_ansi(text), StringFormat::Literal)],
            ),
            Operation::new("ET", vec![]),
            Operation::new("Q", vec![]),
        ]);
    }
    Content { operations: ops }
        .encode()
        .map_err(|e| PortalError::MalformedDocument(format!("signature_content_encode_failed:{e}")))
}

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

/// Latin-1 subset of WinAnsi; anything else prints as `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| {
            let code = c as u32;
            if (0x20..0x7f).contains(&code) || (0xa0..=0xff).contains(&code) {
                code as u8
            } else {
                b'?'
            }
        })
        .collect()
}

/// Brackets the page's existing streams in `q ... Q` so any graphics state
/// they leave behind cannot move the stamp, then appends the stamp stream.
fn wrap_page_contents(doc: &mut Document, page_id: ObjectId, stamp: Vec<u8>) -> PortalResult<()> {
    let existing: Vec<Object> = {
        let page_dict = doc
            .get_object(page_id)
            .and_then(|o| o.as_dict())
            .map_err(|_| PortalError::MalformedDocument("signature_page_missing_dict".into()))?;
        match page_dict.get(b"Contents") {
            Ok(Object::Reference(id)) => match doc.get_object(*id) {
                // an indirect array of stream refs
                Ok(Object::Array(items)) => items.clone(),
                _ => vec![Object::Reference(*id)],
            },
            Ok(Object::Array(items)) => items.clone(),
            Ok(_) => {
                return Err(PortalError::MalformedDocument(
                    "signature_page_contents_invalid".into(),
                ))
            }
            Err(_) => Vec::new(),
        }
    };

    let open_id = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
    let mut close = b"\nQ\n".to_vec();
    close.extend_from_slice(&stamp);
    let close_id = doc.add_object(Stream::new(dictionary! {}, close));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(open_id));
    contents.extend(existing);
    contents.push(Object::Reference(close_id));

    let page_dict = doc
        .get_object_mut(page_id)
        .and_then(|o| o.as_dict_mut())
        .map_err(|_| PortalError::MalformedDocument("signature_page_missing_dict".into()))?;
    page_dict.set("Contents", Object::Array(contents));
    Ok(())
}

/// Media box of a page, following `Parent` links for inherited boxes.
fn page_media_box(doc: &Document, page_id: ObjectId) -> PortalResult<[f64; 4]> {
    let mut current = Some(page_id);
    while let Some(id) = current {
        let dict = doc
            .get_object(id)
            .and_then(|o| o.as_dict())
            .map_err(|_| PortalError::MalformedDocument("signature_page_missing_dict".into()))?;
        if let Some(media_box) = extract_media_box(doc, dict) {
            return Ok(media_box);
        }
        current = dict.get(b"Parent").and_then(|p| p.as_reference()).ok();
    }
    // Fallback to A4 if metadata is missing.
    Ok([0.0, 0.0, 595.0, 842.0])
}

fn extract_media_box(doc: &Document, dict: &Dictionary) -> Option<[f64; 4]> {
    let raw = dict.get(b"MediaBox").ok()?;
    let resolved = match raw {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    let arr = resolved.as_array().ok()?;
    if arr.len() != 4 {
        return None;
    }
    let llx = obj_to_f64(&arr[0])?;
    let lly = obj_to_f64(&arr[1])?;
    let urx = obj_to_f64(&arr[2])?;
    let ury = obj_to_f64(&arr[3])?;
    Some([llx.min(urx), lly.min(ury), llx.max(urx), lly.max(ury)])
}

fn obj_to_f64(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(f) => Some((*f).into()),
        _ => None,
    }
}

/// Owned copy of the resources that apply to the page, including ones
/// inherited from the page tree. Shared resource objects are never mutated.
fn effective_resources(doc: &Document, page_id: ObjectId) -> PortalResult<Dictionary> {
    let mut current = Some(page_id);
    while let Some(id) = current {
        let dict = doc
            .get_object(id)
            .and_then(|o| o.as_dict())
            .map_err(|_| PortalError::MalformedDocument("signature_page_missing_dict".into()))?;
        match dict.get(b"Resources") {
            Ok(Object::Dictionary(res)) => return Ok(res.clone()),
            Ok(Object::Reference(res_id)) => {
                return doc
                    .get_object(*res_id)
                    .and_then(|o| o.as_dict())
                    .map(|d| d.clone())
                    .map_err(|_| {
                        PortalError::MalformedDocument("signature_resources_missing_dict".into())
                    })
            }
            Ok(_) => {
                return Err(PortalError::MalformedDocument(
                    "signature_resources_invalid".into(),
                ))
            }
            Err(_) => {}
        }
        current = dict.get(b"Parent").and_then(|p| p.as_reference()).ok();
    }
    Ok(Dictionary::new())
}

/// Makes `key` an inline dictionary inside `res_dict`, resolving an indirect
/// one by copy, and returns it for insertion.
fn ensure_subdict<'a>(
    doc: &Document,
    res_dict: &'a mut Dictionary,
    key: &[u8],
) -> PortalResult<&'a mut Dictionary> {
    let owned = match res_dict.get(key) {
        Ok(Object::Dictionary(dict)) => dict.clone(),
        Ok(Object::Reference(id)) => doc
            .get_object(*id)
            .and_then(|o| o.as_dict())
            .map(|d| d.clone())
            .map_err(|_| PortalError::MalformedDocument("signature_resources_invalid".into()))?,
        Ok(_) => {
            return Err(PortalError::MalformedDocument(
                "signature_resources_invalid".into(),
            ))
        }
        Err(_) => Dictionary::new(),
    };
    res_dict.set(key.to_vec(), Object::Dictionary(owned));
    match res_dict.get_mut(key) {
        Ok(Object::Dictionary(dict)) => Ok(dict),
        _ => Err(PortalError::MalformedDocument("signature_resources_invalid".into())),
    }
}

fn unused_name(dict: &Dictionary, base: &str) -> String {
    if !dict.has(base.as_bytes()) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{base}{n}"))
        .find(|candidate| !dict.has(candidate.as_bytes()))
        .unwrap_or_else(|| base.to_string())
}
