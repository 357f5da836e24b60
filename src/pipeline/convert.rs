//! Conversion: scanned TIFF → temporary PDF.
//!
//! ## Why PDF?
//!
//! Every recognition backend we talk to accepts PDF uploads, while TIFF
//! support (especially multi-page and bilevel fax encodings) is patchy. One
//! PDF per source file also gives the notification a single artefact to refer
//! to regardless of how many pages were scanned.
//!
//! ## Page encoding
//!
//! Fax gateways write bilevel CCITT Group 4 frames; the decoder expands
//! those to 1-bit rows (white = 1 after `WhiteIsZero` is applied), which
//! `unpack_bilevel` turns into 8-bit gray like any other scan.
//!
//! Each TIFF frame is flattened to 8-bit gray or RGB and embedded as a
//! baseline JPEG (`/DCTDecode`), so the PDF needs no further compression and
//! page images can be recovered byte-for-byte by backends that want images
//! (see [`crate::pipeline::extract::pages`]). All per-page work happens in
//! memory; nothing but the final PDF touches the temp directory.

use crate::error::{ConversionError, IngestError};
use crate::output::ConvertedDocument;
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayAlphaImage, GrayImage, ImageBuffer, Luma, Rgb, RgbImage, RgbaImage};
use lopdf::{dictionary, Document, Object, Stream};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult};
use tracing::{debug, info};

/// Resolution assumed when mapping pixels to PDF points.
///
/// Fax and office scanners overwhelmingly emit 200 dpi; the value only affects
/// the physical page size shown by viewers, not OCR input.
pub const ASSUMED_DPI: u32 = 200;

const JPEG_QUALITY: u8 = 85;

/// Turns a raw scanned image into a PDF on disk.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(&self, source: &Path) -> Result<ConvertedDocument, ConversionError>;
}

/// TIFF (single- or multi-frame) to PDF converter writing into a temp directory.
#[derive(Debug, Clone)]
pub struct TiffPdfConverter {
    temp_dir: PathBuf,
}

impl TiffPdfConverter {
    /// Creates `temp_dir` if needed.
    pub fn new(temp_dir: impl Into<PathBuf>) -> Result<Self, IngestError> {
        let temp_dir = temp_dir.into();
        std::fs::create_dir_all(&temp_dir).map_err(|e| IngestError::Io {
            path: temp_dir.clone(),
            source: e,
        })?;
        Ok(Self { temp_dir })
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }
}

#[async_trait]
impl DocumentConverter for TiffPdfConverter {
    async fn convert(&self, source: &Path) -> Result<ConvertedDocument, ConversionError> {
        info!(file = %source.display(), "Converting TIFF to PDF");
        let source = source.to_path_buf();
        let temp_dir = self.temp_dir.clone();
        tokio::task::spawn_blocking(move || convert_blocking(&source, &temp_dir))
            .await
            .map_err(|e| ConversionError::Task(e.to_string()))?
    }
}

/// Blocking implementation of the conversion.
pub fn convert_blocking(
    source: &Path,
    temp_dir: &Path,
) -> Result<ConvertedDocument, ConversionError> {
    if !source.exists() {
        return Err(ConversionError::SourceMissing {
            path: source.to_path_buf(),
        });
    }

    let frames = decode_frames(source)?;
    if frames.is_empty() {
        return Err(ConversionError::NoPages {
            path: source.to_path_buf(),
        });
    }
    let page_count = frames.len();

    let pages = frames
        .into_iter()
        .enumerate()
        .map(|(idx, frame)| encode_page(idx + 1, frame))
        .collect::<Result<Vec<_>, _>>()?;

    let pdf = build_pdf(&pages)?;
    let path = write_temp_pdf(source, temp_dir, &pdf)?;

    if page_count > 1 {
        info!(
            "Converted multi-page TIFF ({} pages) to PDF: {}",
            page_count,
            path.display()
        );
    } else {
        info!("Converted single-page TIFF to PDF: {}", path.display());
    }

    Ok(ConvertedDocument {
        path,
        source: source.to_path_buf(),
        page_count,
    })
}

// ── Decoding ─────────────────────────────────────────────────────────────────

/// Decode every frame of a TIFF file.
// TODO: tiff only wires up Group 4; decode Group 3 (T.4) strips through the
// `fax` crate so HylaFAX-style inboxes convert too.
fn decode_frames(source: &Path) -> Result<Vec<DynamicImage>, ConversionError> {
    let decode_err = |detail: String| ConversionError::Decode {
        path: source.to_path_buf(),
        detail,
    };

    let file = File::open(source).map_err(|e| decode_err(e.to_string()))?;
    let mut decoder = Decoder::new(BufReader::new(file)).map_err(|e| decode_err(e.to_string()))?;

    let mut frames = Vec::new();
    loop {
        let (width, height) = decoder.dimensions().map_err(|e| decode_err(e.to_string()))?;
        let color = decoder.colortype().map_err(|e| decode_err(e.to_string()))?;
        let samples = decoder.read_image().map_err(|e| decode_err(e.to_string()))?;
        debug!("Decoded frame {} → {}x{} {:?}", frames.len() + 1, width, height, color);
        frames.push(frame_to_image(source, width, height, color, samples)?);

        if !decoder.more_images() {
            break;
        }
        decoder.next_image().map_err(|e| decode_err(e.to_string()))?;
    }
    Ok(frames)
}

fn frame_to_image(
    source: &Path,
    width: u32,
    height: u32,
    color: tiff::ColorType,
    samples: DecodingResult,
) -> Result<DynamicImage, ConversionError> {
    use tiff::ColorType as T;

    let label = format!("{color:?}");
    let image = match (color, samples) {
        (T::Gray(8), DecodingResult::U8(buf)) => {
            GrayImage::from_raw(width, height, buf).map(DynamicImage::ImageLuma8)
        }
        (T::Gray(1), DecodingResult::U8(buf)) => {
            GrayImage::from_raw(width, height, unpack_bilevel(&buf, width, height))
                .map(DynamicImage::ImageLuma8)
        }
        (T::GrayA(8), DecodingResult::U8(buf)) => {
            GrayAlphaImage::from_raw(width, height, buf).map(DynamicImage::ImageLumaA8)
        }
        (T::RGB(8), DecodingResult::U8(buf)) => {
            RgbImage::from_raw(width, height, buf).map(DynamicImage::ImageRgb8)
        }
        (T::RGBA(8), DecodingResult::U8(buf)) => {
            RgbaImage::from_raw(width, height, buf).map(DynamicImage::ImageRgba8)
        }
        (T::Gray(16), DecodingResult::U16(buf)) => {
            ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(width, height, buf)
                .map(DynamicImage::ImageLuma16)
        }
        (T::RGB(16), DecodingResult::U16(buf)) => {
            ImageBuffer::<Rgb<u16>, Vec<u16>>::from_raw(width, height, buf)
                .map(DynamicImage::ImageRgb16)
        }
        _ => {
            return Err(ConversionError::UnsupportedColor {
                path: source.to_path_buf(),
                color: label,
            })
        }
    };

    image.ok_or_else(|| ConversionError::Decode {
        path: source.to_path_buf(),
        detail: format!("{label} sample buffer does not match {width}x{height}"),
    })
}

/// Expand 1-bit samples (rows padded to a whole byte) to 8-bit gray.
fn unpack_bilevel(packed: &[u8], width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let row_bytes = w.div_ceil(8);
    let mut out = Vec::with_capacity(w * h);
    for y in 0..h {
        for x in 0..w {
            let byte = packed.get(y * row_bytes + x / 8).copied().unwrap_or(0);
            let bit = (byte >> (7 - (x % 8))) & 1;
            out.push(if bit == 1 { 255 } else { 0 });
        }
    }
    out
}

// ── Encoding ─────────────────────────────────────────────────────────────────

struct EncodedPage {
    width: u32,
    height: u32,
    color_space: &'static str,
    jpeg: Vec<u8>,
}

impl EncodedPage {
    fn size_points(&self) -> (i64, i64) {
        let to_pt = |px: u32| ((px as i64 * 72) / ASSUMED_DPI as i64).max(1);
        (to_pt(self.width), to_pt(self.height))
    }
}

/// JPEG can carry neither alpha nor 16-bit samples, so flatten first.
fn encode_page(page: usize, frame: DynamicImage) -> Result<EncodedPage, ConversionError> {
    let encode_err = |e: image::ImageError| ConversionError::Encode {
        page,
        detail: e.to_string(),
    };

    let mut jpeg = Vec::new();
    let (width, height) = (frame.width(), frame.height());
    let color_space = if frame.color().has_color() {
        let rgb = frame.to_rgb8();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
            .encode_image(&rgb)
            .map_err(encode_err)?;
        "DeviceRGB"
    } else {
        let gray = frame.to_luma8();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
            .encode_image(&gray)
            .map_err(encode_err)?;
        "DeviceGray"
    };
    debug!("Encoded page {} → {} bytes JPEG", page, jpeg.len());

    Ok(EncodedPage {
        width,
        height,
        color_space,
        jpeg,
    })
}

/// Assemble one page per image, each image scaled to fill its page.
fn build_pdf(pages: &[EncodedPage]) -> Result<Vec<u8>, ConversionError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::with_capacity(pages.len());

    for page in pages {
        let (w, h) = page.size_points();
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => Object::Integer(page.width as i64),
                "Height" => Object::Integer(page.height as i64),
                "ColorSpace" => page.color_space,
                "BitsPerComponent" => Object::Integer(8),
                "Filter" => "DCTDecode",
            },
            page.jpeg.clone(),
        ));
        let content = format!("q {w} 0 0 {h} 0 0 cm /Im0 Do Q");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(w),
                Object::Integer(h),
            ],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(count),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).map_err(|e| ConversionError::Encode {
        page: 0,
        detail: format!("PDF serialisation failed: {e}"),
    })?;
    Ok(out)
}

/// Write under a unique name so two sources with the same stem never collide.
fn write_temp_pdf(source: &Path, temp_dir: &Path, pdf: &[u8]) -> Result<PathBuf, ConversionError> {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    let write_err = |detail: String| ConversionError::Write {
        path: temp_dir.join(format!("{stem}.pdf")),
        detail,
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!("{stem}-"))
        .suffix(".pdf")
        .tempfile_in(temp_dir)
        .map_err(|e| write_err(e.to_string()))?;
    tmp.write_all(pdf).map_err(|e| write_err(e.to_string()))?;
    let (_file, path) = tmp.keep().map_err(|e| write_err(e.to_string()))?;
    Ok(path)
}

// ── Structural validity ──────────────────────────────────────────────────────

/// A converted document must exist, be non-empty and start with `%PDF`.
pub async fn validate_document(path: &Path) -> Result<(), ConversionError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || validate_document_blocking(&path))
        .await
        .map_err(|e| ConversionError::Task(e.to_string()))?
}

fn validate_document_blocking(path: &Path) -> Result<(), ConversionError> {
    let meta = std::fs::metadata(path).map_err(|_| ConversionError::OutputMissing {
        path: path.to_path_buf(),
    })?;
    if meta.len() == 0 {
        return Err(ConversionError::EmptyOutput {
            path: path.to_path_buf(),
        });
    }

    let mut magic = Vec::with_capacity(4);
    File::open(path)
        .and_then(|f| f.take(4).read_to_end(&mut magic))
        .map_err(|_| ConversionError::OutputMissing {
            path: path.to_path_buf(),
        })?;
    if magic != b"%PDF" {
        return Err(ConversionError::BadMagic {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// Delete a converted document. Failures are logged, never returned.
pub async fn cleanup_document(document: &ConvertedDocument) {
    match tokio::fs::remove_file(&document.path).await {
        Ok(()) => debug!("Cleaned up PDF file: {}", document.path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Could not cleanup PDF file {}: {}", document.path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpack_bilevel_respects_row_padding() {
        // 10 px wide → 2 bytes per row.
        let packed = [0b1000_0000, 0b0100_0000, 0b0000_0001, 0b0000_0000];
        let out = unpack_bilevel(&packed, 10, 2);
        assert_eq!(out.len(), 20);
        assert_eq!(out[0], 255);
        assert_eq!(out[9], 255);
        assert_eq!(out[1], 0);
        assert_eq!(out[10 + 7], 255);
        assert_eq!(out[10 + 8], 0);
    }

    #[test]
    fn page_size_is_scaled_to_points() {
        let page = EncodedPage {
            width: 1700,
            height: 2200,
            color_space: "DeviceGray",
            jpeg: Vec::new(),
        };
        assert_eq!(page.size_points(), (612, 792));
    }

    #[tokio::test]
    async fn zero_byte_document_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.pdf");
        std::fs::write(&p, b"").unwrap();
        assert!(matches!(
            validate_document(&p).await,
            Err(ConversionError::EmptyOutput { .. })
        ));
    }

    #[tokio::test]
    async fn wrong_magic_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.pdf");
        std::fs::write(&p, b"GIF89a").unwrap();
        match validate_document(&p).await {
            Err(ConversionError::BadMagic { magic, .. }) => assert_eq!(magic, b"GIF8"),
            other => panic!("expected BadMagic, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn short_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.pdf");
        std::fs::write(&p, b"%P").unwrap();
        assert!(matches!(
            validate_document(&p).await,
            Err(ConversionError::BadMagic { .. })
        ));
    }

    #[tokio::test]
    async fn missing_document_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            validate_document(&dir.path().join("none.pdf")).await,
            Err(ConversionError::OutputMissing { .. })
        ));
    }

    #[tokio::test]
    async fn pdf_header_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.pdf");
        std::fs::write(&p, b"%PDF-1.5\n%%EOF\n").unwrap();
        assert!(validate_document(&p).await.is_ok());
    }
}
