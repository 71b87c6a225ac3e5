//! Content-type driven response transformation.
//!
//! The upstream `content-type` is classified once into a closed
//! [`ContentKind`] and matched exhaustively; the body reaching this module
//! is always fully buffered (HTML parsing and image decoding need the
//! complete byte sequence).
use bytes::Bytes;

use crate::core::rewrite::{self, RewriteContext};

/// Closed classification of an upstream response body, derived from the
/// declared `content-type` prefix. An absent header classifies as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Image,
    Other,
}

impl ContentKind {
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.starts_with("text/html") => Self::Html,
            Some(ct) if ct.starts_with("image/") => Self::Image,
            _ => Self::Other,
        }
    }
}

/// The result of a transform: the body to send, plus a content-type
/// override when the transform changed the representation.
#[derive(Debug)]
pub struct TransformOutcome {
    pub body: Bytes,
    pub content_type_override: Option<&'static str>,
}

impl TransformOutcome {
    fn passthrough(body: Bytes) -> Self {
        Self {
            body,
            content_type_override: None,
        }
    }
}

/// Apply the transform selected by `kind` to a fully buffered body.
///
/// Transform failures are never fatal: a page that cannot be rewritten or
/// an image that cannot be decoded passes through unchanged, merely less
/// processed than intended.
pub fn apply(
    kind: ContentKind,
    body: Bytes,
    ctx: &RewriteContext,
    webp_quality: f32,
) -> TransformOutcome {
    match kind {
        ContentKind::Html => rewrite_html(body, ctx),
        ContentKind::Image => transcode_image(body, webp_quality),
        ContentKind::Other => TransformOutcome::passthrough(body),
    }
}

fn rewrite_html(body: Bytes, ctx: &RewriteContext) -> TransformOutcome {
    let html = String::from_utf8_lossy(&body);
    match rewrite::rewrite_html(&html, ctx) {
        Ok(rewritten) => TransformOutcome::passthrough(Bytes::from(rewritten)),
        Err(e) => {
            tracing::warn!(target = %ctx.target(), "HTML rewrite failed, passing body through: {e}");
            TransformOutcome::passthrough(body)
        }
    }
}

/// Re-encode any decodable raster image as lossy WebP. Decode or encode
/// failure falls back to the original bytes with the original content type.
fn transcode_image(body: Bytes, quality: f32) -> TransformOutcome {
    match try_webp_encode(&body, quality) {
        Some(webp_bytes) => TransformOutcome {
            body: Bytes::from(webp_bytes),
            content_type_override: Some("image/webp"),
        },
        None => TransformOutcome::passthrough(body),
    }
}

fn try_webp_encode(input: &[u8], quality: f32) -> Option<Vec<u8>> {
    let decoded = match image::load_from_memory(input) {
        Ok(img) => img,
        Err(e) => {
            tracing::warn!("image decode failed, passing original bytes through: {e}");
            return None;
        }
    };

    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let encoder = webp::Encoder::from_rgba(rgba.as_raw(), width, height);
    Some(encoder.encode(quality).to_vec())
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;

    fn ctx() -> RewriteContext {
        RewriteContext::new(
            "http://gateway.test",
            Url::parse("https://example.org/index.html").unwrap(),
        )
    }

    #[test]
    fn classifies_content_types_by_prefix() {
        assert_eq!(
            ContentKind::from_content_type(Some("text/html; charset=utf-8")),
            ContentKind::Html
        );
        assert_eq!(
            ContentKind::from_content_type(Some("image/png")),
            ContentKind::Image
        );
        assert_eq!(
            ContentKind::from_content_type(Some("application/json")),
            ContentKind::Other
        );
        assert_eq!(ContentKind::from_content_type(None), ContentKind::Other);
    }

    #[test]
    fn html_transform_injects_and_rewrites() {
        let body = Bytes::from_static(
            b"<html><head></head><body><a href=\"/x\">x</a></body></html>",
        );
        let outcome = apply(ContentKind::Html, body, &ctx(), 75.0);

        let text = String::from_utf8(outcome.body.to_vec()).unwrap();
        let base = text.find("<base href=\"http://gateway.test\">").unwrap();
        let favicon = text.find("favicons?domain=example.org").unwrap();
        let anchor = text
            .find("href=\"http://gateway.test/https://example.org/x\"")
            .unwrap();
        assert!(base < favicon && favicon < anchor);
        assert!(outcome.content_type_override.is_none());
    }

    #[test]
    fn corrupt_image_passes_through_unchanged() {
        let garbage = Bytes::from_static(b"definitely not an image");
        let outcome = apply(ContentKind::Image, garbage.clone(), &ctx(), 75.0);

        assert_eq!(outcome.body, garbage);
        assert!(outcome.content_type_override.is_none());
    }

    #[test]
    fn valid_image_transcodes_to_webp() {
        // A 2x2 PNG generated in-memory.
        let mut png = Vec::new();
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 0, 0, 255]));
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let outcome = apply(ContentKind::Image, Bytes::from(png), &ctx(), 75.0);
        assert_eq!(outcome.content_type_override, Some("image/webp"));
        // RIFF....WEBP container magic.
        assert_eq!(&outcome.body[0..4], b"RIFF");
        assert_eq!(&outcome.body[8..12], b"WEBP");
    }

    #[test]
    fn other_content_passes_through() {
        let body = Bytes::from_static(b"{\"key\": true}");
        let outcome = apply(ContentKind::Other, body.clone(), &ctx(), 75.0);
        assert_eq!(outcome.body, body);
        assert!(outcome.content_type_override.is_none());
    }
}
