//! Media validation for post composition
//!
//! Re-derives the kind of an upload from authoritative signals (content-type
//! header, then file extension, then magic bytes) instead of trusting the
//! client's declared kind, and enforces the platform's composition and size
//! rules before any bytes are exchanged with the platform. Purely functional:
//! no IO happens here.

use std::env;

use crate::constants::{DEFAULT_VIDEO_MAX_MB, GIF_MAX_BYTES, IMAGE_MAX_BYTES, MAX_IMAGES_PER_POST};

/// Media kind as the platform distinguishes them for composition rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Gif,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Gif => "gif",
            MediaKind::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(MediaKind::Image),
            "gif" => Some(MediaKind::Gif),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An upload that passed classification and size checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedMedia {
    pub kind: MediaKind,
    pub mime: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaValidationError {
    /// File exceeds the size ceiling for its confirmed kind
    Oversize {
        kind: MediaKind,
        size: usize,
        limit: usize,
    },
    /// Declared a postable format but the bytes are provably a different,
    /// unpostable one
    FormatMismatch {
        declared: String,
        detected: String,
    },
    /// Adding this asset would break the image/video mixing rules
    CompositionViolation(String),
    /// No recognizable media signature in the bytes
    CorruptHeader,
    /// Declared type is not postable
    UnsupportedType(String),
}

impl std::fmt::Display for MediaValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaValidationError::Oversize { kind, size, limit } => write!(
                f,
                "{} of {} bytes exceeds the {} byte limit",
                kind, size, limit
            ),
            MediaValidationError::FormatMismatch { declared, detected } => {
                write!(f, "declared {} but file contents are {}", declared, detected)
            }
            MediaValidationError::CompositionViolation(msg) => write!(f, "{}", msg),
            MediaValidationError::CorruptHeader => {
                write!(f, "file contents do not match any supported media format")
            }
            MediaValidationError::UnsupportedType(t) => {
                write!(f, "unsupported media type: {}", t)
            }
        }
    }
}

impl std::error::Error for MediaValidationError {}

/// Size ceiling for video uploads. Platform limits change, so this is
/// configuration rather than a fixed constant.
pub fn video_max_bytes() -> usize {
    env::var("VIDEO_MAX_UPLOAD_MB")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_VIDEO_MAX_MB)
        * 1024
        * 1024
}

fn max_bytes_for(kind: MediaKind) -> usize {
    match kind {
        MediaKind::Image => IMAGE_MAX_BYTES,
        MediaKind::Gif => GIF_MAX_BYTES,
        MediaKind::Video => video_max_bytes(),
    }
}

/// Check that adding `incoming` to the current attachment set keeps the set
/// postable: 1-4 images, or exactly one video/gif, never mixed.
pub fn validate_composition(
    existing: &[MediaKind],
    incoming: MediaKind,
) -> Result<(), MediaValidationError> {
    let image_count = existing
        .iter()
        .filter(|k| **k == MediaKind::Image)
        .count();
    let has_video_or_gif = existing
        .iter()
        .any(|k| matches!(k, MediaKind::Gif | MediaKind::Video));

    match incoming {
        MediaKind::Image => {
            if has_video_or_gif {
                return Err(MediaValidationError::CompositionViolation(
                    "images cannot be combined with a video or gif".to_string(),
                ));
            }
            if image_count >= MAX_IMAGES_PER_POST {
                return Err(MediaValidationError::CompositionViolation(format!(
                    "a post can carry at most {} images",
                    MAX_IMAGES_PER_POST
                )));
            }
        }
        MediaKind::Gif | MediaKind::Video => {
            if !existing.is_empty() {
                return Err(MediaValidationError::CompositionViolation(
                    "a video or gif must be the only attachment".to_string(),
                ));
            }
        }
    }

    Ok(())
}

/// Classify an upload and enforce the size ceiling for the confirmed kind.
///
/// Fallback chain for the declared side: content-type header first, file
/// extension second. Magic-byte sniffing always runs and, when conclusive,
/// overrides a contradicting declaration, so a mislabeled upload cannot reach
/// the platform under the wrong processing path.
pub fn classify_and_validate(
    bytes: &[u8],
    declared_mime: Option<&str>,
    file_name: Option<&str>,
) -> Result<ConfirmedMedia, MediaValidationError> {
    let declared = declared_mime
        .and_then(kind_for_mime)
        .or_else(|| file_name.and_then(kind_for_extension));

    let confirmed = match sniff(bytes) {
        Sniffed::Supported(kind, mime) => ConfirmedMedia { kind, mime },
        Sniffed::Unsupported(detected) => {
            return Err(match declared {
                Some((_, declared_mime)) => MediaValidationError::FormatMismatch {
                    declared: declared_mime.to_string(),
                    detected: detected.to_string(),
                },
                None => MediaValidationError::UnsupportedType(detected.to_string()),
            });
        }
        Sniffed::Unknown => {
            // Every postable format carries a mandatory signature, so a
            // declared-but-unsniffable file is corrupt, and an unsupported
            // declaration stays unsupported.
            return Err(match (declared, declared_mime) {
                (Some(_), _) => MediaValidationError::CorruptHeader,
                (None, Some(mime)) => MediaValidationError::UnsupportedType(mime.to_string()),
                (None, None) => MediaValidationError::CorruptHeader,
            });
        }
    };

    let limit = max_bytes_for(confirmed.kind);
    if bytes.len() > limit {
        return Err(MediaValidationError::Oversize {
            kind: confirmed.kind,
            size: bytes.len(),
            limit,
        });
    }

    Ok(confirmed)
}

fn kind_for_mime(mime: &str) -> Option<(MediaKind, &'static str)> {
    match mime {
        "image/png" => Some((MediaKind::Image, "image/png")),
        "image/jpeg" | "image/jpg" => Some((MediaKind::Image, "image/jpeg")),
        "image/webp" => Some((MediaKind::Image, "image/webp")),
        "image/gif" => Some((MediaKind::Gif, "image/gif")),
        "video/mp4" => Some((MediaKind::Video, "video/mp4")),
        "video/webm" => Some((MediaKind::Video, "video/webm")),
        "video/quicktime" => Some((MediaKind::Video, "video/quicktime")),
        _ => None,
    }
}

fn kind_for_extension(name: &str) -> Option<(MediaKind, &'static str)> {
    let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some((MediaKind::Image, "image/png")),
        "jpg" | "jpeg" => Some((MediaKind::Image, "image/jpeg")),
        "webp" => Some((MediaKind::Image, "image/webp")),
        "gif" => Some((MediaKind::Gif, "image/gif")),
        "mp4" => Some((MediaKind::Video, "video/mp4")),
        "webm" => Some((MediaKind::Video, "video/webm")),
        "mov" => Some((MediaKind::Video, "video/quicktime")),
        _ => None,
    }
}

enum Sniffed {
    Supported(MediaKind, &'static str),
    Unsupported(&'static str),
    Unknown,
}

/// Identify the real format from the leading bytes of the file
fn sniff(bytes: &[u8]) -> Sniffed {
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Sniffed::Supported(MediaKind::Gif, "image/gif");
    }

    // ISO base media container: 4-byte size then "ftyp" and a major brand
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        let brand = &bytes[8..12];
        if brand.starts_with(b"qt") {
            return Sniffed::Supported(MediaKind::Video, "video/quicktime");
        }
        if matches!(brand, b"avif" | b"avis" | b"heic" | b"heix" | b"mif1") {
            return Sniffed::Unsupported("image/avif");
        }
        return Sniffed::Supported(MediaKind::Video, "video/mp4");
    }

    // EBML header (WebM / Matroska)
    if bytes.starts_with(&[0x1a, 0x45, 0xdf, 0xa3]) {
        return Sniffed::Supported(MediaKind::Video, "video/webm");
    }

    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => Sniffed::Supported(MediaKind::Image, "image/png"),
        Ok(image::ImageFormat::Jpeg) => Sniffed::Supported(MediaKind::Image, "image/jpeg"),
        Ok(image::ImageFormat::WebP) => Sniffed::Supported(MediaKind::Image, "image/webp"),
        Ok(image::ImageFormat::Gif) => Sniffed::Supported(MediaKind::Gif, "image/gif"),
        Ok(fmt) => Sniffed::Unsupported(image_mime(fmt)),
        Err(_) => Sniffed::Unknown,
    }
}

fn image_mime(fmt: image::ImageFormat) -> &'static str {
    match fmt {
        image::ImageFormat::Bmp => "image/bmp",
        image::ImageFormat::Tiff => "image/tiff",
        image::ImageFormat::Ico => "image/x-icon",
        image::ImageFormat::Avif => "image/avif",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    const JPEG_HEADER: &[u8] = &[0xff, 0xd8, 0xff, 0xe0];

    fn mp4_header() -> Vec<u8> {
        let mut bytes = vec![0x00, 0x00, 0x00, 0x18];
        bytes.extend_from_slice(b"ftypisom");
        bytes.extend_from_slice(&[0u8; 8]);
        bytes
    }

    fn mov_header() -> Vec<u8> {
        let mut bytes = vec![0x00, 0x00, 0x00, 0x14];
        bytes.extend_from_slice(b"ftypqt  ");
        bytes.extend_from_slice(&[0u8; 8]);
        bytes
    }

    #[test]
    fn test_classify_png() {
        let confirmed =
            classify_and_validate(PNG_HEADER, Some("image/png"), Some("shot.png")).unwrap();
        assert_eq!(confirmed.kind, MediaKind::Image);
        assert_eq!(confirmed.mime, "image/png");
    }

    #[test]
    fn test_classify_jpeg_without_declared_mime() {
        let confirmed = classify_and_validate(JPEG_HEADER, None, Some("photo.JPG")).unwrap();
        assert_eq!(confirmed.kind, MediaKind::Image);
        assert_eq!(confirmed.mime, "image/jpeg");
    }

    #[test]
    fn test_gif_magic_bytes_override_declared_image() {
        // Declared as a png image, bytes say animated gif: the sniff wins
        let mut bytes = b"GIF89a".to_vec();
        bytes.extend_from_slice(&[0u8; 32]);
        let confirmed =
            classify_and_validate(&bytes, Some("image/png"), Some("anim.png")).unwrap();
        assert_eq!(confirmed.kind, MediaKind::Gif);
        assert_eq!(confirmed.mime, "image/gif");
    }

    #[test]
    fn test_classify_mp4_by_ftyp_box() {
        let confirmed = classify_and_validate(&mp4_header(), None, None).unwrap();
        assert_eq!(confirmed.kind, MediaKind::Video);
        assert_eq!(confirmed.mime, "video/mp4");
    }

    #[test]
    fn test_classify_quicktime_brand() {
        let confirmed = classify_and_validate(&mov_header(), Some("video/mp4"), None).unwrap();
        assert_eq!(confirmed.kind, MediaKind::Video);
        assert_eq!(confirmed.mime, "video/quicktime");
    }

    #[test]
    fn test_classify_webm_ebml_header() {
        let mut bytes = vec![0x1a, 0x45, 0xdf, 0xa3];
        bytes.extend_from_slice(&[0u8; 16]);
        let confirmed = classify_and_validate(&bytes, None, Some("clip.webm")).unwrap();
        assert_eq!(confirmed.kind, MediaKind::Video);
        assert_eq!(confirmed.mime, "video/webm");
    }

    #[test]
    fn test_garbage_with_png_claim_is_corrupt_header() {
        let err = classify_and_validate(&[0u8; 64], Some("image/png"), Some("x.png")).unwrap_err();
        assert_eq!(err, MediaValidationError::CorruptHeader);

        // Extension alone is enough of a claim
        let err = classify_and_validate(&[0u8; 64], None, Some("x.png")).unwrap_err();
        assert_eq!(err, MediaValidationError::CorruptHeader);
    }

    #[test]
    fn test_garbage_without_claim_is_corrupt_header() {
        let err = classify_and_validate(&[7u8; 64], None, None).unwrap_err();
        assert_eq!(err, MediaValidationError::CorruptHeader);
    }

    #[test]
    fn test_bmp_with_png_claim_is_format_mismatch() {
        let mut bytes = b"BM".to_vec();
        bytes.extend_from_slice(&[0u8; 32]);
        let err = classify_and_validate(&bytes, Some("image/png"), None).unwrap_err();
        assert_eq!(
            err,
            MediaValidationError::FormatMismatch {
                declared: "image/png".to_string(),
                detected: "image/bmp".to_string(),
            }
        );
    }

    #[test]
    fn test_undeclared_bmp_is_unsupported() {
        let mut bytes = b"BM".to_vec();
        bytes.extend_from_slice(&[0u8; 32]);
        let err = classify_and_validate(&bytes, None, None).unwrap_err();
        assert_eq!(
            err,
            MediaValidationError::UnsupportedType("image/bmp".to_string())
        );
    }

    #[test]
    fn test_declared_pdf_is_unsupported() {
        let err =
            classify_and_validate(&[0u8; 64], Some("application/pdf"), None).unwrap_err();
        assert_eq!(
            err,
            MediaValidationError::UnsupportedType("application/pdf".to_string())
        );
    }

    #[test]
    fn test_image_size_ceiling() {
        let mut bytes = PNG_HEADER.to_vec();
        bytes.resize(IMAGE_MAX_BYTES + 1, 0);
        let err = classify_and_validate(&bytes, Some("image/png"), None).unwrap_err();
        assert_eq!(
            err,
            MediaValidationError::Oversize {
                kind: MediaKind::Image,
                size: IMAGE_MAX_BYTES + 1,
                limit: IMAGE_MAX_BYTES,
            }
        );
    }

    #[test]
    fn test_gif_size_ceiling() {
        let mut bytes = b"GIF89a".to_vec();
        bytes.resize(GIF_MAX_BYTES + 1, 0);
        let err = classify_and_validate(&bytes, Some("image/gif"), None).unwrap_err();
        assert!(matches!(
            err,
            MediaValidationError::Oversize {
                kind: MediaKind::Gif,
                ..
            }
        ));
    }

    #[test]
    fn test_image_at_ceiling_is_accepted() {
        let mut bytes = PNG_HEADER.to_vec();
        bytes.resize(IMAGE_MAX_BYTES, 0);
        assert!(classify_and_validate(&bytes, Some("image/png"), None).is_ok());
    }

    #[test]
    fn test_composition_allows_up_to_four_images() {
        let mut set = Vec::new();
        for _ in 0..4 {
            validate_composition(&set, MediaKind::Image).unwrap();
            set.push(MediaKind::Image);
        }
        assert!(validate_composition(&set, MediaKind::Image).is_err());
    }

    #[test]
    fn test_composition_video_must_be_sole_attachment() {
        assert!(validate_composition(&[], MediaKind::Video).is_ok());
        assert!(validate_composition(&[MediaKind::Image], MediaKind::Video).is_err());
        assert!(validate_composition(&[MediaKind::Video], MediaKind::Video).is_err());
        assert!(validate_composition(&[MediaKind::Gif], MediaKind::Video).is_err());
    }

    #[test]
    fn test_composition_rejects_image_after_video_or_gif() {
        assert!(validate_composition(&[MediaKind::Video], MediaKind::Image).is_err());
        assert!(validate_composition(&[MediaKind::Gif], MediaKind::Image).is_err());
    }

    #[test]
    fn test_composition_rejects_second_gif() {
        assert!(validate_composition(&[MediaKind::Gif], MediaKind::Gif).is_err());
    }

    #[test]
    fn test_composition_invariant_over_all_add_sequences() {
        // Exhaustively apply every add sequence of length 6, accepting only
        // adds the gate allows, and check the set never leaves a legal state.
        let kinds = [MediaKind::Image, MediaKind::Gif, MediaKind::Video];
        for seq in 0..3usize.pow(6) {
            let mut set: Vec<MediaKind> = Vec::new();
            let mut n = seq;
            for _ in 0..6 {
                let incoming = kinds[n % 3];
                n /= 3;
                if validate_composition(&set, incoming).is_ok() {
                    set.push(incoming);
                }
            }

            let images = set.iter().filter(|k| **k == MediaKind::Image).count();
            let non_images = set.len() - images;
            assert!(images <= MAX_IMAGES_PER_POST);
            assert!(non_images <= 1);
            assert!(!(images > 0 && non_images > 0));
        }
    }
}
