//! Image format sniffing by file-header magic numbers.

/// Formats the extractor accepts as real images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
}

impl ImageFormat {
    pub fn mime(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Gif => "image/gif",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Webp => "webp",
            ImageFormat::Gif => "gif",
        }
    }
}

/// Shortest buffer we are willing to call an image.
const MIN_IMAGE_LEN: usize = 8;

pub fn sniff_image_format(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.len() < MIN_IMAGE_LEN {
        return None;
    }
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => Some(ImageFormat::Png),
        [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(ImageFormat::Webp),
        [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(ImageFormat::Gif),
        _ => None,
    }
}

pub fn is_valid_image(bytes: &[u8]) -> bool {
    sniff_image_format(bytes).is_some()
}

/// MIME type used when re-encoding reference images into provider requests.
pub fn detect_image_mime(bytes: &[u8]) -> &'static str {
    match sniff_image_format(bytes) {
        Some(format) => format.mime(),
        None => {
            tracing::warn!(
                "Unrecognized image format (first 4 bytes: {:02X?}), falling back to image/jpeg",
                &bytes[..bytes.len().min(4)]
            );
            "image/jpeg"
        }
    }
}
