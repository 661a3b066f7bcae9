//! Container-level trimming of trailing transport garbage.
//!
//! Relay pipelines and some CDNs append padding after an image's logical
//! terminator. The perceptual hash reads the whole container, so two
//! byte-identical images with different trailing bytes would otherwise
//! produce different fingerprints. Cutting at the terminator restores a
//! canonical buffer before hashing.

const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8];
const GIF_MAGIC: &[u8] = b"GIF";

/// IEND chunk tail: 4-byte type already matched plus the 4-byte CRC.
const PNG_IEND_TAIL: usize = 8;

/// Trim everything after the container terminator of a PNG, JPEG or GIF
/// buffer.
///
/// Returns a prefix slice of the input; buffers with unknown magic or no
/// terminator come back unchanged. Never allocates.
pub fn sanitize(bytes: &[u8]) -> &[u8] {
    if bytes.starts_with(PNG_MAGIC) {
        if let Some(idx) = rfind(bytes, b"IEND") {
            let end = (idx + PNG_IEND_TAIL).min(bytes.len());
            return &bytes[..end];
        }
    } else if bytes.starts_with(JPEG_MAGIC) {
        if let Some(idx) = rfind(bytes, &[0xFF, 0xD9]) {
            return &bytes[..idx + 2];
        }
    } else if bytes.starts_with(GIF_MAGIC) {
        if let Some(idx) = bytes.iter().rposition(|&b| b == 0x3B) {
            return &bytes[..idx + 1];
        }
    }
    bytes
}

/// Index of the last occurrence of `needle` in `haystack`.
fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&i| &haystack[i..i + needle.len()] == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_with_padding(padding: usize) -> Vec<u8> {
        let mut bytes = PNG_MAGIC.to_vec();
        // zero-length IEND chunk: length + type + CRC
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(b"IEND");
        bytes.extend_from_slice(&[0xAE, 0x42, 0x60, 0x82]);
        bytes.extend(std::iter::repeat(0u8).take(padding));
        bytes
    }

    #[test]
    fn png_trailing_bytes_are_trimmed() {
        let clean = png_with_padding(0);
        let padded = png_with_padding(1024);
        assert_eq!(sanitize(&padded), clean.as_slice());
    }

    #[test]
    fn jpeg_trailing_bytes_are_trimmed() {
        let mut bytes = vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9];
        let clean = bytes.clone();
        bytes.extend_from_slice(&[0x00; 64]);
        assert_eq!(sanitize(&bytes), clean.as_slice());
    }

    #[test]
    fn jpeg_keeps_last_terminator() {
        // An embedded thumbnail may contain an earlier FF D9
        let bytes = vec![0xFF, 0xD8, 0xFF, 0xD9, 0x33, 0xFF, 0xD9, 0x00, 0x00];
        assert_eq!(sanitize(&bytes), &bytes[..7]);
    }

    #[test]
    fn gif_trailing_bytes_are_trimmed() {
        let mut bytes = b"GIF89a".to_vec();
        bytes.push(0x3B);
        let clean = bytes.clone();
        bytes.extend_from_slice(&[0x11, 0x22]);
        assert_eq!(sanitize(&bytes), clean.as_slice());
    }

    #[test]
    fn unknown_magic_is_untouched() {
        let bytes = b"RIFF....WEBP trailing".to_vec();
        let out = sanitize(&bytes);
        assert_eq!(out, bytes.as_slice());
        // Same allocation, not a copy
        assert_eq!(out.as_ptr(), bytes.as_ptr());
        assert_eq!(out.len(), bytes.len());
    }

    #[test]
    fn clean_buffer_is_returned_whole() {
        let clean = png_with_padding(0);
        let out = sanitize(&clean);
        assert_eq!(out.len(), clean.len());
        assert_eq!(out.as_ptr(), clean.as_ptr());
    }

    #[test]
    fn missing_terminator_is_untouched() {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 2, 3, 4]);
        assert_eq!(sanitize(&bytes), bytes.as_slice());
    }
}
