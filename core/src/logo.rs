// SPDX-License-Identifier: MIT
use anyhow::Result;

use crate::{
    error::ImageError,
    partitions::LOGO_PARTITION_SIZE,
    scanner::{find_marker, JPEG_SOI},
};

/// JPEG image to be written into a fixed size logo partition.
#[derive(Clone, Debug, PartialEq)]
pub struct LogoPayload {
    pub source_bytes: Vec<u8>,
    pub target_size: usize,
}

impl LogoPayload {
    /// Create a payload for a logo partition of the device.
    pub fn new(source_bytes: Vec<u8>) -> Self {
        Self {
            source_bytes,
            target_size: LOGO_PARTITION_SIZE,
        }
    }

    /// Returns the zero padded partition image.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_logo(&self.source_bytes, self.target_size)
    }
}

/// Zero pad a logo to exactly the size of its partition.
///
/// # Error
///
/// Returns `ImageError::PayloadTooLarge` if the logo does not fit. The
/// logo is never truncated.
pub fn encode_logo(source_bytes: &[u8], target_size: usize) -> Result<Vec<u8>> {
    if source_bytes.len() > target_size {
        return Err(ImageError::PayloadTooLarge {
            actual: source_bytes.len(),
            capacity: target_size,
        }
        .into());
    }

    let mut padded = Vec::with_capacity(target_size);
    padded.extend_from_slice(source_bytes);
    padded.resize(target_size, 0x00);

    Ok(padded)
}

/// Locate the JPEG stored within a raw logo partition dump.
///
/// The JPEG runs from its start of image marker up to the end of the
/// dump, the trailing padding is kept as image viewers ignore it.
///
/// # Error
///
/// Returns `ImageError::MarkerNotFound` if the dump holds no JPEG.
pub fn jpeg_payload(raw: &[u8]) -> Result<&[u8], ImageError> {
    find_marker(raw, JPEG_SOI)
        .map(|offset| &raw[offset..])
        .ok_or(ImageError::MarkerNotFound)
}

/// Content recovered from a logo partition dump.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LogoExtraction<'a> {
    /// JPEG data from the start of image marker to the end of the dump
    Jpeg(&'a [u8]),
    /// The whole dump, no JPEG could be found
    Raw(&'a [u8]),
}

/// Recover the logo stored within a raw partition dump.
///
/// A dump without JPEG is returned as is, so it can be kept for analysis.
pub fn extract_logo(raw: &[u8]) -> LogoExtraction<'_> {
    match jpeg_payload(raw) {
        Ok(payload) => LogoExtraction::Jpeg(payload),
        Err(err) => {
            log::warn!("{err}");
            LogoExtraction::Raw(raw)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn jpeg(len: usize) -> Vec<u8> {
        let mut bytes = vec![0x5A; len];
        bytes[..4].copy_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
        bytes
    }

    #[test]
    fn test_encode_logo() {
        for len in [4, 1000, 131071, 131072] {
            let source = jpeg(len);
            let padded = encode_logo(&source, LOGO_PARTITION_SIZE).unwrap();

            assert_eq!(padded.len(), 131072);
            assert_eq!(&padded[..len], source.as_slice());
            assert!(padded[len..].iter().all(|&b| b == 0x00));
        }
    }

    #[test]
    fn test_encode_empty_logo() {
        let padded = LogoPayload::new(Vec::new()).encode().unwrap();

        assert_eq!(padded, vec![0x00; 131072]);
    }

    #[test]
    fn test_encode_logo_too_large() {
        let err = LogoPayload::new(jpeg(131073)).encode().unwrap_err();

        match err.downcast_ref::<ImageError>() {
            Some(ImageError::PayloadTooLarge { actual, capacity }) => {
                assert_eq!(*actual, 131073);
                assert_eq!(*capacity, 131072);
            }
            other => panic!("Unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_jpeg_payload() {
        let mut raw = vec![0x00; 16];
        raw.extend(jpeg(8));
        raw.extend(vec![0x00; 8]);

        let payload = jpeg_payload(&raw).unwrap();

        assert_eq!(payload.len(), 16);
        assert_eq!(&payload[..3], JPEG_SOI);
    }

    #[test]
    fn test_jpeg_payload_missing() {
        assert!(matches!(
            jpeg_payload(&[0x00; 64]),
            Err(ImageError::MarkerNotFound)
        ));
    }

    #[test]
    fn test_extract_logo() {
        let mut raw = vec![0x00; 4];
        raw.extend(jpeg(4));

        assert_eq!(extract_logo(&raw), LogoExtraction::Jpeg(&raw[4..]));
        assert_eq!(extract_logo(&raw[..4]), LogoExtraction::Raw(&raw[..4]));
    }
}
