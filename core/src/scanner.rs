// SPDX-License-Identifier: MIT

/// JPEG start of image marker followed by the first byte of the next marker.
pub static JPEG_SOI: &[u8; 3] = &[0xFF, 0xD8, 0xFF];

/// Find the first occurrence of a marker within a buffer.
///
/// Returns the offset of the earliest match or None if the marker is not
/// part of the buffer. The buffer is scanned in place, an empty marker
/// matches at offset zero.
pub fn find_marker(buffer: &[u8], marker: &[u8]) -> Option<usize> {
    if marker.is_empty() {
        return Some(0);
    }

    buffer
        .windows(marker.len())
        .position(|window| window == marker)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_find_marker() {
        let tests: Vec<(&[u8], &[u8], Option<usize>)> = vec![
            (&[0xFF, 0xD8, 0xFF, 0xE0], JPEG_SOI, Some(0)),
            (&[0x00, 0x00, 0xFF, 0xD8, 0xFF, 0xE1], JPEG_SOI, Some(2)),
            (&[0x00, 0xFF, 0xD8, 0x00, 0xFF, 0xD8, 0xFF], JPEG_SOI, Some(4)),
            (&[0xFF, 0xD8], JPEG_SOI, None),
            (&[], JPEG_SOI, None),
            (&[0x01, 0x02], &[], Some(0)),
        ];

        for (buffer, marker, expected) in tests {
            assert_eq!(find_marker(buffer, marker), expected);
        }
    }

    /// The earliest of several occurrences is reported, independent of the call count.
    #[test]
    fn test_earliest_match() {
        let mut buffer = vec![0u8; 0x10000];
        buffer[0x1234..0x1237].copy_from_slice(JPEG_SOI);
        buffer[0x8000..0x8003].copy_from_slice(JPEG_SOI);

        assert_eq!(find_marker(&buffer, JPEG_SOI), Some(0x1234));
        assert_eq!(find_marker(&buffer, JPEG_SOI), Some(0x1234));
    }

    /// A partial marker at the end of the buffer must not match.
    #[test]
    fn test_truncated_marker() {
        let mut buffer = vec![0u8; 64];
        buffer[62] = 0xFF;
        buffer[63] = 0xD8;

        assert_eq!(find_marker(&buffer, JPEG_SOI), None);
    }
}
