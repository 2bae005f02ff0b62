//! In-place byte decimation applied to every decoded buffer before it is
//! written to the output sink.

/// Reduce `size` bytes at the front of `buffer` by `rate / 2`, in place.
///
/// Returns the number of valid bytes, `size * 2 / rate`. Byte `i` of the
/// result is taken from source byte `i * rate / 2 + rate / 2 - 1`. Byte 0 is
/// never rewritten and keeps its source value. With `rate == 2` the buffer is
/// left unchanged.
///
/// `rate` must be even and at least 2; `size` is clamped to the buffer length.
pub fn downsample_in_place(buffer: &mut [u8], size: usize, rate: usize) -> usize {
    debug_assert!(rate >= 2 && rate % 2 == 0, "compression rate must be even");

    let size = size.min(buffer.len());
    let half = rate / 2;
    let out_len = size * 2 / rate;

    // Source index never trails the destination, so forward copying is safe.
    for i in 1..out_len {
        buffer[i] = buffer[i * rate / 2 + half - 1];
    }

    out_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_two_is_identity() {
        let original: Vec<u8> = (0..64).collect();
        let mut buffer = original.clone();

        let len = downsample_in_place(&mut buffer, 64, 2);

        assert_eq!(len, 64);
        assert_eq!(buffer, original);
    }

    #[test]
    fn test_rate_four_halves_the_buffer() {
        let mut buffer: Vec<u8> = (0..16).collect();

        let len = downsample_in_place(&mut buffer, 16, 4);

        assert_eq!(len, 8);
        // i * 2 + 1 for i >= 1, byte 0 untouched
        assert_eq!(&buffer[..len], &[0, 3, 5, 7, 9, 11, 13, 15]);
    }

    #[test]
    fn test_first_byte_keeps_source_value() {
        let mut buffer: Vec<u8> = vec![0xAA, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

        let len = downsample_in_place(&mut buffer, 12, 6);

        assert_eq!(len, 4);
        assert_eq!(buffer[0], 0xAA);
        assert_eq!(&buffer[1..len], &[5, 8, 11]);
    }

    #[test]
    fn test_partial_buffer_only_uses_size_bytes() {
        let mut buffer: Vec<u8> = (0..32).collect();

        let len = downsample_in_place(&mut buffer, 8, 4);

        assert_eq!(len, 4);
        assert_eq!(&buffer[..len], &[0, 3, 5, 7]);
        assert_eq!(buffer[8], 8);
    }

    #[test]
    fn test_empty_and_oversized_input() {
        let mut buffer = vec![7u8; 4];
        assert_eq!(downsample_in_place(&mut buffer, 0, 4), 0);
        assert_eq!(downsample_in_place(&mut buffer, 100, 2), 4);
    }
}
