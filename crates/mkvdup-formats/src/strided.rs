//! Strided bulk copy
//!
//! Media packets inside a run share one payload size and sit at a fixed
//! distance from each other in the source file. Gathering them into a
//! contiguous buffer is the hot path of range-map reads.

/// Copy `count` payloads of `chunk` bytes, each `stride` bytes apart in `src`
/// starting at `src_start`, into the front of `dst`.
///
/// Returns the number of bytes written (`chunk * count`). The caller checks
/// that `src` holds `src_start + (count - 1) * stride + chunk` bytes and that
/// `dst` holds `chunk * count` bytes; both are asserted.
pub fn copy_strided(
    dst: &mut [u8],
    src: &[u8],
    src_start: usize,
    stride: usize,
    chunk: usize,
    count: usize,
) -> usize {
    if count == 0 || chunk == 0 {
        return 0;
    }
    assert!(stride >= chunk, "stride {stride} shorter than chunk {chunk}");

    let total = chunk * count;
    let src_end = src_start + (count - 1) * stride + chunk;
    assert!(dst.len() >= total && src.len() >= src_end);

    if stride == chunk {
        dst[..total].copy_from_slice(&src[src_start..src_end]);
        return total;
    }

    for (out, packet) in dst[..total]
        .chunks_exact_mut(chunk)
        .zip(src[src_start..src_end].chunks(stride))
    {
        out.copy_from_slice(&packet[..chunk]);
    }

    total
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_with_gap() {
        // payload of 3 bytes followed by a 2 byte header, repeated
        let src: Vec<u8> = (0u8..30).collect();
        let mut dst = vec![0u8; 9];

        let written = copy_strided(&mut dst, &src, 2, 5, 3, 3);
        assert_eq!(written, 9);
        assert_eq!(dst, vec![2, 3, 4, 7, 8, 9, 12, 13, 14]);
    }

    #[test]
    fn test_contiguous_stride() {
        let src: Vec<u8> = (0u8..16).collect();
        let mut dst = vec![0u8; 8];
        assert_eq!(copy_strided(&mut dst, &src, 4, 4, 4, 2), 8);
        assert_eq!(dst, (4u8..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_last_packet_at_end_of_source() {
        let src = [0xAA, 0xBB, 0x00, 0xCC, 0xDD];
        let mut dst = [0u8; 4];
        assert_eq!(copy_strided(&mut dst, &src, 0, 3, 2, 2), 4);
        assert_eq!(dst, [0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn test_zero_count() {
        let mut dst = [7u8; 2];
        assert_eq!(copy_strided(&mut dst, &[], 0, 4, 2, 0), 0);
        assert_eq!(dst, [7, 7]);
    }

    #[test]
    fn test_dst_larger_than_needed() {
        let src = [1u8, 2, 9, 3, 4, 9];
        let mut dst = [0u8; 6];
        assert_eq!(copy_strided(&mut dst, &src, 0, 3, 2, 2), 4);
        assert_eq!(dst, [1, 2, 3, 4, 0, 0]);
    }
}
