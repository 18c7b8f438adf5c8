//! Byte-order correction for LPCM regions
//!
//! Disc LPCM is big-endian 16-bit; Matroska wants little-endian. Within an
//! LPCM entry the output byte at entry-relative position `p` is source byte
//! `p ^ 1`. An odd trailing byte has no partner and passes through as is.

use crate::Result;

/// Fill `out` with swapped bytes of an LPCM entry starting at `within`
///
/// `fetch(start, dst)` copies raw entry bytes from entry-relative `start`.
/// The fetched range is widened to whole samples so reads may begin or end
/// mid-sample.
pub(crate) fn read_swapped<F>(within: u64, entry_len: u64, out: &mut [u8], fetch: F) -> Result<()>
where
    F: FnOnce(u64, &mut [u8]) -> Result<()>,
{
    if out.is_empty() {
        return Ok(());
    }

    let start = within & !1;
    let end = (within + out.len() as u64)
        .next_multiple_of(2)
        .min(entry_len);
    let mut raw = vec![0u8; (end - start) as usize];
    fetch(start, &mut raw)?;

    let unpaired = entry_len % 2 == 1;
    for (k, byte) in out.iter_mut().enumerate() {
        let p = within + k as u64;
        let src = if unpaired && p == entry_len - 1 {
            p
        } else {
            p ^ 1
        };
        *byte = raw[(src - start) as usize];
    }
    Ok(())
}

/// Swap a whole even-length buffer in place
pub fn swap_samples(data: &mut [u8]) {
    for pair in data.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}
