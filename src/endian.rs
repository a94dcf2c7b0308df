//! Bulk big-endian conversion for channel payloads.
//!
//! Individual header fields go through `byteorder`; this module covers the
//! other case, whole channels of 16- or 32-bit pixels that have to change
//! byte order around compression. Pixels are staged in native order and the
//! byte order changes exactly once, in [`byte_swap_in_place`]: parallel
//! over cache-sized blocks with a scalar pass inside each, in place, every
//! element swapped exactly once including the tail.

use rayon::prelude::*;

use crate::pixel::Pixel;

/// Block size processed per work item. Sized to sit comfortably inside an
/// L1 data cache.
const CACHE_BLOCK: usize = 64 * 1024;

/// Swap every `T`-sized element of `bytes` between native and big-endian
/// order, in place.
///
/// `bytes.len()` must be a multiple of `T::BYTES`; callers produce these
/// buffers from whole pixel arrays so the invariant holds by construction.
/// On big-endian targets and for 8-bit data this is a no-op.
pub(crate) fn byte_swap_in_place<T: Pixel>(bytes: &mut [u8]) {
    if T::BYTES == 1 || cfg!(target_endian = "big") {
        return;
    }
    debug_assert_eq!(bytes.len() % T::BYTES, 0);

    // Blocks are a whole number of elements so no element straddles two
    // work items.
    let block = CACHE_BLOCK - CACHE_BLOCK % T::BYTES;
    bytes.par_chunks_mut(block).for_each(|chunk| {
        for element in chunk.chunks_exact_mut(T::BYTES) {
            element.reverse();
        }
    });
}

/// Convert a pixel array into its big-endian byte representation: stage
/// the native bytes, then run the bulk swap over the whole buffer.
pub(crate) fn to_be_bytes<T: Pixel>(pixels: &[T]) -> Vec<u8> {
    let mut bytes = vec![0u8; pixels.len() * T::BYTES];
    for (pixel, out) in pixels.iter().zip(bytes.chunks_exact_mut(T::BYTES)) {
        pixel.write_ne(out);
    }
    byte_swap_in_place::<T>(&mut bytes);
    bytes
}

/// Convert a big-endian byte buffer back into pixels: bulk-swap a copy to
/// native order, then read the elements out.
///
/// Returns `None` when `bytes.len()` is not a multiple of the element size.
pub(crate) fn from_be_bytes<T: Pixel>(bytes: &[u8]) -> Option<Vec<T>> {
    if bytes.len() % T::BYTES != 0 {
        return None;
    }
    let mut native = bytes.to_vec();
    byte_swap_in_place::<T>(&mut native);
    Some(
        native
            .chunks_exact(T::BYTES)
            .map(|chunk| T::read_ne(chunk))
            .collect(),
    )
}
