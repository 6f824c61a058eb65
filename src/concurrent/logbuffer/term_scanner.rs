//! Scanning a term for the largest contiguous block of committed frames

use crate::concurrent::{
    atomic_buffer::AtomicBuffer,
    bits::{self, Index},
};

use super::frame;

/// Scan `[offset, limit)` and return the offset of the end of the
/// largest block of fully committed frames.
///
/// Padding terminates the block at its start; a padding frame sitting at
/// the scan start is consumed on its own so the caller can rotate past
/// the end of the term. The returned offset always lands on a frame
/// boundary.
pub fn scan(term_buffer: &AtomicBuffer, term_offset: Index, limit: Index) -> Index {
    let mut offset = term_offset;

    while offset < limit {
        let frame_length = frame::frame_length_volatile(term_buffer, offset);
        if frame_length <= 0 {
            break;
        }

        let aligned_frame_length = bits::align(frame_length, frame::FRAME_ALIGNMENT);

        if frame::is_padding_frame(term_buffer, offset) {
            if term_offset == offset {
                offset += aligned_frame_length;
            }
            break;
        }

        if offset + aligned_frame_length > limit {
            break;
        }

        offset += aligned_frame_length;
    }

    offset
}
