//! Fragment-by-fragment consumption of a term buffer

use crate::{
    concurrent::{
        atomic_buffer::AtomicBuffer,
        bits::{self, Index},
    },
    error::TernError,
};

use super::{frame, Header};

/// Result of one `read` pass
#[derive(Debug, Clone, Copy)]
pub struct ReadOutcome {
    pub fragments_read: i32,
    pub offset: Index,
}

/// Read committed fragments starting at `term_offset` until the fragment
/// limit is met, an uncommitted frame is found, or the term ends.
///
/// The offset advances past every scanned frame, padding included. The
/// handler only sees data frames. A handler `Err` is routed to
/// `error_handler` and stops the pass with the offset already past the
/// faulting frame, so the position commits beyond it.
pub fn read(
    term_buffer: &AtomicBuffer,
    term_offset: Index,
    handler: &mut dyn FnMut(&[u8], &Header) -> crate::error::Result<()>,
    fragments_limit: i32,
    header: &mut Header,
    error_handler: &dyn Fn(&TernError),
) -> ReadOutcome {
    let mut outcome = ReadOutcome {
        fragments_read: 0,
        offset: term_offset,
    };
    let capacity = term_buffer.capacity();
    let mut offset = term_offset;

    while outcome.fragments_read < fragments_limit && offset < capacity {
        let frame_length = frame::frame_length_volatile(term_buffer, offset);
        if frame_length <= 0 {
            break;
        }

        let fragment_offset = offset;
        offset += bits::align(frame_length, frame::FRAME_ALIGNMENT);
        outcome.offset = offset;

        if frame::is_padding_frame(term_buffer, fragment_offset) {
            continue;
        }

        header.set_buffer(*term_buffer);
        header.set_offset(fragment_offset);

        let payload = term_buffer.as_slice(
            fragment_offset + frame::HEADER_LENGTH,
            frame_length - frame::HEADER_LENGTH,
        );

        match handler(payload, header) {
            Ok(()) => outcome.fragments_read += 1,
            Err(e) => {
                error_handler(&e);
                break;
            }
        }
    }

    outcome
}
