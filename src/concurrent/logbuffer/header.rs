//! Frame header views for poll handlers and the append path

use crate::concurrent::{
    atomic_buffer::AtomicBuffer,
    bits::{self, Index},
};

use super::{descriptor, frame};

/// Metadata view over the frame currently being handled by a poll.
///
/// Valid only for the duration of the handler call.
#[derive(Clone, Copy, Debug)]
pub struct Header {
    buffer: AtomicBuffer,
    offset: Index,
    initial_term_id: i32,
    position_bits_to_shift: i32,
}

impl Header {
    pub(crate) fn new(
        buffer: AtomicBuffer,
        initial_term_id: i32,
        position_bits_to_shift: i32,
    ) -> Self {
        Self {
            buffer,
            offset: 0,
            initial_term_id,
            position_bits_to_shift,
        }
    }

    pub(crate) fn set_buffer(&mut self, buffer: AtomicBuffer) {
        self.buffer = buffer;
    }

    pub(crate) fn set_offset(&mut self, offset: Index) {
        self.offset = offset;
    }

    /// Offset of the frame within its term buffer
    pub fn offset(&self) -> Index {
        self.offset
    }

    pub fn initial_term_id(&self) -> i32 {
        self.initial_term_id
    }

    pub fn frame_length(&self) -> i32 {
        self.buffer.get_i32(self.offset + frame::FRAME_LENGTH_FIELD_OFFSET)
    }

    pub fn session_id(&self) -> i32 {
        self.buffer.get_i32(self.offset + frame::SESSION_ID_FIELD_OFFSET)
    }

    pub fn stream_id(&self) -> i32 {
        self.buffer.get_i32(self.offset + frame::STREAM_ID_FIELD_OFFSET)
    }

    pub fn term_id(&self) -> i32 {
        self.buffer.get_i32(self.offset + frame::TERM_ID_FIELD_OFFSET)
    }

    pub fn term_offset(&self) -> Index {
        self.buffer.get_i32(self.offset + frame::TERM_OFFSET_FIELD_OFFSET)
    }

    pub fn flags(&self) -> u8 {
        frame::frame_flags(&self.buffer, self.offset)
    }

    pub fn frame_type(&self) -> u16 {
        frame::frame_type(&self.buffer, self.offset)
    }

    pub fn reserved_value(&self) -> i64 {
        self.buffer.get_i64(self.offset + frame::RESERVED_VALUE_FIELD_OFFSET)
    }

    /// Stream position at the end of this frame
    pub fn position(&self) -> i64 {
        let resulting_offset = bits::align(
            self.offset + self.frame_length(),
            frame::FRAME_ALIGNMENT,
        );
        descriptor::compute_position(
            self.term_id(),
            resulting_offset,
            self.position_bits_to_shift,
            self.initial_term_id,
        )
    }
}

/// Writes the fixed header fields of each appended frame, sourced from
/// the default frame header template in the log metadata.
#[derive(Clone, Copy, Debug)]
pub struct HeaderWriter {
    version_flags_type: i32,
    session_id: i32,
    stream_id: i32,
}

impl HeaderWriter {
    pub fn new(default_header: &AtomicBuffer) -> Self {
        Self {
            version_flags_type: default_header.get_i32(frame::VERSION_FIELD_OFFSET),
            session_id: default_header.get_i32(frame::SESSION_ID_FIELD_OFFSET),
            stream_id: default_header.get_i32(frame::STREAM_ID_FIELD_OFFSET),
        }
    }

    /// Stamp a claimed frame. The negative length marks it in-flight;
    /// the commit is a separate release store of the positive length.
    pub fn write(&self, term_buffer: &AtomicBuffer, offset: Index, length: Index, term_id: i32) {
        term_buffer.put_i32_ordered(offset + frame::FRAME_LENGTH_FIELD_OFFSET, -length);
        term_buffer.put_i32(offset + frame::VERSION_FIELD_OFFSET, self.version_flags_type);
        term_buffer.put_i32(offset + frame::TERM_OFFSET_FIELD_OFFSET, offset);
        term_buffer.put_i32(offset + frame::SESSION_ID_FIELD_OFFSET, self.session_id);
        term_buffer.put_i32(offset + frame::STREAM_ID_FIELD_OFFSET, self.stream_id);
        term_buffer.put_i32(offset + frame::TERM_ID_FIELD_OFFSET, term_id);
    }
}
