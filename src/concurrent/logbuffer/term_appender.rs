//! Appending frames to the active term of a publication log
//!
//! Space is reserved with a `getAndAdd` on the partition's raw tail (a
//! single publication has one logical producer, so the reservation never
//! needs to retry). The frame is stamped with a negative length, payload
//! written, then committed with a release store of the positive length.

use crate::concurrent::{
    atomic_buffer::AtomicBuffer,
    bits::{self, Index},
};

use super::{descriptor, frame, HeaderWriter};

/// The claim ran off the end of the term: the partition must rotate
pub const TERM_APPENDER_TRIPPED: i64 = -1;
/// The claim could not fit and no rotation applies
pub const TERM_APPENDER_FAILED: i64 = -2;

/// Supplies the reserved-value field right before a frame is committed
pub type ReservedValueSupplier<'a> = dyn Fn(&AtomicBuffer, Index, Index) -> i64 + 'a;

#[derive(Debug, Clone, Copy)]
pub struct AppendResult {
    /// Tail offset after the append, or a `TERM_APPENDER_*` sentinel
    pub term_offset: i64,
    pub term_id: i32,
}

/// A zero-copy range claimed in a term, to be committed or aborted
#[derive(Debug, Default)]
pub struct BufferClaim {
    frame: Option<AtomicBuffer>,
}

impl BufferClaim {
    pub(crate) fn wrap(&mut self, term_buffer: &AtomicBuffer, offset: Index, frame_length: Index) {
        self.frame = Some(term_buffer.view(offset, frame_length));
    }

    /// The claimed frame; payload starts at `offset()`
    pub fn buffer(&self) -> &AtomicBuffer {
        self.frame.as_ref().expect("claim not populated")
    }

    pub fn offset(&self) -> Index {
        frame::HEADER_LENGTH
    }

    pub fn length(&self) -> Index {
        self.buffer().capacity() - frame::HEADER_LENGTH
    }

    /// Commit the claimed frame, making it visible to subscribers
    pub fn commit(&mut self) {
        if let Some(frame_buffer) = self.frame.take() {
            frame::frame_length_ordered(&frame_buffer, 0, frame_buffer.capacity());
        }
    }

    /// Abort the claim by committing the range as padding
    pub fn abort(&mut self) {
        if let Some(frame_buffer) = self.frame.take() {
            frame::set_frame_type(&frame_buffer, 0, frame::HDR_TYPE_PAD);
            frame::frame_length_ordered(&frame_buffer, 0, frame_buffer.capacity());
        }
    }
}

#[derive(Debug)]
pub struct TermAppender {
    term_buffer: AtomicBuffer,
    tail_buffer: AtomicBuffer,
    tail_offset: Index,
}

impl TermAppender {
    pub fn new(
        term_buffer: AtomicBuffer,
        meta_data_buffer: AtomicBuffer,
        partition_index: i32,
    ) -> Self {
        Self {
            term_buffer,
            tail_buffer: meta_data_buffer,
            tail_offset: descriptor::tail_counter_offset(partition_index),
        }
    }

    pub fn term_buffer(&self) -> &AtomicBuffer {
        &self.term_buffer
    }

    pub fn raw_tail_volatile(&self) -> i64 {
        self.tail_buffer.get_i64_volatile(self.tail_offset)
    }

    /// Seed the partition's tail for the given term id at offset zero
    pub fn set_tail_term_id(&self, term_id: i32) {
        self.tail_buffer.put_i64(self.tail_offset, (term_id as i64) << 32);
    }

    /// Claim a frame for zero-copy writing; commit via the `BufferClaim`
    pub fn claim(
        &self,
        header: &HeaderWriter,
        length: Index,
        buffer_claim: &mut BufferClaim,
    ) -> AppendResult {
        let frame_length = length + frame::HEADER_LENGTH;
        let aligned_length = bits::align(frame_length, frame::FRAME_ALIGNMENT);
        let raw_tail = self.get_and_add_raw_tail(aligned_length);
        let term_offset = raw_tail & 0xFFFF_FFFF;
        let term_length = self.term_buffer.capacity();

        let mut result = AppendResult {
            term_id: descriptor::term_id(raw_tail),
            term_offset: term_offset + aligned_length as i64,
        };

        if result.term_offset > term_length as i64 {
            self.handle_end_of_log_condition(&mut result, term_offset as Index, header, term_length);
        } else {
            let offset = term_offset as Index;
            header.write(&self.term_buffer, offset, frame_length, result.term_id);
            buffer_claim.wrap(&self.term_buffer, offset, frame_length);
        }

        result
    }

    /// Append a message that fits in a single frame
    pub fn append_unfragmented_message(
        &self,
        header: &HeaderWriter,
        msg: &[u8],
        reserved_value_supplier: Option<&ReservedValueSupplier>,
    ) -> AppendResult {
        let length = msg.len() as Index;
        let frame_length = length + frame::HEADER_LENGTH;
        let aligned_length = bits::align(frame_length, frame::FRAME_ALIGNMENT);
        let raw_tail = self.get_and_add_raw_tail(aligned_length);
        let term_offset = raw_tail & 0xFFFF_FFFF;
        let term_length = self.term_buffer.capacity();

        let mut result = AppendResult {
            term_id: descriptor::term_id(raw_tail),
            term_offset: term_offset + aligned_length as i64,
        };

        if result.term_offset > term_length as i64 {
            self.handle_end_of_log_condition(&mut result, term_offset as Index, header, term_length);
        } else {
            let offset = term_offset as Index;
            header.write(&self.term_buffer, offset, frame_length, result.term_id);
            self.term_buffer.put_bytes(offset + frame::HEADER_LENGTH, msg);

            if let Some(supplier) = reserved_value_supplier {
                let reserved_value = supplier(&self.term_buffer, offset, frame_length);
                self.term_buffer
                    .put_i64(offset + frame::RESERVED_VALUE_FIELD_OFFSET, reserved_value);
            }

            frame::frame_length_ordered(&self.term_buffer, offset, frame_length);
        }

        result
    }

    /// Append a message as a chain of fragments of at most
    /// `max_payload_length` bytes each
    pub fn append_fragmented_message(
        &self,
        header: &HeaderWriter,
        msg: &[u8],
        max_payload_length: Index,
        reserved_value_supplier: Option<&ReservedValueSupplier>,
    ) -> AppendResult {
        let length = msg.len() as Index;
        let num_max_payloads = length / max_payload_length;
        let remaining_payload = length % max_payload_length;
        let last_frame_length = if remaining_payload > 0 {
            bits::align(remaining_payload + frame::HEADER_LENGTH, frame::FRAME_ALIGNMENT)
        } else {
            0
        };
        let required_length =
            num_max_payloads * (max_payload_length + frame::HEADER_LENGTH) + last_frame_length;

        let raw_tail = self.get_and_add_raw_tail(required_length);
        let term_offset = raw_tail & 0xFFFF_FFFF;
        let term_length = self.term_buffer.capacity();

        let mut result = AppendResult {
            term_id: descriptor::term_id(raw_tail),
            term_offset: term_offset + required_length as i64,
        };

        if result.term_offset > term_length as i64 {
            self.handle_end_of_log_condition(&mut result, term_offset as Index, header, term_length);
        } else {
            let mut flags = frame::BEGIN_FRAG;
            let mut remaining = length;
            let mut offset = term_offset as Index;

            loop {
                let bytes_to_write = std::cmp::min(remaining, max_payload_length);
                let frame_length = bytes_to_write + frame::HEADER_LENGTH;
                let aligned_length = bits::align(frame_length, frame::FRAME_ALIGNMENT);

                header.write(&self.term_buffer, offset, frame_length, result.term_id);
                self.term_buffer.put_bytes(
                    offset + frame::HEADER_LENGTH,
                    &msg[(length - remaining) as usize..(length - remaining + bytes_to_write) as usize],
                );

                if remaining <= max_payload_length {
                    flags |= frame::END_FRAG;
                }
                frame::set_frame_flags(&self.term_buffer, offset, flags);

                if let Some(supplier) = reserved_value_supplier {
                    let reserved_value = supplier(&self.term_buffer, offset, frame_length);
                    self.term_buffer
                        .put_i64(offset + frame::RESERVED_VALUE_FIELD_OFFSET, reserved_value);
                }

                frame::frame_length_ordered(&self.term_buffer, offset, frame_length);

                flags = 0;
                offset += aligned_length;
                remaining -= bytes_to_write;

                if remaining == 0 {
                    break;
                }
            }
        }

        result
    }

    fn handle_end_of_log_condition(
        &self,
        result: &mut AppendResult,
        term_offset: Index,
        header: &HeaderWriter,
        term_length: Index,
    ) {
        result.term_offset = TERM_APPENDER_FAILED;

        if term_offset <= term_length {
            result.term_offset = TERM_APPENDER_TRIPPED;

            if term_offset < term_length {
                let padding_length = term_length - term_offset;
                header.write(&self.term_buffer, term_offset, padding_length, result.term_id);
                frame::set_frame_type(&self.term_buffer, term_offset, frame::HDR_TYPE_PAD);
                frame::frame_length_ordered(&self.term_buffer, term_offset, padding_length);
            }
        }
    }

    fn get_and_add_raw_tail(&self, aligned_length: Index) -> i64 {
        self.tail_buffer.get_and_add_i64(self.tail_offset, aligned_length as i64)
    }
}
