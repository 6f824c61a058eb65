//! Single-producer side of the broadcast stream
//!
//! The driver transmits events here; clients only receive. The
//! transmitter lives in this crate so in-process driver stand-ins and
//! protocol tests can exercise the full path.

use std::sync::atomic::{fence, Ordering};

use super::descriptor::{self, record};
use crate::{
    concurrent::{
        atomic_buffer::AtomicBuffer,
        bits::{self, Index},
    },
    error::{Result, TernError},
};

#[derive(Debug)]
pub struct BroadcastTransmitter {
    buffer: AtomicBuffer,
    capacity: Index,
    max_transmission_length: Index,
    tail_intent_counter_index: Index,
    tail_counter_index: Index,
    latest_counter_index: Index,
}

impl BroadcastTransmitter {
    pub fn new(buffer: AtomicBuffer) -> Result<Self> {
        let capacity = descriptor::check_capacity(buffer.capacity())?;
        Ok(Self {
            buffer,
            capacity,
            max_transmission_length: capacity / 8,
            tail_intent_counter_index: capacity + descriptor::TAIL_INTENT_COUNTER_OFFSET,
            tail_counter_index: capacity + descriptor::TAIL_COUNTER_OFFSET,
            latest_counter_index: capacity + descriptor::LATEST_COUNTER_OFFSET,
        })
    }

    pub fn capacity(&self) -> Index {
        self.capacity
    }

    pub fn max_transmission_length(&self) -> Index {
        self.max_transmission_length
    }

    /// Transmit one record to all receivers. Slow receivers are lapped,
    /// never blocked on.
    pub fn transmit(
        &self,
        msg_type_id: i32,
        src: &AtomicBuffer,
        src_index: Index,
        length: Index,
    ) -> Result<()> {
        if msg_type_id < 1 {
            return Err(TernError::invalid_parameter(
                "msg_type_id",
                format!("message type id must be positive, id={}", msg_type_id),
            ));
        }
        if length > self.max_transmission_length {
            return Err(TernError::MessageTooLarge {
                length,
                max: self.max_transmission_length,
            });
        }

        let record_length = length + record::HEADER_LENGTH;
        let aligned_length = bits::align(record_length, record::RECORD_ALIGNMENT);
        let mask = (self.capacity - 1) as i64;

        let mut current_tail = self.buffer.get_i64(self.tail_counter_index);
        let mut record_offset = (current_tail & mask) as Index;
        let to_end_of_buffer = self.capacity - record_offset;

        if to_end_of_buffer < aligned_length {
            self.signal_tail_intent(current_tail + (to_end_of_buffer + aligned_length) as i64);

            self.buffer
                .put_i32(record::length_offset(record_offset), to_end_of_buffer);
            self.buffer
                .put_i32(record::type_offset(record_offset), record::PADDING_MSG_TYPE_ID);

            current_tail += to_end_of_buffer as i64;
            record_offset = 0;
        } else {
            self.signal_tail_intent(current_tail + aligned_length as i64);
        }

        self.buffer
            .put_i32(record::length_offset(record_offset), record_length);
        self.buffer
            .put_i32(record::type_offset(record_offset), msg_type_id);
        self.buffer
            .copy_from(record::msg_offset(record_offset), src, src_index, length);

        self.buffer.put_i64(self.latest_counter_index, current_tail);
        self.buffer
            .put_i64_ordered(self.tail_counter_index, current_tail + aligned_length as i64);

        Ok(())
    }

    // The intent must be visible before the record bytes are disturbed,
    // so receivers can detect a lap mid-copy.
    fn signal_tail_intent(&self, new_tail: i64) {
        self.buffer
            .put_i64_ordered(self.tail_intent_counter_index, new_tail);
        fence(Ordering::SeqCst);
    }
}
