//! Many-producer, single-consumer byte ring over shared memory
//!
//! Producers claim space with a CAS on the tail; the single consumer
//! advances the head monotonically and zeroes consumed bytes so the
//! region is reusable. Records are committed by a release store of the
//! positive record length after the payload is in place.

use super::descriptor::{self, record};
use crate::{
    concurrent::{
        atomic_buffer::AtomicBuffer,
        bits::{self, Index},
    },
    error::{Result, TernError},
};

#[derive(Debug)]
pub struct ManyToOneRingBuffer {
    buffer: AtomicBuffer,
    capacity: Index,
    max_msg_length: Index,
    tail_position_index: Index,
    head_cache_position_index: Index,
    head_position_index: Index,
    correlation_counter_index: Index,
    consumer_heartbeat_index: Index,
}

impl ManyToOneRingBuffer {
    /// Wrap a buffer whose length is a power-of-two data region plus the
    /// ring trailer.
    pub fn new(buffer: AtomicBuffer) -> Result<Self> {
        let capacity = descriptor::check_capacity(buffer.capacity())?;
        Ok(Self {
            buffer,
            capacity,
            max_msg_length: capacity / 8,
            tail_position_index: capacity + descriptor::TAIL_POSITION_OFFSET,
            head_cache_position_index: capacity + descriptor::HEAD_CACHE_POSITION_OFFSET,
            head_position_index: capacity + descriptor::HEAD_POSITION_OFFSET,
            correlation_counter_index: capacity + descriptor::CORRELATION_COUNTER_OFFSET,
            consumer_heartbeat_index: capacity + descriptor::CONSUMER_HEARTBEAT_OFFSET,
        })
    }

    pub fn capacity(&self) -> Index {
        self.capacity
    }

    pub fn max_msg_length(&self) -> Index {
        self.max_msg_length
    }

    /// Write one record onto the ring.
    ///
    /// Fails with `MessageTooLarge` before touching the ring, or with
    /// `InsufficientCapacity` when the consumer is too far behind.
    pub fn write(
        &self,
        msg_type_id: i32,
        src: &AtomicBuffer,
        src_index: Index,
        length: Index,
    ) -> Result<()> {
        check_msg_type_id(msg_type_id)?;
        if length > self.max_msg_length {
            return Err(TernError::MessageTooLarge {
                length,
                max: self.max_msg_length,
            });
        }

        let record_length = length + record::HEADER_LENGTH;
        let required = bits::align(record_length, record::ALIGNMENT);
        let record_index = self.claim_capacity(required)?;

        self.buffer.put_i64_ordered(
            record_index,
            record::make_header(-record_length, msg_type_id),
        );
        self.buffer.copy_from(
            record::encoded_msg_offset(record_index),
            src,
            src_index,
            length,
        );
        self.buffer
            .put_i32_ordered(record::length_offset(record_index), record_length);

        Ok(())
    }

    /// Read up to `message_count_limit` records, invoking the handler
    /// with `(msg_type_id, buffer, msg_offset, msg_length)`. Returns the
    /// number of messages consumed.
    pub fn read(
        &self,
        mut handler: impl FnMut(i32, &AtomicBuffer, Index, Index),
        message_count_limit: usize,
    ) -> usize {
        let head = self.buffer.get_i64(self.head_position_index);
        let head_index = (head & (self.capacity - 1) as i64) as Index;
        let contiguous_block_length = self.capacity - head_index;

        let mut messages_read = 0;
        let mut bytes_read: Index = 0;

        while bytes_read < contiguous_block_length && messages_read < message_count_limit {
            let record_index = head_index + bytes_read;
            let header = self.buffer.get_i64_volatile(record_index);
            let record_length = record::record_length(header);
            if record_length <= 0 {
                break;
            }

            bytes_read += bits::align(record_length, record::ALIGNMENT);

            let msg_type_id = record::message_type_id(header);
            if msg_type_id == record::PADDING_MSG_TYPE_ID {
                continue;
            }

            messages_read += 1;
            handler(
                msg_type_id,
                &self.buffer,
                record::encoded_msg_offset(record_index),
                record_length - record::HEADER_LENGTH,
            );
        }

        if bytes_read != 0 {
            self.buffer.set_memory(head_index, bytes_read, 0);
            self.buffer
                .put_i64_ordered(self.head_position_index, head + bytes_read as i64);
        }

        messages_read
    }

    /// Atomically allocate the next correlation id from the trailer slot
    pub fn next_correlation_id(&self) -> i64 {
        self.buffer
            .get_and_add_i64(self.correlation_counter_index, 1)
    }

    /// Timestamp the consumer (driver) last proved liveness at
    pub fn consumer_heartbeat_time(&self) -> i64 {
        self.buffer
            .get_i64_volatile(self.consumer_heartbeat_index)
    }

    /// Deposit a consumer-liveness timestamp (the consumer side does this)
    pub fn update_consumer_heartbeat_time(&self, time_ms: i64) {
        self.buffer
            .put_i64_ordered(self.consumer_heartbeat_index, time_ms);
    }

    fn claim_capacity(&self, required: Index) -> Result<Index> {
        let mask = (self.capacity - 1) as i64;
        let mut head = self
            .buffer
            .get_i64_volatile(self.head_cache_position_index);

        let mut tail: i64;
        let mut tail_index: Index;
        let mut padding: Index;

        loop {
            tail = self.buffer.get_i64_volatile(self.tail_position_index);
            let available = self.capacity - (tail - head) as Index;

            if required > available {
                head = self.buffer.get_i64_volatile(self.head_position_index);
                if required > self.capacity - (tail - head) as Index {
                    return Err(TernError::InsufficientCapacity { requested: required });
                }
                self.buffer
                    .put_i64_ordered(self.head_cache_position_index, head);
            }

            padding = 0;
            tail_index = (tail & mask) as Index;
            let to_buffer_end = self.capacity - tail_index;

            if required > to_buffer_end {
                let mut head_index = (head & mask) as Index;
                if required > head_index {
                    head = self.buffer.get_i64_volatile(self.head_position_index);
                    head_index = (head & mask) as Index;
                    if required > head_index {
                        return Err(TernError::InsufficientCapacity { requested: required });
                    }
                    self.buffer
                        .put_i64_ordered(self.head_cache_position_index, head);
                }
                padding = to_buffer_end;
            }

            if self.buffer.compare_and_set_i64(
                self.tail_position_index,
                tail,
                tail + (required + padding) as i64,
            ) {
                break;
            }
        }

        if padding != 0 {
            self.buffer.put_i64_ordered(
                tail_index,
                record::make_header(padding, record::PADDING_MSG_TYPE_ID),
            );
            tail_index = 0;
        }

        Ok(tail_index)
    }
}

fn check_msg_type_id(msg_type_id: i32) -> Result<()> {
    if msg_type_id < 1 {
        return Err(TernError::invalid_parameter(
            "msg_type_id",
            format!("message type id must be positive, id={}", msg_type_id),
        ));
    }
    Ok(())
}
