//! Consumer side of the broadcast stream
//!
//! Every receiver keeps its own cursor over the shared buffer. A record
//! is only trusted after `validate` confirms the producer's tail intent
//! has not moved past `cursor + capacity` — if it has, the receiver was
//! lapped and resynchronizes at the latest record.

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
pub struct BroadcastReceiver {
    buffer: AtomicBuffer,
    capacity: Index,
    tail_intent_counter_index: Index,
    tail_counter_index: Index,
    latest_counter_index: Index,
    record_offset: Index,
    cursor: i64,
    next_record: i64,
    lapped_count: i64,
}

impl BroadcastReceiver {
    pub fn new(buffer: AtomicBuffer) -> Result<Self> {
        let capacity = descriptor::check_capacity(buffer.capacity())?;
        let latest_counter_index = capacity + descriptor::LATEST_COUNTER_OFFSET;
        let cursor = buffer.get_i64_volatile(latest_counter_index);

        Ok(Self {
            buffer,
            capacity,
            tail_intent_counter_index: capacity + descriptor::TAIL_INTENT_COUNTER_OFFSET,
            tail_counter_index: capacity + descriptor::TAIL_COUNTER_OFFSET,
            latest_counter_index,
            record_offset: (cursor & (capacity - 1) as i64) as Index,
            cursor,
            next_record: cursor,
            lapped_count: 0,
        })
    }

    pub fn capacity(&self) -> Index {
        self.capacity
    }

    /// Number of times this receiver has been overrun by the transmitter
    pub fn lapped_count(&self) -> i64 {
        self.lapped_count
    }

    /// Advance to the next record if one is available.
    ///
    /// On a detected lap the cursor jumps to the latest record and the
    /// lap counter is incremented; the caller sees the freshest data.
    pub fn receive_next(&mut self) -> bool {
        let mask = (self.capacity - 1) as i64;
        let tail = self.buffer.get_i64_volatile(self.tail_counter_index);
        let mut cursor = self.next_record;

        if tail <= cursor {
            return false;
        }

        let mut record_offset = (cursor & mask) as Index;

        if !self.validate_at(cursor) {
            self.lapped_count += 1;
            cursor = self.buffer.get_i64(self.latest_counter_index);
            record_offset = (cursor & mask) as Index;
        }

        self.cursor = cursor;
        self.next_record = cursor
            + bits::align(
                self.buffer.get_i32(record::length_offset(record_offset)),
                record::RECORD_ALIGNMENT,
            ) as i64;

        if record::PADDING_MSG_TYPE_ID == self.buffer.get_i32(record::type_offset(record_offset)) {
            record_offset = 0;
            self.cursor = self.next_record;
            self.next_record += bits::align(
                self.buffer.get_i32(record::length_offset(0)),
                record::RECORD_ALIGNMENT,
            ) as i64;
        }

        self.record_offset = record_offset;
        true
    }

    pub fn msg_type_id(&self) -> i32 {
        self.buffer.get_i32(record::type_offset(self.record_offset))
    }

    pub fn offset(&self) -> Index {
        record::msg_offset(self.record_offset)
    }

    pub fn length(&self) -> Index {
        self.buffer.get_i32(record::length_offset(self.record_offset)) - record::HEADER_LENGTH
    }

    pub fn buffer(&self) -> &AtomicBuffer {
        &self.buffer
    }

    /// Confirm the record just examined was not overwritten mid-read
    pub fn validate(&self) -> bool {
        fence(Ordering::Acquire);
        self.validate_at(self.cursor)
    }

    fn validate_at(&self, cursor: i64) -> bool {
        cursor + self.capacity as i64
            > self.buffer.get_i64_volatile(self.tail_intent_counter_index)
    }
}

/// Receiver that copies each record into a private scratch buffer before
/// handing it to the handler, so the handler never observes bytes the
/// transmitter may be overwriting.
#[derive(Debug)]
pub struct CopyBroadcastReceiver {
    receiver: BroadcastReceiver,
    // u64 storage keeps the scratch aligned for 64-bit field decoding
    scratch: Box<[u64]>,
}

impl CopyBroadcastReceiver {
    pub const SCRATCH_BUFFER_LENGTH: Index = 4096;

    pub fn new(receiver: BroadcastReceiver) -> Self {
        Self {
            receiver,
            scratch: vec![0u64; Self::SCRATCH_BUFFER_LENGTH as usize / 8].into_boxed_slice(),
        }
    }

    pub fn lapped_count(&self) -> i64 {
        self.receiver.lapped_count()
    }

    /// Receive at most one event, returning how many were handled.
    ///
    /// A lap surfaces as `BroadcastLapped`; the cursor has already been
    /// resynchronized, so the next call continues from fresh data.
    pub fn receive(
        &mut self,
        mut handler: impl FnMut(i32, &AtomicBuffer, Index, Index),
    ) -> Result<usize> {
        let last_seen_lapped_count = self.receiver.lapped_count();

        if !self.receiver.receive_next() {
            return Ok(0);
        }

        if last_seen_lapped_count != self.receiver.lapped_count() {
            return Err(TernError::BroadcastLapped {
                lapped_count: self.receiver.lapped_count(),
            });
        }

        let length = self.receiver.length();
        if length > Self::SCRATCH_BUFFER_LENGTH {
            return Err(TernError::illegal_state(format!(
                "broadcast record of {} bytes exceeds scratch capacity",
                length
            )));
        }

        let msg_type_id = self.receiver.msg_type_id();
        let scratch_buffer = unsafe {
            AtomicBuffer::wrap(
                self.scratch.as_mut_ptr() as *mut u8,
                Self::SCRATCH_BUFFER_LENGTH,
            )
        };
        scratch_buffer.copy_from(0, self.receiver.buffer(), self.receiver.offset(), length);

        if !self.receiver.validate() {
            return Err(TernError::BroadcastLapped {
                lapped_count: self.receiver.lapped_count() + 1,
            });
        }

        handler(msg_type_id, &scratch_buffer, 0, length);
        Ok(1)
    }
}
