//! Position counters over the CnC counter-values buffer
//!
//! A position is a 64-bit monotonically non-decreasing value owned by a
//! single writer. Subscriber positions are written by this client with
//! release ordering and observed by the driver with acquire loads, which
//! is how consumer progress crosses the process boundary.

use crate::concurrent::{atomic_buffer::AtomicBuffer, bits::Index, counters};

/// A single position counter addressed by counter id within the shared
/// counter-values buffer.
#[derive(Clone, Copy, Debug)]
pub struct UnsafeBufferPosition {
    buffer: AtomicBuffer,
    id: i32,
    offset: Index,
}

impl UnsafeBufferPosition {
    pub fn new(buffer: AtomicBuffer, id: i32) -> Self {
        Self {
            buffer,
            id,
            offset: counters::counter_offset(id),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Plain read, sufficient for the single writer itself
    #[inline]
    pub fn get(&self) -> i64 {
        self.buffer.get_i64(self.offset)
    }

    /// Acquire read for observers of another writer's position
    #[inline]
    pub fn get_volatile(&self) -> i64 {
        self.buffer.get_i64_volatile(self.offset)
    }

    /// Release store publishing consumed bytes to the driver
    #[inline]
    pub fn set_ordered(&self, value: i64) {
        self.buffer.put_i64_ordered(self.offset, value);
    }

    /// Plain store, only for initialization before the counter is shared
    #[inline]
    pub fn set(&self, value: i64) {
        self.buffer.put_i64(self.offset, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_addressing() {
        let mut backing = vec![0u8; 4096];
        let buffer = AtomicBuffer::wrap_slice(&mut backing);

        let p0 = UnsafeBufferPosition::new(buffer, 0);
        let p1 = UnsafeBufferPosition::new(buffer, 1);

        p0.set_ordered(100);
        p1.set_ordered(200);

        assert_eq!(p0.get(), 100);
        assert_eq!(p1.get_volatile(), 200);
        assert_eq!(buffer.get_i64(counters::COUNTER_LENGTH), 200);
    }
}
