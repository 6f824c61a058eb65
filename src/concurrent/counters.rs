//! Counters buffers shared between driver and clients
//!
//! Two side-by-side buffers inside the CnC file: a metadata buffer
//! describing each counter (state, type, label) and a values buffer
//! holding one cache-line-padded 64-bit value per counter. Counters are
//! single-writer, multi-reader; the driver allocates them and tells
//! clients which ids to use.

use crate::{
    concurrent::{atomic_buffer::AtomicBuffer, bits::Index, bits::CACHE_LINE_LENGTH},
    error::{Result, TernError},
};

/// Length of one value slot in the values buffer
pub const COUNTER_LENGTH: Index = CACHE_LINE_LENGTH * 2;

/// Length of one metadata record in the metadata buffer
pub const METADATA_LENGTH: Index = CACHE_LINE_LENGTH * 4;

pub const RECORD_UNUSED: i32 = 0;
pub const RECORD_ALLOCATED: i32 = 1;
pub const RECORD_RECLAIMED: i32 = -1;

const TYPE_ID_OFFSET: Index = 4;
const KEY_OFFSET: Index = 8;
const LABEL_LENGTH_OFFSET: Index = 24;
const LABEL_OFFSET: Index = 28;
const MAX_LABEL_LENGTH: Index = METADATA_LENGTH - LABEL_OFFSET;
pub const MAX_KEY_LENGTH: Index = LABEL_LENGTH_OFFSET - KEY_OFFSET;

#[inline]
pub fn counter_offset(id: i32) -> Index {
    id * COUNTER_LENGTH
}

#[inline]
pub fn metadata_offset(id: i32) -> Index {
    id * METADATA_LENGTH
}

/// Read-only view of the counters buffers
#[derive(Clone, Copy, Debug)]
pub struct CountersReader {
    metadata: AtomicBuffer,
    values: AtomicBuffer,
}

impl CountersReader {
    pub fn new(metadata: AtomicBuffer, values: AtomicBuffer) -> Self {
        Self { metadata, values }
    }

    pub fn max_counter_id(&self) -> i32 {
        self.values.capacity() / COUNTER_LENGTH
    }

    pub fn counter_value(&self, id: i32) -> i64 {
        self.values.get_i64_volatile(counter_offset(id))
    }

    pub fn counter_state(&self, id: i32) -> i32 {
        self.metadata.get_i32_volatile(metadata_offset(id))
    }

    pub fn counter_type_id(&self, id: i32) -> i32 {
        self.metadata.get_i32(metadata_offset(id) + TYPE_ID_OFFSET)
    }

    pub fn counter_label(&self, id: i32) -> String {
        let record = metadata_offset(id);
        let length = self.metadata.get_i32(record + LABEL_LENGTH_OFFSET);
        String::from_utf8_lossy(self.metadata.as_slice(record + LABEL_OFFSET, length)).into_owned()
    }

    /// Visit every allocated counter as `(id, type_id, label)`
    pub fn for_each(&self, mut consumer: impl FnMut(i32, i32, &str)) {
        for id in 0..self.max_counter_id() {
            if self.counter_state(id) != RECORD_ALLOCATED {
                continue;
            }
            let label = self.counter_label(id);
            consumer(id, self.counter_type_id(id), &label);
        }
    }
}

/// Allocator over the counters buffers. The production driver owns the
/// allocation side; this exists for in-process driver stand-ins and for
/// tooling that embeds the layout.
#[derive(Debug)]
pub struct CountersManager {
    metadata: AtomicBuffer,
    values: AtomicBuffer,
    high_water_mark: i32,
    free_list: Vec<i32>,
}

impl CountersManager {
    pub fn new(metadata: AtomicBuffer, values: AtomicBuffer) -> Self {
        Self {
            metadata,
            values,
            high_water_mark: 0,
            free_list: Vec::new(),
        }
    }

    pub fn reader(&self) -> CountersReader {
        CountersReader::new(self.metadata, self.values)
    }

    pub fn allocate(&mut self, type_id: i32, label: &str) -> Result<i32> {
        let label_bytes = label.as_bytes();
        if label_bytes.len() as Index > MAX_LABEL_LENGTH {
            return Err(TernError::invalid_parameter("label", "label too long"));
        }

        let id = match self.free_list.pop() {
            Some(id) => id,
            None => {
                let id = self.high_water_mark;
                if metadata_offset(id) + METADATA_LENGTH > self.metadata.capacity()
                    || counter_offset(id) + COUNTER_LENGTH > self.values.capacity()
                {
                    return Err(TernError::memory("counters buffer exhausted"));
                }
                self.high_water_mark += 1;
                id
            }
        };

        let record = metadata_offset(id);
        self.metadata.set_memory(record, METADATA_LENGTH, 0);
        self.metadata.put_i32(record + TYPE_ID_OFFSET, type_id);
        self.metadata
            .put_i32(record + LABEL_LENGTH_OFFSET, label_bytes.len() as Index);
        self.metadata.put_bytes(record + LABEL_OFFSET, label_bytes);
        self.values.put_i64(counter_offset(id), 0);
        self.metadata.put_i32_ordered(record, RECORD_ALLOCATED);

        Ok(id)
    }

    pub fn free(&mut self, id: i32) {
        self.metadata
            .put_i32_ordered(metadata_offset(id), RECORD_RECLAIMED);
        self.free_list.push(id);
    }

    pub fn set_counter_value(&self, id: i32, value: i64) {
        self.values.put_i64_ordered(counter_offset(id), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffers(backing_meta: &mut Vec<u8>, backing_values: &mut Vec<u8>) -> (AtomicBuffer, AtomicBuffer) {
        (
            AtomicBuffer::wrap_slice(backing_meta),
            AtomicBuffer::wrap_slice(backing_values),
        )
    }

    #[test]
    fn test_allocate_and_read_back() {
        let mut meta = vec![0u8; METADATA_LENGTH as usize * 8];
        let mut values = vec![0u8; COUNTER_LENGTH as usize * 8];
        let (metadata, values_buf) = buffers(&mut meta, &mut values);

        let mut manager = CountersManager::new(metadata, values_buf);
        let a = manager.allocate(1, "publisher-limit: 42").unwrap();
        let b = manager.allocate(2, "subscriber-position: 43").unwrap();
        manager.set_counter_value(b, 4096);

        let reader = manager.reader();
        assert_eq!(reader.counter_label(a), "publisher-limit: 42");
        assert_eq!(reader.counter_type_id(b), 2);
        assert_eq!(reader.counter_value(b), 4096);

        let mut seen = Vec::new();
        reader.for_each(|id, type_id, label| seen.push((id, type_id, label.to_string())));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_free_list_reuse() {
        let mut meta = vec![0u8; METADATA_LENGTH as usize * 4];
        let mut values = vec![0u8; COUNTER_LENGTH as usize * 4];
        let (metadata, values_buf) = buffers(&mut meta, &mut values);

        let mut manager = CountersManager::new(metadata, values_buf);
        let a = manager.allocate(1, "first").unwrap();
        manager.free(a);
        assert_eq!(manager.reader().counter_state(a), RECORD_RECLAIMED);

        let b = manager.allocate(1, "second").unwrap();
        assert_eq!(a, b);
        assert_eq!(manager.reader().counter_label(b), "second");
    }

    #[test]
    fn test_exhaustion() {
        let mut meta = vec![0u8; METADATA_LENGTH as usize];
        let mut values = vec![0u8; COUNTER_LENGTH as usize];
        let (metadata, values_buf) = buffers(&mut meta, &mut values);

        let mut manager = CountersManager::new(metadata, values_buf);
        manager.allocate(1, "only").unwrap();
        assert!(manager.allocate(1, "overflow").is_err());
    }
}
