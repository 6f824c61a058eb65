//! Reading the driver's distinct error log out of the CnC file
//!
//! The log is a sequence of records, each holding one distinct error
//! with observation counts and first/last timestamps:
//!
//! ```text
//!  [ length:i32 | observationCount:i32 | lastObservation:i64 |
//!    firstObservation:i64 | encoded error (UTF-8) ]
//! ```
//!
//! Records are 8-byte aligned; a zero length terminates the log. The
//! driver owns the write side.

use crate::concurrent::{
    atomic_buffer::AtomicBuffer,
    bits::{self, Index},
};

pub const LENGTH_OFFSET: Index = 0;
pub const OBSERVATION_COUNT_OFFSET: Index = 4;
pub const LAST_OBSERVATION_TIMESTAMP_OFFSET: Index = 8;
pub const FIRST_OBSERVATION_TIMESTAMP_OFFSET: Index = 16;
pub const ENCODED_ERROR_OFFSET: Index = 24;

pub const RECORD_ALIGNMENT: Index = 8;

/// One decoded error observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorObservation {
    pub observation_count: i32,
    pub first_observation_timestamp: i64,
    pub last_observation_timestamp: i64,
    pub encoded_error: String,
}

/// Read error records observed at or after `since_timestamp`, newest
/// semantics per record. Returns how many records were consumed.
pub fn read(
    buffer: &AtomicBuffer,
    since_timestamp: i64,
    mut consumer: impl FnMut(&ErrorObservation),
) -> usize {
    let mut records_read = 0;
    let mut offset: Index = 0;
    let capacity = buffer.capacity();

    while offset < capacity - ENCODED_ERROR_OFFSET {
        let length = buffer.get_i32_volatile(offset + LENGTH_OFFSET);
        if length <= 0 {
            break;
        }

        let last_observation =
            buffer.get_i64_volatile(offset + LAST_OBSERVATION_TIMESTAMP_OFFSET);
        if last_observation >= since_timestamp {
            let observation = ErrorObservation {
                observation_count: buffer.get_i32_volatile(offset + OBSERVATION_COUNT_OFFSET),
                first_observation_timestamp: buffer
                    .get_i64(offset + FIRST_OBSERVATION_TIMESTAMP_OFFSET),
                last_observation_timestamp: last_observation,
                encoded_error: String::from_utf8_lossy(buffer.as_slice(
                    offset + ENCODED_ERROR_OFFSET,
                    length - ENCODED_ERROR_OFFSET,
                ))
                .into_owned(),
            };
            consumer(&observation);
            records_read += 1;
        }

        offset += bits::align(length, RECORD_ALIGNMENT);
    }

    records_read
}
