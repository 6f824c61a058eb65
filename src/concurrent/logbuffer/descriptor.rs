//! Layout of a log buffer file: three term partitions plus metadata
//!
//! ```text
//!  +----------------------------+
//!  |           Term 0           |
//!  +----------------------------+
//!  |           Term 1           |
//!  +----------------------------+
//!  |           Term 2           |
//!  +----------------------------+
//!  |        Log Meta Data       |
//!  +----------------------------+
//! ```
//!
//! A stream position is 64 bits: the low `log2(termLength)` bits are the
//! term offset and the bits above are the term count since the initial
//! term. The active partition for a position is `termCount mod 3`.

use crate::{
    concurrent::{
        atomic_buffer::AtomicBuffer,
        bits::{self, Index, CACHE_LINE_LENGTH},
    },
    error::{Result, TernError},
};

use super::frame;

pub const TERM_MIN_LENGTH: Index = 64 * 1024;

pub const PARTITION_COUNT: usize = 3;

/// Index passed to `LogBuffers::atomic_buffer` for the metadata section
pub const LOG_META_DATA_SECTION_INDEX: usize = PARTITION_COUNT;

// Metadata section layout. Tail counters first so they sit alone on
// their cache lines, away from the read-mostly fields.
pub const TERM_TAIL_COUNTER_OFFSET: Index = 0;
pub const LOG_ACTIVE_PARTITION_INDEX_OFFSET: Index = 24;
pub const LOG_TIME_OF_LAST_STATUS_MESSAGE_OFFSET: Index = CACHE_LINE_LENGTH * 2;
pub const LOG_CORRELATION_ID_OFFSET: Index = CACHE_LINE_LENGTH * 4;
pub const LOG_INITIAL_TERM_ID_OFFSET: Index = LOG_CORRELATION_ID_OFFSET + 8;
pub const LOG_DEFAULT_FRAME_HEADER_LENGTH_OFFSET: Index = LOG_CORRELATION_ID_OFFSET + 12;
pub const LOG_MTU_LENGTH_OFFSET: Index = LOG_CORRELATION_ID_OFFSET + 16;
pub const LOG_DEFAULT_FRAME_HEADER_OFFSET: Index = CACHE_LINE_LENGTH * 6;

pub const LOG_DEFAULT_FRAME_HEADER_MAX_LENGTH: Index = CACHE_LINE_LENGTH * 2;

/// Total length of the metadata section
pub const LOG_META_DATA_LENGTH: Index =
    LOG_DEFAULT_FRAME_HEADER_OFFSET + LOG_DEFAULT_FRAME_HEADER_MAX_LENGTH;

pub fn check_term_length(term_length: Index) -> Result<()> {
    if term_length < TERM_MIN_LENGTH {
        return Err(TernError::illegal_state(format!(
            "term length less than min size of {}, length={}",
            TERM_MIN_LENGTH, term_length
        )));
    }
    if !bits::is_power_of_two(term_length) {
        return Err(TernError::illegal_state(format!(
            "term length not a power of 2, length={}",
            term_length
        )));
    }
    Ok(())
}

#[inline]
pub fn initial_term_id(log_meta_data_buffer: &AtomicBuffer) -> i32 {
    log_meta_data_buffer.get_i32(LOG_INITIAL_TERM_ID_OFFSET)
}

#[inline]
pub fn mtu_length(log_meta_data_buffer: &AtomicBuffer) -> i32 {
    log_meta_data_buffer.get_i32(LOG_MTU_LENGTH_OFFSET)
}

#[inline]
pub fn active_partition_index(log_meta_data_buffer: &AtomicBuffer) -> i32 {
    log_meta_data_buffer.get_i32_volatile(LOG_ACTIVE_PARTITION_INDEX_OFFSET)
}

#[inline]
pub fn set_active_partition_index(log_meta_data_buffer: &AtomicBuffer, index: i32) {
    log_meta_data_buffer.put_i32_ordered(LOG_ACTIVE_PARTITION_INDEX_OFFSET, index);
}

#[inline]
pub fn time_of_last_status_message(log_meta_data_buffer: &AtomicBuffer) -> i64 {
    log_meta_data_buffer.get_i64_volatile(LOG_TIME_OF_LAST_STATUS_MESSAGE_OFFSET)
}

#[inline]
pub fn set_time_of_last_status_message(log_meta_data_buffer: &AtomicBuffer, time_ms: i64) {
    log_meta_data_buffer.put_i64_ordered(LOG_TIME_OF_LAST_STATUS_MESSAGE_OFFSET, time_ms);
}

#[inline]
pub fn correlation_id(log_meta_data_buffer: &AtomicBuffer) -> i64 {
    log_meta_data_buffer.get_i64(LOG_CORRELATION_ID_OFFSET)
}

/// View over the default frame header template the appender stamps onto
/// every frame
#[inline]
pub fn default_frame_header(log_meta_data_buffer: &AtomicBuffer) -> AtomicBuffer {
    log_meta_data_buffer.view(LOG_DEFAULT_FRAME_HEADER_OFFSET, frame::HEADER_LENGTH)
}

#[inline]
pub fn next_partition_index(current_index: i32) -> i32 {
    bits::fast_mod_3((current_index + 1) as u64)
}

#[inline]
pub fn index_by_term(initial_term_id: i32, active_term_id: i32) -> i32 {
    bits::fast_mod_3((active_term_id - initial_term_id) as u64)
}

#[inline]
pub fn index_by_position(position: i64, position_bits_to_shift: i32) -> i32 {
    bits::fast_mod_3((position as u64) >> position_bits_to_shift)
}

#[inline]
pub fn compute_position(
    active_term_id: i32,
    term_offset: Index,
    position_bits_to_shift: i32,
    initial_term_id: i32,
) -> i64 {
    let term_count = (active_term_id - initial_term_id) as i64;
    (term_count << position_bits_to_shift) + term_offset as i64
}

#[inline]
pub fn compute_term_begin_position(
    active_term_id: i32,
    position_bits_to_shift: i32,
    initial_term_id: i32,
) -> i64 {
    ((active_term_id - initial_term_id) as i64) << position_bits_to_shift
}

#[inline]
pub fn compute_log_length(term_length: Index) -> usize {
    term_length as usize * PARTITION_COUNT + LOG_META_DATA_LENGTH as usize
}

#[inline]
pub fn compute_term_length(log_length: usize) -> Index {
    ((log_length - LOG_META_DATA_LENGTH as usize) / PARTITION_COUNT) as Index
}

/// Term id carried in the high half of a raw tail
#[inline]
pub fn term_id(raw_tail: i64) -> i32 {
    (raw_tail >> 32) as i32
}

/// Tail byte offset in the low half of a raw tail, clamped to the term
/// length once the term has overflowed
#[inline]
pub fn term_offset(raw_tail: i64, term_length: i64) -> Index {
    let tail = raw_tail & 0xFFFF_FFFF;
    std::cmp::min(tail, term_length) as Index
}

#[inline]
pub fn tail_counter_offset(partition_index: i32) -> Index {
    TERM_TAIL_COUNTER_OFFSET + partition_index * 8
}

#[inline]
pub fn raw_tail_volatile(log_meta_data_buffer: &AtomicBuffer, partition_index: i32) -> i64 {
    log_meta_data_buffer.get_i64_volatile(tail_counter_offset(partition_index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_decomposition() {
        let term_length: Index = 64 * 1024;
        let shift = bits::number_of_trailing_zeroes(term_length);

        // positions walk the partitions 0,1,2,0,...
        for term_count in 0..7i64 {
            let position = (term_count << shift) + 4096;
            assert_eq!(index_by_position(position, shift), (term_count % 3) as i32);
            assert_eq!(position & (term_length - 1) as i64, 4096);
        }
    }

    #[test]
    fn test_compute_position_round_trip() {
        let term_length: Index = 64 * 1024;
        let shift = bits::number_of_trailing_zeroes(term_length);
        let initial_term_id = 100;

        let position = compute_position(102, 256, shift, initial_term_id);
        assert_eq!(position, 2 * term_length as i64 + 256);
        assert_eq!(
            compute_term_begin_position(102, shift, initial_term_id),
            2 * term_length as i64
        );
    }

    #[test]
    fn test_raw_tail_split() {
        let raw_tail = (7i64 << 32) | 1024;
        assert_eq!(term_id(raw_tail), 7);
        assert_eq!(term_offset(raw_tail, 64 * 1024), 1024);

        // overflowed tail is clamped
        let raw_tail = (7i64 << 32) | (80 * 1024);
        assert_eq!(term_offset(raw_tail, 64 * 1024), 64 * 1024);
    }

    #[test]
    fn test_term_length_validation() {
        assert!(check_term_length(64 * 1024).is_ok());
        assert!(check_term_length(32 * 1024).is_err());
        assert!(check_term_length(65 * 1024).is_err());
    }

    #[test]
    fn test_log_length() {
        let len = compute_log_length(64 * 1024);
        assert_eq!(compute_term_length(len), 64 * 1024);
    }
}
