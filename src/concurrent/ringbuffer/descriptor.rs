//! Layout of the many-to-one ring buffer and its records
//!
//! The ring is a power-of-two data region followed by a trailer of
//! cache-line-padded control fields:
//!
//! ```text
//!  +----------------------------+
//!  |        data region         |  capacity (power of 2)
//!  +----------------------------+
//!  |      (padding)             |
//!  |      tail position         |
//!  |      head cache position   |
//!  |      head position         |
//!  |      correlation counter   |
//!  |      consumer heartbeat    |
//!  +----------------------------+
//! ```

use crate::{
    concurrent::bits::{self, Index, CACHE_LINE_LENGTH},
    error::{Result, TernError},
};

pub const TAIL_POSITION_OFFSET: Index = CACHE_LINE_LENGTH * 2;
pub const HEAD_CACHE_POSITION_OFFSET: Index = CACHE_LINE_LENGTH * 4;
pub const HEAD_POSITION_OFFSET: Index = CACHE_LINE_LENGTH * 6;
pub const CORRELATION_COUNTER_OFFSET: Index = CACHE_LINE_LENGTH * 8;
pub const CONSUMER_HEARTBEAT_OFFSET: Index = CACHE_LINE_LENGTH * 10;

/// Total length of the trailer appended to the data region
pub const TRAILER_LENGTH: Index = CACHE_LINE_LENGTH * 12;

/// Record framing: `[ length:i32 | typeId:i32 | payload... ]` padded to
/// an 8-byte boundary. A negative length marks a record still being
/// written; the commit is a release store of the positive length.
pub mod record {
    use crate::concurrent::bits::Index;

    pub const HEADER_LENGTH: Index = 8;
    pub const ALIGNMENT: Index = 8;
    pub const PADDING_MSG_TYPE_ID: i32 = -1;

    #[inline]
    pub fn length_offset(record_offset: Index) -> Index {
        record_offset
    }

    #[inline]
    pub fn type_offset(record_offset: Index) -> Index {
        record_offset + 4
    }

    #[inline]
    pub fn encoded_msg_offset(record_offset: Index) -> Index {
        record_offset + HEADER_LENGTH
    }

    #[inline]
    pub fn make_header(length: i32, msg_type_id: i32) -> i64 {
        ((msg_type_id as i64) << 32) | (length as i64 & 0xFFFF_FFFF)
    }

    #[inline]
    pub fn record_length(header: i64) -> i32 {
        header as i32
    }

    #[inline]
    pub fn message_type_id(header: i64) -> i32 {
        (header >> 32) as i32
    }
}

/// Validate that a total buffer length carries a power-of-two data region
/// plus the trailer, returning the data capacity.
pub fn check_capacity(total_length: Index) -> Result<Index> {
    let capacity = total_length - TRAILER_LENGTH;
    if !bits::is_power_of_two(capacity) {
        return Err(TernError::invalid_parameter(
            "capacity",
            format!(
                "ring data capacity must be a positive power of 2 + TRAILER_LENGTH, length={}",
                total_length
            ),
        ));
    }
    Ok(capacity)
}
