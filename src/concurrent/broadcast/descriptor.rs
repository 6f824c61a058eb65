//! Layout of the one-to-many broadcast buffer
//!
//! A power-of-two data region followed by a trailer carrying the
//! producer's tail-intent, committed tail, and the start of the latest
//! record. Consumers keep their own cursor and detect being lapped by
//! re-validating the tail intent after copying a record out.

use crate::{
    concurrent::bits::{self, Index, CACHE_LINE_LENGTH},
    error::{Result, TernError},
};

pub const TAIL_INTENT_COUNTER_OFFSET: Index = 0;
pub const TAIL_COUNTER_OFFSET: Index = 8;
pub const LATEST_COUNTER_OFFSET: Index = 16;

/// Total length of the trailer appended to the data region
pub const TRAILER_LENGTH: Index = CACHE_LINE_LENGTH * 2;

/// Record framing: `[ length:i32 | typeId:i32 | payload... ]` padded to
/// an 8-byte boundary.
pub mod record {
    use crate::concurrent::bits::Index;

    pub const HEADER_LENGTH: Index = 8;
    pub const RECORD_ALIGNMENT: Index = 8;
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
    pub fn msg_offset(record_offset: Index) -> Index {
        record_offset + HEADER_LENGTH
    }
}

/// Validate the total buffer length and return the data capacity
pub fn check_capacity(total_length: Index) -> Result<Index> {
    let capacity = total_length - TRAILER_LENGTH;
    if !bits::is_power_of_two(capacity) {
        return Err(TernError::invalid_parameter(
            "capacity",
            format!(
                "broadcast data capacity must be a positive power of 2 + TRAILER_LENGTH, length={}",
                total_length
            ),
        ));
    }
    Ok(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_check() {
        assert_eq!(check_capacity(4096 + TRAILER_LENGTH).unwrap(), 4096);
        assert!(check_capacity(4095 + TRAILER_LENGTH).is_err());
    }
}
