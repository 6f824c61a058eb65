//! Frame layout within a term
//!
//! ```text
//!   0                   1                   2                   3
//!   0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  |                         Frame Length                          |
//!  +---------------+---------------+-------------------------------+
//!  |    Version    |     Flags     |             Type              |
//!  +---------------+---------------+-------------------------------+
//!  |                          Term Offset                          |
//!  +---------------------------------------------------------------+
//!  |                          Session ID                           |
//!  +---------------------------------------------------------------+
//!  |                          Stream ID                            |
//!  +---------------------------------------------------------------+
//!  |                           Term ID                             |
//!  +---------------------------------------------------------------+
//!  |                        Reserved Value                         |
//!  |                                                               |
//!  +---------------------------------------------------------------+
//!  |                            Payload                           ...
//! ...                                                              |
//!  +---------------------------------------------------------------+
//! ```
//!
//! `frameLength` is written last with a release store; a reader that
//! acquire-loads a positive length may safely read the whole frame.

use crate::concurrent::{atomic_buffer::AtomicBuffer, bits::Index};

pub const FRAME_LENGTH_FIELD_OFFSET: Index = 0;
pub const VERSION_FIELD_OFFSET: Index = 4;
pub const FLAGS_FIELD_OFFSET: Index = 5;
pub const TYPE_FIELD_OFFSET: Index = 6;
pub const TERM_OFFSET_FIELD_OFFSET: Index = 8;
pub const SESSION_ID_FIELD_OFFSET: Index = 12;
pub const STREAM_ID_FIELD_OFFSET: Index = 16;
pub const TERM_ID_FIELD_OFFSET: Index = 20;
pub const RESERVED_VALUE_FIELD_OFFSET: Index = 24;

/// Length of the frame header preceding the payload
pub const HEADER_LENGTH: Index = 32;

/// Every frame in a term starts on this alignment
pub const FRAME_ALIGNMENT: Index = 32;

pub const CURRENT_VERSION: u8 = 0x0;

pub const HDR_TYPE_PAD: u16 = 0x00;
pub const HDR_TYPE_DATA: u16 = 0x01;

pub const BEGIN_FRAG: u8 = 0x80;
pub const END_FRAG: u8 = 0x40;
pub const UNFRAGMENTED: u8 = BEGIN_FRAG | END_FRAG;

/// Largest message accepted for a term of the given length
#[inline]
pub const fn compute_max_message_length(term_length: Index) -> Index {
    term_length / 8
}

/// Acquire-load of the frame length; non-positive means uncommitted
#[inline]
pub fn frame_length_volatile(buffer: &AtomicBuffer, frame_offset: Index) -> i32 {
    buffer.get_i32_volatile(frame_offset + FRAME_LENGTH_FIELD_OFFSET)
}

/// Release-store committing the frame
#[inline]
pub fn frame_length_ordered(buffer: &AtomicBuffer, frame_offset: Index, frame_length: i32) {
    buffer.put_i32_ordered(frame_offset + FRAME_LENGTH_FIELD_OFFSET, frame_length);
}

#[inline]
pub fn frame_type(buffer: &AtomicBuffer, frame_offset: Index) -> u16 {
    buffer.get_u16(frame_offset + TYPE_FIELD_OFFSET)
}

#[inline]
pub fn set_frame_type(buffer: &AtomicBuffer, frame_offset: Index, frame_type: u16) {
    buffer.put_u16(frame_offset + TYPE_FIELD_OFFSET, frame_type);
}

#[inline]
pub fn is_padding_frame(buffer: &AtomicBuffer, frame_offset: Index) -> bool {
    frame_type(buffer, frame_offset) == HDR_TYPE_PAD
}

#[inline]
pub fn frame_flags(buffer: &AtomicBuffer, frame_offset: Index) -> u8 {
    buffer.get_u8(frame_offset + FLAGS_FIELD_OFFSET)
}

#[inline]
pub fn set_frame_flags(buffer: &AtomicBuffer, frame_offset: Index, flags: u8) {
    buffer.put_u8(frame_offset + FLAGS_FIELD_OFFSET, flags);
}
