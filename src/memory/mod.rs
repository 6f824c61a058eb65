//! Memory-mapped regions shared with the media driver

mod mapped;

pub use mapped::{BackingType, MappedFile};
