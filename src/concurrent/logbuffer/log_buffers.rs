//! Mapped log buffer file shared with the driver

use std::path::Path;

use crate::{
    concurrent::{atomic_buffer::AtomicBuffer, bits::Index},
    error::Result,
    memory::MappedFile,
};

use super::descriptor;

/// One mapped log file carved into three term partitions plus the
/// metadata section. Shared between publication and image sides via
/// `Arc`; the mapping stays alive as long as any handle does.
#[derive(Debug)]
pub struct LogBuffers {
    mapped: MappedFile,
    term_length: Index,
}

impl LogBuffers {
    /// Map a log file the driver created, validating its geometry
    pub fn map_existing(path: impl AsRef<Path>) -> Result<Self> {
        let mapped = MappedFile::map_existing(path)?;
        if mapped.len() <= descriptor::LOG_META_DATA_LENGTH as usize {
            return Err(crate::error::TernError::illegal_state(format!(
                "log file too short for metadata section, length={}",
                mapped.len()
            )));
        }
        let term_length = descriptor::compute_term_length(mapped.len());
        descriptor::check_term_length(term_length)?;

        Ok(Self {
            mapped,
            term_length,
        })
    }

    pub fn term_length(&self) -> Index {
        self.term_length
    }

    /// Buffer for partition `0..=2`, or the metadata section at
    /// `LOG_META_DATA_SECTION_INDEX`
    pub fn atomic_buffer(&self, index: usize) -> AtomicBuffer {
        assert!(index <= descriptor::LOG_META_DATA_SECTION_INDEX);

        if index < descriptor::PARTITION_COUNT {
            self.mapped
                .atomic_buffer_at(index as Index * self.term_length, self.term_length)
        } else {
            self.mapped.atomic_buffer_at(
                descriptor::PARTITION_COUNT as Index * self.term_length,
                descriptor::LOG_META_DATA_LENGTH,
            )
        }
    }

    pub fn meta_data_buffer(&self) -> AtomicBuffer {
        self.atomic_buffer(descriptor::LOG_META_DATA_SECTION_INDEX)
    }
}
