//! Command-and-control file shared between driver and clients
//!
//! One mapping, six regions:
//!
//! ```text
//!  +----------------------------+
//!  |   version + metadata       |  (padded to 2 cache lines)
//!  +----------------------------+
//!  |   to-driver ring buffer    |
//!  +----------------------------+
//!  |   to-clients broadcast     |
//!  +----------------------------+
//!  |   counters metadata        |
//!  +----------------------------+
//!  |   counters values          |
//!  +----------------------------+
//!  |   error log                |
//!  +----------------------------+
//! ```
//!
//! The driver creates and sizes the file; clients refuse to start unless
//! the version matches exactly.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    concurrent::{
        atomic_buffer::AtomicBuffer,
        bits::{Index, CACHE_LINE_LENGTH},
    },
    error::{Result, TernError},
    memory::MappedFile,
};

/// File name within the driver directory
pub const CNC_FILE: &str = "cnc.dat";

/// Protocol version this client speaks
pub const CNC_VERSION: i32 = 5;

pub const CNC_VERSION_FIELD_OFFSET: Index = 0;
pub const TO_DRIVER_BUFFER_LENGTH_FIELD_OFFSET: Index = 4;
pub const TO_CLIENTS_BUFFER_LENGTH_FIELD_OFFSET: Index = 8;
pub const COUNTER_METADATA_BUFFER_LENGTH_FIELD_OFFSET: Index = 12;
pub const COUNTER_VALUES_BUFFER_LENGTH_FIELD_OFFSET: Index = 16;
pub const CLIENT_LIVENESS_TIMEOUT_FIELD_OFFSET: Index = 24;
pub const ERROR_LOG_BUFFER_LENGTH_FIELD_OFFSET: Index = 32;

/// Metadata header length, padded to twice the cache line length
pub const META_DATA_LENGTH: Index = CACHE_LINE_LENGTH * 2;

const _: () = assert!(META_DATA_LENGTH >= ERROR_LOG_BUFFER_LENGTH_FIELD_OFFSET + 4);

/// Path of the CnC file under a driver directory
pub fn file_path(dir: impl AsRef<Path>) -> PathBuf {
    dir.as_ref().join(CNC_FILE)
}

/// Mapped CnC file with the metadata decoded and validated
#[derive(Debug, Clone)]
pub struct CncFile {
    mapped: Arc<MappedFile>,
    to_driver_buffer_length: Index,
    to_clients_buffer_length: Index,
    counter_metadata_buffer_length: Index,
    counter_values_buffer_length: Index,
    error_log_buffer_length: Index,
    client_liveness_timeout_ns: i64,
}

impl CncFile {
    /// Map `cnc.dat` under the driver directory and validate the version
    pub fn map(dir: impl AsRef<Path>) -> Result<Self> {
        Self::map_file(file_path(dir))
    }

    pub fn map_file(path: impl AsRef<Path>) -> Result<Self> {
        let mapped = MappedFile::map_existing(path)?;
        let buffer = mapped.atomic_buffer();

        let version = buffer.get_i32_volatile(CNC_VERSION_FIELD_OFFSET);
        if version != CNC_VERSION {
            return Err(TernError::CncVersionMismatch {
                expected: CNC_VERSION,
                actual: version,
            });
        }

        let cnc = Self {
            to_driver_buffer_length: buffer.get_i32(TO_DRIVER_BUFFER_LENGTH_FIELD_OFFSET),
            to_clients_buffer_length: buffer.get_i32(TO_CLIENTS_BUFFER_LENGTH_FIELD_OFFSET),
            counter_metadata_buffer_length: buffer
                .get_i32(COUNTER_METADATA_BUFFER_LENGTH_FIELD_OFFSET),
            counter_values_buffer_length: buffer.get_i32(COUNTER_VALUES_BUFFER_LENGTH_FIELD_OFFSET),
            error_log_buffer_length: buffer.get_i32(ERROR_LOG_BUFFER_LENGTH_FIELD_OFFSET),
            client_liveness_timeout_ns: buffer.get_i64(CLIENT_LIVENESS_TIMEOUT_FIELD_OFFSET),
            mapped: Arc::new(mapped),
        };

        let expected_length = META_DATA_LENGTH
            + cnc.to_driver_buffer_length
            + cnc.to_clients_buffer_length
            + cnc.counter_metadata_buffer_length
            + cnc.counter_values_buffer_length
            + cnc.error_log_buffer_length;
        if (cnc.mapped.len() as Index) < expected_length {
            return Err(TernError::illegal_state(format!(
                "CnC file truncated: {} bytes, metadata requires {}",
                cnc.mapped.len(),
                expected_length
            )));
        }

        Ok(cnc)
    }

    /// Keep-alive timeout the driver applies to clients, in nanoseconds
    pub fn client_liveness_timeout_ns(&self) -> i64 {
        self.client_liveness_timeout_ns
    }

    /// The mapping backing every sub-buffer; hold it as long as any
    /// buffer view is in use
    pub fn mapped_file(&self) -> Arc<MappedFile> {
        Arc::clone(&self.mapped)
    }

    pub fn to_driver_buffer(&self) -> AtomicBuffer {
        self.mapped
            .atomic_buffer_at(META_DATA_LENGTH, self.to_driver_buffer_length)
    }

    pub fn to_clients_buffer(&self) -> AtomicBuffer {
        self.mapped.atomic_buffer_at(
            META_DATA_LENGTH + self.to_driver_buffer_length,
            self.to_clients_buffer_length,
        )
    }

    pub fn counter_metadata_buffer(&self) -> AtomicBuffer {
        self.mapped.atomic_buffer_at(
            META_DATA_LENGTH + self.to_driver_buffer_length + self.to_clients_buffer_length,
            self.counter_metadata_buffer_length,
        )
    }

    pub fn counter_values_buffer(&self) -> AtomicBuffer {
        self.mapped.atomic_buffer_at(
            META_DATA_LENGTH
                + self.to_driver_buffer_length
                + self.to_clients_buffer_length
                + self.counter_metadata_buffer_length,
            self.counter_values_buffer_length,
        )
    }

    pub fn error_log_buffer(&self) -> AtomicBuffer {
        self.mapped.atomic_buffer_at(
            META_DATA_LENGTH
                + self.to_driver_buffer_length
                + self.to_clients_buffer_length
                + self.counter_metadata_buffer_length
                + self.counter_values_buffer_length,
            self.error_log_buffer_length,
        )
    }
}

/// Sizes for creating a CnC file. The create side belongs to the driver;
/// this exists for in-process driver stand-ins and tooling.
#[derive(Debug, Clone, Copy)]
pub struct CncLengths {
    pub to_driver_buffer: Index,
    pub to_clients_buffer: Index,
    pub counter_metadata_buffer: Index,
    pub counter_values_buffer: Index,
    pub error_log_buffer: Index,
}

impl Default for CncLengths {
    fn default() -> Self {
        use crate::concurrent::{broadcast, ringbuffer};
        Self {
            to_driver_buffer: 64 * 1024 + ringbuffer::descriptor::TRAILER_LENGTH,
            to_clients_buffer: 64 * 1024 + broadcast::descriptor::TRAILER_LENGTH,
            counter_metadata_buffer: 64 * 1024,
            counter_values_buffer: 16 * 1024,
            error_log_buffer: 16 * 1024,
        }
    }
}

impl CncLengths {
    pub fn total_file_length(&self) -> usize {
        (META_DATA_LENGTH
            + self.to_driver_buffer
            + self.to_clients_buffer
            + self.counter_metadata_buffer
            + self.counter_values_buffer
            + self.error_log_buffer) as usize
    }
}

/// Create and initialize a CnC file the way a driver would
pub fn create_file(
    dir: impl AsRef<Path>,
    lengths: CncLengths,
    client_liveness_timeout_ns: i64,
) -> Result<MappedFile> {
    let mapped = MappedFile::create_new(file_path(dir), lengths.total_file_length())?;
    let buffer = mapped.atomic_buffer();

    buffer.put_i32(TO_DRIVER_BUFFER_LENGTH_FIELD_OFFSET, lengths.to_driver_buffer);
    buffer.put_i32(TO_CLIENTS_BUFFER_LENGTH_FIELD_OFFSET, lengths.to_clients_buffer);
    buffer.put_i32(
        COUNTER_METADATA_BUFFER_LENGTH_FIELD_OFFSET,
        lengths.counter_metadata_buffer,
    );
    buffer.put_i32(
        COUNTER_VALUES_BUFFER_LENGTH_FIELD_OFFSET,
        lengths.counter_values_buffer,
    );
    buffer.put_i32(ERROR_LOG_BUFFER_LENGTH_FIELD_OFFSET, lengths.error_log_buffer);
    buffer.put_i64(CLIENT_LIVENESS_TIMEOUT_FIELD_OFFSET, client_liveness_timeout_ns);
    buffer.put_i32_ordered(CNC_VERSION_FIELD_OFFSET, CNC_VERSION);

    Ok(mapped)
}

// keep the metadata header aligned for its i64 field
const _: () = assert!(CLIENT_LIVENESS_TIMEOUT_FIELD_OFFSET % 8 == 0);
