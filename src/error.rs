//! Error types and handling for the tern client

/// Result type alias for tern operations
pub type Result<T> = std::result::Result<T, TernError>;

/// Error codes reported by the driver in `ON_ERROR` responses.
pub mod driver_error_codes {
    pub const GENERIC_ERROR: i32 = 0;
    pub const INVALID_CHANNEL: i32 = 1;
    pub const UNKNOWN_SUBSCRIPTION: i32 = 2;
    pub const UNKNOWN_PUBLICATION: i32 = 3;
}

/// Errors raised by the tern client runtime
#[derive(Debug, thiserror::Error)]
pub enum TernError {
    /// I/O related errors (file operations, mmap, etc.)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Memory allocation or mapping failures
    #[error("Memory error: {message}")]
    Memory { message: String },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// The CnC file was produced by an incompatible driver
    #[error("CnC version mismatch: expected {expected}, found {actual}")]
    CncVersionMismatch { expected: i32, actual: i32 },

    /// The media driver stopped updating its heartbeat (fatal)
    #[error("Driver timeout: {message}")]
    DriverTimeout { message: String },

    /// The conductor duty cycle was starved beyond the inter-service timeout (fatal)
    #[error("Conductor service timeout: {message}")]
    ConductorServiceTimeout { message: String },

    /// The driver rejected a registration command
    #[error("Registration error {code} for correlation {correlation_id}: {message}")]
    Registration {
        correlation_id: i64,
        code: i32,
        message: String,
    },

    /// The broadcast producer overran this consumer between reads
    #[error("Broadcast receiver lapped by transmitter, {lapped_count} laps observed")]
    BroadcastLapped { lapped_count: i64 },

    /// Message rejected before any buffer mutation
    #[error("Message of {length} bytes exceeds maximum of {max}")]
    MessageTooLarge { length: i32, max: i32 },

    /// Ring buffer could not accept a record without overrunning the consumer
    #[error("Insufficient capacity in ring buffer for {requested} bytes")]
    InsufficientCapacity { requested: i32 },

    /// A protocol or lifecycle invariant was violated
    #[error("Illegal state: {message}")]
    IllegalState { message: String },

    /// A fragment or block handler reported a failure
    #[error("Handler error: {message}")]
    Handler { message: String },
}

impl TernError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create a memory error
    pub fn memory(message: impl Into<String>) -> Self {
        Self::Memory {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a driver timeout error
    pub fn driver_timeout(message: impl Into<String>) -> Self {
        Self::DriverTimeout {
            message: message.into(),
        }
    }

    /// Create a conductor service timeout error
    pub fn conductor_service_timeout(message: impl Into<String>) -> Self {
        Self::ConductorServiceTimeout {
            message: message.into(),
        }
    }

    /// Create an illegal state error
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Create a handler error
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Fatal errors close every handle and terminate the conductor thread
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DriverTimeout { .. } | Self::ConductorServiceTimeout { .. }
        )
    }
}

impl From<std::io::Error> for TernError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}
