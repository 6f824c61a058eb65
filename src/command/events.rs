//! Driver-to-client event encodings carried on the broadcast stream

use crate::concurrent::{atomic_buffer::AtomicBuffer, bits::Index};

/// `ON_PUBLICATION_READY`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationReadyEvent {
    pub correlation_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub position_limit_counter_id: i32,
    pub log_file_name: String,
}

impl PublicationReadyEvent {
    pub fn encode(&self, buffer: &AtomicBuffer, offset: Index) -> Index {
        buffer.put_i64(offset, self.correlation_id);
        buffer.put_i32(offset + 8, self.session_id);
        buffer.put_i32(offset + 12, self.stream_id);
        buffer.put_i32(offset + 16, self.position_limit_counter_id);
        20 + buffer.put_string(offset + 20, &self.log_file_name)
    }

    pub fn decode(buffer: &AtomicBuffer, offset: Index) -> Self {
        Self {
            correlation_id: buffer.get_i64(offset),
            session_id: buffer.get_i32(offset + 8),
            stream_id: buffer.get_i32(offset + 12),
            position_limit_counter_id: buffer.get_i32(offset + 16),
            log_file_name: buffer.get_string(offset + 20),
        }
    }
}

/// `ON_SUBSCRIPTION_READY`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionReadyEvent {
    pub correlation_id: i64,
    pub channel_status_counter_id: i32,
}

impl SubscriptionReadyEvent {
    pub const LENGTH: Index = 12;

    pub fn encode(&self, buffer: &AtomicBuffer, offset: Index) -> Index {
        buffer.put_i64(offset, self.correlation_id);
        buffer.put_i32(offset + 8, self.channel_status_counter_id);
        Self::LENGTH
    }

    pub fn decode(buffer: &AtomicBuffer, offset: Index) -> Self {
        Self {
            correlation_id: buffer.get_i64(offset),
            channel_status_counter_id: buffer.get_i32(offset + 8),
        }
    }
}

/// `ON_AVAILABLE_IMAGE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableImageEvent {
    pub correlation_id: i64,
    pub subscription_registration_id: i64,
    pub session_id: i32,
    pub subscriber_position_id: i32,
    pub log_file_name: String,
    pub source_identity: String,
}

impl AvailableImageEvent {
    pub fn encode(&self, buffer: &AtomicBuffer, offset: Index) -> Index {
        buffer.put_i64(offset, self.correlation_id);
        buffer.put_i64(offset + 8, self.subscription_registration_id);
        buffer.put_i32(offset + 16, self.session_id);
        buffer.put_i32(offset + 20, self.subscriber_position_id);
        let mut length = 24;
        length += buffer.put_string(offset + length, &self.log_file_name);
        length += buffer.put_string(offset + length, &self.source_identity);
        length
    }

    pub fn decode(buffer: &AtomicBuffer, offset: Index) -> Self {
        let log_file_name = buffer.get_string(offset + 24);
        let source_identity_offset = offset + 24 + 4 + log_file_name.len() as Index;
        Self {
            correlation_id: buffer.get_i64(offset),
            subscription_registration_id: buffer.get_i64(offset + 8),
            session_id: buffer.get_i32(offset + 16),
            subscriber_position_id: buffer.get_i32(offset + 20),
            log_file_name,
            source_identity: buffer.get_string(source_identity_offset),
        }
    }
}

/// `ON_UNAVAILABLE_IMAGE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnavailableImageEvent {
    pub correlation_id: i64,
    pub subscription_registration_id: i64,
}

impl UnavailableImageEvent {
    pub const LENGTH: Index = 16;

    pub fn encode(&self, buffer: &AtomicBuffer, offset: Index) -> Index {
        buffer.put_i64(offset, self.correlation_id);
        buffer.put_i64(offset + 8, self.subscription_registration_id);
        Self::LENGTH
    }

    pub fn decode(buffer: &AtomicBuffer, offset: Index) -> Self {
        Self {
            correlation_id: buffer.get_i64(offset),
            subscription_registration_id: buffer.get_i64(offset + 8),
        }
    }
}

/// `ON_OPERATION_SUCCESS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSucceededEvent {
    pub correlation_id: i64,
}

impl OperationSucceededEvent {
    pub const LENGTH: Index = 8;

    pub fn encode(&self, buffer: &AtomicBuffer, offset: Index) -> Index {
        buffer.put_i64(offset, self.correlation_id);
        Self::LENGTH
    }

    pub fn decode(buffer: &AtomicBuffer, offset: Index) -> Self {
        Self {
            correlation_id: buffer.get_i64(offset),
        }
    }
}

/// `ON_ERROR`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponseEvent {
    pub offending_command_correlation_id: i64,
    pub error_code: i32,
    pub error_message: String,
}

impl ErrorResponseEvent {
    pub fn encode(&self, buffer: &AtomicBuffer, offset: Index) -> Index {
        buffer.put_i64(offset, self.offending_command_correlation_id);
        buffer.put_i32(offset + 8, self.error_code);
        12 + buffer.put_string(offset + 12, &self.error_message)
    }

    pub fn decode(buffer: &AtomicBuffer, offset: Index) -> Self {
        Self {
            offending_command_correlation_id: buffer.get_i64(offset),
            error_code: buffer.get_i32(offset + 8),
            error_message: buffer.get_string(offset + 12),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publication_ready_round_trip() {
        let mut backing = vec![0u8; 512];
        let buffer = AtomicBuffer::wrap_slice(&mut backing);

        let event = PublicationReadyEvent {
            correlation_id: 42,
            session_id: -177,
            stream_id: 1001,
            position_limit_counter_id: 6,
            log_file_name: "/dev/shm/tern/publications/42.logbuffer".to_string(),
        };
        event.encode(&buffer, 0);
        assert_eq!(PublicationReadyEvent::decode(&buffer, 0), event);
    }

    #[test]
    fn test_available_image_round_trip_with_two_strings() {
        let mut backing = vec![0u8; 512];
        let buffer = AtomicBuffer::wrap_slice(&mut backing);

        let event = AvailableImageEvent {
            correlation_id: 99,
            subscription_registration_id: 43,
            session_id: 7,
            subscriber_position_id: 11,
            log_file_name: "/dev/shm/tern/images/99.logbuffer".to_string(),
            source_identity: "127.0.0.1:40123".to_string(),
        };
        let length = event.encode(&buffer, 0);
        assert_eq!(
            length,
            24 + 4
                + event.log_file_name.len() as Index
                + 4
                + event.source_identity.len() as Index
        );
        assert_eq!(AvailableImageEvent::decode(&buffer, 0), event);
    }

    #[test]
    fn test_error_response_round_trip() {
        let mut backing = vec![0u8; 512];
        let buffer = AtomicBuffer::wrap_slice(&mut backing);

        let event = ErrorResponseEvent {
            offending_command_correlation_id: 13,
            error_code: 1,
            error_message: "invalid channel".to_string(),
        };
        event.encode(&buffer, 0);
        assert_eq!(ErrorResponseEvent::decode(&buffer, 0), event);
    }
}
