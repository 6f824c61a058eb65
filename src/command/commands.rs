//! Client-to-driver command encodings
//!
//! Every command starts with `[clientId:i64 | correlationId:i64]`.
//! Strings are `i32` length-prefixed UTF-8. Encoders return the encoded
//! length so callers can hand exact record lengths to the ring.

use crate::concurrent::{atomic_buffer::AtomicBuffer, bits::Index};

/// Common prefix, also the whole of a keepalive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelatedMessage {
    pub client_id: i64,
    pub correlation_id: i64,
}

impl CorrelatedMessage {
    pub const LENGTH: Index = 16;

    pub fn encode(&self, buffer: &AtomicBuffer, offset: Index) -> Index {
        buffer.put_i64(offset, self.client_id);
        buffer.put_i64(offset + 8, self.correlation_id);
        Self::LENGTH
    }

    pub fn decode(buffer: &AtomicBuffer, offset: Index) -> Self {
        Self {
            client_id: buffer.get_i64(offset),
            correlation_id: buffer.get_i64(offset + 8),
        }
    }
}

/// `ADD_PUBLICATION`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationMessage {
    pub client_id: i64,
    pub correlation_id: i64,
    pub stream_id: i32,
    pub channel: String,
}

impl PublicationMessage {
    pub fn encode(&self, buffer: &AtomicBuffer, offset: Index) -> Index {
        buffer.put_i64(offset, self.client_id);
        buffer.put_i64(offset + 8, self.correlation_id);
        buffer.put_i32(offset + 16, self.stream_id);
        20 + buffer.put_string(offset + 20, &self.channel)
    }

    pub fn decode(buffer: &AtomicBuffer, offset: Index) -> Self {
        Self {
            client_id: buffer.get_i64(offset),
            correlation_id: buffer.get_i64(offset + 8),
            stream_id: buffer.get_i32(offset + 16),
            channel: buffer.get_string(offset + 20),
        }
    }
}

/// `ADD_SUBSCRIPTION`; `registration_correlation_id` is −1 when the
/// subscription is not tied to an earlier registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionMessage {
    pub client_id: i64,
    pub correlation_id: i64,
    pub registration_correlation_id: i64,
    pub stream_id: i32,
    pub channel: String,
}

impl SubscriptionMessage {
    pub fn encode(&self, buffer: &AtomicBuffer, offset: Index) -> Index {
        buffer.put_i64(offset, self.client_id);
        buffer.put_i64(offset + 8, self.correlation_id);
        buffer.put_i64(offset + 16, self.registration_correlation_id);
        buffer.put_i32(offset + 24, self.stream_id);
        28 + buffer.put_string(offset + 28, &self.channel)
    }

    pub fn decode(buffer: &AtomicBuffer, offset: Index) -> Self {
        Self {
            client_id: buffer.get_i64(offset),
            correlation_id: buffer.get_i64(offset + 8),
            registration_correlation_id: buffer.get_i64(offset + 16),
            stream_id: buffer.get_i32(offset + 24),
            channel: buffer.get_string(offset + 28),
        }
    }
}

/// `REMOVE_PUBLICATION` / `REMOVE_SUBSCRIPTION`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveMessage {
    pub client_id: i64,
    pub correlation_id: i64,
    pub registration_id: i64,
}

impl RemoveMessage {
    pub const LENGTH: Index = 24;

    pub fn encode(&self, buffer: &AtomicBuffer, offset: Index) -> Index {
        buffer.put_i64(offset, self.client_id);
        buffer.put_i64(offset + 8, self.correlation_id);
        buffer.put_i64(offset + 16, self.registration_id);
        Self::LENGTH
    }

    pub fn decode(buffer: &AtomicBuffer, offset: Index) -> Self {
        Self {
            client_id: buffer.get_i64(offset),
            correlation_id: buffer.get_i64(offset + 8),
            registration_id: buffer.get_i64(offset + 16),
        }
    }
}

/// `ADD_DESTINATION` / `REMOVE_DESTINATION` against a publication's
/// registration id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationMessage {
    pub client_id: i64,
    pub correlation_id: i64,
    pub registration_id: i64,
    pub channel: String,
}

impl DestinationMessage {
    pub fn encode(&self, buffer: &AtomicBuffer, offset: Index) -> Index {
        buffer.put_i64(offset, self.client_id);
        buffer.put_i64(offset + 8, self.correlation_id);
        buffer.put_i64(offset + 16, self.registration_id);
        24 + buffer.put_string(offset + 24, &self.channel)
    }

    pub fn decode(buffer: &AtomicBuffer, offset: Index) -> Self {
        Self {
            client_id: buffer.get_i64(offset),
            correlation_id: buffer.get_i64(offset + 8),
            registration_id: buffer.get_i64(offset + 16),
            channel: buffer.get_string(offset + 24),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> Vec<u8> {
        vec![0u8; 512]
    }

    #[test]
    fn test_publication_message_round_trip() {
        let mut backing = scratch();
        let buffer = AtomicBuffer::wrap_slice(&mut backing);

        let msg = PublicationMessage {
            client_id: 3,
            correlation_id: 17,
            stream_id: 1001,
            channel: "tern:ipc".to_string(),
        };
        let length = msg.encode(&buffer, 0);
        assert_eq!(length, 20 + 4 + 8);
        assert_eq!(PublicationMessage::decode(&buffer, 0), msg);
    }

    #[test]
    fn test_subscription_message_round_trip() {
        let mut backing = scratch();
        let buffer = AtomicBuffer::wrap_slice(&mut backing);

        let msg = SubscriptionMessage {
            client_id: 3,
            correlation_id: 18,
            registration_correlation_id: -1,
            stream_id: 1001,
            channel: "tern:udp?endpoint=localhost:40123".to_string(),
        };
        let length = msg.encode(&buffer, 8);
        assert_eq!(length, 28 + 4 + msg.channel.len() as Index);
        assert_eq!(SubscriptionMessage::decode(&buffer, 8), msg);
    }

    #[test]
    fn test_fixed_length_messages() {
        let mut backing = scratch();
        let buffer = AtomicBuffer::wrap_slice(&mut backing);

        let keepalive = CorrelatedMessage {
            client_id: 9,
            correlation_id: 0,
        };
        assert_eq!(keepalive.encode(&buffer, 0), CorrelatedMessage::LENGTH);
        assert_eq!(CorrelatedMessage::decode(&buffer, 0), keepalive);

        let remove = RemoveMessage {
            client_id: 9,
            correlation_id: 31,
            registration_id: 17,
        };
        assert_eq!(remove.encode(&buffer, 0), RemoveMessage::LENGTH);
        assert_eq!(RemoveMessage::decode(&buffer, 0), remove);
    }
}
