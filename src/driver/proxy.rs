//! Typed command writes onto the to-driver ring

use crate::{
    command::{
        control_protocol, CorrelatedMessage, DestinationMessage, PublicationMessage,
        RemoveMessage, SubscriptionMessage,
    },
    concurrent::{
        atomic_buffer::{AlignedBuffer, AtomicBuffer},
        bits::Index,
        ringbuffer::ManyToOneRingBuffer,
    },
    error::Result,
};

const COMMAND_BUFFER_LENGTH: usize = 512;

/// Encodes control commands and writes them onto the to-driver ring.
///
/// The client id is claimed from the correlation counter at
/// construction; every command carries it plus a fresh correlation id.
/// Ring back-pressure propagates to the caller, whose retry policy it is.
#[derive(Debug)]
pub struct DriverProxy {
    to_driver: ManyToOneRingBuffer,
    client_id: i64,
}

impl DriverProxy {
    pub fn new(to_driver: ManyToOneRingBuffer) -> Self {
        let client_id = to_driver.next_correlation_id();
        Self {
            to_driver,
            client_id,
        }
    }

    pub fn client_id(&self) -> i64 {
        self.client_id
    }

    pub fn time_of_last_driver_keepalive(&self) -> i64 {
        self.to_driver.consumer_heartbeat_time()
    }

    pub fn next_correlation_id(&self) -> i64 {
        self.to_driver.next_correlation_id()
    }

    pub fn add_publication(&self, channel: &str, stream_id: i32) -> Result<i64> {
        let correlation_id = self.to_driver.next_correlation_id();
        let message = PublicationMessage {
            client_id: self.client_id,
            correlation_id,
            stream_id,
            channel: channel.to_string(),
        };

        self.write_command(control_protocol::ADD_PUBLICATION, |buffer| {
            message.encode(buffer, 0)
        })?;

        Ok(correlation_id)
    }

    pub fn remove_publication(&self, registration_id: i64) -> Result<i64> {
        let correlation_id = self.to_driver.next_correlation_id();
        let message = RemoveMessage {
            client_id: self.client_id,
            correlation_id,
            registration_id,
        };

        self.write_command(control_protocol::REMOVE_PUBLICATION, |buffer| {
            message.encode(buffer, 0)
        })?;

        Ok(correlation_id)
    }

    pub fn add_subscription(&self, channel: &str, stream_id: i32) -> Result<i64> {
        let correlation_id = self.to_driver.next_correlation_id();
        let message = SubscriptionMessage {
            client_id: self.client_id,
            correlation_id,
            registration_correlation_id: -1,
            stream_id,
            channel: channel.to_string(),
        };

        self.write_command(control_protocol::ADD_SUBSCRIPTION, |buffer| {
            message.encode(buffer, 0)
        })?;

        Ok(correlation_id)
    }

    pub fn remove_subscription(&self, registration_id: i64) -> Result<i64> {
        let correlation_id = self.to_driver.next_correlation_id();
        let message = RemoveMessage {
            client_id: self.client_id,
            correlation_id,
            registration_id,
        };

        self.write_command(control_protocol::REMOVE_SUBSCRIPTION, |buffer| {
            message.encode(buffer, 0)
        })?;

        Ok(correlation_id)
    }

    pub fn add_destination(&self, registration_id: i64, channel: &str) -> Result<i64> {
        let correlation_id = self.to_driver.next_correlation_id();
        let message = DestinationMessage {
            client_id: self.client_id,
            correlation_id,
            registration_id,
            channel: channel.to_string(),
        };

        self.write_command(control_protocol::ADD_DESTINATION, |buffer| {
            message.encode(buffer, 0)
        })?;

        Ok(correlation_id)
    }

    pub fn remove_destination(&self, registration_id: i64, channel: &str) -> Result<i64> {
        let correlation_id = self.to_driver.next_correlation_id();
        let message = DestinationMessage {
            client_id: self.client_id,
            correlation_id,
            registration_id,
            channel: channel.to_string(),
        };

        self.write_command(control_protocol::REMOVE_DESTINATION, |buffer| {
            message.encode(buffer, 0)
        })?;

        Ok(correlation_id)
    }

    pub fn send_client_keepalive(&self) -> Result<()> {
        let message = CorrelatedMessage {
            client_id: self.client_id,
            correlation_id: 0,
        };

        self.write_command(control_protocol::CLIENT_KEEPALIVE, |buffer| {
            message.encode(buffer, 0)
        })
    }

    fn write_command(
        &self,
        msg_type_id: i32,
        filler: impl FnOnce(&AtomicBuffer) -> Index,
    ) -> Result<()> {
        let mut scratch = AlignedBuffer::<COMMAND_BUFFER_LENGTH>::new();
        let buffer = scratch.buffer();
        let length = filler(&buffer);

        self.to_driver.write(msg_type_id, &buffer, 0, length)
    }
}
