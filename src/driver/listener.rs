//! Demultiplexing driver events off the to-clients broadcast

use crate::{
    command::{
        control_protocol, AvailableImageEvent, ErrorResponseEvent, OperationSucceededEvent,
        PublicationReadyEvent, SubscriptionReadyEvent, UnavailableImageEvent,
    },
    concurrent::broadcast::CopyBroadcastReceiver,
    error::Result,
};

/// One typed event from the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    PublicationReady(PublicationReadyEvent),
    SubscriptionReady(SubscriptionReadyEvent),
    AvailableImage(AvailableImageEvent),
    UnavailableImage(UnavailableImageEvent),
    OperationSucceeded(OperationSucceededEvent),
    Error(ErrorResponseEvent),
}

/// Drains the broadcast stream into typed events.
///
/// The broadcast carries every client's responses; events for other
/// clients are indistinguishable here and are surfaced too — correlation
/// against pending registrations is the conductor's job. Unrecognized
/// type ids are skipped.
#[derive(Debug)]
pub struct DriverListenerAdapter {
    receiver: CopyBroadcastReceiver,
}

impl DriverListenerAdapter {
    pub fn new(receiver: CopyBroadcastReceiver) -> Self {
        Self { receiver }
    }

    /// Receive the next event if one is available.
    ///
    /// `BroadcastLapped` propagates after the receiver has already
    /// resynchronized; the caller reports the loss and keeps polling.
    pub fn receive(&mut self) -> Result<Option<DriverEvent>> {
        loop {
            let mut decoded = None;

            let consumed = self.receiver.receive(|msg_type_id, buffer, offset, _length| {
                decoded = match msg_type_id {
                    control_protocol::ON_PUBLICATION_READY => Some(DriverEvent::PublicationReady(
                        PublicationReadyEvent::decode(buffer, offset),
                    )),
                    control_protocol::ON_SUBSCRIPTION_READY => Some(DriverEvent::SubscriptionReady(
                        SubscriptionReadyEvent::decode(buffer, offset),
                    )),
                    control_protocol::ON_AVAILABLE_IMAGE => Some(DriverEvent::AvailableImage(
                        AvailableImageEvent::decode(buffer, offset),
                    )),
                    control_protocol::ON_UNAVAILABLE_IMAGE => Some(DriverEvent::UnavailableImage(
                        UnavailableImageEvent::decode(buffer, offset),
                    )),
                    control_protocol::ON_OPERATION_SUCCESS => Some(DriverEvent::OperationSucceeded(
                        OperationSucceededEvent::decode(buffer, offset),
                    )),
                    control_protocol::ON_ERROR => {
                        Some(DriverEvent::Error(ErrorResponseEvent::decode(buffer, offset)))
                    }
                    _ => None,
                };
            })?;

            if consumed == 0 {
                return Ok(None);
            }
            if decoded.is_some() {
                return Ok(decoded);
            }
            // unknown event type: skip and keep draining
        }
    }
}
