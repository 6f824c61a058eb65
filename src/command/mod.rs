//! Wire messages exchanged with the driver over the CnC sub-buffers

mod commands;
mod events;

pub use commands::{
    CorrelatedMessage, DestinationMessage, PublicationMessage, RemoveMessage, SubscriptionMessage,
};
pub use events::{
    AvailableImageEvent, ErrorResponseEvent, OperationSucceededEvent, PublicationReadyEvent,
    SubscriptionReadyEvent, UnavailableImageEvent,
};

/// Message type ids for the control protocol in both directions
pub mod control_protocol {
    // client -> driver commands
    pub const ADD_PUBLICATION: i32 = 0x01;
    pub const REMOVE_PUBLICATION: i32 = 0x02;
    pub const CLIENT_KEEPALIVE: i32 = 0x03;
    pub const ADD_SUBSCRIPTION: i32 = 0x04;
    pub const REMOVE_SUBSCRIPTION: i32 = 0x05;
    pub const ADD_DESTINATION: i32 = 0x06;
    pub const REMOVE_DESTINATION: i32 = 0x07;

    // driver -> clients events
    pub const ON_ERROR: i32 = 0x0F01;
    pub const ON_AVAILABLE_IMAGE: i32 = 0x0F02;
    pub const ON_PUBLICATION_READY: i32 = 0x0F03;
    pub const ON_OPERATION_SUCCESS: i32 = 0x0F04;
    pub const ON_UNAVAILABLE_IMAGE: i32 = 0x0F05;
    pub const ON_SUBSCRIPTION_READY: i32 = 0x0F06;
}
