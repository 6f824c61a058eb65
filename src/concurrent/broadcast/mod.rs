//! One-to-many broadcast stream carrying driver events to clients

pub mod descriptor;
mod receiver;
mod transmitter;

pub use receiver::{BroadcastReceiver, CopyBroadcastReceiver};
pub use transmitter::BroadcastTransmitter;
