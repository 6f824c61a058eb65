//! Protocol plumbing between the client and the media driver

pub mod dispatcher;
mod listener;
mod proxy;

pub use listener::{DriverEvent, DriverListenerAdapter};
pub use proxy::DriverProxy;
