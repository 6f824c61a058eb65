//! Lock-free many-to-one ring buffer carrying driver commands

pub mod descriptor;
mod many_to_one;

pub use many_to_one::ManyToOneRingBuffer;
