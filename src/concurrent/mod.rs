//! Concurrency primitives and shared-memory protocols
//!
//! Everything under this module is lock-free on the hot path: the only
//! synchronization is atomics with release/acquire ordering and the
//! ring/broadcast protocols built on them.

pub mod agent;
pub mod atomic_buffer;
pub mod bits;
pub mod broadcast;
pub mod counters;
pub mod error_log;
pub mod logbuffer;
pub mod position;
pub mod ringbuffer;

pub use agent::{
    Agent, AgentRunner, BackoffIdleStrategy, BusySpinIdleStrategy, ErrorHandler, IdleStrategy,
    SleepingIdleStrategy, YieldingIdleStrategy,
};
pub use atomic_buffer::AtomicBuffer;
pub use bits::Index;
pub use position::UnsafeBufferPosition;
