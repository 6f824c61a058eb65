//! # tern — shared-memory publish/subscribe messaging client
//!
//! `tern` is the client-side runtime of a high-throughput, low-latency
//! pub/sub transport. A co-located media driver process owns the network
//! and the I/O; this library owns the in-process lifecycle, the
//! shared-memory command-and-control protocol with the driver, and the
//! lock-free log-buffer access path.
//!
//! ## Architecture
//!
//! ```text
//!  application threads                conductor thread
//!  ┌──────────────────┐   commands   ┌───────────────────┐
//!  │ Publication      │──────┐       │  ClientConductor  │
//!  │ Subscription     │      ▼       │  - registrations  │
//!  │ Image polls      │   to-driver  │  - image lifecycle│
//!  └───────┬──────────┘     ring ────┼─▶ media driver    │
//!          │                         │       │           │
//!          │   term log buffers      │  to-clients       │
//!          └──── (mmap, lock-free) ◀─┴── broadcast ◀─────┘
//! ```
//!
//! The application never blocks and never makes a syscall on the offer
//! or poll path. The conductor reconciles driver events, emits
//! keepalives, and is the only mutator of client state.
//!
//! ## Quick start
//!
//! ```no_run
//! use tern::{Context, Tern};
//!
//! let client = Tern::connect(Context::new())?;
//!
//! let reg = client.add_publication("tern:ipc", 1001)?;
//! let publication = loop {
//!     if let Some(publication) = client.find_publication(reg)? {
//!         break publication;
//!     }
//!     std::thread::yield_now();
//! };
//!
//! while publication.offer(b"hello") < 0 {
//!     std::thread::yield_now();
//! }
//! # Ok::<(), tern::TernError>(())
//! ```

#[cfg(not(target_has_atomic = "64"))]
compile_error!("tern requires lock-free 64-bit atomics on the target ISA");

pub mod cnc;
pub mod command;
pub mod concurrent;
pub mod context;
pub mod driver;
pub mod error;
pub mod memory;

mod client;
mod conductor;
mod image;
mod publication;
mod subscription;

pub use client::Tern;
pub use concurrent::logbuffer::ControlledPollAction;
pub use context::{Context, IdleStrategyChoice};
pub use error::{Result, TernError};
pub use image::{Image, IMAGE_CLOSED};
pub use publication::{
    Publication, ADMIN_ACTION, BACK_PRESSURED, MAX_POSITION_EXCEEDED, NOT_CONNECTED,
    PUBLICATION_CLOSED,
};
pub use subscription::Subscription;
