//! Partitioned term log buffers shared between publisher and subscribers

pub mod descriptor;
pub mod frame;
mod header;
mod log_buffers;
mod term_appender;
mod term_reader;
mod term_scanner;

pub use header::{Header, HeaderWriter};
pub use log_buffers::LogBuffers;
pub use term_appender::{AppendResult, BufferClaim, TermAppender, TERM_APPENDER_FAILED, TERM_APPENDER_TRIPPED};
pub use term_reader::{read as term_read, ReadOutcome};
pub use term_scanner::scan as term_block_scan;

use crate::error::Result;

/// Action returned by a controlled poll handler for each fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlledPollAction {
    /// Abort the current poll and do not advance past this fragment
    Abort,
    /// Stop after this fragment, committing the position at its end
    Break,
    /// Continue, committing the position at this fragment's end now
    Commit,
    /// Continue; the position commits once at the end of the poll
    Continue,
}

/// Handler for message fragments read out of a term.
///
/// Runs on the polling thread; an `Err` is routed to the configured
/// error handler and the poll stops with the position already advanced
/// past the faulting frame.
pub type FragmentHandler<'a> = dyn FnMut(&[u8], &Header) -> Result<()> + 'a;

/// Handler for fragments under controlled flow
pub type ControlledFragmentHandler<'a> = dyn FnMut(&[u8], &Header) -> Result<ControlledPollAction> + 'a;

/// Handler for contiguous blocks of committed frames
pub type BlockHandler<'a> = dyn FnMut(&[u8], i32, i32) -> Result<()> + 'a;
