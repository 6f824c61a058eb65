//! Consumer-side view of one publisher's stream within a subscription

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::concurrent::{
    agent::ErrorHandler,
    atomic_buffer::AtomicBuffer,
    bits::{self, Index},
    logbuffer::{
        descriptor, frame, term_block_scan, term_read, ControlledPollAction, Header, LogBuffers,
    },
    position::UnsafeBufferPosition,
};
use crate::error::Result;

/// Sentinel returned by every poll once the image is closed
pub const IMAGE_CLOSED: i32 = -1;

/// The lock-free reader over one session's partitioned term log.
///
/// At most one poll may be in progress per image at a time; sharing an
/// image across threads requires external coordination. The closed flag
/// is release-stored by the conductor and acquire-loaded here, so a poll
/// never touches the term buffers after observing the close.
pub struct Image {
    term_buffers: [AtomicBuffer; descriptor::PARTITION_COUNT],
    subscriber_position: UnsafeBufferPosition,
    log_buffers: Arc<LogBuffers>,
    source_identity: String,
    is_closed: AtomicBool,
    error_handler: Arc<ErrorHandler>,
    correlation_id: i64,
    subscription_registration_id: i64,
    session_id: i32,
    initial_term_id: i32,
    term_length_mask: Index,
    position_bits_to_shift: i32,
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("session_id", &self.session_id)
            .field("correlation_id", &self.correlation_id)
            .field(
                "subscription_registration_id",
                &self.subscription_registration_id,
            )
            .field("source_identity", &self.source_identity)
            .field("is_closed", &self.is_closed)
            .finish_non_exhaustive()
    }
}

impl Image {
    pub(crate) fn new(
        session_id: i32,
        correlation_id: i64,
        subscription_registration_id: i64,
        source_identity: String,
        subscriber_position: UnsafeBufferPosition,
        log_buffers: Arc<LogBuffers>,
        error_handler: Arc<ErrorHandler>,
    ) -> Self {
        let term_buffers = [
            log_buffers.atomic_buffer(0),
            log_buffers.atomic_buffer(1),
            log_buffers.atomic_buffer(2),
        ];
        let capacity = term_buffers[0].capacity();
        let initial_term_id = descriptor::initial_term_id(&log_buffers.meta_data_buffer());

        Self {
            term_buffers,
            subscriber_position,
            log_buffers,
            source_identity,
            is_closed: AtomicBool::new(false),
            error_handler,
            correlation_id,
            subscription_registration_id,
            session_id,
            initial_term_id,
            term_length_mask: capacity - 1,
            position_bits_to_shift: bits::number_of_trailing_zeroes(capacity),
        }
    }

    pub fn term_buffer_length(&self) -> Index {
        self.term_buffers[0].capacity()
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    pub fn subscription_registration_id(&self) -> i64 {
        self.subscription_registration_id
    }

    pub fn initial_term_id(&self) -> i32 {
        self.initial_term_id
    }

    /// Identity of the sending publisher, as reported by the driver
    pub fn source_identity(&self) -> &str {
        &self.source_identity
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.is_closed.store(true, Ordering::Release);
    }

    pub(crate) fn log_buffers(&self) -> Arc<LogBuffers> {
        Arc::clone(&self.log_buffers)
    }

    /// Position this image has been consumed to, or `IMAGE_CLOSED`
    pub fn position(&self) -> i64 {
        if self.is_closed() {
            return IMAGE_CLOSED as i64;
        }
        self.subscriber_position.get()
    }

    /// Deliver up to `fragment_limit` committed fragments; the
    /// subscriber position commits once at the end of the pass.
    pub fn poll<F>(&self, handler: &mut F, fragment_limit: i32) -> i32
    where
        F: FnMut(&[u8], &Header) -> Result<()>,
    {
        if self.is_closed() {
            return IMAGE_CLOSED;
        }

        let position = self.subscriber_position.get();
        let term_offset = (position & self.term_length_mask as i64) as Index;
        let term_buffer = self.term_buffers
            [descriptor::index_by_position(position, self.position_bits_to_shift) as usize];
        let mut header = Header::new(term_buffer, self.initial_term_id, self.position_bits_to_shift);

        let outcome = term_read(
            &term_buffer,
            term_offset,
            handler,
            fragment_limit,
            &mut header,
            self.error_handler.as_ref(),
        );

        let new_position = position + (outcome.offset - term_offset) as i64;
        if new_position > position {
            self.subscriber_position.set_ordered(new_position);
        }

        outcome.fragments_read
    }

    /// Poll with per-fragment flow control.
    ///
    /// `Commit` publishes the end-of-fragment position immediately;
    /// `Break` stops with the position at the end of the handled
    /// fragment; `Abort` rewinds to the fragment start without counting
    /// it. A handler error is routed to the error handler with the scan
    /// already past the faulting frame.
    pub fn controlled_poll<F>(&self, handler: &mut F, fragment_limit: i32) -> i32
    where
        F: FnMut(&[u8], &Header) -> Result<ControlledPollAction>,
    {
        if self.is_closed() {
            return IMAGE_CLOSED;
        }

        let mut position = self.subscriber_position.get();
        let mut term_offset = (position & self.term_length_mask as i64) as Index;
        let term_buffer = self.term_buffers
            [descriptor::index_by_position(position, self.position_bits_to_shift) as usize];
        let mut header = Header::new(term_buffer, self.initial_term_id, self.position_bits_to_shift);
        let capacity = term_buffer.capacity();

        let mut fragments_read = 0;
        let mut offset = term_offset;

        while fragments_read < fragment_limit && offset < capacity {
            let frame_length = frame::frame_length_volatile(&term_buffer, offset);
            if frame_length <= 0 {
                break;
            }

            let frame_offset = offset;
            offset += bits::align(frame_length, frame::FRAME_ALIGNMENT);

            if frame::is_padding_frame(&term_buffer, frame_offset) {
                continue;
            }

            header.set_buffer(term_buffer);
            header.set_offset(frame_offset);

            let payload = term_buffer.as_slice(
                frame_offset + frame::HEADER_LENGTH,
                frame_length - frame::HEADER_LENGTH,
            );

            match handler(payload, &header) {
                Ok(ControlledPollAction::Abort) => {
                    offset = frame_offset;
                    break;
                }
                Ok(ControlledPollAction::Break) => {
                    fragments_read += 1;
                    break;
                }
                Ok(ControlledPollAction::Commit) => {
                    fragments_read += 1;
                    position += (offset - term_offset) as i64;
                    term_offset = offset;
                    self.subscriber_position.set_ordered(position);
                }
                Ok(ControlledPollAction::Continue) => {
                    fragments_read += 1;
                }
                Err(e) => {
                    (self.error_handler)(&e);
                    break;
                }
            }
        }

        let new_position = position + (offset - term_offset) as i64;
        if new_position > position {
            self.subscriber_position.set_ordered(new_position);
        }

        fragments_read
    }

    /// Deliver one contiguous byte range of committed frames, never
    /// spanning partitions or mixing in padding. The position advances
    /// by exactly the scanned byte count, padding included, which is
    /// what rotates the reader to the next partition.
    pub fn block_poll<F>(&self, handler: &mut F, block_length_limit: Index) -> i32
    where
        F: FnMut(&[u8], i32, i32) -> Result<()>,
    {
        if self.is_closed() {
            return IMAGE_CLOSED;
        }

        let position = self.subscriber_position.get();
        let term_offset = (position & self.term_length_mask as i64) as Index;
        let term_buffer = self.term_buffers
            [descriptor::index_by_position(position, self.position_bits_to_shift) as usize];
        let limit = std::cmp::min(term_offset + block_length_limit, term_buffer.capacity());

        let resulting_offset = term_block_scan(&term_buffer, term_offset, limit);
        let bytes_consumed = resulting_offset - term_offset;

        if resulting_offset > term_offset {
            if !frame::is_padding_frame(&term_buffer, term_offset) {
                let term_id = term_buffer.get_i32(term_offset + frame::TERM_ID_FIELD_OFFSET);
                let block = term_buffer.as_slice(term_offset, bytes_consumed);
                if let Err(e) = handler(block, self.session_id, term_id) {
                    (self.error_handler)(&e);
                }
            }

            self.subscriber_position
                .set_ordered(position + bytes_consumed as i64);
        }

        bytes_consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrent::logbuffer::{frame::HDR_TYPE_DATA, HeaderWriter, TermAppender};
    use crate::memory::MappedFile;

    const TERM_LENGTH: Index = 64 * 1024;
    const SESSION_ID: i32 = 7;
    const INITIAL_TERM_ID: i32 = 100;

    struct Fixture {
        _dir: tempfile::TempDir,
        log_buffers: Arc<LogBuffers>,
        _counters_backing: Box<[u8]>,
        subscriber_position: UnsafeBufferPosition,
        errors: Arc<std::sync::Mutex<Vec<String>>>,
        image: Arc<Image>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.logbuffer");
        MappedFile::create_new(&path, descriptor::compute_log_length(TERM_LENGTH)).unwrap();

        let log_buffers = Arc::new(LogBuffers::map_existing(&path).unwrap());
        let meta = log_buffers.meta_data_buffer();
        meta.put_i32(descriptor::LOG_INITIAL_TERM_ID_OFFSET, INITIAL_TERM_ID);
        meta.put_i32(descriptor::LOG_MTU_LENGTH_OFFSET, 1408);
        meta.put_i64(descriptor::tail_counter_offset(0), (INITIAL_TERM_ID as i64) << 32);

        let template = descriptor::default_frame_header(&meta);
        template.put_u8(frame::VERSION_FIELD_OFFSET, frame::CURRENT_VERSION);
        template.put_u8(frame::FLAGS_FIELD_OFFSET, frame::UNFRAGMENTED);
        template.put_u16(frame::TYPE_FIELD_OFFSET, HDR_TYPE_DATA);
        template.put_i32(frame::SESSION_ID_FIELD_OFFSET, SESSION_ID);
        template.put_i32(frame::STREAM_ID_FIELD_OFFSET, 1001);

        let mut counters_backing = vec![0u8; 4096].into_boxed_slice();
        let counters = AtomicBuffer::wrap_slice(&mut counters_backing);
        let subscriber_position = UnsafeBufferPosition::new(counters, 0);

        let errors = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let error_handler: Arc<ErrorHandler> = Arc::new(move |e| {
            sink.lock().unwrap().push(e.to_string());
        });

        let image = Arc::new(Image::new(
            SESSION_ID,
            42,
            17,
            "tern:ipc".to_string(),
            subscriber_position,
            Arc::clone(&log_buffers),
            error_handler,
        ));

        Fixture {
            _dir: dir,
            log_buffers,
            _counters_backing: counters_backing,
            subscriber_position,
            errors,
            image,
        }
    }

    fn appender_for(f: &Fixture, partition: i32) -> (TermAppender, HeaderWriter) {
        let meta = f.log_buffers.meta_data_buffer();
        let appender = TermAppender::new(
            f.log_buffers.atomic_buffer(partition as usize),
            meta,
            partition,
        );
        let writer = HeaderWriter::new(&descriptor::default_frame_header(&meta));
        (appender, writer)
    }

    #[test]
    fn test_poll_delivers_fragments_and_advances_position() {
        let f = fixture();
        let (appender, writer) = appender_for(&f, 0);

        appender.append_unfragmented_message(&writer, b"first", None);
        appender.append_unfragmented_message(&writer, b"second!", None);

        let mut seen = Vec::new();
        let count = f.image.poll(
            &mut |payload: &[u8], header: &Header| {
                assert_eq!(header.session_id(), SESSION_ID);
                seen.push(payload.to_vec());
                Ok(())
            },
            10,
        );

        assert_eq!(count, 2);
        assert_eq!(seen, vec![b"first".to_vec(), b"second!".to_vec()]);
        assert_eq!(f.image.position(), 128);

        // nothing further committed
        assert_eq!(f.image.poll(&mut |_, _| Ok(()), 10), 0);
        assert_eq!(f.image.position(), 128);
    }

    #[test]
    fn test_polls_return_closed_sentinel() {
        let f = fixture();
        f.image.close();

        assert_eq!(f.image.poll(&mut |_, _| Ok(()), 10), IMAGE_CLOSED);
        assert_eq!(
            f.image
                .controlled_poll(&mut |_, _| Ok(ControlledPollAction::Continue), 10),
            IMAGE_CLOSED
        );
        assert_eq!(f.image.block_poll(&mut |_, _, _| Ok(()), 4096), IMAGE_CLOSED);
        assert_eq!(f.image.position(), IMAGE_CLOSED as i64);
    }

    #[test]
    fn test_controlled_poll_commit_break_abort() {
        let f = fixture();
        let (appender, writer) = appender_for(&f, 0);

        // three fragments, each 64 aligned bytes
        for msg in [&b"one....."[..], b"two.....", b"three..."] {
            appender.append_unfragmented_message(&writer, msg, None);
        }

        let mut actions = vec![
            ControlledPollAction::Continue,
            ControlledPollAction::Commit,
            ControlledPollAction::Abort,
        ]
        .into_iter();

        let count = f
            .image
            .controlled_poll(&mut |_, _| Ok(actions.next().unwrap()), 10);

        // the aborted fragment is not counted and the position holds at
        // the committed end of the second fragment
        assert_eq!(count, 2);
        assert_eq!(f.image.position(), 128);

        // re-polling redelivers the aborted fragment
        let mut redelivered = Vec::new();
        f.image.poll(
            &mut |payload: &[u8], _: &Header| {
                redelivered.push(payload.to_vec());
                Ok(())
            },
            10,
        );
        assert_eq!(redelivered, vec![b"three...".to_vec()]);
    }

    #[test]
    fn test_controlled_poll_abort_first_leaves_position_unchanged() {
        let f = fixture();
        let (appender, writer) = appender_for(&f, 0);
        appender.append_unfragmented_message(&writer, b"payload", None);

        let count = f
            .image
            .controlled_poll(&mut |_, _| Ok(ControlledPollAction::Abort), 10);

        assert_eq!(count, 0);
        assert_eq!(f.image.position(), 0);
    }

    #[test]
    fn test_controlled_poll_break_commits_fragment_end() {
        let f = fixture();
        let (appender, writer) = appender_for(&f, 0);
        appender.append_unfragmented_message(&writer, b"a", None);
        appender.append_unfragmented_message(&writer, b"b", None);

        let count = f
            .image
            .controlled_poll(&mut |_, _| Ok(ControlledPollAction::Break), 10);

        assert_eq!(count, 1);
        assert_eq!(f.image.position(), 64);
    }

    #[test]
    fn test_controlled_poll_handler_error_skips_faulting_frame() {
        let f = fixture();
        let (appender, writer) = appender_for(&f, 0);
        appender.append_unfragmented_message(&writer, b"good", None);
        appender.append_unfragmented_message(&writer, b"bad!", None);

        let mut call = 0;
        let count = f.image.controlled_poll(
            &mut |_, _| {
                call += 1;
                if call == 2 {
                    Err(crate::error::TernError::handler("boom"))
                } else {
                    Ok(ControlledPollAction::Continue)
                }
            },
            10,
        );

        assert_eq!(count, 1);
        // position advanced past the faulting frame
        assert_eq!(f.image.position(), 128);
        assert_eq!(f.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_block_poll_excludes_padding_and_rotates() {
        let f = fixture();
        let (appender, writer) = appender_for(&f, 0);

        // one 128-byte frame (96-byte payload), then a claim too large
        // for the remainder trips the term and pads it to the end
        appender.append_unfragmented_message(&writer, &[5u8; 96], None);
        let trip = appender.append_unfragmented_message(
            &writer,
            &vec![6u8; TERM_LENGTH as usize - 128],
            None,
        );
        assert_eq!(
            trip.term_offset,
            crate::concurrent::logbuffer::TERM_APPENDER_TRIPPED
        );

        let mut blocks = Vec::new();
        let consumed = f.image.block_poll(
            &mut |block: &[u8], session_id, term_id| {
                assert_eq!(session_id, SESSION_ID);
                assert_eq!(term_id, INITIAL_TERM_ID);
                blocks.push(block.len());
                Ok(())
            },
            TERM_LENGTH,
        );

        assert_eq!(consumed, 128);
        assert_eq!(blocks, vec![128]);
        assert_eq!(f.image.position(), 128);

        // next call consumes the padding silently and rotates
        let consumed = f.image.block_poll(
            &mut |_, _, _| panic!("padding must not reach the handler"),
            TERM_LENGTH,
        );
        assert_eq!(consumed, TERM_LENGTH - 128);
        assert_eq!(f.image.position(), TERM_LENGTH as i64);
        assert_eq!(
            descriptor::index_by_position(f.image.position(), bits::number_of_trailing_zeroes(TERM_LENGTH)),
            1
        );
    }

    #[test]
    fn test_position_is_monotonic_across_poll_variants() {
        let f = fixture();
        let (appender, writer) = appender_for(&f, 0);

        for _ in 0..6 {
            appender.append_unfragmented_message(&writer, &[1u8; 16], None);
        }

        let mut last = f.image.position();
        f.image.poll(&mut |_, _| Ok(()), 2);
        assert!(f.image.position() >= last);

        last = f.image.position();
        f.image
            .controlled_poll(&mut |_, _| Ok(ControlledPollAction::Commit), 2);
        assert!(f.image.position() >= last);

        last = f.image.position();
        f.image.block_poll(&mut |_, _, _| Ok(()), 4096);
        assert!(f.image.position() >= last);
    }

    #[test]
    fn test_subscriber_position_visible_via_counter() {
        let f = fixture();
        let (appender, writer) = appender_for(&f, 0);
        appender.append_unfragmented_message(&writer, b"observable", None);

        f.image.poll(&mut |_, _| Ok(()), 10);
        // release-stored so the driver side can acquire-load it
        assert_eq!(f.subscriber_position.get_volatile(), 64);
    }
}
