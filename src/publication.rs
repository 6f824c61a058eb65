//! Publisher handle appending message fragments to a stream

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use crate::{
    concurrent::{
        atomic_buffer::AtomicBuffer,
        bits::{self, Index},
        logbuffer::{
            descriptor, frame, AppendResult, BufferClaim, HeaderWriter, LogBuffers, TermAppender,
            TERM_APPENDER_TRIPPED,
        },
        position::UnsafeBufferPosition,
    },
    conductor::{epoch_ms, ClientLink},
};

/// No subscriber has been seen within the connection timeout
pub const NOT_CONNECTED: i64 = -1;
/// The publication limit has been reached; retry after consumers advance
pub const BACK_PRESSURED: i64 = -2;
/// An administrative action (term rotation) occurred; retry immediately
pub const ADMIN_ACTION: i64 = -3;
/// The publication has been closed
pub const PUBLICATION_CLOSED: i64 = -4;
/// The stream position has reached the maximum the log can express
pub const MAX_POSITION_EXCEEDED: i64 = -5;

/// Reserved-value supplier invoked right before a frame commits
pub type ReservedValueSupplier<'a> = dyn Fn(&AtomicBuffer, Index, Index) -> i64 + 'a;

/// Publisher of message fragments on a `(channel, streamId)` endpoint.
///
/// All offers are non-blocking and thread-safe; flow-control conditions
/// come back as negative sentinel positions.
#[derive(Debug)]
pub struct Publication {
    link: Weak<ClientLink>,
    log_meta_data_buffer: AtomicBuffer,
    channel: String,
    registration_id: i64,
    stream_id: i32,
    session_id: i32,
    initial_term_id: i32,
    max_payload_length: Index,
    max_message_length: Index,
    position_bits_to_shift: i32,
    max_possible_position: i64,
    publication_limit: UnsafeBufferPosition,
    connection_timeout_ms: i64,
    is_closed: AtomicBool,
    appenders: [TermAppender; descriptor::PARTITION_COUNT],
    header_writer: HeaderWriter,
    log_buffers: Arc<LogBuffers>,
}

impl Publication {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        link: Weak<ClientLink>,
        channel: String,
        registration_id: i64,
        stream_id: i32,
        session_id: i32,
        publication_limit: UnsafeBufferPosition,
        log_buffers: Arc<LogBuffers>,
        connection_timeout_ms: i64,
    ) -> Self {
        let log_meta_data_buffer = log_buffers.meta_data_buffer();
        let term_length = log_buffers.term_length();
        let appenders = [
            TermAppender::new(log_buffers.atomic_buffer(0), log_meta_data_buffer, 0),
            TermAppender::new(log_buffers.atomic_buffer(1), log_meta_data_buffer, 1),
            TermAppender::new(log_buffers.atomic_buffer(2), log_meta_data_buffer, 2),
        ];
        let header_writer = HeaderWriter::new(&descriptor::default_frame_header(
            &log_meta_data_buffer,
        ));

        Self {
            link,
            log_meta_data_buffer,
            channel,
            registration_id,
            stream_id,
            session_id,
            initial_term_id: descriptor::initial_term_id(&log_meta_data_buffer),
            max_payload_length: descriptor::mtu_length(&log_meta_data_buffer)
                - frame::HEADER_LENGTH,
            max_message_length: frame::compute_max_message_length(term_length),
            position_bits_to_shift: bits::number_of_trailing_zeroes(term_length),
            max_possible_position: (term_length as i64) << 31,
            publication_limit,
            connection_timeout_ms,
            is_closed: AtomicBool::new(false),
            appenders,
            header_writer,
            log_buffers,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn initial_term_id(&self) -> i32 {
        self.initial_term_id
    }

    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    pub fn term_buffer_length(&self) -> Index {
        self.appenders[0].term_buffer().capacity()
    }

    /// Largest message `offer` accepts (fragmented past the MTU)
    pub fn max_message_length(&self) -> Index {
        self.max_message_length
    }

    /// Largest payload carried by a single frame
    pub fn max_payload_length(&self) -> Index {
        self.max_payload_length
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    /// Has a subscriber been active within the connection timeout?
    pub fn is_connected(&self) -> bool {
        !self.is_closed()
            && self.is_connected_at(descriptor::time_of_last_status_message(
                &self.log_meta_data_buffer,
            ))
    }

    /// Current stream position, or `PUBLICATION_CLOSED`
    pub fn position(&self) -> i64 {
        if self.is_closed() {
            return PUBLICATION_CLOSED;
        }

        let partition_index = descriptor::active_partition_index(&self.log_meta_data_buffer);
        let raw_tail = self.appenders[partition_index as usize].raw_tail_volatile();
        let term_offset = descriptor::term_offset(raw_tail, self.term_buffer_length() as i64);

        descriptor::compute_position(
            descriptor::term_id(raw_tail),
            term_offset,
            self.position_bits_to_shift,
            self.initial_term_id,
        )
    }

    /// Position limit beyond which offers are back-pressured
    pub fn position_limit(&self) -> i64 {
        if self.is_closed() {
            return PUBLICATION_CLOSED;
        }
        self.publication_limit.get_volatile()
    }

    /// Non-blocking publish of a message.
    ///
    /// Returns the new stream position, or `NOT_CONNECTED`,
    /// `BACK_PRESSURED`, `ADMIN_ACTION`, `PUBLICATION_CLOSED`, or
    /// `MAX_POSITION_EXCEEDED`.
    pub fn offer(&self, msg: &[u8]) -> i64 {
        self.offer_with_reserved_value(msg, None)
    }

    pub fn offer_with_reserved_value(
        &self,
        msg: &[u8],
        reserved_value_supplier: Option<&ReservedValueSupplier>,
    ) -> i64 {
        if self.is_closed() {
            return PUBLICATION_CLOSED;
        }

        let length = msg.len() as Index;
        self.check_max_message_length(length);

        let limit = self.publication_limit.get_volatile();
        let partition_index = descriptor::active_partition_index(&self.log_meta_data_buffer);
        let term_appender = &self.appenders[partition_index as usize];
        let raw_tail = term_appender.raw_tail_volatile();
        let term_offset = raw_tail & 0xFFFF_FFFF;
        let position = descriptor::compute_term_begin_position(
            descriptor::term_id(raw_tail),
            self.position_bits_to_shift,
            self.initial_term_id,
        ) + term_offset;

        if position >= self.max_possible_position {
            return MAX_POSITION_EXCEEDED;
        }

        if position < limit {
            let result = if length <= self.max_payload_length {
                term_appender.append_unfragmented_message(
                    &self.header_writer,
                    msg,
                    reserved_value_supplier,
                )
            } else {
                term_appender.append_fragmented_message(
                    &self.header_writer,
                    msg,
                    self.max_payload_length,
                    reserved_value_supplier,
                )
            };

            self.new_position(partition_index, term_offset as Index, position, result)
        } else if self.is_connected_at(descriptor::time_of_last_status_message(
            &self.log_meta_data_buffer,
        )) {
            BACK_PRESSURED
        } else {
            NOT_CONNECTED
        }
    }

    /// Claim a range for zero-copy writing; commit or abort via the
    /// `BufferClaim`. Only for messages within a single frame.
    pub fn try_claim(&self, length: Index, buffer_claim: &mut BufferClaim) -> i64 {
        if self.is_closed() {
            return PUBLICATION_CLOSED;
        }

        assert!(
            length <= self.max_payload_length,
            "claim of {} bytes exceeds max payload length of {}",
            length,
            self.max_payload_length
        );

        let limit = self.publication_limit.get_volatile();
        let partition_index = descriptor::active_partition_index(&self.log_meta_data_buffer);
        let term_appender = &self.appenders[partition_index as usize];
        let raw_tail = term_appender.raw_tail_volatile();
        let term_offset = raw_tail & 0xFFFF_FFFF;
        let position = descriptor::compute_term_begin_position(
            descriptor::term_id(raw_tail),
            self.position_bits_to_shift,
            self.initial_term_id,
        ) + term_offset;

        if position >= self.max_possible_position {
            return MAX_POSITION_EXCEEDED;
        }

        if position < limit {
            let result = term_appender.claim(&self.header_writer, length, buffer_claim);
            self.new_position(partition_index, term_offset as Index, position, result)
        } else if self.is_connected_at(descriptor::time_of_last_status_message(
            &self.log_meta_data_buffer,
        )) {
            BACK_PRESSURED
        } else {
            NOT_CONNECTED
        }
    }

    /// Close the publication. Idempotent; subsequent offers return
    /// `PUBLICATION_CLOSED`. Log buffers are released by the conductor
    /// after the linger period.
    pub fn close(&self) {
        if !self.is_closed.swap(true, Ordering::AcqRel) {
            if let Some(link) = self.link.upgrade() {
                link.release_publication(self.registration_id);
            }
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.is_closed.store(true, Ordering::Release);
    }

    pub(crate) fn log_buffers(&self) -> Arc<LogBuffers> {
        Arc::clone(&self.log_buffers)
    }

    fn new_position(
        &self,
        index: i32,
        current_tail: Index,
        position: i64,
        result: AppendResult,
    ) -> i64 {
        if result.term_offset > 0 {
            return (position - current_tail as i64) + result.term_offset;
        }

        if result.term_offset == TERM_APPENDER_TRIPPED {
            let next_index = descriptor::next_partition_index(index);
            self.appenders[next_index as usize].set_tail_term_id(result.term_id + 1);
            descriptor::set_active_partition_index(&self.log_meta_data_buffer, next_index);
        }

        ADMIN_ACTION
    }

    fn is_connected_at(&self, time_of_last_status_message: i64) -> bool {
        epoch_ms() <= time_of_last_status_message + self.connection_timeout_ms
    }

    fn check_max_message_length(&self, length: Index) {
        assert!(
            length <= self.max_message_length,
            "message of {} bytes exceeds max message length of {}",
            length,
            self.max_message_length
        );
    }
}
