#![allow(dead_code)]

//! In-process stand-in for the media driver.
//!
//! Creates the CnC file the way a driver would, consumes commands off
//! the to-driver ring, and transmits events on the to-clients
//! broadcast. Log buffers are real mapped files, so publications and
//! images in the client under test exercise the same lock-free path
//! they would against a production driver.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Once,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use tern::{
    cnc::{self, CncFile, CncLengths},
    command::{
        control_protocol, AvailableImageEvent, CorrelatedMessage, DestinationMessage,
        ErrorResponseEvent, PublicationMessage, PublicationReadyEvent, RemoveMessage,
        SubscriptionMessage, SubscriptionReadyEvent, UnavailableImageEvent,
    },
    concurrent::{
        atomic_buffer::{AlignedBuffer, AtomicBuffer},
        bits::Index,
        broadcast::BroadcastTransmitter,
        counters::CountersManager,
        logbuffer::{descriptor as log_descriptor, frame},
        ringbuffer::ManyToOneRingBuffer,
    },
    memory::MappedFile,
};

pub const TERM_LENGTH: Index = 64 * 1024;
pub const INITIAL_TERM_ID: i32 = 1000;
pub const MTU_LENGTH: i32 = 1408;

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

#[derive(Debug)]
pub enum Command {
    AddPublication(PublicationMessage),
    RemovePublication(RemoveMessage),
    AddSubscription(SubscriptionMessage),
    RemoveSubscription(RemoveMessage),
    Keepalive(CorrelatedMessage),
    AddDestination(DestinationMessage),
    RemoveDestination(DestinationMessage),
}

pub struct StubDriver {
    dir: PathBuf,
    cnc: CncFile,
    to_driver: ManyToOneRingBuffer,
    transmitter: BroadcastTransmitter,
    counters: CountersManager,
    next_session_id: i32,
    next_image_correlation_id: i64,
    // registration id -> (log path, session id), for wiring images
    publications: HashMap<i64, (PathBuf, i32)>,
    log_mappings: Vec<MappedFile>,
    pub keepalive_count: usize,
    pub removed_publications: Vec<i64>,
    pub removed_subscriptions: Vec<i64>,
}

impl StubDriver {
    pub fn start(dir: &Path) -> Self {
        std::fs::create_dir_all(dir).unwrap();
        cnc::create_file(dir, CncLengths::default(), 10_000_000_000).unwrap();

        let cnc = CncFile::map(dir).unwrap();
        let to_driver = ManyToOneRingBuffer::new(cnc.to_driver_buffer()).unwrap();
        let transmitter = BroadcastTransmitter::new(cnc.to_clients_buffer()).unwrap();
        let counters =
            CountersManager::new(cnc.counter_metadata_buffer(), cnc.counter_values_buffer());

        to_driver.update_consumer_heartbeat_time(now_ms());

        Self {
            dir: dir.to_path_buf(),
            cnc,
            to_driver,
            transmitter,
            counters,
            next_session_id: 7_000,
            next_image_correlation_id: 500_000,
            publications: HashMap::new(),
            log_mappings: Vec::new(),
            keepalive_count: 0,
            removed_publications: Vec::new(),
            removed_subscriptions: Vec::new(),
        }
    }

    pub fn heartbeat(&self) {
        self.to_driver.update_consumer_heartbeat_time(now_ms());
    }

    pub fn poll_commands(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        self.to_driver.read(
            |msg_type_id, buffer, offset, _length| {
                let command = match msg_type_id {
                    control_protocol::ADD_PUBLICATION => {
                        Some(Command::AddPublication(PublicationMessage::decode(buffer, offset)))
                    }
                    control_protocol::REMOVE_PUBLICATION => {
                        Some(Command::RemovePublication(RemoveMessage::decode(buffer, offset)))
                    }
                    control_protocol::ADD_SUBSCRIPTION => {
                        Some(Command::AddSubscription(SubscriptionMessage::decode(buffer, offset)))
                    }
                    control_protocol::REMOVE_SUBSCRIPTION => {
                        Some(Command::RemoveSubscription(RemoveMessage::decode(buffer, offset)))
                    }
                    control_protocol::CLIENT_KEEPALIVE => {
                        Some(Command::Keepalive(CorrelatedMessage::decode(buffer, offset)))
                    }
                    control_protocol::ADD_DESTINATION => {
                        Some(Command::AddDestination(DestinationMessage::decode(buffer, offset)))
                    }
                    control_protocol::REMOVE_DESTINATION => {
                        Some(Command::RemoveDestination(DestinationMessage::decode(buffer, offset)))
                    }
                    _ => None,
                };
                if let Some(command) = command {
                    commands.push(command);
                }
            },
            64,
        );
        commands
    }

    /// Drain commands, answering them the way a healthy driver would
    pub fn service(&mut self) {
        self.heartbeat();
        for command in self.poll_commands() {
            match command {
                Command::AddPublication(message) => self.on_add_publication(&message),
                Command::AddSubscription(message) => self.on_add_subscription(&message),
                Command::RemovePublication(message) => {
                    self.removed_publications.push(message.registration_id);
                    self.transmit_operation_success(message.correlation_id);
                }
                Command::RemoveSubscription(message) => {
                    self.removed_subscriptions.push(message.registration_id);
                    self.transmit_operation_success(message.correlation_id);
                }
                Command::Keepalive(_) => self.keepalive_count += 1,
                Command::AddDestination(message) | Command::RemoveDestination(message) => {
                    self.transmit_operation_success(message.correlation_id);
                }
            }
        }
    }

    /// Drain commands without answering, counting keepalives only
    pub fn service_without_responses(&mut self) {
        self.heartbeat();
        for command in self.poll_commands() {
            if let Command::Keepalive(_) = command {
                self.keepalive_count += 1;
            }
        }
    }

    fn on_add_publication(&mut self, message: &PublicationMessage) {
        let session_id = self.next_session_id;
        self.next_session_id += 1;

        let log_file_name = self.create_log_file(
            &format!("pub-{}.logbuffer", message.correlation_id),
            session_id,
            message.stream_id,
            message.correlation_id,
        );
        let limit_counter_id = self
            .counters
            .allocate(1, &format!("pub-lmt: {}", message.correlation_id))
            .unwrap();
        self.counters
            .set_counter_value(limit_counter_id, 1 << 40);

        self.publications.insert(
            message.correlation_id,
            (log_file_name.clone(), session_id),
        );

        self.transmit_publication_ready(&PublicationReadyEvent {
            correlation_id: message.correlation_id,
            session_id,
            stream_id: message.stream_id,
            position_limit_counter_id: limit_counter_id,
            log_file_name: log_file_name.to_string_lossy().into_owned(),
        });
    }

    fn on_add_subscription(&mut self, message: &SubscriptionMessage) {
        let channel_status_counter_id = self
            .counters
            .allocate(2, &format!("sub-status: {}", message.correlation_id))
            .unwrap();

        self.transmit_event(control_protocol::ON_SUBSCRIPTION_READY, |buffer| {
            SubscriptionReadyEvent {
                correlation_id: message.correlation_id,
                channel_status_counter_id,
            }
            .encode(buffer, 0)
        });
    }

    /// Wire a previously added publication's log to a subscription as a
    /// new image, returning the image correlation id.
    pub fn publish_image(
        &mut self,
        subscription_registration_id: i64,
        publication_registration_id: i64,
        source_identity: &str,
    ) -> i64 {
        let (log_file_name, session_id) = self
            .publications
            .get(&publication_registration_id)
            .cloned()
            .expect("unknown publication");

        let correlation_id = self.next_image_correlation_id;
        self.next_image_correlation_id += 1;

        let subscriber_position_id = self
            .counters
            .allocate(3, &format!("sub-pos: {}", correlation_id))
            .unwrap();

        self.transmit_available_image(&AvailableImageEvent {
            correlation_id,
            subscription_registration_id,
            session_id,
            subscriber_position_id,
            log_file_name: log_file_name.to_string_lossy().into_owned(),
            source_identity: source_identity.to_string(),
        });

        correlation_id
    }

    /// Re-announce an image with an already-used correlation id, as a
    /// duplicate event would arrive off the broadcast
    pub fn publish_image_replay(
        &mut self,
        correlation_id: i64,
        subscription_registration_id: i64,
        publication_registration_id: i64,
    ) {
        let (log_file_name, session_id) = self
            .publications
            .get(&publication_registration_id)
            .cloned()
            .expect("unknown publication");

        let subscriber_position_id = self
            .counters
            .allocate(3, &format!("sub-pos-replay: {}", correlation_id))
            .unwrap();

        self.transmit_available_image(&AvailableImageEvent {
            correlation_id,
            subscription_registration_id,
            session_id,
            subscriber_position_id,
            log_file_name: log_file_name.to_string_lossy().into_owned(),
            source_identity: "replay".to_string(),
        });
    }

    pub fn transmit_publication_ready(&self, event: &PublicationReadyEvent) {
        self.transmit_event(control_protocol::ON_PUBLICATION_READY, |buffer| {
            event.encode(buffer, 0)
        });
    }

    pub fn transmit_available_image(&self, event: &AvailableImageEvent) {
        self.transmit_event(control_protocol::ON_AVAILABLE_IMAGE, |buffer| {
            event.encode(buffer, 0)
        });
    }

    pub fn transmit_unavailable_image(
        &self,
        correlation_id: i64,
        subscription_registration_id: i64,
    ) {
        self.transmit_event(control_protocol::ON_UNAVAILABLE_IMAGE, |buffer| {
            UnavailableImageEvent {
                correlation_id,
                subscription_registration_id,
            }
            .encode(buffer, 0)
        });
    }

    pub fn transmit_error(&self, correlation_id: i64, error_code: i32, message: &str) {
        self.transmit_event(control_protocol::ON_ERROR, |buffer| {
            ErrorResponseEvent {
                offending_command_correlation_id: correlation_id,
                error_code,
                error_message: message.to_string(),
            }
            .encode(buffer, 0)
        });
    }

    pub fn transmit_operation_success(&self, correlation_id: i64) {
        self.transmit_event(control_protocol::ON_OPERATION_SUCCESS, |buffer| {
            buffer.put_i64(0, correlation_id);
            8
        });
    }

    fn transmit_event(&self, msg_type_id: i32, filler: impl FnOnce(&AtomicBuffer) -> Index) {
        let mut scratch = AlignedBuffer::<1024>::new();
        let buffer = scratch.buffer();
        let length = filler(&buffer);
        self.transmitter
            .transmit(msg_type_id, &buffer, 0, length)
            .unwrap();
    }

    fn create_log_file(
        &mut self,
        name: &str,
        session_id: i32,
        stream_id: i32,
        registration_id: i64,
    ) -> PathBuf {
        let path = self.dir.join(name);
        let mapped =
            MappedFile::create_new(&path, log_descriptor::compute_log_length(TERM_LENGTH)).unwrap();

        let meta = mapped.atomic_buffer_at(
            3 * TERM_LENGTH,
            log_descriptor::LOG_META_DATA_LENGTH,
        );
        meta.put_i64(
            log_descriptor::tail_counter_offset(0),
            (INITIAL_TERM_ID as i64) << 32,
        );
        meta.put_i32(log_descriptor::LOG_ACTIVE_PARTITION_INDEX_OFFSET, 0);
        meta.put_i64(log_descriptor::LOG_CORRELATION_ID_OFFSET, registration_id);
        meta.put_i32(log_descriptor::LOG_INITIAL_TERM_ID_OFFSET, INITIAL_TERM_ID);
        meta.put_i32(log_descriptor::LOG_DEFAULT_FRAME_HEADER_LENGTH_OFFSET, frame::HEADER_LENGTH);
        meta.put_i32(log_descriptor::LOG_MTU_LENGTH_OFFSET, MTU_LENGTH);
        log_descriptor::set_time_of_last_status_message(&meta, now_ms());

        let template = log_descriptor::default_frame_header(&meta);
        template.put_u8(frame::VERSION_FIELD_OFFSET, frame::CURRENT_VERSION);
        template.put_u8(frame::FLAGS_FIELD_OFFSET, frame::UNFRAGMENTED);
        template.put_u16(frame::TYPE_FIELD_OFFSET, frame::HDR_TYPE_DATA);
        template.put_i32(frame::SESSION_ID_FIELD_OFFSET, session_id);
        template.put_i32(frame::STREAM_ID_FIELD_OFFSET, stream_id);

        self.log_mappings.push(mapped);
        path
    }

    /// Refresh the status-message timestamp so publications stay
    /// connected during longer tests
    pub fn refresh_status_messages(&self) {
        for mapped in &self.log_mappings {
            let meta = mapped.atomic_buffer_at(
                3 * TERM_LENGTH,
                log_descriptor::LOG_META_DATA_LENGTH,
            );
            log_descriptor::set_time_of_last_status_message(&meta, now_ms());
        }
    }

    pub fn cnc(&self) -> &CncFile {
        &self.cnc
    }
}

/// Service the driver until the probe returns `Some`, or panic on
/// timeout. The probe runs between service passes, standing in for the
/// application thread.
pub fn pump_until<T>(
    driver: &mut StubDriver,
    timeout: Duration,
    mut probe: impl FnMut(&StubDriver) -> Option<T>,
) -> T {
    let deadline = Instant::now() + timeout;
    loop {
        driver.service();
        if let Some(value) = probe(driver) {
            return value;
        }
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        std::thread::sleep(Duration::from_millis(1));
    }
}
