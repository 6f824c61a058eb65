//! The client conductor: a single-threaded agent reconciling
//! application requests, driver responses, image lifecycle, and
//! keepalives
//!
//! The conductor is the only mutator of registrations, subscriptions,
//! and image lists. Application threads interact through `ClientLink`:
//! `add_*` writes the command and parks a pending registration,
//! `find_*` observes the registration state with a single acquire load,
//! and handle `close()` enqueues a release request the conductor drains
//! on its next pass. No lock is ever held across a user callback.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc, Mutex, OnceLock, RwLock,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    cnc::CncFile,
    concurrent::{
        agent::{Agent, ErrorHandler},
        atomic_buffer::AtomicBuffer,
        logbuffer::LogBuffers,
        position::UnsafeBufferPosition,
    },
    context::Context,
    driver::{DriverEvent, DriverListenerAdapter, DriverProxy},
    error::{Result, TernError},
    image::Image,
    publication::Publication,
    subscription::Subscription,
};

/// Milliseconds since the UNIX epoch, the clock shared with the driver
pub(crate) fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

const MAX_EVENTS_PER_PASS: usize = 10;

// registration states, published with release ordering by the conductor
const AWAITING: u8 = 0;
const READY: u8 = 1;
const ERRORED: u8 = 2;

/// Error code used when a registration times out without a response
pub const REGISTRATION_TIMEOUT_ERROR_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegistrationKind {
    Publication,
    Subscription,
}

/// A pending or completed driver-acknowledged registration
#[derive(Debug)]
pub(crate) struct Registration {
    kind: RegistrationKind,
    channel: String,
    stream_id: i32,
    registered_at_ms: i64,
    state: AtomicU8,
    error: Mutex<Option<(i32, String)>>,
    publication: OnceLock<Arc<Publication>>,
    subscription: OnceLock<Arc<Subscription>>,
}

impl Registration {
    fn new(kind: RegistrationKind, channel: String, stream_id: i32, now_ms: i64) -> Self {
        Self {
            kind,
            channel,
            stream_id,
            registered_at_ms: now_ms,
            state: AtomicU8::new(AWAITING),
            error: Mutex::new(None),
            publication: OnceLock::new(),
            subscription: OnceLock::new(),
        }
    }

    fn transition_to_error(&self, code: i32, message: String) {
        *self.error.lock().expect("error lock poisoned") = Some((code, message));
        self.state.store(ERRORED, Ordering::Release);
    }
}

#[derive(Debug)]
enum Release {
    Publication(i64),
    Subscription(i64),
}

/// State shared between the application-facing client and the conductor
#[derive(Debug)]
pub(crate) struct ClientLink {
    proxy: DriverProxy,
    registrations: RwLock<HashMap<i64, Arc<Registration>>>,
    releases: Mutex<Vec<Release>>,
    driver_active: AtomicBool,
    // the CnC mapping must outlive every buffer view handed out
    _cnc: CncFile,
}

impl ClientLink {
    pub(crate) fn new(proxy: DriverProxy, cnc: CncFile) -> Self {
        Self {
            proxy,
            registrations: RwLock::new(HashMap::new()),
            releases: Mutex::new(Vec::new()),
            driver_active: AtomicBool::new(true),
            _cnc: cnc,
        }
    }

    pub(crate) fn proxy(&self) -> &DriverProxy {
        &self.proxy
    }

    pub(crate) fn is_driver_active(&self) -> bool {
        self.driver_active.load(Ordering::Acquire)
    }

    fn verify_driver_active(&self) -> Result<()> {
        if !self.is_driver_active() {
            return Err(TernError::driver_timeout("driver is inactive"));
        }
        Ok(())
    }

    /// Send `ADD_PUBLICATION` and park a pending registration.
    ///
    /// The map's write lock is held across the ring write so the
    /// conductor cannot observe the driver's response before the entry
    /// is in place.
    pub(crate) fn add_publication(&self, channel: &str, stream_id: i32) -> Result<i64> {
        self.verify_driver_active()?;

        let mut registrations = self.registrations.write().expect("registrations poisoned");
        let correlation_id = self.proxy.add_publication(channel, stream_id)?;
        registrations.insert(
            correlation_id,
            Arc::new(Registration::new(
                RegistrationKind::Publication,
                channel.to_string(),
                stream_id,
                epoch_ms(),
            )),
        );

        Ok(correlation_id)
    }

    pub(crate) fn add_subscription(&self, channel: &str, stream_id: i32) -> Result<i64> {
        self.verify_driver_active()?;

        let mut registrations = self.registrations.write().expect("registrations poisoned");
        let correlation_id = self.proxy.add_subscription(channel, stream_id)?;
        registrations.insert(
            correlation_id,
            Arc::new(Registration::new(
                RegistrationKind::Subscription,
                channel.to_string(),
                stream_id,
                epoch_ms(),
            )),
        );

        Ok(correlation_id)
    }

    /// Non-blocking lookup of a pending publication registration
    pub(crate) fn find_publication(&self, registration_id: i64) -> Result<Option<Arc<Publication>>> {
        let entry = {
            self.registrations
                .read()
                .expect("registrations poisoned")
                .get(&registration_id)
                .cloned()
        };

        let Some(registration) = entry else {
            return Ok(None);
        };

        match registration.state.load(Ordering::Acquire) {
            READY => Ok(registration.publication.get().cloned()),
            ERRORED => Err(self.consume_errored(registration_id, &registration)),
            _ => Ok(None),
        }
    }

    pub(crate) fn find_subscription(
        &self,
        registration_id: i64,
    ) -> Result<Option<Arc<Subscription>>> {
        let entry = {
            self.registrations
                .read()
                .expect("registrations poisoned")
                .get(&registration_id)
                .cloned()
        };

        let Some(registration) = entry else {
            return Ok(None);
        };

        match registration.state.load(Ordering::Acquire) {
            READY => Ok(registration.subscription.get().cloned()),
            ERRORED => Err(self.consume_errored(registration_id, &registration)),
            _ => Ok(None),
        }
    }

    fn consume_errored(&self, registration_id: i64, registration: &Registration) -> TernError {
        self.registrations
            .write()
            .expect("registrations poisoned")
            .remove(&registration_id);

        let (code, message) = registration
            .error
            .lock()
            .expect("error lock poisoned")
            .clone()
            .unwrap_or((0, "unknown registration error".to_string()));

        TernError::Registration {
            correlation_id: registration_id,
            code,
            message,
        }
    }

    pub(crate) fn release_publication(&self, registration_id: i64) {
        self.releases
            .lock()
            .expect("releases poisoned")
            .push(Release::Publication(registration_id));
    }

    pub(crate) fn release_subscription(&self, registration_id: i64) {
        self.releases
            .lock()
            .expect("releases poisoned")
            .push(Release::Subscription(registration_id));
    }
}

struct LingeringResource {
    deadline_ms: i64,
    _log_buffers: Arc<LogBuffers>,
}

/// The conductor agent, hosted by an [`crate::concurrent::AgentRunner`]
pub struct ClientConductor {
    link: Arc<ClientLink>,
    adapter: DriverListenerAdapter,
    counter_values_buffer: AtomicBuffer,

    // conductor-private indexes; only this thread mutates them
    publications: HashMap<i64, Arc<Publication>>,
    subscriptions: HashMap<i64, Arc<Subscription>>,
    lingering: Vec<LingeringResource>,

    error_handler: Arc<ErrorHandler>,
    on_new_publication: Option<Arc<crate::context::OnNewPublication>>,
    on_new_subscription: Option<Arc<crate::context::OnNewSubscription>>,
    on_available_image: Option<Arc<crate::context::OnAvailableImage>>,
    on_unavailable_image: Option<Arc<crate::context::OnUnavailableImage>>,

    keepalive_interval_ms: i64,
    driver_timeout_ms: i64,
    inter_service_timeout_ms: i64,
    resource_linger_ms: i64,
    publication_connection_timeout_ms: i64,

    time_of_last_keepalive_ms: i64,
    time_of_last_do_work_ms: i64,
    terminated: bool,
}

impl ClientConductor {
    pub(crate) fn new(
        link: Arc<ClientLink>,
        adapter: DriverListenerAdapter,
        counter_values_buffer: AtomicBuffer,
        context: &Context,
    ) -> Self {
        let now = epoch_ms();
        Self {
            link,
            adapter,
            counter_values_buffer,
            publications: HashMap::new(),
            subscriptions: HashMap::new(),
            lingering: Vec::new(),
            error_handler: context.error_handler(),
            on_new_publication: context.on_new_publication(),
            on_new_subscription: context.on_new_subscription(),
            on_available_image: context.on_available_image(),
            on_unavailable_image: context.on_unavailable_image(),
            keepalive_interval_ms: context.keepalive_interval().as_millis() as i64,
            driver_timeout_ms: context.driver_timeout().as_millis() as i64,
            inter_service_timeout_ms: context.inter_service_timeout().as_millis() as i64,
            resource_linger_ms: context.resource_linger().as_millis() as i64,
            publication_connection_timeout_ms: context
                .publication_connection_timeout()
                .as_millis() as i64,
            time_of_last_keepalive_ms: now,
            time_of_last_do_work_ms: now,
            terminated: false,
        }
    }

    fn receive_driver_events(&mut self) -> usize {
        let mut work_count = 0;

        while work_count < MAX_EVENTS_PER_PASS {
            match self.adapter.receive() {
                Ok(Some(event)) => {
                    work_count += 1;
                    self.on_driver_event(event);
                }
                Ok(None) => break,
                Err(e) => {
                    // lapped: the receiver already resynchronized
                    (self.error_handler)(&e);
                    work_count += 1;
                    break;
                }
            }
        }

        work_count
    }

    fn on_driver_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::PublicationReady(e) => self.on_publication_ready(e),
            DriverEvent::SubscriptionReady(e) => self.on_subscription_ready(e),
            DriverEvent::AvailableImage(e) => self.on_available_image(e),
            DriverEvent::UnavailableImage(e) => self.on_unavailable_image(e),
            DriverEvent::OperationSucceeded(e) => {
                tracing::trace!(correlation_id = e.correlation_id, "operation succeeded");
            }
            DriverEvent::Error(e) => self.on_error_response(e),
        }
    }

    fn registration_for(&self, correlation_id: i64, kind: RegistrationKind) -> Option<Arc<Registration>> {
        let registration = self
            .link
            .registrations
            .read()
            .expect("registrations poisoned")
            .get(&correlation_id)
            .cloned()?;

        // events for other clients carry correlations we never issued
        if registration.kind != kind || registration.state.load(Ordering::Acquire) != AWAITING {
            return None;
        }
        Some(registration)
    }

    fn on_publication_ready(&mut self, event: crate::command::PublicationReadyEvent) {
        let Some(registration) =
            self.registration_for(event.correlation_id, RegistrationKind::Publication)
        else {
            return;
        };

        let log_buffers = match LogBuffers::map_existing(&event.log_file_name) {
            Ok(log_buffers) => Arc::new(log_buffers),
            Err(e) => {
                registration.transition_to_error(0, format!("failed to map log: {}", e));
                (self.error_handler)(&e);
                return;
            }
        };

        let publication = Arc::new(Publication::new(
            Arc::downgrade(&self.link),
            registration.channel.clone(),
            event.correlation_id,
            registration.stream_id,
            event.session_id,
            UnsafeBufferPosition::new(
                self.counter_values_buffer,
                event.position_limit_counter_id,
            ),
            log_buffers,
            self.publication_connection_timeout_ms,
        ));

        let _ = registration.publication.set(Arc::clone(&publication));
        registration.state.store(READY, Ordering::Release);
        self.publications
            .insert(event.correlation_id, Arc::clone(&publication));

        tracing::debug!(
            correlation_id = event.correlation_id,
            session_id = event.session_id,
            channel = %registration.channel,
            "publication ready"
        );

        if let Some(handler) = &self.on_new_publication {
            handler(
                &registration.channel,
                registration.stream_id,
                event.session_id,
                event.correlation_id,
            );
        }
    }

    fn on_subscription_ready(&mut self, event: crate::command::SubscriptionReadyEvent) {
        let Some(registration) =
            self.registration_for(event.correlation_id, RegistrationKind::Subscription)
        else {
            return;
        };

        let subscription = Arc::new(Subscription::new(
            Arc::downgrade(&self.link),
            event.correlation_id,
            registration.channel.clone(),
            registration.stream_id,
            event.channel_status_counter_id,
        ));

        let _ = registration.subscription.set(Arc::clone(&subscription));
        registration.state.store(READY, Ordering::Release);
        self.subscriptions
            .insert(event.correlation_id, Arc::clone(&subscription));

        tracing::debug!(
            correlation_id = event.correlation_id,
            channel = %registration.channel,
            "subscription ready"
        );

        if let Some(handler) = &self.on_new_subscription {
            handler(
                &registration.channel,
                registration.stream_id,
                event.correlation_id,
            );
        }
    }

    fn on_available_image(&mut self, event: crate::command::AvailableImageEvent) {
        let Some(subscription) = self
            .subscriptions
            .get(&event.subscription_registration_id)
            .cloned()
        else {
            return;
        };

        if subscription.is_closed() || subscription.has_image(event.correlation_id) {
            return;
        }

        let log_buffers = match LogBuffers::map_existing(&event.log_file_name) {
            Ok(log_buffers) => Arc::new(log_buffers),
            Err(e) => {
                (self.error_handler)(&e);
                return;
            }
        };

        let image = Arc::new(Image::new(
            event.session_id,
            event.correlation_id,
            event.subscription_registration_id,
            event.source_identity,
            UnsafeBufferPosition::new(self.counter_values_buffer, event.subscriber_position_id),
            log_buffers,
            Arc::clone(&self.error_handler),
        ));

        subscription.add_image(Arc::clone(&image));

        tracing::debug!(
            correlation_id = event.correlation_id,
            session_id = event.session_id,
            subscription_registration_id = event.subscription_registration_id,
            "image available"
        );

        if let Some(handler) = &self.on_available_image {
            handler(&image);
        }
    }

    fn on_unavailable_image(&mut self, event: crate::command::UnavailableImageEvent) {
        let Some(subscription) = self
            .subscriptions
            .get(&event.subscription_registration_id)
            .cloned()
        else {
            return;
        };

        let Some(image) = subscription.remove_image(event.correlation_id) else {
            return;
        };

        image.close();
        self.linger(image.log_buffers());

        tracing::debug!(
            correlation_id = event.correlation_id,
            subscription_registration_id = event.subscription_registration_id,
            "image unavailable"
        );

        if let Some(handler) = &self.on_unavailable_image {
            handler(&image);
        }
    }

    fn on_error_response(&mut self, event: crate::command::ErrorResponseEvent) {
        let registration = {
            self.link
                .registrations
                .read()
                .expect("registrations poisoned")
                .get(&event.offending_command_correlation_id)
                .cloned()
        };

        if let Some(registration) = registration {
            if registration.state.load(Ordering::Acquire) != AWAITING {
                return;
            }
            tracing::warn!(
                correlation_id = event.offending_command_correlation_id,
                code = event.error_code,
                message = %event.error_message,
                "driver rejected registration"
            );
            registration.transition_to_error(event.error_code, event.error_message);
        }
    }

    fn on_heartbeat_check_timeouts(&mut self) -> Result<usize> {
        let now = epoch_ms();
        let mut work_count = 0;

        if now > self.time_of_last_do_work_ms + self.inter_service_timeout_ms {
            self.force_close_all();
            self.terminated = true;
            return Err(TernError::conductor_service_timeout(format!(
                "timeout between service calls over {} ms",
                self.inter_service_timeout_ms
            )));
        }
        self.time_of_last_do_work_ms = now;

        if now >= self.time_of_last_keepalive_ms + self.keepalive_interval_ms {
            if now > self.link.proxy.time_of_last_driver_keepalive() + self.driver_timeout_ms {
                self.link.driver_active.store(false, Ordering::Release);
                self.force_close_all();
                self.terminated = true;
                return Err(TernError::driver_timeout(format!(
                    "driver has been inactive for over {} ms",
                    self.driver_timeout_ms
                )));
            }

            if let Err(e) = self.link.proxy.send_client_keepalive() {
                (self.error_handler)(&e);
            }

            self.check_registration_timeouts(now);

            self.time_of_last_keepalive_ms = now;
            work_count = 1;
        }

        Ok(work_count)
    }

    fn check_registration_timeouts(&self, now_ms: i64) {
        let registrations = self.link.registrations.read().expect("registrations poisoned");
        for (correlation_id, registration) in registrations.iter() {
            if registration.state.load(Ordering::Acquire) == AWAITING
                && now_ms > registration.registered_at_ms + self.driver_timeout_ms
            {
                tracing::warn!(correlation_id, "registration timed out awaiting driver");
                registration.transition_to_error(
                    REGISTRATION_TIMEOUT_ERROR_CODE,
                    format!(
                        "no response from driver within {} ms",
                        self.driver_timeout_ms
                    ),
                );
            }
        }
    }

    fn process_release_requests(&mut self) -> usize {
        let releases: Vec<Release> = {
            let mut queue = self.link.releases.lock().expect("releases poisoned");
            queue.drain(..).collect()
        };
        let count = releases.len();
        let now = epoch_ms();

        for release in releases {
            match release {
                Release::Publication(registration_id) => {
                    if let Some(publication) = self.publications.remove(&registration_id) {
                        publication.mark_closed();
                        if let Err(e) = self.link.proxy.remove_publication(registration_id) {
                            (self.error_handler)(&e);
                        }
                        self.lingering.push(LingeringResource {
                            deadline_ms: now + self.resource_linger_ms,
                            _log_buffers: publication.log_buffers(),
                        });
                    }
                    self.link
                        .registrations
                        .write()
                        .expect("registrations poisoned")
                        .remove(&registration_id);
                }
                Release::Subscription(registration_id) => {
                    if let Some(subscription) = self.subscriptions.remove(&registration_id) {
                        if let Err(e) = self.link.proxy.remove_subscription(registration_id) {
                            (self.error_handler)(&e);
                        }
                        for image in subscription.close_and_take_images() {
                            image.close();
                            self.lingering.push(LingeringResource {
                                deadline_ms: now + self.resource_linger_ms,
                                _log_buffers: image.log_buffers(),
                            });
                        }
                    }
                    self.link
                        .registrations
                        .write()
                        .expect("registrations poisoned")
                        .remove(&registration_id);
                }
            }
        }

        count
    }

    fn linger(&mut self, log_buffers: Arc<LogBuffers>) {
        self.lingering.push(LingeringResource {
            deadline_ms: epoch_ms() + self.resource_linger_ms,
            _log_buffers: log_buffers,
        });
    }

    fn check_lingering_resources(&mut self) -> usize {
        let now = epoch_ms();
        let before = self.lingering.len();
        self.lingering.retain(|r| now < r.deadline_ms);
        before - self.lingering.len()
    }

    /// Fatal path: release-store every closed flag so application
    /// threads stop touching shared buffers, and poison all pending
    /// registrations.
    fn force_close_all(&mut self) {
        for (_, publication) in self.publications.drain() {
            publication.mark_closed();
        }

        for (_, subscription) in self.subscriptions.drain() {
            for image in subscription.close_and_take_images() {
                image.close();
            }
        }

        let registrations = self.link.registrations.read().expect("registrations poisoned");
        for registration in registrations.values() {
            if registration.state.load(Ordering::Acquire) == AWAITING {
                registration.transition_to_error(
                    REGISTRATION_TIMEOUT_ERROR_CODE,
                    "driver is inactive".to_string(),
                );
            }
        }
    }
}

impl Agent for ClientConductor {
    fn do_work(&mut self) -> Result<usize> {
        if self.terminated {
            return Ok(0);
        }

        let mut work_count = 0;
        work_count += self.receive_driver_events();
        work_count += self.on_heartbeat_check_timeouts()?;
        work_count += self.process_release_requests();
        work_count += self.check_lingering_resources();

        Ok(work_count)
    }

    fn on_close(&mut self) {
        self.lingering.clear();
        tracing::debug!("client conductor closed");
    }

    fn role_name(&self) -> &str {
        "client-conductor"
    }
}
